//! Connection lifecycle of `StompClient` against an in-memory broker.
//!
//! All tests run on paused tokio time, so reconnect delays and heart-beat
//! deadlines elapse instantly once the runtime is idle.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::time::sleep;

use common::{until, FakeBroker, Reply};
use lib_realtime::stomp::frame::decode_packets;
use lib_realtime::stomp::{
    ClientOptions, Command, ConnectionState, Frame, Packet, StaticToken, StompClient,
    TransportError,
};

fn options() -> ClientOptions {
    ClientOptions {
        reconnect_delay_ms: 1000,
        max_reconnect_attempts: 5,
        ..Default::default()
    }
}

fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&lib_realtime::StompMessage) + Send + Sync) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |message: &lib_realtime::StompMessage| {
        sink.lock()
            .unwrap()
            .push(format!("{} {}", message.destination, message.body_text()));
    })
}

#[tokio::test(start_paused = true)]
async fn subscriptions_are_replayed_after_a_drop() {
    let broker = FakeBroker::new();
    let client = StompClient::new(options(), broker.connector());
    let (seen, handler) = recorder();
    let handle = client.subscribe("/topic/alerts", handler).unwrap();

    client.wait_for(|s| s.is_connected()).await.unwrap();
    until("first SUBSCRIBE", || broker.sent(Command::Subscribe).len() == 1).await;
    assert!(broker.push_message("/topic/alerts", handle.id(), "one"));
    until("first delivery", || seen.lock().unwrap().len() == 1).await;

    broker.kill_link();
    until("second connection", || broker.opens() == 2).await;
    client.wait_for(|s| s.is_connected()).await.unwrap();
    until("replayed SUBSCRIBE", || broker.sent(Command::Subscribe).len() == 2).await;

    let frames = broker.sent(Command::Subscribe);
    let (connection, replayed) = &frames[1];
    assert_eq!(*connection, 2);
    assert_eq!(replayed.get_header("destination"), Some("/topic/alerts"));
    assert_eq!(replayed.get_header("id"), Some(handle.id()));
    assert_eq!(replayed.get_header("ack"), Some("auto"));

    assert!(broker.push_message("/topic/alerts", handle.id(), "two"));
    until("second delivery", || seen.lock().unwrap().len() == 2).await;
    assert_eq!(
        *seen.lock().unwrap(),
        vec!["/topic/alerts one".to_string(), "/topic/alerts two".to_string()]
    );

    assert_eq!(broker.max_live(), 1);
    assert_eq!(client.status().reconnect_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn repeated_connect_keeps_a_single_transport() {
    let broker = FakeBroker::new();
    let client = StompClient::new(options(), broker.connector());
    client.connect();
    client.connect();
    client.wait_for(|s| s.is_connected()).await.unwrap();
    client.connect();

    sleep(Duration::from_secs(5)).await;
    assert_eq!(broker.opens(), 1);
    assert_eq!(broker.max_live(), 1);
    assert!(client.status().is_connected());
}

#[tokio::test(start_paused = true)]
async fn reconnect_gives_up_after_max_attempts() {
    let broker = FakeBroker::new();
    broker.refuse_connections(true);
    let client = StompClient::new(
        ClientOptions {
            max_reconnect_attempts: 3,
            ..options()
        },
        broker.connector(),
    );

    until("all attempts", || broker.opens() == 4).await;
    sleep(Duration::from_secs(60)).await;
    assert_eq!(broker.opens(), 4);

    let status = client.status();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert_eq!(status.reconnect_attempts, 3);
    assert_eq!(
        status.last_error.as_deref(),
        Some("Connection failed: connection refused")
    );

    // An explicit connect starts over with a fresh budget.
    broker.refuse_connections(false);
    client.connect();
    let status = client.wait_for(|s| s.is_connected()).await.unwrap();
    assert_eq!(status.reconnect_attempts, 0);
    assert_eq!(status.last_error, None);
    assert_eq!(broker.opens(), 5);
}

#[tokio::test(start_paused = true)]
async fn zero_max_attempts_never_retries() {
    let broker = FakeBroker::new();
    broker.refuse_connections(true);
    let client = StompClient::new(
        ClientOptions {
            max_reconnect_attempts: 0,
            ..options()
        },
        broker.connector(),
    );

    until("first attempt", || broker.opens() == 1).await;
    sleep(Duration::from_secs(60)).await;
    assert_eq!(broker.opens(), 1);
    assert_eq!(client.status().state, ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn error_reply_to_connect_is_not_retried() {
    let broker = FakeBroker::new();
    broker.set_reply(Reply::Reject("Access denied".to_string()));
    let client = StompClient::new(options(), broker.connector());

    let status = client.wait_for(|s| s.has_error()).await.unwrap();
    assert_eq!(status.error(), Some("Access denied"));

    sleep(Duration::from_secs(60)).await;
    assert_eq!(broker.opens(), 1);
    assert_eq!(broker.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn error_frame_during_session_is_not_retried() {
    let broker = FakeBroker::new();
    let client = StompClient::new(options(), broker.connector());
    client.wait_for(|s| s.is_connected()).await.unwrap();

    let error = Frame::new(Command::Error)
        .header("message", "session expired")
        .with_body("details");
    assert!(broker.push(error.into()));

    let status = client.wait_for(|s| s.has_error()).await.unwrap();
    assert_eq!(status.state.to_string(), "ERROR (session expired)");

    sleep(Duration::from_secs(60)).await;
    assert_eq!(broker.opens(), 1);
    assert_eq!(broker.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn undecodable_frame_during_session_is_not_retried() {
    let broker = FakeBroker::new();
    let client = StompClient::new(options(), broker.connector());
    client.wait_for(|s| s.is_connected()).await.unwrap();

    let garbage = decode_packets(b"HELLO\n\n\0").unwrap_err();
    assert!(broker.push_error(TransportError::Protocol(garbage)));

    let status = client.wait_for(|s| s.has_error()).await.unwrap();
    assert_eq!(
        status.last_error.as_deref(),
        Some("Protocol error: Unknown STOMP command: HELLO")
    );

    sleep(Duration::from_secs(60)).await;
    assert_eq!(broker.opens(), 1);
    assert_eq!(broker.live(), 0);
    assert!(client.status().has_error());
}

#[tokio::test(start_paused = true)]
async fn silent_server_is_dropped_and_reconnected() {
    let broker = FakeBroker::new();
    broker.set_reply(Reply::Connected {
        heart_beat: "1000,0".to_string(),
    });
    let client = StompClient::new(options(), broker.connector());
    client.wait_for(|s| s.is_connected()).await.unwrap();

    // Expect a beat every 4s, give up after twice that.
    sleep(Duration::from_secs(7)).await;
    assert_eq!(broker.opens(), 1);

    until("reconnect after silence", || broker.opens() == 2).await;
    assert_eq!(broker.max_live(), 1);
}

#[tokio::test(start_paused = true)]
async fn server_heartbeats_keep_the_session() {
    let broker = FakeBroker::new();
    broker.set_reply(Reply::Connected {
        heart_beat: "1000,0".to_string(),
    });
    let client = StompClient::new(options(), broker.connector());
    client.wait_for(|s| s.is_connected()).await.unwrap();

    let beats = broker.clone();
    let beating = tokio::spawn(async move {
        for _ in 0..30 {
            sleep(Duration::from_secs(1)).await;
            beats.push(Packet::Heartbeat);
        }
    });
    beating.await.unwrap();

    assert_eq!(broker.opens(), 1);
    assert!(client.status().is_connected());
}

#[tokio::test(start_paused = true)]
async fn disconnect_aborts_a_pending_connect() {
    let broker = FakeBroker::new();
    broker.set_reply(Reply::Hang);
    let client = StompClient::new(options(), broker.connector());

    client.wait_for(|s| s.is_connecting()).await.unwrap();
    until("transport opened", || broker.opens() == 1).await;
    client.disconnect();
    client
        .wait_for(|s| s.state == ConnectionState::Disconnected)
        .await
        .unwrap();

    sleep(Duration::from_secs(60)).await;
    assert_eq!(broker.opens(), 1);
    assert_eq!(broker.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn unanswered_connect_times_out_and_retries() {
    let broker = FakeBroker::new();
    broker.set_reply(Reply::Hang);
    let _client = StompClient::new(
        ClientOptions {
            connect_timeout_ms: 3000,
            ..options()
        },
        broker.connector(),
    );

    until("retry after timeout", || broker.opens() == 2).await;
    assert_eq!(broker.max_live(), 1);
}

#[tokio::test(start_paused = true)]
async fn publish_is_dropped_while_disconnected() {
    let broker = FakeBroker::new();
    let client = StompClient::new(
        ClientOptions {
            auto_connect: false,
            ..options()
        },
        broker.connector(),
    );

    client.send_message("/app/ping", "lost");
    sleep(Duration::from_millis(100)).await;
    assert_eq!(broker.opens(), 0);

    client.connect();
    client.wait_for(|s| s.is_connected()).await.unwrap();
    client
        .publish_json("/app/alerts", &json!({"level": "high"}), Vec::new())
        .unwrap();

    until("SEND", || broker.sent(Command::Send).len() == 1).await;
    let frames = broker.sent(Command::Send);
    let (_, sent) = &frames[0];
    assert_eq!(sent.get_header("destination"), Some("/app/alerts"));
    assert_eq!(sent.get_header("content-type"), Some("application/json"));
    assert_eq!(sent.body_text(), r#"{"level":"high"}"#);
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_stops_replay() {
    let broker = FakeBroker::new();
    let client = StompClient::new(options(), broker.connector());
    let (_seen, handler) = recorder();
    let handle = client.subscribe("/topic/risk-updates", handler).unwrap();
    client.wait_for(|s| s.is_connected()).await.unwrap();
    until("SUBSCRIBE", || broker.sent(Command::Subscribe).len() == 1).await;

    client.unsubscribe("/topic/risk-updates");
    until("UNSUBSCRIBE", || broker.sent(Command::Unsubscribe).len() == 1).await;
    let frames = broker.sent(Command::Unsubscribe);
    let (_, frame) = &frames[0];
    assert_eq!(frame.get_header("id"), Some(handle.id()));

    broker.kill_link();
    until("second CONNECT", || broker.sent(Command::Connect).len() == 2).await;
    client.wait_for(|s| s.is_connected()).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(broker.sent(Command::Subscribe).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn stale_handle_does_not_unsubscribe_its_replacement() {
    let broker = FakeBroker::new();
    let client = StompClient::new(options(), broker.connector());
    client.wait_for(|s| s.is_connected()).await.unwrap();

    let old = client.subscribe("/topic/alerts", |_| {}).unwrap();
    let (seen, handler) = recorder();
    let new = client.subscribe("/topic/alerts", handler).unwrap();
    until("both SUBSCRIBEs", || broker.sent(Command::Subscribe).len() == 2).await;
    assert_eq!(broker.sent(Command::Unsubscribe).len(), 1);

    client.unsubscribe_handle(&old);
    // Requests apply in order, so the SEND marks the unsubscribe as handled.
    client.send_message("/app/marker", "x");
    until("marker SEND", || broker.sent(Command::Send).len() == 1).await;
    assert_eq!(broker.sent(Command::Unsubscribe).len(), 1);

    assert!(broker.push_message("/topic/alerts", new.id(), "still here"));
    until("delivery", || seen.lock().unwrap().len() == 1).await;

    broker.kill_link();
    until("replayed SUBSCRIBE", || broker.sent(Command::Subscribe).len() == 3).await;
    let frames = broker.sent(Command::Subscribe);
    let (connection, frame) = &frames[2];
    assert_eq!(*connection, 2);
    assert_eq!(frame.get_header("id"), Some(new.id()));

    client.unsubscribe_handle(&new);
    until("UNSUBSCRIBE of new id", || broker.sent(Command::Unsubscribe).len() == 2).await;
    let frames = broker.sent(Command::Unsubscribe);
    let (_, frame) = &frames[1];
    assert_eq!(frame.get_header("id"), Some(new.id()));
}

#[tokio::test(start_paused = true)]
async fn resubscribing_replaces_the_handler() {
    let broker = FakeBroker::new();
    let client = StompClient::new(options(), broker.connector());
    client.wait_for(|s| s.is_connected()).await.unwrap();

    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&first);
    let old = client
        .subscribe("/topic/predictions", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    let counter = Arc::clone(&second);
    let new = client
        .subscribe("/topic/predictions", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert_ne!(old.id(), new.id());

    until("UNSUBSCRIBE of old id", || broker.sent(Command::Unsubscribe).len() == 1).await;
    let frames = broker.sent(Command::Unsubscribe);
    let (_, frame) = &frames[0];
    assert_eq!(frame.get_header("id"), Some(old.id()));
    until("both SUBSCRIBEs", || broker.sent(Command::Subscribe).len() == 2).await;

    assert!(broker.push_message("/topic/predictions", new.id(), "{}"));
    until("delivery", || second.load(Ordering::SeqCst) == 1).await;
    assert_eq!(first.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn panicking_handler_does_not_stop_delivery() {
    let broker = FakeBroker::new();
    let client = StompClient::new(options(), broker.connector());
    let bad = client
        .subscribe("/topic/alerts", |_| panic!("handler bug"))
        .unwrap();
    let (seen, handler) = recorder();
    let good = client.subscribe("/topic/analytics", handler).unwrap();
    client.wait_for(|s| s.is_connected()).await.unwrap();
    until("SUBSCRIBEs", || broker.sent(Command::Subscribe).len() == 2).await;

    assert!(broker.push_message("/topic/alerts", bad.id(), "boom"));
    assert!(broker.push_message("/topic/analytics", good.id(), "fine"));
    until("delivery", || seen.lock().unwrap().len() == 1).await;
    assert!(client.status().is_connected());
    assert_eq!(broker.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_forgets_subscriptions() {
    let broker = FakeBroker::new();
    let client = StompClient::new(options(), broker.connector());
    let (_seen, handler) = recorder();
    client.subscribe("/topic/alerts", handler).unwrap();
    client.wait_for(|s| s.is_connected()).await.unwrap();
    until("SUBSCRIBE", || broker.sent(Command::Subscribe).len() == 1).await;

    client.disconnect();
    until("DISCONNECT", || broker.sent(Command::Disconnect).len() == 1).await;
    until("transport closed", || broker.live() == 0).await;
    assert_eq!(client.status().state, ConnectionState::Disconnected);

    sleep(Duration::from_secs(60)).await;
    assert_eq!(broker.opens(), 1);

    client.connect();
    client.wait_for(|s| s.is_connected()).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(broker.sent(Command::Subscribe).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_last_handle_disconnects() {
    let broker = FakeBroker::new();
    let client = StompClient::new(options(), broker.connector());
    client.wait_for(|s| s.is_connected()).await.unwrap();

    drop(client);
    until("DISCONNECT", || broker.sent(Command::Disconnect).len() == 1).await;
    until("transport closed", || broker.live() == 0).await;
}

#[tokio::test(start_paused = true)]
async fn connect_frame_carries_auth_and_heartbeat() {
    let broker = FakeBroker::new();
    let mut options = options();
    options.host = Some("broker.local".to_string());
    options
        .connect_headers
        .insert("login".to_string(), "analyst".to_string());

    let client = StompClient::with_token_provider(
        options,
        broker.connector(),
        Arc::new(StaticToken::new(Some("abc123".to_string()))),
    );
    client.wait_for(|s| s.is_connected()).await.unwrap();

    let frames = broker.sent(Command::Connect);
    let (_, connect) = &frames[0];
    assert_eq!(connect.get_header("accept-version"), Some("1.2,1.1,1.0"));
    assert_eq!(connect.get_header("heart-beat"), Some("4000,4000"));
    assert_eq!(connect.get_header("host"), Some("broker.local"));
    assert_eq!(connect.get_header("login"), Some("analyst"));
    assert_eq!(connect.get_header("Authorization"), Some("Bearer abc123"));
}

#[tokio::test(start_paused = true)]
async fn blank_topic_is_rejected() {
    let broker = FakeBroker::new();
    let client = StompClient::new(options(), broker.connector());
    assert!(client.subscribe("  ", |_| {}).is_none());

    client.wait_for(|s| s.is_connected()).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert!(broker.sent(Command::Subscribe).is_empty());
}
