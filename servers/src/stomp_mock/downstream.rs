use crate::stomp_mock::config::Config;
use crate::stomp_mock::session::{Reply, Session};
use crate::stomp_mock::state::BrokerState;
use axum::{
    extract::{
        ws::{Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::StreamExt;
use lib_realtime::stomp::frame::Frame;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{Instant, Interval, MissedTickBehavior};

static NEXT_CLIENT_ID: AtomicUsize = AtomicUsize::new(1);

pub fn router(state: BrokerState) -> Router {
    Router::new()
        // Plain WebSocket, and the raw-WebSocket path SockJS clients use
        .route("/ws", get(ws_handler))
        .route("/ws/websocket", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

pub async fn run(
    config: Config,
    state: BrokerState,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port()));
    log::info!("STOMP mock broker listening on ws://{}/ws", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.recv().await.ok();
            log::info!("STOMP mock broker shutting down.");
        })
        .await?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<BrokerState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn health_handler(State(state): State<BrokerState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "OK",
        "clients": state.client_count(),
    }))
}

async fn handle_socket(mut socket: WebSocket, state: BrokerState) {
    let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
    let connected_clients = state.add_client();
    log::info!("Client {} connected ({} total)", client_id, connected_clients);

    let mut session = Session::new(client_id);
    let mut published_rx = state.published_tx.subscribe();
    let mut shutdown_rx = state.shutdown_tx.subscribe();
    // Armed once CONNECTED has gone out with a non-zero send period.
    let mut heartbeat: Option<Interval> = None;

    loop {
        let reply = tokio::select! {
            // Frames from the client
            incoming = socket.next() => match incoming {
                Some(Ok(Message::Text(text))) => session.on_data(text.as_str().as_bytes(), &state),
                Some(Ok(Message::Binary(data))) => session.on_data(&data, &state),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    log::warn!("Client {} socket error: {}", client_id, e);
                    break;
                }
            },
            // Messages published by anyone, filtered by this session's subscriptions
            published = published_rx.recv() => match published {
                Ok(message) => session.deliver(&message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Client {} lagged, {} messages skipped", client_id, skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = next_beat(&mut heartbeat) => Reply::heartbeat(),
            _ = shutdown_rx.recv() => break,
        };

        if !write_reply(&mut socket, reply).await {
            break;
        }

        if heartbeat.is_none() {
            if let Some(period) = session.heartbeat_every() {
                log::debug!("Client {} gets a heart-beat every {:?}", client_id, period);
                heartbeat = Some(beat_timer(period));
            }
        }
    }

    let _ = socket.send(Message::Close(None)).await;
    state.remove_client();
    log::info!("Client {} disconnected", client_id);
}

fn beat_timer(period: Duration) -> Interval {
    let mut timer = tokio::time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn next_beat(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Writes every frame of `reply`. Returns `false` once the connection is done.
async fn write_reply(socket: &mut WebSocket, reply: Reply) -> bool {
    if reply.heartbeat {
        let beat = Message::Text(Utf8Bytes::from_static("\n"));
        if socket.send(beat).await.is_err() {
            return false;
        }
    }
    for frame in reply.frames {
        if socket.send(to_message(&frame)).await.is_err() {
            return false;
        }
    }
    !reply.close
}

fn to_message(frame: &Frame) -> Message {
    match String::from_utf8(frame.encode()) {
        Ok(text) => Message::Text(text.into()),
        Err(e) => Message::Binary(e.into_bytes().into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_realtime::stomp::{ClientOptions, ConnectionState, StompClient, WsConnector};
    use std::sync::Arc;

    async fn serve(heartbeat_ms: u64) -> String {
        let (shutdown_tx, _) = broadcast::channel(1);
        let state = BrokerState::new(shutdown_tx, heartbeat_ms);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("ws://{}/ws", addr)
    }

    #[tokio::test]
    async fn advertised_heartbeats_keep_the_client_connected() {
        let url = serve(100).await;
        let options = ClientOptions {
            heartbeat_outgoing_ms: 0,
            heartbeat_incoming_ms: 100,
            ..ClientOptions::default()
        };
        let connector = Arc::new(WsConnector::new(&url, false).unwrap());
        let client = StompClient::new(options, connector);

        let mut changes = client.state_changes();
        tokio::time::timeout(
            Duration::from_secs(5),
            changes.wait_for(|status| status.state == ConnectionState::Connected),
        )
        .await
        .unwrap()
        .unwrap();
        changes.mark_unchanged();

        // Ten times the 200ms silence deadline the client enforces.
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(!changes.has_changed().unwrap());
        let status = client.status();
        assert_eq!(status.state, ConnectionState::Connected);
        assert_eq!(status.last_error, None);
        client.disconnect();
    }
}
