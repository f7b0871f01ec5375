//! # STOMP Round-Trip Test
//!
//! Exercises `lib_realtime::stomp::StompClient` against a live broker, by default
//! the mock one from the `servers` crate:
//!
//! ```text
//! cargo run -p servers --bin server_stomp_mock
//! cargo run -p project_tests --bin test_stomp_roundtrip -- --url ws://127.0.0.1:9003/ws
//! ```
//!
//! Two clients share the broker: one subscribes, the other publishes. The
//! subscriber then disconnects, reconnects and subscribes again, and a publish
//! attempted while disconnected must not arrive.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, bail, ensure};
use clap::Parser;
use serde_json::json;

use lib_realtime::configs::{ClientConfig, load_config};
use lib_realtime::stomp::{StompClient, StompMessage};

#[derive(Parser, Debug)]
#[command(name = "test_stomp_roundtrip", about = "Publish/subscribe round trip against a STOMP broker")]
struct Args {
    /// Destination used for the round trip
    #[arg(long, default_value = "/topic/roundtrip")]
    topic: String,

    #[command(flatten)]
    client: ClientConfig,
}

async fn wait_until_connected(client: &StompClient, what: &str) -> Result<()> {
    let status = tokio::time::timeout(
        Duration::from_secs(10),
        client.wait_for(|s| s.is_connected() || s.has_error()),
    )
    .await
    .map_err(|_| anyhow::anyhow!("{} did not connect within 10s", what))??;
    if let Some(error) = status.error() {
        bail!("{} was rejected: {}", what, error);
    }
    Ok(())
}

async fn wait_for_messages(received: &Mutex<Vec<String>>, count: usize) -> Result<()> {
    for _ in 0..100 {
        if received.lock().map(|r| r.len()).unwrap_or(0) >= count {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    bail!("expected {} messages, got {:?}", count, received.lock().map(|r| r.clone()).unwrap_or_default())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(ClientConfig {
        // Keep test retries short
        reconnect_delay_ms: Some(500),
        ..Default::default()
    }
    .merge(args.client))?;

    println!("--- Starting STOMP Round-Trip Tests against {} ---", config.url());

    // --- TEST 1: Connect both clients ---
    let subscriber = config.build_client()?;
    let publisher = config.build_client()?;
    wait_until_connected(&subscriber, "subscriber").await?;
    wait_until_connected(&publisher, "publisher").await?;
    println!("[OK] Both clients connected");

    // --- TEST 2: Publish and receive ---
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    subscriber.subscribe(&args.topic, move |message: &StompMessage| {
        if let Ok(mut received) = sink.lock() {
            received.push(message.body_text());
        }
    });
    // Let the SUBSCRIBE reach the broker before publishing
    tokio::time::sleep(Duration::from_millis(300)).await;

    publisher.publish_json(&args.topic, &json!({"seq": 1}), Vec::new())?;
    wait_for_messages(&received, 1).await?;
    println!("[OK] Message delivered to subscriber");

    // --- TEST 3: Explicit reconnect and re-subscribe ---
    subscriber.disconnect();
    subscriber.connect();
    wait_until_connected(&subscriber, "subscriber (second session)").await?;
    // disconnect() forgets subscriptions
    let sink = Arc::clone(&received);
    subscriber.subscribe(&args.topic, move |message: &StompMessage| {
        if let Ok(mut received) = sink.lock() {
            received.push(message.body_text());
        }
    });
    tokio::time::sleep(Duration::from_millis(300)).await;
    publisher.send_message(&args.topic, r#"{"seq":2}"#);
    wait_for_messages(&received, 2).await?;
    println!("[OK] Delivery resumed after reconnect");

    // --- TEST 4: Publish while disconnected is dropped ---
    publisher.disconnect();
    tokio::time::sleep(Duration::from_millis(200)).await;
    publisher.send_message(&args.topic, r#"{"seq":"lost"}"#);
    tokio::time::sleep(Duration::from_millis(500)).await;
    let count = received.lock().map(|r| r.len()).unwrap_or(0);
    ensure!(count == 2, "message published while disconnected was delivered");
    println!("[OK] Publish while disconnected was dropped");

    subscriber.disconnect();
    println!("--- All STOMP Round-Trip Tests Passed ---");
    Ok(())
}
