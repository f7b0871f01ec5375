use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// A message accepted from a SEND frame (or the demo publisher), waiting to be
/// fanned out to subscribers of its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub id: u64,
    pub destination: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Clone)]
pub struct BrokerState {
    // Every session receives every message and filters by its own subscriptions
    pub published_tx: broadcast::Sender<Arc<Published>>,
    pub shutdown_tx: broadcast::Sender<()>,
    // Heart-beat (ms) offered to clients in CONNECTED
    pub heartbeat_ms: u64,
    next_message_id: Arc<AtomicU64>,
    clients: Arc<AtomicUsize>,
}

impl BrokerState {
    pub fn new(shutdown_tx: broadcast::Sender<()>, heartbeat_ms: u64) -> Self {
        let (published_tx, _) = broadcast::channel(1000); // Buffer size 1000
        Self {
            published_tx,
            shutdown_tx,
            heartbeat_ms,
            next_message_id: Arc::new(AtomicU64::new(1)),
            clients: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queues a message for delivery and returns its id.
    pub fn publish(&self, destination: &str, content_type: Option<String>, body: Vec<u8>) -> u64 {
        let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let message = Published {
            id,
            destination: destination.to_string(),
            content_type,
            body,
        };
        // No receivers just means nobody is connected
        let _ = self.published_tx.send(Arc::new(message));
        id
    }

    pub fn add_client(&self) -> usize {
        self.clients.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn remove_client(&self) {
        self.clients.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }
}
