use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};

use crate::analytics::topics;
use crate::stomp::{StompClient, StompMessage, SubscriptionHandle};

/// How many recent updates the feed keeps, newest first.
pub const MAX_REAL_TIME_UPDATES: usize = 20;

/// Everything the feed has accumulated so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyticsSnapshot {
    /// Merged `ANALYTICS_SUMMARY` fields plus `performanceMetrics`.
    pub analytics_data: Map<String, Value>,
    /// Most recent updates across topics, newest first.
    pub real_time_updates: VecDeque<Value>,
    /// Latest risk update per `supplierId`.
    pub risk_updates: HashMap<String, Value>,
    /// Last list received in a `RECOMMENDATION_UPDATE`.
    pub recommendations: Vec<Value>,
}

/// # Analytics Feed
///
/// Subscribes to the six analytics topics once; the client's subscription
/// replay keeps them alive across reconnects. Message handlers run on the
/// client task, so the snapshot sits behind a plain mutex that is only held for
/// the duration of a single update.
#[derive(Clone, Default)]
pub struct AnalyticsFeed {
    state: Arc<Mutex<AnalyticsSnapshot>>,
}

impl AnalyticsFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes the feed to every analytics topic on `client`.
    pub fn attach(&self, client: &StompClient) -> Vec<SubscriptionHandle> {
        topics::ALL_TOPICS
            .iter()
            .copied()
            .filter_map(|topic| {
                let feed = self.clone();
                client.subscribe(topic, move |message| feed.ingest(topic, message))
            })
            .collect()
    }

    /// Folds one message into the snapshot. Bodies that are not JSON are logged
    /// and skipped; the stream carries on.
    pub fn ingest(&self, topic: &str, message: &StompMessage) {
        match message.json::<Value>() {
            Ok(update) => self.apply(topic, update),
            Err(e) => log::error!("Error parsing {} message: {}", topic, e),
        }
    }

    fn apply(&self, topic: &str, update: Value) {
        let mut state = self.lock();

        match topic {
            topics::ANALYTICS => {
                if message_type(&update) == Some("ANALYTICS_SUMMARY") {
                    if let Some(Value::Object(summary)) = update.get("summary") {
                        for (key, value) in summary {
                            state.analytics_data.insert(key.clone(), value.clone());
                        }
                    }
                }
                push_update(&mut state, update);
            }
            topics::RISK_UPDATES => {
                if let Some(supplier) = supplier_id(&update) {
                    state.risk_updates.insert(supplier, update.clone());
                } else {
                    log::debug!("Risk update without supplierId");
                }
                push_update(&mut state, update);
            }
            topics::RECOMMENDATIONS => {
                if message_type(&update) == Some("RECOMMENDATION_UPDATE") {
                    state.recommendations = match update.get("recommendations") {
                        Some(Value::Array(items)) => items.clone(),
                        _ => Vec::new(),
                    };
                }
                push_update(&mut state, update);
            }
            topics::PREDICTIONS | topics::ALERTS => push_update(&mut state, update),
            topics::PERFORMANCE => {
                let metrics = update.get("metrics").cloned().unwrap_or(Value::Null);
                state
                    .analytics_data
                    .insert("performanceMetrics".to_string(), metrics);
            }
            other => log::debug!("Analytics feed ignoring message on {}", other),
        }
    }

    pub fn snapshot(&self) -> AnalyticsSnapshot {
        self.lock().clone()
    }

    pub fn clear_updates(&self) {
        self.lock().real_time_updates.clear();
    }

    pub fn risk_for_supplier(&self, supplier_id: &str) -> Option<Value> {
        self.lock().risk_updates.get(supplier_id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, AnalyticsSnapshot> {
        // A panicking handler must not take the feed down with it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn push_update(state: &mut AnalyticsSnapshot, update: Value) {
    state.real_time_updates.push_front(update);
    state.real_time_updates.truncate(MAX_REAL_TIME_UPDATES);
}

fn message_type(update: &Value) -> Option<&str> {
    update.get("type").and_then(Value::as_str)
}

fn supplier_id(update: &Value) -> Option<String> {
    match update.get("supplierId") {
        Some(Value::String(id)) => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    }
}
