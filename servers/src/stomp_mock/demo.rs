//! Sample traffic on the analytics topics, so a dashboard (or `stomp-tail
//! --analytics`) has something to show without a real backend.

use crate::stomp_mock::state::BrokerState;
use lib_realtime::analytics::topics;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::broadcast;

pub async fn run(state: BrokerState, interval_ms: u64, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
    let mut seq: u64 = 0;
    log::info!("Demo publisher started, one message every {}ms", interval_ms);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let topic = topics::ALL_TOPICS[(seq % topics::ALL_TOPICS.len() as u64) as usize];
                let payload = sample(topic, seq);
                let id = state.publish(topic, Some("application/json".to_string()), payload.to_string().into_bytes());
                log::debug!("Demo message {} on {}", id, topic);
                seq += 1;
            }
            _ = shutdown.recv() => {
                log::info!("Demo publisher stopped after {} messages.", seq);
                return;
            }
        }
    }
}

/// A payload shaped like what the analytics backend publishes on `topic`.
pub fn sample(topic: &str, seq: u64) -> Value {
    let now = chrono::Utc::now().to_rfc3339();
    let supplier = format!("SUP-{:03}", seq % 7 + 1);
    // Cheap deterministic wobble in [0, 1)
    let score = ((seq * 37) % 100) as f64 / 100.0;
    let risk_level = if score > 0.7 {
        "HIGH"
    } else if score > 0.4 {
        "MEDIUM"
    } else {
        "LOW"
    };
    let severity = if seq % 3 == 0 { "CRITICAL" } else { "WARNING" };
    let alert = format!("Risk threshold crossed for {}", supplier);
    let second_supplier = format!("SUP-{:03}", (seq + 3) % 7 + 1);

    match topic {
        topics::ANALYTICS => json!({
            "type": "ANALYTICS_SUMMARY",
            "timestamp": now,
            "summary": {
                "totalSuppliers": 42,
                "highRiskSuppliers": seq % 5,
                "averageRiskScore": score,
            },
        }),
        topics::RISK_UPDATES => json!({
            "type": "RISK_UPDATE",
            "timestamp": now,
            "supplierId": supplier,
            "riskScore": score,
            "riskLevel": risk_level,
        }),
        topics::PREDICTIONS => json!({
            "type": "PREDICTION",
            "timestamp": now,
            "supplierId": supplier,
            "predictedDelayDays": seq % 10,
            "confidence": 1.0 - score / 2.0,
        }),
        topics::RECOMMENDATIONS => json!({
            "type": "RECOMMENDATION_UPDATE",
            "timestamp": now,
            "recommendations": [
                { "supplierId": supplier, "action": "Diversify sourcing" },
                { "supplierId": second_supplier, "action": "Review contract terms" },
            ],
        }),
        topics::ALERTS => json!({
            "type": "ALERT",
            "timestamp": now,
            "severity": severity,
            "message": alert,
        }),
        _ => json!({
            "type": "PERFORMANCE",
            "timestamp": now,
            "metrics": {
                "messagesPublished": seq,
                "processingLatencyMs": 5 + seq % 20,
            },
        }),
    }
}
