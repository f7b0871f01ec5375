//! Broker destinations the supply-chain backend publishes on.

pub const ANALYTICS: &str = "/topic/analytics";
pub const RISK_UPDATES: &str = "/topic/risk-updates";
pub const PREDICTIONS: &str = "/topic/predictions";
pub const RECOMMENDATIONS: &str = "/topic/recommendations";
pub const ALERTS: &str = "/topic/alerts";
pub const PERFORMANCE: &str = "/topic/performance";

/// Every topic the analytics feed listens on.
pub const ALL_TOPICS: [&str; 6] = [
    ANALYTICS,
    RISK_UPDATES,
    PREDICTIONS,
    RECOMMENDATIONS,
    ALERTS,
    PERFORMANCE,
];
