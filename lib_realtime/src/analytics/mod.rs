//! # Analytics Feed Module
//!
//! Aggregates the real-time analytics topics into a single snapshot that a
//! dashboard (or the `stomp-tail` CLI) can read at any time.
//!
//! ## Contained Modules:
//! - **`topics`**: the destinations published by the backend.
//! - **`feed`**: `AnalyticsFeed`, which subscribes to them and folds every
//!   message into an `AnalyticsSnapshot`.

/// Destination names.
pub mod topics;
/// The aggregating feed.
pub mod feed;

pub use feed::{AnalyticsFeed, AnalyticsSnapshot, MAX_REAL_TIME_UPDATES};
