/// fern dispatch writing to the console and a per-run log file.
pub mod logger;

pub use logger::{cleanup_old_logs, parse_level, setup_logging};
