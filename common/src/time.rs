//! Time utilities and constants for the IOU ledger protocol.

use chrono::{DateTime, Duration, Utc};

/// Protocol timing constants.
pub mod constants {
    use super::Duration;

    /// Message freshness window (5 minutes).
    pub fn message_freshness_window() -> Duration {
        Duration::minutes(5)
    }
}

/// A timestamp with timezone (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Check if a timestamp is within the freshness window.
pub fn is_fresh(timestamp: Timestamp) -> bool {
    let diff = (now() - timestamp).abs();
    diff < constants::message_freshness_window()
}
