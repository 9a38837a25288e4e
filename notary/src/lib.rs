//! IOU Ledger Notary
//!
//! The finality service every flow ends with. It guarantees that no state is
//! consumed by two committed transactions, checks that every required party has
//! signed, and delivers committed transactions to their participants.

pub mod notary;
pub mod config;
pub mod uniqueness;
pub mod state;
pub mod metrics;

pub use notary::Notary;
pub use config::NotaryConfig;
pub use uniqueness::{Conflict, UniquenessProvider};
pub use state::NotaryState;
pub use metrics::{Metrics, MetricsSnapshot};
