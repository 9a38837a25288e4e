//! IOU Ledger Common Types
//!
//! This crate contains shared types used across the IOU ledger,
//! including identifiers, monetary amounts, contract violations, the error
//! taxonomy and the flow session state machine.

pub mod identifiers;
pub mod monetary;
pub mod violation;
pub mod error;
pub mod flow;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use violation::*;
pub use error::*;
pub use flow::*;
pub use time::*;
