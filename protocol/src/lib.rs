//! IOU Ledger Protocol
//!
//! Messages exchanged between parties during a flow, and the interfaces of the
//! collaborators a flow depends on: state lookup, asset spends, messaging,
//! dependency resolution, finality, identity and transaction storage.

pub mod messages;
pub mod services;
pub mod directory;

pub use messages::*;
pub use services::*;
pub use directory::KeyDirectory;
