//! IOU Ledger Participant Library
//!
//! A node for one party: the create, transfer and settle flows it initiates, the
//! responder that countersigns its peers' proposals, and the in-memory vault and
//! dependency resolver it runs with by default.

pub mod client;
pub mod config;
pub mod connection;
pub mod flows;
pub mod handler;
pub mod resolver;
pub mod session;
pub mod vault;

pub use client::{ObligationNode, ObligationNodeBuilder};
pub use config::NodeConfig;
pub use connection::PeerConnection;
pub use handler::{MessageHandler, NodeHandler};
pub use resolver::PeerDependencyResolver;
pub use session::{FlowSession, SessionRegistry};
pub use vault::InMemoryVault;
