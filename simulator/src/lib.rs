//! IOU Ledger Simulator
//!
//! Wires parties, a notary and an in-memory network together so scenarios and
//! end-to-end tests can run whole flows in one process.

pub mod controller;
pub mod metrics;
pub mod network;
pub mod party;
pub mod scenario;
pub mod wallet;

pub use controller::{SimulationConfig, SimulationController};
pub use metrics::SimulationMetrics;
pub use network::{Fault, InMemoryNetwork};
pub use party::{Infrastructure, PartyFactory, SimulatedParty};
pub use scenario::{AssertCondition, FaultType, Scenario, ScenarioStep};
pub use wallet::CashWallet;
