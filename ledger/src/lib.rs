//! IOU Ledger States and Contract
//!
//! Immutable obligation and cash states, transition proposals, signed
//! transactions and the contract that decides which transitions are legal.

pub mod state;
pub mod transaction;
pub mod contract;

pub use state::{CashState, LedgerState, ObligationState, StateAndRef};
pub use transaction::{Command, PartySignature, SignedTransaction, SpendFragment, TransitionProposal};
pub use contract::verify;
