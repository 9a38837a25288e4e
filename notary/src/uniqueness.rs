//! Consumed-state tracking.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{info, warn};

use iou_common::{StateRef, TransactionId};

/// A state and the transaction that consumed it.
#[derive(Debug, Clone)]
pub struct ConsumedState {
    /// Transaction that consumed the state.
    pub consuming_tx: TransactionId,
    /// When the state was consumed.
    pub consumed_at: Instant,
}

/// An input that an earlier transaction already consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub state_ref: StateRef,
    pub consumed_by: TransactionId,
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} already consumed by {}",
            self.state_ref,
            self.consumed_by.short()
        )
    }
}

/// Records which transaction consumed each state.
pub struct UniquenessProvider {
    /// Consumed states by reference.
    consumed: Arc<DashMap<StateRef, ConsumedState>>,
    /// Serializes check-and-consume across all inputs of one transaction.
    commit_lock: Mutex<()>,
}

impl UniquenessProvider {
    /// Create a new provider.
    pub fn new() -> Self {
        Self {
            consumed: Arc::new(DashMap::new()),
            commit_lock: Mutex::new(()),
        }
    }

    /// Consume every input for `tx`, or none of them.
    ///
    /// Inputs already consumed by `tx` itself are not conflicts, so a repeated
    /// commit of the same transaction succeeds.
    pub fn commit(&self, inputs: &[StateRef], tx: TransactionId) -> Result<(), Vec<Conflict>> {
        let _guard = self.commit_lock.lock();

        let conflicts: Vec<Conflict> = inputs
            .iter()
            .filter_map(|state_ref| {
                self.consumed
                    .get(state_ref)
                    .filter(|entry| entry.consuming_tx != tx)
                    .map(|entry| Conflict {
                        state_ref: *state_ref,
                        consumed_by: entry.consuming_tx,
                    })
            })
            .collect();

        if !conflicts.is_empty() {
            for conflict in &conflicts {
                warn!(tx = %tx.short(), conflict = %conflict, "Double spend rejected");
            }
            return Err(conflicts);
        }

        let now = Instant::now();
        for state_ref in inputs {
            self.consumed.insert(
                *state_ref,
                ConsumedState {
                    consuming_tx: tx,
                    consumed_at: now,
                },
            );
        }

        info!(tx = %tx.short(), inputs = inputs.len(), "States consumed");
        Ok(())
    }

    /// Transaction that consumed `state_ref`, if any.
    pub fn consumed_by(&self, state_ref: &StateRef) -> Option<TransactionId> {
        self.consumed.get(state_ref).map(|entry| entry.consuming_tx)
    }

    /// Check if a state has been consumed.
    pub fn is_consumed(&self, state_ref: &StateRef) -> bool {
        self.consumed.contains_key(state_ref)
    }

    /// Number of consumed states.
    pub fn consumed_count(&self) -> usize {
        self.consumed.len()
    }
}

impl Default for UniquenessProvider {
    fn default() -> Self {
        Self::new()
    }
}
