//! In-memory vault of the states and transactions one party knows about.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use iou_common::{IouError, ObligationId, PartyId, Result, StateRef, TransactionId};
use iou_ledger::{LedgerState, ObligationState, SignedTransaction, StateAndRef};
use iou_protocol::{StateLookup, TransactionRecorder, TransactionStorage};

/// Vault for one party.
///
/// Tracks the unconsumed states the party participates in and every transaction
/// it has recorded or resolved.
pub struct InMemoryVault {
    /// Owner of the vault.
    party: PartyId,
    /// Transactions by ID, committed and resolved alike.
    transactions: DashMap<TransactionId, SignedTransaction>,
    /// Unconsumed states relevant to `party`.
    unconsumed: DashMap<StateRef, LedgerState>,
    /// Latest unconsumed version of each obligation.
    by_obligation: DashMap<ObligationId, StateRef>,
    /// States this vault has seen consumed.
    consumed: DashMap<StateRef, TransactionId>,
    /// Keeps the three state maps consistent while recording.
    record_lock: Mutex<()>,
}

impl InMemoryVault {
    /// Create an empty vault for `party`.
    pub fn new(party: PartyId) -> Self {
        Self {
            party,
            transactions: DashMap::new(),
            unconsumed: DashMap::new(),
            by_obligation: DashMap::new(),
            consumed: DashMap::new(),
            record_lock: Mutex::new(()),
        }
    }

    pub fn party(&self) -> &PartyId {
        &self.party
    }

    /// Unconsumed obligations the party participates in, ordered by id.
    pub fn obligations(&self) -> Vec<StateAndRef> {
        let mut states: Vec<StateAndRef> = self
            .unconsumed
            .iter()
            .filter(|entry| entry.value().as_obligation().is_some())
            .map(|entry| StateAndRef::new(entry.value().clone(), *entry.key()))
            .collect();
        states.sort_by_key(|s| s.state.as_obligation().map(ObligationState::id));
        states
    }

    /// Current version of one obligation.
    pub fn obligation(&self, id: ObligationId) -> Option<ObligationState> {
        let state_ref = *self.by_obligation.get(&id)?;
        self.unconsumed
            .get(&state_ref)
            .and_then(|state| state.as_obligation().cloned())
    }

    /// Unconsumed cash owned by the party.
    pub fn cash(&self) -> Vec<StateAndRef> {
        let mut states: Vec<StateAndRef> = self
            .unconsumed
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .as_cash()
                    .map(|cash| cash.owner == self.party)
                    .unwrap_or(false)
            })
            .map(|entry| StateAndRef::new(entry.value().clone(), *entry.key()))
            .collect();
        states.sort_by_key(|s| s.state_ref);
        states
    }

    /// Add a state created outside the obligation ledger, such as self-issued cash.
    pub fn record_issued(&self, state: StateAndRef) {
        let _guard = self.record_lock.lock();
        if self.consumed.contains_key(&state.state_ref) {
            return;
        }
        debug!(party = %self.party, state_ref = %state.state_ref, "Recorded issued state");
        self.unconsumed.insert(state.state_ref, state.state);
    }

    /// Check if this vault has seen `state_ref` consumed.
    pub fn is_consumed(&self, state_ref: &StateRef) -> bool {
        self.consumed.contains_key(state_ref)
    }

    /// Number of transactions held.
    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    fn is_relevant(&self, state: &LedgerState) -> bool {
        match state {
            LedgerState::Obligation(iou) => iou.participants().contains(&self.party),
            LedgerState::Cash(cash) => cash.owner == self.party,
        }
    }
}

#[async_trait]
impl StateLookup for InMemoryVault {
    async fn find_unconsumed(&self, id: ObligationId) -> Result<StateAndRef> {
        let state_ref = self
            .by_obligation
            .get(&id)
            .map(|entry| *entry.value())
            .ok_or_else(|| IouError::obligation_not_found(&id))?;
        self.find_by_ref(state_ref).await
    }

    async fn find_by_ref(&self, state_ref: StateRef) -> Result<StateAndRef> {
        self.unconsumed
            .get(&state_ref)
            .map(|state| StateAndRef::new(state.value().clone(), state_ref))
            .ok_or_else(|| IouError::NotFound(state_ref.to_string()))
    }
}

#[async_trait]
impl TransactionStorage for InMemoryVault {
    async fn transaction(&self, id: &TransactionId) -> Option<SignedTransaction> {
        self.transactions.get(id).map(|tx| tx.clone())
    }

    async fn record_dependency(&self, transaction: SignedTransaction) -> Result<()> {
        debug!(party = %self.party, tx = %transaction.id().short(), "Stored dependency");
        self.transactions
            .entry(transaction.id())
            .or_insert(transaction);
        Ok(())
    }
}

#[async_trait]
impl TransactionRecorder for InMemoryVault {
    async fn record(&self, transaction: &SignedTransaction) -> Result<()> {
        let _guard = self.record_lock.lock();
        let id = transaction.id();

        for state_ref in transaction.input_refs() {
            if let Some((_, state)) = self.unconsumed.remove(&state_ref) {
                if let Some(iou) = state.as_obligation() {
                    self.by_obligation
                        .remove_if(&iou.id(), |_, current| *current == state_ref);
                }
            }
            self.consumed.insert(state_ref, id);
        }

        let mut produced = 0;
        for output in transaction.out_refs() {
            if self.consumed.contains_key(&output.state_ref) || !self.is_relevant(&output.state) {
                continue;
            }
            if let Some(iou) = output.state.as_obligation() {
                self.by_obligation.insert(iou.id(), output.state_ref);
            }
            self.unconsumed.insert(output.state_ref, output.state);
            produced += 1;
        }

        self.transactions.insert(id, transaction.clone());

        info!(
            party = %self.party,
            tx = %id.short(),
            command = transaction.proposal().command.name(),
            produced,
            "Recorded transaction"
        );
        Ok(())
    }
}
