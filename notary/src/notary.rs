//! Core notary implementation.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{info, warn, instrument};

use iou_common::{IouError, PartyId, Result, StateRef, TransactionId};
use iou_ledger::SignedTransaction;
use iou_protocol::{
    verify_transaction_signatures, FinalityOutcome, FinalityService, IdentityService,
    TransactionRecorder,
};

use crate::config::NotaryConfig;
use crate::metrics::{Metrics, MetricsSnapshot, SharedMetrics};
use crate::state::NotaryState;
use crate::uniqueness::UniquenessProvider;

/// In-memory finality service.
pub struct Notary {
    /// Configuration.
    config: NotaryConfig,
    /// Current notary state.
    state: Arc<RwLock<NotaryState>>,
    /// Consumed-state tracking.
    uniqueness: Arc<UniquenessProvider>,
    /// Committed transactions by ID.
    committed: Arc<DashMap<TransactionId, SignedTransaction>>,
    /// Keys used to check signatures.
    identity: Arc<dyn IdentityService>,
    /// Where each party receives committed transactions.
    recorders: Arc<DashMap<PartyId, Arc<dyn TransactionRecorder>>>,
    /// Metrics.
    metrics: SharedMetrics,
}

impl Notary {
    /// Create a new notary instance.
    pub fn new(config: NotaryConfig, identity: Arc<dyn IdentityService>) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(NotaryState::Starting)),
            uniqueness: Arc::new(UniquenessProvider::new()),
            committed: Arc::new(DashMap::new()),
            identity,
            recorders: Arc::new(DashMap::new()),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Start accepting submissions.
    #[instrument(skip(self), fields(notary = %self.config.name))]
    pub fn start(&self) -> Result<()> {
        self.config
            .validate()
            .map_err(IouError::ConfigurationError)?;
        *self.state.write() = NotaryState::Running;
        info!("Notary started");
        Ok(())
    }

    /// Stop accepting submissions.
    #[instrument(skip(self), fields(notary = %self.config.name))]
    pub fn stop(&self) {
        *self.state.write() = NotaryState::ShuttingDown;
        *self.state.write() = NotaryState::Stopped;
        info!("Notary stopped");
    }

    /// Get the current notary state.
    pub fn state(&self) -> NotaryState {
        *self.state.read()
    }

    /// Deliver committed transactions naming `party` to `recorder`.
    pub fn register_recorder(&self, party: PartyId, recorder: Arc<dyn TransactionRecorder>) {
        self.recorders.insert(party, recorder);
    }

    /// Check if a transaction has been committed.
    pub fn is_committed(&self, id: &TransactionId) -> bool {
        self.committed.contains_key(id)
    }

    /// Get a committed transaction by ID.
    pub fn committed_transaction(&self, id: &TransactionId) -> Option<SignedTransaction> {
        self.committed.get(id).map(|tx| tx.clone())
    }

    /// Transaction that consumed `state_ref`, if any.
    pub fn consumed_by(&self, state_ref: &StateRef) -> Option<TransactionId> {
        self.uniqueness.consumed_by(state_ref)
    }

    /// Get the number of committed transactions.
    pub fn committed_count(&self) -> usize {
        self.committed.len()
    }

    /// Get current metrics snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    // --- Private methods ---

    async fn check(&self, transaction: &SignedTransaction) -> Result<()> {
        let inputs = transaction.proposal().inputs.len();
        if inputs > self.config.max_inputs_per_transaction {
            return Err(IouError::InvalidAmount(format!(
                "Transaction has {} inputs, limit is {}",
                inputs, self.config.max_inputs_per_transaction
            )));
        }

        verify_transaction_signatures(self.identity.as_ref(), transaction, true).await?;

        if self.config.validate_transactions {
            iou_ledger::verify(transaction.proposal())?;
        }

        Ok(())
    }

    async fn distribute(&self, transaction: &SignedTransaction, participants: &BTreeSet<PartyId>) {
        for party in participants {
            let recorder = match self.recorders.get(party) {
                Some(recorder) => recorder.clone(),
                None => {
                    warn!(party = %party, tx = %transaction.id().short(), "No recorder registered");
                    self.metrics.distribution_failed();
                    continue;
                }
            };

            let delivery =
                tokio::time::timeout(self.config.distribution_timeout, recorder.record(transaction))
                    .await;

            match delivery {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(party = %party, error = %e, "Participant failed to record transaction");
                    self.metrics.distribution_failed();
                }
                Err(_) => {
                    warn!(party = %party, "Timed out delivering transaction");
                    self.metrics.distribution_failed();
                }
            }
        }
    }
}

#[async_trait]
impl FinalityService for Notary {
    #[instrument(skip(self, transaction, participants), fields(tx = %transaction.id().short()))]
    async fn finalize(
        &self,
        transaction: SignedTransaction,
        participants: BTreeSet<PartyId>,
    ) -> Result<FinalityOutcome> {
        if !self.state().accepts_requests() {
            return Err(IouError::NetworkError(format!(
                "Notary {} is not accepting submissions",
                self.config.name
            )));
        }

        self.metrics.submission_received();
        let id = transaction.id();

        if self.committed.contains_key(&id) {
            info!("Transaction already committed");
            self.metrics.duplicate_submission();
            return Ok(FinalityOutcome::Committed(id));
        }

        if let Err(e) = self.check(&transaction).await {
            warn!(error = %e, "Transaction rejected as invalid");
            self.metrics.invalid_rejected();
            return Err(e);
        }

        let inputs: Vec<StateRef> = transaction.input_refs().collect();
        if let Err(conflicts) = self.uniqueness.commit(&inputs, id) {
            self.metrics.double_spend_rejected();
            let reason = conflicts
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return Ok(FinalityOutcome::Rejected(reason));
        }

        self.committed.insert(id, transaction.clone());
        self.metrics.transaction_committed(inputs.len());

        info!(
            command = transaction.proposal().command.name(),
            participants = participants.len(),
            "Transaction committed"
        );

        self.distribute(&transaction, &participants).await;

        Ok(FinalityOutcome::Committed(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iou_common::{Amount, ContractViolation};
    use iou_crypto::SigningKey;
    use iou_ledger::{CashState, Command, ObligationState, StateAndRef, TransitionProposal};
    use iou_protocol::KeyDirectory;
    use parking_lot::Mutex;

    struct Party {
        id: PartyId,
        key: SigningKey,
    }

    fn party(name: &str, directory: &KeyDirectory) -> Party {
        let key = SigningKey::generate().unwrap();
        directory.register(PartyId::new(name), key.verifying_key());
        Party {
            id: PartyId::new(name),
            key,
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<TransactionId>>,
    }

    #[async_trait]
    impl TransactionRecorder for RecordingSink {
        async fn record(&self, transaction: &SignedTransaction) -> Result<()> {
            self.seen.lock().push(transaction.id());
            Ok(())
        }
    }

    struct Fixture {
        notary: Notary,
        alice: Party,
        bob: Party,
        sink: Arc<RecordingSink>,
    }

    fn fixture() -> Fixture {
        let directory = Arc::new(KeyDirectory::new());
        let alice = party("ALICE", &directory);
        let bob = party("BOB", &directory);
        let notary = Notary::new(NotaryConfig::default(), directory);
        notary.start().unwrap();

        let sink = Arc::new(RecordingSink::default());
        notary.register_recorder(alice.id.clone(), sink.clone());
        notary.register_recorder(bob.id.clone(), sink.clone());

        Fixture {
            notary,
            alice,
            bob,
            sink,
        }
    }

    fn signed_create(f: &Fixture) -> SignedTransaction {
        let iou = ObligationState::issue(10, f.alice.id.clone(), f.bob.id.clone());
        let signers = iou.participants();
        SignedTransaction::new(TransitionProposal::new(
            vec![],
            vec![iou.into()],
            Command::Create,
            signers,
        ))
        .unwrap()
        .sign(&f.alice.id, &f.alice.key)
        .sign(&f.bob.id, &f.bob.key)
    }

    /// Full settlement of `created`'s obligation, spending `cash_ref`.
    fn signed_settle(f: &Fixture, created: &SignedTransaction, cash_ref: StateRef) -> SignedTransaction {
        let iou = created.out_ref(0).unwrap();
        let cash = CashState::new(Amount::dollars(10), f.alice.id.clone(), f.alice.id.clone());
        SignedTransaction::new(TransitionProposal::new(
            vec![iou, StateAndRef::new(cash.clone(), cash_ref)],
            vec![cash.with_owner(f.bob.id.clone()).into()],
            Command::Settle { amount: 10 },
            [f.alice.id.clone(), f.bob.id.clone()],
        ))
        .unwrap()
        .sign(&f.alice.id, &f.alice.key)
        .sign(&f.bob.id, &f.bob.key)
    }

    fn both(f: &Fixture) -> BTreeSet<PartyId> {
        [f.alice.id.clone(), f.bob.id.clone()].into_iter().collect()
    }

    #[tokio::test]
    async fn test_commit_and_distribute() {
        let f = fixture();
        let stx = signed_create(&f);

        let outcome = f.notary.finalize(stx.clone(), both(&f)).await.unwrap();
        assert_eq!(outcome, FinalityOutcome::Committed(stx.id()));
        assert!(f.notary.is_committed(&stx.id()));
        assert_eq!(f.sink.seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_resubmission_is_idempotent() {
        let f = fixture();
        let stx = signed_create(&f);

        f.notary.finalize(stx.clone(), both(&f)).await.unwrap();
        let again = f.notary.finalize(stx.clone(), both(&f)).await.unwrap();

        assert_eq!(again, FinalityOutcome::Committed(stx.id()));
        assert_eq!(f.notary.committed_count(), 1);
        assert_eq!(f.notary.metrics().duplicate_submissions, 1);
        // delivered once only
        assert_eq!(f.sink.seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_double_spend_rejected() {
        let f = fixture();
        let created = signed_create(&f);
        f.notary.finalize(created.clone(), both(&f)).await.unwrap();

        let cash_ref = StateRef::new(TransactionId::from_bytes([9; 32]), 0);
        let first = signed_settle(&f, &created, cash_ref);
        let outcome = f.notary.finalize(first.clone(), both(&f)).await.unwrap();
        assert_eq!(outcome, FinalityOutcome::Committed(first.id()));

        // same obligation input, different cash: a different transaction
        let other_cash = StateRef::new(TransactionId::from_bytes([8; 32]), 0);
        let second = signed_settle(&f, &created, other_cash);
        let outcome = f.notary.finalize(second, both(&f)).await.unwrap();

        match outcome {
            FinalityOutcome::Rejected(reason) => assert!(reason.contains("already consumed")),
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(f.notary.metrics().double_spends_rejected, 1);
        // the second transaction's free cash input stays unconsumed
        assert!(f.notary.consumed_by(&other_cash).is_none());
    }

    #[tokio::test]
    async fn test_missing_signature_rejected() {
        let f = fixture();
        let iou = ObligationState::issue(10, f.alice.id.clone(), f.bob.id.clone());
        let signers = iou.participants();
        let stx = SignedTransaction::new(TransitionProposal::new(
            vec![],
            vec![iou.into()],
            Command::Create,
            signers,
        ))
        .unwrap()
        .sign(&f.alice.id, &f.alice.key);

        let result = f.notary.finalize(stx, both(&f)).await;
        assert!(matches!(result, Err(IouError::InvalidSignature(_))));
        assert_eq!(f.notary.committed_count(), 0);
    }

    #[tokio::test]
    async fn test_contract_violation_rejected() {
        let f = fixture();
        let iou = ObligationState::issue(0, f.alice.id.clone(), f.bob.id.clone());
        let signers = iou.participants();
        let stx = SignedTransaction::new(TransitionProposal::new(
            vec![],
            vec![iou.into()],
            Command::Create,
            signers,
        ))
        .unwrap()
        .sign(&f.alice.id, &f.alice.key)
        .sign(&f.bob.id, &f.bob.key);

        let result = f.notary.finalize(stx, both(&f)).await;
        assert_eq!(
            result,
            Err(IouError::Validation(ContractViolation::NonPositiveValue))
        );
    }

    #[tokio::test]
    async fn test_stopped_notary_refuses() {
        let f = fixture();
        f.notary.stop();
        assert_eq!(f.notary.state(), NotaryState::Stopped);
        assert!(f.notary.finalize(signed_create(&f), both(&f)).await.is_err());
    }

    #[test]
    fn test_invalid_config_keeps_notary_starting() {
        let config = NotaryConfig {
            max_inputs_per_transaction: 0,
            ..NotaryConfig::default()
        };
        let notary = Notary::new(config, Arc::new(KeyDirectory::new()));
        assert!(matches!(notary.start(), Err(IouError::ConfigurationError(_))));
        assert_eq!(notary.state(), NotaryState::Starting);

        let outcome = tokio_test::block_on(notary.finalize(
            SignedTransaction::new(TransitionProposal::new(vec![], vec![], Command::Create, []))
                .unwrap(),
            BTreeSet::new(),
        ));
        assert!(matches!(outcome, Err(IouError::NetworkError(_))));
    }
}
