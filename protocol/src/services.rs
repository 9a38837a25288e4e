//! Collaborator interfaces consumed by the flows.
//!
//! Each trait is object safe and injected as `Arc<dyn Trait>`, so the flows never
//! depend on a concrete vault, network, notary or asset ledger.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;

use iou_common::{Amount, IouError, ObligationId, PartyId, Result, StateRef, TransactionId};
use iou_crypto::VerifyingKey;
use iou_ledger::{SignedTransaction, SpendFragment, StateAndRef};

use crate::messages::FlowMessage;

/// Read access to the states a party holds.
#[async_trait]
pub trait StateLookup: Send + Sync {
    /// Current unconsumed version of an obligation, or `NotFound`.
    async fn find_unconsumed(&self, id: ObligationId) -> Result<StateAndRef>;

    /// The unconsumed state at `state_ref`, or `NotFound`.
    async fn find_by_ref(&self, state_ref: StateRef) -> Result<StateAndRef>;
}

/// Builds the cash side of a settlement.
#[async_trait]
pub trait AssetSpendBuilder: Send + Sync {
    /// Inputs and outputs that move `amount` to `pay_to`, change included.
    async fn build_spend(&self, amount: Amount, pay_to: &PartyId) -> Result<SpendFragment>;
}

/// Point-to-point messaging between parties.
#[async_trait]
pub trait MessageExchange: Send + Sync {
    /// Send and wait for the reply of the same session. Fails with `Timeout`
    /// when the peer does not answer in time.
    async fn send_and_receive(&self, peer: &PartyId, message: FlowMessage) -> Result<FlowMessage>;

    /// Send without waiting for a reply.
    async fn send(&self, peer: &PartyId, message: FlowMessage) -> Result<()>;
}

/// Fetches and checks the history behind a transaction's inputs.
#[async_trait]
pub trait DependencyResolver: Send + Sync {
    /// Make every transaction in `ids`, and what they depend on, available
    /// locally, fetching from `peer`. Fails with `UnresolvableDependency`.
    async fn resolve(&self, ids: &[TransactionId], peer: &PartyId) -> Result<()>;
}

/// Result of submitting a transaction for finality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalityOutcome {
    Committed(TransactionId),
    Rejected(String),
}

impl FinalityOutcome {
    /// Committed id, or `ConsensusRejected`.
    pub fn into_result(self) -> Result<TransactionId> {
        match self {
            FinalityOutcome::Committed(id) => Ok(id),
            FinalityOutcome::Rejected(reason) => Err(IouError::ConsensusRejected(reason)),
        }
    }
}

/// Orders transactions and guarantees no state is consumed twice.
#[async_trait]
pub trait FinalityService: Send + Sync {
    /// Commit `transaction` and deliver it to every party in `participants`.
    async fn finalize(
        &self,
        transaction: SignedTransaction,
        participants: BTreeSet<PartyId>,
    ) -> Result<FinalityOutcome>;
}

/// Maps parties to their signing identities.
#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn verifying_key(&self, party: &PartyId) -> Result<VerifyingKey>;
}

/// Transactions a party holds, its own and resolved dependencies alike.
#[async_trait]
pub trait TransactionStorage: Send + Sync {
    async fn transaction(&self, id: &TransactionId) -> Option<SignedTransaction>;

    /// Store a verified transaction that is history only, not a new event.
    async fn record_dependency(&self, transaction: SignedTransaction) -> Result<()>;
}

/// Receives committed transactions from the finality service.
#[async_trait]
pub trait TransactionRecorder: Send + Sync {
    async fn record(&self, transaction: &SignedTransaction) -> Result<()>;
}

/// Check the id and every attached signature of `transaction`.
///
/// With `require_complete`, every declared signer must also have signed.
pub async fn verify_transaction_signatures(
    identity: &dyn IdentityService,
    transaction: &SignedTransaction,
    require_complete: bool,
) -> Result<()> {
    let mut keys = HashMap::new();
    for party in transaction.signed_by() {
        let key = identity.verifying_key(&party).await?;
        keys.insert(party, key);
    }
    let key_of = |party: &PartyId| keys.get(party).cloned();

    if require_complete {
        transaction.verify_required_signatures(key_of)
    } else {
        transaction.verify_id()?;
        transaction.verify_signatures(key_of)
    }
}

/// Every party that must be told about a committed transaction.
pub fn finality_participants(
    transaction: &SignedTransaction,
    extra: impl IntoIterator<Item = PartyId>,
) -> BTreeSet<PartyId> {
    let mut parties = transaction.proposal().participants();
    parties.extend(extra);
    parties
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyDirectory;
    use iou_crypto::SigningKey;
    use iou_ledger::{Command, ObligationState, TransitionProposal};

    #[test]
    fn test_rejection_maps_to_consensus_error() {
        let outcome = FinalityOutcome::Rejected("input consumed".into());
        let err = outcome.into_result().unwrap_err();
        assert!(err.requires_fresh_lookup());
    }

    #[tokio::test]
    async fn test_signature_verification_through_directory() {
        let alice = PartyId::new("ALICE");
        let bob = PartyId::new("BOB");
        let alice_key = SigningKey::generate().unwrap();
        let bob_key = SigningKey::generate().unwrap();

        let directory = KeyDirectory::new();
        directory.register(alice.clone(), alice_key.verifying_key());
        directory.register(bob.clone(), bob_key.verifying_key());

        let iou = ObligationState::issue(10, alice.clone(), bob.clone());
        let signers = iou.participants();
        let stx = SignedTransaction::new(TransitionProposal::new(
            vec![],
            vec![iou.into()],
            Command::Create,
            signers,
        ))
        .unwrap()
        .sign(&alice, &alice_key);

        assert!(verify_transaction_signatures(&directory, &stx, false).await.is_ok());
        assert!(verify_transaction_signatures(&directory, &stx, true).await.is_err());

        let stx = stx.sign(&bob, &bob_key);
        assert!(verify_transaction_signatures(&directory, &stx, true).await.is_ok());
        assert_eq!(finality_participants(&stx, []).len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_signer_rejected() {
        let stranger = PartyId::new("MALLORY");
        let key = SigningKey::generate().unwrap();
        let iou = ObligationState::issue(10, PartyId::new("ALICE"), PartyId::new("BOB"));
        let stx = SignedTransaction::new(TransitionProposal::new(
            vec![],
            vec![iou.into()],
            Command::Create,
            [],
        ))
        .unwrap()
        .sign(&stranger, &key);

        let result = verify_transaction_signatures(&KeyDirectory::new(), &stx, false).await;
        assert!(matches!(result, Err(IouError::UnknownParty(_))));
    }
}
