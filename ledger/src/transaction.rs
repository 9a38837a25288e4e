//! Transition proposals and signed transactions.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use iou_common::{IouError, PartyId, Result, StateRef, TransactionId};
use iou_crypto::{sha256, Signature, SigningKey, VerifyingKey};

use crate::state::{LedgerState, ObligationState, StateAndRef};

/// The single command carried by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Originate a new obligation.
    Create,
    /// Reassign the recipient; the new recipient is carried by the output.
    Transfer,
    /// Pay `amount` base units off the obligation.
    Settle { amount: i64 },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Create => "create",
            Command::Transfer => "transfer",
            Command::Settle { .. } => "settle",
        }
    }
}

/// A candidate ledger transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionProposal {
    /// States consumed, with the references that produced them.
    pub inputs: Vec<StateAndRef>,
    /// States produced, in output-index order.
    pub outputs: Vec<LedgerState>,
    pub command: Command,
    /// Parties whose signatures the command's issuer declares required.
    pub signers: BTreeSet<PartyId>,
}

impl TransitionProposal {
    /// Create a new proposal.
    pub fn new(
        inputs: Vec<StateAndRef>,
        outputs: Vec<LedgerState>,
        command: Command,
        signers: impl IntoIterator<Item = PartyId>,
    ) -> Self {
        Self {
            inputs,
            outputs,
            command,
            signers: signers.into_iter().collect(),
        }
    }

    /// Fold an asset spend into this proposal.
    pub fn with_spend(mut self, spend: SpendFragment) -> Self {
        self.inputs.extend(spend.inputs);
        self.outputs.extend(spend.outputs);
        self.signers.extend(spend.signers);
        self
    }

    /// Obligation inputs, in order.
    pub fn obligation_inputs(&self) -> impl Iterator<Item = (&StateRef, &ObligationState)> {
        self.inputs
            .iter()
            .filter_map(|input| input.state.as_obligation().map(|s| (&input.state_ref, s)))
    }

    /// Obligation outputs, in order.
    pub fn obligation_outputs(&self) -> impl Iterator<Item = &ObligationState> {
        self.outputs.iter().filter_map(LedgerState::as_obligation)
    }

    /// Every party that can see a state touched by this proposal.
    pub fn participants(&self) -> BTreeSet<PartyId> {
        self.inputs
            .iter()
            .map(|input| &input.state)
            .chain(self.outputs.iter())
            .flat_map(LedgerState::participants)
            .collect()
    }

    /// Content hash of the canonical JSON encoding.
    pub fn compute_id(&self) -> Result<TransactionId> {
        let bytes = serde_json::to_vec(self).map_err(|e| {
            IouError::InternalError(format!("Failed to encode proposal: {}", e))
        })?;
        Ok(TransactionId::from_bytes(sha256(&bytes)))
    }
}

/// Inputs, outputs and signers contributed by the asset sub-ledger to pay someone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendFragment {
    pub inputs: Vec<StateAndRef>,
    pub outputs: Vec<LedgerState>,
    pub signers: BTreeSet<PartyId>,
}

/// One party's signature over a transaction id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartySignature {
    pub party: PartyId,
    pub signature: Signature,
}

/// A proposal plus the signatures collected so far.
///
/// The id covers the proposal only, so adding signatures never changes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    id: TransactionId,
    proposal: TransitionProposal,
    signatures: Vec<PartySignature>,
}

impl SignedTransaction {
    /// Wrap an unsigned proposal.
    pub fn new(proposal: TransitionProposal) -> Result<Self> {
        let id = proposal.compute_id()?;
        Ok(Self {
            id,
            proposal,
            signatures: Vec::new(),
        })
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn proposal(&self) -> &TransitionProposal {
        &self.proposal
    }

    pub fn signatures(&self) -> &[PartySignature] {
        &self.signatures
    }

    /// Produce `party`'s signature without attaching it.
    pub fn signature_by(&self, party: &PartyId, key: &SigningKey) -> PartySignature {
        PartySignature {
            party: party.clone(),
            signature: key.sign(self.id.as_bytes()),
        }
    }

    /// Sign as `party` and attach the signature.
    pub fn sign(mut self, party: &PartyId, key: &SigningKey) -> Self {
        let signature = self.signature_by(party, key);
        self.add_signature(signature);
        self
    }

    /// Attach a signature, replacing any earlier one from the same party.
    pub fn add_signature(&mut self, signature: PartySignature) {
        self.signatures.retain(|s| s.party != signature.party);
        self.signatures.push(signature);
    }

    /// Copy of this transaction with `signature` attached.
    pub fn with_signature(mut self, signature: PartySignature) -> Self {
        self.add_signature(signature);
        self
    }

    /// Parties that have signed.
    pub fn signed_by(&self) -> BTreeSet<PartyId> {
        self.signatures.iter().map(|s| s.party.clone()).collect()
    }

    /// Required signers that have not signed yet.
    pub fn missing_signers(&self) -> BTreeSet<PartyId> {
        let signed = self.signed_by();
        self.proposal
            .signers
            .iter()
            .filter(|party| !signed.contains(*party))
            .cloned()
            .collect()
    }

    pub fn is_fully_signed(&self) -> bool {
        self.missing_signers().is_empty()
    }

    /// Check that the id matches the proposal it claims to cover.
    pub fn verify_id(&self) -> Result<()> {
        let expected = self.proposal.compute_id()?;
        if expected != self.id {
            return Err(IouError::InvalidSignature(format!(
                "Transaction id {} does not match its contents",
                self.id.short()
            )));
        }
        Ok(())
    }

    /// Check every attached signature against the key `key_of` returns for its party.
    pub fn verify_signatures<F>(&self, key_of: F) -> Result<()>
    where
        F: Fn(&PartyId) -> Option<VerifyingKey>,
    {
        for sig in &self.signatures {
            let key = key_of(&sig.party).ok_or_else(|| IouError::UnknownParty(sig.party.clone()))?;
            key.verify(self.id.as_bytes(), &sig.signature).map_err(|_| {
                IouError::InvalidSignature(format!(
                    "Signature by {} on {} does not verify",
                    sig.party,
                    self.id.short()
                ))
            })?;
        }
        Ok(())
    }

    /// Check the id, every signature, and that no required signer is missing.
    pub fn verify_required_signatures<F>(&self, key_of: F) -> Result<()>
    where
        F: Fn(&PartyId) -> Option<VerifyingKey>,
    {
        self.verify_id()?;
        self.verify_signatures(key_of)?;
        let missing = self.missing_signers();
        if !missing.is_empty() {
            return Err(IouError::InvalidSignature(format!(
                "Transaction {} is missing signatures from {:?}",
                self.id.short(),
                missing
            )));
        }
        Ok(())
    }

    /// The output at `index` with its reference.
    pub fn out_ref(&self, index: u32) -> Option<StateAndRef> {
        self.proposal
            .outputs
            .get(index as usize)
            .map(|state| StateAndRef::new(state.clone(), StateRef::new(self.id, index)))
    }

    /// Every output with its reference.
    pub fn out_refs(&self) -> impl Iterator<Item = StateAndRef> + '_ {
        self.proposal
            .outputs
            .iter()
            .enumerate()
            .map(move |(i, state)| StateAndRef::new(state.clone(), StateRef::new(self.id, i as u32)))
    }

    /// References consumed by this transaction.
    pub fn input_refs(&self) -> impl Iterator<Item = StateRef> + '_ {
        self.proposal.inputs.iter().map(|input| input.state_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_proposal() -> TransitionProposal {
        let iou = ObligationState::issue(10, PartyId::new("ALICE"), PartyId::new("BOB"));
        let signers = iou.participants();
        TransitionProposal::new(vec![], vec![iou.into()], Command::Create, signers)
    }

    #[test]
    fn test_id_is_stable_across_signing() {
        let alice = SigningKey::generate().unwrap();
        let stx = SignedTransaction::new(create_proposal()).unwrap();
        let id = stx.id();

        let stx = stx.sign(&PartyId::new("ALICE"), &alice);
        assert_eq!(stx.id(), id);
        assert!(stx.verify_id().is_ok());
    }

    #[test]
    fn test_missing_signers() {
        let alice = SigningKey::generate().unwrap();
        let bob = SigningKey::generate().unwrap();
        let stx = SignedTransaction::new(create_proposal())
            .unwrap()
            .sign(&PartyId::new("ALICE"), &alice);

        assert_eq!(
            stx.missing_signers().into_iter().collect::<Vec<_>>(),
            vec![PartyId::new("BOB")]
        );

        let stx = stx.sign(&PartyId::new("BOB"), &bob);
        assert!(stx.is_fully_signed());

        let alice_key = alice.verifying_key();
        let bob_key = bob.verifying_key();
        let result = stx.verify_required_signatures(|party| match party.as_str() {
            "ALICE" => Some(alice_key.clone()),
            "BOB" => Some(bob_key.clone()),
            _ => None,
        });
        assert!(result.is_ok());
    }

    #[test]
    fn test_signature_under_wrong_key_rejected() {
        let alice = SigningKey::generate().unwrap();
        let mallory = SigningKey::generate().unwrap();
        let stx = SignedTransaction::new(create_proposal())
            .unwrap()
            .sign(&PartyId::new("ALICE"), &mallory);

        let alice_key = alice.verifying_key();
        let result = stx.verify_signatures(|_| Some(alice_key.clone()));
        assert!(matches!(result, Err(IouError::InvalidSignature(_))));
    }

    #[test]
    fn test_tampered_proposal_detected() {
        let stx = SignedTransaction::new(create_proposal()).unwrap();
        let mut json = serde_json::to_value(&stx).unwrap();
        json["proposal"]["outputs"][0]["value"] = serde_json::json!(1000);

        let tampered: SignedTransaction = serde_json::from_value(json).unwrap();
        assert!(tampered.verify_id().is_err());
    }

    #[test]
    fn test_resigning_replaces_signature() {
        let alice = SigningKey::generate().unwrap();
        let stx = SignedTransaction::new(create_proposal())
            .unwrap()
            .sign(&PartyId::new("ALICE"), &alice)
            .sign(&PartyId::new("ALICE"), &alice);
        assert_eq!(stx.signatures().len(), 1);
    }

    #[test]
    fn test_out_refs_point_at_transaction() {
        let stx = SignedTransaction::new(create_proposal()).unwrap();
        let out = stx.out_ref(0).unwrap();
        assert_eq!(out.state_ref, StateRef::new(stx.id(), 0));
        assert!(stx.out_ref(1).is_none());
    }
}
