//! Countersigning a peer's proposal.

use tracing::{info, instrument};

use iou_common::{FlowKind, FlowStatus, IouError, PartyId, Result, SessionId, TransactionId};
use iou_ledger::{Command, PartySignature, SignedTransaction};
use iou_protocol::verify_transaction_signatures;

use super::FlowContext;
use crate::session::FlowSession;

/// Check a proposed transaction and return this node's signature over it.
///
/// Any error becomes a refusal sent back to `initiator`.
#[instrument(skip(ctx, transaction), fields(party = %ctx.party(), tx = %transaction.id().short()))]
pub async fn respond(
    ctx: &FlowContext,
    session_id: SessionId,
    initiator: &PartyId,
    flow: FlowKind,
    transaction: SignedTransaction,
) -> Result<PartySignature> {
    let mut session = FlowSession::start(ctx.sessions.clone(), session_id, flow);
    session.set_transaction(transaction.id());
    let result = check_proposal(ctx, &mut session, initiator, flow, &transaction).await;
    let signature = session.finish(result.map(|_| transaction.signature_by(ctx.party(), &ctx.signing_key)))?;

    info!(initiator = %initiator, flow = %flow, "Signed proposal");
    Ok(signature)
}

async fn check_proposal(
    ctx: &FlowContext,
    session: &mut FlowSession,
    initiator: &PartyId,
    flow: FlowKind,
    transaction: &SignedTransaction,
) -> Result<()> {
    session.advance(FlowStatus::Verifying)?;
    transaction.verify_id()?;
    let proposal = transaction.proposal();

    if !proposal.signers.contains(ctx.party()) {
        return Err(IouError::PermissionDenied(format!(
            "{} is not a required signer of {}",
            ctx.party(),
            transaction.id().short()
        )));
    }

    let expected = match proposal.command {
        Command::Create => FlowKind::Create,
        Command::Transfer => FlowKind::Transfer,
        Command::Settle { .. } => FlowKind::Settle,
    };
    if expected != flow {
        return Err(IouError::PermissionDenied(format!(
            "A {} flow cannot carry a {} command",
            flow,
            proposal.command.name()
        )));
    }

    let mut missing: Vec<TransactionId> = Vec::new();
    for (state_ref, _) in proposal.obligation_inputs() {
        if ctx.storage.transaction(&state_ref.txid).await.is_none() && !missing.contains(&state_ref.txid) {
            missing.push(state_ref.txid);
        }
    }
    if !missing.is_empty() {
        session.advance(FlowStatus::AwaitingDependencyResolution)?;
        ctx.resolver.resolve(&missing, initiator).await?;
        session.advance(FlowStatus::Verifying)?;
    }

    for (state_ref, claimed) in proposal.obligation_inputs() {
        let source = ctx.storage.transaction(&state_ref.txid).await.ok_or_else(|| {
            IouError::UnresolvableDependency(format!("Transaction {} is unknown", state_ref.txid.short()))
        })?;
        let actual = source.out_ref(state_ref.index);
        let matches = actual
            .as_ref()
            .and_then(|actual| actual.state.as_obligation())
            .map(|actual| actual == claimed)
            .unwrap_or(false);
        if !matches {
            return Err(IouError::UnresolvableDependency(format!(
                "Input {} does not match its history",
                state_ref
            )));
        }
    }

    iou_ledger::verify(proposal)?;

    verify_transaction_signatures(ctx.identity.as_ref(), transaction, false).await?;
    if !transaction.signed_by().contains(initiator) {
        return Err(IouError::InvalidSignature(format!(
            "Proposal {} is not signed by its initiator {}",
            transaction.id().short(),
            initiator
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use iou_ledger::{ObligationState, TransitionProposal};

    use crate::flows::testing::TestNetwork;

    fn create_proposal(sender: &PartyId, recipient: &PartyId, value: i64) -> TransitionProposal {
        let iou = ObligationState::issue(value, sender.clone(), recipient.clone());
        let signers = iou.participants();
        TransitionProposal::new(vec![], vec![iou.into()], Command::Create, signers)
    }

    #[tokio::test]
    async fn test_signs_valid_proposal() {
        let network = TestNetwork::new();
        let alice = network.node("ALICE");
        let bob = network.node("BOB");

        let stx = SignedTransaction::new(create_proposal(&alice.party, &bob.party, 10))
            .unwrap()
            .sign(&alice.party, &alice.ctx.signing_key);

        let sig = respond(&bob.ctx, SessionId::new(), &alice.party, FlowKind::Create, stx.clone())
            .await
            .unwrap();
        assert_eq!(sig.party, bob.party);
        assert!(bob.ctx.signing_key.verifying_key().verify(stx.id().as_bytes(), &sig.signature).is_ok());
        assert_eq!(bob.ctx.sessions.count(FlowStatus::Done), 1);
    }

    #[tokio::test]
    async fn test_refuses_contract_violation() {
        let network = TestNetwork::new();
        let alice = network.node("ALICE");
        let bob = network.node("BOB");

        let stx = SignedTransaction::new(create_proposal(&alice.party, &bob.party, 0))
            .unwrap()
            .sign(&alice.party, &alice.ctx.signing_key);

        let result = respond(&bob.ctx, SessionId::new(), &alice.party, FlowKind::Create, stx).await;
        assert!(matches!(result, Err(IouError::Validation(_))));
        assert_eq!(bob.ctx.sessions.count(FlowStatus::Failed), 1);
    }

    #[tokio::test]
    async fn test_refuses_when_not_a_signer() {
        let network = TestNetwork::new();
        let alice = network.node("ALICE");
        let bob = network.node("BOB");
        let charlie = network.node("CHARLIE");

        let stx = SignedTransaction::new(create_proposal(&alice.party, &bob.party, 10))
            .unwrap()
            .sign(&alice.party, &alice.ctx.signing_key);

        let result = respond(&charlie.ctx, SessionId::new(), &alice.party, FlowKind::Create, stx).await;
        assert!(matches!(result, Err(IouError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_refuses_unsigned_proposal() {
        let network = TestNetwork::new();
        let alice = network.node("ALICE");
        let bob = network.node("BOB");

        let stx = SignedTransaction::new(create_proposal(&alice.party, &bob.party, 10)).unwrap();
        let result = respond(&bob.ctx, SessionId::new(), &alice.party, FlowKind::Create, stx).await;
        assert!(matches!(result, Err(IouError::InvalidSignature(_))));
    }

    #[tokio::test]
    async fn test_refuses_mismatched_flow() {
        let network = TestNetwork::new();
        let alice = network.node("ALICE");
        let bob = network.node("BOB");

        let stx = SignedTransaction::new(create_proposal(&alice.party, &bob.party, 10))
            .unwrap()
            .sign(&alice.party, &alice.ctx.signing_key);
        let result = respond(&bob.ctx, SessionId::new(), &alice.party, FlowKind::Settle, stx).await;
        assert!(matches!(result, Err(IouError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_refuses_input_without_history() {
        let network = TestNetwork::new();
        let alice = network.node("ALICE");
        let bob = network.node("BOB");
        let charlie = network.node("CHARLIE");

        // BOB proposes a transfer of an IOU that was never created
        let iou = ObligationState::issue(10, alice.party.clone(), bob.party.clone());
        let input = iou_ledger::StateAndRef::new(
            iou.clone(),
            iou_common::StateRef::new(TransactionId::from_bytes([4; 32]), 0),
        );
        let proposal = TransitionProposal::new(
            vec![input],
            vec![iou.with_recipient(charlie.party.clone()).into()],
            Command::Transfer,
            [alice.party.clone(), bob.party.clone(), charlie.party.clone()],
        );
        let stx = SignedTransaction::new(proposal)
            .unwrap()
            .sign(&bob.party, &bob.ctx.signing_key);

        let result = respond(&charlie.ctx, SessionId::new(), &bob.party, FlowKind::Transfer, stx).await;
        assert!(matches!(result, Err(IouError::UnresolvableDependency(_))));
    }
}
