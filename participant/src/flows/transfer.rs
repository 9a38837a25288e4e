//! Reassigning an obligation to a new recipient.

use tracing::{info, instrument};

use iou_common::{FlowKind, IouError, PartyId, Result, SessionId, StateRef, TransactionId};
use iou_ledger::{Command, TransitionProposal};

use super::FlowContext;
use crate::session::FlowSession;

/// Move the obligation at `state_ref` to `new_recipient`.
///
/// Only the current recipient may run this. The sender countersigns first, then
/// the new recipient.
#[instrument(skip(ctx), fields(party = %ctx.party()))]
pub async fn run(
    ctx: &FlowContext,
    state_ref: StateRef,
    new_recipient: PartyId,
) -> Result<TransactionId> {
    let mut session = FlowSession::start(ctx.sessions.clone(), SessionId::new(), FlowKind::Transfer);
    let result = transfer(ctx, &mut session, state_ref, new_recipient).await;
    session.finish(result)
}

async fn transfer(
    ctx: &FlowContext,
    session: &mut FlowSession,
    state_ref: StateRef,
    new_recipient: PartyId,
) -> Result<TransactionId> {
    let input = ctx.states.find_by_ref(state_ref).await?;
    let iou = input.obligation()?.clone();

    if iou.recipient() != ctx.party() {
        return Err(IouError::PermissionDenied(format!(
            "Only the recipient {} can transfer obligation {}",
            iou.recipient(),
            iou.id()
        )));
    }

    info!(
        obligation = %iou.id(),
        from = %iou.recipient(),
        to = %new_recipient,
        "Transferring obligation"
    );

    let output = iou.with_recipient(new_recipient.clone());
    let mut signers = iou.participants();
    signers.extend(output.participants());
    let proposal = TransitionProposal::new(vec![input], vec![output.into()], Command::Transfer, signers);

    let transaction = ctx.verify_and_sign(session, proposal)?;
    let order = [iou.sender().clone(), new_recipient.clone()];
    let transaction = ctx.collect_signatures(session, &order, transaction).await?;

    let participants = [iou.sender().clone(), iou.recipient().clone(), new_recipient]
        .into_iter()
        .collect();
    ctx.finalize(session, transaction, participants).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use iou_common::{ContractViolation, FlowStatus};
    use iou_protocol::{StateLookup, TransactionStorage};

    use crate::flows::create::{self, CreateRole};
    use crate::flows::testing::TestNetwork;

    #[tokio::test]
    async fn test_recipient_transfers() {
        let network = TestNetwork::new();
        let alice = network.node("ALICE");
        let bob = network.node("BOB");
        let charlie = network.node("CHARLIE");

        create::run(&alice.ctx, 10, bob.party.clone(), CreateRole::Sender).await.unwrap();
        let before = bob.vault.obligations()[0].clone();
        let id = before.obligation().unwrap().id();

        let tx = run(&bob.ctx, before.state_ref, charlie.party.clone()).await.unwrap();

        let after = charlie.vault.find_unconsumed(id).await.unwrap();
        assert_eq!(after.state_ref, StateRef::new(tx, 0));
        let iou = after.obligation().unwrap();
        assert_eq!(iou.recipient(), &charlie.party);
        assert_eq!(iou.sender(), &alice.party);
        assert_eq!(iou.value(), 10);

        // the old recipient no longer holds it, the sender sees the new version
        assert!(bob.vault.obligations().is_empty());
        assert_eq!(alice.vault.find_unconsumed(id).await.unwrap().state_ref, after.state_ref);
        // CHARLIE resolved the creation as history
        assert!(charlie.vault.transaction(&before.state_ref.txid).await.is_some());
    }

    #[tokio::test]
    async fn test_only_recipient_may_transfer() {
        let network = TestNetwork::new();
        let alice = network.node("ALICE");
        let bob = network.node("BOB");
        let charlie = network.node("CHARLIE");

        create::run(&alice.ctx, 10, bob.party.clone(), CreateRole::Sender).await.unwrap();
        let state = alice.vault.obligations()[0].clone();

        let result = run(&alice.ctx, state.state_ref, charlie.party.clone()).await;
        assert!(matches!(result, Err(IouError::PermissionDenied(_))));
        assert_eq!(alice.ctx.sessions.count(FlowStatus::Failed), 1);
    }

    #[tokio::test]
    async fn test_transfer_to_self_rejected() {
        let network = TestNetwork::new();
        let alice = network.node("ALICE");
        let bob = network.node("BOB");

        create::run(&alice.ctx, 10, bob.party.clone(), CreateRole::Sender).await.unwrap();
        let state = bob.vault.obligations()[0].clone();

        let result = run(&bob.ctx, state.state_ref, bob.party.clone()).await;
        assert!(matches!(
            result,
            Err(IouError::Validation(ContractViolation::RecipientUnchanged))
        ));
    }

    #[tokio::test]
    async fn test_stale_reference_not_found() {
        let network = TestNetwork::new();
        let alice = network.node("ALICE");
        let bob = network.node("BOB");
        let charlie = network.node("CHARLIE");

        create::run(&alice.ctx, 10, bob.party.clone(), CreateRole::Sender).await.unwrap();
        let state = bob.vault.obligations()[0].clone();
        run(&bob.ctx, state.state_ref, charlie.party.clone()).await.unwrap();

        let result = run(&bob.ctx, state.state_ref, charlie.party.clone()).await;
        assert!(matches!(result, Err(IouError::NotFound(_))));
    }
}
