//! Paying off an obligation, in full or in part.

use tracing::{info, instrument};

use iou_common::{Amount, FlowKind, IouError, ObligationId, Result, SessionId, TransactionId};
use iou_ledger::{Command, LedgerState, TransitionProposal};
use iou_protocol::finality_participants;

use super::FlowContext;
use crate::session::FlowSession;

/// Pay `amount` base units of obligation `id` to its recipient.
///
/// Only the sender may run this. A payment covering the outstanding balance
/// consumes the obligation; anything less produces the next version with a higher
/// `paid`.
#[instrument(skip(ctx), fields(party = %ctx.party()))]
pub async fn run(ctx: &FlowContext, id: ObligationId, amount: i64) -> Result<TransactionId> {
    let mut session = FlowSession::start(ctx.sessions.clone(), SessionId::new(), FlowKind::Settle);
    let result = settle(ctx, &mut session, id, amount).await;
    session.finish(result)
}

async fn settle(
    ctx: &FlowContext,
    session: &mut FlowSession,
    id: ObligationId,
    amount: i64,
) -> Result<TransactionId> {
    let input = ctx.states.find_unconsumed(id).await?;
    let iou = input.obligation()?.clone();

    if iou.sender() != ctx.party() {
        return Err(IouError::PermissionDenied(format!(
            "Only the sender {} can settle obligation {}",
            iou.sender(),
            id
        )));
    }

    if amount <= 0 {
        return Err(IouError::InvalidAmount(format!(
            "Settlement amount must be positive, got {}",
            amount
        )));
    }
    let remaining = iou
        .outstanding()
        .checked_sub(amount)
        .filter(|remaining| *remaining >= 0)
        .ok_or_else(|| {
            IouError::InvalidAmount(format!(
                "Settlement amount {} exceeds the outstanding {}",
                amount,
                iou.outstanding()
            ))
        })?;

    let assets = ctx.assets.as_ref().ok_or_else(|| {
        IouError::ConfigurationError("No asset ledger configured for settlement".to_string())
    })?;
    let payment = Amount::from_base_units(amount, ctx.config.settlement_currency.clone());
    let spend = assets.build_spend(payment, iou.recipient()).await?;

    info!(
        obligation = %id,
        amount,
        remaining,
        recipient = %iou.recipient(),
        "Settling obligation"
    );

    let outputs: Vec<LedgerState> = if remaining > 0 {
        vec![iou.pay(amount).into()]
    } else {
        Vec::new()
    };
    let proposal = TransitionProposal::new(
        vec![input],
        outputs,
        Command::Settle { amount },
        iou.participants(),
    )
    .with_spend(spend);

    let transaction = ctx.verify_and_sign(session, proposal)?;
    let transaction = ctx
        .collect_signatures(session, &[iou.recipient().clone()], transaction)
        .await?;

    let participants = finality_participants(&transaction, [iou.sender().clone(), iou.recipient().clone()]);
    ctx.finalize(session, transaction, participants).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use iou_common::FlowStatus;
    use iou_protocol::StateLookup;

    use crate::flows::create::{self, CreateRole};
    use crate::flows::testing::TestNetwork;

    #[tokio::test]
    async fn test_partial_then_full_settlement() {
        let network = TestNetwork::new();
        let alice = network.node("ALICE");
        let bob = network.node("BOB");

        create::run(&alice.ctx, 10, bob.party.clone(), CreateRole::Sender).await.unwrap();
        let id = alice.vault.obligations()[0].obligation().unwrap().id();

        let tx = run(&alice.ctx, id, 5).await.unwrap();
        let iou = bob.vault.obligation(id).unwrap();
        assert_eq!(iou.paid(), 5);
        assert_eq!(iou.value(), 10);
        assert_eq!(bob.vault.find_unconsumed(id).await.unwrap().state_ref.txid, tx);
        assert_eq!(bob.vault.cash().len(), 1);

        run(&alice.ctx, id, 5).await.unwrap();
        assert!(alice.vault.obligation(id).is_none());
        assert!(bob.vault.obligation(id).is_none());
        assert_eq!(bob.vault.cash().len(), 2);

        // a fully settled obligation cannot be settled again
        let again = run(&alice.ctx, id, 1).await;
        assert!(matches!(again, Err(IouError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_overpayment_rejected_locally() {
        let network = TestNetwork::new();
        let alice = network.node("ALICE");
        let bob = network.node("BOB");

        create::run(&alice.ctx, 10, bob.party.clone(), CreateRole::Sender).await.unwrap();
        let id = alice.vault.obligations()[0].obligation().unwrap().id();

        assert!(matches!(run(&alice.ctx, id, 11).await, Err(IouError::InvalidAmount(_))));
        assert!(matches!(run(&alice.ctx, id, 0).await, Err(IouError::InvalidAmount(_))));
        assert!(matches!(run(&alice.ctx, id, -3).await, Err(IouError::InvalidAmount(_))));
        assert!(matches!(run(&alice.ctx, id, i64::MIN).await, Err(IouError::InvalidAmount(_))));
        assert!(matches!(run(&alice.ctx, id, i64::MAX).await, Err(IouError::InvalidAmount(_))));
        assert_eq!(alice.vault.obligation(id).unwrap().paid(), 0);
    }

    #[tokio::test]
    async fn test_only_sender_may_settle() {
        let network = TestNetwork::new();
        let alice = network.node("ALICE");
        let bob = network.node("BOB");

        create::run(&alice.ctx, 10, bob.party.clone(), CreateRole::Sender).await.unwrap();
        let id = bob.vault.obligations()[0].obligation().unwrap().id();

        assert!(matches!(run(&bob.ctx, id, 5).await, Err(IouError::PermissionDenied(_))));
        assert_eq!(bob.ctx.sessions.count(FlowStatus::Failed), 1);
    }

    #[tokio::test]
    async fn test_unknown_obligation() {
        let network = TestNetwork::new();
        let alice = network.node("ALICE");
        assert!(matches!(
            run(&alice.ctx, ObligationId::new(), 5).await,
            Err(IouError::NotFound(_))
        ));
    }
}
