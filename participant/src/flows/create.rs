//! Originating a new obligation.

use tracing::{info, instrument};

use iou_common::{FlowKind, PartyId, Result, SessionId, TransactionId};
use iou_ledger::{Command, ObligationState, TransitionProposal};

use super::FlowContext;
use crate::session::FlowSession;

/// Which side of the new obligation the initiating node takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateRole {
    /// The initiator owes the counterparty.
    Sender,
    /// The counterparty owes the initiator.
    Recipient,
}

/// Build, countersign and finalize an obligation of `value` with `counterparty`.
#[instrument(skip(ctx), fields(party = %ctx.party()))]
pub async fn run(
    ctx: &FlowContext,
    value: i64,
    counterparty: PartyId,
    role: CreateRole,
) -> Result<TransactionId> {
    let mut session = FlowSession::start(ctx.sessions.clone(), SessionId::new(), FlowKind::Create);
    let result = create(ctx, &mut session, value, counterparty, role).await;
    session.finish(result)
}

async fn create(
    ctx: &FlowContext,
    session: &mut FlowSession,
    value: i64,
    counterparty: PartyId,
    role: CreateRole,
) -> Result<TransactionId> {
    let me = ctx.party().clone();
    let iou = match role {
        CreateRole::Sender => ObligationState::issue(value, me, counterparty.clone()),
        CreateRole::Recipient => ObligationState::issue(value, counterparty.clone(), me),
    };
    info!(
        obligation = %iou.id(),
        value,
        sender = %iou.sender(),
        recipient = %iou.recipient(),
        "Creating obligation"
    );

    let participants = iou.participants();
    let proposal = TransitionProposal::new(vec![], vec![iou.into()], Command::Create, participants.clone());

    let transaction = ctx.verify_and_sign(session, proposal)?;
    let transaction = ctx.collect_signatures(session, &[counterparty], transaction).await?;
    ctx.finalize(session, transaction, participants).await
}
