//! The obligation contract.
//!
//! [`verify`] is a pure function of the proposal. It never consults storage and
//! reports the first rule that fails, in the order the rules are listed in each
//! `verify_*` function.

use std::collections::{BTreeMap, BTreeSet};

use iou_common::{Amount, ContractViolation, ObligationId, PartyId};

use crate::state::{CashState, LedgerState, ObligationState};
use crate::transaction::{Command, TransitionProposal};

type Verdict = Result<(), ContractViolation>;

/// Decide whether `proposal` is a legal transition.
pub fn verify(proposal: &TransitionProposal) -> Verdict {
    match proposal.command {
        Command::Create => verify_create(proposal),
        Command::Transfer => verify_transfer(proposal),
        Command::Settle { amount } => verify_settle(proposal, amount),
    }
}

fn verify_create(tx: &TransitionProposal) -> Verdict {
    require(tx.inputs.is_empty(), ContractViolation::InputsOnCreate)?;
    require(tx.outputs.len() == 1, ContractViolation::CreateOutputCount)?;
    let out = obligation(&tx.outputs[0])?;
    require(out.value() > 0, ContractViolation::NonPositiveValue)?;
    require(out.paid() == 0, ContractViolation::CreatePaidNonZero)?;
    require(out.sender() != out.recipient(), ContractViolation::SelfObligation)?;
    require_signers(&tx.signers, out.participants())
}

fn verify_transfer(tx: &TransitionProposal) -> Verdict {
    require(tx.inputs.len() == 1, ContractViolation::TransferInputCount)?;
    require(tx.outputs.len() == 1, ContractViolation::TransferOutputCount)?;
    let input = obligation(&tx.inputs[0].state)?;
    let out = obligation(&tx.outputs[0])?;
    require(out.value() > 0, ContractViolation::NonPositiveValue)?;
    require(input.value() == out.value(), ContractViolation::ValueChanged)?;
    require(
        input.id() == out.id() && input.paid() == out.paid(),
        ContractViolation::TransferIdentityChanged,
    )?;
    require(input.sender() == out.sender(), ContractViolation::SenderChanged)?;
    require(
        input.recipient() != out.recipient(),
        ContractViolation::RecipientUnchanged,
    )?;
    require(out.sender() != out.recipient(), ContractViolation::SelfObligation)?;

    let mut required = input.participants();
    required.extend(out.participants());
    require_signers(&tx.signers, required)
}

/// Inputs and outputs of one obligation id.
#[derive(Default)]
struct Group<'a> {
    inputs: Vec<&'a ObligationState>,
    outputs: Vec<&'a ObligationState>,
}

fn verify_settle(tx: &TransitionProposal, command_amount: i64) -> Verdict {
    let mut groups: BTreeMap<ObligationId, Group<'_>> = BTreeMap::new();
    for (_, state) in tx.obligation_inputs() {
        groups.entry(state.id()).or_default().inputs.push(state);
    }
    for state in tx.obligation_outputs() {
        groups.entry(state.id()).or_default().outputs.push(state);
    }
    require(
        groups.len() == 1,
        ContractViolation::ObligationGroupCount {
            groups: groups.len(),
        },
    )?;
    let Some(group) = groups.into_values().next() else {
        return Err(ContractViolation::ObligationGroupCount { groups: 0 });
    };

    require(group.inputs.len() == 1, ContractViolation::SettleInputCount)?;
    let input = group.inputs[0];
    require(
        (0..=input.value()).contains(&input.paid()),
        ContractViolation::PaidOutOfRange {
            value: input.value(),
            paid: input.paid(),
        },
    )?;

    let cash: Vec<&CashState> = tx.outputs.iter().filter_map(LedgerState::as_cash).collect();
    require(!cash.is_empty(), ContractViolation::NoCashOutput)?;

    let paid_to_recipient: Vec<&CashState> = cash
        .into_iter()
        .filter(|c| &c.owner == input.recipient())
        .collect();
    require(
        !paid_to_recipient.is_empty(),
        ContractViolation::NoCashToRecipient,
    )?;

    let settled = settled_base_units(&paid_to_recipient)?;
    let outstanding = input.outstanding();
    require(
        outstanding >= settled,
        ContractViolation::Overpayment {
            outstanding,
            settled,
        },
    )?;
    require(
        command_amount > 0 && command_amount == settled,
        ContractViolation::SettleAmountMismatch {
            command: command_amount,
            settled,
        },
    )?;

    if outstanding == settled {
        require(
            group.outputs.is_empty(),
            ContractViolation::OutputAfterFullSettlement,
        )?;
    } else {
        require(
            group.outputs.len() == 1,
            ContractViolation::PartialSettlementOutputCount,
        )?;
        let out = group.outputs[0];
        let only_paid_changed = ObligationState::from_parts(
            input.id(),
            input.value(),
            input.sender().clone(),
            input.recipient().clone(),
            out.paid(),
        ) == *out;
        require(only_paid_changed, ContractViolation::NonPaidFieldChanged)?;
        let expected = input.paid().saturating_add(settled);
        require(
            out.paid() == expected,
            ContractViolation::PaidAmountMismatch {
                expected,
                actual: out.paid(),
            },
        )?;
    }

    require_signers(&tx.signers, input.participants())
}

/// Sum of the cash in base units, issuer ignored. All cash must share a currency.
fn settled_base_units(cash: &[&CashState]) -> Result<i64, ContractViolation> {
    let currency = cash[0].amount.currency.clone();
    let total = Amount::sum(cash.iter().map(|c| &c.amount), currency).map_err(|e| {
        ContractViolation::CashCurrencyMismatch {
            expected: e.expected.to_string(),
            actual: e.actual.to_string(),
        }
    })?;
    Ok(total.to_base_units())
}

fn obligation(state: &LedgerState) -> Result<&ObligationState, ContractViolation> {
    state
        .as_obligation()
        .ok_or(ContractViolation::NotAnObligation)
}

fn require(condition: bool, violation: ContractViolation) -> Verdict {
    if condition {
        Ok(())
    } else {
        Err(violation)
    }
}

fn require_signers(signers: &BTreeSet<PartyId>, required: BTreeSet<PartyId>) -> Verdict {
    let missing: Vec<PartyId> = required.difference(signers).cloned().collect();
    require(
        missing.is_empty(),
        ContractViolation::MissingSigners { missing },
    )
}
