//! Contract rule violations.
//!
//! Each variant names one rule of the obligation contract. The validator reports
//! the first rule that fails, so a violation is a complete verdict on its own.

use crate::PartyId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A named contract rule that a transition proposal failed.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractViolation {
    // Create
    #[error("No inputs should be consumed when issuing an IOU.")]
    InputsOnCreate,

    #[error("Only one output state should be created when issuing an IOU.")]
    CreateOutputCount,

    #[error("A newly issued IOU must have a positive amount.")]
    NonPositiveValue,

    #[error("A newly issued IOU must have nothing paid.")]
    CreatePaidNonZero,

    #[error("The lender and borrower cannot have the same identity.")]
    SelfObligation,

    // Transfer
    #[error("An IOU transfer transaction should only consume one input state.")]
    TransferInputCount,

    #[error("An IOU transfer transaction should only create one output state.")]
    TransferOutputCount,

    #[error("The IOU value may not change when transferring an IOU.")]
    ValueChanged,

    #[error("The IOU id and paid amount may not change when transferring an IOU.")]
    TransferIdentityChanged,

    #[error("The borrower may not change when transferring an IOU.")]
    SenderChanged,

    #[error("The lender property must change in a transfer.")]
    RecipientUnchanged,

    // Settle
    #[error("Exactly one IOU may be settled per transaction, found {groups}.")]
    ObligationGroupCount { groups: usize },

    #[error("There must be one input IOU.")]
    SettleInputCount,

    #[error("The paid amount {paid} must lie between zero and the value {value}.")]
    PaidOutOfRange { value: i64, paid: i64 },

    #[error("There must be output cash.")]
    NoCashOutput,

    #[error("There must be output cash paid to the recipient.")]
    NoCashToRecipient,

    #[error("Cash paid to the recipient must be in {expected}, found {actual}.")]
    CashCurrencyMismatch { expected: String, actual: String },

    #[error("The amount settled cannot be more than the amount outstanding (outstanding {outstanding}, settled {settled}).")]
    Overpayment { outstanding: i64, settled: i64 },

    #[error("The settle command amount {command} must be positive and match the cash paid ({settled}).")]
    SettleAmountMismatch { command: i64, settled: i64 },

    #[error("There must be no output IOU as it has been fully settled.")]
    OutputAfterFullSettlement,

    #[error("There must be one output IOU.")]
    PartialSettlementOutputCount,

    #[error("The only property which may change is 'paid'.")]
    NonPaidFieldChanged,

    #[error("The paid amount must increase by the amount settled (expected {expected}, found {actual}).")]
    PaidAmountMismatch { expected: i64, actual: i64 },

    // Shared
    #[error("All of the participants must be signers (missing: {missing:?}).")]
    MissingSigners { missing: Vec<PartyId> },

    #[error("The state is not an IOU.")]
    NotAnObligation,
}

impl ContractViolation {
    /// Stable rule code, suitable for logs and refusal messages.
    pub fn rule(&self) -> &'static str {
        match self {
            ContractViolation::InputsOnCreate => "CREATE_NO_INPUTS",
            ContractViolation::CreateOutputCount => "CREATE_ONE_OUTPUT",
            ContractViolation::NonPositiveValue => "POSITIVE_VALUE",
            ContractViolation::CreatePaidNonZero => "CREATE_NOTHING_PAID",
            ContractViolation::SelfObligation => "DISTINCT_PARTIES",
            ContractViolation::TransferInputCount => "TRANSFER_ONE_INPUT",
            ContractViolation::TransferOutputCount => "TRANSFER_ONE_OUTPUT",
            ContractViolation::ValueChanged => "TRANSFER_VALUE_UNCHANGED",
            ContractViolation::TransferIdentityChanged => "TRANSFER_ID_AND_PAID_UNCHANGED",
            ContractViolation::SenderChanged => "TRANSFER_SENDER_UNCHANGED",
            ContractViolation::RecipientUnchanged => "TRANSFER_RECIPIENT_CHANGED",
            ContractViolation::ObligationGroupCount { .. } => "SETTLE_ONE_GROUP",
            ContractViolation::SettleInputCount => "SETTLE_ONE_INPUT",
            ContractViolation::PaidOutOfRange { .. } => "SETTLE_PAID_IN_RANGE",
            ContractViolation::NoCashOutput => "SETTLE_CASH_OUTPUT",
            ContractViolation::NoCashToRecipient => "SETTLE_CASH_TO_RECIPIENT",
            ContractViolation::CashCurrencyMismatch { .. } => "SETTLE_SINGLE_CURRENCY",
            ContractViolation::Overpayment { .. } => "SETTLE_NOT_MORE_THAN_OUTSTANDING",
            ContractViolation::SettleAmountMismatch { .. } => "SETTLE_COMMAND_AMOUNT",
            ContractViolation::OutputAfterFullSettlement => "SETTLE_FULL_NO_OUTPUT",
            ContractViolation::PartialSettlementOutputCount => "SETTLE_PARTIAL_ONE_OUTPUT",
            ContractViolation::NonPaidFieldChanged => "SETTLE_ONLY_PAID_CHANGES",
            ContractViolation::PaidAmountMismatch { .. } => "SETTLE_PAID_INCREMENT",
            ContractViolation::MissingSigners { .. } => "ALL_PARTICIPANTS_SIGN",
            ContractViolation::NotAnObligation => "STATE_IS_IOU",
        }
    }
}
