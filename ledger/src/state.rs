//! Ledger states: obligations and the cash that settles them.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use iou_common::{Amount, IouError, ObligationId, PartyId, Result, StateRef};

/// One version of an IOU.
///
/// Versions are immutable. A transition consumes one version and may produce the
/// next one through [`ObligationState::pay`] or [`ObligationState::with_recipient`],
/// both of which keep the `id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObligationState {
    id: ObligationId,
    value: i64,
    sender: PartyId,
    recipient: PartyId,
    paid: i64,
}

impl ObligationState {
    /// Issue a fresh obligation: `sender` owes `recipient` `value` base units.
    pub fn issue(value: i64, sender: PartyId, recipient: PartyId) -> Self {
        Self {
            id: ObligationId::new(),
            value,
            sender,
            recipient,
            paid: 0,
        }
    }

    /// Rebuild a version from its stored fields.
    ///
    /// No invariants are enforced here; the contract decides whether a version
    /// built this way may appear on the ledger.
    pub fn from_parts(
        id: ObligationId,
        value: i64,
        sender: PartyId,
        recipient: PartyId,
        paid: i64,
    ) -> Self {
        Self {
            id,
            value,
            sender,
            recipient,
            paid,
        }
    }

    /// Next version after paying `amount` more.
    pub fn pay(&self, amount: i64) -> Self {
        Self {
            paid: self.paid.saturating_add(amount),
            ..self.clone()
        }
    }

    /// Next version owed to `recipient` instead.
    pub fn with_recipient(&self, recipient: PartyId) -> Self {
        Self {
            recipient,
            ..self.clone()
        }
    }

    pub fn id(&self) -> ObligationId {
        self.id
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn sender(&self) -> &PartyId {
        &self.sender
    }

    pub fn recipient(&self) -> &PartyId {
        &self.recipient
    }

    pub fn paid(&self) -> i64 {
        self.paid
    }

    /// Amount still owed. Saturates for states whose `paid` was never validated.
    pub fn outstanding(&self) -> i64 {
        self.value.saturating_sub(self.paid)
    }

    /// Parties that must sign any transition touching this version.
    pub fn participants(&self) -> BTreeSet<PartyId> {
        [self.sender.clone(), self.recipient.clone()]
            .into_iter()
            .collect()
    }
}

/// Cash held in the asset sub-ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CashState {
    /// Amount in minor units.
    pub amount: Amount,
    /// Current holder.
    pub owner: PartyId,
    /// Party that issued the cash.
    pub issuer: PartyId,
}

impl CashState {
    /// Create a new cash state.
    pub fn new(amount: Amount, owner: PartyId, issuer: PartyId) -> Self {
        Self {
            amount,
            owner,
            issuer,
        }
    }

    /// Same cash, new holder.
    pub fn with_owner(&self, owner: PartyId) -> Self {
        Self {
            owner,
            ..self.clone()
        }
    }
}

/// An output of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerState {
    Obligation(ObligationState),
    Cash(CashState),
}

impl LedgerState {
    pub fn as_obligation(&self) -> Option<&ObligationState> {
        match self {
            LedgerState::Obligation(state) => Some(state),
            LedgerState::Cash(_) => None,
        }
    }

    pub fn as_cash(&self) -> Option<&CashState> {
        match self {
            LedgerState::Cash(state) => Some(state),
            LedgerState::Obligation(_) => None,
        }
    }

    /// Parties that can see this state.
    pub fn participants(&self) -> BTreeSet<PartyId> {
        match self {
            LedgerState::Obligation(state) => state.participants(),
            LedgerState::Cash(state) => [state.owner.clone()].into_iter().collect(),
        }
    }
}

impl From<ObligationState> for LedgerState {
    fn from(state: ObligationState) -> Self {
        LedgerState::Obligation(state)
    }
}

impl From<CashState> for LedgerState {
    fn from(state: CashState) -> Self {
        LedgerState::Cash(state)
    }
}

/// A state together with the reference of the output that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateAndRef {
    pub state: LedgerState,
    pub state_ref: StateRef,
}

impl StateAndRef {
    pub fn new(state: impl Into<LedgerState>, state_ref: StateRef) -> Self {
        Self {
            state: state.into(),
            state_ref,
        }
    }

    /// The obligation this reference points to.
    pub fn obligation(&self) -> Result<&ObligationState> {
        self.state
            .as_obligation()
            .ok_or_else(|| IouError::NotFound(format!("{} is not an IOU", self.state_ref)))
    }
}
