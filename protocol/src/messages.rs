//! Protocol message types.
//!
//! Every message a party sends during a flow is a [`FlowMessage`] envelope. A
//! session is one request and its reply; the session id ties them together.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use iou_common::{is_fresh, FlowKind, IouError, PartyId, Result, SessionId, TransactionId};
use iou_ledger::{PartySignature, SignedTransaction};

/// Protocol version spoken by this crate.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Message type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    ProposeTransaction,
    Signature,
    Refuse,
    FetchTransactions,
    Transactions,
}

/// Message body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Payload {
    /// Ask the receiver to check and countersign a transaction.
    ProposeTransaction {
        flow: FlowKind,
        transaction: SignedTransaction,
    },
    /// The receiver's signature over the proposed transaction.
    Signature { signature: PartySignature },
    /// The receiver declined; `code` is an error code.
    Refuse { code: String, reason: String },
    /// Ask the receiver for transactions it holds.
    FetchTransactions { ids: Vec<TransactionId> },
    /// Reply to `FetchTransactions`.
    Transactions { transactions: Vec<SignedTransaction> },
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::ProposeTransaction { .. } => MessageType::ProposeTransaction,
            Payload::Signature { .. } => MessageType::Signature,
            Payload::Refuse { .. } => MessageType::Refuse,
            Payload::FetchTransactions { .. } => MessageType::FetchTransactions,
            Payload::Transactions { .. } => MessageType::Transactions,
        }
    }
}

/// Envelope for every flow message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowMessage {
    /// Protocol version.
    pub version: String,
    /// Message type identifier.
    pub message_type: MessageType,
    /// Session this message belongs to.
    pub session_id: SessionId,
    /// Party that sent the message.
    pub sender: PartyId,
    /// Send timestamp.
    pub timestamp: DateTime<Utc>,
    pub payload: Payload,
}

impl FlowMessage {
    /// Create a new message.
    pub fn new(session_id: SessionId, sender: PartyId, payload: Payload) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            message_type: payload.message_type(),
            session_id,
            sender,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn propose(
        session_id: SessionId,
        sender: PartyId,
        flow: FlowKind,
        transaction: SignedTransaction,
    ) -> Self {
        Self::new(
            session_id,
            sender,
            Payload::ProposeTransaction { flow, transaction },
        )
    }

    pub fn signature(session_id: SessionId, sender: PartyId, signature: PartySignature) -> Self {
        Self::new(session_id, sender, Payload::Signature { signature })
    }

    /// Refusal carrying the error that caused it.
    pub fn refuse(session_id: SessionId, sender: PartyId, err: &IouError) -> Self {
        Self::new(
            session_id,
            sender,
            Payload::Refuse {
                code: err.error_code().to_string(),
                reason: err.to_string(),
            },
        )
    }

    pub fn fetch(session_id: SessionId, sender: PartyId, ids: Vec<TransactionId>) -> Self {
        Self::new(session_id, sender, Payload::FetchTransactions { ids })
    }

    pub fn transactions(
        session_id: SessionId,
        sender: PartyId,
        transactions: Vec<SignedTransaction>,
    ) -> Self {
        Self::new(session_id, sender, Payload::Transactions { transactions })
    }

    /// Check the envelope before acting on it.
    pub fn validate(&self) -> Result<()> {
        if self.version != PROTOCOL_VERSION {
            return Err(IouError::NetworkError(format!(
                "Version mismatch: expected {}, got {}",
                PROTOCOL_VERSION, self.version
            )));
        }
        if self.message_type != self.payload.message_type() {
            return Err(IouError::NetworkError(format!(
                "Message type {:?} does not match payload {:?}",
                self.message_type,
                self.payload.message_type()
            )));
        }
        if !is_fresh(self.timestamp) {
            return Err(IouError::NetworkError(format!(
                "Stale message from {} sent at {}",
                self.sender, self.timestamp
            )));
        }
        Ok(())
    }

    /// Turn a reply into its payload, mapping a refusal to [`IouError::Refused`].
    pub fn into_reply(self) -> Result<Payload> {
        self.validate()?;
        match self.payload {
            Payload::Refuse { reason, .. } => Err(IouError::Refused {
                peer: self.sender,
                reason,
            }),
            payload => Ok(payload),
        }
    }

    /// Expect a signature reply.
    pub fn into_signature(self) -> Result<PartySignature> {
        let sender = self.sender.clone();
        match self.into_reply()? {
            Payload::Signature { signature } => Ok(signature),
            other => Err(IouError::NetworkError(format!(
                "Expected a signature from {}, got {:?}",
                sender,
                other.message_type()
            ))),
        }
    }

    /// Expect a transactions reply.
    pub fn into_transactions(self) -> Result<Vec<SignedTransaction>> {
        let sender = self.sender.clone();
        match self.into_reply()? {
            Payload::Transactions { transactions } => Ok(transactions),
            other => Err(IouError::NetworkError(format!(
                "Expected transactions from {}, got {:?}",
                sender,
                other.message_type()
            ))),
        }
    }
}
