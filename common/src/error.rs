//! Error types for the IOU ledger.

use crate::{ContractViolation, ObligationId, PartyId};
use thiserror::Error;

/// Main error type for IOU ledger operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IouError {
    /// A contract rule rejected the proposal.
    #[error("Contract verification failed: {0}")]
    Validation(#[from] ContractViolation),

    /// The referenced obligation does not exist or has been consumed.
    #[error("Obligation not found: {0}")]
    NotFound(String),

    /// The caller does not hold the role the operation requires.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The requested settlement amount is not acceptable.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// A counterparty declined to sign.
    #[error("Refused by {peer}: {reason}")]
    Refused { peer: PartyId, reason: String },

    /// A counterparty did not answer in time.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Transaction history could not be fetched or did not verify.
    #[error("Unresolvable dependency: {0}")]
    UnresolvableDependency(String),

    /// The finality service rejected the transaction.
    #[error("Consensus rejected: {0}")]
    ConsensusRejected(String),

    /// Invalid cryptographic signature.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Not enough cash to fund a settlement.
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: String, available: String },

    /// No key or route is known for the party.
    #[error("Unknown party: {0}")]
    UnknownParty(PartyId),

    /// Network error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Crypto error.
    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl IouError {
    /// Obligation lookup failure for a known id.
    pub fn obligation_not_found(id: &ObligationId) -> Self {
        IouError::NotFound(id.to_string())
    }

    /// Check if the whole operation may be retried later.
    ///
    /// A retry always starts from a fresh state lookup; collected signatures are
    /// never reused.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IouError::Refused { .. }
                | IouError::Timeout(_)
                | IouError::NetworkError(_)
                | IouError::ConsensusRejected(_)
        )
    }

    /// Check if the caller must re-query the ledger before trying again.
    pub fn requires_fresh_lookup(&self) -> bool {
        matches!(self, IouError::NotFound(_) | IouError::ConsensusRejected(_))
    }

    /// Get suggested retry delay in milliseconds.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            IouError::Refused { .. } => Some(5000),
            IouError::NetworkError(_) => Some(500),
            IouError::Timeout(_) => Some(1000),
            IouError::ConsensusRejected(_) => Some(0),
            _ => None,
        }
    }

    /// Get error code for protocol messages.
    pub fn error_code(&self) -> &'static str {
        match self {
            IouError::Validation(_) => "CONTRACT_VIOLATION",
            IouError::NotFound(_) => "NOT_FOUND",
            IouError::PermissionDenied(_) => "PERMISSION_DENIED",
            IouError::InvalidAmount(_) => "INVALID_AMOUNT",
            IouError::Refused { .. } => "REFUSED",
            IouError::Timeout(_) => "TIMEOUT",
            IouError::UnresolvableDependency(_) => "UNRESOLVABLE_DEPENDENCY",
            IouError::ConsensusRejected(_) => "CONSENSUS_REJECTED",
            IouError::InvalidSignature(_) => "INVALID_SIGNATURE",
            IouError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            IouError::UnknownParty(_) => "UNKNOWN_PARTY",
            IouError::NetworkError(_) => "NETWORK_ERROR",
            IouError::ConfigurationError(_) => "CONFIGURATION_ERROR",
            IouError::CryptoError(_) => "CRYPTO_ERROR",
            IouError::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias for IOU ledger operations.
pub type Result<T> = std::result::Result<T, IouError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_is_never_retryable() {
        let err: IouError = ContractViolation::NonPositiveValue.into();
        assert!(!err.is_retryable());
        assert!(!err.requires_fresh_lookup());
        assert_eq!(err.error_code(), "CONTRACT_VIOLATION");
    }

    #[test]
    fn test_consensus_rejection_needs_fresh_lookup() {
        let err = IouError::ConsensusRejected("input already consumed".into());
        assert!(err.is_retryable());
        assert!(err.requires_fresh_lookup());
    }

    #[test]
    fn test_refusal_is_retryable_later() {
        let err = IouError::Refused {
            peer: PartyId::new("BOB"),
            reason: "busy".into(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.retry_after_ms(), Some(5000));
        assert_eq!(err.to_string(), "Refused by BOB: busy");
    }
}
