//! IOU Ledger Cryptographic Primitives
//!
//! Provides transaction signing, verification and content hashing.

pub mod signing;
pub mod hash;

pub use signing::{SigningKey, VerifyingKey, Signature};
pub use hash::{sha256, sha256_parts};

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
