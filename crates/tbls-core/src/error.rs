//! Error types for threshold BLS operations

use crate::PartyId;
use thiserror::Error;

/// Result type alias for threshold BLS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during protocol execution
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Invalid party configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Threshold requirements not met
    #[error("Threshold not met: required {required}, got {actual}")]
    ThresholdNotMet { required: usize, actual: usize },

    /// Party ID outside of 1..=n
    #[error("Invalid party ID: {0}")]
    InvalidPartyId(PartyId),

    /// The same party ID was supplied twice
    #[error("Duplicate party ID: {0}")]
    DuplicatePartyId(PartyId),

    /// Signature and index arrays differ in length
    #[error("Length mismatch: {signatures} signatures, {indices} indices")]
    LengthMismatch { signatures: usize, indices: usize },

    /// Malformed caller input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Share bytes do not match the expected scheme encoding
    #[error("Invalid share: {0}")]
    InvalidShare(String),

    /// A remote party violated the protocol
    #[error("Verification failed for party {party}: {reason}")]
    VerificationFailed { party: PartyId, reason: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Deadline elapsed
    #[error("Timeout waiting for {0}")]
    Timeout(String),

    /// The operation was abandoned by its caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Operation not allowed in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Pairing check did not hold
    #[error("Invalid signature")]
    InvalidSignature,

    /// Network/transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error was raised by input validation, before any
    /// cryptographic work took place.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::ThresholdNotMet { .. }
                | Error::InvalidPartyId(_)
                | Error::DuplicatePartyId(_)
                | Error::LengthMismatch { .. }
                | Error::InvalidInput(_)
                | Error::InvalidShare(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
