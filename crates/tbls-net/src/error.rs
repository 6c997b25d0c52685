//! Transport error types

use thiserror::Error;

/// Reasons a peer's handshake is refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("handshake signature does not verify")]
    BadSignature,
    #[error("unknown certificate {0}")]
    UnknownCertificate(String),
    #[error("certificate mismatch: expected {expected}, got {actual}")]
    CertificateMismatch { expected: String, actual: String },
    #[error("timestamp differs from local clock by {skew}s")]
    ClockSkew { skew: i64 },
    #[error("channel binding mismatch")]
    BindingMismatch,
    #[error("malformed handshake: {0}")]
    Malformed(String),
}

/// Transport errors
#[derive(Debug, Error)]
pub enum NetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Channel setup failed: {0}")]
    Channel(String),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    #[error("Authentication failed: {0}")]
    Authentication(#[from] AuthError),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Connection closed")]
    Closed,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, NetError>;

impl From<serde_json::Error> for NetError {
    fn from(e: serde_json::Error) -> Self {
        NetError::Codec(e.to_string())
    }
}

impl From<NetError> for tbls_core::Error {
    fn from(e: NetError) -> Self {
        tbls_core::Error::Transport(e.to_string())
    }
}
