//! Signed handshake exchanged over a fresh channel
//!
//! Each side signs the channel binding of the live connection together with
//! its certificate and the current time. A record replayed on another
//! connection, or one that is too old, does not verify.

use std::sync::Arc;

use chrono::Utc;
use ed25519_dalek::{Signature, Verifier as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{AuthError, Result};
use crate::identity::{Certificate, Identity};
use crate::wire::base64_bytes;

/// Largest accepted difference between a peer's timestamp and local time
pub const MAX_CLOCK_SKEW_SECS: i64 = 60;

/// Produces the local handshake for a channel binding
pub type AuthFunc = Arc<dyn Fn(&[u8]) -> Result<Handshake> + Send + Sync>;

/// Auth function signing with `identity` at the current time
pub fn auth_with(identity: Arc<Identity>) -> AuthFunc {
    Arc::new(move |binding: &[u8]| -> Result<Handshake> {
        Ok(Handshake::now(&identity, binding))
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    #[serde(with = "base64_bytes")]
    pub binding: Vec<u8>,
    /// Certificate bytes of the signer
    #[serde(with = "base64_bytes")]
    pub identity: Vec<u8>,
    /// Unix seconds
    pub timestamp: i64,
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
}

fn signed_digest(binding: &[u8], identity: &[u8], timestamp: i64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update((binding.len() as u32).to_be_bytes());
    hasher.update(binding);
    hasher.update((identity.len() as u32).to_be_bytes());
    hasher.update(identity);
    hasher.update(timestamp.to_be_bytes());
    hasher.finalize().into()
}

impl Handshake {
    pub fn sign(identity: &Identity, binding: &[u8], timestamp: i64) -> Self {
        let certificate = identity.certificate();
        let digest = signed_digest(binding, certificate.as_bytes(), timestamp);
        Self {
            binding: binding.to_vec(),
            identity: certificate.as_bytes().to_vec(),
            timestamp,
            signature: identity.sign(&digest).to_vec(),
        }
    }

    pub fn now(identity: &Identity, binding: &[u8]) -> Self {
        Self::sign(identity, binding, Utc::now().timestamp())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, AuthError> {
        serde_json::from_slice(bytes).map_err(|e| AuthError::Malformed(e.to_string()))
    }

    /// Check the record against the live channel and return the signer's
    /// certificate. Whether that certificate is acceptable is up to the
    /// caller.
    pub fn verify(
        &self,
        binding: &[u8],
        now: i64,
        max_skew: i64,
    ) -> std::result::Result<Certificate, AuthError> {
        if !bool::from(self.binding.as_slice().ct_eq(binding)) {
            return Err(AuthError::BindingMismatch);
        }

        let skew = now.saturating_sub(self.timestamp);
        if skew.saturating_abs() > max_skew {
            return Err(AuthError::ClockSkew { skew });
        }

        let certificate = Certificate::from_bytes(&self.identity)?;
        let signature =
            Signature::from_slice(&self.signature).map_err(|_| AuthError::BadSignature)?;
        let digest = signed_digest(&self.binding, &self.identity, self.timestamp);
        certificate
            .verifying_key()?
            .verify(&digest, &signature)
            .map_err(|_| AuthError::BadSignature)?;

        Ok(certificate)
    }
}
