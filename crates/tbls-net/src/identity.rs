//! Long-lived party identities
//!
//! An identity is an Ed25519 key pair. Its certificate is the 32-byte
//! verifying key; the universal id used by the membership directory is the
//! hex SHA-256 fingerprint of the certificate.

use std::fmt;

use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tbls_core::UniversalId;
use zeroize::Zeroizing;

use crate::error::{AuthError, NetError, Result};

/// Encoded certificate length
pub const CERTIFICATE_LEN: usize = 32;

/// Public half of an identity
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Certificate([u8; CERTIFICATE_LEN]);

impl Certificate {
    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, AuthError> {
        let raw: [u8; CERTIFICATE_LEN] = bytes.try_into().map_err(|_| {
            AuthError::Malformed(format!(
                "certificate must be {CERTIFICATE_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        VerifyingKey::from_bytes(&raw)
            .map_err(|e| AuthError::Malformed(format!("invalid certificate: {e}")))?;
        Ok(Self(raw))
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim()).map_err(|e| NetError::Config(e.to_string()))?;
        Ok(Self::from_bytes(&bytes)?)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; CERTIFICATE_LEN] {
        &self.0
    }

    /// Fingerprint used as the party's universal id
    pub fn universal_id(&self) -> UniversalId {
        UniversalId(hex::encode(Sha256::digest(self.0)))
    }

    pub(crate) fn verifying_key(&self) -> std::result::Result<VerifyingKey, AuthError> {
        VerifyingKey::from_bytes(&self.0)
            .map_err(|e| AuthError::Malformed(format!("invalid certificate: {e}")))
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Certificate({})", self.to_hex())
    }
}

impl fmt::Display for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for Certificate {
    type Error = NetError;

    fn try_from(value: String) -> Result<Self> {
        Self::from_hex(&value)
    }
}

impl From<Certificate> for String {
    fn from(value: Certificate) -> Self {
        value.to_hex()
    }
}

/// Secret signing identity of the local party
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    pub fn generate() -> Self {
        let mut seed = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut seed[..]);
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let seed: Zeroizing<[u8; 32]> = Zeroizing::new(
            bytes
                .try_into()
                .map_err(|_| NetError::Config("identity secret must be 32 bytes".into()))?,
        );
        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    pub fn from_secret_hex(s: &str) -> Result<Self> {
        let bytes = Zeroizing::new(
            hex::decode(s.trim()).map_err(|e| NetError::Config(format!("identity secret: {e}")))?,
        );
        Self::from_secret_bytes(&bytes)
    }

    pub fn secret_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.signing_key.to_bytes()))
    }

    pub fn certificate(&self) -> Certificate {
        Certificate(self.signing_key.verifying_key().to_bytes())
    }

    pub fn universal_id(&self) -> UniversalId {
        self.certificate().universal_id()
    }

    pub(crate) fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("certificate", &self.certificate())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_hex_round_trip() {
        let identity = Identity::generate();
        let restored = Identity::from_secret_hex(&identity.secret_hex()).unwrap();
        assert_eq!(restored.certificate(), identity.certificate());
        assert_eq!(restored.universal_id(), identity.universal_id());
    }

    #[test]
    fn test_certificate_serde_as_hex() {
        let cert = Identity::generate().certificate();
        let json = serde_json::to_string(&cert).unwrap();
        assert_eq!(json, format!("\"{}\"", cert.to_hex()));
        let back: Certificate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cert);
        assert!(serde_json::from_str::<Certificate>("\"abcd\"").is_err());
    }

    #[test]
    fn test_universal_id_is_sha256_fingerprint() {
        let cert = Identity::generate().certificate();
        let id = cert.universal_id();
        assert_eq!(id.0.len(), 64);
        assert_eq!(id.0, hex::encode(Sha256::digest(cert.as_bytes())));
    }
}
