//! Core types for the threshold BLS protocol

use std::fmt;

use blstrs::{G1Projective, G2Projective, Scalar};
use group::Curve;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::bls::{
    g1_from_bytes, g1_to_bytes, g2_from_bytes, g2_to_bytes, scalar_from_bytes, scalar_to_bytes,
    G1_LEN, G2_LEN, SCALAR_LEN,
};
use crate::{Error, Result};

/// Participant index used by the math layer (1..=n)
pub type PartyId = u16;

/// Length of the digests that get signed
pub const DIGEST_LEN: usize = 32;

/// Encoding version of [`ShareData`] and [`ThresholdPublicKey`]
pub const ENCODING_VERSION: u8 = 1;

/// SHA-256 digest of an application message
pub fn digest(message: &[u8]) -> [u8; DIGEST_LEN] {
    Sha256::digest(message).into()
}

/// Long-lived external identity of a party (certificate fingerprint)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UniversalId(pub String);

impl fmt::Display for UniversalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UniversalId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Threshold schemes this engine knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SchemeKind {
    /// BLS12-381, signatures in G1, keys in G2
    Bls12381MinSig = 1,
}

impl TryFrom<u8> for SchemeKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(SchemeKind::Bls12381MinSig),
            other => Err(Error::InvalidShare(format!("unknown scheme tag {other}"))),
        }
    }
}

/// Protocol message as delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Scheme-defined message type
    pub msg_type: u8,
    /// Routing topic
    pub topic: String,
    /// Opaque payload
    pub payload: Vec<u8>,
    /// Authenticated sender
    pub from: PartyId,
}

/// Party-set parameters fixed for one protocol run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    pub n: u16,
    pub t: u16,
}

impl Params {
    pub fn new(n: usize, t: usize) -> Result<Self> {
        if n == 0 || n > u16::MAX as usize {
            return Err(Error::InvalidConfig(format!("invalid party count {n}")));
        }
        if t == 0 || t > n {
            return Err(Error::InvalidConfig(format!(
                "threshold must be in 1..={n}, got {t}"
            )));
        }
        Ok(Self {
            n: n as u16,
            t: t as u16,
        })
    }

    pub fn contains(&self, party: PartyId) -> bool {
        party >= 1 && party <= self.n
    }
}

/// Validate a member list: exactly the indices 1..=n, each once.
pub(crate) fn validate_members(members: &[PartyId]) -> Result<()> {
    let mut sorted = members.to_vec();
    sorted.sort_unstable();
    for (expected, actual) in (1..).zip(sorted.iter()) {
        if *actual != expected {
            return Err(Error::InvalidConfig(format!(
                "members must be exactly 1..={}, got {:?}",
                members.len(),
                members
            )));
        }
    }
    if members.is_empty() {
        return Err(Error::InvalidConfig("empty member list".into()));
    }
    Ok(())
}

/// Secret state a party holds after a successful DKG.
///
/// Encoded as `version | scheme | party | n | t | secret | group_pk |
/// public_shares[n]`, all integers big-endian.
///
/// Only the encoded form ([`ShareBytes`]) is wiped on drop; `Scalar` offers
/// no zeroization, so the decoded secret is not `Clone` and lives behind a
/// single `Arc` in the signer.
pub struct ShareData {
    pub party_id: PartyId,
    pub params: Params,
    pub secret: Scalar,
    pub group_public_key: G2Projective,
    pub public_shares: Vec<G2Projective>,
}

const SHARE_HEADER_LEN: usize = 1 + 1 + 2 + 2 + 2;

impl ShareData {
    /// Encoded length for a run with `n` parties
    pub fn encoded_len(n: usize) -> usize {
        SHARE_HEADER_LEN + SCALAR_LEN + G2_LEN + n * G2_LEN
    }

    pub fn to_bytes(&self) -> ShareBytes {
        let mut out = Vec::with_capacity(Self::encoded_len(self.params.n as usize));
        out.push(ENCODING_VERSION);
        out.push(SchemeKind::Bls12381MinSig as u8);
        out.extend_from_slice(&self.party_id.to_be_bytes());
        out.extend_from_slice(&self.params.n.to_be_bytes());
        out.extend_from_slice(&self.params.t.to_be_bytes());
        out.extend_from_slice(&scalar_to_bytes(&self.secret));
        out.extend_from_slice(&g2_to_bytes(&self.group_public_key));
        for share in &self.public_shares {
            out.extend_from_slice(&g2_to_bytes(share));
        }
        ShareBytes(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SHARE_HEADER_LEN {
            return Err(Error::InvalidShare(format!(
                "share too short: {} bytes",
                bytes.len()
            )));
        }
        if bytes[0] != ENCODING_VERSION {
            return Err(Error::InvalidShare(format!(
                "unsupported version {}",
                bytes[0]
            )));
        }
        SchemeKind::try_from(bytes[1])?;

        let party_id = u16::from_be_bytes([bytes[2], bytes[3]]);
        let n = u16::from_be_bytes([bytes[4], bytes[5]]) as usize;
        let t = u16::from_be_bytes([bytes[6], bytes[7]]) as usize;
        let params = Params::new(n, t).map_err(|e| Error::InvalidShare(e.to_string()))?;
        if !params.contains(party_id) {
            return Err(Error::InvalidShare(format!(
                "party {party_id} outside of 1..={n}"
            )));
        }

        let expected = Self::encoded_len(n);
        if bytes.len() != expected {
            return Err(Error::InvalidShare(format!(
                "expected {expected} bytes for n = {n}, got {}",
                bytes.len()
            )));
        }

        let invalid = |e: Error| Error::InvalidShare(e.to_string());
        let mut offset = SHARE_HEADER_LEN;
        let secret = scalar_from_bytes(&bytes[offset..offset + SCALAR_LEN]).map_err(invalid)?;
        offset += SCALAR_LEN;
        let group_public_key = g2_from_bytes(&bytes[offset..offset + G2_LEN]).map_err(invalid)?;
        offset += G2_LEN;

        let mut public_shares = Vec::with_capacity(n);
        for _ in 0..n {
            public_shares.push(g2_from_bytes(&bytes[offset..offset + G2_LEN]).map_err(invalid)?);
            offset += G2_LEN;
        }

        Ok(Self {
            party_id,
            params,
            secret,
            group_public_key,
            public_shares,
        })
    }

    /// Public share (verification key) of `party`
    pub fn public_share(&self, party: PartyId) -> Result<G2Projective> {
        if !self.params.contains(party) {
            return Err(Error::InvalidPartyId(party));
        }
        Ok(self.public_shares[party as usize - 1])
    }

    pub fn threshold_public_key(&self) -> ThresholdPublicKey {
        ThresholdPublicKey {
            params: self.params,
            point: self.group_public_key,
        }
    }
}

impl fmt::Debug for ShareData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShareData")
            .field("party_id", &self.party_id)
            .field("params", &self.params)
            .field("secret", &"<redacted>")
            .field(
                "group_public_key",
                &hex::encode(g2_to_bytes(&self.group_public_key)),
            )
            .finish()
    }
}

/// Encoded share; wiped from memory when dropped
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ShareBytes(Vec<u8>);

impl ShareBytes {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for ShareBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ShareBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShareBytes(<{} bytes>)", self.0.len())
    }
}

/// Group public key together with the quorum parameters it was created for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdPublicKey {
    pub params: Params,
    pub point: G2Projective,
}

impl ThresholdPublicKey {
    pub const ENCODED_LEN: usize = 1 + 2 + 2 + G2_LEN;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        out.push(ENCODING_VERSION);
        out.extend_from_slice(&self.params.n.to_be_bytes());
        out.extend_from_slice(&self.params.t.to_be_bytes());
        out.extend_from_slice(&g2_to_bytes(&self.point));
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(Error::InvalidInput(format!(
                "threshold public key must be {} bytes, got {}",
                Self::ENCODED_LEN,
                bytes.len()
            )));
        }
        if bytes[0] != ENCODING_VERSION {
            return Err(Error::InvalidInput(format!(
                "unsupported public key version {}",
                bytes[0]
            )));
        }
        let n = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
        let t = u16::from_be_bytes([bytes[3], bytes[4]]) as usize;
        let params = Params::new(n, t).map_err(|e| Error::InvalidInput(e.to_string()))?;
        let point = g2_from_bytes(&bytes[5..]).map_err(|e| Error::InvalidInput(e.to_string()))?;
        Ok(Self { params, point })
    }

    /// Compressed group key without the quorum parameters
    pub fn point_bytes(&self) -> [u8; G2_LEN] {
        self.point.to_affine().to_compressed()
    }
}

/// One party's signature share over a digest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialSignature {
    pub party_id: PartyId,
    pub point: G1Projective,
}

impl PartialSignature {
    pub const ENCODED_LEN: usize = 2 + G1_LEN;

    /// Signature bytes only, as handed to [`crate::Verifier::aggregate_signatures`]
    pub fn signature_bytes(&self) -> [u8; G1_LEN] {
        g1_to_bytes(&self.point)
    }

    /// `party_id || signature`, suitable for retransmission
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        out.extend_from_slice(&self.party_id.to_be_bytes());
        out.extend_from_slice(&self.signature_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(Error::InvalidInput(format!(
                "partial signature must be {} bytes, got {}",
                Self::ENCODED_LEN,
                bytes.len()
            )));
        }
        let party_id = u16::from_be_bytes([bytes[0], bytes[1]]);
        if party_id == 0 {
            return Err(Error::InvalidPartyId(party_id));
        }
        let point = g1_from_bytes(&bytes[2..]).map_err(|e| Error::InvalidInput(e.to_string()))?;
        Ok(Self { party_id, point })
    }
}

/// Aggregated group signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub G1Projective);

impl Signature {
    pub fn to_bytes(&self) -> [u8; G1_LEN] {
        g1_to_bytes(&self.0)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        g1_from_bytes(bytes)
            .map(Signature)
            .map_err(|e| Error::InvalidInput(e.to_string()))
    }
}
