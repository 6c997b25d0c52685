//! BLS12-381 helpers
//!
//! Signatures and message hashes live in G1, public keys and DKG commitments
//! live in G2 ("minimal signature size" variant).

use blstrs::{G1Affine, G1Projective, G2Affine, G2Projective, Gt, Scalar};
use ff::Field;
use group::{Curve, Group};
use rand_core::{CryptoRng, RngCore};

use crate::{Error, PartyId, Result};

/// Ciphersuite tag for hashing digests onto G1
pub const SIGNATURE_DST: &[u8] = b"BLS_SIG_BLS12381G1_XMD:SHA-256_SSWU_RO_NUL_";

/// Encoded scalar length
pub const SCALAR_LEN: usize = 32;

/// Compressed G1 length (signatures)
pub const G1_LEN: usize = 48;

/// Compressed G2 length (public keys, commitments)
pub const G2_LEN: usize = 96;

/// Hash a digest onto G1
pub fn hash_to_g1(msg: &[u8]) -> G1Projective {
    G1Projective::hash_to_curve(msg, SIGNATURE_DST, &[])
}

pub fn pairing(g1: &G1Projective, g2: &G2Projective) -> Gt {
    blstrs::pairing(&g1.to_affine(), &g2.to_affine())
}

/// Evaluation point of a party. Party 0 would evaluate the secret itself.
pub fn scalar_from_id(id: PartyId) -> Result<Scalar> {
    if id == 0 {
        return Err(Error::InvalidPartyId(id));
    }
    Ok(Scalar::from(id as u64))
}

pub fn scalar_random<R: RngCore + CryptoRng>(rng: &mut R) -> Scalar {
    Scalar::random(rng)
}

pub fn scalar_to_bytes(s: &Scalar) -> [u8; SCALAR_LEN] {
    s.to_bytes_be()
}

pub fn scalar_from_bytes(bytes: &[u8]) -> Result<Scalar> {
    let raw: [u8; SCALAR_LEN] = bytes
        .try_into()
        .map_err(|_| Error::Deserialization(format!("scalar must be {SCALAR_LEN} bytes")))?;
    Option::<Scalar>::from(Scalar::from_bytes_be(&raw))
        .ok_or_else(|| Error::Deserialization("scalar is not canonical".into()))
}

pub fn g1_to_bytes(p: &G1Projective) -> [u8; G1_LEN] {
    p.to_affine().to_compressed()
}

pub fn g1_from_bytes(bytes: &[u8]) -> Result<G1Projective> {
    let raw: [u8; G1_LEN] = bytes
        .try_into()
        .map_err(|_| Error::Deserialization(format!("G1 point must be {G1_LEN} bytes")))?;
    let affine = Option::<G1Affine>::from(G1Affine::from_compressed(&raw))
        .ok_or_else(|| Error::Deserialization("invalid G1 point".into()))?;
    Ok(affine.into())
}

pub fn g2_to_bytes(p: &G2Projective) -> [u8; G2_LEN] {
    p.to_affine().to_compressed()
}

pub fn g2_from_bytes(bytes: &[u8]) -> Result<G2Projective> {
    let raw: [u8; G2_LEN] = bytes
        .try_into()
        .map_err(|_| Error::Deserialization(format!("G2 point must be {G2_LEN} bytes")))?;
    let affine = Option::<G2Affine>::from(G2Affine::from_compressed(&raw))
        .ok_or_else(|| Error::Deserialization("invalid G2 point".into()))?;
    Ok(affine.into())
}

/// Horner evaluation of a polynomial given by its coefficients (constant first)
pub fn eval_poly(coeffs: &[Scalar], x: &Scalar) -> Scalar {
    let mut acc = Scalar::ZERO;
    for coeff in coeffs.iter().rev() {
        acc *= x;
        acc += coeff;
    }
    acc
}

/// Evaluate a Feldman commitment vector "in the exponent" at `x`
pub fn eval_commitment(coeffs: &[G2Projective], x: &Scalar) -> G2Projective {
    let mut acc = G2Projective::identity();
    for coeff in coeffs.iter().rev() {
        acc *= x;
        acc += coeff;
    }
    acc
}
