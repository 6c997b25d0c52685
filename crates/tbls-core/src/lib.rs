//! # TBLS Core
//!
//! Protocol engine for threshold BLS signatures on BLS12-381.
//!
//! This crate provides the fundamental building blocks for:
//! - Distributed Key Generation (DKG) with Feldman commitments
//! - Partial signing with an installed share
//! - Lagrange aggregation and pairing verification
//!
//! ## Protocol Overview
//!
//! `n` parties jointly hold one public key in G2. No party ever learns the
//! private key; any `t` of them can produce partial signatures in G1 that
//! combine into the same group signature, while `t - 1` learn nothing.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tbls_core::{Tbls, Verifier};
//!
//! let party = Arc::new(Tbls::new(my_id));
//! party.init(&members, threshold, outbound)?;
//! tokio::spawn(party.router().run(inbound));
//!
//! let share = party.keygen(deadline, n, threshold).await?;
//! party.set_share_data(share.as_bytes())?;
//! let partial = party.sign(&digest)?;
//!
//! let verifier = Verifier::new(&party.threshold_pk()?)?;
//! let signature = verifier.aggregate(&partials)?;
//! verifier.verify(&digest, &signature.to_bytes())?;
//! ```

pub mod bls;
pub mod error;
pub mod keygen;
pub mod lagrange;
pub mod membership;
pub mod mpc;
pub mod scheme;
pub mod sign;
pub mod types;
pub mod verify;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
pub use keygen::{DkgCoordinator, DkgPhase};
pub use membership::{Membership, MembershipDirectory};
pub use mpc::{MessageHandler, Outbound, TopicRouter};
pub use scheme::Tbls;
pub use sign::Signer;
pub use types::{
    digest, Message, Params, PartialSignature, PartyId, SchemeKind, ShareBytes, ShareData,
    Signature, ThresholdPublicKey, UniversalId, DIGEST_LEN,
};
pub use verify::Verifier;

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
