//! Distributed Key Generation (DKG) module
//!
//! Feldman verifiable secret sharing in which every party deals, followed by
//! a round in which every party acknowledges the hash of the commitment set
//! it accepted. A party only finalises once all acknowledgements agree with
//! its own, so every completing party derives the same group key.
//!
//! A party whose share fails its dealer's commitment broadcasts a complaint.
//! The accused dealer answers by revealing that share to everyone; a reveal
//! that matches the commitment settles the complaint and replaces the
//! accuser's share, one that does not (or none before the deadline) convicts
//! the dealer.

mod dkg;
mod messages;

pub use dkg::DkgCoordinator;
pub use messages::*;

use crate::Error;

/// Lifecycle of a coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DkgPhase {
    /// Constructed, not yet initialised
    Idle,
    /// Gathering commitments and shares
    Collecting,
    /// Own shares verified and transcript acknowledged
    Committed,
    /// Share produced
    Complete,
    /// Run aborted; the coordinator cannot be reused
    Failed(Error),
}

impl DkgPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DkgPhase::Complete | DkgPhase::Failed(_))
    }
}
