//! DKG message types

use crate::{Error, PartyId, Result};
use serde::{Deserialize, Serialize};

/// Topic carrying DKG traffic
pub const DKG_TOPIC: &str = "tbls/dkg";

/// Transport message type of DKG traffic
pub const MSG_TYPE_DKG: u8 = 1;

/// Messages exchanged during key generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DkgMessage {
    /// Feldman commitments to the dealer's polynomial (broadcast)
    Commitment {
        dealer: PartyId,
        /// Compressed G2 points, constant term first
        coefficients: Vec<Vec<u8>>,
    },
    /// Dealer's polynomial evaluated at the recipient (point-to-point)
    Share {
        dealer: PartyId,
        recipient: PartyId,
        value: Vec<u8>,
    },
    /// A dealt share did not match its commitment (broadcast)
    Complaint {
        accuser: PartyId,
        dealer: PartyId,
        reason: String,
    },
    /// Accused dealer's public reveal of the disputed share (broadcast)
    Justification {
        dealer: PartyId,
        accuser: PartyId,
        value: Vec<u8>,
    },
    /// Hash of the commitment set the sender accepted (broadcast)
    Ack { party: PartyId, transcript: Vec<u8> },
}

impl DkgMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            DkgMessage::Commitment { .. } => "commitment",
            DkgMessage::Share { .. } => "share",
            DkgMessage::Complaint { .. } => "complaint",
            DkgMessage::Justification { .. } => "justification",
            DkgMessage::Ack { .. } => "ack",
        }
    }

    /// Party the message claims to come from
    pub fn claimed_sender(&self) -> PartyId {
        match self {
            DkgMessage::Commitment { dealer, .. } => *dealer,
            DkgMessage::Share { dealer, .. } => *dealer,
            DkgMessage::Complaint { accuser, .. } => *accuser,
            DkgMessage::Justification { dealer, .. } => *dealer,
            DkgMessage::Ack { party, .. } => *party,
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    pub fn from_payload(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Deserialization(e.to_string()))
    }
}
