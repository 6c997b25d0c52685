//! Frame payloads exchanged after the handshake

use serde::{Deserialize, Serialize};
use tbls_core::{Message, PartyId};

use crate::error::Result;

/// Serde adapter storing byte fields as standard base64
pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(D::Error::custom)
    }
}

/// One protocol message as carried inside an encrypted frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub msg_type: u8,
    pub topic: String,
    pub from: PartyId,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

impl WireMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn into_message(self) -> Message {
        Message {
            msg_type: self.msg_type,
            topic: self.topic,
            payload: self.payload,
            from: self.from,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_is_base64() {
        let msg = WireMessage {
            msg_type: 1,
            topic: "tbls/dkg".into(),
            from: 2,
            payload: vec![0xde, 0xad, 0xbe, 0xef],
        };
        let bytes = msg.to_bytes().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["payload"], "3q2+7w==");

        let decoded = WireMessage::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.into_message().from, 2);
    }
}
