//! In-memory transport implementation for testing

use super::Outbound;
use crate::types::Message;
use crate::{Error, PartyId, Result};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Inbox capacity per party
const INBOX_CAPACITY: usize = 1024;

/// In-memory message transport for local testing
#[derive(Clone, Default)]
pub struct MemoryTransport {
    /// Inbox senders: party -> channel
    inboxes: Arc<DashMap<PartyId, mpsc::Sender<Message>>>,
}

impl MemoryTransport {
    /// Create a new in-memory transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a party and return its inbound stream
    pub fn register(&self, party: PartyId) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        self.inboxes.insert(party, tx);
        rx
    }

    /// Drop a party's inbox; later sends to it are lost
    pub fn disconnect(&self, party: PartyId) {
        self.inboxes.remove(&party);
    }

    /// Outbound handle stamping messages with `from`
    pub fn outbound(&self, from: PartyId) -> MemoryOutbound {
        MemoryOutbound {
            from,
            inboxes: self.inboxes.clone(),
        }
    }

    /// Deliver a message as-is, bypassing sender stamping
    pub fn deliver(&self, to: PartyId, msg: Message) -> Result<()> {
        let inbox = self
            .inboxes
            .get(&to)
            .ok_or_else(|| Error::Transport(format!("party {to} is not connected")))?;
        inbox
            .try_send(msg)
            .map_err(|e| Error::Transport(format!("delivery to party {to} failed: {e}")))
    }
}

/// Sending half bound to one party
#[derive(Clone)]
pub struct MemoryOutbound {
    from: PartyId,
    inboxes: Arc<DashMap<PartyId, mpsc::Sender<Message>>>,
}

impl Outbound for MemoryOutbound {
    fn send(&self, msg_type: u8, topic: &str, payload: &[u8], to: &[PartyId]) -> Result<()> {
        for party in to {
            let Some(inbox) = self.inboxes.get(party) else {
                warn!(from = self.from, to = party, "Recipient not connected, dropping");
                continue;
            };
            let msg = Message {
                msg_type,
                topic: topic.to_string(),
                payload: payload.to_vec(),
                from: self.from,
            };
            if let Err(e) = inbox.try_send(msg) {
                warn!(from = self.from, to = party, error = %e, "Dropping message");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_stamps_sender() {
        let transport = MemoryTransport::new();
        let mut rx2 = transport.register(2);
        let mut rx3 = transport.register(3);

        let out = transport.outbound(1);
        out.send(7, "topic", b"hello", &[2, 3]).unwrap();

        for rx in [&mut rx2, &mut rx3] {
            let msg = rx.recv().await.unwrap();
            assert_eq!(msg.from, 1);
            assert_eq!(msg.msg_type, 7);
            assert_eq!(msg.topic, "topic");
            assert_eq!(msg.payload, b"hello");
        }
    }

    #[tokio::test]
    async fn test_disconnected_party_is_skipped() {
        let transport = MemoryTransport::new();
        let mut rx2 = transport.register(2);
        transport.register(3);
        transport.disconnect(3);

        transport.outbound(1).send(1, "t", b"x", &[3, 2]).unwrap();
        assert_eq!(rx2.recv().await.unwrap().payload, b"x");
        assert!(transport
            .deliver(
                3,
                Message {
                    msg_type: 1,
                    topic: "t".into(),
                    payload: vec![],
                    from: 1
                }
            )
            .is_err());
    }
}
