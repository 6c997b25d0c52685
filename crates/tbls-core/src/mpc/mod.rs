//! MPC coordination utilities

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::types::Message;
use crate::{PartyId, Result};

/// Outgoing side of the transport as seen by protocol code.
///
/// Delivery is best-effort and at most once per call; the implementation
/// must not block.
pub trait Outbound: Send + Sync {
    fn send(&self, msg_type: u8, topic: &str, payload: &[u8], to: &[PartyId]) -> Result<()>;
}

impl<F> Outbound for F
where
    F: Fn(u8, &str, &[u8], &[PartyId]) -> Result<()> + Send + Sync,
{
    fn send(&self, msg_type: u8, topic: &str, payload: &[u8], to: &[PartyId]) -> Result<()> {
        self(msg_type, topic, payload, to)
    }
}

/// Consumer of inbound protocol messages
pub trait MessageHandler: Send + Sync {
    fn handle_message(&self, msg: Message) -> Result<()>;
}

/// Dispatches the inbound stream of one party to per-topic handlers
#[derive(Default, Clone)]
pub struct TopicRouter {
    routes: HashMap<String, Arc<dyn MessageHandler>>,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, topic: impl Into<String>, handler: Arc<dyn MessageHandler>) -> Self {
        self.routes.insert(topic.into(), handler);
        self
    }

    /// Hand one message to its topic handler. Messages for unknown topics are
    /// dropped.
    pub fn dispatch(&self, msg: Message) -> Result<()> {
        match self.routes.get(&msg.topic) {
            Some(handler) => handler.handle_message(msg),
            None => {
                debug!(topic = %msg.topic, from = msg.from, "No handler for topic");
                Ok(())
            }
        }
    }

    /// Consume the inbound stream until every sender is gone
    pub async fn run(self, mut inbound: mpsc::Receiver<Message>) {
        while let Some(msg) = inbound.recv().await {
            let topic = msg.topic.clone();
            let from = msg.from;
            if let Err(e) = self.dispatch(msg) {
                warn!(%topic, from, error = %e, "Handler rejected message");
            }
        }
        debug!("Inbound stream closed");
    }
}

/// In-memory transport for testing
pub mod memory;

pub use memory::{MemoryOutbound, MemoryTransport};
