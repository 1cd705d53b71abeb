//! RevocationBus (C11): fans a new revocation out to every gateway
//! instance sharing this process group, so each instance's `BloomFront`
//! can record the entry immediately instead of waiting for the next
//! scheduled rebuild. Grounded on the teacher's `tokio::sync::watch` usage
//! in `auth-config::ConfigManager` — same "broadcast a change, subscribers
//! react" shape, using `broadcast` since multiple independent revocations
//! must all be observed rather than only the latest.

use crate::models::RevocationScope;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct RevocationEvent {
    pub scope: RevocationScope,
}

pub trait RevocationBus: Send + Sync {
    fn publish(&self, event: RevocationEvent) -> Result<(), BusError>;
    fn subscribe(&self) -> broadcast::Receiver<RevocationEvent>;
}

pub struct InMemoryRevocationBus {
    sender: broadcast::Sender<RevocationEvent>,
}

impl InMemoryRevocationBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

impl Default for InMemoryRevocationBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl RevocationBus for InMemoryRevocationBus {
    fn publish(&self, event: RevocationEvent) -> Result<(), BusError> {
        // A publish with zero subscribers is not an error: BloomFront's
        // periodic rebuild is the fallback path, the bus is only a
        // latency optimization.
        let _ = self.sender.send(event);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RevocationEvent> {
        self.sender.subscribe()
    }
}
