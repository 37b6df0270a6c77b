pub mod memory;
pub mod unix;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

/// A broadcast notification bus: at-most-once per listener, unordered,
/// best-effort. A publish with no registered listener is silently dropped,
/// and a listener may observe a re-broadcast message more than once; every
/// user of the bus must tolerate both.
#[async_trait]
pub trait NotificationBus: Send + Sync {
    /// Publish a payload to every current listener on `channel`.
    ///
    /// Fails only when the transport itself is unusable, never because
    /// nobody is listening.
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()>;

    /// Register a listener on `channel`. Messages published before this
    /// returns are not observed.
    async fn subscribe(&self, channel: &str) -> Result<BusSubscription>;
}

/// Receiving half of one bus subscription.
pub struct BusSubscription {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl BusSubscription {
    pub(crate) fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { rx }
    }

    /// Next payload, or `None` once the bus side is gone.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}
