use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};

use crate::bus::{BusSubscription, NotificationBus};
use crate::error::Result;

const CHANNEL_CAPACITY: usize = 64;
const SUBSCRIPTION_BUFFER: usize = 64;

/// In-process bus over `tokio::sync::broadcast`, one channel per name.
///
/// Used for same-process wiring and tests. Matches the bus contract
/// exactly: publishing with no subscriber drops the message, and a
/// subscriber that falls more than a channel-capacity behind loses the
/// overwritten messages.
#[derive(Default)]
pub struct MemoryBus {
    channels: DashMap<String, broadcast::Sender<Vec<u8>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationBus for MemoryBus {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
        if let Some(tx) = self.channels.get(channel) {
            // Errors only when no receiver is alive; best-effort drop.
            let _ = tx.send(payload.to_vec());
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BusSubscription> {
        let mut rx = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        let (tx, out_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Ok(payload) => {
                            if tx.send(payload).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("bus subscription lagged, dropped {} messages", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = tx.closed() => break,
                }
            }
        });

        Ok(BusSubscription::new(out_rx))
    }
}
