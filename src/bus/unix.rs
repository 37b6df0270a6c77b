use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::net::UnixDatagram;
use tokio::sync::mpsc;

use crate::bus::{BusSubscription, NotificationBus};
use crate::error::{GatehouseError, Result};

/// Largest payload a single notification may carry. Envelopes are small
/// JSON objects; anything that does not fit one datagram is refused.
const MAX_DATAGRAM: usize = 65_000;
const SUBSCRIPTION_BUFFER: usize = 64;

/// Cross-process bus over per-subscriber unix datagram sockets.
///
/// Each channel is a directory under the bus root; each subscriber binds
/// its own datagram socket inside it. Publishing enumerates the sockets and
/// fires one datagram at each, ignoring per-listener failures and unlinking
/// sockets whose owner is gone. Nothing is stored: a message published with
/// no listeners vanishes, and listeners that fall behind drop messages.
pub struct UnixSocketBus {
    root: PathBuf,
    seq: AtomicU64,
}

impl UnixSocketBus {
    /// Bus rooted at the default runtime directory.
    pub fn new() -> Self {
        Self::with_root(default_root())
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            seq: AtomicU64::new(0),
        }
    }

    fn channel_dir(&self, channel: &str) -> PathBuf {
        self.root.join(channel)
    }
}

impl Default for UnixSocketBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Prefers XDG_RUNTIME_DIR (typically /run/user/<uid>/, mode 0700).
/// Falls back to /tmp if not set.
fn default_root() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join("gatehouse-bus")
}

#[async_trait]
impl NotificationBus for UnixSocketBus {
    async fn publish(&self, channel: &str, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_DATAGRAM {
            return Err(GatehouseError::TransportUnavailable {
                reason: format!("payload of {} bytes exceeds datagram limit", payload.len()),
            });
        }

        let dir = self.channel_dir(channel);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            // No directory means no listener ever registered on this
            // channel; the message is dropped, as the bus contract allows.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(GatehouseError::TransportUnavailable {
                    reason: format!("cannot enumerate {}: {}", dir.display(), e),
                })
            }
        };

        let sender =
            UnixDatagram::unbound().map_err(|e| GatehouseError::TransportUnavailable {
                reason: format!("cannot create datagram socket: {}", e),
            })?;

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("sock") {
                continue;
            }
            match sender.send_to(payload, &path).await {
                Ok(_) => {}
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotFound
                    ) =>
                {
                    // A dead subscriber leaves its socket file behind;
                    // unlink it so the channel directory stays bounded.
                    tracing::warn!("removing stale bus socket {}", path.display());
                    let _ = std::fs::remove_file(&path);
                }
                Err(e) => {
                    tracing::debug!("bus send to {} failed: {}", path.display(), e);
                }
            }
        }

        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<BusSubscription> {
        let dir = self.channel_dir(channel);
        std::fs::create_dir_all(&dir).map_err(|e| GatehouseError::TransportUnavailable {
            reason: format!("cannot create {}: {}", dir.display(), e),
        })?;

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("{}-{}.sock", std::process::id(), seq));
        if path.exists() {
            let _ = std::fs::remove_file(&path);
        }

        let socket =
            UnixDatagram::bind(&path).map_err(|e| GatehouseError::TransportUnavailable {
                reason: format!("cannot bind {}: {}", path.display(), e),
            })?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                tokio::select! {
                    received = socket.recv(&mut buf) => match received {
                        Ok(len) => {
                            if tx.send(buf[..len].to_vec()).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!("bus socket read failed: {}", e);
                            break;
                        }
                    },
                    _ = tx.closed() => break,
                }
            }
            let _ = std::fs::remove_file(&path);
        });

        Ok(BusSubscription::new(rx))
    }
}
