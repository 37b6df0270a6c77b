use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::bus::NotificationBus;
use crate::config::ApprovalConfig;
use crate::error::{GatehouseError, Result};
use crate::protocol::channel::ChannelNames;
use crate::protocol::{
    ApprovalRequest, ApprovalResponse, Behavior, CANCELLED_MESSAGE_PREFIX,
    TIMED_OUT_MESSAGE_PREFIX,
};

/// Cancellation signal shared between a caller and any number of in-flight
/// [`ApprovalClient::request_approval_with`] calls. Cloning shares the
/// signal; `cancel` wakes every waiter holding a clone.
#[derive(Clone)]
pub struct CancelToken {
    state: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            state: Arc::new(watch::channel(false).0),
        }
    }

    pub fn cancel(&self) {
        let _ = self.state.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.state.subscribe();
        if *rx.borrow_and_update() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow_and_update() {
                return;
            }
        }
        // The sender half lives in `self`, so the channel cannot close
        // while this future is borrowed from it.
        std::future::pending().await
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// The tool-execution side of the protocol.
///
/// Publishes approval requests and blocks the calling tool pipeline until a
/// correlated reply arrives, the timeout elapses, or the call is cancelled.
/// Owns only its local waiter table, keyed by `tool_use_id`; the only
/// interaction with the coordinator is the envelope exchange.
pub struct ApprovalClient {
    bus: Arc<dyn NotificationBus>,
    channels: ChannelNames,
    default_timeout: Duration,
    waiters: Arc<DashMap<String, oneshot::Sender<ApprovalResponse>>>,
    router: JoinHandle<()>,
}

impl ApprovalClient {
    /// Subscribe to the response channel and start the correlation router.
    pub async fn connect(
        bus: Arc<dyn NotificationBus>,
        channels: ChannelNames,
        config: &ApprovalConfig,
    ) -> Result<Self> {
        let mut subscription = bus.subscribe(&channels.response).await?;
        let waiters: Arc<DashMap<String, oneshot::Sender<ApprovalResponse>>> =
            Arc::new(DashMap::new());

        let router_waiters = waiters.clone();
        let router = tokio::spawn(async move {
            while let Some(bytes) = subscription.recv().await {
                let response = match ApprovalResponse::decode(&bytes) {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::warn!("dropping malformed response envelope: {}", e);
                        continue;
                    }
                };
                // A response without a waiter is a re-delivered duplicate
                // or belongs to a call that already completed; drop it.
                // Removing the entry before sending makes delivery
                // exactly-once per waiter.
                if let Some((_, tx)) = router_waiters.remove(&response.tool_use_id) {
                    let _ = tx.send(response);
                }
            }
        });

        Ok(Self {
            bus,
            channels,
            default_timeout: config.approval_timeout(),
            waiters,
            router,
        })
    }

    /// [`request_approval_with`](Self::request_approval_with) using the
    /// configured default timeout and no cancellation token.
    pub async fn request_approval(&self, request: ApprovalRequest) -> Result<ApprovalResponse> {
        self.request_approval_with(request, self.default_timeout, None)
            .await
    }

    /// Publish `request` and suspend until exactly one of: a correlated
    /// response arrives (returned, including denials), the timeout elapses
    /// (`RequestTimedOut`), or `cancel` fires (`RequestCancelled`).
    ///
    /// The waiter is registered before the publish, closing the race where
    /// a reply arrives before the waiter exists, and is removed on every
    /// exit path so repeated calls with fresh ids do not leak.
    pub async fn request_approval_with(
        &self,
        request: ApprovalRequest,
        timeout: Duration,
        cancel: Option<&CancelToken>,
    ) -> Result<ApprovalResponse> {
        request.validate()?;
        let tool_use_id = request.tool_use_id.clone();

        let (tx, rx) = oneshot::channel();
        match self.waiters.entry(tool_use_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(GatehouseError::InvalidRequest {
                    reason: format!("tool_use_id {tool_use_id} already has a request in flight"),
                });
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }

        let envelope = match request.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                self.waiters.remove(&tool_use_id);
                return Err(e);
            }
        };
        // A failed publish fails the call immediately rather than waiting
        // out the timeout.
        if let Err(e) = self.bus.publish(&self.channels.request, &envelope).await {
            self.waiters.remove(&tool_use_id);
            return Err(e);
        }

        let outcome = tokio::select! {
            outcome = rx => outcome,
            _ = tokio::time::sleep(timeout) => {
                self.waiters.remove(&tool_use_id);
                return Err(GatehouseError::RequestTimedOut {
                    timeout_secs: timeout.as_secs(),
                });
            }
            _ = maybe_cancelled(cancel) => {
                self.waiters.remove(&tool_use_id);
                return Err(GatehouseError::RequestCancelled {
                    reason: "cancelled by caller".into(),
                });
            }
        };

        match outcome {
            Ok(response) => classify(response),
            // The waiter was dropped without a response: cancel_all.
            Err(_) => Err(GatehouseError::RequestCancelled {
                reason: "all pending approvals were cancelled".into(),
            }),
        }
    }

    /// Force-resolve every outstanding call with `RequestCancelled`,
    /// without requiring the coordinator to cooperate.
    pub fn cancel_all(&self) {
        // Dropping the senders wakes every waiter.
        self.waiters.clear();
    }

    /// Number of calls currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.waiters.len()
    }
}

impl Drop for ApprovalClient {
    fn drop(&mut self) {
        self.router.abort();
    }
}

async fn maybe_cancelled(cancel: Option<&CancelToken>) {
    match cancel {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

/// The wire carries only allow/deny, so the coordinator's synthetic denies
/// (timeout sweep, reset) are recognized by their conventional message
/// prefix and surfaced as the typed failures the caller is promised.
/// Ordinary denials, human or policy, come back as responses.
fn classify(response: ApprovalResponse) -> Result<ApprovalResponse> {
    if response.behavior == Behavior::Deny {
        if let Some(message) = &response.message {
            if message.starts_with(TIMED_OUT_MESSAGE_PREFIX) {
                // The message reads "... after {N}s"; recover the
                // coordinator's deadline for the error it maps to.
                let timeout_secs = message
                    .trim_start_matches(TIMED_OUT_MESSAGE_PREFIX)
                    .trim_start_matches(" after ")
                    .trim_end_matches('s')
                    .parse()
                    .unwrap_or(0);
                return Err(GatehouseError::RequestTimedOut { timeout_secs });
            }
            if message.starts_with(CANCELLED_MESSAGE_PREFIX) {
                return Err(GatehouseError::RequestCancelled {
                    reason: message.clone(),
                });
            }
        }
    }
    Ok(response)
}
