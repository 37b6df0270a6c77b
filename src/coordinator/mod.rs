pub mod health;
pub mod pending;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use crate::audit::{AuditLog, AuditRecord};
use crate::bus::{BusSubscription, NotificationBus};
use crate::config::ApprovalConfig;
use crate::error::{GatehouseError, Result};
use crate::protocol::channel::ChannelNames;
use crate::protocol::{
    ApprovalRequest, ApprovalResponse, Behavior, CANCELLED_MESSAGE_PREFIX,
    TIMED_OUT_MESSAGE_PREFIX,
};

pub use health::HealthReport;
pub use pending::{ApprovalStatus, DedupCache, PendingApproval};

const COMMAND_BUFFER: usize = 64;

/// Summary of one pending request, reported in arrival order.
#[derive(Debug, Clone)]
pub struct PendingRequestInfo {
    pub request: ApprovalRequest,
    pub enqueued_at: DateTime<Utc>,
    pub displayed: bool,
}

enum Command {
    Resolve {
        tool_use_id: String,
        behavior: Behavior,
        updated_input: Option<BTreeMap<String, String>>,
        message: Option<String>,
        reply: oneshot::Sender<bool>,
    },
    Reset {
        reply: oneshot::Sender<usize>,
    },
    GetStatus {
        tool_use_id: String,
        reply: oneshot::Sender<Option<ApprovalStatus>>,
    },
    Health {
        reply: oneshot::Sender<HealthReport>,
    },
    Pending {
        reply: oneshot::Sender<Vec<PendingRequestInfo>>,
    },
    TakeUndisplayed {
        limit: usize,
        reply: oneshot::Sender<Vec<ApprovalRequest>>,
    },
    Shutdown,
}

/// The serialized approval authority.
///
/// One tokio task owns the pending registry, display queue, and dedup
/// cache; inbound envelopes, resolutions, the timeout sweep, and reset are
/// all linearized through it, so every request sees exactly one terminal
/// transition. There is no lock-guarded shared map.
pub struct Coordinator;

impl Coordinator {
    /// Subscribe to the request channel and start the coordinator task.
    pub async fn spawn(
        bus: Arc<dyn NotificationBus>,
        channels: ChannelNames,
        config: ApprovalConfig,
        audit: Option<AuditLog>,
    ) -> Result<CoordinatorHandle> {
        let subscription = bus.subscribe(&channels.request).await?;
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let actor = Actor {
            bus,
            channels,
            config,
            audit,
            pending: HashMap::new(),
            order: Vec::new(),
            dedup: DedupCache::new(),
        };
        tokio::spawn(actor.run(subscription, command_rx));
        Ok(CoordinatorHandle { commands })
    }
}

/// Cloneable handle to a running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<Command>,
}

impl CoordinatorHandle {
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    /// Transition a pending request to approved/denied and publish the
    /// response. Idempotent: an unknown or already-resolved `tool_use_id`
    /// is a no-op returning `false`.
    pub async fn resolve(
        &self,
        tool_use_id: &str,
        behavior: Behavior,
        updated_input: Option<BTreeMap<String, String>>,
        message: Option<String>,
    ) -> Result<bool> {
        let tool_use_id = tool_use_id.to_string();
        self.call(|reply| Command::Resolve {
            tool_use_id,
            behavior,
            updated_input,
            message,
            reply,
        })
        .await
    }

    pub async fn approve(&self, tool_use_id: &str) -> Result<bool> {
        self.resolve(tool_use_id, Behavior::Allow, None, None).await
    }

    pub async fn deny(&self, tool_use_id: &str, message: impl Into<String>) -> Result<bool> {
        self.resolve(tool_use_id, Behavior::Deny, None, Some(message.into()))
            .await
    }

    /// Cancel every pending request (each initiator observes a deny with a
    /// cancellation message) and clear the registry and dedup cache.
    /// Always succeeds; returns the number of requests cancelled.
    pub async fn reset_state(&self) -> Result<usize> {
        self.call(|reply| Command::Reset { reply }).await
    }

    /// `Some(Pending)` while the request is registered, `None` once it is
    /// unknown or has reached a terminal state.
    pub async fn get_status(&self, tool_use_id: &str) -> Result<Option<ApprovalStatus>> {
        let tool_use_id = tool_use_id.to_string();
        self.call(|reply| Command::GetStatus { tool_use_id, reply })
            .await
    }

    pub async fn health(&self) -> Result<HealthReport> {
        self.call(|reply| Command::Health { reply }).await
    }

    pub async fn is_healthy(&self) -> Result<bool> {
        Ok(self.health().await?.healthy)
    }

    /// Pending requests in arrival order.
    pub async fn pending_requests(&self) -> Result<Vec<PendingRequestInfo>> {
        self.call(|reply| Command::Pending { reply }).await
    }

    /// Drain up to `limit` not-yet-displayed requests, in arrival order,
    /// marking them displayed. Feeds the decision surface.
    pub async fn take_undisplayed(&self, limit: usize) -> Result<Vec<ApprovalRequest>> {
        self.call(|reply| Command::TakeUndisplayed { limit, reply })
            .await
    }

    /// Stop the coordinator task. Pending requests are not resolved; use
    /// [`reset_state`](Self::reset_state) first for a clean stop.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

fn stopped() -> GatehouseError {
    GatehouseError::ProcessingError {
        reason: "coordinator stopped".into(),
    }
}

struct Actor {
    bus: Arc<dyn NotificationBus>,
    channels: ChannelNames,
    config: ApprovalConfig,
    audit: Option<AuditLog>,
    pending: HashMap<String, PendingApproval>,
    /// Arrival order of the ids in `pending`.
    order: Vec<String>,
    dedup: DedupCache,
}

impl Actor {
    async fn run(mut self, inbound: BusSubscription, mut commands: mpsc::Receiver<Command>) {
        let mut inbound = Some(inbound);
        let mut sweep = tokio::time::interval(self.config.sweep_interval());
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!(
            request_channel = %self.channels.request,
            response_channel = %self.channels.response,
            "coordinator listening"
        );

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                envelope = recv_some(&mut inbound) => match envelope {
                    Some(bytes) => self.on_inbound(&bytes).await,
                    None => {
                        tracing::warn!("request channel subscription closed");
                        inbound = None;
                    }
                },
                _ = sweep.tick() => self.sweep(Utc::now()).await,
            }
        }
        tracing::info!("coordinator stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Resolve {
                tool_use_id,
                behavior,
                updated_input,
                message,
                reply,
            } => {
                let applied = self
                    .resolve(&tool_use_id, behavior, updated_input, message)
                    .await;
                let _ = reply.send(applied);
            }
            Command::Reset { reply } => {
                let cancelled = self.reset().await;
                let _ = reply.send(cancelled);
            }
            Command::GetStatus { tool_use_id, reply } => {
                let status = self.pending.get(&tool_use_id).map(|e| e.status.clone());
                let _ = reply.send(status);
            }
            Command::Health { reply } => {
                let report = health::evaluate(self.pending.values(), &self.config, Utc::now());
                let _ = reply.send(report);
            }
            Command::Pending { reply } => {
                let infos = self
                    .order
                    .iter()
                    .filter_map(|id| self.pending.get(id))
                    .map(|e| PendingRequestInfo {
                        request: e.request.clone(),
                        enqueued_at: e.enqueued_at,
                        displayed: e.displayed,
                    })
                    .collect();
                let _ = reply.send(infos);
            }
            Command::TakeUndisplayed { limit, reply } => {
                let _ = reply.send(self.take_undisplayed(limit));
            }
            Command::Shutdown => unreachable!("handled in run"),
        }
    }

    /// Inbound request envelope from the bus: drop malformed payloads and
    /// duplicates, auto-approve when configured, otherwise register and
    /// wait for a decision.
    async fn on_inbound(&mut self, bytes: &[u8]) {
        let request = match ApprovalRequest::decode(bytes) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("dropping malformed request envelope: {}", e);
                return;
            }
        };

        let now = Utc::now();
        if !self.dedup.insert(&request.tool_use_id, now) {
            tracing::debug!(tool_use_id = %request.tool_use_id, "dropping duplicate request");
            return;
        }

        if self.config.auto_approve {
            let response =
                ApprovalResponse::allow(&request.tool_use_id).with_message("auto-approved");
            self.publish_response(&response).await;
            self.record_audit(&request, "approved", response.message.as_deref());
            return;
        }

        tracing::info!(
            tool_use_id = %request.tool_use_id,
            tool = %request.tool_name,
            "approval request registered"
        );
        let deadline = now + chrono::Duration::seconds(self.config.approval_timeout_secs as i64);
        self.order.push(request.tool_use_id.clone());
        self.pending.insert(
            request.tool_use_id.clone(),
            PendingApproval {
                request,
                enqueued_at: now,
                deadline,
                displayed: false,
                status: ApprovalStatus::Pending,
            },
        );
    }

    /// Remove the entry iff it is still pending. All terminal transitions
    /// funnel through here, so each request leaves the registry exactly
    /// once, by exactly one of resolution, timeout, or reset.
    fn take_pending(&mut self, tool_use_id: &str) -> Option<PendingApproval> {
        if !self
            .pending
            .get(tool_use_id)
            .map(|e| e.status.is_pending())
            .unwrap_or(false)
        {
            return None;
        }
        self.order.retain(|id| id != tool_use_id);
        self.pending.remove(tool_use_id)
    }

    async fn resolve(
        &mut self,
        tool_use_id: &str,
        behavior: Behavior,
        updated_input: Option<BTreeMap<String, String>>,
        message: Option<String>,
    ) -> bool {
        let Some(mut entry) = self.take_pending(tool_use_id) else {
            return false;
        };

        let mut response = ApprovalResponse {
            tool_use_id: tool_use_id.to_string(),
            behavior,
            updated_input,
            message,
        };
        // A denial must always explain itself to the tool-execution side.
        if behavior == Behavior::Deny && response.message.is_none() {
            response.message = Some("denied by coordinator".into());
        }

        entry.status = match behavior {
            Behavior::Allow => ApprovalStatus::Approved(response.clone()),
            Behavior::Deny => ApprovalStatus::Denied(response.clone()),
        };

        tracing::info!(tool_use_id = %tool_use_id, behavior = %behavior, "approval resolved");
        self.publish_response(&response).await;
        self.record_audit(&entry.request, entry.status.label(), response.message.as_deref());
        true
    }

    /// Expire pending entries past their deadline and purge aged dedup
    /// entries. Runs on the coordinator task, so it cannot race a
    /// foreground resolution.
    async fn sweep(&mut self, now: DateTime<Utc>) {
        let expired: Vec<String> = self
            .order
            .iter()
            .filter(|id| {
                self.pending
                    .get(*id)
                    .map(|e| e.deadline <= now)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        for tool_use_id in expired {
            let Some(mut entry) = self.take_pending(&tool_use_id) else {
                continue;
            };
            entry.status = ApprovalStatus::TimedOut;
            let response = ApprovalResponse::deny(
                &tool_use_id,
                format!(
                    "{} after {}s",
                    TIMED_OUT_MESSAGE_PREFIX, self.config.approval_timeout_secs
                ),
            );
            tracing::info!(tool_use_id = %tool_use_id, "approval request timed out");
            self.publish_response(&response).await;
            self.record_audit(&entry.request, entry.status.label(), response.message.as_deref());
        }

        self.dedup.purge_older_than(self.config.dedup_window(), now);
    }

    /// Cancel every pending request, then clear the registry and dedup
    /// cache. Performs no fallible I/O beyond best-effort publishes, so it
    /// always succeeds.
    async fn reset(&mut self) -> usize {
        let ids = self.order.clone();
        let mut cancelled = 0usize;

        for tool_use_id in ids {
            let Some(mut entry) = self.take_pending(&tool_use_id) else {
                continue;
            };
            entry.status = ApprovalStatus::Cancelled;
            let response = ApprovalResponse::deny(
                &tool_use_id,
                format!("{}: coordinator state was reset", CANCELLED_MESSAGE_PREFIX),
            );
            self.publish_response(&response).await;
            self.record_audit(&entry.request, entry.status.label(), response.message.as_deref());
            cancelled += 1;
        }

        self.pending.clear();
        self.order.clear();
        self.dedup.clear();
        tracing::info!(cancelled, "coordinator state reset");
        cancelled
    }

    fn take_undisplayed(&mut self, limit: usize) -> Vec<ApprovalRequest> {
        let mut taken = Vec::new();
        for id in &self.order {
            if taken.len() == limit {
                break;
            }
            if let Some(entry) = self.pending.get_mut(id) {
                if !entry.displayed {
                    entry.displayed = true;
                    taken.push(entry.request.clone());
                }
            }
        }
        taken
    }

    /// Best-effort: the transport may drop the response, in which case the
    /// initiator's own timeout takes over.
    async fn publish_response(&self, response: &ApprovalResponse) {
        let envelope = match response.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(tool_use_id = %response.tool_use_id, "cannot encode response: {}", e);
                return;
            }
        };
        if let Err(e) = self.bus.publish(&self.channels.response, &envelope).await {
            tracing::warn!(tool_use_id = %response.tool_use_id, "response publish failed: {}", e);
        }
    }

    fn record_audit(&self, request: &ApprovalRequest, outcome: &str, message: Option<&str>) {
        if let Some(audit) = &self.audit {
            let record = AuditRecord {
                tool_use_id: request.tool_use_id.clone(),
                tool_name: request.tool_name.clone(),
                outcome: outcome.to_string(),
                message: message.map(String::from),
                decided_at: Utc::now(),
            };
            if let Err(e) = audit.append(&record) {
                tracing::warn!("audit append failed: {}", e);
            }
        }
    }
}

async fn recv_some(inbound: &mut Option<BusSubscription>) -> Option<Vec<u8>> {
    match inbound {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}
