use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::protocol::{ApprovalRequest, ApprovalResponse};

/// Per-request lifecycle. Transitions are one-directional: `Pending` moves
/// to exactly one of the terminal variants and never changes again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalStatus {
    Pending,
    Approved(ApprovalResponse),
    Denied(ApprovalResponse),
    Cancelled,
    TimedOut,
}

impl ApprovalStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, ApprovalStatus::Pending)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_pending()
    }

    /// Short tag for logs and audit records.
    pub fn label(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved(_) => "approved",
            ApprovalStatus::Denied(_) => "denied",
            ApprovalStatus::Cancelled => "cancelled",
            ApprovalStatus::TimedOut => "timed_out",
        }
    }
}

/// Coordinator-internal state for one registered request.
///
/// Owned exclusively by the coordinator task; the status is checked and set
/// only there, which is what makes the terminal transition exactly-once.
#[derive(Debug, Clone)]
pub struct PendingApproval {
    pub request: ApprovalRequest,
    pub enqueued_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub displayed: bool,
    pub status: ApprovalStatus,
}

/// Time-bounded record of recently-seen request identifiers, kept solely to
/// reject redundant re-delivery of the same broadcast.
#[derive(Debug, Default)]
pub struct DedupCache {
    entries: HashMap<String, DateTime<Utc>>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `tool_use_id` if unseen. Returns `false` when the id is
    /// already present, i.e. the envelope is a duplicate.
    pub fn insert(&mut self, tool_use_id: &str, now: DateTime<Utc>) -> bool {
        match self.entries.entry(tool_use_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    pub fn contains(&self, tool_use_id: &str) -> bool {
        self.entries.contains_key(tool_use_id)
    }

    /// Drop entries older than `window` so memory stays bounded over a
    /// long-running session.
    pub fn purge_older_than(&mut self, window: Duration, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::seconds(window.as_secs() as i64);
        self.entries.retain(|_, first_seen| *first_seen > cutoff);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
