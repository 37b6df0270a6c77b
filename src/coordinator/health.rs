use chrono::{DateTime, Utc};

use crate::config::ApprovalConfig;

use super::pending::PendingApproval;

/// Derived, non-persistent judgment of whether the coordinator's backlog
/// and staleness are within bounds. Recomputed on demand, never stored, and
/// never mutates state: timeout sweeping and manual reset are the sole
/// mutators.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub healthy: bool,
    pub pending_count: usize,
    pub undisplayed_count: usize,
    pub oldest_pending_secs: Option<u64>,
    pub reasons: Vec<String>,
}

pub(super) fn evaluate<'a>(
    entries: impl Iterator<Item = &'a PendingApproval>,
    config: &ApprovalConfig,
    now: DateTime<Utc>,
) -> HealthReport {
    let mut pending_count = 0usize;
    let mut undisplayed_count = 0usize;
    let mut oldest_pending_secs: Option<u64> = None;

    for entry in entries {
        pending_count += 1;
        if !entry.displayed {
            undisplayed_count += 1;
        }
        let age = (now - entry.enqueued_at).num_seconds().max(0) as u64;
        if oldest_pending_secs.map_or(true, |oldest| age > oldest) {
            oldest_pending_secs = Some(age);
        }
    }

    let mut reasons = Vec::new();
    if pending_count > config.max_concurrent_requests {
        reasons.push(format!(
            "{} pending requests exceed the limit of {}",
            pending_count, config.max_concurrent_requests
        ));
    }
    if undisplayed_count > config.max_undisplayed_backlog {
        reasons.push(format!(
            "{} undisplayed requests exceed the backlog limit of {}",
            undisplayed_count, config.max_undisplayed_backlog
        ));
    }
    if let Some(oldest) = oldest_pending_secs {
        if oldest > config.stuck_threshold_secs {
            reasons.push(format!(
                "a request has been outstanding for {}s (stuck threshold {}s)",
                oldest, config.stuck_threshold_secs
            ));
        }
    }

    HealthReport {
        healthy: reasons.is_empty(),
        pending_count,
        undisplayed_count,
        oldest_pending_secs,
        reasons,
    }
}
