use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GatehouseError, Result};
use crate::protocol::channel::DEFAULT_CHANNEL_PREFIX;

/// Coordination protocol configuration.
///
/// Every knob has a default; a missing config file yields `Self::default()`.
/// Sweep cadence and the dedup window are injected here rather than living
/// in a process-wide timer, so each coordinator instance owns its own
/// lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Per-request deadline in seconds. Default: 60.
    #[serde(default = "default_approval_timeout")]
    pub approval_timeout_secs: u64,

    /// Health threshold: pending requests above this count mean requests
    /// are piling up faster than they are resolved. Default: 5.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,

    /// Health threshold: maximum queue of requests not yet taken for
    /// display. Default: 10.
    #[serde(default = "default_max_undisplayed")]
    pub max_undisplayed_backlog: usize,

    /// How long a `tool_use_id` is remembered to reject re-delivered
    /// duplicates, in seconds. Default: 300.
    #[serde(default = "default_dedup_window")]
    pub dedup_window_secs: u64,

    /// Health threshold: a request outstanding longer than this means the
    /// decision surface itself has stalled. Stricter than the per-request
    /// timeout. Default: 600.
    #[serde(default = "default_stuck_threshold")]
    pub stuck_threshold_secs: u64,

    /// Cadence of the timeout/dedup sweep, in seconds. Default: 2.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Resolve every inbound request with `allow` immediately, bypassing
    /// the human decision path entirely. Default: false.
    #[serde(default)]
    pub auto_approve: bool,

    /// Channel name prefix. Default: "Gatehouse".
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,

    /// Append terminal approval outcomes to this JSONL file. Off when
    /// unset.
    #[serde(default)]
    pub audit_log: Option<PathBuf>,
}

fn default_approval_timeout() -> u64 {
    60
}
fn default_max_concurrent() -> usize {
    5
}
fn default_max_undisplayed() -> usize {
    10
}
fn default_dedup_window() -> u64 {
    300
}
fn default_stuck_threshold() -> u64 {
    600
}
fn default_sweep_interval() -> u64 {
    2
}
fn default_channel_prefix() -> String {
    DEFAULT_CHANNEL_PREFIX.to_string()
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            approval_timeout_secs: default_approval_timeout(),
            max_concurrent_requests: default_max_concurrent(),
            max_undisplayed_backlog: default_max_undisplayed(),
            dedup_window_secs: default_dedup_window(),
            stuck_threshold_secs: default_stuck_threshold(),
            sweep_interval_secs: default_sweep_interval(),
            auto_approve: false,
            channel_prefix: default_channel_prefix(),
            audit_log: None,
        }
    }
}

impl ApprovalConfig {
    /// Load from a YAML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&contents).map_err(|e| GatehouseError::ConfigParse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}
