use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::Utc;

/// Environment variable carrying the instance identifier from the
/// coordinator process to any worker process it spawns.
pub const INSTANCE_ENV_VAR: &str = "GATEHOUSE_INSTANCE_ID";

/// Channel prefix used when none is configured.
pub const DEFAULT_CHANNEL_PREFIX: &str = "Gatehouse";

/// Identity of one running copy of the application, derived at process
/// start from the pid and the start timestamp. Both sides must agree on it
/// out-of-band (environment variable) to scope channel names; otherwise two
/// running copies would each react to the other's traffic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceId(String);

static CURRENT: LazyLock<InstanceId> =
    LazyLock::new(|| InstanceId(format!("{}-{}", std::process::id(), Utc::now().timestamp())));

impl InstanceId {
    /// This process's identity, stable for the process lifetime.
    pub fn current() -> InstanceId {
        CURRENT.clone()
    }

    /// Resolve the identity propagated by a parent process, if any.
    pub fn from_env() -> Option<InstanceId> {
        std::env::var(INSTANCE_ENV_VAR)
            .ok()
            .and_then(|v| v.parse().ok())
    }

    /// The `(key, value)` pair to set on spawned worker processes so both
    /// sides derive the same scoped channel names.
    pub fn env_pair(&self) -> (&'static str, &str) {
        (INSTANCE_ENV_VAR, &self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InstanceId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("instance id must not be empty".into());
        }
        // Instance ids end up in channel names and therefore in socket
        // paths; restrict to filesystem-safe characters.
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(format!("invalid instance id: {s}"));
        }
        Ok(InstanceId(s.to_string()))
    }
}

/// The request/response channel name pair used by one instance.
///
/// Scoped names are `<prefix>ApprovalRequest_<id>` and
/// `<prefix>ApprovalResponse_<id>`. Without an instance id the fixed legacy
/// names (no suffix) are used, for peers that predate instance scoping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelNames {
    pub request: String,
    pub response: String,
}

impl ChannelNames {
    pub fn scoped(prefix: &str, instance: Option<&InstanceId>) -> Self {
        match instance {
            Some(id) => Self {
                request: format!("{prefix}ApprovalRequest_{id}"),
                response: format!("{prefix}ApprovalResponse_{id}"),
            },
            None => Self::legacy(prefix),
        }
    }

    pub fn legacy(prefix: &str) -> Self {
        Self {
            request: format!("{prefix}ApprovalRequest"),
            response: format!("{prefix}ApprovalResponse"),
        }
    }

    /// Derive channel names from the environment: scoped when a parent
    /// propagated an instance id, legacy otherwise.
    pub fn from_env(prefix: &str) -> Self {
        Self::scoped(prefix, InstanceId::from_env().as_ref())
    }
}
