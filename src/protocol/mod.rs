pub mod channel;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{GatehouseError, Result};

/// Message prefix on the synthetic deny published when a request times out
/// at the coordinator. The wire format has no status field beyond
/// allow/deny, so initiators recognize this prefix to surface the typeful
/// timeout failure instead of an ordinary denial.
pub const TIMED_OUT_MESSAGE_PREFIX: &str = "approval request timed out";

/// Message prefix on the synthetic deny published when pending requests are
/// cancelled (coordinator reset). Recognized by initiators like
/// [`TIMED_OUT_MESSAGE_PREFIX`].
pub const CANCELLED_MESSAGE_PREFIX: &str = "approval request cancelled";

/// Risk classification supplied by the requesting tool pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Optional context shown alongside an approval prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub description: String,
    pub risk: RiskLevel,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub affected_resources: Vec<String>,
}

/// A caller's ask for authorization to perform a sensitive tool operation.
///
/// `tool_use_id` is the caller-assigned correlation identifier that links
/// this request to its eventual response across the process boundary. It
/// must be unique; ids are remembered for the dedup window and re-delivered
/// duplicates are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub tool_name: String,
    pub input: BTreeMap<String, String>,
    pub tool_use_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
}

impl ApprovalRequest {
    pub fn new(
        tool_name: impl Into<String>,
        input: BTreeMap<String, String>,
        tool_use_id: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            input,
            tool_use_id: tool_use_id.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Check required fields. Decoded envelopes that fail this are dropped
    /// at the coordinator boundary rather than registered.
    pub fn validate(&self) -> Result<()> {
        if self.tool_use_id.trim().is_empty() {
            return Err(GatehouseError::InvalidRequest {
                reason: "missing tool_use_id".into(),
            });
        }
        if self.tool_name.trim().is_empty() {
            return Err(GatehouseError::InvalidRequest {
                reason: "missing tool_name".into(),
            });
        }
        Ok(())
    }

    /// Serialize to the wire encoding (JSON, snake_case fields).
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode and validate an inbound request envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let request: ApprovalRequest =
            serde_json::from_slice(bytes).map_err(|e| GatehouseError::InvalidRequest {
                reason: format!("malformed request envelope: {}", e),
            })?;
        request.validate()?;
        Ok(request)
    }
}

/// The two resolution behaviors a coordinator can publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Behavior {
    Allow,
    Deny,
}

impl std::fmt::Display for Behavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Behavior::Allow => write!(f, "allow"),
            Behavior::Deny => write!(f, "deny"),
        }
    }
}

/// The coordinator's reply to an [`ApprovalRequest`], correlated by
/// `tool_use_id`. A denied, timed-out, or cancelled approval always carries
/// an explanatory `message` so the tool-execution side can report why the
/// operation did not proceed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub tool_use_id: String,
    pub behavior: Behavior,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_input: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ApprovalResponse {
    pub fn allow(tool_use_id: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            behavior: Behavior::Allow,
            updated_input: None,
            message: None,
        }
    }

    pub fn deny(tool_use_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            behavior: Behavior::Deny,
            updated_input: None,
            message: Some(message.into()),
        }
    }

    pub fn with_updated_input(mut self, input: BTreeMap<String, String>) -> Self {
        self.updated_input = Some(input);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Whether this response authorizes the operation.
    pub fn is_allowed(&self) -> bool {
        self.behavior == Behavior::Allow
    }

    pub fn validate(&self) -> Result<()> {
        if self.tool_use_id.trim().is_empty() {
            return Err(GatehouseError::InvalidRequest {
                reason: "missing tool_use_id".into(),
            });
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode and validate an inbound response envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let response: ApprovalResponse =
            serde_json::from_slice(bytes).map_err(|e| GatehouseError::InvalidRequest {
                reason: format!("malformed response envelope: {}", e),
            })?;
        response.validate()?;
        Ok(response)
    }
}
