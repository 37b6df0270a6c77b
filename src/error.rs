use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum GatehouseError {
    #[error("approval request timed out after {timeout_secs}s")]
    RequestTimedOut { timeout_secs: u64 },

    #[error("approval request cancelled: {reason}")]
    RequestCancelled { reason: String },

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("processing error: {reason}")]
    ProcessingError { reason: String },

    #[error("transport unavailable: {reason}")]
    TransportUnavailable { reason: String },

    #[error("config parse error in {path}: {reason}")]
    ConfigParse { path: PathBuf, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GatehouseError>;
