use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;

use crate::bus::unix::UnixSocketBus;
use crate::config::ApprovalConfig;
use crate::error::{GatehouseError, Result};
use crate::initiator::ApprovalClient;
use crate::protocol::channel::ChannelNames;
use crate::protocol::ApprovalRequest;

#[derive(Debug, Args)]
pub struct RequestArgs {
    /// Tool name, e.g. Bash.
    #[arg(long)]
    pub tool: String,

    /// Tool arguments as key=value, repeatable.
    #[arg(long = "arg", value_name = "KEY=VALUE")]
    pub args: Vec<String>,

    /// Correlation id; generated when omitted.
    #[arg(long)]
    pub tool_use_id: Option<String>,

    /// Seconds to wait for a decision.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Config file (YAML). Defaults apply when absent.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Submit one approval request over the unix bus and wait for the outcome.
/// Exit code 0 on allow, 1 on deny, 2 when no decision was obtained.
pub async fn run(args: RequestArgs) -> Result<i32> {
    let config = match &args.config {
        Some(path) => ApprovalConfig::load(path)?,
        None => ApprovalConfig::default(),
    };
    // Scoped names when a coordinator propagated its instance id, legacy
    // names otherwise.
    let channels = ChannelNames::from_env(&config.channel_prefix);

    let mut input = BTreeMap::new();
    for pair in &args.args {
        match pair.split_once('=') {
            Some((key, value)) => {
                input.insert(key.to_string(), value.to_string());
            }
            None => {
                return Err(GatehouseError::InvalidRequest {
                    reason: format!("argument must be key=value: {pair}"),
                })
            }
        }
    }

    let tool_use_id = args
        .tool_use_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let request = ApprovalRequest::new(args.tool.as_str(), input, tool_use_id.as_str());

    let bus = Arc::new(UnixSocketBus::new());
    let client = ApprovalClient::connect(bus, channels, &config).await?;
    let timeout = args
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.approval_timeout());

    eprintln!(
        "gatehouse: requesting approval for {} ({})",
        args.tool, tool_use_id
    );
    match client.request_approval_with(request, timeout, None).await {
        Ok(response) if response.is_allowed() => {
            println!("allow");
            if let Some(updated) = &response.updated_input {
                for (key, value) in updated {
                    println!("  {key}={value}");
                }
            }
            Ok(0)
        }
        Ok(response) => {
            println!(
                "deny: {}",
                response.message.as_deref().unwrap_or("no reason given")
            );
            Ok(1)
        }
        Err(GatehouseError::RequestTimedOut { timeout_secs }) => {
            eprintln!("gatehouse: no decision after {timeout_secs}s");
            Ok(2)
        }
        Err(e) => Err(e),
    }
}
