use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::audit::AuditLog;
use crate::bus::unix::UnixSocketBus;
use crate::cli::truncate;
use crate::config::ApprovalConfig;
use crate::coordinator::{Coordinator, CoordinatorHandle, PendingRequestInfo};
use crate::error::Result;
use crate::protocol::channel::{ChannelNames, InstanceId};
use crate::protocol::ApprovalRequest;

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Config file (YAML). Defaults apply when absent.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Resolve every request with allow immediately.
    #[arg(long)]
    pub auto_approve: bool,

    /// Use the unscoped legacy channel names.
    #[arg(long)]
    pub legacy_channels: bool,

    /// Append decisions to this JSONL file.
    #[arg(long)]
    pub audit: Option<PathBuf>,
}

/// Run a coordinator on the unix bus, driven from stdin.
pub async fn run(args: ServeArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => ApprovalConfig::load(path)?,
        None => ApprovalConfig::default(),
    };
    if args.auto_approve {
        config.auto_approve = true;
    }
    if args.audit.is_some() {
        config.audit_log = args.audit.clone();
    }

    let channels = if args.legacy_channels {
        ChannelNames::legacy(&config.channel_prefix)
    } else {
        let instance = InstanceId::current();
        let (key, value) = instance.env_pair();
        eprintln!("gatehouse: instance {value}");
        eprintln!("gatehouse: export {key}={value} for worker processes");
        ChannelNames::scoped(&config.channel_prefix, Some(&instance))
    };

    let audit = config.audit_log.clone().map(AuditLog::open);
    let bus = Arc::new(UnixSocketBus::new());
    let auto_approve = config.auto_approve;
    let coordinator = Coordinator::spawn(bus, channels, config, audit).await?;

    if auto_approve {
        eprintln!("gatehouse: auto-approving all requests; Ctrl+C to stop");
        tokio::signal::ctrl_c().await?;
        coordinator.shutdown().await;
        return Ok(());
    }

    eprintln!("gatehouse: commands: y <id> | n <id> [reason] | list | health | reset | quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut display = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            _ = display.tick() => {
                for request in coordinator.take_undisplayed(16).await? {
                    print_request(&request);
                }
                let health = coordinator.health().await?;
                if !health.healthy {
                    eprintln!("gatehouse: degraded: {}", health.reasons.join("; "));
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&coordinator, line.trim()).await? {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    coordinator.shutdown().await;
    Ok(())
}

async fn handle_line(coordinator: &CoordinatorHandle, line: &str) -> Result<bool> {
    let mut parts = line.splitn(3, ' ');
    match parts.next().unwrap_or("") {
        "" => {}
        "y" | "approve" => match parts.next() {
            Some(id) => {
                let applied = coordinator.approve(id).await?;
                report(id, applied, "approved");
            }
            None => eprintln!("usage: y <tool_use_id>"),
        },
        "n" | "deny" => match parts.next() {
            Some(id) => {
                let reason = parts.next().unwrap_or("denied by operator");
                let applied = coordinator.deny(id, reason).await?;
                report(id, applied, "denied");
            }
            None => eprintln!("usage: n <tool_use_id> [reason]"),
        },
        "list" => {
            let pending = coordinator.pending_requests().await?;
            if pending.is_empty() {
                println!("No pending requests.");
            }
            for info in &pending {
                print_pending(info);
            }
        }
        "health" => {
            let health = coordinator.health().await?;
            println!(
                "healthy: {}\n  pending: {}\n  undisplayed: {}\n  oldest: {}",
                health.healthy,
                health.pending_count,
                health.undisplayed_count,
                health
                    .oldest_pending_secs
                    .map(|s| format!("{s}s"))
                    .unwrap_or_else(|| "-".into()),
            );
            for reason in &health.reasons {
                println!("  degraded: {reason}");
            }
        }
        "reset" => {
            let cancelled = coordinator.reset_state().await?;
            eprintln!("gatehouse: reset, cancelled {cancelled} pending request(s)");
        }
        "quit" | "exit" => return Ok(false),
        other => eprintln!("gatehouse: unknown command: {other}"),
    }
    Ok(true)
}

fn report(id: &str, applied: bool, verb: &str) {
    if applied {
        eprintln!("gatehouse: {verb} {id}");
    } else {
        eprintln!("gatehouse: {id} is not pending (already resolved, timed out, or unknown)");
    }
}

fn print_request(request: &ApprovalRequest) {
    println!(
        "ID: {}\n  Tool: {}\n  Input: {}",
        request.tool_use_id,
        request.tool_name,
        truncate(&format_input(request), 120),
    );
    if let Some(context) = &request.context {
        println!("  Context: {}", truncate(&context.description, 120));
    }
}

fn print_pending(info: &PendingRequestInfo) {
    println!(
        "ID: {}\n  Tool: {}\n  Input: {}\n  Queued: {}\n  Displayed: {}",
        info.request.tool_use_id,
        info.request.tool_name,
        truncate(&format_input(&info.request), 80),
        info.enqueued_at,
        info.displayed,
    );
}

fn format_input(request: &ApprovalRequest) -> String {
    request
        .input
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(" ")
}
