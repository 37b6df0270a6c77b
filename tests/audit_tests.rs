//! Tests for the JSONL audit trail.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use gatehouse::audit::{AuditLog, AuditRecord};
use gatehouse::bus::memory::MemoryBus;
use gatehouse::bus::NotificationBus;
use gatehouse::config::ApprovalConfig;
use gatehouse::coordinator::Coordinator;
use gatehouse::protocol::channel::ChannelNames;
use gatehouse::protocol::ApprovalRequest;

fn record(tool_use_id: &str, outcome: &str) -> AuditRecord {
    AuditRecord {
        tool_use_id: tool_use_id.into(),
        tool_name: "Bash".into(),
        outcome: outcome.into(),
        message: None,
        decided_at: Utc::now(),
    }
}

#[test]
fn append_and_read_back() {
    let tmp = TempDir::new().unwrap();
    let log = AuditLog::open(tmp.path().join("audit.jsonl"));

    log.append(&record("t1", "approved")).unwrap();
    log.append(&record("t2", "denied")).unwrap();

    let records = log.read_all().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].tool_use_id, "t1");
    assert_eq!(records[1].outcome, "denied");
}

#[test]
fn missing_file_reads_empty() {
    let tmp = TempDir::new().unwrap();
    let log = AuditLog::open(tmp.path().join("never-written.jsonl"));
    assert!(log.read_all().unwrap().is_empty());
}

#[test]
fn malformed_lines_are_skipped() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("audit.jsonl");
    let log = AuditLog::open(&path);

    log.append(&record("t1", "approved")).unwrap();
    std::fs::write(
        &path,
        format!(
            "{}\nnot json\n\n",
            std::fs::read_to_string(&path).unwrap().trim_end()
        ),
    )
    .unwrap();
    log.append(&record("t2", "timed_out")).unwrap();

    let records = log.read_all().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].tool_use_id, "t1");
    assert_eq!(records[1].tool_use_id, "t2");
}

#[tokio::test]
async fn coordinator_records_terminal_outcomes() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("audit.jsonl");

    let bus: Arc<dyn NotificationBus> = Arc::new(MemoryBus::new());
    let channels = ChannelNames::legacy("Test");
    let coordinator = Coordinator::spawn(
        bus.clone(),
        channels.clone(),
        ApprovalConfig::default(),
        Some(AuditLog::open(&path)),
    )
    .await
    .unwrap();

    let mut input = BTreeMap::new();
    input.insert("command".to_string(), "ls".to_string());
    let envelope = ApprovalRequest::new("Bash", input, "t1").encode().unwrap();
    bus.publish(&channels.request, &envelope).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while coordinator.get_status("t1").await.unwrap().is_none() {
        assert!(tokio::time::Instant::now() < deadline, "request never arrived");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    coordinator.approve("t1").await.unwrap();

    let log = AuditLog::open(&path);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let records = log.read_all().unwrap();
        if !records.is_empty() {
            assert_eq!(records[0].tool_use_id, "t1");
            assert_eq!(records[0].outcome, "approved");
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "audit record never written");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
