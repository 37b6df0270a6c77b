//! Tests for configuration defaults and the YAML loader.

use std::path::Path;

use tempfile::TempDir;

use gatehouse::config::ApprovalConfig;
use gatehouse::error::GatehouseError;

#[test]
fn defaults_match_the_documented_values() {
    let config = ApprovalConfig::default();

    assert_eq!(config.approval_timeout_secs, 60);
    assert_eq!(config.max_concurrent_requests, 5);
    assert_eq!(config.max_undisplayed_backlog, 10);
    assert_eq!(config.dedup_window_secs, 300);
    assert_eq!(config.stuck_threshold_secs, 600);
    assert_eq!(config.sweep_interval_secs, 2);
    assert!(!config.auto_approve);
    assert_eq!(config.channel_prefix, "Gatehouse");
    assert!(config.audit_log.is_none());
}

#[test]
fn missing_file_yields_defaults() {
    let config = ApprovalConfig::load(Path::new("/nonexistent/gatehouse.yml")).unwrap();
    assert_eq!(config.approval_timeout_secs, 60);
}

#[test]
fn partial_file_keeps_defaults_for_unset_fields() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("gatehouse.yml");
    std::fs::write(
        &path,
        "approval_timeout_secs: 5\nauto_approve: true\nchannel_prefix: Acme\n",
    )
    .unwrap();

    let config = ApprovalConfig::load(&path).unwrap();
    assert_eq!(config.approval_timeout_secs, 5);
    assert!(config.auto_approve);
    assert_eq!(config.channel_prefix, "Acme");
    // Untouched fields keep their defaults.
    assert_eq!(config.max_concurrent_requests, 5);
    assert_eq!(config.dedup_window_secs, 300);
}

#[test]
fn invalid_yaml_is_a_config_parse_error() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("gatehouse.yml");
    std::fs::write(&path, "approval_timeout_secs: [not, a, number]\n").unwrap();

    let err = ApprovalConfig::load(&path).unwrap_err();
    assert!(matches!(err, GatehouseError::ConfigParse { .. }));
}

#[test]
fn sweep_interval_never_goes_below_one_second() {
    let config = ApprovalConfig {
        sweep_interval_secs: 0,
        ..ApprovalConfig::default()
    };
    assert_eq!(config.sweep_interval().as_secs(), 1);
}
