//! Unit tests for envelope types, wire encoding, and channel scoping.

use std::collections::BTreeMap;

use gatehouse::error::GatehouseError;
use gatehouse::protocol::channel::{ChannelNames, InstanceId, INSTANCE_ENV_VAR};
use gatehouse::protocol::{
    ApprovalRequest, ApprovalResponse, Behavior, RequestContext, RiskLevel,
};

fn bash_request(tool_use_id: &str) -> ApprovalRequest {
    let mut input = BTreeMap::new();
    input.insert("command".to_string(), "ls -la".to_string());
    ApprovalRequest::new("Bash", input, tool_use_id)
}

// ---------------------------------------------------------------------------
// Request envelopes
// ---------------------------------------------------------------------------

#[test]
fn request_wire_fields_are_snake_case() {
    let request = bash_request("t1");
    let json = String::from_utf8(request.encode().unwrap()).unwrap();

    assert!(json.contains("\"tool_name\":\"Bash\""));
    assert!(json.contains("\"tool_use_id\":\"t1\""));
    assert!(json.contains("\"command\":\"ls -la\""));
    // Absent context must be omitted, not serialized as null.
    assert!(!json.contains("context"));
}

#[test]
fn request_decode_roundtrip_with_context() {
    let request = bash_request("t2").with_context(RequestContext {
        description: "list the project directory".into(),
        risk: RiskLevel::Low,
        sensitive: false,
        affected_resources: vec![".".into()],
    });

    let decoded = ApprovalRequest::decode(&request.encode().unwrap()).unwrap();
    assert_eq!(decoded, request);
    assert_eq!(decoded.context.as_ref().unwrap().risk, RiskLevel::Low);
}

#[test]
fn request_decode_rejects_missing_required_fields() {
    let err = ApprovalRequest::decode(br#"{"input": {}, "tool_use_id": "t1"}"#).unwrap_err();
    assert!(matches!(err, GatehouseError::InvalidRequest { .. }));

    let err =
        ApprovalRequest::decode(br#"{"tool_name": "Bash", "input": {}, "tool_use_id": ""}"#)
            .unwrap_err();
    assert!(matches!(err, GatehouseError::InvalidRequest { .. }));
}

#[test]
fn request_decode_rejects_garbage() {
    let err = ApprovalRequest::decode(b"not json at all").unwrap_err();
    assert!(matches!(err, GatehouseError::InvalidRequest { .. }));
}

// ---------------------------------------------------------------------------
// Response envelopes
// ---------------------------------------------------------------------------

#[test]
fn behavior_serializes_lowercase() {
    let response = ApprovalResponse::allow("t1");
    let json = String::from_utf8(response.encode().unwrap()).unwrap();
    assert!(json.contains("\"behavior\":\"allow\""));

    let response = ApprovalResponse::deny("t1", "nope");
    let json = String::from_utf8(response.encode().unwrap()).unwrap();
    assert!(json.contains("\"behavior\":\"deny\""));
    assert!(json.contains("\"message\":\"nope\""));
}

#[test]
fn response_decode_roundtrip_with_updated_input() {
    let mut updated = BTreeMap::new();
    updated.insert("command".to_string(), "ls".to_string());
    let response = ApprovalResponse::allow("t3").with_updated_input(updated);

    let decoded = ApprovalResponse::decode(&response.encode().unwrap()).unwrap();
    assert_eq!(decoded, response);
    assert!(decoded.is_allowed());
    assert_eq!(
        decoded.updated_input.unwrap().get("command").unwrap(),
        "ls"
    );
}

#[test]
fn response_decode_rejects_missing_behavior() {
    let err = ApprovalResponse::decode(br#"{"tool_use_id": "t1"}"#).unwrap_err();
    assert!(matches!(err, GatehouseError::InvalidRequest { .. }));
}

#[test]
fn deny_always_carries_a_message() {
    let response = ApprovalResponse::deny("t1", "operation denied");
    assert_eq!(response.behavior, Behavior::Deny);
    assert_eq!(response.message.as_deref(), Some("operation denied"));
}

// ---------------------------------------------------------------------------
// Instance scoping and channel names
// ---------------------------------------------------------------------------

#[test]
fn scoped_channel_names_carry_the_instance_id() {
    let id: InstanceId = "1234-99".parse().unwrap();
    let names = ChannelNames::scoped("Gatehouse", Some(&id));

    assert_eq!(names.request, "GatehouseApprovalRequest_1234-99");
    assert_eq!(names.response, "GatehouseApprovalResponse_1234-99");
}

#[test]
fn missing_instance_selects_legacy_names() {
    let names = ChannelNames::scoped("Gatehouse", None);
    assert_eq!(names.request, "GatehouseApprovalRequest");
    assert_eq!(names.response, "GatehouseApprovalResponse");
    assert_eq!(names, ChannelNames::legacy("Gatehouse"));
}

#[test]
fn distinct_instances_get_distinct_channels() {
    let a: InstanceId = "100-1".parse().unwrap();
    let b: InstanceId = "100-2".parse().unwrap();

    let names_a = ChannelNames::scoped("Gatehouse", Some(&a));
    let names_b = ChannelNames::scoped("Gatehouse", Some(&b));
    assert_ne!(names_a.request, names_b.request);
    assert_ne!(names_a.response, names_b.response);
}

#[test]
fn instance_id_rejects_unsafe_values() {
    assert!("".parse::<InstanceId>().is_err());
    assert!("../escape".parse::<InstanceId>().is_err());
    assert!("has space".parse::<InstanceId>().is_err());
    assert!("ok-1_2.3".parse::<InstanceId>().is_ok());
}

#[test]
fn instance_id_env_pair_uses_the_documented_variable() {
    let id = InstanceId::current();
    let (key, value) = id.env_pair();
    assert_eq!(key, INSTANCE_ENV_VAR);
    assert_eq!(value, id.as_str());
    assert!(value.parse::<InstanceId>().is_ok());
}
