//! Tests for the cross-process unix datagram bus and instance isolation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use gatehouse::bus::unix::UnixSocketBus;
use gatehouse::bus::NotificationBus;
use gatehouse::config::ApprovalConfig;
use gatehouse::coordinator::Coordinator;
use gatehouse::initiator::ApprovalClient;
use gatehouse::protocol::channel::{ChannelNames, InstanceId};
use gatehouse::protocol::ApprovalRequest;

async fn recv_with_timeout(
    subscription: &mut gatehouse::bus::BusSubscription,
) -> Option<Vec<u8>> {
    tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .ok()
        .flatten()
}

async fn expect_silence(subscription: &mut gatehouse::bus::BusSubscription) {
    let outcome =
        tokio::time::timeout(Duration::from_millis(300), subscription.recv()).await;
    assert!(outcome.is_err(), "unexpected payload delivered");
}

// ---------------------------------------------------------------------------
// Datagram fan-out
// ---------------------------------------------------------------------------

#[tokio::test]
async fn publish_reaches_a_subscriber() {
    let tmp = TempDir::new().unwrap();
    let bus = UnixSocketBus::with_root(tmp.path());

    let mut subscription = bus.subscribe("TestChannel").await.unwrap();
    bus.publish("TestChannel", b"hello").await.unwrap();

    assert_eq!(recv_with_timeout(&mut subscription).await.unwrap(), b"hello");
}

#[tokio::test]
async fn publish_reaches_every_subscriber() {
    let tmp = TempDir::new().unwrap();
    let bus = UnixSocketBus::with_root(tmp.path());

    let mut first = bus.subscribe("TestChannel").await.unwrap();
    let mut second = bus.subscribe("TestChannel").await.unwrap();
    bus.publish("TestChannel", b"broadcast").await.unwrap();

    assert_eq!(recv_with_timeout(&mut first).await.unwrap(), b"broadcast");
    assert_eq!(recv_with_timeout(&mut second).await.unwrap(), b"broadcast");
}

#[tokio::test]
async fn publish_with_no_listener_is_dropped_silently() {
    let tmp = TempDir::new().unwrap();
    let bus = UnixSocketBus::with_root(tmp.path());

    // Never subscribed: no channel directory, nothing to deliver to.
    bus.publish("NobodyListening", b"gone").await.unwrap();

    // Late subscriber does not observe earlier traffic.
    let mut subscription = bus.subscribe("NobodyListening").await.unwrap();
    expect_silence(&mut subscription).await;
}

#[tokio::test]
async fn channels_are_isolated() {
    let tmp = TempDir::new().unwrap();
    let bus = UnixSocketBus::with_root(tmp.path());

    let mut a = bus.subscribe("ChannelA").await.unwrap();
    bus.publish("ChannelB", b"for b only").await.unwrap();

    expect_silence(&mut a).await;
}

#[tokio::test]
async fn oversized_payload_is_refused() {
    let tmp = TempDir::new().unwrap();
    let bus = UnixSocketBus::with_root(tmp.path());
    let _subscription = bus.subscribe("TestChannel").await.unwrap();

    let payload = vec![0u8; 70_000];
    let err = bus.publish("TestChannel", &payload).await.unwrap_err();
    assert!(matches!(
        err,
        gatehouse::error::GatehouseError::TransportUnavailable { .. }
    ));
}

#[tokio::test]
async fn stale_sockets_are_unlinked_on_publish() {
    let tmp = TempDir::new().unwrap();
    let bus = UnixSocketBus::with_root(tmp.path());

    let mut live = bus.subscribe("TestChannel").await.unwrap();

    // A subscriber that died without cleanup: bound socket, no reader.
    let stale_path = tmp.path().join("TestChannel").join("99999-0.sock");
    let stale = std::os::unix::net::UnixDatagram::bind(&stale_path).unwrap();
    drop(stale);
    assert!(stale_path.exists());

    bus.publish("TestChannel", b"ping").await.unwrap();
    assert_eq!(recv_with_timeout(&mut live).await.unwrap(), b"ping");
    assert!(!stale_path.exists(), "stale socket was not removed");
}

// ---------------------------------------------------------------------------
// Cross-instance isolation, end to end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_instances_never_observe_each_others_traffic() {
    let tmp = TempDir::new().unwrap();
    let bus: Arc<dyn NotificationBus> = Arc::new(UnixSocketBus::with_root(tmp.path()));

    let instance_a: InstanceId = "100-1".parse().unwrap();
    let instance_b: InstanceId = "100-2".parse().unwrap();
    let channels_a = ChannelNames::scoped("Gatehouse", Some(&instance_a));
    let channels_b = ChannelNames::scoped("Gatehouse", Some(&instance_b));

    let config_a = ApprovalConfig {
        auto_approve: true,
        ..ApprovalConfig::default()
    };
    // Instance B never approves; if A's client heard B's coordinator (or
    // vice versa) the assertions below would flip.
    let config_b = ApprovalConfig::default();

    let _coordinator_a = Coordinator::spawn(bus.clone(), channels_a.clone(), config_a.clone(), None)
        .await
        .unwrap();
    let coordinator_b = Coordinator::spawn(bus.clone(), channels_b.clone(), config_b.clone(), None)
        .await
        .unwrap();

    let client_a = ApprovalClient::connect(bus.clone(), channels_a, &config_a)
        .await
        .unwrap();

    let mut input = BTreeMap::new();
    input.insert("command".to_string(), "ls".to_string());
    let response = client_a
        .request_approval_with(
            ApprovalRequest::new("Bash", input, "t1"),
            Duration::from_secs(5),
            None,
        )
        .await
        .unwrap();
    assert!(response.is_allowed());

    // B saw nothing: no pending entry, no dedup hit.
    assert!(coordinator_b.pending_requests().await.unwrap().is_empty());
    assert_eq!(coordinator_b.get_status("t1").await.unwrap(), None);
}
