//! End-to-end liveness scenarios
//!
//! Datagrams go through the real codec, validator and store; the monitor and
//! dispatcher run as actors. Time only moves when a test advances the clock.

use assert_matches::assert_matches;
use heartwatch::alerting::AlertState;
use heartwatch::clock::Clock;
use heartwatch::codec::{KEY_SIZE, SharedKey};
use heartwatch::error::IngestError;
use heartwatch::message::MessageKind;
use heartwatch::storage::StatusStore;
use heartwatch::{EntityStatus, EntityType, EventType};
use serde_json::json;

use crate::helpers::*;

#[tokio::test]
async fn test_device_goes_offline_and_alerts_once_after_grace() {
    let p = Pipeline::in_memory();

    let report = p.send(&heartbeat("DEVICE-X", START)).await.unwrap();
    assert_eq!(report.kind, MessageKind::Heartbeat);
    assert_eq!(report.created, 1);

    let device = p.store.get_entity_state("DEVICE-X").await.unwrap().unwrap();
    assert_eq!(device.entity_type, EntityType::Device);
    assert_eq!(device.status, EntityStatus::Online);
    assert_eq!(device.last_seen, START);

    let sweep = p.monitor.check_now().await.unwrap();
    assert_eq!(sweep.transitions, 0);
    assert_eq!(p.pending().await, 1, "exactly one new_entity alert");

    p.clock.advance(301);
    let sweep = p.monitor.check_now().await.unwrap();
    assert_eq!(sweep.transitions, 1);
    assert_eq!(sweep.alerts_queued, 0);
    let device = p.store.get_entity_state("DEVICE-X").await.unwrap().unwrap();
    assert_eq!(device.status, EntityStatus::Offline);
    assert_eq!(device.last_status_change, START + 301);

    // Still inside the grace period.
    p.clock.advance(119);
    assert_eq!(p.monitor.check_now().await.unwrap().alerts_queued, 0);

    p.clock.advance(1);
    assert_eq!(p.monitor.check_now().await.unwrap().alerts_queued, 1);
    assert_eq!(p.pending().await, 2);
    assert_eq!(
        p.store
            .get_last_alert_sent_at("DEVICE-X", EventType::Offline)
            .await
            .unwrap(),
        Some(START + 421)
    );

    // Further sweeps while it stays offline send nothing.
    p.clock.advance(600);
    assert_eq!(p.monitor.check_now().await.unwrap().alerts_queued, 0);
    assert_eq!(p.pending().await, 2);

    p.shutdown().await;
}

#[tokio::test]
async fn test_recovery_alerts_online_and_cooldown_blocks_repeat_offline() {
    let p = Pipeline::in_memory();
    p.send(&heartbeat("nas", START)).await.unwrap();

    p.clock.advance(301);
    p.monitor.check_now().await.unwrap();
    p.clock.advance(120);
    assert_eq!(p.monitor.check_now().await.unwrap().alerts_queued, 1);

    // Back online.
    let report = p.send(&heartbeat("nas", p.clock.now())).await.unwrap();
    assert_eq!(report.created, 0);
    assert_eq!(p.monitor.check_now().await.unwrap().transitions, 1);
    p.clock.advance(120);
    assert_eq!(p.monitor.check_now().await.unwrap().alerts_queued, 1);
    assert_eq!(
        p.store.get_entity_state("nas").await.unwrap().unwrap().status,
        EntityStatus::Online
    );

    // Offline again well inside the hour-long cooldown of the first offline alert.
    p.clock.advance(301);
    assert_eq!(p.monitor.check_now().await.unwrap().transitions, 1);
    p.clock.advance(120);
    assert_eq!(p.monitor.check_now().await.unwrap().alerts_queued, 0);
    assert_eq!(p.monitor.get_alert_state("nas").await, None);

    // new_entity + offline + online
    assert_eq!(p.pending().await, 3);

    p.shutdown().await;
}

#[tokio::test]
async fn test_flap_within_grace_sends_nothing() {
    let p = Pipeline::in_memory();
    p.send(&heartbeat("printer", START)).await.unwrap();
    p.monitor.check_now().await.unwrap();
    assert_eq!(p.pending().await, 1);

    p.clock.advance(301);
    p.monitor.check_now().await.unwrap();
    assert_matches!(
        p.monitor.get_alert_state("printer").await,
        Some(AlertState::PendingGrace {
            event: EventType::Offline,
            ..
        })
    );

    p.clock.advance(30);
    p.send(&heartbeat("printer", p.clock.now())).await.unwrap();
    let sweep = p.monitor.check_now().await.unwrap();
    assert_eq!(sweep.transitions, 1);
    assert_eq!(p.monitor.get_alert_state("printer").await, None);

    p.clock.advance(200);
    p.monitor.check_now().await.unwrap();
    assert_eq!(p.pending().await, 1, "only the new_entity alert");

    p.shutdown().await;
}

#[tokio::test]
async fn test_replayed_and_reordered_heartbeats_create_once() {
    let p = Pipeline::in_memory();

    let mut created = 0;
    for timestamp in [START, START, START - 20, START + 10, START - 5] {
        created += p
            .send(&heartbeat("DEVICE-X", timestamp))
            .await
            .unwrap()
            .created;
    }
    assert_eq!(created, 1);

    p.monitor.check_now().await.unwrap();
    assert_eq!(p.pending().await, 1);
    assert_eq!(
        p.store
            .get_entity_state("DEVICE-X")
            .await
            .unwrap()
            .unwrap()
            .last_seen,
        START + 10
    );

    p.shutdown().await;
}

#[tokio::test]
async fn test_ping_report_tracks_alive_targets_only() {
    let p = Pipeline::in_memory();

    let report = p
        .send(&json!({
            "type": "ping",
            "name": "prober-1",
            "timestamp": START,
            "results": [
                {"ip": "10.0.0.1", "alive": true, "response_time_ms": 1.5},
                {"ip": "10.0.0.2", "alive": false}
            ]
        }))
        .await
        .unwrap();
    assert_eq!(report.kind, MessageKind::Ping);
    assert_eq!(report.samples, 1);
    assert_eq!(report.created, 1);

    let target = p.store.get_entity_state("10.0.0.1").await.unwrap().unwrap();
    assert_eq!(target.entity_type, EntityType::PingTarget);
    assert!(p.store.get_entity_state("10.0.0.2").await.unwrap().is_none());

    p.shutdown().await;
}

#[tokio::test]
async fn test_rejected_datagrams_leave_store_untouched() {
    let p = Pipeline::in_memory();

    let other_key = SharedKey::new([7; KEY_SIZE]);
    let forged = seal_json(&heartbeat("intruder", START), &other_key);
    assert_matches!(
        p.ingestor.handle_datagram(&forged).await,
        Err(IngestError::DecryptionFailed)
    );

    assert_matches!(
        p.ingestor.handle_datagram(&[0u8; 10]).await,
        Err(IngestError::TransportTooShort { len: 10 })
    );

    assert_matches!(
        p.send(&heartbeat("old", START - 300)).await,
        Err(IngestError::Stale { .. })
    );

    assert_matches!(
        p.send(&json!({"timestamp": START})).await,
        Err(IngestError::MissingFields(fields)) if fields == vec!["name"]
    );

    assert!(p.store.list_entities().await.unwrap().is_empty());
    p.monitor.check_now().await.unwrap();
    assert_eq!(p.pending().await, 0);

    p.shutdown().await;
}
