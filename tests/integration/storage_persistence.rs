//! Restart behaviour with the SQLite store
//!
//! Entities, statuses and cooldowns survive a restart, so a device that was
//! already known is not announced again.

use std::path::Path;
use std::sync::Arc;

use heartwatch::clock::ManualClock;
use heartwatch::storage::StatusStore;
use heartwatch::storage::sqlite::SqliteStore;
use heartwatch::{EntityStatus, EventType};
use tempfile::TempDir;

use crate::helpers::*;

async fn open(path: &Path, now: i64) -> Pipeline {
    let store = SqliteStore::new(path).await.unwrap();
    Pipeline::new(Arc::new(store), vec![], ManualClock::new(now))
}

async fn stop(p: Pipeline) {
    let store = p.store.clone();
    p.shutdown().await;
    store.close().await.unwrap();
}

#[tokio::test]
async fn test_restart_does_not_repeat_new_entity() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("heartwatch.db");

    let p = open(&db, START).await;
    assert_eq!(p.send(&heartbeat("DEVICE-X", START)).await.unwrap().created, 1);
    p.monitor.check_now().await.unwrap();
    assert_eq!(p.pending().await, 1);
    stop(p).await;

    let p = open(&db, START + 10).await;
    assert_eq!(
        p.send(&heartbeat("DEVICE-X", START + 10)).await.unwrap().created,
        0
    );
    p.monitor.check_now().await.unwrap();
    assert_eq!(p.pending().await, 0);
    assert_eq!(
        p.store
            .get_last_alert_sent_at("DEVICE-X", EventType::NewEntity)
            .await
            .unwrap(),
        Some(START)
    );
    stop(p).await;
}

#[tokio::test]
async fn test_offline_status_and_cooldown_survive_restart() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("heartwatch.db");

    let p = open(&db, START).await;
    p.send(&heartbeat("nas", START)).await.unwrap();
    p.clock.advance(301);
    p.monitor.check_now().await.unwrap();
    p.clock.advance(120);
    assert_eq!(p.monitor.check_now().await.unwrap().alerts_queued, 1);
    stop(p).await;

    // Still offline after the restart: no new transition, no new alert.
    let p = open(&db, START + 600).await;
    let device = p.store.get_entity_state("nas").await.unwrap().unwrap();
    assert_eq!(device.status, EntityStatus::Offline);
    let sweep = p.monitor.check_now().await.unwrap();
    assert_eq!(sweep.transitions, 0);
    assert_eq!(p.pending().await, 0);

    // Recovery is still detected and alerted.
    p.send(&heartbeat("nas", START + 600)).await.unwrap();
    assert_eq!(p.monitor.check_now().await.unwrap().transitions, 1);
    p.clock.advance(120);
    assert_eq!(p.monitor.check_now().await.unwrap().alerts_queued, 1);
    assert_eq!(
        p.store
            .get_last_alert_sent_at("nas", EventType::Offline)
            .await
            .unwrap(),
        Some(START + 421)
    );
    stop(p).await;
}
