//! Alert delivery to HTTP sinks
//!
//! Uses wiremock servers as Discord and webhook endpoints.

use std::sync::Arc;

use heartwatch::EventType;
use heartwatch::clock::ManualClock;
use heartwatch::sinks::{RegisteredSink, SinkConfig, SinkFilter, SinkKind};
use heartwatch::storage::{MemoryStore, StatusStore};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

fn sink(name: &str, url: String, kind: SinkKind, filter: SinkFilter) -> RegisteredSink {
    let config = SinkConfig {
        name: name.to_string(),
        url,
        kind,
        user_id: None,
        filter,
    };
    RegisteredSink::from_config(&config, reqwest::Client::new())
}

#[tokio::test]
async fn test_alerts_reach_matching_sinks() {
    let discord = MockServer::start().await;
    let webhook = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/discord"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&discord)
        .await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(body_partial_json(json!({"entity_key": "DEVICE-X"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&webhook)
        .await;

    Mock::given(method("POST"))
        .and(path("/printers"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&webhook)
        .await;

    let sinks = vec![
        sink(
            "discord",
            format!("{}/discord", discord.uri()),
            SinkKind::Discord,
            SinkFilter {
                events: vec![EventType::Offline],
                ..Default::default()
            },
        ),
        sink(
            "ops-hook",
            format!("{}/hook", webhook.uri()),
            SinkKind::Webhook,
            SinkFilter {
                entities: vec!["device-*".to_string()],
                ..Default::default()
            },
        ),
        sink(
            "printers",
            format!("{}/printers", webhook.uri()),
            SinkKind::Webhook,
            SinkFilter {
                entities: vec!["printer-*".to_string()],
                ..Default::default()
            },
        ),
    ];

    let p = Pipeline::new(Arc::new(MemoryStore::new()), sinks, ManualClock::new(START));
    let store = p.store.clone();

    p.send(&heartbeat("DEVICE-X", START)).await.unwrap();
    p.monitor.check_now().await.unwrap();
    assert_eq!(p.dispatcher.flush_now().await.unwrap(), 1);

    p.clock.advance(301);
    p.monitor.check_now().await.unwrap();
    p.clock.advance(120);
    p.monitor.check_now().await.unwrap();

    // Shutdown flushes the offline alert and waits for both deliveries.
    let stats = p.shutdown().await;
    assert_eq!(stats.delivered, 3);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.aborted, 0);

    let records = store.recent_deliveries(10).await.unwrap();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.success));
    assert_eq!(
        records
            .iter()
            .filter(|r| r.event_type == EventType::Offline)
            .count(),
        2
    );
}

#[tokio::test]
async fn test_failing_sink_is_recorded_and_others_still_deliver() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let sinks = vec![
        sink(
            "broken",
            format!("{}/broken", server.uri()),
            SinkKind::Webhook,
            SinkFilter::default(),
        ),
        sink(
            "ok",
            format!("{}/ok", server.uri()),
            SinkKind::Webhook,
            SinkFilter::default(),
        ),
    ];

    let p = Pipeline::new(Arc::new(MemoryStore::new()), sinks, ManualClock::new(START));
    let store = p.store.clone();

    p.send(&heartbeat("router", START)).await.unwrap();
    p.monitor.check_now().await.unwrap();

    let stats = p.shutdown().await;
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.failed, 1);

    let records = store.recent_deliveries(10).await.unwrap();
    let broken = records.iter().find(|r| r.sink_name == "broken").unwrap();
    assert!(!broken.success);
    assert_eq!(broken.event_type, EventType::NewEntity);
    assert_eq!(
        broken.error.as_deref(),
        Some("delivery failed with status 500: boom")
    );

    // The failure does not reopen the cooldown.
    assert_eq!(
        store
            .get_last_alert_sent_at("router", EventType::NewEntity)
            .await
            .unwrap(),
        Some(START)
    );
}
