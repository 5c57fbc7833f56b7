//! Concurrent ingestion
//!
//! Packets for the same entity race on the store; `last_seen` must end at
//! the newest timestamp and the entity must be created exactly once.

use std::sync::Arc;

use futures::future::join_all;
use heartwatch::EntityStatus;
use heartwatch::actors::receiver::{IngestReport, ReceiverHandle};
use heartwatch::storage::StatusStore;

use crate::helpers::*;

#[tokio::test]
async fn test_concurrent_reordered_heartbeats_keep_newest() {
    let p = Pipeline::in_memory();

    // Interleave old and new timestamps.
    let packets: Vec<Vec<u8>> = (0..40)
        .map(|i| if i % 2 == 0 { START + i } else { START - i })
        .map(|ts| seal_json(&heartbeat("DEVICE-X", ts), &p.key))
        .collect();

    let reports: Vec<IngestReport> = join_all(
        packets
            .iter()
            .map(|packet| p.ingestor.handle_datagram(packet)),
    )
    .await
    .into_iter()
    .map(Result::unwrap)
    .collect();

    assert_eq!(reports.iter().map(|r| r.created).sum::<usize>(), 1);

    let device = p.store.get_entity_state("DEVICE-X").await.unwrap().unwrap();
    assert_eq!(device.last_seen, START + 38);
    assert_eq!(device.status, EntityStatus::Online);

    p.monitor.check_now().await.unwrap();
    assert_eq!(p.pending().await, 1);

    p.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_devices_in_parallel() {
    let p = Arc::new(Pipeline::in_memory());

    let tasks: Vec<_> = (0..50)
        .map(|i| {
            let p = p.clone();
            tokio::spawn(async move {
                p.send(&heartbeat(&format!("host-{i:02}"), START)).await
            })
        })
        .collect();

    for task in join_all(tasks).await {
        assert_eq!(task.unwrap().unwrap().created, 1);
    }

    assert_eq!(p.store.list_entities().await.unwrap().len(), 50);

    p.monitor.check_now().await.unwrap();
    assert_eq!(p.pending().await, 50);
}

#[tokio::test]
async fn test_udp_receiver_counts_datagrams() {
    let p = Pipeline::in_memory();
    let Pipeline {
        key,
        store,
        monitor,
        dispatcher,
        ingestor,
        ..
    } = p;

    let receiver = ReceiverHandle::bind("127.0.0.1:0".parse().unwrap(), ingestor)
        .await
        .unwrap();
    let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();

    for name in ["a", "b", "c"] {
        socket
            .send_to(&seal_json(&heartbeat(name, START), &key), receiver.local_addr)
            .await
            .unwrap();
    }
    socket
        .send_to(b"garbage", receiver.local_addr)
        .await
        .unwrap();

    let mut stats = receiver.get_stats().await.unwrap();
    for _ in 0..100 {
        if stats.received == 4 && stats.in_flight == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        stats = receiver.get_stats().await.unwrap();
    }

    let stats = receiver.shutdown().await.unwrap();
    assert_eq!(stats.received, 4);
    assert_eq!(stats.accepted, 3);
    assert_eq!(stats.rejected, 1);
    assert_eq!(store.list_entities().await.unwrap().len(), 3);

    monitor.shutdown().await.unwrap();
    dispatcher.shutdown().await.unwrap();
}
