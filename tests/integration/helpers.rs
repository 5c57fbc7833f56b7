//! Shared fixtures for the integration tests

use std::sync::Arc;
use std::time::Duration;

use heartwatch::actors::dispatcher::{DispatcherConfig, DispatcherHandle};
use heartwatch::actors::messages::DispatcherStats;
use heartwatch::actors::monitor::{MonitorConfig, MonitorHandle};
use heartwatch::actors::receiver::{IngestConfig, IngestReport, Ingestor};
use heartwatch::clock::ManualClock;
use heartwatch::codec::{KEY_SIZE, SharedKey, seal_random};
use heartwatch::error::IngestResult;
use heartwatch::sinks::RegisteredSink;
use heartwatch::storage::{MemoryStore, StatusStore};
use serde_json::{Value, json};

/// Arbitrary fixed start time
pub const START: i64 = 1_700_000_000;

pub const HOUR: Duration = Duration::from_secs(3600);

pub fn zero_key() -> SharedKey {
    SharedKey::new([0; KEY_SIZE])
}

pub fn seal_json(value: &Value, key: &SharedKey) -> Vec<u8> {
    seal_random(&serde_json::to_vec(value).unwrap(), key).unwrap()
}

pub fn heartbeat(name: &str, timestamp: i64) -> Value {
    json!({
        "name": name,
        "timestamp": timestamp,
        "network_interfaces": [{"name": "eth0"}],
        "os": "Linux"
    })
}

/// Ingestor, monitor and dispatcher wired around one store and one clock
///
/// The monitor never sweeps on its own and the dispatcher never flushes on
/// its own; tests drive both explicitly.
pub struct Pipeline {
    pub key: SharedKey,
    pub clock: ManualClock,
    pub store: Arc<dyn StatusStore>,
    pub dispatcher: DispatcherHandle,
    pub monitor: MonitorHandle,
    pub ingestor: Ingestor,
}

impl Pipeline {
    pub fn new(store: Arc<dyn StatusStore>, sinks: Vec<RegisteredSink>, clock: ManualClock) -> Self {
        let key = zero_key();
        let dispatcher = DispatcherHandle::spawn(
            DispatcherConfig {
                batch_delay: HOUR,
                ..Default::default()
            },
            sinks,
            store.clone(),
            Arc::new(clock.clone()),
        );
        let monitor = MonitorHandle::spawn(
            MonitorConfig {
                check_interval: HOUR,
                ..Default::default()
            },
            store.clone(),
            dispatcher.clone(),
            Arc::new(clock.clone()),
        );
        let ingestor = Ingestor::new(
            key.clone(),
            store.clone(),
            monitor.clone(),
            Arc::new(clock.clone()),
            IngestConfig::default(),
        );

        Self {
            key,
            clock,
            store,
            dispatcher,
            monitor,
            ingestor,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), vec![], ManualClock::new(START))
    }

    pub async fn send(&self, message: &Value) -> IngestResult<IngestReport> {
        self.ingestor
            .handle_datagram(&seal_json(message, &self.key))
            .await
    }

    /// Alerts handed to the dispatcher and not flushed yet
    pub async fn pending(&self) -> usize {
        self.dispatcher.get_stats().await.unwrap().pending
    }

    pub async fn shutdown(self) -> DispatcherStats {
        self.monitor.shutdown().await.unwrap();
        self.dispatcher.shutdown().await.unwrap()
    }
}
