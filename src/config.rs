use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::trace;

use crate::actors::dispatcher::DispatcherConfig;
use crate::actors::monitor::MonitorConfig;
use crate::actors::receiver::IngestConfig;
use crate::alerting::{AlertPolicy, DEFAULT_COOLDOWN, DEFAULT_GRACE_PERIOD};
use crate::codec::SharedKey;
use crate::detector::DEFAULT_ONLINE_THRESHOLD;
use crate::message::DEFAULT_MAX_MESSAGE_AGE;
use crate::sinks::SinkConfig;
use crate::util;

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (state and cooldowns are lost on restart)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./heartwatch.db")
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// UDP address to receive on
    #[serde(default = "util::get_default_listen")]
    pub listen: SocketAddr,

    /// Base64 shared key (overridden by `HEARTWATCH_KEY`)
    pub key: Option<String>,

    #[serde(default = "default_max_message_age")]
    pub max_message_age_seconds: i64,

    #[serde(default = "default_online_threshold")]
    pub online_threshold_seconds: i64,

    #[serde(default = "default_check_interval")]
    pub check_interval_seconds: u64,

    #[serde(default = "default_grace_period")]
    pub grace_period_seconds: i64,

    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: i64,

    #[serde(default = "default_batch_delay")]
    pub batch_delay_seconds: u64,

    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_seconds: u64,

    #[serde(default = "default_max_concurrent_deliveries")]
    pub max_concurrent_deliveries: usize,

    #[serde(default = "default_max_concurrent_packets")]
    pub max_concurrent_packets: usize,

    #[serde(default = "default_store_timeout")]
    pub store_timeout_seconds: u64,

    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,

    #[serde(default)]
    pub sinks: Vec<SinkConfig>,

    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_max_message_age() -> i64 {
    DEFAULT_MAX_MESSAGE_AGE
}

fn default_online_threshold() -> i64 {
    DEFAULT_ONLINE_THRESHOLD
}

fn default_check_interval() -> u64 {
    60
}

fn default_grace_period() -> i64 {
    DEFAULT_GRACE_PERIOD
}

fn default_cooldown() -> i64 {
    DEFAULT_COOLDOWN
}

fn default_batch_delay() -> u64 {
    30
}

fn default_delivery_timeout() -> u64 {
    5
}

fn default_max_concurrent_deliveries() -> usize {
    8
}

fn default_max_concurrent_packets() -> usize {
    64
}

fn default_store_timeout() -> u64 {
    5
}

fn default_shutdown_grace() -> u64 {
    10
}

impl Config {
    /// Let `HEARTWATCH_KEY` and `HEARTWATCH_LISTEN` win over the file
    pub fn apply_env(&mut self) {
        if let Some(key) = util::get_key() {
            self.key = Some(key);
        }
        if let Some(listen) = util::get_listen() {
            self.listen = listen;
        }
    }

    pub fn shared_key(&self) -> anyhow::Result<SharedKey> {
        let encoded = self
            .key
            .as_deref()
            .context("no shared key configured (set `key` or HEARTWATCH_KEY)")?;
        SharedKey::from_base64(encoded).context("invalid shared key")
    }

    pub fn policy(&self) -> AlertPolicy {
        AlertPolicy {
            grace_period: self.grace_period_seconds,
            cooldown: self.cooldown_seconds,
        }
    }

    fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_seconds)
    }

    fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            max_message_age: self.max_message_age_seconds,
            store_timeout: self.store_timeout(),
            max_concurrent_packets: self.max_concurrent_packets,
            shutdown_grace: self.shutdown_grace(),
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            check_interval: Duration::from_secs(self.check_interval_seconds.max(1)),
            online_threshold: self.online_threshold_seconds,
            policy: self.policy(),
            store_timeout: self.store_timeout(),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            batch_delay: Duration::from_secs(self.batch_delay_seconds),
            delivery_timeout: Duration::from_secs(self.delivery_timeout_seconds),
            max_concurrent_deliveries: self.max_concurrent_deliveries,
            shutdown_grace: self.shutdown_grace(),
            store_timeout: self.store_timeout(),
        }
    }
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    serde_json::from_str(content)
        .context("Invalid configuration file provided!")
        .inspect(|config: &Config| {
            trace!(
                "loaded config: listen {}, {} sinks, storage {:?}",
                config.listen,
                config.sinks.len(),
                config.storage
            )
        })
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file `{path}`"))?;
    parse_config(&file_content)
}
