pub mod actors;
pub mod alerting;
pub mod clock;
pub mod codec;
pub mod config;
pub mod detector;
pub mod error;
pub mod message;
pub mod sinks;
pub mod storage;
pub mod util;

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of tracked liveness source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Heartbeat sender (keyed by device name)
    Device,

    /// IP probed by a remote ping sweep
    PingTarget,

    /// Web/file check target
    Monitor,

    /// LAN client reported by a UniFi controller (keyed by MAC)
    UnifiClient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Online,
    Offline,
}

/// Kind of alert raised for an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Online,
    Offline,
    NewEntity,
}

impl From<EntityStatus> for EventType {
    fn from(status: EntityStatus) -> Self {
        match status {
            EntityStatus::Online => EventType::Online,
            EntityStatus::Offline => EventType::Offline,
        }
    }
}

/// Notification handed to the dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub entity_type: EntityType,
    pub entity_key: String,
    pub event_type: EventType,

    /// Epoch seconds at which the underlying change happened
    pub occurred_at: i64,

    /// Rendering context passed through verbatim (last_seen, metadata, ...)
    pub context: Value,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityType::Device => write!(f, "device"),
            EntityType::PingTarget => write!(f, "ping_target"),
            EntityType::Monitor => write!(f, "monitor"),
            EntityType::UnifiClient => write!(f, "unifi_client"),
        }
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "device" => Ok(EntityType::Device),
            "ping_target" => Ok(EntityType::PingTarget),
            "monitor" => Ok(EntityType::Monitor),
            "unifi_client" => Ok(EntityType::UnifiClient),
            other => Err(format!("unknown entity type `{other}`")),
        }
    }
}

impl std::fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityStatus::Online => write!(f, "online"),
            EntityStatus::Offline => write!(f, "offline"),
        }
    }
}

impl FromStr for EntityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(EntityStatus::Online),
            "offline" => Ok(EntityStatus::Offline),
            other => Err(format!("unknown entity status `{other}`")),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Online => write!(f, "online"),
            EventType::Offline => write!(f, "offline"),
            EventType::NewEntity => write!(f, "new_entity"),
        }
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(EventType::Online),
            "offline" => Ok(EventType::Offline),
            "new_entity" => Ok(EventType::NewEntity),
            other => Err(format!("unknown event type `{other}`")),
        }
    }
}
