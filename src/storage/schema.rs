//! Stored row types
//!
//! Entities keep a typed core (status, timestamps) plus an opaque JSON
//! `metadata` blob holding whatever the latest sample reported (display name,
//! monitor name, interfaces). The engine never looks inside `metadata`; it is
//! passed through to alert context for rendering.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::Sample;
use crate::{AlertEvent, EntityStatus, EntityType, EventType};

/// Current liveness state of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub entity_key: String,
    pub entity_type: EntityType,
    pub status: EntityStatus,

    /// Sender timestamp of the freshest sample seen so far
    pub last_seen: i64,

    /// When `status` last flipped (updated together with `status`)
    pub last_status_change: i64,

    pub metadata: Value,
}

impl EntityState {
    /// State of an entity created by its first sample
    pub fn from_first_sample(sample: &Sample) -> Self {
        Self {
            entity_key: sample.entity_key.clone(),
            entity_type: sample.entity_type,
            status: EntityStatus::Online,
            last_seen: sample.device_timestamp,
            last_status_change: sample.device_timestamp,
            metadata: sample.payload.clone(),
        }
    }
}

/// Effect of applying a sample to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchOutcome {
    /// First sample for this key; the entity was created online
    Created,

    /// `last_seen` moved forward
    Refreshed,

    /// Sample was not newer than what is stored (reordered or replayed)
    Unchanged,
}

/// Outcome of one delivery attempt to one sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkResult {
    pub sink_name: String,
    pub success: bool,
    pub error: Option<String>,
    pub attempted_at: i64,
}

/// Audit row for a delivery attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub entity_key: String,
    pub entity_type: EntityType,
    pub event_type: EventType,
    pub occurred_at: i64,
    pub sink_name: String,
    pub success: bool,
    pub error: Option<String>,
    pub attempted_at: i64,
}

impl DeliveryRecord {
    pub fn new(alert: &AlertEvent, result: &SinkResult) -> Self {
        Self {
            entity_key: alert.entity_key.clone(),
            entity_type: alert.entity_type,
            event_type: alert.event_type,
            occurred_at: alert.occurred_at,
            sink_name: result.sink_name.clone(),
            success: result.success,
            error: result.error.clone(),
            attempted_at: result.attempted_at,
        }
    }
}
