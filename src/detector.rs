//! Status transition detection
//!
//! Offline is only observable as the absence of packets, so status is derived
//! from `last_seen` on a timer rather than from incoming samples. The
//! detector itself is pure; the monitor actor applies its output to the store.

use serde_json::{Value, json};

use crate::storage::EntityState;
use crate::{EntityStatus, EntityType};

/// Default liveness threshold in seconds
pub const DEFAULT_ONLINE_THRESHOLD: i64 = 300;

/// A status that differs from what is stored
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub entity_key: String,
    pub entity_type: EntityType,
    pub from: EntityStatus,
    pub to: EntityStatus,

    /// When the flip was observed
    pub at: i64,
    pub last_seen: i64,
    pub metadata: Value,
}

impl Transition {
    /// Rendering context handed to sinks
    pub fn context(&self) -> Value {
        json!({
            "last_seen": self.last_seen,
            "previous_status": self.from,
            "metadata": self.metadata,
        })
    }
}

/// Liveness as of `now`
///
/// A `last_seen` in the future (sender clock ahead) is a negative age and
/// therefore online.
pub fn current_status(last_seen: i64, now: i64, threshold: i64) -> EntityStatus {
    if now.saturating_sub(last_seen) < threshold {
        EntityStatus::Online
    } else {
        EntityStatus::Offline
    }
}

/// Compare every entity's derived status with its stored one
pub fn detect(entities: &[EntityState], now: i64, threshold: i64) -> Vec<Transition> {
    entities
        .iter()
        .filter_map(|entity| {
            let current = current_status(entity.last_seen, now, threshold);
            (current != entity.status).then(|| Transition {
                entity_key: entity.entity_key.clone(),
                entity_type: entity.entity_type,
                from: entity.status,
                to: current,
                at: now,
                last_seen: entity.last_seen,
                metadata: entity.metadata.clone(),
            })
        })
        .collect()
}
