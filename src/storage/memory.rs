//! In-memory status store (no persistence)
//!
//! Useful for:
//! - Testing without database dependencies
//! - Deployments that accept losing state (and cooldowns) on restart
//!
//! ## Limitations
//!
//! - **No persistence**: all entities and cooldowns are lost on restart, so
//!   every entity is "new" again after a restart
//! - **Bounded audit log**: only the latest delivery attempts are kept

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use super::backend::{HealthStatus, StatusStore};
use super::error::StorageResult;
use super::schema::{DeliveryRecord, EntityState, SinkResult, TouchOutcome};
use crate::message::Sample;
use crate::{AlertEvent, EntityStatus, EventType};

/// Maximum delivery records kept in memory
const MAX_DELIVERY_RECORDS: usize = 1000;

/// In-memory status store
#[derive(Default)]
pub struct MemoryStore {
    entities: RwLock<HashMap<String, EntityState>>,
    cooldowns: RwLock<HashMap<(String, EventType), i64>>,
    deliveries: RwLock<VecDeque<DeliveryRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for MemoryStore {
    async fn get_entity_state(&self, key: &str) -> StorageResult<Option<EntityState>> {
        Ok(self.entities.read().await.get(key).cloned())
    }

    async fn list_entities(&self) -> StorageResult<Vec<EntityState>> {
        let mut entities: Vec<EntityState> =
            self.entities.read().await.values().cloned().collect();
        entities.sort_by(|a, b| a.entity_key.cmp(&b.entity_key));
        Ok(entities)
    }

    async fn touch_entity(&self, sample: &Sample) -> StorageResult<TouchOutcome> {
        let mut entities = self.entities.write().await;

        let Some(existing) = entities.get_mut(&sample.entity_key) else {
            trace!("creating entity {}", sample.entity_key);
            entities.insert(
                sample.entity_key.clone(),
                EntityState::from_first_sample(sample),
            );
            return Ok(TouchOutcome::Created);
        };

        if sample.device_timestamp > existing.last_seen {
            existing.last_seen = sample.device_timestamp;
            existing.metadata = sample.payload.clone();
            Ok(TouchOutcome::Refreshed)
        } else {
            Ok(TouchOutcome::Unchanged)
        }
    }

    async fn upsert_entity_state(&self, state: &EntityState) -> StorageResult<()> {
        self.entities
            .write()
            .await
            .insert(state.entity_key.clone(), state.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        key: &str,
        expected: EntityStatus,
        status: EntityStatus,
        at: i64,
        seen: i64,
    ) -> StorageResult<bool> {
        let mut entities = self.entities.write().await;
        match entities.get_mut(key) {
            Some(entity) if entity.status == expected && entity.last_seen == seen => {
                entity.status = status;
                entity.last_status_change = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_last_alert_sent_at(
        &self,
        key: &str,
        event: EventType,
    ) -> StorageResult<Option<i64>> {
        Ok(self
            .cooldowns
            .read()
            .await
            .get(&(key.to_string(), event))
            .copied())
    }

    async fn mark_alert_sent(&self, key: &str, event: EventType, at: i64) -> StorageResult<()> {
        self.cooldowns
            .write()
            .await
            .insert((key.to_string(), event), at);
        Ok(())
    }

    async fn record_delivery(&self, alert: &AlertEvent, result: &SinkResult) -> StorageResult<()> {
        let mut deliveries = self.deliveries.write().await;
        deliveries.push_back(DeliveryRecord::new(alert, result));
        if deliveries.len() > MAX_DELIVERY_RECORDS {
            deliveries.pop_front();
        }
        Ok(())
    }

    async fn recent_deliveries(&self, limit: usize) -> StorageResult<Vec<DeliveryRecord>> {
        Ok(self
            .deliveries
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                (
                    "entities".to_string(),
                    self.entities.read().await.len().to_string(),
                ),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory store (no-op)");
        Ok(())
    }
}
