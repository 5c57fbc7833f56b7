//! Status store trait definition
//!
//! This module defines the persistence interface consumed by the ingestion
//! path, the monitor actor and the dispatcher.

use std::collections::HashMap;

use async_trait::async_trait;

use super::error::StorageResult;
use super::schema::{DeliveryRecord, EntityState, SinkResult, TouchOutcome};
use crate::message::Sample;
use crate::{AlertEvent, EntityStatus, EventType};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Trait for entity status persistence
///
/// ## Concurrency
///
/// Packets are handled concurrently, so implementations must make the two
/// write paths race-free on their own:
///
/// - `touch_entity` only ever moves `last_seen` forward (compare-and-set on
///   `max(existing, incoming)`), never an unconditional overwrite
/// - `update_status` flips `status` only if the stored status still equals
///   `expected` and `last_seen` still equals the value the decision was
///   based on, and writes `last_status_change` in the same statement
///
/// Implementations must be `Send + Sync` as they are shared across tasks.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Fetch one entity
    async fn get_entity_state(&self, key: &str) -> StorageResult<Option<EntityState>>;

    /// Fetch every known entity (used by the periodic detector sweep)
    async fn list_entities(&self) -> StorageResult<Vec<EntityState>>;

    /// Apply a sample: create the entity if unknown, otherwise advance
    /// `last_seen` (and the stored metadata) iff the sample is newer.
    async fn touch_entity(&self, sample: &Sample) -> StorageResult<TouchOutcome>;

    /// Insert or overwrite an entity wholesale
    async fn upsert_entity_state(&self, state: &EntityState) -> StorageResult<()>;

    /// Compare-and-set status flip
    ///
    /// `seen` is the `last_seen` the detector judged. Returns `false` if the
    /// entity is unknown, its status is no longer `expected`, or a sample
    /// moved `last_seen` since; the next sweep decides again.
    async fn update_status(
        &self,
        key: &str,
        expected: EntityStatus,
        status: EntityStatus,
        at: i64,
        seen: i64,
    ) -> StorageResult<bool>;

    /// When an alert of `event` was last sent for `key`
    async fn get_last_alert_sent_at(&self, key: &str, event: EventType)
    -> StorageResult<Option<i64>>;

    /// Record that an alert of `event` was queued for `key` at `at`
    async fn mark_alert_sent(&self, key: &str, event: EventType, at: i64) -> StorageResult<()>;

    /// Append a delivery attempt to the audit log
    async fn record_delivery(&self, alert: &AlertEvent, result: &SinkResult) -> StorageResult<()>;

    /// Most recent delivery attempts, newest first
    async fn recent_deliveries(&self, limit: usize) -> StorageResult<Vec<DeliveryRecord>>;

    /// Lightweight liveness probe of the backend
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
