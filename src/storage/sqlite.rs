//! SQLite status store
//!
//! Entities, per-event cooldowns and the delivery audit log live in one
//! database file, so a restarted hub keeps statuses and does not repeat
//! alerts. The file runs in WAL mode behind a small pool shared by all packet
//! tasks; the schema is in `migrations/`.
//!
//! ## Compare-and-set writes
//!
//! Both race-prone writes are single conditional statements, so concurrent
//! packet tasks and the monitor actor never need an application-level lock:
//!
//! ```sql
//! UPDATE entities SET last_seen = ?  WHERE entity_key = ? AND last_seen < ?
//! UPDATE entities SET status = ?, last_status_change = ?
//!     WHERE entity_key = ? AND status = ? AND last_seen = ?
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, trace, warn};

use super::backend::{HealthStatus, StatusStore};
use super::error::{StorageError, StorageResult};
use super::schema::{DeliveryRecord, EntityState, SinkResult, TouchOutcome};
use crate::message::Sample;
use crate::{AlertEvent, EntityStatus, EventType};

/// SQLite status store
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteStore {
    /// Open (or create) the database and run migrations
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use heartwatch::storage::sqlite::SqliteStore;
    /// # async fn example() -> anyhow::Result<()> {
    /// let store = SqliteStore::new("./heartwatch.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite store at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn entity_from_row(row: &SqliteRow) -> StorageResult<EntityState> {
        let entity_type: String = row.get("entity_type");
        let status: String = row.get("status");
        let metadata: String = row.get("metadata");

        Ok(EntityState {
            entity_key: row.get("entity_key"),
            entity_type: parse_column(&entity_type)?,
            status: parse_column(&status)?,
            last_seen: row.get("last_seen"),
            last_status_change: row.get("last_status_change"),
            metadata: serde_json::from_str(&metadata)?,
        })
    }

    fn delivery_from_row(row: &SqliteRow) -> StorageResult<DeliveryRecord> {
        let entity_type: String = row.get("entity_type");
        let event_type: String = row.get("event_type");

        Ok(DeliveryRecord {
            entity_key: row.get("entity_key"),
            entity_type: parse_column(&entity_type)?,
            event_type: parse_column(&event_type)?,
            occurred_at: row.get("occurred_at"),
            sink_name: row.get("sink_name"),
            success: row.get("success"),
            error: row.get("error"),
            attempted_at: row.get("attempted_at"),
        })
    }
}

fn parse_column<T: FromStr<Err = String>>(value: &str) -> StorageResult<T> {
    value.parse().map_err(StorageError::CorruptRow)
}

#[async_trait]
impl StatusStore for SqliteStore {
    #[instrument(skip(self))]
    async fn get_entity_state(&self, key: &str) -> StorageResult<Option<EntityState>> {
        let row = sqlx::query(
            r#"
            SELECT entity_key, entity_type, status, last_seen, last_status_change, metadata
            FROM entities
            WHERE entity_key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::entity_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn list_entities(&self) -> StorageResult<Vec<EntityState>> {
        let rows = sqlx::query(
            r#"
            SELECT entity_key, entity_type, status, last_seen, last_status_change, metadata
            FROM entities
            ORDER BY entity_key ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::entity_from_row).collect()
    }

    #[instrument(skip(self, sample), fields(entity = %sample.entity_key))]
    async fn touch_entity(&self, sample: &Sample) -> StorageResult<TouchOutcome> {
        let metadata = serde_json::to_string(&sample.payload)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO entities (
                entity_key, entity_type, status, last_seen, last_status_change, metadata
            )
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (entity_key) DO NOTHING
            "#,
        )
        .bind(&sample.entity_key)
        .bind(sample.entity_type.to_string())
        .bind(EntityStatus::Online.to_string())
        .bind(sample.device_timestamp)
        .bind(sample.device_timestamp)
        .bind(&metadata)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            trace!("entity created");
            return Ok(TouchOutcome::Created);
        }

        let updated = sqlx::query(
            r#"
            UPDATE entities
            SET last_seen = ?, metadata = ?
            WHERE entity_key = ? AND last_seen < ?
            "#,
        )
        .bind(sample.device_timestamp)
        .bind(&metadata)
        .bind(&sample.entity_key)
        .bind(sample.device_timestamp)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 1 {
            Ok(TouchOutcome::Refreshed)
        } else {
            Ok(TouchOutcome::Unchanged)
        }
    }

    #[instrument(skip(self, state), fields(entity = %state.entity_key))]
    async fn upsert_entity_state(&self, state: &EntityState) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO entities (
                entity_key, entity_type, status, last_seen, last_status_change, metadata
            )
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (entity_key) DO UPDATE SET
                entity_type = excluded.entity_type,
                status = excluded.status,
                last_seen = excluded.last_seen,
                last_status_change = excluded.last_status_change,
                metadata = excluded.metadata
            "#,
        )
        .bind(&state.entity_key)
        .bind(state.entity_type.to_string())
        .bind(state.status.to_string())
        .bind(state.last_seen)
        .bind(state.last_status_change)
        .bind(serde_json::to_string(&state.metadata)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_status(
        &self,
        key: &str,
        expected: EntityStatus,
        status: EntityStatus,
        at: i64,
        seen: i64,
    ) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE entities
            SET status = ?, last_status_change = ?
            WHERE entity_key = ? AND status = ? AND last_seen = ?
            "#,
        )
        .bind(status.to_string())
        .bind(at)
        .bind(key)
        .bind(expected.to_string())
        .bind(seen)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn get_last_alert_sent_at(
        &self,
        key: &str,
        event: EventType,
    ) -> StorageResult<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT last_sent_at FROM alert_cooldowns WHERE entity_key = ? AND event_type = ?",
        )
        .bind(key)
        .bind(event.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.0))
    }

    #[instrument(skip(self))]
    async fn mark_alert_sent(&self, key: &str, event: EventType, at: i64) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO alert_cooldowns (entity_key, event_type, last_sent_at)
            VALUES (?, ?, ?)
            ON CONFLICT (entity_key, event_type) DO UPDATE SET
                last_sent_at = excluded.last_sent_at
            "#,
        )
        .bind(key)
        .bind(event.to_string())
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, alert, result), fields(entity = %alert.entity_key, sink = %result.sink_name))]
    async fn record_delivery(&self, alert: &AlertEvent, result: &SinkResult) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO alert_deliveries (
                entity_key, entity_type, event_type, occurred_at,
                sink_name, success, error, attempted_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&alert.entity_key)
        .bind(alert.entity_type.to_string())
        .bind(alert.event_type.to_string())
        .bind(alert.occurred_at)
        .bind(&result.sink_name)
        .bind(result.success)
        .bind(&result.error)
        .bind(result.attempted_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn recent_deliveries(&self, limit: usize) -> StorageResult<Vec<DeliveryRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT entity_key, entity_type, event_type, occurred_at,
                   sink_name, success, error, attempted_at
            FROM alert_deliveries
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::delivery_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite store");
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityType;
    use crate::message::MessageKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample(key: &str, ts: i64) -> Sample {
        Sample {
            entity_key: key.to_string(),
            entity_type: EntityType::Device,
            device_timestamp: ts,
            received_at: ts,
            kind: MessageKind::Heartbeat,
            payload: json!({"name": key, "ts": ts}),
        }
    }

    async fn open_store() -> (tempfile::TempDir, SqliteStore) {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let store = SqliteStore::new(&db_path).await.unwrap();
        (temp_dir, store)
    }

    #[tokio::test]
    async fn test_sqlite_store_creation() {
        let (_dir, store) = open_store().await;
        let health = store.health_check().await.unwrap();
        assert!(health.healthy);
        assert!(health.message.contains("operational"));
    }

    #[tokio::test]
    async fn test_touch_create_then_refresh() {
        let (_dir, store) = open_store().await;

        assert_eq!(
            store.touch_entity(&sample("DEVICE-X", 100)).await.unwrap(),
            TouchOutcome::Created
        );
        assert_eq!(
            store.touch_entity(&sample("DEVICE-X", 101)).await.unwrap(),
            TouchOutcome::Refreshed
        );

        let state = store.get_entity_state("DEVICE-X").await.unwrap().unwrap();
        assert_eq!(state.entity_type, EntityType::Device);
        assert_eq!(state.status, EntityStatus::Online);
        assert_eq!(state.last_seen, 101);
        assert_eq!(state.last_status_change, 100);
        assert_eq!(state.metadata, json!({"name": "DEVICE-X", "ts": 101}));
    }

    #[tokio::test]
    async fn test_reordered_samples_keep_max_last_seen() {
        let (_dir, store) = open_store().await;

        for ts in [100, 80, 120] {
            store.touch_entity(&sample("a", ts)).await.unwrap();
        }

        let state = store.get_entity_state("a").await.unwrap().unwrap();
        assert_eq!(state.last_seen, 120);
    }

    #[tokio::test]
    async fn test_update_status_cas() {
        let (_dir, store) = open_store().await;
        store.touch_entity(&sample("a", 100)).await.unwrap();

        assert!(
            store
                .update_status("a", EntityStatus::Online, EntityStatus::Offline, 450, 100)
                .await
                .unwrap()
        );
        assert!(
            !store
                .update_status("a", EntityStatus::Online, EntityStatus::Offline, 460, 100)
                .await
                .unwrap()
        );

        let state = store.get_entity_state("a").await.unwrap().unwrap();
        assert_eq!(state.status, EntityStatus::Offline);
        assert_eq!(state.last_status_change, 450);
    }

    #[tokio::test]
    async fn test_update_status_requires_unchanged_last_seen() {
        let (_dir, store) = open_store().await;
        store.touch_entity(&sample("a", 1_000)).await.unwrap();

        let snapshot = store.list_entities().await.unwrap();
        let transitions = crate::detector::detect(&snapshot, 1_301, 300);
        assert_eq!(transitions.len(), 1);
        let flip = &transitions[0];

        store.touch_entity(&sample("a", 1_301)).await.unwrap();

        assert!(
            !store
                .update_status(&flip.entity_key, flip.from, flip.to, flip.at, flip.last_seen)
                .await
                .unwrap()
        );
        let state = store.get_entity_state("a").await.unwrap().unwrap();
        assert_eq!(state.status, EntityStatus::Online);
        assert_eq!(state.last_seen, 1_301);
    }

    #[tokio::test]
    async fn test_upsert_and_list() {
        let (_dir, store) = open_store().await;
        let state = EntityState {
            entity_key: "10.0.0.1".to_string(),
            entity_type: EntityType::PingTarget,
            status: EntityStatus::Offline,
            last_seen: 10,
            last_status_change: 20,
            metadata: json!({"monitor": "prober"}),
        };

        store.upsert_entity_state(&state).await.unwrap();
        store.touch_entity(&sample("b-device", 5)).await.unwrap();

        let entities = store.list_entities().await.unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0], state);
    }

    #[tokio::test]
    async fn test_cooldown_round_trip() {
        let (_dir, store) = open_store().await;

        assert_eq!(
            store
                .get_last_alert_sent_at("a", EventType::Offline)
                .await
                .unwrap(),
            None
        );

        store.mark_alert_sent("a", EventType::Offline, 100).await.unwrap();
        store.mark_alert_sent("a", EventType::Offline, 200).await.unwrap();

        assert_eq!(
            store
                .get_last_alert_sent_at("a", EventType::Offline)
                .await
                .unwrap(),
            Some(200)
        );
        assert_eq!(
            store
                .get_last_alert_sent_at("a", EventType::NewEntity)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_record_delivery() {
        let (_dir, store) = open_store().await;
        let alert = AlertEvent {
            entity_type: EntityType::Device,
            entity_key: "a".to_string(),
            event_type: EventType::Offline,
            occurred_at: 100,
            context: json!({}),
        };
        let failed = SinkResult {
            sink_name: "discord".to_string(),
            success: false,
            error: Some("timed out".to_string()),
            attempted_at: 130,
        };

        store.record_delivery(&alert, &failed).await.unwrap();

        let records = store.recent_deliveries(5).await.unwrap();
        assert_eq!(records, vec![DeliveryRecord::new(&alert, &failed)]);
    }
}
