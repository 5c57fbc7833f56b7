//! Entity status persistence
//!
//! This module provides a trait-based abstraction for storing entity status,
//! alert cooldown bookkeeping and the delivery audit log.
//!
//! ## Design
//!
//! - **Trait-based**: `StatusStore` trait allows swapping implementations
//! - **Async**: All operations are async for compatibility with Tokio actors
//! - **Race-free writes**: `last_seen` and `status` are compare-and-set in
//!   every backend, so concurrent packet tasks need no external locking
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database, survives restarts
//! - **In-Memory** (fallback): No persistence, for testing or ephemeral hubs
//!
//! ## Usage
//!
//! ```no_run
//! use heartwatch::storage::{StatusStore, sqlite::SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SqliteStore::new("./heartwatch.db").await?;
//!     let entities = store.list_entities().await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use std::future::Future;
use std::time::Duration;

pub use backend::{HealthStatus, StatusStore};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use schema::{DeliveryRecord, EntityState, SinkResult, TouchOutcome};

/// Bound a store call by `limit`, mapping expiry to [`StorageError::Timeout`]
pub async fn with_timeout<T>(
    limit: Duration,
    fut: impl Future<Output = StorageResult<T>>,
) -> StorageResult<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout(limit)),
    }
}
