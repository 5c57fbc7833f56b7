//! Integration tests for the ingestion and alerting pipeline

#[path = "integration/helpers.rs"]
mod helpers;

#[path = "integration/pipeline.rs"]
mod pipeline;

#[path = "integration/dispatch.rs"]
mod dispatch;

#[path = "integration/concurrency.rs"]
mod concurrency;

#[cfg(feature = "storage-sqlite")]
#[path = "integration/storage_persistence.rs"]
mod storage_persistence;
