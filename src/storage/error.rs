//! Store errors
//!
//! Callers never crash on these: the ingestion path drops the packet, the
//! monitor logs and retries on the next sweep, the dispatcher logs the lost
//! audit row.

use std::fmt;
use std::time::Duration;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug)]
pub enum StorageError {
    /// Could not open the database
    Connection(String),

    Query(String),

    Migration(String),

    /// A stored column does not parse back into its type
    CorruptRow(String),

    Io(std::io::Error),

    /// Gave up waiting on the backend
    Timeout(Duration),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Connection(msg) => write!(f, "cannot open status store: {msg}"),
            StorageError::Query(msg) => write!(f, "status store query failed: {msg}"),
            StorageError::Migration(msg) => write!(f, "status store migration failed: {msg}"),
            StorageError::CorruptRow(msg) => write!(f, "corrupt row in status store: {msg}"),
            StorageError::Io(err) => write!(f, "status store I/O error: {err}"),
            StorageError::Timeout(after) => {
                write!(f, "status store did not answer within {after:?}")
            }
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err)
    }
}

/// Metadata blobs are stored as JSON text
impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::CorruptRow(err.to_string())
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) => StorageError::Io(io_err),
            sqlx::Error::PoolTimedOut => {
                StorageError::Connection("timed out waiting for a pooled connection".to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StorageError::CorruptRow(err.to_string())
            }
            _ => StorageError::Query(err.to_string()),
        }
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::migrate::MigrateError> for StorageError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StorageError::Migration(err.to_string())
    }
}
