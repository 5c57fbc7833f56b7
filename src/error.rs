//! Error types for the ingestion path
//!
//! Every variant is terminal for the packet that produced it: the caller logs
//! it and drops the datagram. Senders retransmit on their own interval, so
//! nothing here is ever retried.

use std::fmt;

use crate::storage::StorageError;

/// Result type alias for ingestion operations
pub type IngestResult<T> = Result<T, IngestError>;

/// Errors that can occur while turning a datagram into stored samples
#[derive(Debug)]
pub enum IngestError {
    /// Datagram shorter than the nonce prefix
    TransportTooShort { len: usize },

    /// Authenticated decryption failed (wrong key, corruption, tampering)
    DecryptionFailed,

    /// Plaintext is not a JSON object, or a field has the wrong shape
    MalformedPayload(String),

    /// Claimed timestamp is outside the freshness window
    Stale { timestamp: i64, now: i64 },

    /// A field required by the message kind is absent
    MissingFields(Vec<&'static str>),

    /// Store read/write failed while applying a sample
    PersistenceUnavailable(StorageError),
}

impl IngestError {
    /// Short, stable label used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::TransportTooShort { .. } => "transport_too_short",
            IngestError::DecryptionFailed => "decryption_failed",
            IngestError::MalformedPayload(_) => "malformed_payload",
            IngestError::Stale { .. } => "stale",
            IngestError::MissingFields(_) => "missing_fields",
            IngestError::PersistenceUnavailable(_) => "persistence_unavailable",
        }
    }
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::TransportTooShort { len } => {
                write!(f, "datagram too short ({len} bytes)")
            }
            IngestError::DecryptionFailed => write!(f, "decryption failed"),
            IngestError::MalformedPayload(msg) => write!(f, "malformed payload: {msg}"),
            IngestError::Stale { timestamp, now } => write!(
                f,
                "message timestamp {timestamp} outside freshness window (now {now})"
            ),
            IngestError::MissingFields(fields) => {
                write!(f, "missing required fields: {}", fields.join(", "))
            }
            IngestError::PersistenceUnavailable(err) => {
                write!(f, "persistence unavailable: {err}")
            }
        }
    }
}

impl std::error::Error for IngestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IngestError::PersistenceUnavailable(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for IngestError {
    fn from(err: StorageError) -> Self {
        IngestError::PersistenceUnavailable(err)
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        IngestError::MalformedPayload(err.to_string())
    }
}
