//! Error types for the sync engine.

use crate::store::StoreError;
use zonesync_protocol::{EntityKey, ProtocolError, RecordId, ZoneId};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The stored change token is no longer valid on the service.
    #[error("change token expired for zone {zone}")]
    TokenExpired {
        /// Affected zone.
        zone: ZoneId,
    },

    /// The service holds newer versions of some uploaded records.
    #[error("server records changed: {}", format_keys(.keys))]
    ServerRecordChanged {
        /// Rejected records.
        keys: Vec<EntityKey>,
    },

    /// A record references a parent that exists nowhere locally.
    #[error("record {key} references missing parent {parent}")]
    ReferentialIntegrity {
        /// Child record.
        key: EntityKey,
        /// Missing parent id.
        parent: RecordId,
    },

    /// A share could not be created, changed or removed.
    #[error("share operation failed: {0}")]
    ShareOperation(String),

    /// The service refused the caller.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Adapters or descriptors are misconfigured.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Local store error.
    #[error("local store error: {0}")]
    Store(#[from] StoreError),

    /// Metadata store error.
    #[error("metadata error: {0}")]
    Metadata(String),

    /// Encoding error.
    #[error("codec error: {0}")]
    Codec(#[from] ProtocolError),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// A pass for this zone is already running.
    #[error("sync already in progress for zone {zone}")]
    SyncInProgress {
        /// Busy zone.
        zone: ZoneId,
    },

    /// Zone was never registered.
    #[error("unknown zone: {0}")]
    UnknownZone(ZoneId),

    /// Every retry attempt failed.
    #[error("sync failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Error of the final attempt.
        last: Box<SyncError>,
    },
}

fn format_keys(keys: &[EntityKey]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::ServerRecordChanged { .. } => true,
            _ => false,
        }
    }
}
