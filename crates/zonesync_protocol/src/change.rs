//! Change feed entries and per-record outcomes.

use crate::ids::{ChangeToken, EntityKey, Timestamp};
use crate::record::SyncRecord;
use crate::share::ShareChange;
use serde::{Deserialize, Serialize};

/// A single change in a zone's remote change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RemoteChange {
    /// Record was created or modified (including soft deletion through the
    /// record's deleted flag).
    Upserted(SyncRecord),
    /// Record was physically removed from the service.
    Deleted {
        /// Key of the removed record.
        key: EntityKey,
        /// When the removal happened.
        deleted_at: Timestamp,
    },
}

impl RemoteChange {
    /// Returns the key of the changed record.
    pub fn key(&self) -> EntityKey {
        match self {
            RemoteChange::Upserted(record) => record.key(),
            RemoteChange::Deleted { key, .. } => key.clone(),
        }
    }

    /// Returns the time of the change.
    pub fn modified_at(&self) -> Timestamp {
        match self {
            RemoteChange::Upserted(record) => record.system.modified_at,
            RemoteChange::Deleted { deleted_at, .. } => *deleted_at,
        }
    }

    /// Returns the service version of the change (0 for removals).
    pub fn version(&self) -> u64 {
        match self {
            RemoteChange::Upserted(record) => record.system.version,
            RemoteChange::Deleted { .. } => 0,
        }
    }

    /// Returns the record for upserts.
    pub fn record(&self) -> Option<&SyncRecord> {
        match self {
            RemoteChange::Upserted(record) => Some(record),
            RemoteChange::Deleted { .. } => None,
        }
    }
}

/// One page of a zone's change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    /// Record changes in feed order.
    pub changes: Vec<RemoteChange>,
    /// Share changes in feed order.
    pub share_changes: Vec<ShareChange>,
    /// Token covering everything up to the end of this page.
    pub token: ChangeToken,
    /// True if more pages follow.
    pub more_coming: bool,
}

/// Outcome of saving or deleting one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordOutcome {
    /// Record was persisted with the given version.
    Saved {
        /// Record key.
        key: EntityKey,
        /// Version assigned by the service.
        version: u64,
    },
    /// Record was removed (or was already absent).
    Deleted {
        /// Record key.
        key: EntityKey,
    },
    /// Record was rejected.
    Failed {
        /// Record key.
        key: EntityKey,
        /// Why it was rejected.
        failure: RecordFailure,
    },
}

impl RecordOutcome {
    /// Returns the record key.
    pub fn key(&self) -> &EntityKey {
        match self {
            RecordOutcome::Saved { key, .. }
            | RecordOutcome::Deleted { key }
            | RecordOutcome::Failed { key, .. } => key,
        }
    }

    /// Returns true if the record was persisted or removed.
    pub fn is_success(&self) -> bool {
        !matches!(self, RecordOutcome::Failed { .. })
    }
}

/// Reason a record was rejected by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordFailure {
    /// The service holds a newer edit than the one being saved.
    ServerRecordChanged {
        /// Version currently stored.
        server_version: u64,
        /// Edit time currently stored.
        server_modified_at: Timestamp,
    },
    /// Caller may not write this record.
    PermissionDenied,
    /// Any other rejection.
    Rejected(String),
}
