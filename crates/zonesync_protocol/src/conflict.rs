//! Conflict detection and resolution.

use crate::ids::{EntityKey, Timestamp};
use crate::record::{Fields, SyncRecord};
use serde::{Deserialize, Serialize};

/// Which sides of a conflict changed and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    /// Both sides edited the entity.
    UpdateUpdate,
    /// Local side deleted, remote side edited.
    LocalDeleteRemoteUpdate,
    /// Local side edited, remote side deleted.
    LocalUpdateRemoteDelete,
    /// Both sides deleted.
    DeleteDelete,
}

/// A conflict between a local pending change and a remote change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Entity in conflict.
    pub key: EntityKey,
    /// Shape of the conflict.
    pub kind: ConflictKind,
    /// Local field values at merge time.
    pub local: Option<Fields>,
    /// Remote record (absent for physical removals).
    pub remote: Option<SyncRecord>,
    /// Local edit (or deletion) time.
    pub local_modified_at: Timestamp,
    /// Remote edit (or deletion) time.
    pub remote_modified_at: Timestamp,
    /// Last service version the local side saw.
    pub local_version: u64,
    /// Service version of the remote change.
    pub remote_version: u64,
    /// Resolution (if any).
    pub resolution: Option<ConflictResolution>,
}

impl Conflict {
    /// Returns true if the local side is a deletion.
    pub fn is_local_delete(&self) -> bool {
        matches!(
            self.kind,
            ConflictKind::LocalDeleteRemoteUpdate | ConflictKind::DeleteDelete
        )
    }

    /// Returns the last-writer-wins outcome for this conflict.
    ///
    /// The later modification wins. On an exact tie the remote side wins,
    /// unless the remote version is older than the version the local side
    /// already saw. A local deletion only loses to a strictly newer remote
    /// edit.
    pub fn last_writer(&self) -> ConflictResolution {
        use std::cmp::Ordering;

        if self.kind == ConflictKind::LocalDeleteRemoteUpdate {
            return if self.remote_modified_at > self.local_modified_at {
                ConflictResolution::AcceptRemote
            } else {
                ConflictResolution::KeepLocal
            };
        }

        match self.local_modified_at.cmp(&self.remote_modified_at) {
            Ordering::Greater => ConflictResolution::KeepLocal,
            Ordering::Less => ConflictResolution::AcceptRemote,
            Ordering::Equal if self.local_version > self.remote_version => {
                ConflictResolution::KeepLocal
            }
            Ordering::Equal => ConflictResolution::AcceptRemote,
        }
    }

    /// Resolves the conflict with the given resolution.
    pub fn resolve(&mut self, resolution: ConflictResolution) {
        self.resolution = Some(resolution);
    }

    /// Returns true if the conflict has a resolution other than `Skip`.
    pub fn is_resolved(&self) -> bool {
        matches!(
            self.resolution,
            Some(ConflictResolution::KeepLocal | ConflictResolution::AcceptRemote)
        )
    }
}

/// Resolution for a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictResolution {
    /// Keep the local version and upload it.
    KeepLocal,
    /// Accept the remote version into the local store.
    AcceptRemote,
    /// Leave unresolved; neither side is touched this pass.
    Skip,
}

/// Policy for automatic conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConflictPolicy {
    /// Later modification wins; ties go to the remote side.
    #[default]
    LastWriterWins,
    /// Remote always wins.
    RemoteWins,
    /// Local always wins.
    LocalWins,
    /// Every conflict is left for the caller.
    Manual,
}

impl ConflictPolicy {
    /// Returns true if this policy automatically resolves conflicts.
    pub fn auto_resolves(&self) -> bool {
        !matches!(self, ConflictPolicy::Manual)
    }

    /// Resolves a conflict according to this policy.
    pub fn resolve(&self, conflict: &mut Conflict) {
        let resolution = match self {
            ConflictPolicy::LastWriterWins => conflict.last_writer(),
            ConflictPolicy::RemoteWins => ConflictResolution::AcceptRemote,
            ConflictPolicy::LocalWins => ConflictResolution::KeepLocal,
            ConflictPolicy::Manual => ConflictResolution::Skip,
        };
        conflict.resolve(resolution);
    }
}
