//! Change tracking and checkpointing per zone.
//!
//! The tracker owns the persisted [`ZoneMetadata`] and the in-memory phase
//! of every zone. A pass moves strictly through
//! `Idle -> FetchingRemoteDelta -> MergingLocal -> PushingLocal ->
//! CommittingCheckpoint -> Idle`; dropping the [`PassGuard`] returns the
//! zone to `Idle` whatever happened, and only `commit_checkpoint` advances
//! the stored token.

use crate::error::{SyncError, SyncResult};
use crate::metadata::{Checkpoint, MetadataStore, ZoneMetadata};
use crate::store::StoreMarker;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};
use zonesync_protocol::{ChangeToken, EntityKey, RecordId, RemoteChange, Timestamp, ZoneId};

/// Phase of a zone's sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZonePhase {
    /// No pass is running.
    Idle,
    /// Fetching the remote delta since the stored token.
    FetchingRemoteDelta,
    /// Merging the remote delta with local pending changes.
    MergingLocal,
    /// Uploading merged local changes.
    PushingLocal,
    /// Writing the new token and clearing confirmed pending entries.
    CommittingCheckpoint,
}

impl ZonePhase {
    /// Returns true if a pass is running.
    pub fn is_active(&self) -> bool {
        !matches!(self, ZonePhase::Idle)
    }

    /// Returns true if a new pass may start.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, ZonePhase::Idle)
    }

    fn next(&self) -> ZonePhase {
        match self {
            ZonePhase::Idle => ZonePhase::FetchingRemoteDelta,
            ZonePhase::FetchingRemoteDelta => ZonePhase::MergingLocal,
            ZonePhase::MergingLocal => ZonePhase::PushingLocal,
            ZonePhase::PushingLocal => ZonePhase::CommittingCheckpoint,
            ZonePhase::CommittingCheckpoint => ZonePhase::Idle,
        }
    }
}

/// Local changes not yet confirmed by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChangeSet {
    /// Created or edited entities.
    pub dirty: BTreeSet<EntityKey>,
    /// Tombstoned entities.
    pub deleted: BTreeSet<EntityKey>,
}

impl PendingChangeSet {
    /// Marks an entity as edited.
    pub fn mark_dirty(&mut self, key: EntityKey) {
        self.deleted.remove(&key);
        self.dirty.insert(key);
    }

    /// Marks an entity as deleted.
    pub fn mark_deleted(&mut self, key: EntityKey) {
        self.dirty.remove(&key);
        self.deleted.insert(key);
    }

    /// Drops an entity from the set.
    pub fn remove(&mut self, key: &EntityKey) {
        self.dirty.remove(key);
        self.deleted.remove(key);
    }

    /// Returns true if the entity is pending in either set.
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.dirty.contains(key) || self.deleted.contains(key)
    }

    /// Returns true if the entity is pending deletion.
    pub fn is_deleted(&self, key: &EntityKey) -> bool {
        self.deleted.contains(key)
    }

    /// Adds every entry of `other`.
    pub fn extend(&mut self, other: &PendingChangeSet) {
        for key in &other.dirty {
            self.mark_dirty(key.clone());
        }
        for key in &other.deleted {
            self.mark_deleted(key.clone());
        }
    }

    /// Returns ids of one type, dirty and deleted.
    pub fn ids_of_type(&self, record_type: &str) -> Vec<RecordId> {
        self.keys()
            .filter(|k| k.record_type == record_type)
            .map(|k| k.record_id.clone())
            .collect()
    }

    /// Iterates over all pending keys.
    pub fn keys(&self) -> impl Iterator<Item = &EntityKey> {
        self.dirty.iter().chain(self.deleted.iter())
    }

    /// Returns the number of pending entries.
    pub fn len(&self) -> usize {
        self.dirty.len() + self.deleted.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.dirty.is_empty() && self.deleted.is_empty()
    }
}

/// What a successful pass commits.
#[derive(Debug, Clone)]
pub struct CheckpointCommit {
    /// Token returned by the last fetched page.
    pub token: ChangeToken,
    /// Pending entries confirmed by the service.
    pub confirmed: Vec<EntityKey>,
    /// Confirmed entries that were tombstones.
    pub tombstones: Vec<EntityKey>,
    /// Remote changes to retry next pass.
    pub deferred: BTreeMap<EntityKey, RemoteChange>,
}

/// Owns checkpoints, pending sets and zone phases.
pub struct ChangeTracker {
    metadata: Arc<dyn MetadataStore>,
    phases: RwLock<HashMap<ZoneId, ZonePhase>>,
    write_lock: Mutex<()>,
}

impl ChangeTracker {
    /// Creates a tracker over a metadata store.
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            metadata,
            phases: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the current phase of a zone.
    pub fn phase(&self, zone: &ZoneId) -> ZonePhase {
        self.phases
            .read()
            .get(zone)
            .copied()
            .unwrap_or(ZonePhase::Idle)
    }

    /// Starts a pass, moving the zone to `FetchingRemoteDelta`.
    pub fn begin_pass(&self, zone: &ZoneId) -> SyncResult<PassGuard<'_>> {
        let mut phases = self.phases.write();
        let phase = phases.entry(zone.clone()).or_insert(ZonePhase::Idle);
        if !phase.can_start_sync() {
            return Err(SyncError::SyncInProgress { zone: zone.clone() });
        }
        *phase = ZonePhase::FetchingRemoteDelta;
        Ok(PassGuard {
            tracker: self,
            zone: zone.clone(),
        })
    }

    fn advance(&self, zone: &ZoneId, to: ZonePhase) -> SyncResult<()> {
        let mut phases = self.phases.write();
        let phase = phases.entry(zone.clone()).or_insert(ZonePhase::Idle);
        if phase.next() != to {
            return Err(SyncError::Configuration(format!(
                "invalid phase transition for zone {zone}: {phase:?} -> {to:?}"
            )));
        }
        debug!(zone = %zone, from = ?*phase, to = ?to, "zone phase");
        *phase = to;
        Ok(())
    }

    fn reset(&self, zone: &ZoneId) {
        self.phases.write().insert(zone.clone(), ZonePhase::Idle);
    }

    /// Loads a zone's metadata, or an empty document for a new zone.
    pub fn load(&self, zone: &ZoneId) -> SyncResult<ZoneMetadata> {
        Ok(self.metadata.load(zone)?.unwrap_or_default())
    }

    /// Applies `f` to the zone's metadata and saves the result in one write.
    pub fn update<R>(
        &self,
        zone: &ZoneId,
        f: impl FnOnce(&mut ZoneMetadata) -> R,
    ) -> SyncResult<R> {
        let _guard = self.write_lock.lock();
        let mut metadata = self.load(zone)?;
        let result = f(&mut metadata);
        self.metadata.save(zone, &metadata)?;
        Ok(result)
    }

    /// Persists the widened pending set and the new local marker.
    ///
    /// The token is left untouched, so a failure after this point re-fetches
    /// the same remote delta while keeping every local change pending.
    pub fn stage_pending(
        &self,
        zone: &ZoneId,
        pending: &PendingChangeSet,
        marker: StoreMarker,
    ) -> SyncResult<()> {
        self.update(zone, |m| {
            m.pending = pending.clone();
            m.local_marker = marker;
        })
    }

    /// Commits a pass: new token, confirmed entries cleared, checkpoint
    /// advanced. All of it is one metadata write.
    pub fn commit_checkpoint(
        &self,
        zone: &ZoneId,
        commit: CheckpointCommit,
    ) -> SyncResult<Checkpoint> {
        let checkpoint = self.update(zone, |m| {
            m.change_token = Some(commit.token);
            for key in &commit.confirmed {
                m.pending.remove(key);
            }
            m.needs_full_resync = false;
            m.checkpoint = m.checkpoint.next();
            for key in commit.tombstones {
                m.confirmed_tombstones.insert(key, m.checkpoint);
            }
            m.deferred = commit.deferred;
            m.last_synced_at = Some(Timestamp::now());
            m.checkpoint
        })?;
        info!(zone = %zone, checkpoint = checkpoint.0, "checkpoint committed");
        Ok(checkpoint)
    }

    /// Discards the stored token and everything derived from it, and marks
    /// the zone for a full re-sync.
    pub fn expire_token(&self, zone: &ZoneId) -> SyncResult<()> {
        warn!(zone = %zone, "change token expired; full re-sync scheduled");
        self.update(zone, |m| {
            m.change_token = None;
            m.needs_full_resync = true;
            m.deferred.clear();
        })
    }

    /// Drops checkpoints and pending sets, forcing a full re-sync. Entity
    /// data, the subscription and known shares are kept.
    pub fn erase(&self, zone: &ZoneId) -> SyncResult<()> {
        self.update(zone, |m| {
            *m = ZoneMetadata {
                subscription: m.subscription.take(),
                shares: std::mem::take(&mut m.shares),
                ..ZoneMetadata::full_resync()
            };
        })?;
        info!(zone = %zone, "local sync metadata erased");
        Ok(())
    }

    /// Returns confirmed tombstones at or before `older_than` that are not
    /// pending again.
    pub fn purgeable_tombstones(
        &self,
        zone: &ZoneId,
        older_than: Checkpoint,
    ) -> SyncResult<Vec<EntityKey>> {
        let metadata = self.load(zone)?;
        Ok(metadata
            .confirmed_tombstones
            .iter()
            .filter(|(key, at)| **at <= older_than && !metadata.pending.contains(key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    /// Forgets purged tombstones.
    pub fn forget_tombstones(&self, zone: &ZoneId, keys: &[EntityKey]) -> SyncResult<()> {
        self.update(zone, |m| {
            for key in keys {
                m.confirmed_tombstones.remove(key);
            }
        })
    }
}

/// Keeps a zone in an active phase; dropping it returns the zone to `Idle`.
pub struct PassGuard<'a> {
    tracker: &'a ChangeTracker,
    zone: ZoneId,
}

impl PassGuard<'_> {
    /// Moves to the next phase; skipping a phase is an error.
    pub fn advance(&self, to: ZonePhase) -> SyncResult<()> {
        self.tracker.advance(&self.zone, to)
    }

    /// Returns the zone of this pass.
    pub fn zone(&self) -> &ZoneId {
        &self.zone
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.tracker.reset(&self.zone);
    }
}
