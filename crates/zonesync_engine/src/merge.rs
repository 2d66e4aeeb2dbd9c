//! Merge of a remote delta with the local pending change set.
//!
//! A merge never touches the store directly. Remote changes, conflict
//! outcomes and cascaded deletions are collected in a [`StagedBatch`] that
//! the synchronizer commits atomically before any upload starts.

use crate::adapter::{ApplyOutcome, ModelAdapter, StagedBatch};
use crate::error::{SyncError, SyncResult};
use crate::registry::AdapterRegistry;
use crate::store::Entity;
use crate::tracker::PendingChangeSet;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};
use zonesync_protocol::{
    Conflict, ConflictKind, ConflictPolicy, ConflictResolution, EntityKey, RecordId, RemoteChange,
    Timestamp,
};

/// Caller-supplied override of the default conflict resolution.
///
/// Receives the conflict and the resolution the policy proposed. Returning
/// [`ConflictResolution::Skip`] declines: the remote change is deferred, the
/// local change stays pending but is not uploaded, and the conflict is
/// reported as unresolved.
pub trait ConflictResolver: Send + Sync {
    /// Decides the resolution of one conflict.
    fn resolve(&self, conflict: &Conflict, proposed: ConflictResolution) -> ConflictResolution;
}

impl<F> ConflictResolver for F
where
    F: Fn(&Conflict, ConflictResolution) -> ConflictResolution + Send + Sync,
{
    fn resolve(&self, conflict: &Conflict, proposed: ConflictResolution) -> ConflictResolution {
        self(conflict, proposed)
    }
}

/// A downloaded record whose parent exists nowhere locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Child record.
    pub key: EntityKey,
    /// Missing parent id.
    pub parent: RecordId,
}

impl From<&IntegrityReport> for SyncError {
    fn from(report: &IntegrityReport) -> Self {
        SyncError::ReferentialIntegrity {
            key: report.key.clone(),
            parent: report.parent.clone(),
        }
    }
}

/// Everything a merge decided.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// Store writes to commit before uploading.
    pub staged: StagedBatch,
    /// Pending set after the merge: remotely superseded entries removed,
    /// kept conflicts and cascaded deletions added.
    pub pending: PendingChangeSet,
    /// Pending entries that must not be uploaded this pass.
    pub held: BTreeSet<EntityKey>,
    /// Conflicts resolved automatically or by a resolver.
    pub resolved: Vec<Conflict>,
    /// Conflicts a resolver declined.
    pub unresolved: Vec<Conflict>,
    /// Remote changes to retry next pass.
    pub deferred: BTreeMap<EntityKey, RemoteChange>,
    /// Records skipped for a missing parent.
    pub integrity: Vec<IntegrityReport>,
    /// Tombstones the remote side already reflects.
    pub settled_tombstones: Vec<EntityKey>,
    /// Remote changes written locally.
    pub applied: usize,
    /// Children deleted because their parent was deleted.
    pub cascaded: usize,
}

impl MergeOutcome {
    /// Returns the pending entries to upload this pass.
    pub fn uploadable(&self) -> PendingChangeSet {
        let mut set = self.pending.clone();
        for key in &self.held {
            set.remove(key);
        }
        set
    }
}

/// Merges remote deltas into local state for one zone.
#[derive(Clone)]
pub struct MergeEngine {
    registry: AdapterRegistry,
    policy: ConflictPolicy,
    resolvers: HashMap<String, Arc<dyn ConflictResolver>>,
    confirmed: BTreeSet<EntityKey>,
}

impl MergeEngine {
    /// Creates a merge engine with a default policy.
    pub fn new(registry: AdapterRegistry, policy: ConflictPolicy) -> Self {
        Self {
            registry,
            policy,
            resolvers: HashMap::new(),
            confirmed: BTreeSet::new(),
        }
    }

    /// Sets the tombstones whose deletion the service already reflects.
    ///
    /// Any other tombstone found under a deleted parent is queued for
    /// upload again.
    pub fn with_confirmed_tombstones(mut self, keys: impl IntoIterator<Item = EntityKey>) -> Self {
        self.confirmed = keys.into_iter().collect();
        self
    }

    /// Overrides conflict resolution for one type.
    pub fn with_resolver(
        mut self,
        type_id: impl Into<String>,
        resolver: Arc<dyn ConflictResolver>,
    ) -> Self {
        self.resolvers.insert(type_id.into(), resolver);
        self
    }

    /// Merges `remote` (and changes deferred by earlier passes) with the
    /// local pending set.
    pub fn merge(
        &self,
        remote: Vec<RemoteChange>,
        pending: PendingChangeSet,
        deferred: BTreeMap<EntityKey, RemoteChange>,
    ) -> SyncResult<MergeOutcome> {
        let mut outcome = MergeOutcome {
            pending,
            ..MergeOutcome::default()
        };

        let mut queue = self.coalesce(deferred, remote);
        loop {
            let attempted = queue.len();
            let mut missing = Vec::new();

            for change in queue {
                let key = change.key();
                let Some(adapter) = self.registry.adapter(&key.record_type) else {
                    continue;
                };
                let remote_deleted = deletes(adapter.as_ref(), &change);

                match adapter.apply_downloaded(&change, &outcome.pending, &mut outcome.staged)? {
                    ApplyOutcome::Applied => {
                        outcome.applied += 1;
                        if remote_deleted {
                            outcome.settled_tombstones.push(key);
                        }
                    }
                    ApplyOutcome::Unchanged => {}
                    ApplyOutcome::Converged => {
                        // An identical re-save is a no-op on the service, so
                        // only a remote removal settles the pending entry.
                        if matches!(change, RemoteChange::Deleted { .. }) {
                            outcome.pending.remove(&key);
                            outcome.settled_tombstones.push(key);
                        }
                    }
                    ApplyOutcome::Conflict(local) => {
                        self.resolve_conflict(adapter.as_ref(), change, *local, &mut outcome)?;
                    }
                    ApplyOutcome::MissingParent(parent) => missing.push((change, parent)),
                }
            }

            if missing.is_empty() {
                break;
            }
            if missing.len() == attempted {
                for (change, parent) in missing {
                    let key = change.key();
                    warn!(key = %key, parent = %parent, "parent missing; record deferred");
                    outcome.integrity.push(IntegrityReport {
                        key: key.clone(),
                        parent,
                    });
                    outcome.deferred.insert(key, change);
                }
                break;
            }
            queue = missing.into_iter().map(|(change, _)| change).collect();
        }

        self.cascade(&mut outcome)?;

        debug!(
            applied = outcome.applied,
            resolved = outcome.resolved.len(),
            unresolved = outcome.unresolved.len(),
            cascaded = outcome.cascaded,
            deferred = outcome.deferred.len(),
            "merge finished"
        );
        Ok(outcome)
    }

    /// Keeps the latest change per key, parent types first.
    fn coalesce(
        &self,
        deferred: BTreeMap<EntityKey, RemoteChange>,
        remote: Vec<RemoteChange>,
    ) -> Vec<RemoteChange> {
        let mut latest = deferred;
        for change in remote {
            latest.insert(change.key(), change);
        }

        let mut changes: Vec<RemoteChange> = latest
            .into_values()
            .filter(|change| {
                let known = self.registry.contains(&change.key().record_type);
                if !known {
                    warn!(key = %change.key(), "no adapter for record type; change ignored");
                }
                known
            })
            .collect();
        changes.sort_by_key(|change| self.registry.rank(&change.key().record_type));
        changes
    }

    fn resolve_conflict(
        &self,
        adapter: &dyn ModelAdapter,
        change: RemoteChange,
        local: Entity,
        outcome: &mut MergeOutcome,
    ) -> SyncResult<()> {
        let descriptor = adapter.descriptor();
        let key = change.key();
        let local_deleted =
            outcome.pending.is_deleted(&key) || descriptor.is_deleted(&local.fields);
        let remote_deleted = deletes(adapter, &change);

        let kind = match (local_deleted, remote_deleted) {
            (false, false) => ConflictKind::UpdateUpdate,
            (true, false) => ConflictKind::LocalDeleteRemoteUpdate,
            (false, true) => ConflictKind::LocalUpdateRemoteDelete,
            (true, true) => ConflictKind::DeleteDelete,
        };

        let mut conflict = Conflict {
            key: key.clone(),
            kind,
            local: Some(local.fields.clone()),
            remote: change.record().cloned(),
            local_modified_at: local.modified_at,
            remote_modified_at: change.modified_at(),
            local_version: local.remote_version.unwrap_or(0),
            remote_version: change.version(),
            resolution: None,
        };
        self.policy.resolve(&mut conflict);
        if let Some(resolver) = self.resolvers.get(&descriptor.type_id) {
            let proposed = conflict.resolution.unwrap_or(ConflictResolution::Skip);
            let decided = resolver.resolve(&conflict, proposed);
            conflict.resolve(decided);
        }

        match conflict.resolution.unwrap_or(ConflictResolution::Skip) {
            ConflictResolution::AcceptRemote => {
                match adapter.accept_remote(&change, &mut outcome.staged)? {
                    ApplyOutcome::MissingParent(parent) => {
                        warn!(key = %key, parent = %parent, "accepted record has no parent; deferred");
                        outcome.integrity.push(IntegrityReport {
                            key: key.clone(),
                            parent,
                        });
                        outcome.held.insert(key.clone());
                        outcome.deferred.insert(key, change);
                    }
                    _ => {
                        outcome.pending.remove(&key);
                        outcome.applied += 1;
                        if remote_deleted {
                            outcome.settled_tombstones.push(key);
                        }
                    }
                }
            }
            ConflictResolution::KeepLocal => {
                // Rebase on the remote version so the upload supersedes it.
                let mut entity = local;
                entity.remote_version = change.record().map(|r| r.system.version);
                outcome.staged.stage(entity);
                if local_deleted {
                    outcome.pending.mark_deleted(key);
                } else {
                    outcome.pending.mark_dirty(key);
                }
            }
            ConflictResolution::Skip => {
                outcome.held.insert(key.clone());
                outcome.deferred.insert(key, change);
            }
        }

        debug!(
            key = %conflict.key,
            kind = ?conflict.kind,
            resolution = ?conflict.resolution,
            "conflict"
        );
        if conflict.is_resolved() {
            outcome.resolved.push(conflict);
        } else {
            outcome.unresolved.push(conflict);
        }
        Ok(())
    }

    /// Soft-deletes every live descendant of a tombstone.
    fn cascade(&self, outcome: &mut MergeOutcome) -> SyncResult<()> {
        let mut roots: VecDeque<(EntityKey, Timestamp)> = VecDeque::new();

        let staged: Vec<Entity> = outcome
            .staged
            .iter()
            .filter_map(|(_, entity)| entity.cloned())
            .collect();
        for entity in staged {
            let Some(adapter) = self.registry.adapter(&entity.key.record_type) else {
                continue;
            };
            let descriptor = adapter.descriptor();
            if descriptor.is_deleted(&entity.fields) {
                roots.push_back((entity.key.clone(), entity.modified_at));
                continue;
            }

            // A live record arriving under a parent that is already a tombstone.
            let Some(parent_key) = descriptor.parent_key(&entity) else {
                continue;
            };
            let Some(parent) = self.lookup(&parent_key, &outcome.staged)? else {
                continue;
            };
            if self.is_tombstone(&parent) {
                let key = entity.key.clone();
                let at = self.delete_child(adapter.as_ref(), entity, parent.modified_at, outcome);
                roots.push_back((key, at));
            }
        }

        let pending_deleted: Vec<EntityKey> = outcome.pending.deleted.iter().cloned().collect();
        for key in pending_deleted {
            if let Some(entity) = self.lookup(&key, &outcome.staged)? {
                if self.is_tombstone(&entity) {
                    roots.push_back((key, entity.modified_at));
                }
            }
        }

        let mut visited = BTreeSet::new();
        while let Some((key, at)) = roots.pop_front() {
            if !visited.insert(key.clone()) {
                continue;
            }
            for child_adapter in self.registry.child_adapters(&key.record_type) {
                for child_id in child_adapter.children_of(&key.record_id, &outcome.staged)? {
                    let Some(child) = child_adapter.local_entity(&child_id, &outcome.staged)? else {
                        continue;
                    };
                    let child_key = child.key.clone();
                    if child_adapter.descriptor().is_deleted(&child.fields) {
                        if !self.is_settled(&child_key, outcome) {
                            debug!(key = %child_key, "unsynced tombstone queued again");
                            outcome.pending.mark_deleted(child_key.clone());
                        }
                        roots.push_back((child_key, child.modified_at));
                    } else {
                        let deleted_at =
                            self.delete_child(child_adapter.as_ref(), child, at, outcome);
                        roots.push_back((child_key, deleted_at));
                    }
                }
            }
        }
        Ok(())
    }

    fn delete_child(
        &self,
        adapter: &dyn ModelAdapter,
        mut child: Entity,
        at: Timestamp,
        outcome: &mut MergeOutcome,
    ) -> Timestamp {
        adapter.descriptor().mark_deleted(&mut child, at);
        debug!(key = %child.key, "cascading parent deletion");
        outcome.pending.mark_deleted(child.key.clone());
        outcome.cascaded += 1;
        let deleted_at = child.modified_at;
        outcome.staged.stage(child);
        deleted_at
    }

    /// True if the tombstone is pending, confirmed, or settled by this merge.
    fn is_settled(&self, key: &EntityKey, outcome: &MergeOutcome) -> bool {
        outcome.pending.contains(key)
            || self.confirmed.contains(key)
            || outcome.settled_tombstones.contains(key)
    }

    fn lookup(&self, key: &EntityKey, staged: &StagedBatch) -> SyncResult<Option<Entity>> {
        match self.registry.adapter(&key.record_type) {
            Some(adapter) => adapter.local_entity(&key.record_id, staged),
            None => Ok(None),
        }
    }

    fn is_tombstone(&self, entity: &Entity) -> bool {
        self.registry
            .adapter(&entity.key.record_type)
            .map(|adapter| adapter.descriptor().is_deleted(&entity.fields))
            .unwrap_or(false)
    }
}

fn deletes(adapter: &dyn ModelAdapter, change: &RemoteChange) -> bool {
    match change {
        RemoteChange::Deleted { .. } => true,
        RemoteChange::Upserted(record) => record.flag(&adapter.descriptor().deleted_flag_field),
    }
}
