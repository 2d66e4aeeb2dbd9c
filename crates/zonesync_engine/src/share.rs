//! Record sharing.
//!
//! A share covers a root entity and every live descendant reachable
//! through the adapters' parent indexes. Share state is kept in the zone's
//! metadata, keyed by root; revoking a share only removes the remote
//! linkage, never local entities.

use crate::adapter::StagedBatch;
use crate::error::{SyncError, SyncResult};
use crate::registry::AdapterRegistry;
use crate::remote::RemoteRecordService;
use crate::tracker::ChangeTracker;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};
use zonesync_protocol::{
    EntityKey, Participant, ShareChange, ShareInfo, SharePermission, ShareRequest, ZoneId,
};

/// Creates, updates and revokes shares and mirrors remote share changes.
pub struct ShareManager {
    remote: Arc<dyn RemoteRecordService>,
    tracker: Arc<ChangeTracker>,
}

impl ShareManager {
    /// Creates a share manager.
    pub fn new(remote: Arc<dyn RemoteRecordService>, tracker: Arc<ChangeTracker>) -> Self {
        Self { remote, tracker }
    }

    /// Shares `root` and its descendants, or updates the existing share.
    ///
    /// # Errors
    ///
    /// Returns `ShareOperation` if the root is unknown, deleted, or has not
    /// been synced yet, or if the service rejects the share.
    pub async fn share(
        &self,
        zone: &ZoneId,
        registry: &AdapterRegistry,
        root: &EntityKey,
        permission: SharePermission,
        participants: Vec<Participant>,
    ) -> SyncResult<ShareInfo> {
        let adapter = registry.adapter(&root.record_type).ok_or_else(|| {
            SyncError::ShareOperation(format!("no adapter for {}", root.record_type))
        })?;
        let entity = adapter
            .local_entity(&root.record_id, &StagedBatch::new())?
            .ok_or_else(|| SyncError::ShareOperation(format!("{root} does not exist")))?;
        if adapter.descriptor().is_deleted(&entity.fields) {
            return Err(SyncError::ShareOperation(format!("{root} is deleted")));
        }

        let metadata = self.tracker.load(zone)?;
        if entity.remote_version.is_none() || metadata.pending.contains(root) {
            return Err(SyncError::ShareOperation(format!(
                "{root} has unsynced changes; synchronize before sharing"
            )));
        }

        let request = ShareRequest {
            root: root.clone(),
            scope: share_scope(registry, root)?,
            public_permission: permission,
            participants,
        };

        let info = match metadata.shares.get(root) {
            Some(existing) => self
                .remote
                .modify_share(zone, &existing.share_id, request)
                .await
                .map_err(share_error)?,
            None => self
                .remote
                .create_share(zone, request)
                .await
                .map_err(share_error)?,
        };

        info!(
            zone = %zone,
            root = %root,
            share = %info.share_id,
            records = info.scope.len(),
            "share saved"
        );
        let stored = info.clone();
        self.tracker.update(zone, |m| {
            m.shares.insert(stored.root.clone(), stored);
        })?;
        Ok(info)
    }

    /// Returns the share rooted at `root`, if any.
    pub fn share_for(&self, zone: &ZoneId, root: &EntityKey) -> SyncResult<Option<ShareInfo>> {
        Ok(self.tracker.load(zone)?.shares.get(root).cloned())
    }

    /// Removes the share rooted at `root`. Local entities are kept.
    ///
    /// Returns false if there was no share.
    pub async fn revoke_share(&self, zone: &ZoneId, root: &EntityKey) -> SyncResult<bool> {
        let Some(share) = self.share_for(zone, root)? else {
            return Ok(false);
        };

        self.remote
            .remove_share(zone, &share.share_id)
            .await
            .map_err(share_error)?;
        self.tracker.update(zone, |m| {
            m.shares.remove(root);
        })?;
        info!(zone = %zone, root = %root, share = %share.share_id, "share revoked");
        Ok(true)
    }

    /// Mirrors a share change reported by the service.
    pub fn reconcile(&self, zone: &ZoneId, change: &ShareChange) -> SyncResult<()> {
        debug!(zone = %zone, root = %change.root(), "reconciling share");
        self.tracker.update(zone, |m| match change {
            ShareChange::Modified(info) => {
                m.shares.insert(info.root.clone(), info.clone());
            }
            ShareChange::Removed { share_id, root } => {
                if m.shares.get(root).map(|s| &s.share_id) == Some(share_id) {
                    m.shares.remove(root);
                }
            }
        })
    }

    /// Returns a user's permission on a record through any share covering it.
    pub fn participant_permission(
        &self,
        zone: &ZoneId,
        key: &EntityKey,
        user_id: &str,
    ) -> SyncResult<Option<SharePermission>> {
        let metadata = self.tracker.load(zone)?;
        Ok(metadata
            .shares
            .values()
            .find(|share| share.scope.contains(key))
            .map(|share| share.permission_for(user_id)))
    }
}

/// Returns `root` followed by all of its live descendants, breadth first.
pub fn share_scope(registry: &AdapterRegistry, root: &EntityKey) -> SyncResult<Vec<EntityKey>> {
    let staged = StagedBatch::new();
    let mut scope = vec![root.clone()];
    let mut seen: BTreeSet<EntityKey> = BTreeSet::from([root.clone()]);
    let mut queue = VecDeque::from([root.clone()]);

    while let Some(parent) = queue.pop_front() {
        for adapter in registry.child_adapters(&parent.record_type) {
            for child_id in adapter.children_of(&parent.record_id, &staged)? {
                let Some(child) = adapter.local_entity(&child_id, &staged)? else {
                    continue;
                };
                if adapter.descriptor().is_deleted(&child.fields) || !seen.insert(child.key.clone())
                {
                    continue;
                }
                scope.push(child.key.clone());
                queue.push_back(child.key);
            }
        }
    }
    Ok(scope)
}

fn share_error(error: SyncError) -> SyncError {
    match error {
        SyncError::ShareOperation(_) => error,
        other => SyncError::ShareOperation(other.to_string()),
    }
}
