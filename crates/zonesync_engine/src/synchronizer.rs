//! Sync pass orchestration.
//!
//! One pass per zone: collect local changes, fetch the remote delta since
//! the stored token, merge, commit merged state to the store, upload the
//! pending set parents first, then commit the new token. A pass that fails
//! anywhere leaves the stored token and pending set as they were before the
//! pass, so the same call can be retried.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::merge::{ConflictResolver, IntegrityReport, MergeEngine};
use crate::metadata::{Checkpoint, MetadataStore};
use crate::registry::AdapterRegistry;
use crate::remote::{Notification, RemoteRecordService};
use crate::share::ShareManager;
use crate::store::{LocalStore, StoreWrite, WriteOrigin};
use crate::tracker::{ChangeTracker, CheckpointCommit, PendingChangeSet, ZonePhase};
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zonesync_protocol::{
    ChangeToken, Conflict, EntityKey, Participant, RecordFailure, RecordOutcome, RemoteChange,
    ShareChange, ShareInfo, SharePermission, SubscriptionId, ZoneId,
};

/// How the application learns about remote changes for a zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeMode {
    /// Push notifications through an active subscription.
    Push(SubscriptionId),
    /// No subscription; poll at this interval.
    Polling(Duration),
}

/// Statistics about sync passes.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Committed passes.
    pub passes_completed: u64,
    /// Remote changes fetched.
    pub records_fetched: u64,
    /// Records confirmed by the service.
    pub records_uploaded: u64,
    /// Conflicts seen, resolved or not.
    pub conflicts: u64,
    /// Retries after transient failures.
    pub retries: u64,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of one committed pass.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Synced zone.
    pub zone: ZoneId,
    /// Remote changes fetched.
    pub fetched: usize,
    /// Remote changes written locally.
    pub applied: usize,
    /// Records confirmed by the service.
    pub uploaded: usize,
    /// Conflicts resolved by policy or resolver.
    pub resolved_conflicts: Vec<Conflict>,
    /// Conflicts a resolver declined; both sides are kept for next pass.
    pub unresolved_conflicts: Vec<Conflict>,
    /// Records skipped because their parent is missing.
    pub integrity: Vec<IntegrityReport>,
    /// Children deleted with their parent.
    pub cascaded: usize,
    /// Checkpoint committed by this pass.
    pub checkpoint: Checkpoint,
    /// Whether this pass was a full re-sync.
    pub full_resync: bool,
    /// Wall time of the pass.
    pub duration: Duration,
}

impl SyncReport {
    /// Returns the skipped records as errors.
    pub fn integrity_errors(&self) -> Vec<SyncError> {
        self.integrity.iter().map(SyncError::from).collect()
    }

    /// Returns true if nothing was left for the caller to decide.
    pub fn is_clean(&self) -> bool {
        self.unresolved_conflicts.is_empty() && self.integrity.is_empty()
    }
}

/// Results of syncing several zones.
#[derive(Debug, Default)]
pub struct SyncSummary {
    /// Committed passes.
    pub reports: Vec<SyncReport>,
    /// Zones whose pass failed.
    pub failures: Vec<(ZoneId, SyncError)>,
}

impl SyncSummary {
    /// Returns true if every zone synced.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Cancels in-flight passes of a synchronizer.
///
/// Each cancellation bumps a generation counter. A pass captures the
/// generation when it starts and stops once the counter moves, so passes
/// started after a cancellation are unaffected.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicU64>);

impl CancelHandle {
    /// Requests cancellation. Running passes stop at their next check and
    /// leave checkpoints untouched.
    pub fn cancel(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns a token for a pass starting now.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            handle: self.clone(),
            generation: self.0.load(Ordering::SeqCst),
        }
    }
}

/// Cancellation state of one pass.
#[derive(Debug, Clone)]
pub struct CancelToken {
    handle: CancelHandle,
    generation: u64,
}

impl CancelToken {
    /// Returns true if the handle was cancelled after this token was taken.
    pub fn is_cancelled(&self) -> bool {
        self.handle.0.load(Ordering::SeqCst) != self.generation
    }

    fn check(&self) -> SyncResult<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

struct ZoneEntry {
    registry: AdapterRegistry,
    serial: Arc<Mutex<()>>,
}

/// Synchronizes registered zones with a remote record service.
pub struct Synchronizer {
    config: SyncConfig,
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteRecordService>,
    tracker: Arc<ChangeTracker>,
    shares: ShareManager,
    zones: RwLock<HashMap<ZoneId, ZoneEntry>>,
    resolvers: RwLock<HashMap<String, Arc<dyn ConflictResolver>>>,
    stats: RwLock<SyncStats>,
    cancel: CancelHandle,
}

impl Synchronizer {
    /// Creates a synchronizer.
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteRecordService>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let tracker = Arc::new(ChangeTracker::new(metadata));
        Self {
            config,
            store,
            shares: ShareManager::new(remote.clone(), tracker.clone()),
            remote,
            tracker,
            zones: RwLock::new(HashMap::new()),
            resolvers: RwLock::new(HashMap::new()),
            stats: RwLock::new(SyncStats::default()),
            cancel: CancelHandle::default(),
        }
    }

    /// Registers a zone with the adapters of its entity types.
    pub fn register_zone(&self, zone: ZoneId, registry: AdapterRegistry) {
        let mut zones = self.zones.write();
        match zones.get_mut(&zone) {
            Some(entry) => entry.registry = registry,
            None => {
                zones.insert(
                    zone,
                    ZoneEntry {
                        registry,
                        serial: Arc::new(Mutex::new(())),
                    },
                );
            }
        }
    }

    /// Returns registered zones.
    pub fn zones(&self) -> Vec<ZoneId> {
        let mut zones: Vec<ZoneId> = self.zones.read().keys().cloned().collect();
        zones.sort();
        zones
    }

    /// Overrides conflict resolution for one entity type.
    pub fn set_conflict_resolver(&self, type_id: impl Into<String>, resolver: Arc<dyn ConflictResolver>) {
        self.resolvers.write().insert(type_id.into(), resolver);
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the change tracker.
    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    /// Returns a snapshot of the statistics.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns a handle that cancels running passes.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Cancels running passes.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Syncs one zone, or every registered zone in parallel.
    ///
    /// With a zone, a failed pass is returned as the error. Without one,
    /// failures are collected per zone in the summary.
    pub async fn synchronize(&self, zone: Option<&ZoneId>) -> SyncResult<SyncSummary> {
        if let Some(zone) = zone {
            let report = self.synchronize_zone(zone).await?;
            return Ok(SyncSummary {
                reports: vec![report],
                failures: Vec::new(),
            });
        }

        let zones = self.zones();
        let results = join_all(zones.iter().map(|zone| self.run_zone(zone))).await;

        let mut summary = SyncSummary::default();
        for (zone, result) in zones.into_iter().zip(results) {
            match result {
                Ok(report) => summary.reports.push(report),
                Err(error) => {
                    warn!(zone = %zone, error = %error, "zone sync failed");
                    summary.failures.push((zone, error));
                }
            }
        }
        Ok(summary)
    }

    /// Runs one pass for a zone, retrying transient failures.
    pub async fn synchronize_zone(&self, zone: &ZoneId) -> SyncResult<SyncReport> {
        self.run_zone(zone).await
    }

    async fn run_zone(&self, zone: &ZoneId) -> SyncResult<SyncReport> {
        let (registry, serial) = self.zone_entry(zone)?;
        let _serial = serial
            .try_lock()
            .map_err(|_| SyncError::SyncInProgress { zone: zone.clone() })?;

        let cancel = self.cancel.token();
        let result = self.run_with_retry(zone, &registry, &cancel).await;
        match &result {
            Ok(report) => {
                let mut stats = self.stats.write();
                stats.passes_completed += 1;
                stats.records_fetched += report.fetched as u64;
                stats.records_uploaded += report.uploaded as u64;
                stats.conflicts +=
                    (report.resolved_conflicts.len() + report.unresolved_conflicts.len()) as u64;
            }
            Err(error) => self.stats.write().last_error = Some(error.to_string()),
        }

        let report = result?;
        if let Some(retention) = self.config.tombstone_retention {
            if report.checkpoint.0 > retention {
                let older_than = Checkpoint(report.checkpoint.0 - retention);
                if let Err(error) = self.purge_locked(zone, &registry, older_than).await {
                    warn!(zone = %zone, error = %error, "tombstone purge failed");
                }
            }
        }
        Ok(report)
    }

    async fn run_with_retry(
        &self,
        zone: &ZoneId,
        registry: &AdapterRegistry,
        cancel: &CancelToken,
    ) -> SyncResult<SyncReport> {
        let retry = &self.config.retry;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.pass(zone, registry, cancel).await {
                Ok(report) => return Ok(report),
                Err(error) if error.is_retryable() && attempt < retry.max_attempts => {
                    let delay = retry.delay_for_attempt(attempt);
                    warn!(
                        zone = %zone,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "sync pass failed; retrying"
                    );
                    self.stats.write().retries += 1;
                    tokio::time::sleep(delay).await;
                    cancel.check()?;
                }
                Err(error) if error.is_retryable() => {
                    warn!(zone = %zone, attempts = attempt, error = %error, "sync retries exhausted");
                    return Err(SyncError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(error),
                    });
                }
                Err(error) => return Err(error),
            }
        }
    }

    #[tracing::instrument(skip(self, registry, cancel), fields(zone = %zone, device = %self.config.device_id))]
    async fn pass(
        &self,
        zone: &ZoneId,
        registry: &AdapterRegistry,
        cancel: &CancelToken,
    ) -> SyncResult<SyncReport> {
        let started = Instant::now();
        let guard = self.tracker.begin_pass(zone)?;
        let metadata = self.tracker.load(zone)?;
        let full_resync = metadata.needs_full_resync;

        // Collect local edits made since the last pass.
        let (changed, marker) = self.store.changes_since(metadata.local_marker)?;
        let mut pending = metadata.pending.clone();
        self.collect_pending(registry, changed, &mut pending)?;
        if full_resync {
            info!(zone = %zone, "full re-sync: every local entity is treated as changed");
            for adapter in registry.ordered() {
                let keys = adapter.all_entities()?.into_iter().map(|e| e.key);
                self.collect_pending(registry, keys.collect(), &mut pending)?;
            }
        }
        cancel.check()?;

        let token = if full_resync {
            None
        } else {
            metadata.change_token.clone()
        };
        let (changes, share_changes, new_token) = self.fetch_all(zone, token, cancel).await?;
        let fetched = changes.len();
        cancel.check()?;

        guard.advance(ZonePhase::MergingLocal)?;
        let deferred = if full_resync {
            BTreeMap::new()
        } else {
            metadata.deferred
        };
        let collected = pending.clone();
        let mut outcome = self
            .merge_engine(registry)
            .with_confirmed_tombstones(metadata.confirmed_tombstones.into_keys())
            .merge(changes, pending, deferred)?;
        for report in &outcome.integrity {
            warn!(key = %report.key, parent = %report.parent, "record skipped: parent missing");
        }

        let staged = std::mem::take(&mut outcome.staged);
        if !staged.is_empty() {
            // Sync-origin writes never show up in changes_since, so cascaded
            // deletions must be pending before they reach the store.
            let mut widened = collected;
            widened.extend(&outcome.pending);
            self.tracker.stage_pending(zone, &widened, marker)?;
            self.store.apply(staged.into_writes(), WriteOrigin::Sync)?;
        }
        for change in &share_changes {
            self.shares.reconcile(zone, change)?;
        }
        self.tracker.stage_pending(zone, &outcome.pending, marker)?;

        guard.advance(ZonePhase::PushingLocal)?;
        let uploadable = outcome.uploadable();
        let records = registry.records_to_upload(zone, &uploadable)?;
        let mut saved: HashMap<EntityKey, u64> = HashMap::new();
        let mut confirmed: Vec<EntityKey> = Vec::new();
        let mut failures: Vec<(EntityKey, RecordFailure)> = Vec::new();

        for batch in records.chunks(self.config.save_batch_size) {
            cancel.check()?;
            debug!(zone = %zone, records = batch.len(), "saving records");
            for result in self.remote.save_records(zone, batch.to_vec()).await? {
                match result {
                    RecordOutcome::Saved { key, version } => {
                        saved.insert(key.clone(), version);
                        confirmed.push(key);
                    }
                    RecordOutcome::Deleted { key } => confirmed.push(key),
                    RecordOutcome::Failed { key, failure } => failures.push((key, failure)),
                }
            }
        }
        upload_failure(failures)?;
        cancel.check()?;

        guard.advance(ZonePhase::CommittingCheckpoint)?;
        let mut writes = Vec::new();
        for record in &records {
            let key = record.key();
            let Some(version) = saved.get(&key) else {
                continue;
            };
            if let Some(mut entity) = self.store.get(&key)? {
                // Edited again during the upload: keep the old base so the
                // next pass uploads the newer edit.
                if entity.modified_at == record.system.modified_at {
                    entity.remote_version = Some(*version);
                    writes.push(StoreWrite::Upsert(entity));
                }
            }
        }
        if !writes.is_empty() {
            self.store.apply(writes, WriteOrigin::Sync)?;
        }

        let mut tombstones: BTreeSet<EntityKey> = confirmed
            .iter()
            .filter(|key| uploadable.is_deleted(key))
            .cloned()
            .collect();
        tombstones.extend(outcome.settled_tombstones.iter().cloned());

        let uploaded = confirmed.len();
        let checkpoint = self.tracker.commit_checkpoint(
            zone,
            CheckpointCommit {
                token: new_token,
                confirmed,
                tombstones: tombstones.into_iter().collect(),
                deferred: outcome.deferred,
            },
        )?;

        let report = SyncReport {
            zone: zone.clone(),
            fetched,
            applied: outcome.applied,
            uploaded,
            resolved_conflicts: outcome.resolved,
            unresolved_conflicts: outcome.unresolved,
            integrity: outcome.integrity,
            cascaded: outcome.cascaded,
            checkpoint,
            full_resync,
            duration: started.elapsed(),
        };
        info!(
            zone = %zone,
            fetched = report.fetched,
            applied = report.applied,
            uploaded = report.uploaded,
            conflicts = report.resolved_conflicts.len() + report.unresolved_conflicts.len(),
            checkpoint = report.checkpoint.0,
            "sync pass committed"
        );
        Ok(report)
    }

    /// Adds changed entities of registered types to the pending set.
    fn collect_pending(
        &self,
        registry: &AdapterRegistry,
        keys: Vec<EntityKey>,
        pending: &mut PendingChangeSet,
    ) -> SyncResult<()> {
        for key in keys {
            let Some(adapter) = registry.adapter(&key.record_type) else {
                continue;
            };
            match self.store.get(&key)? {
                Some(entity) if adapter.descriptor().is_deleted(&entity.fields) => {
                    pending.mark_deleted(key)
                }
                Some(_) => pending.mark_dirty(key),
                None => debug!(key = %key, "changed entity no longer stored"),
            }
        }
        Ok(())
    }

    async fn fetch_all(
        &self,
        zone: &ZoneId,
        mut token: Option<ChangeToken>,
        cancel: &CancelToken,
    ) -> SyncResult<(Vec<RemoteChange>, Vec<ShareChange>, ChangeToken)> {
        let mut changes = Vec::new();
        let mut share_changes = Vec::new();

        loop {
            cancel.check()?;
            let page = match self
                .remote
                .fetch_changes(zone, token.as_ref(), self.config.fetch_limit)
                .await
            {
                Ok(page) => page,
                Err(SyncError::TokenExpired { .. }) => {
                    self.tracker.expire_token(zone)?;
                    return Err(SyncError::TokenExpired { zone: zone.clone() });
                }
                Err(error) => return Err(error),
            };

            debug!(
                zone = %zone,
                changes = page.changes.len(),
                more_coming = page.more_coming,
                "fetched page"
            );
            changes.extend(page.changes);
            share_changes.extend(page.share_changes);
            if !page.more_coming {
                return Ok((changes, share_changes, page.token));
            }
            token = Some(page.token);
        }
    }

    fn merge_engine(&self, registry: &AdapterRegistry) -> MergeEngine {
        let resolvers = self.resolvers.read();
        registry.ordered().iter().fold(
            MergeEngine::new(registry.clone(), self.config.conflict_policy),
            |engine, adapter| {
                let type_id = &adapter.descriptor().type_id;
                match resolvers.get(type_id) {
                    Some(resolver) => engine.with_resolver(type_id.clone(), resolver.clone()),
                    None => engine,
                }
            },
        )
    }

    fn zone_entry(&self, zone: &ZoneId) -> SyncResult<(AdapterRegistry, Arc<Mutex<()>>)> {
        self.zones
            .read()
            .get(zone)
            .map(|entry| (entry.registry.clone(), entry.serial.clone()))
            .ok_or_else(|| SyncError::UnknownZone(zone.clone()))
    }

    /// Drops checkpoints and pending sets of a zone, forcing a full re-sync.
    /// Entity data is not touched.
    pub fn erase_local_metadata(&self, zone: &ZoneId) -> SyncResult<()> {
        if self.tracker.phase(zone).is_active() {
            return Err(SyncError::SyncInProgress { zone: zone.clone() });
        }
        self.tracker.erase(zone)
    }

    /// Shares a root entity and its descendants.
    pub async fn share(
        &self,
        zone: &ZoneId,
        root: &EntityKey,
        permission: SharePermission,
        participants: Vec<Participant>,
    ) -> SyncResult<ShareInfo> {
        let (registry, _) = self.zone_entry(zone)?;
        self.shares
            .share(zone, &registry, root, permission, participants)
            .await
    }

    /// Returns the share rooted at `root`, if any.
    pub fn share_for(&self, zone: &ZoneId, root: &EntityKey) -> SyncResult<Option<ShareInfo>> {
        self.shares.share_for(zone, root)
    }

    /// Revokes a share without deleting local data.
    pub async fn revoke_share(&self, zone: &ZoneId, root: &EntityKey) -> SyncResult<bool> {
        self.shares.revoke_share(zone, root).await
    }

    /// Returns a user's permission on a record through the zone's shares.
    pub fn participant_permission(
        &self,
        zone: &ZoneId,
        key: &EntityKey,
        user_id: &str,
    ) -> SyncResult<Option<SharePermission>> {
        self.shares.participant_permission(zone, key, user_id)
    }

    /// Subscribes to push notifications for a zone.
    ///
    /// A failure is not an error: the zone falls back to polling.
    pub async fn subscribe_for_changes(&self, zone: &ZoneId) -> SyncResult<WakeMode> {
        if let Some(existing) = self.tracker.load(zone)?.subscription {
            return Ok(WakeMode::Push(existing));
        }

        match self.remote.create_subscription(zone).await {
            Ok(subscription) => {
                let stored = subscription.clone();
                self.tracker.update(zone, |m| m.subscription = Some(stored))?;
                info!(zone = %zone, subscription = subscription.as_str(), "subscribed for changes");
                Ok(WakeMode::Push(subscription))
            }
            Err(error) => {
                warn!(
                    zone = %zone,
                    error = %error,
                    "subscription unavailable; falling back to polling"
                );
                Ok(WakeMode::Polling(self.config.poll_interval))
            }
        }
    }

    /// Cancels a zone's push subscription. Returns false if there was none.
    pub async fn cancel_subscription(&self, zone: &ZoneId) -> SyncResult<bool> {
        let Some(subscription) = self.tracker.load(zone)?.subscription else {
            return Ok(false);
        };
        self.remote.cancel_subscription(zone, &subscription).await?;
        self.tracker.update(zone, |m| m.subscription = None)?;
        info!(zone = %zone, "subscription cancelled");
        Ok(true)
    }

    /// Returns how the zone is woken up.
    pub fn wake_mode(&self, zone: &ZoneId) -> SyncResult<WakeMode> {
        Ok(match self.tracker.load(zone)?.subscription {
            Some(subscription) => WakeMode::Push(subscription),
            None => WakeMode::Polling(self.config.poll_interval),
        })
    }

    /// Handles a push notification by syncing the affected zone.
    ///
    /// Returns `None` if a pass for the zone is already running.
    pub async fn handle_notification(
        &self,
        notification: Notification,
    ) -> SyncResult<Option<SyncReport>> {
        if let Notification::ShareChanged { zone, change } = &notification {
            self.shares.reconcile(zone, change)?;
        }

        match self.synchronize_zone(notification.zone()).await {
            Ok(report) => Ok(Some(report)),
            Err(SyncError::SyncInProgress { zone }) => {
                debug!(zone = %zone, "notification ignored; pass already running");
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    /// Hard-removes tombstones confirmed at or before `older_than`, remotely
    /// and locally. Returns the number of purged entities.
    pub async fn purge_tombstones(&self, zone: &ZoneId, older_than: Checkpoint) -> SyncResult<usize> {
        let (registry, serial) = self.zone_entry(zone)?;
        let _serial = serial
            .try_lock()
            .map_err(|_| SyncError::SyncInProgress { zone: zone.clone() })?;
        self.purge_locked(zone, &registry, older_than).await
    }

    async fn purge_locked(
        &self,
        zone: &ZoneId,
        registry: &AdapterRegistry,
        older_than: Checkpoint,
    ) -> SyncResult<usize> {
        let keys = self.tracker.purgeable_tombstones(zone, older_than)?;
        if keys.is_empty() {
            return Ok(0);
        }

        let removed: Vec<EntityKey> = self
            .remote
            .delete_records(zone, keys)
            .await?
            .into_iter()
            .filter(RecordOutcome::is_success)
            .map(|outcome| outcome.key().clone())
            .collect();

        let mut by_type: BTreeMap<&str, BTreeSet<_>> = BTreeMap::new();
        for key in &removed {
            by_type
                .entry(key.record_type.as_str())
                .or_default()
                .insert(key.record_id.clone());
        }

        let mut purged = 0;
        for (type_id, ids) in by_type {
            if let Some(adapter) = registry.adapter(type_id) {
                purged += adapter.purge_tombstones(&ids)?.len();
            }
        }
        self.tracker.forget_tombstones(zone, &removed)?;
        info!(zone = %zone, purged, "tombstones purged");
        Ok(purged)
    }
}

/// Turns per-record upload failures into a pass error.
fn upload_failure(failures: Vec<(EntityKey, RecordFailure)>) -> SyncResult<()> {
    if failures.is_empty() {
        return Ok(());
    }

    let mut changed = Vec::new();
    for (key, failure) in failures {
        match failure {
            RecordFailure::PermissionDenied => {
                return Err(SyncError::PermissionDenied(format!("cannot write {key}")));
            }
            RecordFailure::Rejected(reason) => {
                return Err(SyncError::transport_fatal(format!(
                    "record {key} rejected: {reason}"
                )));
            }
            RecordFailure::ServerRecordChanged { .. } => changed.push(key),
        }
    }
    Err(SyncError::ServerRecordChanged { keys: changed })
}
