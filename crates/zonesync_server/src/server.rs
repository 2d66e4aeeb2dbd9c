//! In-process record service.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::zone_log::ZoneLog;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zonesync_protocol::{
    ChangeToken, EntityKey, FetchResult, RecordFailure, RecordOutcome, ShareId, ShareInfo,
    ShareRequest, SubscriptionId, SyncRecord, Timestamp, ZoneId,
};

/// Injected failures, consumed by the next matching calls.
#[derive(Debug, Default)]
struct Faults {
    failing_fetches: u32,
    failing_saves: u32,
    /// Records accepted before every further save call fails.
    save_budget: Option<usize>,
    subscriptions_down: bool,
    shares_denied: bool,
    protected: HashSet<EntityKey>,
}

/// Zone-scoped record service with change tokens, subscriptions and shares.
///
/// Zones are created on first use.
pub struct RecordServer {
    config: ServerConfig,
    zones: RwLock<HashMap<ZoneId, ZoneLog>>,
    subscriptions: RwLock<HashMap<SubscriptionId, ZoneId>>,
    faults: Mutex<Faults>,
    records_received: AtomicU64,
}

impl RecordServer {
    /// Creates a new server.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            zones: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            faults: Mutex::new(Faults::default()),
            records_received: AtomicU64::new(0),
        }
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn with_zone<T>(&self, zone: &ZoneId, f: impl FnOnce(&mut ZoneLog) -> T) -> T {
        let mut zones = self.zones.write();
        let log = zones
            .entry(zone.clone())
            .or_insert_with(|| ZoneLog::new(zone.clone(), self.config.log_retention));
        f(log)
    }

    fn read_zone<T>(&self, zone: &ZoneId, f: impl FnOnce(&ZoneLog) -> T) -> Option<T> {
        self.zones.read().get(zone).map(f)
    }

    /// Returns changes since `token`, or a full snapshot without one.
    pub fn fetch_changes(
        &self,
        zone: &ZoneId,
        token: Option<&ChangeToken>,
        limit: usize,
    ) -> ServerResult<FetchResult> {
        {
            let mut faults = self.faults.lock();
            if faults.failing_fetches > 0 {
                faults.failing_fetches -= 1;
                warn!(zone = %zone, "injected fetch failure");
                return Err(ServerError::Unavailable("fetch failed".into()));
            }
        }

        let limit = limit.min(self.config.max_fetch_batch).max(1);
        let result = self.with_zone(zone, |log| log.fetch(token, limit))?;
        debug!(
            zone = %zone,
            changes = result.changes.len(),
            shares = result.share_changes.len(),
            more_coming = result.more_coming,
            "fetch"
        );
        Ok(result)
    }

    /// Saves records, returning one outcome per record.
    pub fn save_records(
        &self,
        zone: &ZoneId,
        records: Vec<SyncRecord>,
    ) -> ServerResult<Vec<RecordOutcome>> {
        if records.len() > self.config.max_save_batch {
            return Err(ServerError::InvalidRequest(format!(
                "batch of {} exceeds limit of {}",
                records.len(),
                self.config.max_save_batch
            )));
        }

        let protected = {
            let mut faults = self.faults.lock();
            if faults.failing_saves > 0 {
                faults.failing_saves -= 1;
                warn!(zone = %zone, "injected save failure");
                return Err(ServerError::Unavailable("save failed".into()));
            }
            if let Some(budget) = faults.save_budget.as_mut() {
                if *budget == 0 {
                    warn!(zone = %zone, "save budget exhausted");
                    return Err(ServerError::Unavailable("save failed".into()));
                }
                *budget = (*budget).saturating_sub(records.len());
            }
            faults.protected.clone()
        };

        self.records_received
            .fetch_add(records.len() as u64, Ordering::Relaxed);

        let outcomes: Vec<RecordOutcome> = self.with_zone(zone, |log| {
            records
                .into_iter()
                .map(|record| {
                    if protected.contains(&record.key()) {
                        RecordOutcome::Failed {
                            key: record.key(),
                            failure: RecordFailure::PermissionDenied,
                        }
                    } else {
                        log.save(record)
                    }
                })
                .collect()
        });

        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        debug!(zone = %zone, saved = outcomes.len() - failed, failed, "save");
        Ok(outcomes)
    }

    /// Physically deletes records.
    pub fn delete_records(
        &self,
        zone: &ZoneId,
        keys: Vec<EntityKey>,
    ) -> ServerResult<Vec<RecordOutcome>> {
        if keys.len() > self.config.max_save_batch {
            return Err(ServerError::InvalidRequest(format!(
                "batch of {} exceeds limit of {}",
                keys.len(),
                self.config.max_save_batch
            )));
        }

        let now = Timestamp::now();
        let outcomes: Vec<RecordOutcome> = self.with_zone(zone, |log| {
            keys.into_iter().map(|key| log.delete(key, now)).collect()
        });
        debug!(zone = %zone, deleted = outcomes.len(), "delete");
        Ok(outcomes)
    }

    /// Registers a change subscription for a zone.
    pub fn create_subscription(&self, zone: &ZoneId) -> ServerResult<SubscriptionId> {
        if self.faults.lock().subscriptions_down {
            return Err(ServerError::Unavailable(
                "subscriptions are not available".into(),
            ));
        }
        let id = SubscriptionId::new(Uuid::new_v4().to_string());
        self.subscriptions.write().insert(id.clone(), zone.clone());
        info!(zone = %zone, subscription = id.as_str(), "subscription created");
        Ok(id)
    }

    /// Removes a subscription.
    pub fn cancel_subscription(&self, zone: &ZoneId, id: &SubscriptionId) -> ServerResult<()> {
        let mut subscriptions = self.subscriptions.write();
        if subscriptions.get(id) != Some(zone) {
            return Err(ServerError::InvalidRequest(format!(
                "no subscription {} for zone {zone}",
                id.as_str()
            )));
        }
        subscriptions.remove(id);
        info!(zone = %zone, subscription = id.as_str(), "subscription cancelled");
        Ok(())
    }

    /// Returns the zones with at least one subscription.
    pub fn subscribed_zones(&self) -> Vec<ZoneId> {
        let mut zones: Vec<ZoneId> = self.subscriptions.read().values().cloned().collect();
        zones.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        zones.dedup();
        zones
    }

    /// Returns the number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Creates a share.
    pub fn create_share(&self, zone: &ZoneId, request: ShareRequest) -> ServerResult<ShareInfo> {
        self.check_shares()?;
        let info = self.with_zone(zone, |log| log.create_share(request))?;
        info!(zone = %zone, share = %info.share_id, root = %info.root, "share created");
        Ok(info)
    }

    /// Modifies a share.
    pub fn modify_share(
        &self,
        zone: &ZoneId,
        id: &ShareId,
        request: ShareRequest,
    ) -> ServerResult<ShareInfo> {
        self.check_shares()?;
        let info = self.with_zone(zone, |log| log.modify_share(id, request))?;
        info!(zone = %zone, share = %id, "share modified");
        Ok(info)
    }

    /// Removes a share.
    pub fn remove_share(&self, zone: &ZoneId, id: &ShareId) -> ServerResult<()> {
        self.check_shares()?;
        self.with_zone(zone, |log| log.remove_share(id))?;
        info!(zone = %zone, share = %id, "share removed");
        Ok(())
    }

    /// Accepts a share invitation on behalf of a participant.
    pub fn accept_share(&self, zone: &ZoneId, id: &ShareId, user_id: &str) -> ServerResult<ShareInfo> {
        let info = self.with_zone(zone, |log| log.accept_share(id, user_id))?;
        info!(zone = %zone, share = %id, user = user_id, "share accepted");
        Ok(info)
    }

    fn check_shares(&self) -> ServerResult<()> {
        if self.faults.lock().shares_denied {
            return Err(ServerError::NotAuthorized("sharing is disabled".into()));
        }
        Ok(())
    }

    /// Invalidates every outstanding change token of a zone.
    pub fn expire_tokens(&self, zone: &ZoneId) {
        self.with_zone(zone, ZoneLog::expire_tokens);
        info!(zone = %zone, "change tokens expired");
    }

    /// Returns a stored record.
    pub fn record(&self, zone: &ZoneId, key: &EntityKey) -> Option<SyncRecord> {
        self.read_zone(zone, |log| log.record(key).cloned()).flatten()
    }

    /// Returns all stored records of a zone in key order.
    pub fn records(&self, zone: &ZoneId) -> Vec<SyncRecord> {
        self.read_zone(zone, |log| log.records().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the number of stored records in a zone.
    pub fn record_count(&self, zone: &ZoneId) -> usize {
        self.read_zone(zone, |log| log.records().count())
            .unwrap_or(0)
    }

    /// Returns a share.
    pub fn share(&self, zone: &ZoneId, id: &ShareId) -> Option<ShareInfo> {
        self.read_zone(zone, |log| log.share(id).cloned()).flatten()
    }

    /// Returns all shares of a zone.
    pub fn shares(&self, zone: &ZoneId) -> Vec<ShareInfo> {
        self.read_zone(zone, |log| log.shares().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the sequence number of a zone's newest change.
    pub fn head(&self, zone: &ZoneId) -> u64 {
        self.read_zone(zone, ZoneLog::head).unwrap_or(0)
    }

    /// Returns the total number of records received by save calls.
    pub fn records_received(&self) -> u64 {
        self.records_received.load(Ordering::Relaxed)
    }

    /// Fails the next `count` fetch calls with `Unavailable`.
    pub fn fail_next_fetches(&self, count: u32) {
        self.faults.lock().failing_fetches = count;
    }

    /// Fails the next `count` save calls with `Unavailable`.
    pub fn fail_next_saves(&self, count: u32) {
        self.faults.lock().failing_saves = count;
    }

    /// Accepts `records` more records, then fails every save call.
    pub fn fail_saves_after(&self, records: usize) {
        self.faults.lock().save_budget = Some(records);
    }

    /// Rejects saves of `key` with `PermissionDenied`.
    pub fn protect(&self, key: EntityKey) {
        self.faults.lock().protected.insert(key);
    }

    /// Enables or disables subscription creation.
    pub fn set_subscriptions_available(&self, available: bool) {
        self.faults.lock().subscriptions_down = !available;
    }

    /// Rejects share operations with `NotAuthorized`.
    pub fn deny_shares(&self, denied: bool) {
        self.faults.lock().shares_denied = denied;
    }

    /// Removes every injected failure.
    pub fn clear_faults(&self) {
        *self.faults.lock() = Faults::default();
    }
}

impl Default for RecordServer {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zonesync_protocol::{FieldValue, RecordId, SharePermission};

    fn zone() -> ZoneId {
        ZoneId::new("Companies")
    }

    fn company(id: &str, name: &str, modified: u64) -> SyncRecord {
        let mut record = SyncRecord::new(zone(), "Company", RecordId::new(id));
        record.set_field("name", FieldValue::Text(name.into()));
        record.system.modified_at = Timestamp::from_millis(modified);
        record
    }

    #[test]
    fn versions_follow_the_change_log() {
        let server = RecordServer::default();
        let outcomes = server
            .save_records(&zone(), vec![company("a", "A", 1), company("b", "B", 1)])
            .unwrap();

        assert!(matches!(outcomes[0], RecordOutcome::Saved { version: 1, .. }));
        assert!(matches!(outcomes[1], RecordOutcome::Saved { version: 2, .. }));
        assert_eq!(server.head(&zone()), 2);
        assert_eq!(server.record_count(&zone()), 2);
    }

    #[test]
    fn zones_are_independent() {
        let server = RecordServer::default();
        server.save_records(&zone(), vec![company("a", "A", 1)]).unwrap();

        let other = ZoneId::new("Other");
        let snapshot = server.fetch_changes(&other, None, 10).unwrap();
        assert!(snapshot.changes.is_empty());
        assert_eq!(server.record_count(&other), 0);
    }

    #[test]
    fn injected_failures_are_consumed() {
        let server = RecordServer::default();
        server.fail_next_fetches(1);
        server.fail_next_saves(1);

        assert!(server.fetch_changes(&zone(), None, 10).unwrap_err().is_transient());
        assert!(server.fetch_changes(&zone(), None, 10).is_ok());
        assert!(server.save_records(&zone(), vec![company("a", "A", 1)]).is_err());
        assert!(server.save_records(&zone(), vec![company("a", "A", 1)]).is_ok());
    }

    #[test]
    fn save_budget_fails_later_calls() {
        let server = RecordServer::default();
        server.fail_saves_after(1);

        assert!(server.save_records(&zone(), vec![company("a", "A", 1)]).is_ok());
        assert!(server.save_records(&zone(), vec![company("b", "B", 1)]).is_err());
        server.clear_faults();
        assert!(server.save_records(&zone(), vec![company("b", "B", 1)]).is_ok());
        assert_eq!(server.records_received(), 2);
    }

    #[test]
    fn protected_records_are_denied() {
        let server = RecordServer::default();
        server.protect(EntityKey::new("Company", "a"));
        let outcomes = server
            .save_records(&zone(), vec![company("a", "A", 1), company("b", "B", 1)])
            .unwrap();

        assert!(matches!(
            outcomes[0],
            RecordOutcome::Failed {
                failure: RecordFailure::PermissionDenied,
                ..
            }
        ));
        assert!(outcomes[1].is_success());
    }

    #[test]
    fn oversized_batches_are_rejected() {
        let server = RecordServer::new(ServerConfig::new().with_max_save_batch(1));
        let result = server.save_records(&zone(), vec![company("a", "A", 1), company("b", "B", 1)]);
        assert!(matches!(result, Err(ServerError::InvalidRequest(_))));
    }

    #[test]
    fn subscriptions_can_be_unavailable() {
        let server = RecordServer::default();
        server.set_subscriptions_available(false);
        assert!(server.create_subscription(&zone()).is_err());

        server.set_subscriptions_available(true);
        let id = server.create_subscription(&zone()).unwrap();
        assert_eq!(server.subscribed_zones(), vec![zone()]);
        assert!(server.cancel_subscription(&ZoneId::new("Other"), &id).is_err());
        server.cancel_subscription(&zone(), &id).unwrap();
        assert_eq!(server.subscription_count(), 0);
    }

    #[test]
    fn shares_can_be_denied() {
        let server = RecordServer::default();
        server.save_records(&zone(), vec![company("a", "A", 1)]).unwrap();
        let root = EntityKey::new("Company", "a");
        let request = ShareRequest {
            root: root.clone(),
            scope: vec![root],
            public_permission: SharePermission::ReadOnly,
            participants: Vec::new(),
        };

        server.deny_shares(true);
        assert!(matches!(
            server.create_share(&zone(), request.clone()),
            Err(ServerError::NotAuthorized(_))
        ));

        server.deny_shares(false);
        let info = server.create_share(&zone(), request).unwrap();
        assert_eq!(server.shares(&zone()).len(), 1);
        server.remove_share(&zone(), &info.share_id).unwrap();
        assert!(server.share(&zone(), &info.share_id).is_none());
        assert!(matches!(
            server.remove_share(&zone(), &info.share_id),
            Err(ServerError::ShareNotFound(_))
        ));
    }
}
