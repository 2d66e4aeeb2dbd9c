//! Per-zone record state and change log.

use crate::error::{ServerError, ServerResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use uuid::Uuid;
use zonesync_protocol::{
    from_cbor, to_cbor, ChangeToken, EntityKey, FetchResult, RecordFailure, RecordOutcome,
    RemoteChange, ShareChange, ShareId, ShareInfo, ShareRequest, SyncRecord, Timestamp, ZoneId,
};

/// Decoded form of a change token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct TokenState {
    epoch: u64,
    seq: u64,
}

#[derive(Debug, Clone)]
enum LogChange {
    Record(RemoteChange),
    Share(ShareChange),
}

#[derive(Debug, Clone)]
struct LogEntry {
    seq: u64,
    change: LogChange,
}

/// Records, shares and change history of one zone.
///
/// Every accepted write appends one entry with a zone-wide sequence
/// number; a record's version is the sequence number of its last accepted
/// save. Tokens name a sequence number within an epoch.
#[derive(Debug)]
pub struct ZoneLog {
    zone: ZoneId,
    epoch: u64,
    head: u64,
    compacted_through: u64,
    entries: VecDeque<LogEntry>,
    records: BTreeMap<EntityKey, SyncRecord>,
    shares: BTreeMap<ShareId, ShareInfo>,
    retention: Option<usize>,
}

impl ZoneLog {
    /// Creates an empty zone.
    pub fn new(zone: ZoneId, retention: Option<usize>) -> Self {
        Self {
            zone,
            epoch: 1,
            head: 0,
            compacted_through: 0,
            entries: VecDeque::new(),
            records: BTreeMap::new(),
            shares: BTreeMap::new(),
            retention,
        }
    }

    /// Returns the sequence number of the last entry.
    pub fn head(&self) -> u64 {
        self.head
    }

    /// Returns the number of entries still in the log.
    pub fn log_len(&self) -> usize {
        self.entries.len()
    }

    /// Returns a token covering the whole log.
    pub fn token(&self) -> ServerResult<ChangeToken> {
        self.token_at(self.head)
    }

    fn token_at(&self, seq: u64) -> ServerResult<ChangeToken> {
        let state = TokenState {
            epoch: self.epoch,
            seq,
        };
        Ok(ChangeToken::from_bytes(to_cbor(&state)?))
    }

    fn decode(&self, token: &ChangeToken) -> ServerResult<u64> {
        let state: TokenState = from_cbor(token.as_bytes())
            .map_err(|e| ServerError::InvalidRequest(format!("malformed change token: {e}")))?;
        if state.epoch != self.epoch || state.seq < self.compacted_through || state.seq > self.head
        {
            return Err(ServerError::TokenExpired {
                zone: self.zone.clone(),
            });
        }
        Ok(state.seq)
    }

    /// Returns changes after `token`, or a snapshot of every record and
    /// share when there is no token.
    pub fn fetch(&self, token: Option<&ChangeToken>, limit: usize) -> ServerResult<FetchResult> {
        let Some(token) = token else {
            return Ok(FetchResult {
                changes: self
                    .records
                    .values()
                    .cloned()
                    .map(RemoteChange::Upserted)
                    .collect(),
                share_changes: self
                    .shares
                    .values()
                    .cloned()
                    .map(ShareChange::Modified)
                    .collect(),
                token: self.token()?,
                more_coming: false,
            });
        };

        let after = self.decode(token)?;
        let start = self.entries.partition_point(|e| e.seq <= after);
        let remaining = self.entries.len() - start;
        let page: Vec<&LogEntry> = self.entries.range(start..).take(limit).collect();
        let last = page.last().map(|e| e.seq).unwrap_or(after);

        let mut changes = Vec::new();
        let mut share_changes = Vec::new();
        for entry in &page {
            match &entry.change {
                LogChange::Record(change) => changes.push(change.clone()),
                LogChange::Share(change) => share_changes.push(change.clone()),
            }
        }

        Ok(FetchResult {
            changes: coalesce(changes),
            share_changes,
            token: self.token_at(last)?,
            more_coming: remaining > page.len(),
        })
    }

    /// Saves one record.
    ///
    /// A save is accepted if it is based on the stored version or is a
    /// strictly later edit. Re-saving the stored content is a no-op.
    pub fn save(&mut self, record: SyncRecord) -> RecordOutcome {
        let key = record.key();
        if let Some(stored) = self.records.get(&key) {
            if stored.same_content(&record) {
                return RecordOutcome::Saved {
                    key,
                    version: stored.system.version,
                };
            }
            if record.system.version != stored.system.version
                && record.system.modified_at <= stored.system.modified_at
            {
                return RecordOutcome::Failed {
                    key,
                    failure: RecordFailure::ServerRecordChanged {
                        server_version: stored.system.version,
                        server_modified_at: stored.system.modified_at,
                    },
                };
            }
        }

        let version = self.head + 1;
        let mut saved = record;
        saved.zone_id = self.zone.clone();
        saved.system.version = version;
        self.records.insert(key.clone(), saved.clone());
        self.append(LogChange::Record(RemoteChange::Upserted(saved)));
        RecordOutcome::Saved { key, version }
    }

    /// Physically removes one record. Removing a missing record succeeds.
    pub fn delete(&mut self, key: EntityKey, at: Timestamp) -> RecordOutcome {
        if self.records.remove(&key).is_some() {
            self.append(LogChange::Record(RemoteChange::Deleted {
                key: key.clone(),
                deleted_at: at,
            }));
        }
        RecordOutcome::Deleted { key }
    }

    /// Creates a share rooted at an existing record.
    pub fn create_share(&mut self, request: ShareRequest) -> ServerResult<ShareInfo> {
        if !self.records.contains_key(&request.root) {
            return Err(ServerError::InvalidRequest(format!(
                "share root {} does not exist",
                request.root
            )));
        }
        if self.shares.values().any(|s| s.root == request.root) {
            return Err(ServerError::InvalidRequest(format!(
                "{} is already shared",
                request.root
            )));
        }

        let info = ShareInfo {
            share_id: ShareId::new(Uuid::new_v4().to_string()),
            root: request.root,
            scope: request.scope,
            public_permission: request.public_permission,
            participants: request.participants,
        };
        self.shares.insert(info.share_id.clone(), info.clone());
        self.append(LogChange::Share(ShareChange::Modified(info.clone())));
        Ok(info)
    }

    /// Replaces scope, permission and participants of a share.
    pub fn modify_share(&mut self, id: &ShareId, request: ShareRequest) -> ServerResult<ShareInfo> {
        let share = self
            .shares
            .get_mut(id)
            .ok_or_else(|| ServerError::ShareNotFound(id.clone()))?;
        if share.root != request.root {
            return Err(ServerError::InvalidRequest(format!(
                "share {id} is rooted at {}",
                share.root
            )));
        }
        share.scope = request.scope;
        share.public_permission = request.public_permission;
        share.participants = request.participants;

        let info = share.clone();
        self.append(LogChange::Share(ShareChange::Modified(info.clone())));
        Ok(info)
    }

    /// Removes a share. Records are kept.
    pub fn remove_share(&mut self, id: &ShareId) -> ServerResult<()> {
        let share = self
            .shares
            .remove(id)
            .ok_or_else(|| ServerError::ShareNotFound(id.clone()))?;
        self.append(LogChange::Share(ShareChange::Removed {
            share_id: share.share_id,
            root: share.root,
        }));
        Ok(())
    }

    /// Marks a participant's invitation as accepted.
    pub fn accept_share(&mut self, id: &ShareId, user_id: &str) -> ServerResult<ShareInfo> {
        let share = self
            .shares
            .get_mut(id)
            .ok_or_else(|| ServerError::ShareNotFound(id.clone()))?;
        let participant = share
            .participants
            .iter_mut()
            .find(|p| p.user_id == user_id)
            .ok_or_else(|| ServerError::NotAuthorized(format!("{user_id} is not invited to {id}")))?;
        participant.accepted = true;

        let info = share.clone();
        self.append(LogChange::Share(ShareChange::Modified(info.clone())));
        Ok(info)
    }

    /// Invalidates every outstanding token.
    pub fn expire_tokens(&mut self) {
        self.epoch += 1;
    }

    /// Returns a stored record.
    pub fn record(&self, key: &EntityKey) -> Option<&SyncRecord> {
        self.records.get(key)
    }

    /// Iterates over stored records in key order.
    pub fn records(&self) -> impl Iterator<Item = &SyncRecord> {
        self.records.values()
    }

    /// Returns a share.
    pub fn share(&self, id: &ShareId) -> Option<&ShareInfo> {
        self.shares.get(id)
    }

    /// Iterates over shares.
    pub fn shares(&self) -> impl Iterator<Item = &ShareInfo> {
        self.shares.values()
    }

    fn append(&mut self, change: LogChange) {
        self.head += 1;
        self.entries.push_back(LogEntry {
            seq: self.head,
            change,
        });

        if let Some(retention) = self.retention {
            while self.entries.len() > retention {
                if let Some(dropped) = self.entries.pop_front() {
                    self.compacted_through = dropped.seq;
                }
            }
        }
    }
}

/// Keeps the last change per record, in order of last occurrence.
fn coalesce(changes: Vec<RemoteChange>) -> Vec<RemoteChange> {
    let mut seen = HashSet::new();
    let mut kept: Vec<RemoteChange> = changes
        .into_iter()
        .rev()
        .filter(|change| seen.insert(change.key()))
        .collect();
    kept.reverse();
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use zonesync_protocol::{FieldValue, RecordId, SharePermission};

    fn record(id: &str, name: &str, modified: u64, version: u64) -> SyncRecord {
        let mut record = SyncRecord::new(ZoneId::new("z"), "Company", RecordId::new(id));
        record.set_field("name", FieldValue::Text(name.into()));
        record.system.modified_at = Timestamp::from_millis(modified);
        record.system.version = version;
        record
    }

    fn saved_version(outcome: RecordOutcome) -> u64 {
        match outcome {
            RecordOutcome::Saved { version, .. } => version,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn identical_resave_is_a_no_op() {
        let mut log = ZoneLog::new(ZoneId::new("z"), None);
        let v1 = saved_version(log.save(record("a", "Acme", 10, 0)));
        let again = saved_version(log.save(record("a", "Acme", 10, 0)));

        assert_eq!(v1, again);
        assert_eq!(log.head(), 1);
    }

    #[test]
    fn stale_save_is_rejected() {
        let mut log = ZoneLog::new(ZoneId::new("z"), None);
        let v1 = saved_version(log.save(record("a", "Acme", 10, 0)));
        saved_version(log.save(record("a", "Acme 2", 20, v1)));

        let stale = log.save(record("a", "Acme old", 15, v1));
        assert!(matches!(
            stale,
            RecordOutcome::Failed {
                failure: RecordFailure::ServerRecordChanged { .. },
                ..
            }
        ));

        // A newer edit wins even when based on an old version.
        let newer = log.save(record("a", "Acme 3", 30, v1));
        assert!(newer.is_success());
    }

    #[test]
    fn fetch_pages_and_coalesces() {
        let mut log = ZoneLog::new(ZoneId::new("z"), None);
        let start = log.token().unwrap();
        log.save(record("a", "A1", 1, 0));
        log.save(record("b", "B1", 2, 0));
        log.save(record("a", "A2", 3, 1));

        let page = log.fetch(Some(&start), 2).unwrap();
        assert!(page.more_coming);
        assert_eq!(page.changes.len(), 2);

        let rest = log.fetch(Some(&page.token), 2).unwrap();
        assert!(!rest.more_coming);
        assert_eq!(rest.changes.len(), 1);

        let all = log.fetch(Some(&start), 10).unwrap();
        assert_eq!(all.changes.len(), 2);
        let a = all.changes.iter().find(|c| c.key().record_id.as_str() == "a").unwrap();
        assert_eq!(a.record().unwrap().field("name"), Some(&FieldValue::Text("A2".into())));
    }

    #[test]
    fn snapshot_without_token() {
        let mut log = ZoneLog::new(ZoneId::new("z"), None);
        log.save(record("a", "A", 1, 0));
        log.save(record("b", "B", 1, 0));
        log.delete(EntityKey::new("Company", "b"), Timestamp::from_millis(2));

        let snapshot = log.fetch(None, 1).unwrap();
        assert_eq!(snapshot.changes.len(), 1);
        assert!(!snapshot.more_coming);
    }

    #[test]
    fn tokens_expire_by_epoch_and_compaction() {
        let mut log = ZoneLog::new(ZoneId::new("z"), Some(2));
        let old = log.token().unwrap();
        for i in 0..4 {
            log.save(record(&format!("r{i}"), "x", 1, 0));
        }
        assert!(matches!(
            log.fetch(Some(&old), 10),
            Err(ServerError::TokenExpired { .. })
        ));

        let current = log.token().unwrap();
        assert!(log.fetch(Some(&current), 10).is_ok());
        log.expire_tokens();
        assert!(matches!(
            log.fetch(Some(&current), 10),
            Err(ServerError::TokenExpired { .. })
        ));
    }

    #[test]
    fn malformed_token_is_invalid() {
        let log = ZoneLog::new(ZoneId::new("z"), None);
        let result = log.fetch(Some(&ChangeToken::from_bytes(vec![0xff, 0x00])), 10);
        assert!(matches!(result, Err(ServerError::InvalidRequest(_))));
    }

    #[test]
    fn share_lifecycle_is_logged() {
        let mut log = ZoneLog::new(ZoneId::new("z"), None);
        log.save(record("a", "Acme", 1, 0));
        let before = log.token().unwrap();
        let root = EntityKey::new("Company", "a");

        let request = ShareRequest {
            root: root.clone(),
            scope: vec![root.clone()],
            public_permission: SharePermission::ReadOnly,
            participants: vec![zonesync_protocol::Participant::invited(
                "ann@example.com",
                SharePermission::ReadWrite,
            )],
        };
        let info = log.create_share(request.clone()).unwrap();
        assert!(log.create_share(request).is_err());

        let accepted = log.accept_share(&info.share_id, "ann@example.com").unwrap();
        assert!(accepted.participants[0].accepted);
        log.remove_share(&info.share_id).unwrap();
        assert!(log.record(&root).is_some());

        let page = log.fetch(Some(&before), 10).unwrap();
        assert_eq!(page.share_changes.len(), 3);
        assert!(matches!(page.share_changes[2], ShareChange::Removed { .. }));
    }

    proptest! {
        #[test]
        fn paging_replays_to_the_stored_state(
            edits in proptest::collection::vec(0u8..4, 1..30),
            limit in 1usize..6,
        ) {
            let mut log = ZoneLog::new(ZoneId::new("z"), None);
            let start = log.token().unwrap();
            for (i, id) in edits.iter().enumerate() {
                log.save(record(&format!("r{id}"), &format!("n{i}"), i as u64 + 1, 0));
            }

            let mut replayed = std::collections::BTreeMap::new();
            let mut token = start;
            loop {
                let page = log.fetch(Some(&token), limit).unwrap();
                for change in &page.changes {
                    if let Some(record) = change.record() {
                        replayed.insert(record.key(), record.field("name").cloned());
                    }
                }
                token = page.token;
                if !page.more_coming {
                    break;
                }
            }

            let stored: std::collections::BTreeMap<_, _> = log
                .records()
                .map(|r| (r.key(), r.field("name").cloned()))
                .collect();
            prop_assert_eq!(replayed, stored);
        }
    }
}
