//! Model adapters: translation between local entities and remote records.
//!
//! An adapter owns one entity type. It produces upload records for the
//! type's pending entities (parents before children), applies downloaded
//! changes into a [`StagedBatch`], purges confirmed tombstones and keeps a
//! parent id -> child ids index used for cascades and shares.
//!
//! Adapters never write to the store while merging. Everything a merge
//! decides is staged and committed in one atomic batch by the caller.

use crate::descriptor::EntityDescriptor;
use crate::error::{SyncError, SyncResult};
use crate::store::{Entity, LocalStore, StoreMarker, StoreResult, StoreWrite, WriteOrigin};
use crate::tracker::PendingChangeSet;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;
use tracing::debug;
use zonesync_protocol::{
    EntityKey, FieldValue, RecordId, RemoteChange, SyncRecord, SystemFields, Timestamp, ZoneId,
};

/// Local-store writes decided during a merge, not yet committed.
///
/// Lookups through the batch see staged writes first, so later steps of a
/// merge observe earlier ones.
#[derive(Debug, Default, Clone)]
pub struct StagedBatch {
    writes: BTreeMap<EntityKey, Option<Entity>>,
}

impl StagedBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages an upsert.
    pub fn stage(&mut self, entity: Entity) {
        self.writes.insert(entity.key.clone(), Some(entity));
    }

    /// Stages a physical removal.
    pub fn stage_removal(&mut self, key: EntityKey) {
        self.writes.insert(key, None);
    }

    /// Reads an entity, preferring staged state over the store.
    pub fn lookup(&self, store: &dyn LocalStore, key: &EntityKey) -> StoreResult<Option<Entity>> {
        match self.writes.get(key) {
            Some(staged) => Ok(staged.clone()),
            None => store.get(key),
        }
    }

    /// Returns the staged state of a key, if it was staged.
    pub fn staged(&self, key: &EntityKey) -> Option<Option<&Entity>> {
        self.writes.get(key).map(Option::as_ref)
    }

    /// Iterates over staged writes; `None` marks a removal.
    pub fn iter(&self) -> impl Iterator<Item = (&EntityKey, Option<&Entity>)> {
        self.writes.iter().map(|(k, v)| (k, v.as_ref()))
    }

    /// Returns the number of staged writes.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Returns true if nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Converts the batch into store writes.
    pub fn into_writes(self) -> Vec<StoreWrite> {
        self.writes
            .into_iter()
            .map(|(key, entity)| match entity {
                Some(entity) => StoreWrite::Upsert(entity),
                None => StoreWrite::Remove(key),
            })
            .collect()
    }
}

/// Result of applying one downloaded change.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// The change was staged.
    Applied,
    /// Local state already reflects the change.
    Unchanged,
    /// The entity is pending locally but already matches the remote
    /// record; the pending entry is obsolete.
    Converged,
    /// The entity has unsynced local edits; nothing was staged.
    Conflict(Box<Entity>),
    /// The record's parent exists neither locally nor in the batch.
    MissingParent(RecordId),
}

/// Translation and change-tracking layer for one entity type.
pub trait ModelAdapter: Send + Sync {
    /// Descriptor of the adapted type.
    fn descriptor(&self) -> &EntityDescriptor;

    /// Converts an entity into an upload record.
    fn to_record(&self, zone: &ZoneId, entity: &Entity) -> SyncRecord;

    /// Returns one record per pending entity of this type, parents first.
    fn records_to_upload(
        &self,
        zone: &ZoneId,
        pending: &PendingChangeSet,
    ) -> SyncResult<Vec<SyncRecord>>;

    /// Applies a downloaded change unless it would clobber a pending edit.
    fn apply_downloaded(
        &self,
        change: &RemoteChange,
        pending: &PendingChangeSet,
        staged: &mut StagedBatch,
    ) -> SyncResult<ApplyOutcome>;

    /// Applies a downloaded change over any pending edit.
    fn accept_remote(
        &self,
        change: &RemoteChange,
        staged: &mut StagedBatch,
    ) -> SyncResult<ApplyOutcome>;

    /// Physically removes the given tombstones. Entities that are no longer
    /// tombstones are left alone. Returns the purged ids.
    fn purge_tombstones(&self, confirmed: &BTreeSet<RecordId>) -> SyncResult<Vec<RecordId>>;

    /// Returns ids of entities of this type whose parent is `parent`,
    /// including staged changes.
    fn children_of(&self, parent: &RecordId, staged: &StagedBatch) -> SyncResult<Vec<RecordId>>;

    /// Reads an entity of this type through the staged batch.
    fn local_entity(&self, id: &RecordId, staged: &StagedBatch) -> SyncResult<Option<Entity>>;

    /// Returns every stored entity of this type, tombstones included.
    fn all_entities(&self) -> SyncResult<Vec<Entity>>;
}

#[derive(Default)]
struct ChildIndex {
    built_at: Option<StoreMarker>,
    children: HashMap<RecordId, BTreeSet<RecordId>>,
}

/// Generic adapter driven entirely by an [`EntityDescriptor`].
pub struct StoreAdapter {
    descriptor: EntityDescriptor,
    store: Arc<dyn LocalStore>,
    index: RwLock<ChildIndex>,
}

impl StoreAdapter {
    /// Creates an adapter for `descriptor` over `store`.
    pub fn new(descriptor: EntityDescriptor, store: Arc<dyn LocalStore>) -> Self {
        Self {
            descriptor,
            store,
            index: RwLock::new(ChildIndex::default()),
        }
    }

    /// Creates an adapter for a typed model.
    pub fn for_type<T: crate::Syncable>(store: Arc<dyn LocalStore>) -> Self {
        Self::new(T::descriptor(), store)
    }

    fn refresh_index(&self) -> SyncResult<()> {
        let marker = self.store.marker();
        if self.index.read().built_at == Some(marker) {
            return Ok(());
        }
        if self.descriptor.parent.is_none() {
            self.index.write().built_at = Some(marker);
            return Ok(());
        }

        let mut children: HashMap<RecordId, BTreeSet<RecordId>> = HashMap::new();
        for entity in self.store.query(&self.descriptor.type_id, &|_| true)? {
            if let Some(parent) = self.descriptor.parent_of(&entity.fields) {
                children
                    .entry(parent)
                    .or_default()
                    .insert(entity.key.record_id.clone());
            }
        }

        let mut index = self.index.write();
        index.children = children;
        index.built_at = Some(marker);
        Ok(())
    }

    fn entity_from_record(&self, record: &SyncRecord, local: Option<&Entity>) -> Entity {
        let mut fields = record.fields.clone();
        fields
            .entry(self.descriptor.primary_key_field.clone())
            .or_insert_with(|| FieldValue::Text(record.record_id.to_string()));
        fields
            .entry(self.descriptor.deleted_flag_field.clone())
            .or_insert(FieldValue::Bool(false));
        if let (Some(link), Some(parent)) = (&self.descriptor.parent, &record.parent) {
            fields
                .entry(link.field.clone())
                .or_insert_with(|| FieldValue::Reference(parent.clone()));
        }

        Entity {
            key: record.key(),
            fields,
            created_at: local
                .map(|l| l.created_at)
                .unwrap_or(record.system.created_at),
            modified_at: record.system.modified_at,
            remote_version: Some(record.system.version),
        }
    }

    fn matches(&self, local: &Entity, record: &SyncRecord) -> bool {
        self.to_record(&record.zone_id, local).same_content(record)
    }

    fn write_record(
        &self,
        record: &SyncRecord,
        local: Option<&Entity>,
        staged: &mut StagedBatch,
    ) -> SyncResult<ApplyOutcome> {
        let deleted = record.flag(&self.descriptor.deleted_flag_field);
        if let (Some(link), Some(parent), false) = (&self.descriptor.parent, &record.parent, deleted)
        {
            let parent_key = EntityKey::new(link.type_id.clone(), parent.clone());
            if staged.lookup(self.store.as_ref(), &parent_key)?.is_none() {
                return Ok(ApplyOutcome::MissingParent(parent.clone()));
            }
        }

        staged.stage(self.entity_from_record(record, local));
        Ok(ApplyOutcome::Applied)
    }

    fn write_removal(
        &self,
        local: Option<Entity>,
        deleted_at: Timestamp,
        staged: &mut StagedBatch,
    ) -> ApplyOutcome {
        match local {
            Some(mut entity) => {
                self.descriptor.mark_deleted(&mut entity, deleted_at);
                staged.stage(entity);
                ApplyOutcome::Applied
            }
            None => ApplyOutcome::Unchanged,
        }
    }
}

impl ModelAdapter for StoreAdapter {
    fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    fn to_record(&self, zone: &ZoneId, entity: &Entity) -> SyncRecord {
        SyncRecord {
            zone_id: zone.clone(),
            record_type: entity.key.record_type.clone(),
            record_id: entity.key.record_id.clone(),
            parent: self.descriptor.parent_of(&entity.fields),
            fields: entity.fields.clone(),
            system: SystemFields {
                created_at: entity.created_at,
                modified_at: entity.modified_at,
                version: entity.remote_version.unwrap_or(0),
            },
        }
    }

    fn records_to_upload(
        &self,
        zone: &ZoneId,
        pending: &PendingChangeSet,
    ) -> SyncResult<Vec<SyncRecord>> {
        let mut entities: HashMap<RecordId, Entity> = HashMap::new();
        for id in pending.ids_of_type(&self.descriptor.type_id) {
            match self.store.get(&self.descriptor.key(id.clone()))? {
                Some(entity) => {
                    entities.insert(id, entity);
                }
                None => debug!(record_type = %self.descriptor.type_id, id = %id, "pending entity no longer stored"),
            }
        }

        let mut ids: Vec<RecordId> = entities.keys().cloned().collect();
        ids.sort();

        let self_parent = self.descriptor.parent_type() == Some(self.descriptor.type_id.as_str());
        let ordered = topological_order(&ids, |id| {
            if !self_parent {
                return None;
            }
            entities
                .get(id)
                .and_then(|e| self.descriptor.parent_of(&e.fields))
        })
        .map_err(|id| {
            SyncError::Configuration(format!(
                "parent cycle through {}/{}",
                self.descriptor.type_id, id
            ))
        })?;

        Ok(ordered
            .iter()
            .filter_map(|id| entities.get(id))
            .map(|entity| self.to_record(zone, entity))
            .collect())
    }

    fn apply_downloaded(
        &self,
        change: &RemoteChange,
        pending: &PendingChangeSet,
        staged: &mut StagedBatch,
    ) -> SyncResult<ApplyOutcome> {
        let key = change.key();
        let local = staged.lookup(self.store.as_ref(), &key)?;
        let is_pending = pending.contains(&key);

        match change {
            RemoteChange::Upserted(record) => {
                if let Some(local) = &local {
                    let seen = local.remote_version.unwrap_or(0);
                    let replay = local.remote_version.is_some() && seen > record.system.version;
                    let same_base = local.remote_version == Some(record.system.version)
                        && (is_pending || self.matches(local, record));
                    if replay || same_base {
                        return Ok(ApplyOutcome::Unchanged);
                    }
                }

                match local {
                    Some(local) if is_pending => {
                        if self.matches(&local, record) {
                            staged.stage(self.entity_from_record(record, Some(&local)));
                            Ok(ApplyOutcome::Converged)
                        } else {
                            Ok(ApplyOutcome::Conflict(Box::new(local)))
                        }
                    }
                    local => self.write_record(record, local.as_ref(), staged),
                }
            }
            RemoteChange::Deleted { deleted_at, .. } => match local {
                None => Ok(ApplyOutcome::Unchanged),
                Some(local) if self.descriptor.is_deleted(&local.fields) => {
                    if is_pending {
                        Ok(ApplyOutcome::Converged)
                    } else {
                        Ok(ApplyOutcome::Unchanged)
                    }
                }
                Some(local) if is_pending => Ok(ApplyOutcome::Conflict(Box::new(local))),
                local => Ok(self.write_removal(local, *deleted_at, staged)),
            },
        }
    }

    fn accept_remote(
        &self,
        change: &RemoteChange,
        staged: &mut StagedBatch,
    ) -> SyncResult<ApplyOutcome> {
        let local = staged.lookup(self.store.as_ref(), &change.key())?;
        match change {
            RemoteChange::Upserted(record) => self.write_record(record, local.as_ref(), staged),
            RemoteChange::Deleted { deleted_at, .. } => {
                Ok(self.write_removal(local, *deleted_at, staged))
            }
        }
    }

    fn purge_tombstones(&self, confirmed: &BTreeSet<RecordId>) -> SyncResult<Vec<RecordId>> {
        let mut writes = Vec::new();
        let mut purged = Vec::new();
        for id in confirmed {
            let key = self.descriptor.key(id.clone());
            if let Some(entity) = self.store.get(&key)? {
                if self.descriptor.is_deleted(&entity.fields) {
                    writes.push(StoreWrite::Remove(key));
                    purged.push(id.clone());
                }
            }
        }

        if !writes.is_empty() {
            self.store.apply(writes, WriteOrigin::Sync)?;
        }
        Ok(purged)
    }

    fn children_of(&self, parent: &RecordId, staged: &StagedBatch) -> SyncResult<Vec<RecordId>> {
        self.refresh_index()?;
        let mut children = self
            .index
            .read()
            .children
            .get(parent)
            .cloned()
            .unwrap_or_default();

        for (key, entity) in staged.iter() {
            if key.record_type != self.descriptor.type_id {
                continue;
            }
            let staged_parent = entity.and_then(|e| self.descriptor.parent_of(&e.fields));
            if staged_parent.as_ref() == Some(parent) {
                children.insert(key.record_id.clone());
            } else {
                children.remove(&key.record_id);
            }
        }
        Ok(children.into_iter().collect())
    }

    fn local_entity(&self, id: &RecordId, staged: &StagedBatch) -> SyncResult<Option<Entity>> {
        Ok(staged.lookup(self.store.as_ref(), &self.descriptor.key(id.clone()))?)
    }

    fn all_entities(&self) -> SyncResult<Vec<Entity>> {
        Ok(self.store.query(&self.descriptor.type_id, &|_| true)?)
    }
}

/// Orders ids so that every id comes after its parent (when the parent is
/// also in `ids`). Returns the id at which a cycle was detected.
pub(crate) fn topological_order<T: Clone + Eq + Hash>(
    ids: &[T],
    parent_of: impl Fn(&T) -> Option<T>,
) -> Result<Vec<T>, T> {
    let members: HashSet<T> = ids.iter().cloned().collect();
    let mut placed: HashSet<T> = HashSet::with_capacity(ids.len());
    let mut ordered = Vec::with_capacity(ids.len());

    for id in ids {
        let mut chain = Vec::new();
        let mut on_chain = HashSet::new();
        let mut current = Some(id.clone());

        while let Some(node) = current {
            if placed.contains(&node) || !members.contains(&node) {
                break;
            }
            if !on_chain.insert(node.clone()) {
                return Err(node);
            }
            current = parent_of(&node);
            chain.push(node);
        }

        for node in chain.into_iter().rev() {
            placed.insert(node.clone());
            ordered.push(node);
        }
    }
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use proptest::prelude::*;
    use zonesync_protocol::Fields;

    fn company() -> EntityDescriptor {
        EntityDescriptor::new("Company", "identifier")
    }

    fn employee() -> EntityDescriptor {
        EntityDescriptor::new("Employee", "identifier").with_parent("company", "Company")
    }

    fn folder() -> EntityDescriptor {
        EntityDescriptor::new("Folder", "identifier").with_parent("parent", "Folder")
    }

    fn fields(pairs: &[(&str, FieldValue)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn remote_company(id: &str, name: &str, modified: u64, version: u64) -> SyncRecord {
        let mut record = SyncRecord::new(ZoneId::new("z"), "Company", RecordId::new(id));
        record.fields = fields(&[
            ("identifier", FieldValue::Text(id.into())),
            ("name", FieldValue::Text(name.into())),
            ("isDeleted", FieldValue::Bool(false)),
        ]);
        record.system.modified_at = Timestamp::from_millis(modified);
        record.system.version = version;
        record
    }

    fn remote_employee(id: &str, company: &str) -> SyncRecord {
        let mut record = SyncRecord::new(ZoneId::new("z"), "Employee", RecordId::new(id));
        record.parent = Some(RecordId::new(company));
        record.fields = fields(&[
            ("identifier", FieldValue::Text(id.into())),
            ("company", FieldValue::Reference(RecordId::new(company))),
        ]);
        record.system.modified_at = Timestamp::from_millis(1);
        record.system.version = 1;
        record
    }

    #[test]
    fn applying_twice_is_idempotent() {
        let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
        let adapter = StoreAdapter::new(company(), store.clone());
        let change = RemoteChange::Upserted(remote_company("acme", "Acme", 10, 1));
        let pending = PendingChangeSet::default();

        let mut staged = StagedBatch::new();
        assert_eq!(
            adapter.apply_downloaded(&change, &pending, &mut staged).unwrap(),
            ApplyOutcome::Applied
        );
        store.apply(staged.into_writes(), WriteOrigin::Sync).unwrap();
        let once = store.get(&EntityKey::new("Company", "acme")).unwrap();

        let mut staged = StagedBatch::new();
        assert_eq!(
            adapter.apply_downloaded(&change, &pending, &mut staged).unwrap(),
            ApplyOutcome::Unchanged
        );
        store.apply(staged.into_writes(), WriteOrigin::Sync).unwrap();
        let twice = store.get(&EntityKey::new("Company", "acme")).unwrap();

        assert_eq!(once, twice);
    }

    #[test]
    fn pending_entity_yields_conflict() {
        let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
        let adapter = StoreAdapter::new(company(), store.clone());
        let local = company()
            .entity(
                fields(&[
                    ("identifier", "acme".into()),
                    ("name", "Acme Local".into()),
                ]),
                Timestamp::from_millis(20),
            )
            .unwrap();
        store.upsert(local).unwrap();

        let mut pending = PendingChangeSet::default();
        pending.mark_dirty(EntityKey::new("Company", "acme"));

        let change = RemoteChange::Upserted(remote_company("acme", "Acme Remote", 10, 1));
        let mut staged = StagedBatch::new();
        let outcome = adapter.apply_downloaded(&change, &pending, &mut staged).unwrap();
        assert!(matches!(outcome, ApplyOutcome::Conflict(_)));
        assert!(staged.is_empty());
    }

    #[test]
    fn child_without_parent_is_reported() {
        let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
        let adapter = StoreAdapter::new(employee(), store);
        let change = RemoteChange::Upserted(remote_employee("bob", "acme"));

        let mut staged = StagedBatch::new();
        let outcome = adapter
            .apply_downloaded(&change, &PendingChangeSet::default(), &mut staged)
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::MissingParent(RecordId::new("acme")));
    }

    #[test]
    fn staged_parent_satisfies_child() {
        let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
        let companies = StoreAdapter::new(company(), store.clone());
        let employees = StoreAdapter::new(employee(), store);
        let pending = PendingChangeSet::default();

        let mut staged = StagedBatch::new();
        companies
            .apply_downloaded(
                &RemoteChange::Upserted(remote_company("acme", "Acme", 1, 1)),
                &pending,
                &mut staged,
            )
            .unwrap();
        let outcome = employees
            .apply_downloaded(
                &RemoteChange::Upserted(remote_employee("bob", "acme")),
                &pending,
                &mut staged,
            )
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(
            employees.children_of(&RecordId::new("acme"), &staged).unwrap(),
            vec![RecordId::new("bob")]
        );
    }

    #[test]
    fn remote_removal_sets_tombstone() {
        let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
        let adapter = StoreAdapter::new(company(), store.clone());
        let mut staged = StagedBatch::new();
        adapter
            .apply_downloaded(
                &RemoteChange::Upserted(remote_company("acme", "Acme", 1, 1)),
                &PendingChangeSet::default(),
                &mut staged,
            )
            .unwrap();
        store.apply(staged.into_writes(), WriteOrigin::Sync).unwrap();

        let removal = RemoteChange::Deleted {
            key: EntityKey::new("Company", "acme"),
            deleted_at: Timestamp::from_millis(7),
        };
        let mut staged = StagedBatch::new();
        adapter
            .apply_downloaded(&removal, &PendingChangeSet::default(), &mut staged)
            .unwrap();
        store.apply(staged.into_writes(), WriteOrigin::Sync).unwrap();

        let entity = store.get(&EntityKey::new("Company", "acme")).unwrap().unwrap();
        assert!(company().is_deleted(&entity.fields));
    }

    #[test]
    fn purge_skips_revived_entities() {
        let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
        let adapter = StoreAdapter::new(company(), store.clone());
        for (id, deleted) in [("gone", true), ("back", false)] {
            let mut entity = company()
                .entity(fields(&[("identifier", id.into())]), Timestamp::from_millis(1))
                .unwrap();
            if deleted {
                company().mark_deleted(&mut entity, Timestamp::from_millis(2));
            }
            store.upsert(entity).unwrap();
        }

        let confirmed: BTreeSet<RecordId> = [RecordId::new("gone"), RecordId::new("back")].into();
        let purged = adapter.purge_tombstones(&confirmed).unwrap();
        assert_eq!(purged, vec![RecordId::new("gone")]);
        assert!(store.get(&EntityKey::new("Company", "back")).unwrap().is_some());
        assert!(store.get(&EntityKey::new("Company", "gone")).unwrap().is_none());
    }

    #[test]
    fn self_referencing_cycle_is_configuration_error() {
        let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
        let adapter = StoreAdapter::new(folder(), store.clone());
        let mut pending = PendingChangeSet::default();
        for (id, parent) in [("a", "b"), ("b", "a")] {
            let entity = folder()
                .entity(
                    fields(&[
                        ("identifier", id.into()),
                        ("parent", FieldValue::Reference(RecordId::new(parent))),
                    ]),
                    Timestamp::from_millis(1),
                )
                .unwrap();
            pending.mark_dirty(entity.key.clone());
            store.upsert(entity).unwrap();
        }

        let result = adapter.records_to_upload(&ZoneId::new("z"), &pending);
        assert!(matches!(result, Err(SyncError::Configuration(_))));
    }

    proptest! {
        #[test]
        fn parents_precede_children(parents in proptest::collection::vec(proptest::option::of(0usize..64), 1..40)) {
            // Node i may only point at an earlier node, so the graph is a forest.
            // Ids count down so that sorted order puts children first.
            let store: Arc<dyn LocalStore> = Arc::new(MemoryStore::new());
            let adapter = StoreAdapter::new(folder(), store.clone());
            let mut pending = PendingChangeSet::default();

            for (i, parent) in parents.iter().enumerate() {
                let mut f = fields(&[("identifier", FieldValue::Text(format!("n{:03}", 500 - i)))]);
                match *parent {
                    Some(p) if p < i => {
                        f.insert(
                            "parent".into(),
                            FieldValue::Reference(RecordId::new(format!("n{:03}", 500 - p))),
                        );
                    }
                    _ => {}
                }
                let entity = folder().entity(f, Timestamp::from_millis(1)).unwrap();
                pending.mark_dirty(entity.key.clone());
                store.upsert(entity).unwrap();
            }

            let records = adapter.records_to_upload(&ZoneId::new("z"), &pending).unwrap();
            prop_assert_eq!(records.len(), parents.len());

            let position: HashMap<RecordId, usize> = records
                .iter()
                .enumerate()
                .map(|(i, r)| (r.record_id.clone(), i))
                .collect();
            for record in &records {
                if let Some(parent) = &record.parent {
                    prop_assert!(position[parent] < position[&record.record_id]);
                }
            }
        }
    }
}
