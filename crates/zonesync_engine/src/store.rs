//! Local object store contract and an in-memory implementation.
//!
//! The store is shared mutable state: applications write through it and
//! the engine reads and writes through it. Writes carry an origin so that
//! changes applied by the engine are not reported back as local edits.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tokio::sync::broadcast;
use zonesync_protocol::{EntityKey, FieldValue, Fields, Timestamp};

/// Result type for local store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a local store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Store is unavailable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A write was rejected.
    #[error("write rejected for {key}: {reason}")]
    Rejected {
        /// Entity the write targeted.
        key: EntityKey,
        /// Reason.
        reason: String,
    },
}

/// An entity instance in the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Type id and primary key.
    pub key: EntityKey,
    /// Field values, including the parent key and deleted flag fields.
    pub fields: Fields,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last edit (or deletion) time.
    pub modified_at: Timestamp,
    /// Last service version this entity was synced at.
    pub remote_version: Option<u64>,
}

impl Entity {
    /// Creates a never-synced entity.
    pub fn new(key: EntityKey, fields: Fields, at: Timestamp) -> Self {
        Self {
            key,
            fields,
            created_at: at,
            modified_at: at,
            remote_version: None,
        }
    }

    /// Returns a field value.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Sets a field value and bumps the modification time.
    pub fn set(&mut self, name: impl Into<String>, value: FieldValue, at: Timestamp) {
        self.fields.insert(name.into(), value);
        self.modified_at = self.modified_at.max(at);
    }
}

/// Who performed a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    /// Application edit; reported by `changes_since`.
    Local,
    /// Engine write (merge result, bookkeeping); not reported.
    Sync,
}

/// A single write within an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreWrite {
    /// Insert or replace an entity.
    Upsert(Entity),
    /// Physically remove an entity.
    Remove(EntityKey),
}

impl StoreWrite {
    /// Returns the key the write targets.
    pub fn key(&self) -> &EntityKey {
        match self {
            StoreWrite::Upsert(entity) => &entity.key,
            StoreWrite::Remove(key) => key,
        }
    }
}

/// Position in the store's local change log.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StoreMarker(pub u64);

/// Change notification emitted after every committed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreChange {
    /// Keys touched by the batch.
    pub keys: Vec<EntityKey>,
    /// Origin of the batch.
    pub origin: WriteOrigin,
    /// Marker after the batch.
    pub marker: StoreMarker,
}

/// A local object store the engine synchronizes.
pub trait LocalStore: Send + Sync {
    /// Reads an entity, tombstones included.
    fn get(&self, key: &EntityKey) -> StoreResult<Option<Entity>>;

    /// Returns all entities of a type matching the predicate.
    fn query(&self, type_id: &str, predicate: &dyn Fn(&Entity) -> bool)
        -> StoreResult<Vec<Entity>>;

    /// Applies a batch atomically; readers see all of it or none of it.
    fn apply(&self, writes: Vec<StoreWrite>, origin: WriteOrigin) -> StoreResult<StoreMarker>;

    /// Returns keys written with `WriteOrigin::Local` after `marker`,
    /// together with the current marker.
    fn changes_since(&self, marker: StoreMarker) -> StoreResult<(Vec<EntityKey>, StoreMarker)>;

    /// Returns the current marker.
    fn marker(&self) -> StoreMarker;

    /// Subscribes to change notifications.
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;

    /// Inserts or replaces one entity as a local edit.
    fn upsert(&self, entity: Entity) -> StoreResult<()> {
        self.apply(vec![StoreWrite::Upsert(entity)], WriteOrigin::Local)
            .map(|_| ())
    }
}

#[derive(Default)]
struct MemoryInner {
    entities: BTreeMap<EntityKey, Entity>,
    local_log: Vec<(u64, EntityKey)>,
    sequence: u64,
}

/// In-memory local store.
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
    notifier: broadcast::Sender<StoreChange>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let (notifier, _) = broadcast::channel(256);
        Self {
            inner: RwLock::new(MemoryInner::default()),
            notifier,
        }
    }

    /// Returns the number of stored entities, tombstones included.
    pub fn len(&self) -> usize {
        self.inner.read().entities.len()
    }

    /// Returns true if the store holds no entities.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &EntityKey) -> StoreResult<Option<Entity>> {
        Ok(self.inner.read().entities.get(key).cloned())
    }

    fn query(
        &self,
        type_id: &str,
        predicate: &dyn Fn(&Entity) -> bool,
    ) -> StoreResult<Vec<Entity>> {
        let inner = self.inner.read();
        Ok(inner
            .entities
            .values()
            .filter(|e| e.key.record_type == type_id && predicate(e))
            .cloned()
            .collect())
    }

    fn apply(&self, writes: Vec<StoreWrite>, origin: WriteOrigin) -> StoreResult<StoreMarker> {
        let (keys, marker) = {
            let mut inner = self.inner.write();
            inner.sequence += 1;
            let sequence = inner.sequence;
            let mut keys = Vec::with_capacity(writes.len());

            for write in writes {
                let key = write.key().clone();
                match write {
                    StoreWrite::Upsert(entity) => {
                        inner.entities.insert(key.clone(), entity);
                    }
                    StoreWrite::Remove(key) => {
                        inner.entities.remove(&key);
                    }
                }
                if origin == WriteOrigin::Local {
                    inner.local_log.push((sequence, key.clone()));
                }
                keys.push(key);
            }
            (keys, StoreMarker(sequence))
        };

        // No receivers is fine.
        let _ = self.notifier.send(StoreChange {
            keys,
            origin,
            marker,
        });
        Ok(marker)
    }

    fn changes_since(&self, marker: StoreMarker) -> StoreResult<(Vec<EntityKey>, StoreMarker)> {
        let inner = self.inner.read();
        let start = inner.local_log.partition_point(|(seq, _)| *seq <= marker.0);
        let keys: BTreeSet<EntityKey> = inner.local_log[start..]
            .iter()
            .map(|(_, key)| key.clone())
            .collect();
        Ok((keys.into_iter().collect(), StoreMarker(inner.sequence)))
    }

    fn marker(&self) -> StoreMarker {
        StoreMarker(self.inner.read().sequence)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.notifier.subscribe()
    }
}
