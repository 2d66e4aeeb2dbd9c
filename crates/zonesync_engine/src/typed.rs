//! Typed access to synced entities.

use crate::descriptor::{EntityDescriptor, Syncable};
use crate::error::SyncResult;
use crate::store::{Entity, LocalStore};
use std::marker::PhantomData;
use std::sync::Arc;
use zonesync_protocol::{FieldValue, RecordId, Timestamp};

/// A typed view over one entity type in a local store.
///
/// Writes made through the collection are local edits and are picked up
/// by the next sync pass. Deletion is soft: the entity becomes a
/// tombstone and is hidden from `get`/`all`.
///
/// ```rust,ignore
/// let companies: TypedCollection<Company> = TypedCollection::new(store.clone());
/// companies.put(&acme, Timestamp::now())?;
/// companies.delete(&acme.identifier, Timestamp::now())?;
/// ```
pub struct TypedCollection<T: Syncable> {
    store: Arc<dyn LocalStore>,
    descriptor: EntityDescriptor,
    _marker: PhantomData<T>,
}

impl<T: Syncable> TypedCollection<T> {
    /// Creates a collection over the given store.
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self {
            store,
            descriptor: T::descriptor(),
            _marker: PhantomData,
        }
    }

    /// Returns the descriptor of `T`.
    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    /// Inserts or updates a model, stamping it with `at`.
    ///
    /// Updating keeps the creation time and sync version of the stored
    /// entity and revives tombstones.
    pub fn put(&self, value: &T, at: Timestamp) -> SyncResult<()> {
        let mut fields = value.to_fields();
        fields.insert(
            self.descriptor.deleted_flag_field.clone(),
            FieldValue::Bool(false),
        );
        let mut entity = self.descriptor.entity(fields, at)?;

        if let Some(existing) = self.store.get(&entity.key)? {
            entity.created_at = existing.created_at;
            entity.remote_version = existing.remote_version;
        }
        self.store.upsert(entity)?;
        Ok(())
    }

    /// Gets a live model by id.
    pub fn get(&self, id: &RecordId) -> SyncResult<Option<T>> {
        match self.raw(id)? {
            Some(entity) if !self.descriptor.is_deleted(&entity.fields) => {
                Ok(Some(T::from_fields(&entity.fields)?))
            }
            _ => Ok(None),
        }
    }

    /// Returns the stored entity, tombstones included.
    pub fn raw(&self, id: &RecordId) -> SyncResult<Option<Entity>> {
        Ok(self.store.get(&self.descriptor.key(id.clone()))?)
    }

    /// Returns true if the entity exists and is a tombstone.
    pub fn is_tombstone(&self, id: &RecordId) -> SyncResult<bool> {
        Ok(self
            .raw(id)?
            .map(|e| self.descriptor.is_deleted(&e.fields))
            .unwrap_or(false))
    }

    /// Returns all live models.
    pub fn all(&self) -> SyncResult<Vec<T>> {
        let descriptor = &self.descriptor;
        self.store
            .query(&descriptor.type_id, &|e| !descriptor.is_deleted(&e.fields))?
            .iter()
            .map(|e| T::from_fields(&e.fields))
            .collect()
    }

    /// Returns the number of live models.
    pub fn count(&self) -> SyncResult<usize> {
        let descriptor = &self.descriptor;
        Ok(self
            .store
            .query(&descriptor.type_id, &|e| !descriptor.is_deleted(&e.fields))?
            .len())
    }

    /// Soft-deletes a model. Returns false if it did not exist.
    pub fn delete(&self, id: &RecordId, at: Timestamp) -> SyncResult<bool> {
        match self.raw(id)? {
            Some(mut entity) => {
                self.descriptor.mark_deleted(&mut entity, at);
                self.store.upsert(entity)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
