//! Entity descriptors.

use crate::error::{SyncError, SyncResult};
use crate::store::Entity;
use zonesync_protocol::{EntityKey, FieldValue, Fields, RecordId, Timestamp};

/// Default name of the soft-delete flag field.
pub const DEFAULT_DELETED_FIELD: &str = "isDeleted";

/// Declared parent relation of a type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    /// Field holding the parent's primary key.
    pub field: String,
    /// Type id of the parent.
    pub type_id: String,
}

/// Per-type metadata the engine needs to sync entities of that type.
///
/// ```
/// use zonesync_engine::EntityDescriptor;
///
/// let employee = EntityDescriptor::new("Employee", "identifier")
///     .with_parent("company", "Company");
/// assert_eq!(employee.deleted_flag_field, "isDeleted");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    /// Type id; also the remote record type.
    pub type_id: String,
    /// Field holding the immutable primary key.
    pub primary_key_field: String,
    /// Optional parent relation.
    pub parent: Option<ParentLink>,
    /// Boolean field marking tombstones.
    pub deleted_flag_field: String,
}

impl EntityDescriptor {
    /// Creates a descriptor without a parent.
    pub fn new(type_id: impl Into<String>, primary_key_field: impl Into<String>) -> Self {
        Self {
            type_id: type_id.into(),
            primary_key_field: primary_key_field.into(),
            parent: None,
            deleted_flag_field: DEFAULT_DELETED_FIELD.to_string(),
        }
    }

    /// Declares the parent relation.
    pub fn with_parent(mut self, field: impl Into<String>, type_id: impl Into<String>) -> Self {
        self.parent = Some(ParentLink {
            field: field.into(),
            type_id: type_id.into(),
        });
        self
    }

    /// Overrides the deleted flag field.
    pub fn with_deleted_flag(mut self, field: impl Into<String>) -> Self {
        self.deleted_flag_field = field.into();
        self
    }

    /// Returns the parent type id, if any.
    pub fn parent_type(&self) -> Option<&str> {
        self.parent.as_ref().map(|p| p.type_id.as_str())
    }

    /// Builds the key for a record id of this type.
    pub fn key(&self, id: RecordId) -> EntityKey {
        EntityKey {
            record_type: self.type_id.clone(),
            record_id: id,
        }
    }

    /// Reads the primary key from field values.
    pub fn primary_key(&self, fields: &Fields) -> Option<RecordId> {
        fields
            .get(&self.primary_key_field)
            .and_then(FieldValue::as_reference)
    }

    /// Reads the parent id from field values.
    pub fn parent_of(&self, fields: &Fields) -> Option<RecordId> {
        let link = self.parent.as_ref()?;
        fields.get(&link.field).and_then(FieldValue::as_reference)
    }

    /// Returns the parent key of an entity.
    pub fn parent_key(&self, entity: &Entity) -> Option<EntityKey> {
        let link = self.parent.as_ref()?;
        self.parent_of(&entity.fields)
            .map(|id| EntityKey::new(link.type_id.clone(), id))
    }

    /// Returns true if the fields mark a tombstone.
    pub fn is_deleted(&self, fields: &Fields) -> bool {
        fields
            .get(&self.deleted_flag_field)
            .and_then(FieldValue::as_bool)
            .unwrap_or(false)
    }

    /// Turns an entity into a tombstone.
    pub fn mark_deleted(&self, entity: &mut Entity, at: Timestamp) {
        entity.set(self.deleted_flag_field.clone(), FieldValue::Bool(true), at);
    }

    /// Builds a new, never-synced entity from field values.
    ///
    /// The primary key must be present; the deleted flag defaults to false.
    pub fn entity(&self, mut fields: Fields, at: Timestamp) -> SyncResult<Entity> {
        let id = self.primary_key(&fields).ok_or_else(|| {
            SyncError::Configuration(format!(
                "{} entity is missing primary key field '{}'",
                self.type_id, self.primary_key_field
            ))
        })?;
        fields
            .entry(self.deleted_flag_field.clone())
            .or_insert(FieldValue::Bool(false));
        Ok(Entity::new(self.key(id), fields, at))
    }
}

/// A strongly typed model that can be synchronized.
pub trait Syncable: Sized {
    /// Descriptor for this type.
    fn descriptor() -> EntityDescriptor;

    /// Converts the model to field values (primary key included).
    fn to_fields(&self) -> Fields;

    /// Rebuilds the model from field values.
    fn from_fields(fields: &Fields) -> SyncResult<Self>;
}
