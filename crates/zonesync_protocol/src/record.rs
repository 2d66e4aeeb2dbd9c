//! Remote record representation.

use crate::ids::{EntityKey, RecordId, Timestamp, ZoneId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A field value carried by a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes (e.g. a photo).
    Bytes(Vec<u8>),
    /// Reference to another record in the same zone.
    Reference(RecordId),
    /// Ordered list of values.
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Returns the boolean value, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer value, if this is an `Integer`.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the text, if this is `Text`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the bytes, if this is `Bytes`.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the referenced id.
    ///
    /// Text values are accepted as references too, so primary keys stored
    /// as plain strings can be used as parent keys.
    pub fn as_reference(&self) -> Option<RecordId> {
        match self {
            FieldValue::Reference(id) => Some(id.clone()),
            FieldValue::Text(s) => Some(RecordId::new(s.clone())),
            _ => None,
        }
    }

    /// Returns true for `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Integer(i)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

/// Named field values of an entity or record.
pub type Fields = BTreeMap<String, FieldValue>;

/// Timestamps and version assigned around a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemFields {
    /// When the entity was first created.
    pub created_at: Timestamp,
    /// Writer's logical edit time; drives last-writer-wins.
    pub modified_at: Timestamp,
    /// Version assigned by the record service on each accepted save.
    ///
    /// On upload this carries the last version the writer saw (0 if
    /// never synced).
    pub version: u64,
}

/// Remote-side representation of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Zone the record lives in.
    pub zone_id: ZoneId,
    /// Record type (matches the entity descriptor's type id).
    pub record_type: String,
    /// Record id (equals the entity's primary key).
    pub record_id: RecordId,
    /// Id of the parent record, if the type declares a parent.
    pub parent: Option<RecordId>,
    /// Field values.
    pub fields: Fields,
    /// System fields.
    pub system: SystemFields,
}

impl SyncRecord {
    /// Creates an empty record.
    pub fn new(zone_id: ZoneId, record_type: impl Into<String>, record_id: RecordId) -> Self {
        Self {
            zone_id,
            record_type: record_type.into(),
            record_id,
            parent: None,
            fields: Fields::new(),
            system: SystemFields::default(),
        }
    }

    /// Returns the entity key of this record.
    pub fn key(&self) -> EntityKey {
        EntityKey {
            record_type: self.record_type.clone(),
            record_id: self.record_id.clone(),
        }
    }

    /// Returns a field value.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Sets a field value.
    pub fn set_field(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    /// Returns true if the given flag field is set to `true`.
    pub fn flag(&self, name: &str) -> bool {
        self.field(name).and_then(FieldValue::as_bool).unwrap_or(false)
    }

    /// Returns true if two records carry the same content and edit time.
    ///
    /// Server-assigned versions are ignored.
    pub fn same_content(&self, other: &SyncRecord) -> bool {
        self.record_type == other.record_type
            && self.record_id == other.record_id
            && self.parent == other.parent
            && self.fields == other.fields
            && self.system.modified_at == other.system.modified_at
    }
}
