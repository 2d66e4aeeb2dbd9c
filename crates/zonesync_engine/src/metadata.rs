//! Persisted per-zone sync metadata.
//!
//! The engine keeps its own metadata apart from domain entities. Each zone
//! has one document holding the change token, the pending change set, the
//! local store marker and the bookkeeping needed between passes:
//!
//! ```text
//! <metadata_dir>/
//! ├─ LOCK                 # Advisory lock for single-writer
//! └─ <zone-hash>.zone     # One document per zone
//! ```
//!
//! A document is written in one step (temp file, fsync, rename), so a
//! committed checkpoint and its cleared pending set land together or not
//! at all.

use crate::error::{SyncError, SyncResult};
use crate::store::StoreMarker;
use crate::tracker::PendingChangeSet;
use fs2::FileExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use zonesync_protocol::{
    from_cbor, to_cbor, ChangeToken, EntityKey, RemoteChange, ShareInfo, SubscriptionId,
    Timestamp, ZoneId,
};

const LOCK_FILE: &str = "LOCK";
const ZONE_EXTENSION: &str = "zone";

/// Magic bytes at the start of every zone document.
pub const METADATA_MAGIC: [u8; 4] = *b"ZSMD";

/// Current zone document format version.
pub const METADATA_VERSION: u16 = 1;

/// Counter of committed passes for a zone.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Checkpoint(pub u64);

impl Checkpoint {
    /// Returns the next checkpoint.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Everything the engine remembers about a zone between passes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneMetadata {
    /// Last committed change token; `None` requests a full fetch.
    pub change_token: Option<ChangeToken>,
    /// Local changes not yet confirmed by the service.
    pub pending: PendingChangeSet,
    /// Local store position up to which changes were collected.
    pub local_marker: StoreMarker,
    /// Set after token expiry or erase; the next pass re-syncs everything.
    pub needs_full_resync: bool,
    /// Number of committed passes.
    pub checkpoint: Checkpoint,
    /// Tombstones whose deletion was confirmed, with the confirming
    /// checkpoint.
    pub confirmed_tombstones: BTreeMap<EntityKey, Checkpoint>,
    /// Remote changes held back (missing parent, declined conflict) and
    /// retried on the next pass.
    pub deferred: BTreeMap<EntityKey, RemoteChange>,
    /// Active push subscription.
    pub subscription: Option<SubscriptionId>,
    /// Shares rooted in this zone, by root record.
    pub shares: BTreeMap<EntityKey, ShareInfo>,
    /// Time of the last committed pass.
    pub last_synced_at: Option<Timestamp>,
}

impl ZoneMetadata {
    /// Metadata for a zone that must be fully re-synced.
    pub fn full_resync() -> Self {
        Self {
            needs_full_resync: true,
            ..Self::default()
        }
    }
}

/// Storage for per-zone metadata.
pub trait MetadataStore: Send + Sync {
    /// Loads a zone document.
    fn load(&self, zone: &ZoneId) -> SyncResult<Option<ZoneMetadata>>;

    /// Replaces a zone document atomically.
    fn save(&self, zone: &ZoneId, metadata: &ZoneMetadata) -> SyncResult<()>;

    /// Removes a zone document.
    fn remove(&self, zone: &ZoneId) -> SyncResult<()>;

    /// Lists zones with a stored document.
    fn zones(&self) -> SyncResult<Vec<ZoneId>>;
}

/// In-memory metadata store.
#[derive(Default)]
pub struct MemoryMetadataStore {
    zones: RwLock<BTreeMap<ZoneId, ZoneMetadata>>,
}

impl MemoryMetadataStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn load(&self, zone: &ZoneId) -> SyncResult<Option<ZoneMetadata>> {
        Ok(self.zones.read().get(zone).cloned())
    }

    fn save(&self, zone: &ZoneId, metadata: &ZoneMetadata) -> SyncResult<()> {
        self.zones.write().insert(zone.clone(), metadata.clone());
        Ok(())
    }

    fn remove(&self, zone: &ZoneId) -> SyncResult<()> {
        self.zones.write().remove(zone);
        Ok(())
    }

    fn zones(&self) -> SyncResult<Vec<ZoneId>> {
        Ok(self.zones.read().keys().cloned().collect())
    }
}

#[derive(Serialize, Deserialize)]
struct StoredZone {
    zone: ZoneId,
    metadata: ZoneMetadata,
}

/// Directory-backed metadata store.
///
/// Holds an exclusive advisory lock on the directory for its lifetime, so
/// only one process writes a given metadata directory.
#[derive(Debug)]
pub struct FileMetadataStore {
    path: PathBuf,
    _lock_file: File,
}

impl FileMetadataStore {
    /// Opens or creates a metadata directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is missing and `create_if_missing`
    /// is false, if another process holds the lock, or on I/O failure.
    pub fn open(path: &Path, create_if_missing: bool) -> SyncResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(SyncError::Metadata(format!(
                    "metadata directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(SyncError::Metadata(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(SyncError::Metadata(format!(
                "metadata directory is locked: {}",
                path.display()
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the metadata directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn zone_path(&self, zone: &ZoneId) -> PathBuf {
        let digest = Sha256::digest(zone.as_str().as_bytes());
        let name: String = digest.iter().take(12).map(|b| format!("{b:02x}")).collect();
        self.path.join(format!("{name}.{ZONE_EXTENSION}"))
    }

    fn read_document(path: &Path) -> SyncResult<Option<StoredZone>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(path)?;
        if data.is_empty() {
            return Ok(None);
        }
        decode_document(&data).map(Some)
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> SyncResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> SyncResult<()> {
        Ok(())
    }
}

fn encode_document(document: &StoredZone) -> SyncResult<Vec<u8>> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&METADATA_MAGIC);
    buf.extend_from_slice(&METADATA_VERSION.to_le_bytes());
    buf.extend_from_slice(&to_cbor(document)?);
    Ok(buf)
}

fn decode_document(data: &[u8]) -> SyncResult<StoredZone> {
    if data.len() < 6 || data[0..4] != METADATA_MAGIC {
        return Err(SyncError::Metadata("invalid zone document magic".into()));
    }
    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != METADATA_VERSION {
        return Err(SyncError::Metadata(format!(
            "unsupported zone document version {version}"
        )));
    }
    Ok(from_cbor(&data[6..])?)
}

impl MetadataStore for FileMetadataStore {
    fn load(&self, zone: &ZoneId) -> SyncResult<Option<ZoneMetadata>> {
        Ok(Self::read_document(&self.zone_path(zone))?.map(|doc| doc.metadata))
    }

    fn save(&self, zone: &ZoneId, metadata: &ZoneMetadata) -> SyncResult<()> {
        let target = self.zone_path(zone);
        let temp = target.with_extension("tmp");

        let data = encode_document(&StoredZone {
            zone: zone.clone(),
            metadata: metadata.clone(),
        })?;
        let mut file = File::create(&temp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp, &target)?;
        self.sync_directory()
    }

    fn remove(&self, zone: &ZoneId) -> SyncResult<()> {
        let target = self.zone_path(zone);
        if target.exists() {
            fs::remove_file(&target)?;
            self.sync_directory()?;
        }
        Ok(())
    }

    fn zones(&self) -> SyncResult<Vec<ZoneId>> {
        let mut zones = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ZONE_EXTENSION) {
                continue;
            }
            if let Some(doc) = Self::read_document(&path)? {
                zones.push(doc.zone);
            }
        }
        zones.sort();
        Ok(zones)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use zonesync_protocol::{FieldValue, RecordId, SyncRecord};

    fn sample() -> ZoneMetadata {
        let mut metadata = ZoneMetadata {
            change_token: Some(ChangeToken::from_bytes(vec![1, 2, 3])),
            local_marker: StoreMarker(42),
            checkpoint: Checkpoint(3),
            ..ZoneMetadata::default()
        };
        metadata.pending.mark_dirty(EntityKey::new("Company", "acme"));
        metadata.pending.mark_deleted(EntityKey::new("Employee", "bob"));
        metadata
            .confirmed_tombstones
            .insert(EntityKey::new("Employee", "ann"), Checkpoint(2));

        let mut record = SyncRecord::new(ZoneId::new("Companies"), "Employee", RecordId::new("eve"));
        record.parent = Some(RecordId::new("gone"));
        record.set_field("name", FieldValue::Text("Eve".into()));
        metadata
            .deferred
            .insert(record.key(), RemoteChange::Upserted(record));
        metadata
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FileMetadataStore::open(dir.path(), true).unwrap();
        let zone = ZoneId::new("Companies");

        assert!(store.load(&zone).unwrap().is_none());
        store.save(&zone, &sample()).unwrap();
        assert_eq!(store.load(&zone).unwrap(), Some(sample()));
        assert_eq!(store.zones().unwrap(), vec![zone.clone()]);

        store.remove(&zone).unwrap();
        assert!(store.load(&zone).unwrap().is_none());
    }

    #[test]
    fn directory_is_locked() {
        let dir = tempdir().unwrap();
        let _first = FileMetadataStore::open(dir.path(), true).unwrap();
        let second = FileMetadataStore::open(dir.path(), true);
        assert!(matches!(second, Err(SyncError::Metadata(_))));
    }

    #[test]
    fn missing_directory_without_create() {
        let dir = tempdir().unwrap();
        let result = FileMetadataStore::open(&dir.path().join("nope"), false);
        assert!(result.is_err());
    }

    #[test]
    fn corrupt_document_is_rejected() {
        let dir = tempdir().unwrap();
        let store = FileMetadataStore::open(dir.path(), true).unwrap();
        let zone = ZoneId::new("Companies");
        fs::write(store.zone_path(&zone), b"nope").unwrap();
        assert!(matches!(store.load(&zone), Err(SyncError::Metadata(_))));
    }

    #[test]
    fn memory_store_lists_zones() {
        let store = MemoryMetadataStore::new();
        store.save(&ZoneId::new("b"), &sample()).unwrap();
        store.save(&ZoneId::new("a"), &ZoneMetadata::full_resync()).unwrap();
        assert_eq!(store.zones().unwrap(), vec![ZoneId::new("a"), ZoneId::new("b")]);
    }
}
