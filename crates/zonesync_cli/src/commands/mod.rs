//! CLI command implementations.

pub mod erase;
pub mod inspect;
pub mod resync;

use std::path::Path;
use std::sync::Arc;
use zonesync_engine::protocol::ZoneId;
use zonesync_engine::{ChangeTracker, FileMetadataStore, MetadataStore};

/// Opens an existing metadata directory.
pub fn open_store(path: &Path) -> Result<Arc<FileMetadataStore>, Box<dyn std::error::Error>> {
    Ok(Arc::new(FileMetadataStore::open(path, false)?))
}

/// Opens a tracker over an existing zone, failing if the zone is unknown.
pub fn open_zone(
    path: &Path,
    zone: &str,
) -> Result<(ChangeTracker, ZoneId), Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let zone = ZoneId::new(zone);
    if store.load(&zone)?.is_none() {
        return Err(format!("No metadata for zone '{zone}' at {}", path.display()).into());
    }
    Ok((ChangeTracker::new(store), zone))
}
