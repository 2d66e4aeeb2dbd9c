//! Erase command implementation.

use super::open_zone;
use std::path::Path;
use tracing::info;

/// Runs the erase command.
///
/// Checkpoints, pending sets and tombstone bookkeeping are dropped; the
/// next pass re-syncs the zone from scratch.
pub fn run(path: &Path, zone: &str) -> Result<(), Box<dyn std::error::Error>> {
    info!("Erasing sync metadata for zone {:?} in {:?}", zone, path);
    let (tracker, zone) = open_zone(path, zone)?;
    tracker.erase(&zone)?;
    println!("Erased sync metadata for zone '{zone}'");
    Ok(())
}
