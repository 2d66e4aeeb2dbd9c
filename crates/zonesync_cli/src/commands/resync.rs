//! Resync command implementation.

use super::open_zone;
use std::path::Path;
use tracing::info;

/// Runs the resync command.
pub fn run(path: &Path, zone: &str) -> Result<(), Box<dyn std::error::Error>> {
    info!("Scheduling full re-sync of zone {:?} in {:?}", zone, path);
    let (tracker, zone) = open_zone(path, zone)?;
    tracker.expire_token(&zone)?;
    println!("Zone '{zone}' will be fully re-synced on the next pass");
    Ok(())
}
