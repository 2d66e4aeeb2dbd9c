//! Inspect command implementation.

use super::open_store;
use serde::Serialize;
use std::path::Path;
use tracing::info;
use zonesync_engine::protocol::ZoneId;
use zonesync_engine::{MetadataStore, ZoneMetadata};

/// Summary of one zone's metadata.
#[derive(Debug, Serialize)]
pub struct ZoneSummary {
    /// Zone name.
    pub zone: String,
    /// Committed passes.
    pub checkpoint: u64,
    /// Fingerprint of the stored change token.
    pub token: Option<String>,
    /// Whether the next pass is a full re-sync.
    pub needs_full_resync: bool,
    /// Pending edits.
    pub pending_dirty: usize,
    /// Pending deletions.
    pub pending_deleted: usize,
    /// Confirmed tombstones awaiting purge.
    pub tombstones: usize,
    /// Deferred remote changes.
    pub deferred: usize,
    /// Push subscription id.
    pub subscription: Option<String>,
    /// Shares rooted in the zone.
    pub shares: usize,
    /// Last committed pass, in milliseconds since the epoch.
    pub last_synced_at: Option<u64>,
    /// Key listings (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ZoneDetails>,
}

/// Key-level listing of a zone's metadata.
#[derive(Debug, Serialize)]
pub struct ZoneDetails {
    /// Pending edits.
    pub dirty: Vec<String>,
    /// Pending deletions.
    pub deleted: Vec<String>,
    /// Confirmed tombstones with their confirming checkpoint.
    pub tombstones: Vec<(String, u64)>,
    /// Deferred remote changes.
    pub deferred: Vec<String>,
    /// Shares as `root -> share id`.
    pub shares: Vec<(String, String)>,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    zone: Option<&str>,
    details: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Inspecting sync metadata in {:?}", path);
    let summaries = collect(path, zone, details)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
        _ => {
            if summaries.is_empty() {
                println!("No zones at {}", path.display());
            }
            for summary in &summaries {
                print_text_output(summary);
            }
        }
    }

    Ok(())
}

/// Reads summaries for one zone, or every zone in the directory.
pub fn collect(
    path: &Path,
    zone: Option<&str>,
    details: bool,
) -> Result<Vec<ZoneSummary>, Box<dyn std::error::Error>> {
    let store = open_store(path)?;
    let zones = match zone {
        Some(name) => vec![ZoneId::new(name)],
        None => store.zones()?,
    };

    let mut summaries = Vec::with_capacity(zones.len());
    for zone in zones {
        let Some(metadata) = store.load(&zone)? else {
            return Err(format!("No metadata for zone '{zone}'").into());
        };
        summaries.push(summarize(&zone, &metadata, details));
    }
    Ok(summaries)
}

fn summarize(zone: &ZoneId, metadata: &ZoneMetadata, details: bool) -> ZoneSummary {
    let keys = |set: &std::collections::BTreeSet<_>| -> Vec<String> {
        set.iter().map(ToString::to_string).collect()
    };

    ZoneSummary {
        zone: zone.to_string(),
        checkpoint: metadata.checkpoint.0,
        token: metadata.change_token.as_ref().map(|t| t.fingerprint()),
        needs_full_resync: metadata.needs_full_resync,
        pending_dirty: metadata.pending.dirty.len(),
        pending_deleted: metadata.pending.deleted.len(),
        tombstones: metadata.confirmed_tombstones.len(),
        deferred: metadata.deferred.len(),
        subscription: metadata.subscription.as_ref().map(|s| s.as_str().to_string()),
        shares: metadata.shares.len(),
        last_synced_at: metadata.last_synced_at.map(|t| t.as_millis()),
        details: details.then(|| ZoneDetails {
            dirty: keys(&metadata.pending.dirty),
            deleted: keys(&metadata.pending.deleted),
            tombstones: metadata
                .confirmed_tombstones
                .iter()
                .map(|(key, at)| (key.to_string(), at.0))
                .collect(),
            deferred: metadata.deferred.keys().map(ToString::to_string).collect(),
            shares: metadata
                .shares
                .iter()
                .map(|(root, share)| (root.to_string(), share.share_id.to_string()))
                .collect(),
        }),
    }
}

fn print_text_output(summary: &ZoneSummary) {
    println!("Zone: {}", summary.zone);
    println!("  Checkpoint:        {}", summary.checkpoint);
    println!(
        "  Change token:      {}",
        summary.token.as_deref().unwrap_or("(none)")
    );
    if summary.needs_full_resync {
        println!("  Full re-sync:      scheduled");
    }
    println!(
        "  Pending:           {} edited, {} deleted",
        summary.pending_dirty, summary.pending_deleted
    );
    println!("  Tombstones:        {}", summary.tombstones);
    println!("  Deferred:          {}", summary.deferred);
    println!(
        "  Subscription:      {}",
        summary.subscription.as_deref().unwrap_or("(polling)")
    );
    println!("  Shares:            {}", summary.shares);
    match summary.last_synced_at {
        Some(millis) => println!("  Last synced:       {millis}ms"),
        None => println!("  Last synced:       never"),
    }

    if let Some(details) = &summary.details {
        for key in &details.dirty {
            println!("    edited   {key}");
        }
        for key in &details.deleted {
            println!("    deleted  {key}");
        }
        for (key, at) in &details.tombstones {
            println!("    tombstone {key} (checkpoint {at})");
        }
        for key in &details.deferred {
            println!("    deferred {key}");
        }
        for (root, share) in &details.shares {
            println!("    share    {root} -> {share}");
        }
    }
    println!();
}
