//! # zonesync engine
//!
//! Change tracking, merge and synchronization between a local object store
//! and a zone-scoped remote record service.
//!
//! This crate provides:
//! - Entity descriptors and model adapters (parent-before-child uploads,
//!   idempotent downloads, tombstones)
//! - A per-zone change tracker (`Idle → FetchingRemoteDelta → MergingLocal →
//!   PushingLocal → CommittingCheckpoint → Idle`) with atomic checkpoints
//! - A merge engine with last-writer-wins conflict resolution, per-type
//!   resolver overrides and cascading deletes
//! - A synchronizer with retry and backoff, cancellation, subscriptions and
//!   sharing
//! - File-backed and in-memory metadata stores
//!
//! ## Architecture
//!
//! A sync pass is **fetch-then-merge-then-push**:
//! 1. Collect local edits since the last pass into the pending set
//! 2. Fetch the remote delta since the stored change token
//! 3. Merge and commit the merged state to the local store in one batch
//! 4. Upload the pending set, parents before children
//! 5. Commit the new token together with the cleared pending entries
//!
//! ## Key Invariants
//!
//! - At most one pass per zone at a time; zones sync independently
//! - A failed or cancelled pass never advances the stored token
//! - Downloads and uploads are idempotent under retry
//! - Readers of the local store see pre-merge or fully merged state
//! - Deleted entities stay as tombstones until their deletion is confirmed

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod config;
mod descriptor;
mod error;
mod merge;
mod metadata;
mod registry;
mod remote;
mod share;
mod store;
mod synchronizer;
mod tracker;
mod typed;

pub use adapter::{ApplyOutcome, ModelAdapter, StagedBatch, StoreAdapter};
pub use config::{RetryConfig, SyncConfig};
pub use descriptor::{EntityDescriptor, ParentLink, Syncable, DEFAULT_DELETED_FIELD};
pub use error::{SyncError, SyncResult};
pub use merge::{ConflictResolver, IntegrityReport, MergeEngine, MergeOutcome};
pub use metadata::{
    Checkpoint, FileMetadataStore, MemoryMetadataStore, MetadataStore, ZoneMetadata,
    METADATA_MAGIC, METADATA_VERSION,
};
pub use registry::AdapterRegistry;
pub use remote::{Notification, RemoteRecordService};
pub use share::{share_scope, ShareManager};
pub use store::{
    Entity, LocalStore, MemoryStore, StoreChange, StoreError, StoreMarker, StoreResult,
    StoreWrite, WriteOrigin,
};
pub use synchronizer::{
    CancelHandle, CancelToken, SyncReport, SyncStats, SyncSummary, Synchronizer, WakeMode,
};
pub use tracker::{ChangeTracker, CheckpointCommit, PassGuard, PendingChangeSet, ZonePhase};
pub use typed::TypedCollection;

pub use zonesync_protocol as protocol;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
