//! # zonesync protocol
//!
//! Types exchanged between the sync engine and a remote record service.
//!
//! This crate provides:
//! - Identifiers (`ZoneId`, `RecordId`, `EntityKey`) and opaque `ChangeToken`s
//! - `SyncRecord`, the remote-side representation of an entity
//! - `RemoteChange` and `FetchResult` for token-based change feeds
//! - `Conflict`, `ConflictPolicy` and `ConflictResolution`
//! - Share descriptions (`ShareRequest`, `ShareInfo`, `ShareChange`)
//! - CBOR helpers used for persisted metadata and tokens
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change;
mod codec;
mod conflict;
mod error;
mod ids;
mod record;
mod share;

pub use change::{FetchResult, RecordFailure, RecordOutcome, RemoteChange};
pub use codec::{from_cbor, to_cbor};
pub use conflict::{Conflict, ConflictKind, ConflictPolicy, ConflictResolution};
pub use error::{ProtocolError, ProtocolResult};
pub use ids::{ChangeToken, EntityKey, RecordId, SubscriptionId, Timestamp, ZoneId};
pub use record::{FieldValue, Fields, SyncRecord, SystemFields};
pub use share::{Participant, ShareChange, ShareId, ShareInfo, SharePermission, ShareRequest};
