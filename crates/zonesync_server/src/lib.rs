//! # zonesync server
//!
//! In-process reference record service for the zonesync engine.
//!
//! This crate provides:
//! - Zone-scoped record storage with server-assigned versions
//! - A per-zone change log with opaque, expiring change tokens
//! - Change subscriptions
//! - Shares rooted at a record
//! - Failure injection for exercising client retry paths
//!
//! # Architecture
//!
//! Every accepted write appends one entry to the zone's change log and
//! receives the entry's sequence number as its version. A change token
//! names a log position within an epoch; expiring a zone's tokens starts a
//! new epoch, and compacting the log expires tokens pointing into the
//! dropped history.
//!
//! # Conflict Detection
//!
//! A save is accepted when it is based on the stored version or carries a
//! strictly later modification time. Otherwise it fails with
//! `ServerRecordChanged` and the client merges before retrying. Re-saving
//! identical content is a no-op, so retried uploads are idempotent.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod server;
mod zone_log;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::RecordServer;
pub use zone_log::ZoneLog;
