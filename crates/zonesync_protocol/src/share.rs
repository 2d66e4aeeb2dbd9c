//! Sharing primitives.

use crate::ids::EntityKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a remote share.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShareId(String);

impl ShareId {
    /// Creates a share id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Access level granted through a share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SharePermission {
    /// No access.
    None,
    /// Participants may read.
    ReadOnly,
    /// Participants may read and write.
    ReadWrite,
}

impl SharePermission {
    /// Returns true if this permission allows writes.
    pub fn can_write(&self) -> bool {
        matches!(self, SharePermission::ReadWrite)
    }
}

/// A user taking part in a share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Service-level user identity (e.g. an email address).
    pub user_id: String,
    /// Access granted to this participant.
    pub permission: SharePermission,
    /// Whether the participant accepted the invitation.
    pub accepted: bool,
}

impl Participant {
    /// Creates an invited (not yet accepted) participant.
    pub fn invited(user_id: impl Into<String>, permission: SharePermission) -> Self {
        Self {
            user_id: user_id.into(),
            permission,
            accepted: false,
        }
    }
}

/// Request to create or modify a share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareRequest {
    /// Root record of the shared graph.
    pub root: EntityKey,
    /// Root plus every descendant record covered by the share.
    pub scope: Vec<EntityKey>,
    /// Permission for anyone holding the share link.
    pub public_permission: SharePermission,
    /// Explicit participants.
    pub participants: Vec<Participant>,
}

/// A share as known by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareInfo {
    /// Share id.
    pub share_id: ShareId,
    /// Root record of the shared graph.
    pub root: EntityKey,
    /// Records covered by the share.
    pub scope: Vec<EntityKey>,
    /// Permission for anyone holding the share link.
    pub public_permission: SharePermission,
    /// Explicit participants.
    pub participants: Vec<Participant>,
}

impl ShareInfo {
    /// Returns the effective permission of a user.
    ///
    /// Explicit participants get their own permission; everyone else gets
    /// the public permission.
    pub fn permission_for(&self, user_id: &str) -> SharePermission {
        self.participants
            .iter()
            .find(|p| p.user_id == user_id)
            .map(|p| p.permission)
            .unwrap_or(self.public_permission)
    }
}

/// A share change delivered through the change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ShareChange {
    /// Share was created or modified.
    Modified(ShareInfo),
    /// Share was removed.
    Removed {
        /// Removed share.
        share_id: ShareId,
        /// Root record the share covered.
        root: EntityKey,
    },
}

impl ShareChange {
    /// Returns the root record of the affected share.
    pub fn root(&self) -> &EntityKey {
        match self {
            ShareChange::Modified(info) => &info.root,
            ShareChange::Removed { root, .. } => root,
        }
    }
}
