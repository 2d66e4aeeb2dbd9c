//! Remote record service abstraction.

use crate::error::SyncResult;
use async_trait::async_trait;
use zonesync_protocol::{
    ChangeToken, EntityKey, FetchResult, RecordOutcome, ShareChange, ShareId, ShareInfo,
    ShareRequest, SubscriptionId, SyncRecord, ZoneId,
};

/// A zone-scoped record service with a token-based change feed.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (a cloud backend, an in-process server, a test double).
/// Calls may complete in any order; callers that need ordering issue them
/// sequentially.
#[async_trait]
pub trait RemoteRecordService: Send + Sync {
    /// Fetches one page of changes after `token`. A missing token requests
    /// every live record in the zone.
    ///
    /// Fails with `SyncError::TokenExpired` when the service no longer
    /// recognises the token.
    async fn fetch_changes(
        &self,
        zone: &ZoneId,
        token: Option<&ChangeToken>,
        limit: usize,
    ) -> SyncResult<FetchResult>;

    /// Saves records, reporting an outcome per record.
    async fn save_records(
        &self,
        zone: &ZoneId,
        records: Vec<SyncRecord>,
    ) -> SyncResult<Vec<RecordOutcome>>;

    /// Physically removes records, reporting an outcome per record.
    async fn delete_records(
        &self,
        zone: &ZoneId,
        keys: Vec<EntityKey>,
    ) -> SyncResult<Vec<RecordOutcome>>;

    /// Creates a push subscription for a zone.
    async fn create_subscription(&self, zone: &ZoneId) -> SyncResult<SubscriptionId>;

    /// Cancels a push subscription.
    async fn cancel_subscription(
        &self,
        zone: &ZoneId,
        subscription: &SubscriptionId,
    ) -> SyncResult<()>;

    /// Creates a share rooted at a record.
    async fn create_share(&self, zone: &ZoneId, request: ShareRequest) -> SyncResult<ShareInfo>;

    /// Replaces the scope, permission and participants of a share.
    async fn modify_share(
        &self,
        zone: &ZoneId,
        share: &ShareId,
        request: ShareRequest,
    ) -> SyncResult<ShareInfo>;

    /// Removes a share. Shared records are not touched.
    async fn remove_share(&self, zone: &ZoneId, share: &ShareId) -> SyncResult<()>;
}

/// A push notification delivered to the synchronizer.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Records in the zone changed.
    ZoneChanged {
        /// Changed zone.
        zone: ZoneId,
    },
    /// A share in the zone was modified or removed.
    ShareChanged {
        /// Zone of the share.
        zone: ZoneId,
        /// What changed.
        change: ShareChange,
    },
}

impl Notification {
    /// Returns the zone the notification is about.
    pub fn zone(&self) -> &ZoneId {
        match self {
            Notification::ZoneChanged { zone } | Notification::ShareChanged { zone, .. } => zone,
        }
    }
}
