//! Sharing a company with its employees.

mod common;

use common::*;
use std::sync::Arc;
use zonesync_engine::protocol::{Participant, RecordId, ShareChange, SharePermission};
use zonesync_engine::{Notification, SyncError};
use zonesync_server::RecordServer;

fn ann_can_write() -> Vec<Participant> {
    vec![Participant::invited("ann@example.com", SharePermission::ReadWrite)]
}

#[tokio::test]
async fn share_covers_root_and_descendants() {
    let server = Arc::new(RecordServer::default());
    let device = Peer::new(&server, config("device-a"));
    device.seed_acme(10);
    device.sync().await.unwrap();

    let info = device
        .sync
        .share(&zone(), &company_key("acme"), SharePermission::ReadOnly, ann_can_write())
        .await
        .unwrap();

    assert_eq!(
        info.scope,
        vec![company_key("acme"), employee_key("ann"), employee_key("bob")]
    );
    assert_eq!(server.shares(&zone()).len(), 1);
    assert_eq!(
        device.sync.share_for(&zone(), &company_key("acme")).unwrap(),
        Some(info)
    );
    assert_eq!(
        device
            .sync
            .participant_permission(&zone(), &employee_key("bob"), "ann@example.com")
            .unwrap(),
        Some(SharePermission::ReadWrite)
    );
    assert_eq!(
        device
            .sync
            .participant_permission(&zone(), &employee_key("bob"), "eve@example.com")
            .unwrap(),
        Some(SharePermission::ReadOnly)
    );
}

#[tokio::test]
async fn unsynced_or_deleted_roots_cannot_be_shared() {
    let server = Arc::new(RecordServer::default());
    let device = Peer::new(&server, config("device-a"));
    device.seed_acme(10);
    device.sync().await.unwrap();

    device
        .companies()
        .put(&Company::new("globex", "Globex"), at(20))
        .unwrap();
    let result = device
        .sync
        .share(&zone(), &company_key("globex"), SharePermission::ReadOnly, Vec::new())
        .await;
    assert!(matches!(result, Err(SyncError::ShareOperation(_))));

    device.companies().delete(&RecordId::new("acme"), at(30)).unwrap();
    let result = device
        .sync
        .share(&zone(), &company_key("acme"), SharePermission::ReadOnly, Vec::new())
        .await;
    assert!(matches!(result, Err(SyncError::ShareOperation(_))));

    let result = device
        .sync
        .share(&zone(), &company_key("initech"), SharePermission::ReadOnly, Vec::new())
        .await;
    assert!(matches!(result, Err(SyncError::ShareOperation(_))));
    assert!(server.shares(&zone()).is_empty());
}

#[tokio::test]
async fn service_refusal_is_a_share_error() {
    let server = Arc::new(RecordServer::default());
    let device = Peer::new(&server, config("device-a"));
    device.seed_acme(10);
    device.sync().await.unwrap();
    server.deny_shares(true);

    let result = device
        .sync
        .share(&zone(), &company_key("acme"), SharePermission::ReadOnly, Vec::new())
        .await;
    assert!(matches!(result, Err(SyncError::ShareOperation(_))));

    // Base sync is unaffected.
    device.employees().put(&Employee::new("cid", "Cid", "acme"), at(20)).unwrap();
    let report = device.sync().await.unwrap();
    assert_eq!(report.uploaded, 1);
}

#[tokio::test]
async fn sharing_again_updates_the_existing_share() {
    let server = Arc::new(RecordServer::default());
    let device = Peer::new(&server, config("device-a"));
    device.seed_acme(10);
    device.sync().await.unwrap();

    let first = device
        .sync
        .share(&zone(), &company_key("acme"), SharePermission::ReadOnly, Vec::new())
        .await
        .unwrap();
    device.employees().put(&Employee::new("cid", "Cid", "acme"), at(20)).unwrap();
    device.sync().await.unwrap();

    let second = device
        .sync
        .share(&zone(), &company_key("acme"), SharePermission::None, ann_can_write())
        .await
        .unwrap();

    assert_eq!(first.share_id, second.share_id);
    assert_eq!(second.scope.len(), 4);
    assert_eq!(second.participants.len(), 1);
    assert_eq!(server.shares(&zone()).len(), 1);
}

#[tokio::test]
async fn share_changes_reach_other_devices() {
    let server = Arc::new(RecordServer::default());
    let a = Peer::new(&server, config("device-a"));
    let b = Peer::new(&server, config("device-b"));
    a.seed_acme(10);
    a.sync().await.unwrap();
    b.sync().await.unwrap();

    let info = a
        .sync
        .share(&zone(), &company_key("acme"), SharePermission::ReadOnly, ann_can_write())
        .await
        .unwrap();
    b.sync().await.unwrap();
    assert_eq!(
        b.sync.share_for(&zone(), &company_key("acme")).unwrap(),
        Some(info.clone())
    );

    server
        .accept_share(&zone(), &info.share_id, "ann@example.com")
        .unwrap();
    b.sync().await.unwrap();
    let mirrored = b
        .sync
        .share_for(&zone(), &company_key("acme"))
        .unwrap()
        .unwrap();
    assert!(mirrored.participants[0].accepted);

    assert!(a.sync.revoke_share(&zone(), &company_key("acme")).await.unwrap());
    b.sync().await.unwrap();
    assert_eq!(b.sync.share_for(&zone(), &company_key("acme")).unwrap(), None);
}

#[tokio::test]
async fn revoking_keeps_local_and_remote_data() {
    let server = Arc::new(RecordServer::default());
    let device = Peer::new(&server, config("device-a"));
    device.seed_acme(10);
    device.sync().await.unwrap();
    device
        .sync
        .share(&zone(), &company_key("acme"), SharePermission::ReadOnly, Vec::new())
        .await
        .unwrap();

    assert!(device
        .sync
        .revoke_share(&zone(), &company_key("acme"))
        .await
        .unwrap());
    assert!(!device
        .sync
        .revoke_share(&zone(), &company_key("acme"))
        .await
        .unwrap());

    assert_eq!(device.sync.share_for(&zone(), &company_key("acme")).unwrap(), None);
    assert!(server.shares(&zone()).is_empty());
    assert_eq!(device.store.len(), 3);
    assert_eq!(server.record_count(&zone()), 3);
    assert_eq!(device.employees().count().unwrap(), 2);
}

#[tokio::test]
async fn share_notification_is_reconciled_before_syncing() {
    let server = Arc::new(RecordServer::default());
    let device = Peer::new(&server, config("device-a"));
    device.seed_acme(10);
    device.sync().await.unwrap();
    let info = device
        .sync
        .share(&zone(), &company_key("acme"), SharePermission::ReadOnly, Vec::new())
        .await
        .unwrap();
    server.remove_share(&zone(), &info.share_id).unwrap();

    let report = device
        .sync
        .handle_notification(Notification::ShareChanged {
            zone: zone(),
            change: ShareChange::Removed {
                share_id: info.share_id.clone(),
                root: info.root.clone(),
            },
        })
        .await
        .unwrap();

    assert!(report.is_some());
    assert_eq!(device.sync.share_for(&zone(), &company_key("acme")).unwrap(), None);
}
