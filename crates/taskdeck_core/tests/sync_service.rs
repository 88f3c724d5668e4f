use bytes::Bytes;
use std::sync::{Arc, Mutex};
use taskdeck_core::db::open_db_in_memory;
use taskdeck_core::sync::protocol::{Envelope, PushRequest};
use taskdeck_core::{
    ItemDraft, ItemService, NotificationBus, RemoteAuthority, SyncError, SyncResult, SyncService,
};
use tokio::sync::mpsc;

/// Capture-only remote double for the mutation-forwarding path.
#[derive(Clone, Default)]
struct CapturingRemote {
    pushes: Arc<Mutex<Vec<Vec<u8>>>>,
    fail: bool,
}

impl CapturingRemote {
    fn pushed(&self) -> Vec<PushRequest> {
        self.pushes
            .lock()
            .unwrap()
            .iter()
            .map(|body| serde_json::from_slice(body).unwrap())
            .collect()
    }
}

impl RemoteAuthority for CapturingRemote {
    async fn fetch_diff(&self, _body: Bytes) -> SyncResult<Bytes> {
        Err(SyncError::Connectivity("not used here".to_string()))
    }

    async fn push_items(&self, body: Bytes) -> SyncResult<()> {
        self.pushes.lock().unwrap().push(body.to_vec());
        if self.fail {
            Err(SyncError::Connectivity("push refused".to_string()))
        } else {
            Ok(())
        }
    }
}

fn items() -> ItemService {
    ItemService::new(open_db_in_memory().unwrap(), NotificationBus::new())
}

fn draft(subject: &str) -> ItemDraft {
    ItemDraft {
        subject: subject.to_string(),
        description: format!("{subject} body"),
        ..ItemDraft::default()
    }
}

#[tokio::test]
async fn add_forwards_full_item_and_notifies_peers() {
    let remote = CapturingRemote::default();
    let (peer_tx, mut peer_rx) = mpsc::channel(4);
    let mut service = SyncService::new(items(), Some(remote.clone()), Some(peer_tx));

    let added = service.add_item(&draft("shared task")).await.unwrap();

    let pushes = remote.pushed();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].item_list.len(), 1);
    assert_eq!(pushes[0].item_list[0].uuid, added.uuid);

    match peer_rx.try_recv().unwrap() {
        Envelope::RefreshMerge { origin } => assert!(origin.is_some()),
    }
}

#[tokio::test]
async fn delete_forwards_tombstoned_copy() {
    let remote = CapturingRemote::default();
    let mut service = SyncService::new(items(), Some(remote.clone()), None);

    let added = service.add_item(&draft("short lived")).await.unwrap();
    let tombstone = service.delete_item(added.uuid).await.unwrap();
    assert!(tombstone.deleted);

    let pushes = remote.pushed();
    assert_eq!(pushes.len(), 2);
    assert!(pushes[1].item_list[0].deleted);
}

#[tokio::test]
async fn remote_failure_degrades_without_failing_local_mutation() {
    let remote = CapturingRemote {
        fail: true,
        ..CapturingRemote::default()
    };
    let mut service = SyncService::new(items(), Some(remote.clone()), None);

    let added = service.add_item(&draft("kept locally")).await.unwrap();
    assert!(service.items().get_item(added.uuid).unwrap().is_some());
}

#[tokio::test]
async fn offline_wrappers_reduce_to_local_mutations() {
    let mut service: SyncService<CapturingRemote> = SyncService::new(items(), None, None);

    let added = service.add_item(&draft("offline only")).await.unwrap();
    let updated = service.update_item(&added).await.unwrap();
    assert_eq!(updated.version, added.version + 1);
}

#[tokio::test]
async fn add_many_forwards_only_successful_records_in_one_call() {
    let remote = CapturingRemote::default();
    let mut service = SyncService::new(items(), Some(remote.clone()), None);

    service.add_item(&draft("taken")).await.unwrap();
    remote.pushes.lock().unwrap().clear();

    let report = service
        .add_many(&[draft("fresh one"), draft("taken"), draft("fresh two")])
        .await;
    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed.len(), 1);

    let pushes = remote.pushed();
    assert_eq!(pushes.len(), 1, "successes forwarded in one bulk call");
    assert_eq!(pushes[0].item_list.len(), 2);
}
