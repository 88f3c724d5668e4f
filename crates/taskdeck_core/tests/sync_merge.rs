use bytes::Bytes;
use chrono::{Duration, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use taskdeck_core::db::open_db_in_memory;
use taskdeck_core::sync::protocol::{DiffRequest, DiffResponse, PushRequest};
use taskdeck_core::{
    ChangeEvent, Item, ItemDraft, ItemService, NotificationBus, RemoteAuthority, SyncConfig,
    SyncEngine, SyncError, SyncResult,
};

/// Scripted remote double: pops one canned diff response per cycle and
/// captures every push body.
#[derive(Clone, Default)]
struct MockRemote {
    responses: Arc<Mutex<VecDeque<Result<Vec<u8>, String>>>>,
    diff_requests: Arc<Mutex<Vec<Vec<u8>>>>,
    pushes: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockRemote {
    fn script_response(&self, response: &DiffResponse) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(serde_json::to_vec(response).unwrap()));
    }

    fn script_raw(&self, raw: &[u8]) {
        self.responses.lock().unwrap().push_back(Ok(raw.to_vec()));
    }

    fn script_failure(&self, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }

    fn last_diff_request(&self) -> DiffRequest {
        let requests = self.diff_requests.lock().unwrap();
        serde_json::from_slice(requests.last().unwrap()).unwrap()
    }

    fn pushed_items(&self) -> Vec<PushRequest> {
        self.pushes
            .lock()
            .unwrap()
            .iter()
            .map(|body| serde_json::from_slice(body).unwrap())
            .collect()
    }
}

impl RemoteAuthority for MockRemote {
    async fn fetch_diff(&self, body: Bytes) -> SyncResult<Bytes> {
        self.diff_requests.lock().unwrap().push(body.to_vec());
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(raw)) => Ok(Bytes::from(raw)),
            Some(Err(message)) => Err(SyncError::Connectivity(message)),
            None => Err(SyncError::Connectivity("no scripted response".to_string())),
        }
    }

    async fn push_items(&self, body: Bytes) -> SyncResult<()> {
        self.pushes.lock().unwrap().push(body.to_vec());
        Ok(())
    }
}

fn engine_with(remote: MockRemote, bus: NotificationBus) -> SyncEngine<MockRemote> {
    let conn = open_db_in_memory().unwrap();
    let items = ItemService::new(conn, bus);
    SyncEngine::new(items, Some(remote), SyncConfig::default())
}

fn draft(subject: &str) -> ItemDraft {
    ItemDraft {
        subject: subject.to_string(),
        description: format!("{subject} body"),
        ..ItemDraft::default()
    }
}

/// Full remote item as the wire would deliver it.
fn remote_item(subject: &str) -> Item {
    let mut item = Item::new(subject, format!("{subject} from remote"));
    item.version = 1;
    item
}

#[tokio::test]
async fn items_for_add_insert_through_local_add_path() {
    let remote = MockRemote::default();
    let mut engine = engine_with(remote.clone(), NotificationBus::new());

    let incoming = remote_item("arrived via diff");
    remote.script_response(&DiffResponse {
        items_for_add: vec![incoming.clone()],
        ..DiffResponse::default()
    });

    let report = engine.run_cycle(false).await.unwrap().unwrap();
    assert_eq!(report.added, 1);

    let stored = engine.items().get_item(incoming.uuid).unwrap().unwrap();
    assert_eq!(stored.subject, "arrived via diff");
    assert_eq!(stored.version, 1);
    assert!(stored.id > 0, "local id assigned on insert");
}

#[tokio::test]
async fn scenario_update_with_newer_remote_copy_wins() {
    let remote = MockRemote::default();
    let mut engine = engine_with(remote.clone(), NotificationBus::new());

    let local = engine.items().add_item(&draft("conflicted")).unwrap();
    let mut local = local;
    for _ in 0..3 {
        local = engine.items().update_item(&local).unwrap();
    }
    assert_eq!(local.version, 3);

    let mut incoming = local.clone();
    incoming.version = 5;
    incoming.description = "remote wrote this".to_string();
    incoming.updation_timestamp = local.updation_timestamp + Duration::seconds(60);
    remote.script_response(&DiffResponse {
        items_for_update: vec![incoming],
        ..DiffResponse::default()
    });

    let report = engine.run_cycle(false).await.unwrap().unwrap();
    assert_eq!(report.updated, 1);

    let stored = engine.items().get_item(local.uuid).unwrap().unwrap();
    assert_eq!(stored.version, 5);
    assert_eq!(stored.description, "remote wrote this");
}

#[tokio::test]
async fn last_writer_wins_discards_older_remote_copy() {
    let remote = MockRemote::default();
    let mut engine = engine_with(remote.clone(), NotificationBus::new());

    let local = engine.items().add_item(&draft("fresh local")).unwrap();

    let mut incoming = local.clone();
    incoming.version = 9;
    incoming.description = "stale remote copy".to_string();
    incoming.updation_timestamp = local.updation_timestamp - Duration::seconds(60);
    remote.script_response(&DiffResponse {
        items_for_update: vec![incoming],
        ..DiffResponse::default()
    });

    let report = engine.run_cycle(false).await.unwrap().unwrap();
    assert_eq!(report.updated, 0);
    assert_eq!(report.discarded, 1);

    let stored = engine.items().get_item(local.uuid).unwrap().unwrap();
    assert_eq!(stored.version, local.version);
    assert_eq!(stored.description, "fresh local body");
}

#[tokio::test]
async fn items_for_delete_move_live_records_to_bin() {
    let remote = MockRemote::default();
    let mut engine = engine_with(remote.clone(), NotificationBus::new());

    let local = engine.items().add_item(&draft("to be tombstoned")).unwrap();
    remote.script_response(&DiffResponse {
        items_for_delete: vec![local.state()],
        ..DiffResponse::default()
    });

    let report = engine.run_cycle(false).await.unwrap().unwrap();
    assert_eq!(report.deleted, 1);
    assert!(engine.items().get_item(local.uuid).unwrap().is_none());

    let binned = engine.items().get_all_items(true).unwrap();
    assert_eq!(binned.len(), 1);
    assert!(binned[0].deleted);
}

#[tokio::test]
async fn items_for_sync_push_full_copies_in_one_bulk_call() {
    let remote = MockRemote::default();
    let mut engine = engine_with(remote.clone(), NotificationBus::new());

    let first = engine.items().add_item(&draft("push me")).unwrap();
    let second = engine.items().add_item(&draft("push me too")).unwrap();
    remote.script_response(&DiffResponse {
        items_for_sync: vec![first.state(), second.state()],
        ..DiffResponse::default()
    });

    let report = engine.run_cycle(false).await.unwrap().unwrap();
    assert_eq!(report.pushed, 2);

    let pushes = remote.pushed_items();
    assert_eq!(pushes.len(), 1, "single bulk push call");
    let uuids: Vec<_> = pushes[0].item_list.iter().map(|item| item.uuid).collect();
    assert!(uuids.contains(&first.uuid));
    assert!(uuids.contains(&second.uuid));
}

#[tokio::test]
async fn reapplying_the_same_diff_is_idempotent() {
    let remote = MockRemote::default();
    let mut engine = engine_with(remote.clone(), NotificationBus::new());

    let seeded = engine.items().add_item(&draft("seeded")).unwrap();
    let incoming = remote_item("incoming once");
    let response = DiffResponse {
        items_for_add: vec![incoming.clone()],
        items_for_delete: vec![seeded.state()],
        ..DiffResponse::default()
    };

    remote.script_response(&response);
    engine.run_cycle(false).await.unwrap();
    let live_after_first = engine.items().get_all_items(false).unwrap();
    let bin_after_first = engine.items().get_all_items(true).unwrap();

    remote.script_response(&response);
    let second = engine.run_cycle(false).await.unwrap().unwrap();
    assert_eq!(second.added, 0);
    assert_eq!(second.discarded, 1);
    assert_eq!(second.deleted, 0);

    assert_eq!(engine.items().get_all_items(false).unwrap(), live_after_first);
    assert_eq!(engine.items().get_all_items(true).unwrap(), bin_after_first);
}

#[tokio::test]
async fn connectivity_failure_aborts_cycle_without_applying() {
    let remote = MockRemote::default();
    let bus = NotificationBus::new();
    let mut engine = engine_with(remote.clone(), bus.clone());

    let local = engine.items().add_item(&draft("untouched")).unwrap();
    let mut events = bus.subscribe();
    // Drain the seeding event.
    while events.try_recv().is_ok() {}

    remote.script_failure("connection refused");
    let err = engine.run_cycle(false).await.unwrap_err();
    assert!(matches!(err, SyncError::Connectivity(_)));

    assert!(engine.items().get_item(local.uuid).unwrap().is_some());
    assert!(
        events.try_recv().is_err(),
        "no merge event after an aborted cycle"
    );
}

#[tokio::test]
async fn malformed_response_aborts_cycle_whole() {
    let remote = MockRemote::default();
    let mut engine = engine_with(remote.clone(), NotificationBus::new());
    engine.items().add_item(&draft("survivor")).unwrap();

    remote.script_raw(b"this is not json");
    let err = engine.run_cycle(false).await.unwrap_err();
    assert!(matches!(err, SyncError::MalformedResponse(_)));
    assert_eq!(engine.items().get_all_items(false).unwrap().len(), 1);
}

#[tokio::test]
async fn offline_engine_is_inert() {
    let conn = open_db_in_memory().unwrap();
    let items = ItemService::new(conn, NotificationBus::new());
    let mut engine: SyncEngine<MockRemote> =
        SyncEngine::new(items, None, SyncConfig::default());

    let outcome = engine.run_cycle(false).await.unwrap();
    assert!(outcome.is_none());
}

#[tokio::test]
async fn partial_cycle_bounds_state_collection_to_recent_records() {
    let remote = MockRemote::default();
    let conn = open_db_in_memory().unwrap();
    let items = ItemService::new(conn, NotificationBus::new());
    let config = SyncConfig {
        partial_state_limit: 2,
        ..SyncConfig::default()
    };
    let mut engine = SyncEngine::new(items, Some(remote.clone()), config);

    for index in 0..5 {
        engine.items().add_item(&draft(&format!("task {index}"))).unwrap();
    }

    remote.script_response(&DiffResponse::default());
    engine.run_cycle(true).await.unwrap();
    let partial = remote.last_diff_request();
    assert!(partial.partial);
    assert_eq!(partial.merge_items.len(), 2);

    remote.script_response(&DiffResponse::default());
    engine.run_cycle(false).await.unwrap();
    let full = remote.last_diff_request();
    assert!(!full.partial);
    assert_eq!(full.merge_items.len(), 5);
}

#[tokio::test]
async fn one_coalesced_merge_event_per_cycle() {
    let remote = MockRemote::default();
    let bus = NotificationBus::new();
    let mut engine = engine_with(remote.clone(), bus.clone());

    let mut events = bus.subscribe();
    remote.script_response(&DiffResponse {
        items_for_add: vec![remote_item("a"), remote_item("b"), remote_item("c")],
        ..DiffResponse::default()
    });

    let report = engine.run_cycle(false).await.unwrap().unwrap();
    assert_eq!(report.added, 3);

    let mut merge_events = 0;
    let mut item_events = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            ChangeEvent::MergeCompleted { report } => {
                merge_events += 1;
                assert_eq!(report.added, 3);
            }
            ChangeEvent::ItemAdded { .. } => item_events += 1,
            _ => {}
        }
    }
    assert_eq!(merge_events, 1, "completion signaling coalesces to one event");
    assert_eq!(item_events, 3);
}
