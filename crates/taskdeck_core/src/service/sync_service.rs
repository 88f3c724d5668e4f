//! UI-facing mutation wrappers.
//!
//! # Responsibility
//! - Apply local mutations through the item service, then best-effort
//!   forward them to the remote authority and notify peers over the
//!   collaboration channel.
//!
//! # Invariants
//! - The local mutation is the source of truth: remote forwarding failures
//!   degrade the session to offline-only and never fail the local write.
//! - Peer notification happens only after a successful local mutation.

use crate::model::item::{Item, ItemUuid};
use crate::service::item_service::{BatchReport, ItemDraft, ItemService, ItemServiceResult};
use crate::sync::protocol::{Envelope, PushRequest};
use crate::sync::remote::RemoteAuthority;
use bytes::Bytes;
use log::warn;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Mutation wrapper combining the local store path with remote forwarding
/// and peer notification.
pub struct SyncService<R: RemoteAuthority> {
    items: ItemService,
    remote: Option<R>,
    peers: Option<mpsc::Sender<Envelope>>,
    replica_id: String,
}

impl<R: RemoteAuthority> SyncService<R> {
    /// `remote`/`peers` may be absent for offline sessions; the wrappers
    /// then reduce to plain local mutations.
    pub fn new(
        items: ItemService,
        remote: Option<R>,
        peers: Option<mpsc::Sender<Envelope>>,
    ) -> Self {
        Self {
            items,
            remote,
            peers,
            replica_id: Uuid::new_v4().to_string(),
        }
    }

    /// Direct access to read-side operations.
    pub fn items(&mut self) -> &mut ItemService {
        &mut self.items
    }

    pub async fn add_item(&mut self, draft: &ItemDraft) -> ItemServiceResult<Item> {
        let item = self.items.add_item(draft)?;
        self.forward(std::slice::from_ref(&item)).await;
        self.notify_peers().await;
        Ok(item)
    }

    pub async fn update_item(&mut self, item: &Item) -> ItemServiceResult<Item> {
        let updated = self.items.update_item(item)?;
        self.forward(std::slice::from_ref(&updated)).await;
        self.notify_peers().await;
        Ok(updated)
    }

    /// Deletes locally, then forwards the tombstoned copy so the remote
    /// learns about the deletion without waiting for the next diff cycle.
    pub async fn delete_item(&mut self, uuid: ItemUuid) -> ItemServiceResult<Item> {
        let tombstone = self.items.delete_item(uuid)?;
        self.forward(std::slice::from_ref(&tombstone)).await;
        self.notify_peers().await;
        Ok(tombstone)
    }

    /// Batch add: individual failures are aggregated into the report, the
    /// successful records are forwarded in one bulk call.
    pub async fn add_many(&mut self, drafts: &[ItemDraft]) -> BatchReport {
        let report = self.items.add_many(drafts);
        if !report.added.is_empty() {
            self.forward(&report.added).await;
            self.notify_peers().await;
        }
        report
    }

    async fn forward(&mut self, records: &[Item]) {
        if records.is_empty() {
            return;
        }
        let Some(remote) = self.remote.as_ref() else {
            return;
        };

        let request = PushRequest {
            item_list: records.to_vec(),
        };
        let body = match serde_json::to_vec(&request) {
            Ok(encoded) => Bytes::from(encoded),
            Err(err) => {
                warn!("event=remote_forward module=sync status=error error={err}");
                return;
            }
        };

        if let Err(err) = remote.push_items(body).await {
            warn!(
                "event=remote_forward module=sync status=degraded count={} error={err}",
                records.len()
            );
        }
    }

    async fn notify_peers(&self) {
        let Some(peers) = &self.peers else {
            return;
        };
        let envelope = Envelope::RefreshMerge {
            origin: Some(self.replica_id.clone()),
        };
        if peers.send(envelope).await.is_err() {
            warn!("event=peer_notify module=sync status=dropped reason=channel_closed");
        }
    }
}
