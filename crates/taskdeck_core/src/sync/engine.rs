//! Diff/merge cycle engine.
//!
//! # Responsibility
//! - Drive one cycle through `Idle -> CollectingState -> AwaitingRemote ->
//!   ApplyingMerge -> Idle`.
//! - Apply classified remote deltas with last-writer-wins conflict
//!   resolution and push behind-remote items back up.
//! - Coalesce completion signaling into exactly one event per cycle via a
//!   counted-completion barrier.
//!
//! # Invariants
//! - A failed diff fetch or malformed response applies nothing; the next
//!   trigger is the implicit retry.
//! - An incoming copy that is not strictly newer than the local record is
//!   discarded silently; that outcome is counted, never raised.
//! - Individual record failures during apply are counted and logged, and do
//!   not abort sibling operations.
//!
//! # See also
//! - docs/architecture/sync-protocol.md

use crate::model::item::{Item, ItemState};
use crate::notify::ChangeEvent;
use crate::repo::item_repo::RecordSet;
use crate::service::item_service::ItemService;
use crate::session::SyncConfig;
use crate::sync::protocol::{DiffRequest, DiffResponse, PushRequest};
use crate::sync::remote::RemoteAuthority;
use crate::sync::{SyncCommand, SyncError, SyncResult};
use bytes::Bytes;
use log::{debug, error, info, warn};
use std::time::Instant;
use tokio::sync::mpsc;

/// Observable engine state within one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    CollectingState,
    AwaitingRemote,
    ApplyingMerge,
}

/// Counts carried by the single coalesced completion event of one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub added: usize,
    pub updated: usize,
    /// Incoming copies that lost the last-writer-wins comparison or were
    /// already present. Normal no-op outcomes, not errors.
    pub discarded: usize,
    pub deleted: usize,
    pub pushed: usize,
    /// Individual record failures during apply.
    pub failed: usize,
}

/// Outcome of one acknowledged apply operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApplyOutcome {
    Added,
    Updated,
    Discarded,
    Deleted,
    /// Applied with nothing to do (already tombstoned, nothing to push).
    Noop,
    Pushed(usize),
    Failed,
}

/// Counted-completion barrier: armed with the exact number of apply
/// operations a cycle will perform, complete when every one has
/// acknowledged. Replaces settle-debounce completion detection, so the
/// coalesced event can never fire while a record is still in flight.
struct MergeBarrier {
    expected: usize,
    acks: usize,
    report: MergeReport,
}

impl MergeBarrier {
    fn new(expected: usize) -> Self {
        Self {
            expected,
            acks: 0,
            report: MergeReport::default(),
        }
    }

    fn ack(&mut self, outcome: ApplyOutcome) {
        self.acks += 1;
        match outcome {
            ApplyOutcome::Added => self.report.added += 1,
            ApplyOutcome::Updated => self.report.updated += 1,
            ApplyOutcome::Discarded => self.report.discarded += 1,
            ApplyOutcome::Deleted => self.report.deleted += 1,
            ApplyOutcome::Noop => {}
            ApplyOutcome::Pushed(count) => self.report.pushed += count,
            ApplyOutcome::Failed => self.report.failed += 1,
        }
    }

    fn is_complete(&self) -> bool {
        self.acks == self.expected
    }

    fn into_report(self) -> MergeReport {
        debug_assert!(self.is_complete(), "merge barrier released early");
        self.report
    }
}

/// The sync engine. Owns its execution context's store handle (through its
/// own `ItemService`) and is generic over the remote transport seam.
pub struct SyncEngine<R: RemoteAuthority> {
    items: ItemService,
    remote: Option<R>,
    config: SyncConfig,
    phase: SyncPhase,
}

impl<R: RemoteAuthority> SyncEngine<R> {
    /// `remote = None` constructs an inert engine for offline sessions.
    pub fn new(items: ItemService, remote: Option<R>, config: SyncConfig) -> Self {
        Self {
            items,
            remote,
            config,
            phase: SyncPhase::Idle,
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn items(&mut self) -> &mut ItemService {
        &mut self.items
    }

    /// Runs one full or partial cycle. Returns `Ok(None)` for offline
    /// (inert) sessions.
    pub async fn run_cycle(&mut self, partial: bool) -> SyncResult<Option<MergeReport>> {
        if self.remote.is_none() {
            return Ok(None);
        }

        let started_at = Instant::now();
        info!(
            "event=sync_cycle module=sync status=start partial={partial}"
        );

        let outcome = self.cycle_inner(partial).await;
        self.phase = SyncPhase::Idle;

        match outcome {
            Ok(report) => {
                info!(
                    "event=sync_cycle module=sync status=ok partial={partial} duration_ms={} \
                     added={} updated={} discarded={} deleted={} pushed={} failed={}",
                    started_at.elapsed().as_millis(),
                    report.added,
                    report.updated,
                    report.discarded,
                    report.deleted,
                    report.pushed,
                    report.failed,
                );
                self.items
                    .bus()
                    .publish(ChangeEvent::MergeCompleted { report });
                Ok(Some(report))
            }
            Err(err) => {
                error!(
                    "event=sync_cycle module=sync status=error partial={partial} duration_ms={} error={err}",
                    started_at.elapsed().as_millis()
                );
                Err(err)
            }
        }
    }

    async fn cycle_inner(&mut self, partial: bool) -> SyncResult<MergeReport> {
        self.phase = SyncPhase::CollectingState;
        let limit = partial.then_some(self.config.partial_state_limit);
        let merge_items = self.items.collect_states(RecordSet::Live, limit)?;
        let delete_items = self.items.collect_states(RecordSet::Bin, limit)?;

        let request = DiffRequest {
            partial,
            merge_items,
            delete_items,
        };
        // Serialized exactly once; the transport takes ownership of the
        // buffer.
        let body = Bytes::from(
            serde_json::to_vec(&request).map_err(|err| SyncError::Encode(err.to_string()))?,
        );

        self.phase = SyncPhase::AwaitingRemote;
        let raw = {
            let remote = self.remote.as_ref().expect("checked by run_cycle");
            remote.fetch_diff(body).await?
        };
        let response: DiffResponse = serde_json::from_slice(&raw)
            .map_err(|err| SyncError::MalformedResponse(err.to_string()))?;

        self.phase = SyncPhase::ApplyingMerge;
        self.apply(response).await
    }

    async fn apply(&mut self, response: DiffResponse) -> SyncResult<MergeReport> {
        let expected = response.items_for_add.len()
            + response.items_for_update.len()
            + response.items_for_delete.len()
            + usize::from(!response.items_for_sync.is_empty());
        let mut barrier = MergeBarrier::new(expected);

        for incoming in response.items_for_add {
            let outcome = self.apply_add(incoming);
            barrier.ack(outcome);
        }
        for incoming in response.items_for_update {
            let outcome = self.apply_update(incoming);
            barrier.ack(outcome);
        }
        for state in response.items_for_delete {
            let outcome = self.apply_delete(&state);
            barrier.ack(outcome);
        }

        if !response.items_for_sync.is_empty() {
            let outcome = self.push_up(&response.items_for_sync).await;
            barrier.ack(outcome);
        }

        Ok(barrier.into_report())
    }

    fn apply_add(&mut self, incoming: Item) -> ApplyOutcome {
        let uuid = incoming.uuid;
        let already_present = self
            .items
            .get_item_from(incoming.deleted, uuid)
            .map(|found| found.is_some());
        match already_present {
            Ok(true) => ApplyOutcome::Discarded,
            Ok(false) => match self.items.add_prepared(incoming) {
                Ok(_) => ApplyOutcome::Added,
                Err(err) => {
                    warn!(
                        "event=merge_add module=sync status=error uuid={uuid} error={err}"
                    );
                    ApplyOutcome::Failed
                }
            },
            Err(err) => {
                warn!(
                    "event=merge_add module=sync status=error uuid={uuid} error={err}"
                );
                ApplyOutcome::Failed
            }
        }
    }

    fn apply_update(&mut self, incoming: Item) -> ApplyOutcome {
        let uuid = incoming.uuid;
        let local = match self.items.get_item(uuid) {
            Ok(local) => local,
            Err(err) => {
                warn!(
                    "event=merge_update module=sync status=error uuid={uuid} error={err}"
                );
                return ApplyOutcome::Failed;
            }
        };

        let Some(local) = local else {
            // No live record to compare against; the remote will reclassify
            // on a later cycle if needed.
            return ApplyOutcome::Discarded;
        };

        // Last-writer-wins by wall clock: only a strictly newer incoming
        // copy overwrites.
        if local.updation_timestamp >= incoming.updation_timestamp {
            debug!(
                "event=merge_update module=sync status=discarded uuid={uuid} \
                 local_ts={} incoming_ts={}",
                local.updation_timestamp, incoming.updation_timestamp
            );
            return ApplyOutcome::Discarded;
        }

        match self.items.overwrite_with_remote(incoming) {
            Ok(_) => ApplyOutcome::Updated,
            Err(err) => {
                warn!(
                    "event=merge_update module=sync status=error uuid={uuid} error={err}"
                );
                ApplyOutcome::Failed
            }
        }
    }

    fn apply_delete(&mut self, state: &ItemState) -> ApplyOutcome {
        match self.items.remove_if_live(state.uuid) {
            Ok(Some(_)) => ApplyOutcome::Deleted,
            Ok(None) => ApplyOutcome::Noop,
            Err(err) => {
                warn!(
                    "event=merge_delete module=sync status=error uuid={} error={err}",
                    state.uuid
                );
                ApplyOutcome::Failed
            }
        }
    }

    /// Hydrates full local copies for `itemsForSync` and pushes them in one
    /// bulk call. A push failure does not undo the applied merge; the next
    /// cycle reclassifies.
    async fn push_up(&mut self, states: &[ItemState]) -> ApplyOutcome {
        let mut item_list: Vec<Item> = Vec::new();
        for state in states {
            match self.items.get_item(state.uuid) {
                Ok(Some(item)) => item_list.push(item),
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        "event=merge_push module=sync status=error uuid={} error={err}",
                        state.uuid
                    );
                    return ApplyOutcome::Failed;
                }
            }
        }

        if item_list.is_empty() {
            return ApplyOutcome::Noop;
        }

        let count = item_list.len();
        let request = PushRequest { item_list };
        let body = match serde_json::to_vec(&request) {
            Ok(encoded) => Bytes::from(encoded),
            Err(err) => {
                warn!("event=merge_push module=sync status=error error={err}");
                return ApplyOutcome::Failed;
            }
        };

        let pushed = {
            let remote = self.remote.as_ref().expect("checked by run_cycle");
            remote.push_items(body).await
        };
        match pushed {
            Ok(()) => ApplyOutcome::Pushed(count),
            Err(err) => {
                warn!("event=merge_push module=sync status=error count={count} error={err}");
                ApplyOutcome::Failed
            }
        }
    }

    /// Drives the engine's execution context: an initial full resync, then
    /// periodic partial cycles interleaved with explicit commands until
    /// shutdown. Cycle errors are logged and absorbed; the next trigger is
    /// the retry.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SyncCommand>) {
        if self.remote.is_none() {
            info!("event=sync_engine module=sync status=inert reason=offline_session");
            while let Some(command) = commands.recv().await {
                if command == SyncCommand::Shutdown {
                    break;
                }
            }
            return;
        }

        let _ = self.run_cycle(false).await;

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.poll_interval,
            self.config.poll_interval,
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = self.run_cycle(true).await;
                }
                command = commands.recv() => match command {
                    Some(SyncCommand::Partial) => {
                        let _ = self.run_cycle(true).await;
                    }
                    Some(SyncCommand::Full) => {
                        let _ = self.run_cycle(false).await;
                    }
                    Some(SyncCommand::Shutdown) | None => break,
                },
            }
        }

        info!("event=sync_engine module=sync status=stopped");
    }
}
