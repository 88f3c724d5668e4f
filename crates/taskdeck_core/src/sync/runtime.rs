//! Execution-context wiring for the sync engine and collaboration channel.
//!
//! # Responsibility
//! - Open a dedicated store handle per context and spawn the engine and
//!   channel tasks with their message channels.
//!
//! # Invariants
//! - No handle or mutable state is shared across the spawned contexts;
//!   everything crosses by message.
//! - Offline sessions spawn an inert engine and no channel at all.

use crate::db::{open_db, DbResult};
use crate::notify::NotificationBus;
use crate::service::item_service::ItemService;
use crate::session::{SessionContext, SyncConfig};
use crate::sync::collab::CollabChannel;
use crate::sync::engine::SyncEngine;
use crate::sync::protocol::Envelope;
use crate::sync::remote::HttpRemoteAuthority;
use crate::sync::SyncCommand;
use std::path::Path;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const COMMAND_CHANNEL_CAPACITY: usize = 8;
const OUTBOUND_CHANNEL_CAPACITY: usize = 32;

/// Handles to the running sync contexts.
pub struct SyncRuntime {
    /// Commands into the engine context (force/partial resync, shutdown).
    pub commands: mpsc::Sender<SyncCommand>,
    /// Outbound peer envelopes into the channel context.
    pub peers: mpsc::Sender<Envelope>,
    engine_task: JoinHandle<()>,
    collab_task: Option<JoinHandle<()>>,
}

impl SyncRuntime {
    /// Opens a fresh store handle for the engine context and spawns both
    /// tasks. Must run inside a tokio runtime.
    pub fn launch(
        db_path: impl AsRef<Path>,
        session: &SessionContext,
        config: SyncConfig,
        bus: NotificationBus,
    ) -> DbResult<Self> {
        let conn = open_db(db_path)?;
        let items = ItemService::new(conn, bus.clone());

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (peer_tx, peer_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);

        let remote = HttpRemoteAuthority::from_session(session);
        let engine = SyncEngine::new(items, remote, config.clone());
        let engine_task = tokio::spawn(engine.run(command_rx));

        let collab_task = CollabChannel::from_session(
            session,
            config,
            command_tx.clone(),
            peer_rx,
            bus,
        )
        .map(|channel| tokio::spawn(channel.run()));

        Ok(Self {
            commands: command_tx,
            peers: peer_tx,
            engine_task,
            collab_task,
        })
    }

    /// Requests engine shutdown and waits for both contexts to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(SyncCommand::Shutdown).await;
        let _ = self.engine_task.await;
        if let Some(collab) = self.collab_task {
            collab.abort();
            let _ = collab.await;
        }
    }
}
