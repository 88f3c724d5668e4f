//! In-process change-notification bus.
//!
//! # Responsibility
//! - Broadcast typed per-item change events and coalesced merge completions
//!   to UI-layer subscribers.
//!
//! # Invariants
//! - The bus is a notification surface, not a durability mechanism: lagged
//!   subscribers lose oldest events, publishers never block.

use crate::model::item::ItemUuid;
use crate::sync::engine::MergeReport;
use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 256;

/// One change notification. Per-item events carry the stable uuid so
/// subscribers can re-read current state; they never carry payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    ItemAdded { uuid: ItemUuid },
    ItemUpdated { uuid: ItemUuid },
    ItemDeleted { uuid: ItemUuid },
    ItemRestored { uuid: ItemUuid },
    /// Exactly one per completed merge cycle, after every apply operation
    /// has acknowledged.
    MergeCompleted { report: MergeReport },
    ChannelUp,
    ChannelDown,
}

/// Cloneable handle to the in-process change stream.
#[derive(Debug, Clone)]
pub struct NotificationBus {
    sender: broadcast::Sender<ChangeEvent>,
}

impl NotificationBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    /// Publishes one event. A send with no live subscribers is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}
