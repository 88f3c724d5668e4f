//! Offline-first task engine: durable local store, diff-based merge against
//! a remote authority, tag/full-text query layer and multi-key sort layer.
//! This crate is the single source of truth for engine invariants.

pub mod db;
pub mod logging;
pub mod model;
pub mod notify;
pub mod repo;
pub mod search;
pub mod service;
pub mod session;
pub mod sort;
pub mod sync;

pub use logging::{default_log_level, init_logging, logging_status};
pub use model::item::{CustomRecord, Item, ItemId, ItemState, ItemUuid, Tag, TagIndexEntry};
pub use notify::{ChangeEvent, NotificationBus};
pub use repo::item_repo::{ItemRepository, RecordSet, RepoError, RepoResult, SqliteItemRepository};
pub use search::query::{run_query, QueryError, QueryRequest, QueryResult};
pub use service::item_service::{BatchReport, ItemDraft, ItemService, ItemServiceError};
pub use service::sync_service::SyncService;
pub use session::{SessionContext, SyncConfig};
pub use sort::compare::{sort_items, SortSpec};
pub use sync::engine::{MergeReport, SyncEngine, SyncPhase};
pub use sync::remote::{HttpRemoteAuthority, RemoteAuthority};
pub use sync::runtime::SyncRuntime;
pub use sync::{SyncCommand, SyncError, SyncResult};

/// Returns the engine crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
