//! Item use-case service.
//!
//! # Responsibility
//! - Own identity/version/timestamp assignment for local mutations.
//! - Patch the tag inverted index as a secondary effect of item writes.
//! - Emit change events for every applied mutation.
//!
//! # Invariants
//! - `version` increases by exactly one per local mutation.
//! - Tag-index patching never fails an item write: index errors are logged
//!   and left for exact-mode re-validation / explicit rebuild to absorb.
//! - Deleting leaves tag-index membership stale by design.
//!
//! # See also
//! - docs/architecture/data-model.md

use crate::model::item::{
    normalize_tag_name, CustomRecord, Item, ItemState, ItemUuid, Tag,
};
use crate::notify::{ChangeEvent, NotificationBus};
use crate::repo::custom_repo::{CustomRecordRepository, SqliteCustomRecordRepository};
use crate::repo::item_repo::{ItemRepository, RecordSet, RepoError, SqliteItemRepository};
use crate::repo::tag_index_repo::{SqliteTagIndexRepository, TagIndexRepository};
use log::{info, warn};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ItemServiceResult<T> = Result<T, ItemServiceError>;

/// Service error for item use-cases.
#[derive(Debug)]
pub enum ItemServiceError {
    /// Subject is empty after trimming.
    InvalidSubject,
    Repo(RepoError),
}

impl Display for ItemServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSubject => write!(f, "item subject must not be blank"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ItemServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidSubject => None,
            Self::Repo(err) => Some(err),
        }
    }
}

impl From<RepoError> for ItemServiceError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Input for creating one item locally.
#[derive(Debug, Clone, Default)]
pub struct ItemDraft {
    pub subject: String,
    pub description: String,
    pub tags: Vec<String>,
    pub set_for_reminder: bool,
    pub user_defined: Option<serde_json::Value>,
}

/// Aggregated outcome of one `add_many` batch. Individual failures never
/// abort sibling operations; they are collected here and reported once.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub added: Vec<Item>,
    pub failed: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.added.len()
    }
}

#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub subject: String,
    pub reason: String,
}

/// Use-case service over one store handle.
///
/// Owns its connection: handles are never shared across execution contexts
/// by reference, so each context constructs its own service.
pub struct ItemService {
    conn: Connection,
    bus: NotificationBus,
}

impl ItemService {
    pub fn new(conn: Connection, bus: NotificationBus) -> Self {
        Self { conn, bus }
    }

    /// Exposes the underlying handle for read-only query engine calls.
    pub fn connection(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    /// Creates one item: assigns uuid, `version=0` and both timestamps,
    /// persists, patches the tag index and emits `ItemAdded`.
    pub fn add_item(&mut self, draft: &ItemDraft) -> ItemServiceResult<Item> {
        let subject = draft.subject.trim();
        if subject.is_empty() {
            return Err(ItemServiceError::InvalidSubject);
        }

        let mut item = Item::new(subject, draft.description.clone());
        item.tags = normalize_draft_tags(&draft.tags);
        item.set_for_reminder = draft.set_for_reminder;
        item.user_defined = draft.user_defined.clone();

        item.id = {
            let repo = SqliteItemRepository::try_new(&mut self.conn)?;
            repo.create_item(&item)?
        };

        self.patch_tag_index(&item);
        info!(
            "event=item_add module=service status=ok uuid={} version={}",
            item.uuid, item.version
        );
        self.bus.publish(ChangeEvent::ItemAdded { uuid: item.uuid });
        Ok(item)
    }

    /// Inserts a fully-formed item arriving from the remote authority,
    /// preserving its uuid/version/timestamps. Routes tombstones to the bin
    /// set. Assigns only the local id.
    pub fn add_prepared(&mut self, mut item: Item) -> ItemServiceResult<Item> {
        item.tags = normalize_tags_of(&item);
        item.id = {
            let repo = SqliteItemRepository::try_new(&mut self.conn)?;
            if item.deleted {
                repo.insert_into_bin(&item)?
            } else {
                repo.create_item(&item)?
            }
        };

        if !item.deleted {
            self.patch_tag_index(&item);
            self.bus.publish(ChangeEvent::ItemAdded { uuid: item.uuid });
        }
        Ok(item)
    }

    /// Applies one local edit: bumps `version`, refreshes the updation
    /// timestamp, persists and emits `ItemUpdated`.
    pub fn update_item(&mut self, item: &Item) -> ItemServiceResult<Item> {
        if item.subject.trim().is_empty() {
            return Err(ItemServiceError::InvalidSubject);
        }

        let mut updated = item.clone();
        updated.tags = normalize_tags_of(&updated);
        updated.touch();

        {
            let repo = SqliteItemRepository::try_new(&mut self.conn)?;
            repo.update_item(&updated)?;
        }

        self.patch_tag_index(&updated);
        info!(
            "event=item_update module=service status=ok uuid={} version={}",
            updated.uuid, updated.version
        );
        self.bus
            .publish(ChangeEvent::ItemUpdated { uuid: updated.uuid });
        Ok(updated)
    }

    /// Replaces a local record wholesale with a remote copy that won the
    /// last-writer-wins comparison. No version bump: the incoming copy's
    /// bookkeeping is taken as-is.
    pub fn overwrite_with_remote(&mut self, mut incoming: Item) -> ItemServiceResult<Item> {
        incoming.tags = normalize_tags_of(&incoming);
        {
            let repo = SqliteItemRepository::try_new(&mut self.conn)?;
            repo.update_item(&incoming)?;
            incoming.id = repo
                .get_by_uuid(RecordSet::Live, incoming.uuid)?
                .map(|stored| stored.id)
                .unwrap_or(incoming.id);
        }
        self.patch_tag_index(&incoming);
        self.bus
            .publish(ChangeEvent::ItemUpdated { uuid: incoming.uuid });
        Ok(incoming)
    }

    /// Moves an item into the tombstone set. Errors when no live record
    /// carries the uuid.
    pub fn delete_item(&mut self, uuid: ItemUuid) -> ItemServiceResult<Item> {
        match self.remove_if_live(uuid)? {
            Some(item) => Ok(item),
            None => Err(ItemServiceError::Repo(RepoError::NotFound(uuid))),
        }
    }

    /// Tombstones the item when still live; `None` otherwise. Used by the
    /// merge path, where an already-propagated delete is a normal no-op.
    /// Tag-index membership is intentionally left stale.
    pub fn remove_if_live(&mut self, uuid: ItemUuid) -> ItemServiceResult<Option<Item>> {
        let moved = {
            let mut repo = SqliteItemRepository::try_new(&mut self.conn)?;
            repo.move_to_bin(uuid)?
        };
        if let Some(item) = &moved {
            info!(
                "event=item_delete module=service status=ok uuid={}",
                item.uuid
            );
            self.bus.publish(ChangeEvent::ItemDeleted { uuid });
        }
        Ok(moved)
    }

    /// Moves a tombstone back into the live set, recording the restore as a
    /// local mutation. Fails on subject conflict like a normal add.
    pub fn restore_item(&mut self, uuid: ItemUuid) -> ItemServiceResult<Item> {
        let mut restored = {
            let mut repo = SqliteItemRepository::try_new(&mut self.conn)?;
            repo.restore(uuid)?
        };
        restored.touch();
        {
            let repo = SqliteItemRepository::try_new(&mut self.conn)?;
            repo.update_item(&restored)?;
        }
        self.patch_tag_index(&restored);
        self.bus.publish(ChangeEvent::ItemRestored { uuid });
        Ok(restored)
    }

    /// Physically erases a tombstone. Explicit user action outside the sync
    /// path.
    pub fn purge_item(&mut self, uuid: ItemUuid) -> ItemServiceResult<()> {
        let mut repo = SqliteItemRepository::try_new(&mut self.conn)?;
        repo.purge(uuid)?;
        Ok(())
    }

    /// Adds a batch. Sibling operations continue past individual failures;
    /// the outcome is summarized once per batch.
    pub fn add_many(&mut self, drafts: &[ItemDraft]) -> BatchReport {
        let mut report = BatchReport::default();
        for draft in drafts {
            match self.add_item(draft) {
                Ok(item) => report.added.push(item),
                Err(err) => report.failed.push(BatchFailure {
                    subject: draft.subject.clone(),
                    reason: err.to_string(),
                }),
            }
        }
        info!(
            "event=item_add_many module=service status=ok succeeded={} failed={}",
            report.succeeded(),
            report.failed.len()
        );
        report
    }

    pub fn get_item(&mut self, uuid: ItemUuid) -> ItemServiceResult<Option<Item>> {
        self.get_item_from(false, uuid)
    }

    pub fn get_item_from(
        &mut self,
        from_bin: bool,
        uuid: ItemUuid,
    ) -> ItemServiceResult<Option<Item>> {
        let set = if from_bin {
            RecordSet::Bin
        } else {
            RecordSet::Live
        };
        let repo = SqliteItemRepository::try_new(&mut self.conn)?;
        Ok(repo.get_by_uuid(set, uuid)?)
    }

    pub fn get_all_items(&mut self, from_bin: bool) -> ItemServiceResult<Vec<Item>> {
        let set = if from_bin {
            RecordSet::Bin
        } else {
            RecordSet::Live
        };
        let repo = SqliteItemRepository::try_new(&mut self.conn)?;
        Ok(repo.list_all(set)?)
    }

    /// Collects wire-weight states for a sync cycle: bounded to the most
    /// recently touched records when a limit is given, unbounded otherwise.
    pub fn collect_states(
        &mut self,
        set: RecordSet,
        limit: Option<u32>,
    ) -> ItemServiceResult<Vec<ItemState>> {
        let repo = SqliteItemRepository::try_new(&mut self.conn)?;
        let states = match limit {
            Some(limit) => repo.list_recent_states(set, limit)?,
            None => repo.list_states(set)?,
        };
        Ok(states)
    }

    /// Recomputes the tag inverted index from the live set. The explicit
    /// recovery path for documented index staleness.
    pub fn rebuild_tag_index(&mut self) -> ItemServiceResult<()> {
        let live = self.get_all_items(false)?;
        let tags = SqliteTagIndexRepository::try_new(&self.conn)?;
        tags.rebuild(&live)?;
        Ok(())
    }

    pub fn set_custom_record(&mut self, record: &CustomRecord) -> ItemServiceResult<()> {
        let repo = SqliteCustomRecordRepository::try_new(&self.conn)?;
        repo.put(record)?;
        Ok(())
    }

    pub fn get_custom_record(&mut self, tag: &str) -> ItemServiceResult<Option<CustomRecord>> {
        let repo = SqliteCustomRecordRepository::try_new(&self.conn)?;
        Ok(repo.get(tag)?)
    }

    pub fn list_custom_records(&mut self) -> ItemServiceResult<Vec<CustomRecord>> {
        let repo = SqliteCustomRecordRepository::try_new(&self.conn)?;
        Ok(repo.list()?)
    }

    pub fn delete_custom_record(&mut self, tag: &str) -> ItemServiceResult<bool> {
        let repo = SqliteCustomRecordRepository::try_new(&self.conn)?;
        Ok(repo.delete(tag)?)
    }

    /// Secondary-effect index patch. Runs after the item write commits and
    /// never fails the write; a lost update here is absorbed by exact-mode
    /// re-validation or an explicit rebuild.
    fn patch_tag_index(&mut self, item: &Item) {
        let names: Vec<String> = item.tags.iter().map(|tag| tag.name.clone()).collect();
        let result = SqliteTagIndexRepository::try_new(&self.conn)
            .and_then(|repo| repo.patch_item(item.id, &names));
        if let Err(err) = result {
            warn!(
                "event=tag_index_patch module=service status=error uuid={} error={err}",
                item.uuid
            );
        }
    }
}

fn normalize_draft_tags(tags: &[String]) -> Vec<Tag> {
    tags.iter()
        .filter_map(|name| normalize_tag_name(name))
        .fold(Vec::new(), |mut acc, name| {
            if !acc.iter().any(|tag: &Tag| tag.name == name) {
                acc.push(Tag { name });
            }
            acc
        })
}

fn normalize_tags_of(item: &Item) -> Vec<Tag> {
    crate::model::item::normalize_tags(&item.tags)
}
