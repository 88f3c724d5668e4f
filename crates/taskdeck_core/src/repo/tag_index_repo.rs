//! Tag inverted-index repository.
//!
//! # Responsibility
//! - Persist `tag name -> item ids` records backing the tag query dimension.
//! - Provide patch helpers used as a secondary effect of item writes.
//! - Offer a full rebuild as the explicit recovery path for staleness.
//!
//! # Invariants
//! - One record per tag name; names are stored normalized (lowercase).
//! - Membership is eventually consistent with `items.tags`: patches run
//!   outside the item write transaction, and concurrent get-modify-put
//!   cycles on the same tag can lose a write. Exact-mode queries re-validate
//!   against hydrated tags for this reason.

use crate::model::item::{normalize_tag_name, Item, ItemId, TagIndexEntry};
use crate::repo::item_repo::{RepoError, RepoResult};
use rusqlite::{params, Connection, OptionalExtension};

/// Repository interface for the tag inverted index.
pub trait TagIndexRepository {
    fn get_entry(&self, name: &str) -> RepoResult<Option<TagIndexEntry>>;
    fn put_entry(&self, entry: &TagIndexEntry) -> RepoResult<()>;
    fn all_entries(&self) -> RepoResult<Vec<TagIndexEntry>>;
    /// Adds the id to every named tag and removes it from tags the item no
    /// longer carries. Get-modify-put per tag record.
    fn patch_item(&self, id: ItemId, tag_names: &[String]) -> RepoResult<()>;
    /// Drops empty entries and recomputes the whole index from the live set.
    fn rebuild(&self, live_items: &[Item]) -> RepoResult<()>;
}

/// SQLite-backed tag index repository.
pub struct SqliteTagIndexRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTagIndexRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'tag_index'
            );",
            [],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(RepoError::MissingRequiredTable("tag_index"));
        }
        Ok(Self { conn })
    }
}

impl TagIndexRepository for SqliteTagIndexRepository<'_> {
    fn get_entry(&self, name: &str) -> RepoResult<Option<TagIndexEntry>> {
        let Some(normalized) = normalize_tag_name(name) else {
            return Ok(None);
        };
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT item_ids FROM tag_index WHERE name = ?1;",
                [normalized.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|ids| {
            Ok(TagIndexEntry {
                name: normalized,
                item_ids: ids_from_db(&ids)?,
            })
        })
        .transpose()
    }

    fn put_entry(&self, entry: &TagIndexEntry) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO tag_index (name, item_ids) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET item_ids = excluded.item_ids;",
            params![entry.name.as_str(), ids_to_db(&entry.item_ids)?],
        )?;
        Ok(())
    }

    fn all_entries(&self) -> RepoResult<Vec<TagIndexEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, item_ids FROM tag_index ORDER BY name ASC;")?;
        let mut rows = stmt.query([])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            let ids: String = row.get("item_ids")?;
            entries.push(TagIndexEntry {
                name: row.get("name")?,
                item_ids: ids_from_db(&ids)?,
            });
        }
        Ok(entries)
    }

    fn patch_item(&self, id: ItemId, tag_names: &[String]) -> RepoResult<()> {
        let wanted: Vec<String> = tag_names
            .iter()
            .filter_map(|name| normalize_tag_name(name))
            .collect();

        // Membership add: get-modify-put per wanted tag.
        for name in &wanted {
            let mut entry = self
                .get_entry(name)?
                .unwrap_or_else(|| TagIndexEntry {
                    name: name.clone(),
                    item_ids: Vec::new(),
                });
            if !entry.item_ids.contains(&id) {
                entry.item_ids.push(id);
                self.put_entry(&entry)?;
            }
        }

        // Membership removal from tags the item no longer carries.
        for mut entry in self.all_entries()? {
            if wanted.contains(&entry.name) {
                continue;
            }
            let before = entry.item_ids.len();
            entry.item_ids.retain(|member| *member != id);
            if entry.item_ids.len() != before {
                self.put_entry(&entry)?;
            }
        }

        Ok(())
    }

    fn rebuild(&self, live_items: &[Item]) -> RepoResult<()> {
        self.conn.execute("DELETE FROM tag_index;", [])?;
        let mut by_name: std::collections::BTreeMap<String, Vec<ItemId>> =
            std::collections::BTreeMap::new();
        for item in live_items {
            for tag in &item.tags {
                if let Some(name) = normalize_tag_name(&tag.name) {
                    by_name.entry(name).or_default().push(item.id);
                }
            }
        }
        for (name, item_ids) in by_name {
            self.put_entry(&TagIndexEntry { name, item_ids })?;
        }
        Ok(())
    }
}

fn ids_to_db(ids: &[ItemId]) -> RepoResult<String> {
    serde_json::to_string(ids)
        .map_err(|err| RepoError::InvalidData(format!("unserializable id list: {err}")))
}

fn ids_from_db(raw: &str) -> RepoResult<Vec<ItemId>> {
    serde_json::from_str(raw)
        .map_err(|err| RepoError::InvalidData(format!("invalid item_ids column: {err}")))
}
