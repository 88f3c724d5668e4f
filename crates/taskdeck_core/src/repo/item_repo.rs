//! Item repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide CRUD over the live and tombstone record sets.
//! - Own the move-to-bin/restore transitions with atomic semantics.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - `id` and `uuid` are preserved across live/bin transitions.
//! - Subject uniqueness is enforced on the live set only.
//! - Read paths reject invalid persisted state instead of masking it.
//!
//! # See also
//! - docs/architecture/data-model.md

use crate::db::DbError;
use crate::model::item::{Item, ItemId, ItemState, ItemUuid, Tag};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const ITEM_COLUMNS: &str = "id, uuid, subject, description, tags, version, \
    completion_status, set_for_reminder, creation_timestamp, updation_timestamp, \
    deleted, event_start, event_end, event_full_day, user_defined";

/// Largest scalar Unicode value; used as the exclusive upper bound sentinel
/// for subject prefix range scans.
const PREFIX_SENTINEL: char = '\u{10FFFF}';

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for item persistence and lookup operations.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    NotFound(ItemUuid),
    /// Unique-subject violation on the live set. Fails the single operation
    /// without affecting batch siblings.
    DuplicateSubject(String),
    InvalidData(String),
    MissingRequiredTable(&'static str),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(uuid) => write!(f, "item not found: {uuid}"),
            Self::DuplicateSubject(subject) => {
                write!(f, "subject already exists in active set: `{subject}`")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted item data: {message}"),
            Self::MissingRequiredTable(table) => write!(f, "required table missing: {table}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Which of the two item record sets an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSet {
    Live,
    Bin,
}

impl RecordSet {
    fn table(self) -> &'static str {
        match self {
            Self::Live => "items",
            Self::Bin => "items_bin",
        }
    }
}

/// Repository interface for live/tombstone item operations.
pub trait ItemRepository {
    /// Inserts into the live set and returns the assigned local id.
    fn create_item(&self, item: &Item) -> RepoResult<ItemId>;
    /// Replaces a live record wholesale, matched by uuid.
    fn update_item(&self, item: &Item) -> RepoResult<()>;
    /// Inserts a full tombstone directly into the bin set.
    fn insert_into_bin(&self, item: &Item) -> RepoResult<ItemId>;
    fn get_by_uuid(&self, set: RecordSet, uuid: ItemUuid) -> RepoResult<Option<Item>>;
    fn get_by_id(&self, set: RecordSet, id: ItemId) -> RepoResult<Option<Item>>;
    /// Returns the full record set, unordered; callers sort independently.
    fn list_all(&self, set: RecordSet) -> RepoResult<Vec<Item>>;
    /// Wire-weight states for every record in the set.
    fn list_states(&self, set: RecordSet) -> RepoResult<Vec<ItemState>>;
    /// Wire-weight states for the N most-recently-touched records.
    fn list_recent_states(&self, set: RecordSet, limit: u32) -> RepoResult<Vec<ItemState>>;
    /// Range scan `[prefix, prefix + sentinel)` over the subject index.
    fn subject_prefix_scan(&self, set: RecordSet, prefix: &str) -> RepoResult<Vec<Item>>;
    /// Moves a live record into the bin. Returns the tombstoned copy, or
    /// `None` when no live record carries the uuid.
    fn move_to_bin(&mut self, uuid: ItemUuid) -> RepoResult<Option<Item>>;
    /// Moves a tombstone back into the live set. Fails on subject conflict
    /// like a normal add.
    fn restore(&mut self, uuid: ItemUuid) -> RepoResult<Item>;
    /// Physically erases a tombstone. Explicit user action, never reached by
    /// the sync path.
    fn purge(&mut self, uuid: ItemUuid) -> RepoResult<()>;
}

/// SQLite-backed item repository over one connection handle.
pub struct SqliteItemRepository<'conn> {
    conn: &'conn mut Connection,
}

impl<'conn> SqliteItemRepository<'conn> {
    /// Constructs a repository from a migrated/ready connection.
    pub fn try_new(conn: &'conn mut Connection) -> RepoResult<Self> {
        for table in ["items", "items_bin"] {
            if !table_exists(conn, table)? {
                return Err(RepoError::MissingRequiredTable(table));
            }
        }
        Ok(Self { conn })
    }
}

impl ItemRepository for SqliteItemRepository<'_> {
    fn create_item(&self, item: &Item) -> RepoResult<ItemId> {
        insert_item(self.conn, RecordSet::Live, item, None)
    }

    fn update_item(&self, item: &Item) -> RepoResult<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE items
                 SET
                    subject = ?1,
                    description = ?2,
                    tags = ?3,
                    version = ?4,
                    completion_status = ?5,
                    set_for_reminder = ?6,
                    updation_timestamp = ?7,
                    event_start = ?8,
                    event_end = ?9,
                    event_full_day = ?10,
                    user_defined = ?11
                 WHERE uuid = ?12;",
                params![
                    item.subject.as_str(),
                    item.description.as_str(),
                    tags_to_db(&item.tags)?,
                    item.version,
                    bool_to_int(item.completion_status),
                    bool_to_int(item.set_for_reminder),
                    ts_to_db(item.updation_timestamp),
                    item.event_start.map(ts_to_db),
                    item.event_end.map(ts_to_db),
                    item.event_full_day.map(bool_to_int),
                    user_defined_to_db(item)?,
                    item.uuid.to_string(),
                ],
            )
            .map_err(|err| map_constraint(err, &item.subject))?;

        if changed == 0 {
            return Err(RepoError::NotFound(item.uuid));
        }

        Ok(())
    }

    fn insert_into_bin(&self, item: &Item) -> RepoResult<ItemId> {
        insert_item(self.conn, RecordSet::Bin, item, None)
    }

    fn get_by_uuid(&self, set: RecordSet, uuid: ItemUuid) -> RepoResult<Option<Item>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM {} WHERE uuid = ?1;",
            set.table()
        ))?;
        let mut rows = stmt.query([uuid.to_string()])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_item_row(row)?)),
            None => Ok(None),
        }
    }

    fn get_by_id(&self, set: RecordSet, id: ItemId) -> RepoResult<Option<Item>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM {} WHERE id = ?1;",
            set.table()
        ))?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(Some(parse_item_row(row)?)),
            None => Ok(None),
        }
    }

    fn list_all(&self, set: RecordSet) -> RepoResult<Vec<Item>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {ITEM_COLUMNS} FROM {};", set.table()))?;
        let mut rows = stmt.query([])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_item_row(row)?);
        }
        Ok(items)
    }

    fn list_states(&self, set: RecordSet) -> RepoResult<Vec<ItemState>> {
        collect_states(
            self.conn,
            &format!(
                "SELECT uuid, updation_timestamp, version FROM {};",
                set.table()
            ),
        )
    }

    fn list_recent_states(&self, set: RecordSet, limit: u32) -> RepoResult<Vec<ItemState>> {
        collect_states(
            self.conn,
            &format!(
                "SELECT uuid, updation_timestamp, version FROM {}
                 ORDER BY updation_timestamp DESC LIMIT {limit};",
                set.table()
            ),
        )
    }

    fn subject_prefix_scan(&self, set: RecordSet, prefix: &str) -> RepoResult<Vec<Item>> {
        let upper = format!("{prefix}{PREFIX_SENTINEL}");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM {}
             WHERE subject >= ?1 AND subject < ?2
             ORDER BY subject ASC;",
            set.table()
        ))?;
        let mut rows = stmt.query(params![prefix, upper])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_item_row(row)?);
        }
        Ok(items)
    }

    fn move_to_bin(&mut self, uuid: ItemUuid) -> RepoResult<Option<Item>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut item = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {ITEM_COLUMNS} FROM items WHERE uuid = ?1;"
            ))?;
            let mut rows = stmt.query([uuid.to_string()])?;
            match rows.next()? {
                Some(row) => parse_item_row(row)?,
                None => return Ok(None),
            }
        };
        item.mark_deleted();

        insert_item(&tx, RecordSet::Bin, &item, Some(item.id))?;
        tx.execute("DELETE FROM items WHERE uuid = ?1;", [uuid.to_string()])?;
        tx.commit()?;

        Ok(Some(item))
    }

    fn restore(&mut self, uuid: ItemUuid) -> RepoResult<Item> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut item = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {ITEM_COLUMNS} FROM items_bin WHERE uuid = ?1;"
            ))?;
            let mut rows = stmt.query([uuid.to_string()])?;
            match rows.next()? {
                Some(row) => parse_item_row(row)?,
                None => return Err(RepoError::NotFound(uuid)),
            }
        };
        item.deleted = false;

        insert_item(&tx, RecordSet::Live, &item, Some(item.id))?;
        tx.execute("DELETE FROM items_bin WHERE uuid = ?1;", [uuid.to_string()])?;
        tx.commit()?;

        Ok(item)
    }

    fn purge(&mut self, uuid: ItemUuid) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM items_bin WHERE uuid = ?1;", [uuid.to_string()])?;
        if changed == 0 {
            return Err(RepoError::NotFound(uuid));
        }
        Ok(())
    }
}

fn insert_item(
    conn: &Connection,
    set: RecordSet,
    item: &Item,
    explicit_id: Option<ItemId>,
) -> RepoResult<ItemId> {
    // Explicit ids are used by live/bin transitions to keep `id` stable for
    // the item's whole lifetime.
    let id_column = if explicit_id.is_some() { "id, " } else { "" };
    let id_placeholder = if explicit_id.is_some() { "?13, " } else { "" };

    conn.execute(
        &format!(
            "INSERT INTO {} (
                {id_column}uuid, subject, description, tags, version,
                completion_status, set_for_reminder, creation_timestamp,
                updation_timestamp, deleted, event_start, event_end,
                event_full_day, user_defined
            ) VALUES (
                {id_placeholder}?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                ?14, ?15
            );",
            set.table()
        ),
        params![
            item.uuid.to_string(),
            item.subject.as_str(),
            item.description.as_str(),
            tags_to_db(&item.tags)?,
            item.version,
            bool_to_int(item.completion_status),
            bool_to_int(item.set_for_reminder),
            ts_to_db(item.creation_timestamp),
            ts_to_db(item.updation_timestamp),
            bool_to_int(item.deleted),
            item.event_start.map(ts_to_db),
            item.event_end.map(ts_to_db),
            explicit_id,
            item.event_full_day.map(bool_to_int),
            user_defined_to_db(item)?,
        ],
    )
    .map_err(|err| map_constraint(err, &item.subject))?;

    match explicit_id {
        Some(id) => Ok(id),
        None => Ok(conn.last_insert_rowid()),
    }
}

fn collect_states(conn: &Connection, sql: &str) -> RepoResult<Vec<ItemState>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    let mut states = Vec::new();
    while let Some(row) = rows.next()? {
        let uuid_text: String = row.get(0)?;
        let ts_text: String = row.get(1)?;
        states.push(ItemState {
            uuid: parse_uuid(&uuid_text)?,
            updation_timestamp: ts_from_db(&ts_text)?,
            version: row.get(2)?,
        });
    }
    Ok(states)
}

fn parse_item_row(row: &Row<'_>) -> RepoResult<Item> {
    let uuid_text: String = row.get("uuid")?;
    let tags_text: String = row.get("tags")?;
    let creation_text: String = row.get("creation_timestamp")?;
    let updation_text: String = row.get("updation_timestamp")?;
    let user_defined: Option<String> = row.get("user_defined")?;

    Ok(Item {
        id: row.get("id")?,
        uuid: parse_uuid(&uuid_text)?,
        subject: row.get("subject")?,
        description: row.get("description")?,
        tags: tags_from_db(&tags_text)?,
        version: row.get("version")?,
        completion_status: int_to_bool(row.get("completion_status")?)?,
        set_for_reminder: int_to_bool(row.get("set_for_reminder")?)?,
        creation_timestamp: ts_from_db(&creation_text)?,
        updation_timestamp: ts_from_db(&updation_text)?,
        deleted: int_to_bool(row.get("deleted")?)?,
        event_start: parse_optional_ts(row.get("event_start")?)?,
        event_end: parse_optional_ts(row.get("event_end")?)?,
        event_full_day: row
            .get::<_, Option<i64>>("event_full_day")?
            .map(int_to_bool)
            .transpose()?,
        user_defined: user_defined
            .map(|raw| {
                serde_json::from_str(&raw).map_err(|err| {
                    RepoError::InvalidData(format!("invalid user_defined blob: {err}"))
                })
            })
            .transpose()?,
    })
}

fn map_constraint(err: rusqlite::Error, subject: &str) -> RepoError {
    if let rusqlite::Error::SqliteFailure(inner, Some(message)) = &err {
        if inner.code == rusqlite::ErrorCode::ConstraintViolation && message.contains(".subject") {
            return RepoError::DuplicateSubject(subject.to_string());
        }
    }
    RepoError::Db(DbError::Sqlite(err))
}

fn parse_uuid(value: &str) -> RepoResult<ItemUuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}`")))
}

/// Serializes timestamps with fixed microsecond precision so the stored TEXT
/// column orders correctly under lexicographic range scans.
pub(crate) fn ts_to_db(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn ts_from_db(value: &str) -> RepoResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| RepoError::InvalidData(format!("invalid timestamp value `{value}`")))
}

fn parse_optional_ts(value: Option<String>) -> RepoResult<Option<DateTime<Utc>>> {
    value.map(|raw| ts_from_db(&raw)).transpose()
}

fn tags_to_db(tags: &[Tag]) -> RepoResult<String> {
    serde_json::to_string(tags)
        .map_err(|err| RepoError::InvalidData(format!("unserializable tags: {err}")))
}

fn tags_from_db(raw: &str) -> RepoResult<Vec<Tag>> {
    serde_json::from_str(raw)
        .map_err(|err| RepoError::InvalidData(format!("invalid tags column: {err}")))
}

fn user_defined_to_db(item: &Item) -> RepoResult<Option<String>> {
    item.user_defined
        .as_ref()
        .map(|value| {
            serde_json::to_string(value).map_err(|err| {
                RepoError::InvalidData(format!("unserializable user_defined blob: {err}"))
            })
        })
        .transpose()
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

fn int_to_bool(value: i64) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid boolean column value `{other}`"
        ))),
    }
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}
