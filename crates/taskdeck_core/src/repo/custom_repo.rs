//! Custom keyed blob repository.
//!
//! Side-channel store for schema/template data. Payloads are opaque JSON;
//! the engine never interprets them.

use crate::model::item::CustomRecord;
use crate::repo::item_repo::{RepoError, RepoResult};
use rusqlite::{params, Connection, OptionalExtension};

/// Repository interface for custom keyed blobs.
pub trait CustomRecordRepository {
    fn put(&self, record: &CustomRecord) -> RepoResult<()>;
    fn get(&self, tag: &str) -> RepoResult<Option<CustomRecord>>;
    fn delete(&self, tag: &str) -> RepoResult<bool>;
    fn list(&self) -> RepoResult<Vec<CustomRecord>>;
}

/// SQLite-backed custom blob repository.
pub struct SqliteCustomRecordRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCustomRecordRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'custom_records'
            );",
            [],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(RepoError::MissingRequiredTable("custom_records"));
        }
        Ok(Self { conn })
    }
}

impl CustomRecordRepository for SqliteCustomRecordRepository<'_> {
    fn put(&self, record: &CustomRecord) -> RepoResult<()> {
        let payload = serde_json::to_string(&record.payload)
            .map_err(|err| RepoError::InvalidData(format!("unserializable payload: {err}")))?;
        self.conn.execute(
            "INSERT INTO custom_records (tag, payload) VALUES (?1, ?2)
             ON CONFLICT(tag) DO UPDATE SET payload = excluded.payload;",
            params![record.tag.as_str(), payload],
        )?;
        Ok(())
    }

    fn get(&self, tag: &str) -> RepoResult<Option<CustomRecord>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT payload FROM custom_records WHERE tag = ?1;",
                [tag],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|payload| {
            Ok(CustomRecord {
                tag: tag.to_string(),
                payload: serde_json::from_str(&payload).map_err(|err| {
                    RepoError::InvalidData(format!("invalid payload column: {err}"))
                })?,
            })
        })
        .transpose()
    }

    fn delete(&self, tag: &str) -> RepoResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM custom_records WHERE tag = ?1;", [tag])?;
        Ok(changed > 0)
    }

    fn list(&self) -> RepoResult<Vec<CustomRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT tag, payload FROM custom_records ORDER BY tag ASC;")?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let payload: String = row.get("payload")?;
            records.push(CustomRecord {
                tag: row.get("tag")?,
                payload: serde_json::from_str(&payload).map_err(|err| {
                    RepoError::InvalidData(format!("invalid payload column: {err}"))
                })?,
            });
        }
        Ok(records)
    }
}
