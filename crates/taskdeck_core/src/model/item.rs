//! Item domain model.
//!
//! # Responsibility
//! - Define the canonical task record and its wire-weight projections.
//! - Provide lifecycle helpers for version/timestamp bookkeeping and
//!   soft-delete semantics.
//!
//! # Invariants
//! - `uuid` is assigned at creation and never changes; it is the join key
//!   across replicas.
//! - `id` is replica-local and never serialized onto the wire.
//! - `version` strictly increases on every local mutation.
//! - `updation_timestamp` is the conflict-resolution key for merges.
//!
//! # See also
//! - docs/architecture/data-model.md

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable cross-replica identifier for an item.
pub type ItemUuid = Uuid;

/// Replica-local sequential identifier. Not portable across replicas.
pub type ItemId = i64;

/// Single tag carried by an item.
///
/// Kept as a one-field record (not a bare string) to match the persisted
/// shape and leave room for per-tag metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Canonical task record shared by the live and tombstone sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Replica-local row id. Assigned by the store, excluded from the wire.
    #[serde(skip)]
    pub id: ItemId,
    /// Stable global identity used as the sync join key.
    pub uuid: ItemUuid,
    /// User-facing title. Unique within the active set.
    pub subject: String,
    /// Free-form body text.
    pub description: String,
    /// Ordered tag set; duplicate names collapse, names are lowercased.
    pub tags: Vec<Tag>,
    /// Monotonic local mutation counter.
    pub version: i64,
    pub completion_status: bool,
    pub set_for_reminder: bool,
    pub creation_timestamp: DateTime<Utc>,
    /// Conflict-resolution key: last writer by wall clock wins.
    pub updation_timestamp: DateTime<Utc>,
    /// Tombstone marker; true only for records in the tombstone set.
    pub deleted: bool,
    /// Calendar projection, owned by the UI layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_end: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_full_day: Option<bool>,
    /// Dynamic schema + keyed data blob. Opaque to the engine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_defined: Option<serde_json::Value>,
}

impl Item {
    /// Creates a fresh item with generated identity and zeroed version.
    pub fn new(subject: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            uuid: Uuid::new_v4(),
            subject: subject.into(),
            description: description.into(),
            tags: Vec::new(),
            version: 0,
            completion_status: false,
            set_for_reminder: false,
            creation_timestamp: now,
            updation_timestamp: now,
            deleted: false,
            event_start: None,
            event_end: None,
            event_full_day: None,
            user_defined: None,
        }
    }

    /// Records one local mutation: bumps `version`, refreshes the
    /// conflict-resolution timestamp.
    pub fn touch(&mut self) {
        self.version += 1;
        self.updation_timestamp = Utc::now();
    }

    /// Marks this item as tombstoned.
    pub fn mark_deleted(&mut self) {
        self.deleted = true;
    }

    /// Projects the wire-weight state used by the diff protocol.
    pub fn state(&self) -> ItemState {
        ItemState {
            uuid: self.uuid,
            updation_timestamp: self.updation_timestamp,
            version: self.version,
        }
    }
}

/// Wire-weight projection used only for diffing. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemState {
    pub uuid: ItemUuid,
    pub updation_timestamp: DateTime<Utc>,
    pub version: i64,
}

/// Inverted-index record: one tag name and the local ids carrying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagIndexEntry {
    pub name: String,
    pub item_ids: Vec<ItemId>,
}

/// Keyed opaque blob kept for schema/template data. Unrelated to the item
/// lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomRecord {
    pub tag: String,
    pub payload: serde_json::Value,
}

/// Normalizes one tag name: trimmed, lowercased, empty rejected.
pub fn normalize_tag_name(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Normalizes a tag list: lowercases names, drops blanks, collapses
/// duplicates while preserving first-seen order.
pub fn normalize_tags(tags: &[Tag]) -> Vec<Tag> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for tag in tags {
        if let Some(name) = normalize_tag_name(&tag.name) {
            if seen.insert(name.clone()) {
                out.push(Tag { name });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{normalize_tags, Item, Tag};

    #[test]
    fn new_item_starts_at_version_zero_and_active() {
        let item = Item::new("subject", "body");
        assert_eq!(item.version, 0);
        assert!(!item.deleted);
        assert_eq!(item.creation_timestamp, item.updation_timestamp);
    }

    #[test]
    fn touch_bumps_version_and_refreshes_timestamp() {
        let mut item = Item::new("subject", "body");
        let before = item.updation_timestamp;
        item.touch();
        item.touch();
        assert_eq!(item.version, 2);
        assert!(item.updation_timestamp >= before);
    }

    #[test]
    fn normalize_tags_collapses_duplicates_preserving_order() {
        let tags = vec![
            Tag::new("Work"),
            Tag::new("  "),
            Tag::new("URGENT"),
            Tag::new("work"),
        ];
        let normalized = normalize_tags(&tags);
        assert_eq!(
            normalized,
            vec![Tag::new("work"), Tag::new("urgent")]
        );
    }

    #[test]
    fn wire_form_excludes_local_id() {
        let mut item = Item::new("wire", "body");
        item.id = 42;
        let json = serde_json::to_value(&item).unwrap();
        assert!(json.get("id").is_none());
        assert!(json.get("uuid").is_some());
        assert!(json.get("updationTimestamp").is_some());
    }
}
