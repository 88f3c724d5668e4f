//! Three-dimension item query engine.
//!
//! # Responsibility
//! - Subject prefix search via index range scan.
//! - Tag-set algebra with `+include` / `-exclude` / neutral sigils.
//! - Free-text fallback matching the JSON serialization of whole items.
//!
//! # Invariants
//! - Dimensions produce independent candidate sets; the mode flag decides
//!   the combination (union in non-exact mode, positional intersection of
//!   id-sorted lists in exact mode).
//! - Exact mode re-validates tag candidates against hydrated `tags` fields,
//!   protecting against inverted-index staleness.
//! - With no filters supplied, the requested record set is returned whole.
//!
//! # See also
//! - docs/architecture/query-engine.md

use crate::db::DbError;
use crate::model::item::{normalize_tag_name, Item, ItemId};
use crate::repo::item_repo::{ItemRepository, RecordSet, RepoError, SqliteItemRepository};
use crate::repo::tag_index_repo::{SqliteTagIndexRepository, TagIndexRepository};
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type QueryResult<T> = Result<T, QueryError>;

/// Query-layer error for request parsing, persistence access and result
/// decoding.
#[derive(Debug)]
pub enum QueryError {
    /// Search terms produced an unusable regular expression.
    InvalidPattern { pattern: String, message: String },
    Repo(RepoError),
    Db(DbError),
}

impl Display for QueryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPattern { pattern, message } => {
                write!(f, "invalid search pattern `{pattern}`: {message}")
            }
            Self::Repo(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for QueryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidPattern { .. } => None,
            Self::Repo(err) => Some(err),
            Self::Db(err) => Some(err),
        }
    }
}

impl From<RepoError> for QueryError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<DbError> for QueryError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

/// One query over a record set. Every dimension is optional; supplying none
/// short-circuits to the whole set.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    /// Subject prefix for the range-scan dimension.
    pub subject_prefix: Option<String>,
    /// Sigil-classified tag tokens: `+name` include, `-name` exclude, bare
    /// name neutral.
    pub tag_tokens: Vec<String>,
    /// Free-text terms for the search-everything dimension.
    pub terms: Vec<String>,
    /// Exact mode: per-dimension validation plus positional intersection.
    pub exact: bool,
    /// Search the tombstone set instead of the live set.
    pub from_bin: bool,
}

impl QueryRequest {
    fn record_set(&self) -> RecordSet {
        if self.from_bin {
            RecordSet::Bin
        } else {
            RecordSet::Live
        }
    }

    fn has_filters(&self) -> bool {
        self.subject_prefix
            .as_deref()
            .is_some_and(|prefix| !prefix.is_empty())
            || !self.tag_tokens.is_empty()
            || !self.terms.is_empty()
    }
}

/// Sigil-classified tag filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct TagFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub neutral: Vec<String>,
}

impl TagFilter {
    pub(crate) fn parse(tokens: &[String]) -> Self {
        let mut filter = Self::default();
        for token in tokens {
            let (bucket, raw) = match token.as_bytes().first() {
                Some(b'+') => (&mut filter.include, &token[1..]),
                Some(b'-') => (&mut filter.exclude, &token[1..]),
                _ => (&mut filter.neutral, token.as_str()),
            };
            if let Some(name) = normalize_tag_name(raw) {
                bucket.push(name);
            }
        }
        filter
    }

    fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty() && self.neutral.is_empty()
    }

    /// Direct validation against an item's hydrated tag set. Used in exact
    /// mode to guard against inverted-index staleness.
    fn matches(&self, item: &Item) -> bool {
        let names: BTreeSet<String> = item
            .tags
            .iter()
            .filter_map(|tag| normalize_tag_name(&tag.name))
            .collect();

        if self.exclude.iter().any(|name| names.contains(name)) {
            return false;
        }
        if !self.include.is_empty() {
            return self.include.iter().all(|name| names.contains(name));
        }
        if !self.neutral.is_empty() {
            return self.neutral.iter().any(|name| names.contains(name));
        }
        true
    }
}

/// Runs one query and returns the unordered combined result.
///
/// Callers order the result via the sort engine.
pub fn run_query(conn: &mut Connection, request: &QueryRequest) -> QueryResult<Vec<Item>> {
    let set = request.record_set();

    if !request.has_filters() {
        let repo = SqliteItemRepository::try_new(conn)?;
        return Ok(repo.list_all(set)?);
    }

    let tag_filter = TagFilter::parse(&request.tag_tokens);
    let candidate_ids = if tag_filter.is_empty() {
        None
    } else {
        let tag_repo = SqliteTagIndexRepository::try_new(&*conn)?;
        Some(tag_candidate_ids(&tag_repo, &tag_filter)?)
    };

    let repo = SqliteItemRepository::try_new(conn)?;

    let subject_dimension = match request.subject_prefix.as_deref() {
        Some(prefix) if !prefix.is_empty() => Some(repo.subject_prefix_scan(set, prefix)?),
        _ => None,
    };

    let tag_dimension = match candidate_ids {
        Some(ids) => {
            let mut hydrated = Vec::new();
            for id in ids {
                if let Some(item) = repo.get_by_id(set, id)? {
                    hydrated.push(item);
                }
            }
            if request.exact {
                hydrated.retain(|item| tag_filter.matches(item));
            }
            Some(hydrated)
        }
        None => None,
    };

    let text_dimension = if request.terms.is_empty() {
        None
    } else {
        let pattern = build_term_pattern(&request.terms, request.exact);
        let matcher =
            regex::Regex::new(&pattern).map_err(|err| QueryError::InvalidPattern {
                pattern: pattern.clone(),
                message: err.to_string(),
            })?;
        let mut matched = Vec::new();
        for item in repo.list_all(set)? {
            // Content-agnostic fallback: match against the serialized whole
            // item, not individual fields.
            let serialized = serde_json::to_string(&item).unwrap_or_default();
            if matcher.is_match(&serialized) {
                matched.push(item);
            }
        }
        Some(matched)
    };

    let dimensions: Vec<Vec<Item>> = [subject_dimension, tag_dimension, text_dimension]
        .into_iter()
        .flatten()
        .collect();

    if request.exact {
        Ok(positional_intersection(dimensions))
    } else {
        Ok(union_by_id(dimensions))
    }
}

fn tag_candidate_ids(
    repo: &dyn TagIndexRepository,
    filter: &TagFilter,
) -> QueryResult<Vec<ItemId>> {
    let mut base: BTreeSet<ItemId> = BTreeSet::new();
    let sources = if filter.include.is_empty() {
        &filter.neutral
    } else {
        &filter.include
    };
    for name in sources {
        if let Some(entry) = repo.get_entry(name)? {
            base.extend(entry.item_ids);
        }
    }

    for name in &filter.exclude {
        if let Some(entry) = repo.get_entry(name)? {
            for id in entry.item_ids {
                base.remove(&id);
            }
        }
    }

    Ok(base.into_iter().collect())
}

/// Builds the case-insensitive search pattern: word-boundary anchored when
/// multiple terms are requested in exact mode, unanchored substring match
/// otherwise.
fn build_term_pattern(terms: &[String], exact: bool) -> String {
    let escaped: Vec<String> = terms.iter().map(|term| regex::escape(term)).collect();
    let alternatives = escaped.join("|");
    if exact && terms.len() > 1 {
        format!(r"(?i)\b(?:{alternatives})\b")
    } else {
        format!(r"(?i){alternatives}")
    }
}

fn union_by_id(dimensions: Vec<Vec<Item>>) -> Vec<Item> {
    let mut merged: std::collections::BTreeMap<ItemId, Item> = std::collections::BTreeMap::new();
    for dimension in dimensions {
        for item in dimension {
            merged.entry(item.id).or_insert(item);
        }
    }
    merged.into_values().collect()
}

/// Positional intersection of id-sorted dimension lists: an item appears in
/// the result only when every dimension carries the same id at the same
/// position. Not a set intersection when list lengths or orderings differ;
/// kept as specified.
fn positional_intersection(mut dimensions: Vec<Vec<Item>>) -> Vec<Item> {
    if dimensions.is_empty() {
        return Vec::new();
    }
    for dimension in &mut dimensions {
        dimension.sort_by_key(|item| item.id);
    }
    if dimensions.len() == 1 {
        return dimensions.pop().unwrap_or_default();
    }

    let shortest = dimensions
        .iter()
        .map(Vec::len)
        .min()
        .unwrap_or(0);
    let mut result = Vec::new();
    for position in 0..shortest {
        let id = dimensions[0][position].id;
        if dimensions[1..]
            .iter()
            .all(|dimension| dimension[position].id == id)
        {
            result.push(dimensions[0][position].clone());
        }
    }
    result
}
