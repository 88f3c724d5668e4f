//! Comparator-chain sort engine.
//!
//! # Responsibility
//! - Apply the default three-tier ordering when no tokens are supplied.
//! - Parse ordering tokens (`asc`/`desc` direction, `lat`/`old` macros,
//!   arbitrary field names) and apply one independent stable sort per token.
//!
//! # Invariants
//! - Field comparators are selected from the runtime type of the field's
//!   value, not a static schema.
//! - Tokens apply as successive stable sorts in listed order: the last
//!   token dominates final ordering for ties not broken earlier.

use crate::model::item::Item;
use chrono::DateTime;
use std::cmp::Ordering;

/// One sort request: ordering tokens plus an optional result cap.
#[derive(Debug, Clone, Default)]
pub struct SortSpec {
    pub tokens: Vec<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SortOp {
    /// Sort by `updation_timestamp`, most recent first.
    Latest,
    /// Sort by `updation_timestamp`, oldest first.
    Oldest,
    Field { name: String, direction: Direction },
}

/// Parses the token list into sort operations.
///
/// Direction tokens are stateful: they set the direction for subsequent
/// field tokens until changed. Unknown tokens are field names by definition.
fn parse_tokens(tokens: &[String]) -> Vec<SortOp> {
    let mut ops = Vec::new();
    let mut direction = Direction::Asc;
    for token in tokens {
        match token.trim().to_ascii_lowercase().as_str() {
            "" => {}
            "asc" => direction = Direction::Asc,
            "desc" => direction = Direction::Desc,
            "lat" => ops.push(SortOp::Latest),
            "old" => ops.push(SortOp::Oldest),
            name => ops.push(SortOp::Field {
                name: name.to_string(),
                direction,
            }),
        }
    }
    ops
}

/// Sorts a snapshot and returns the (possibly truncated) ordered
/// collection.
pub fn sort_items(items: Vec<Item>, spec: &SortSpec) -> Vec<Item> {
    let ops = parse_tokens(&spec.tokens);

    let mut keyed: Vec<(serde_json::Value, Item)> = items
        .into_iter()
        .map(|item| {
            let value = serde_json::to_value(&item).unwrap_or(serde_json::Value::Null);
            (value, item)
        })
        .collect();

    if ops.is_empty() {
        keyed.sort_by(|a, b| default_chain(&a.1, &b.1));
    } else {
        for op in &ops {
            apply_op(&mut keyed, op);
        }
    }

    let mut sorted: Vec<Item> = keyed.into_iter().map(|(_, item)| item).collect();
    if let Some(limit) = spec.limit {
        sorted.truncate(limit);
    }
    sorted
}

/// Default three-tier chain: incomplete before completed, reminder-flagged
/// before unflagged, then most recently touched first.
pub fn default_chain(a: &Item, b: &Item) -> Ordering {
    a.completion_status
        .cmp(&b.completion_status)
        .then_with(|| b.set_for_reminder.cmp(&a.set_for_reminder))
        .then_with(|| b.updation_timestamp.cmp(&a.updation_timestamp))
}

fn apply_op(keyed: &mut [(serde_json::Value, Item)], op: &SortOp) {
    match op {
        SortOp::Latest => {
            keyed.sort_by(|a, b| b.1.updation_timestamp.cmp(&a.1.updation_timestamp));
        }
        SortOp::Oldest => {
            keyed.sort_by(|a, b| a.1.updation_timestamp.cmp(&b.1.updation_timestamp));
        }
        SortOp::Field { name, direction } => {
            let kind = classify_field(keyed, name);
            match kind {
                FieldKind::Fallback => keyed.sort_by(|a, b| default_chain(&a.1, &b.1)),
                _ => keyed.sort_by(|a, b| {
                    let ordering = compare_values(
                        kind,
                        field_value(&a.0, name),
                        field_value(&b.0, name),
                    );
                    match direction {
                        Direction::Asc => ordering,
                        Direction::Desc => ordering.reverse(),
                    }
                }),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Numeric,
    IsoDate,
    NumericString,
    Boolean,
    Text,
    /// Object-valued or absent everywhere: fall back to the default chain.
    Fallback,
}

fn field_value<'v>(value: &'v serde_json::Value, name: &str) -> Option<&'v serde_json::Value> {
    match value.get(name) {
        Some(serde_json::Value::Null) | None => None,
        Some(found) => Some(found),
    }
}

/// Selects the comparator from the runtime type of the first present value.
fn classify_field(keyed: &[(serde_json::Value, Item)], name: &str) -> FieldKind {
    for (value, _) in keyed {
        let Some(sample) = field_value(value, name) else {
            continue;
        };
        return match sample {
            serde_json::Value::Number(_) => FieldKind::Numeric,
            serde_json::Value::Bool(_) => FieldKind::Boolean,
            serde_json::Value::String(text) => {
                if DateTime::parse_from_rfc3339(text).is_ok() {
                    FieldKind::IsoDate
                } else if text.trim().parse::<f64>().is_ok() {
                    FieldKind::NumericString
                } else {
                    FieldKind::Text
                }
            }
            _ => FieldKind::Fallback,
        };
    }
    FieldKind::Fallback
}

/// Compares two optional field values; absent values order last regardless
/// of direction reversal happening above this level.
fn compare_values(
    kind: FieldKind,
    a: Option<&serde_json::Value>,
    b: Option<&serde_json::Value>,
) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => match kind {
            FieldKind::Numeric => compare_f64(a.as_f64(), b.as_f64()),
            FieldKind::Boolean => a.as_bool().cmp(&b.as_bool()),
            FieldKind::IsoDate => {
                let a = a.as_str().and_then(|s| DateTime::parse_from_rfc3339(s).ok());
                let b = b.as_str().and_then(|s| DateTime::parse_from_rfc3339(s).ok());
                match (a, b) {
                    (Some(a), Some(b)) => a.cmp(&b),
                    (None, None) => Ordering::Equal,
                    (None, Some(_)) => Ordering::Greater,
                    (Some(_), None) => Ordering::Less,
                }
            }
            FieldKind::NumericString => compare_f64(
                a.as_str().and_then(|s| s.trim().parse().ok()),
                b.as_str().and_then(|s| s.trim().parse().ok()),
            ),
            FieldKind::Text => {
                let a = a.as_str().unwrap_or_default().to_lowercase();
                let b = b.as_str().unwrap_or_default().to_lowercase();
                a.cmp(&b)
            }
            FieldKind::Fallback => Ordering::Equal,
        },
    }
}

fn compare_f64(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
    }
}
