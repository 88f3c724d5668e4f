//! Diff protocol and collaboration envelope wire types.
//!
//! # Responsibility
//! - Define the request/response shapes exchanged with the remote authority
//!   and the typed envelopes carried by the collaboration channel.
//!
//! # Invariants
//! - Wire field names are camelCase; the local `id` never appears on the
//!   wire.
//! - Envelope payloads are tagged variants validated at the channel
//!   boundary; unknown types fail decoding and are dropped by the caller.
//!
//! # See also
//! - docs/architecture/sync-protocol.md

use crate::model::item::{Item, ItemState};
use serde::{Deserialize, Serialize};

/// Body of `POST /item/getdiff`: a compact summary of local state.
///
/// `merge_items` is drawn from the live set and `delete_items` from the
/// tombstone set, each truncated to the partial bound when `partial` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffRequest {
    pub partial: bool,
    pub merge_items: Vec<ItemState>,
    pub delete_items: Vec<ItemState>,
}

/// Classified deltas computed by the remote authority.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResponse {
    /// Full items missing locally.
    #[serde(default)]
    pub items_for_add: Vec<Item>,
    /// Full items whose remote copy is ahead.
    #[serde(default)]
    pub items_for_update: Vec<Item>,
    /// Tombstone states the client does not have locally.
    #[serde(default)]
    pub items_for_delete: Vec<ItemState>,
    /// States the remote believes might be behind the client; the client
    /// pushes its full copies back up.
    #[serde(default)]
    pub items_for_sync: Vec<ItemState>,
}

/// Body of the `PATCH /item/update` bulk push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub item_list: Vec<Item>,
}

/// Typed collaboration-channel envelope. `REFRESH_MERGE` is the only type
/// the sync engine consumes; outbound sends of the same type notify peers
/// after a successful local mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Envelope {
    RefreshMerge {
        /// Replica identity of the sender, so receivers can tell their own
        /// broadcasts apart.
        #[serde(default)]
        origin: Option<String>,
    },
}

/// Encodes one envelope into the binary frame payload.
pub fn encode_envelope(envelope: &Envelope) -> Vec<u8> {
    serde_json::to_vec(envelope).unwrap_or_default()
}

/// Decodes a binary frame payload. Unknown envelope types and malformed
/// frames return `None`; the channel logs and drops them.
pub fn decode_envelope(frame: &[u8]) -> Option<Envelope> {
    serde_json::from_slice(frame).ok()
}
