//! Domain model for the offline-first task engine.
//!
//! # Responsibility
//! - Define the canonical records shared by store, query, sort and sync.
//! - Keep one item-centric shape for live and tombstoned sets.
//!
//! # Invariants
//! - Every item is identified by an immutable `uuid`; the local `id` never
//!   leaves the replica.
//! - Deletion is represented by tombstones in a separate set, not hard delete.
//!
//! # See also
//! - docs/architecture/data-model.md

pub mod item;
