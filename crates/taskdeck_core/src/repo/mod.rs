//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define record-set oriented data access contracts for the four logical
//!   sets (live items, tombstones, tag inverted index, custom blobs).
//! - Isolate SQLite query details from service/sync orchestration.
//!
//! # Invariants
//! - Mutations are transactional at the granularity of one record plus its
//!   directly dependent index rows; there is no cross-record guarantee.
//! - Repository APIs return semantic errors (`NotFound`, `DuplicateSubject`)
//!   in addition to DB transport errors.
//!
//! # See also
//! - docs/architecture/data-model.md

pub mod custom_repo;
pub mod item_repo;
pub mod tag_index_repo;
