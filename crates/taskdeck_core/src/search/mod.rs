//! Query engine entry points.
//!
//! # Responsibility
//! - Combine the three filter dimensions (subject prefix, tag algebra,
//!   free text) over local store snapshots.
//! - Keep result shaping read-only; callers order results via the sort
//!   engine.

pub mod query;
