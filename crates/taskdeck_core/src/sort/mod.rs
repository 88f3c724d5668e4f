//! Ordering layer over in-memory item collections.
//!
//! # Responsibility
//! - Provide the default three-tier ordering and token-driven multi-key
//!   sorts consumed by list surfaces.
//!
//! # Invariants
//! - Sorting never touches the store; it operates on snapshots only.

pub mod compare;
