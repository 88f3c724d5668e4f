//! Use-case services over the repository layer.
//!
//! # Responsibility
//! - Orchestrate repository calls into engine-level operations.
//! - Keep callers decoupled from storage details.

pub mod item_service;
pub mod sync_service;
