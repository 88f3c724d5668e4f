//! Offline-first synchronization against the remote authority.
//!
//! # Responsibility
//! - Run the diff/merge cycle state machine and its triggers (startup,
//!   periodic tick, collaboration refresh, explicit force).
//! - Keep the collaboration channel alive and route its signals.
//!
//! # Invariants
//! - The engine runs in its own execution context with its own store
//!   handle; it communicates with other contexts via typed messages only.
//! - Cycle failures are atomic: a failed diff fetch or malformed response
//!   applies nothing.
//!
//! # See also
//! - docs/architecture/sync-protocol.md

use crate::db::DbError;
use crate::repo::item_repo::RepoError;
use crate::service::item_service::ItemServiceError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod collab;
pub mod engine;
pub mod protocol;
pub mod remote;
pub mod runtime;

pub type SyncResult<T> = Result<T, SyncError>;

/// Sync-layer error taxonomy.
///
/// A discarded conflict is deliberately absent here: losing the
/// last-writer-wins comparison is a counted no-op outcome, not an error.
#[derive(Debug)]
pub enum SyncError {
    /// Remote unreachable or returned a non-success status. The session
    /// degrades to offline; the next natural trigger is the retry.
    Connectivity(String),
    /// Remote response failed validation; the merge cycle aborts whole.
    MalformedResponse(String),
    /// Local payload could not be serialized for the wire.
    Encode(String),
    Service(ItemServiceError),
    Repo(RepoError),
    Db(DbError),
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connectivity(message) => write!(f, "remote unreachable: {message}"),
            Self::MalformedResponse(message) => {
                write!(f, "malformed remote response: {message}")
            }
            Self::Encode(message) => write!(f, "payload encoding failed: {message}"),
            Self::Service(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Connectivity(_) | Self::MalformedResponse(_) | Self::Encode(_) => None,
            Self::Service(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::Db(err) => Some(err),
        }
    }
}

impl From<ItemServiceError> for SyncError {
    fn from(value: ItemServiceError) -> Self {
        Self::Service(value)
    }
}

impl From<RepoError> for SyncError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<DbError> for SyncError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

/// Commands accepted by the engine's execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    /// Bounded partial resync (periodic tick, collaboration refresh).
    Partial,
    /// Unbounded full resync (explicit force trigger).
    Full,
    Shutdown,
}
