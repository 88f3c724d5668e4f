//! Explicit session context and sync tuning knobs.
//!
//! # Responsibility
//! - Carry the resolved remote endpoint and session token through engine
//!   constructors.
//!
//! # Invariants
//! - There is no module-level "current session" state; every component that
//!   needs session data receives this context explicitly.
//! - An absent or blank remote URL means fully offline: sync cycles and the
//!   collaboration channel stay inert.

use std::time::Duration;

/// Session-scoped identity and endpoint data, resolved once at session
/// start and threaded through constructors.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    /// Remote authority base URL, e.g. `https://host:port`. `None` or blank
    /// keeps the engine offline.
    pub remote_url: Option<String>,
    /// Opaque token appended to the collaboration channel URL and sent as a
    /// bearer credential on diff/push calls.
    pub session_token: Option<String>,
}

impl SessionContext {
    /// Returns the trimmed remote URL when the session is online-capable.
    pub fn endpoint(&self) -> Option<&str> {
        match self.remote_url.as_deref().map(str::trim) {
            Some("") | None => None,
            Some(url) => Some(url),
        }
    }

    pub fn is_offline(&self) -> bool {
        self.endpoint().is_none()
    }
}

/// Sync engine tuning. Defaults match the periodic/partial behavior the
/// engine ships with.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval between periodic partial resync cycles.
    pub poll_interval: Duration,
    /// Per-set bound on state collection during a partial cycle.
    pub partial_state_limit: u32,
    /// Base delay for collaboration-channel reconnects; doubles per attempt.
    pub reconnect_base_delay: Duration,
    /// Reconnect attempt cap before the channel gives up.
    pub max_reconnect_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            partial_state_limit: 50,
            reconnect_base_delay: Duration::from_secs(2),
            max_reconnect_attempts: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SessionContext;

    #[test]
    fn blank_remote_url_means_offline() {
        let session = SessionContext {
            remote_url: Some("   ".to_string()),
            session_token: None,
        };
        assert!(session.is_offline());
        assert_eq!(session.endpoint(), None);
    }

    #[test]
    fn endpoint_trims_configured_url() {
        let session = SessionContext {
            remote_url: Some(" https://example.test ".to_string()),
            session_token: None,
        };
        assert_eq!(session.endpoint(), Some("https://example.test"));
    }
}
