//! Remote authority seam and HTTP implementation.
//!
//! # Responsibility
//! - Define the transport contract the sync engine depends on.
//! - Implement it over the diff/push HTTP endpoints.
//!
//! # Invariants
//! - Bodies cross this boundary as pre-serialized byte buffers with
//!   transfer of ownership; the transport never re-serializes payloads.
//! - Transport failures surface as `SyncError::Connectivity` so the caller
//!   can degrade to offline.

use crate::session::SessionContext;
use crate::sync::{SyncError, SyncResult};
use bytes::Bytes;
use std::future::Future;

/// Transport contract for the diff protocol. The engine is generic over
/// this seam; tests substitute an in-memory double.
pub trait RemoteAuthority {
    /// `POST /item/getdiff`. Returns the raw response body; the caller
    /// deserializes it exactly once.
    fn fetch_diff(&self, body: Bytes) -> impl Future<Output = SyncResult<Bytes>> + Send;

    /// `PATCH /item/update` bulk push of full items.
    fn push_items(&self, body: Bytes) -> impl Future<Output = SyncResult<()>> + Send;
}

/// reqwest-backed remote authority client.
pub struct HttpRemoteAuthority {
    client: reqwest::Client,
    base_url: String,
    session_token: Option<String>,
}

impl HttpRemoteAuthority {
    /// Builds a client from session data. Returns `None` for offline
    /// sessions (absent or blank remote URL).
    pub fn from_session(session: &SessionContext) -> Option<Self> {
        let endpoint = session.endpoint()?;
        Some(Self {
            client: reqwest::Client::new(),
            base_url: endpoint.trim_end_matches('/').to_string(),
            session_token: session.session_token.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str, body: Bytes) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(token) = self.session_token.as_deref() {
            builder = builder.bearer_auth(token);
        }
        builder
    }
}

impl RemoteAuthority for HttpRemoteAuthority {
    async fn fetch_diff(&self, body: Bytes) -> SyncResult<Bytes> {
        let response = self
            .request(reqwest::Method::POST, "/item/getdiff", body)
            .send()
            .await
            .map_err(|err| SyncError::Connectivity(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Connectivity(format!(
                "diff endpoint returned {status}"
            )));
        }

        response
            .bytes()
            .await
            .map_err(|err| SyncError::Connectivity(err.to_string()))
    }

    async fn push_items(&self, body: Bytes) -> SyncResult<()> {
        let response = self
            .request(reqwest::Method::PATCH, "/item/update", body)
            .send()
            .await
            .map_err(|err| SyncError::Connectivity(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Connectivity(format!(
                "update endpoint returned {status}"
            )));
        }

        Ok(())
    }
}
