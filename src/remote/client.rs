//! Control-plane client
//!
//! Combines the endpoint, credentials and HTTP plumbing. Cloning is cheap and
//! clones share the connection pool, so one client serves every resource
//! reconciled in a run.

use super::http::{ControlPlaneHttp, RemoteError};
use crate::engine::ResourceId;
use serde_json::Value;
use std::sync::Arc;
use url::Url;

/// Header the control plane uses to deduplicate retried create requests
pub const RETRY_TOKEN_HEADER: &str = "opc-retry-token";

/// Main control-plane client
#[derive(Clone)]
pub struct ControlPlaneClient {
    http: ControlPlaneHttp,
    endpoint: Url,
    token: Option<Arc<str>>,
}

impl ControlPlaneClient {
    /// Create a client for the given endpoint, e.g. `https://database.us-ashburn-1.example.com`
    pub fn new(endpoint: &str, token: Option<String>) -> Result<Self, RemoteError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| RemoteError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        if endpoint.cannot_be_a_base() {
            return Err(RemoteError::InvalidEndpoint(endpoint.to_string()));
        }

        Ok(Self {
            http: ControlPlaneHttp::new()?,
            endpoint,
            token: token.map(Arc::from),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Make a GET request
    pub async fn get(&self, url: &str) -> Result<Value, RemoteError> {
        self.http.get(url, self.token()).await
    }

    /// Make a POST request carrying a fresh retry token
    pub async fn post(
        &self,
        url: &str,
        body: &Value,
        retry_token: &str,
    ) -> Result<Value, RemoteError> {
        let headers = [(RETRY_TOKEN_HEADER, retry_token.to_string())];
        self.http.post(url, self.token(), &headers, Some(body)).await
    }

    /// Make a PUT request
    pub async fn put(&self, url: &str, body: &Value) -> Result<Value, RemoteError> {
        self.http.put(url, self.token(), body).await
    }

    /// Make a DELETE request
    pub async fn delete(&self, url: &str) -> Result<Value, RemoteError> {
        self.http.delete(url, self.token()).await
    }

    // =========================================================================
    // URL helpers
    // =========================================================================

    /// Build a collection URL, e.g. `{endpoint}/20160918/autonomousDataWarehouses`
    pub fn collection_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.endpoint.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Build the URL of one resource in a collection
    pub fn resource_url(&self, path: &str, id: &ResourceId) -> String {
        format!("{}/{}", self.collection_url(path), urlencoding::encode(id.as_str()))
    }
}
