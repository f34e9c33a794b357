//! HTTP backend over the PostgREST API.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use toologist_shared::ApiError;

use super::{Backend, Query};
use crate::auth::SessionHandle;
use crate::config::ClientConfig;

/// Table client for `{url}/rest/v1`.
///
/// Requests carry the public key as `apikey` and the signed-in user's access
/// token (or the public key when signed out) as the bearer token, so row
/// level security sees the right role.
#[derive(Clone)]
pub struct RestBackend {
    client: Client,
    base_url: String,
    anon_key: String,
    session: SessionHandle,
}

impl RestBackend {
    pub fn new(config: &ClientConfig, session: SessionHandle) -> Self {
        Self::with_base_url(config.rest_url(), config.anon_key.clone(), session)
    }

    /// Point at an arbitrary PostgREST base URL.
    pub fn with_base_url(
        base_url: impl Into<String>,
        anon_key: impl Into<String>,
        session: SessionHandle,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            session,
        }
    }

    fn url(&self, table: &str) -> String {
        format!("{}/{}", self.base_url, table.trim_start_matches('/'))
    }

    fn authorize(&self, rb: RequestBuilder) -> RequestBuilder {
        let token = self
            .session
            .access_token()
            .unwrap_or_else(|| self.anon_key.clone());
        rb.header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {token}"))
    }

    async fn send(&self, rb: RequestBuilder) -> Result<String, ApiError> {
        let resp = self
            .authorize(rb)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(ApiError::from_response(status, text));
        }
        Ok(text)
    }

    fn rows(text: &str) -> Result<Vec<Value>, ApiError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(text).map_err(|e| ApiError::Deserialize(e.to_string()))
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn select(&self, query: &Query) -> Result<Vec<Value>, ApiError> {
        crate::log_debug!("GET {} {:?}", query.table, query.to_pairs());
        let rb = self.client.get(self.url(&query.table)).query(&query.to_pairs());
        let text = self.send(rb).await?;
        Self::rows(&text)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Vec<Value>, ApiError> {
        crate::log_debug!("POST {}", table);
        let rb = self
            .client
            .post(self.url(table))
            .header("Prefer", "return=representation")
            .json(&row);
        let text = self.send(rb).await?;
        Self::rows(&text)
    }

    async fn update(&self, query: &Query, patch: Value) -> Result<Vec<Value>, ApiError> {
        crate::log_debug!("PATCH {} {:?}", query.table, query.filter_pairs());
        let rb = self
            .client
            .patch(self.url(&query.table))
            .query(&query.filter_pairs())
            .header("Prefer", "return=representation")
            .json(&patch);
        let text = self.send(rb).await?;
        Self::rows(&text)
    }

    async fn delete(&self, query: &Query) -> Result<Vec<Value>, ApiError> {
        crate::log_debug!("DELETE {} {:?}", query.table, query.filter_pairs());
        let rb = self
            .client
            .delete(self.url(&query.table))
            .query(&query.filter_pairs())
            .header("Prefer", "return=representation");
        let text = self.send(rb).await?;
        Self::rows(&text)
    }
}
