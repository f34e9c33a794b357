//! Backend seam for table reads and writes.
//!
//! Stores depend on [`Backend`], not on HTTP. [`RestBackend`] talks to the
//! PostgREST endpoint; tests use an in-memory implementation.

mod query;
mod rest;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use toologist_shared::ApiError;

pub use query::{Filter, Order, Query};
pub use rest::RestBackend;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Rows matching `query`, in the order the backend returns them.
    async fn select(&self, query: &Query) -> Result<Vec<Value>, ApiError>;

    /// Insert one row and return the stored representation.
    async fn insert(&self, table: &str, row: Value) -> Result<Vec<Value>, ApiError>;

    /// Patch every row matching the query's filters.
    async fn update(&self, query: &Query, patch: Value) -> Result<Vec<Value>, ApiError>;

    /// Delete every row matching the query's filters and return the removed
    /// rows. Rows hidden by row-level security are not deleted or returned.
    async fn delete(&self, query: &Query) -> Result<Vec<Value>, ApiError>;
}

pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, ApiError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(|e| ApiError::Deserialize(e.to_string())))
        .collect()
}

pub fn encode_row<T: Serialize>(row: &T) -> Result<Value, ApiError> {
    serde_json::to_value(row).map_err(|e| ApiError::Deserialize(e.to_string()))
}
