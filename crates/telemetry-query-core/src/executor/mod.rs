//! Query executor
//!
//! Each operation validates its request, makes one backend call, and
//! decodes the response. There is no retry, no pagination loop, and no
//! state carried between calls: a keys or values lookup made before a
//! query is just another independent call.
//!
//! Absence of data is not an error. `run_query` and `list_values` return
//! `None` when the backend has no result; `list_keys` returns an empty list.

mod backend;
mod normalize;

pub use backend::{Endpoint, HttpBackend, TelemetryBackend};
pub use normalize::conform_to_view;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::config::ApiConfig;
use crate::context::AccountContext;
use crate::error::Result;
use crate::models::{KeyEntry, KeysRequest, QueryRunRequest, QueryRunResult, ValueEntry, ValuesRequest};
use crate::validation::Validate;

/// Runs the three telemetry operations against a backend
pub struct QueryExecutor<B = HttpBackend> {
    backend: B,
}

impl QueryExecutor<HttpBackend> {
    /// Executor talking HTTP to the configured API
    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        Ok(Self::new(HttpBackend::new(config)?))
    }
}

impl<B: TelemetryBackend> QueryExecutor<B> {
    /// Create an executor over any backend
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Get the underlying backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run a query, returning `None` when the backend has no result
    pub async fn run_query(
        &self,
        account: &AccountContext,
        request: &QueryRunRequest,
    ) -> Result<Option<QueryRunResult>> {
        debug!(
            query_id = %request.query_id,
            view = %request.view,
            limit = request.limit,
            dry = request.dry,
            "Running telemetry query"
        );

        let result: Option<QueryRunResult> = self.execute(account, Endpoint::Query, request).await?;

        result
            .map(|r| conform_to_view(r, request.view))
            .transpose()
    }

    /// List keys; an absent result is an empty list
    pub async fn list_keys(
        &self,
        account: &AccountContext,
        request: &KeysRequest,
    ) -> Result<Vec<KeyEntry>> {
        debug!(limit = ?request.limit, filters = request.filters.len(), "Listing telemetry keys");

        let keys = self
            .execute(account, Endpoint::Keys, request)
            .await?
            .unwrap_or_default();
        Ok(keys)
    }

    /// List values of a key, returning `None` when the backend has no result
    pub async fn list_values(
        &self,
        account: &AccountContext,
        request: &ValuesRequest,
    ) -> Result<Option<Vec<ValueEntry>>> {
        debug!(key = %request.key, limit = request.limit, "Listing telemetry values");

        self.execute(account, Endpoint::Values, request).await
    }

    async fn execute<R, T>(
        &self,
        account: &AccountContext,
        endpoint: Endpoint,
        request: &R,
    ) -> Result<Option<T>>
    where
        R: Validate + Serialize + Sync,
        T: DeserializeOwned,
    {
        account.ensure_active()?;
        request.validate()?;

        let body = serde_json::to_value(request)?;
        let payload = self.backend.post(account, endpoint, &body).await?;

        let decoded = normalize::decode_envelope(payload, endpoint, &body)?;
        debug!(%endpoint, has_result = decoded.is_some(), "Telemetry response decoded");
        Ok(decoded)
    }
}
