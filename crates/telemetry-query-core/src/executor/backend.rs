//! Transport to the telemetry backend

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::config::ApiConfig;
use crate::context::AccountContext;
use crate::error::{Error, Result};

/// The three telemetry endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Run a query
    Query,
    /// List keys
    Keys,
    /// List values of a key
    Values,
}

impl Endpoint {
    /// Last path segment of the endpoint
    pub fn name(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Keys => "keys",
            Self::Values => "values",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Sends one JSON request and returns the raw JSON response body
///
/// Implementations make exactly one attempt. A non-success status or a
/// network failure is a [`Error::Transmission`]; a body that is not JSON is
/// a [`Error::MalformedResponse`].
#[async_trait]
pub trait TelemetryBackend: Send + Sync {
    /// POST `body` to `endpoint` on behalf of `account`
    async fn post(&self, account: &AccountContext, endpoint: Endpoint, body: &Value)
        -> Result<Value>;
}

/// HTTP implementation of [`TelemetryBackend`]
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
}

impl HttpBackend {
    /// Create a backend from API configuration
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| Error::config(format!("invalid base URL `{}`: {e}", config.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::config(format!(
                "base URL `{}` cannot carry a path",
                config.base_url
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    /// Full URL of `endpoint` for `account`
    pub fn endpoint_url(&self, account: &AccountContext, endpoint: Endpoint) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::config("base URL cannot carry a path"))?
            .pop_if_empty()
            .extend([
                "accounts",
                account.account_id.as_str(),
                "workers",
                "observability",
                "telemetry",
                endpoint.name(),
            ]);
        Ok(url)
    }
}

#[async_trait]
impl TelemetryBackend for HttpBackend {
    async fn post(
        &self,
        account: &AccountContext,
        endpoint: Endpoint,
        body: &Value,
    ) -> Result<Value> {
        let url = self.endpoint_url(account, endpoint)?;
        debug!(%endpoint, %url, "Sending telemetry request");

        let response = self
            .client
            .post(url)
            .bearer_auth(&account.api_token)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(e, body))?;

        let status = response.status();
        if !status.is_success() {
            let text = match response.text().await {
                Ok(text) => text,
                Err(e) => {
                    debug!(%endpoint, error = %e, "Failed to read error response body");
                    format!("<body unavailable: {e}>")
                }
            };
            warn!(%endpoint, status = status.as_u16(), "Telemetry backend returned an error");
            return Err(Error::transmission(
                format!("{endpoint} returned {status}: {text}"),
                Some(status.as_u16()),
                body,
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(e, body))?;

        serde_json::from_slice(&bytes)
            .map_err(|e| Error::malformed(format!("{endpoint} response is not JSON: {e}")))
    }
}

fn transport_error(err: reqwest::Error, body: &Value) -> Error {
    Error::Transmission {
        message: err.to_string(),
        status: err.status().map(|s| s.as_u16()),
        query: Box::new(body.clone()),
        source: Some(err),
    }
}
