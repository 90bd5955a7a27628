//! Tool host boundary
//!
//! Exposes the three operations by name to an agent. Every call returns a
//! string payload: the serialized result on success, `{"error": ...}` on
//! failure. Errors never escape as `Err`.

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::context::AccountContext;
use crate::error::{Error, Result};
use crate::executor::{QueryExecutor, TelemetryBackend};
use crate::validation::{normalize_keys_request, normalize_run_request, normalize_values_request};

/// Returned verbatim when no account is active
pub const NO_ACTIVE_ACCOUNT: &str = "No currently active accountId. Try listing your accounts (accounts_list) and then setting an active account (set_active_account)";

/// Runs a query
pub const QUERY_TOOL: &str = "query_worker_observability";
/// Lists keys
pub const KEYS_TOOL: &str = "observability_keys";
/// Lists values of one key
pub const VALUES_TOOL: &str = "observability_values";

const QUERY_DESCRIPTION: &str = "\
Query the Workers Observability API to analyze recent logs from your Workers.

Three capabilities, selected with the `view` field:
* events - list events, e.g. show me errors for the worker api-proxy.
* calculations - aggregate, e.g. the p99 wall time of api-proxy invocations.
* invocations - find a request, e.g. a request with an error for user thomas.

Every calculation except `count` needs a key; `avg` needs a number field.
Only the operators in the schema are available.

Unless you are certain a filter is right, confirm the key with
observability_keys and the value with observability_values first.

Show invocations in a table, chart calculations, and list events in a table,
showing the JSON of a single event when the user asks for more detail.";

const KEYS_DESCRIPTION: &str = "\
Find keys in the Workers Observability data. Use this to make sure the filters
or calculations you add to a query are valid. Listing many keys is fast: set a
high limit and only filter on $metadata.service to narrow by worker name.";

const VALUES_DESCRIPTION: &str = "\
Find values in the Workers Observability data. Use this to make sure the
filters you add to a query are valid.";

/// Name, argument, and help text of one tool
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    /// Tool name
    pub name: &'static str,
    /// Name of the single structured argument
    pub argument: &'static str,
    /// Help text shown to the agent
    pub description: &'static str,
}

/// The tools [`ObservabilityTools`] answers to
pub fn definitions() -> [ToolDefinition; 3] {
    [
        ToolDefinition {
            name: QUERY_TOOL,
            argument: "query",
            description: QUERY_DESCRIPTION,
        },
        ToolDefinition {
            name: KEYS_TOOL,
            argument: "keysQuery",
            description: KEYS_DESCRIPTION,
        },
        ToolDefinition {
            name: VALUES_TOOL,
            argument: "valuesQuery",
            description: VALUES_DESCRIPTION,
        },
    ]
}

/// Dispatches tool calls to a [`QueryExecutor`]
pub struct ObservabilityTools<B> {
    executor: QueryExecutor<B>,
}

impl<B: TelemetryBackend> ObservabilityTools<B> {
    /// Wrap an executor
    pub fn new(executor: QueryExecutor<B>) -> Self {
        Self { executor }
    }

    /// Invoke `name` with its argument object
    ///
    /// `arguments` is the tool's argument map, e.g. `{"query": {...}}`.
    /// Without an active account, the fixed advisory text is returned before
    /// anything is validated or sent.
    pub async fn call(
        &self,
        name: &str,
        arguments: &Value,
        account: Option<&AccountContext>,
    ) -> String {
        let Some(definition) = definitions().into_iter().find(|d| d.name == name) else {
            warn!(tool = name, "Unknown tool");
            return error_payload(&format!("Unknown tool: {name}"));
        };

        let Some(account) = account.filter(|a| a.ensure_active().is_ok()) else {
            info!(tool = name, "Tool called without an active account");
            return NO_ACTIVE_ACCOUNT.to_string();
        };

        let argument = arguments.get(definition.argument).unwrap_or(&Value::Null);
        let outcome = match name {
            QUERY_TOOL => self.query(account, argument).await,
            KEYS_TOOL => self.keys(account, argument).await,
            _ => self.values(account, argument).await,
        };

        match outcome {
            Ok(payload) => payload,
            Err(e) => {
                warn!(tool = name, kind = e.kind(), error = %e, "Tool call failed");
                tool_error(name, &e)
            }
        }
    }

    async fn query(&self, account: &AccountContext, argument: &Value) -> Result<String> {
        let request = normalize_run_request(argument)?;
        let result = self.executor.run_query(account, &request).await?;
        Ok(serde_json::to_string(&result)?)
    }

    async fn keys(&self, account: &AccountContext, argument: &Value) -> Result<String> {
        let request = normalize_keys_request(argument)?;
        let keys = self.executor.list_keys(account, &request).await?;
        Ok(serde_json::to_string(&keys)?)
    }

    async fn values(&self, account: &AccountContext, argument: &Value) -> Result<String> {
        let request = normalize_values_request(argument)?;
        let values = self.executor.list_values(account, &request).await?;
        Ok(serde_json::to_string(&values)?)
    }
}

fn error_prefix(tool: &str) -> &'static str {
    match tool {
        QUERY_TOOL => "Error analyzing worker logs",
        KEYS_TOOL => "Error retrieving worker telemetry keys",
        _ => "Error retrieving worker telemetry values",
    }
}

fn error_payload(message: &str) -> String {
    json!({ "error": message }).to_string()
}

/// Turn a typed error into the tool error payload for `tool`
pub fn tool_error(tool: &str, err: &Error) -> String {
    error_payload(&format!("{}: {err}", error_prefix(tool)))
}
