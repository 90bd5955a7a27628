//! Request shapes for the three telemetry endpoints

use serde::{Deserialize, Serialize};

use super::clause::{
    FilterCombination, OrderBy, Pagination, QueryCalculation, QueryFilter, QueryGroupBy, Timeframe,
};
use super::primitive::{SearchNeedle, ValueType};

/// Upper bound for both run-query limits
pub const MAX_QUERY_LIMIT: u32 = 100;

/// Events returned when a run-query request sets no limit
pub const DEFAULT_QUERY_LIMIT: u32 = 5;

/// Values returned when a values request sets no limit
pub const DEFAULT_VALUES_LIMIT: u64 = 50;

/// Shape of a run-query result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    /// Trace listing
    Traces,
    /// Raw events
    Events,
    /// Aggregates over time
    #[default]
    Calculations,
    /// Events grouped by request id
    Invocations,
    /// Request listing
    Requests,
    /// Message patterns
    Patterns,
}

impl View {
    /// Wire name of the view
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Traces => "traces",
            Self::Events => "events",
            Self::Calculations => "calculations",
            Self::Invocations => "invocations",
            Self::Requests => "requests",
            Self::Patterns => "patterns",
        }
    }
}

impl std::fmt::Display for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for View {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown view `{s}`"))
    }
}

/// What to select and aggregate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datasets: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<QueryFilter>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_combination: Option<FilterCombination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculations: Option<Vec<QueryCalculation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_bys: Option<Vec<QueryGroupBy>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_by: Option<OrderBy>,
    /// Groups returned when a group-by is present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needle: Option<SearchNeedle>,
}

/// A run-query request, fully defaulted
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRunRequest {
    pub query_id: String,
    pub parameters: QueryParameters,
    pub timeframe: Timeframe,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granularity: Option<serde_json::Number>,
    /// Events returned for the `events` view
    pub limit: u32,
    pub view: View,
    /// Plan the query without executing it
    pub dry: bool,
    #[serde(flatten)]
    pub pagination: Pagination,
}

impl QueryRunRequest {
    /// Request with every optional field at its default
    pub fn new(query_id: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            query_id: query_id.into(),
            parameters: QueryParameters::default(),
            timeframe,
            granularity: None,
            limit: DEFAULT_QUERY_LIMIT,
            view: View::default(),
            dry: false,
            pagination: Pagination::default(),
        }
    }

    /// Select the result shape
    pub fn view(mut self, view: View) -> Self {
        self.view = view;
        self
    }

    /// Set the top-level result limit
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Append a filter
    pub fn filter(mut self, filter: QueryFilter) -> Self {
        self.parameters.filters.get_or_insert_with(Vec::new).push(filter);
        self
    }

    /// Append a calculation
    pub fn calculation(mut self, calculation: QueryCalculation) -> Self {
        self.parameters
            .calculations
            .get_or_insert_with(Vec::new)
            .push(calculation);
        self
    }

    /// Append a group-by
    pub fn group_by(mut self, group_by: QueryGroupBy) -> Self {
        self.parameters.group_bys.get_or_insert_with(Vec::new).push(group_by);
        self
    }

    /// Continue from a backend-issued cursor
    pub fn page(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }
}

/// Key discovery request
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeysRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<Timeframe>,
    pub datasets: Vec<String>,
    pub filters: Vec<QueryFilter>,
    /// Unbounded; discovery callers often ask for thousands of keys
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needle: Option<SearchNeedle>,
    /// Narrows the returned keys by name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_needle: Option<SearchNeedle>,
}

impl KeysRequest {
    /// Keys seen within `timeframe`
    pub fn within(timeframe: Timeframe) -> Self {
        Self {
            timeframe: Some(timeframe),
            ..Self::default()
        }
    }
}

/// Value discovery request for a single key
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuesRequest {
    pub timeframe: Timeframe,
    pub key: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    pub datasets: Vec<String>,
    pub filters: Vec<QueryFilter>,
    pub limit: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needle: Option<SearchNeedle>,
}

impl ValuesRequest {
    /// Values of `key` seen within `timeframe`
    pub fn new(timeframe: Timeframe, key: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            timeframe,
            key: key.into(),
            value_type,
            datasets: Vec::new(),
            filters: Vec::new(),
            limit: DEFAULT_VALUES_LIMIT,
            needle: None,
        }
    }
}
