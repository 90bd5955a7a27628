//! Request validation and normalization
//!
//! Raw JSON from a caller is turned into a fully-defaulted request here, or
//! rejected with the path of the first offending field. Nothing is coerced:
//! `"5"` is not a number and an unknown enum value is an error, not a no-op.
//!
//! Typed requests built in code go through [`Validate`] only, which checks
//! bounds and the cross-field rules serde cannot express.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{Error, Result};
use crate::models::{
    KeysRequest, QueryParameters, QueryRunRequest, Timeframe, ValuesRequest, DEFAULT_QUERY_LIMIT,
    DEFAULT_VALUES_LIMIT, MAX_QUERY_LIMIT,
};

/// Bounds and business rules for a request
pub trait Validate {
    /// Check the request, reporting the first offending field
    fn validate(&self) -> Result<()>;
}

impl Validate for QueryRunRequest {
    fn validate(&self) -> Result<()> {
        if self.query_id.trim().is_empty() {
            return Err(Error::validation("queryId", "non-empty string"));
        }
        check_limit("limit", self.limit)?;
        check_timeframe("timeframe", &self.timeframe);

        let params = &self.parameters;
        if let Some(limit) = params.limit {
            check_limit("parameters.limit", limit)?;
        }
        for (i, filter) in params.filters.iter().flatten().enumerate() {
            filter.validate_at(&format!("parameters.filters[{i}]"))?;
        }
        for (i, calc) in params.calculations.iter().flatten().enumerate() {
            calc.validate_at(&format!("parameters.calculations[{i}]"))?;
        }
        for (i, group_by) in params.group_bys.iter().flatten().enumerate() {
            if group_by.value.trim().is_empty() {
                return Err(Error::validation(
                    format!("parameters.groupBys[{i}].value"),
                    "non-empty field name",
                ));
            }
        }
        Ok(())
    }
}

impl Validate for KeysRequest {
    fn validate(&self) -> Result<()> {
        if let Some(timeframe) = &self.timeframe {
            check_timeframe("timeframe", timeframe);
        }
        for (i, filter) in self.filters.iter().enumerate() {
            filter.validate_at(&format!("filters[{i}]"))?;
        }
        Ok(())
    }
}

impl Validate for ValuesRequest {
    fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(Error::validation("key", "non-empty field name"));
        }
        check_timeframe("timeframe", &self.timeframe);
        for (i, filter) in self.filters.iter().enumerate() {
            filter.validate_at(&format!("filters[{i}]"))?;
        }
        Ok(())
    }
}

fn check_limit(path: &str, limit: u32) -> Result<()> {
    if limit > MAX_QUERY_LIMIT {
        return Err(Error::validation(
            path,
            format!("integer between 0 and {MAX_QUERY_LIMIT}, found {limit}"),
        ));
    }
    Ok(())
}

// Inverted windows are passed through; the backend decides.
fn check_timeframe(path: &str, timeframe: &Timeframe) {
    if !timeframe.is_ordered() {
        warn!(
            path,
            from = timeframe.from,
            to = timeframe.to,
            "Timeframe ends before it starts"
        );
    }
}

/// Normalize a raw run-query request
pub fn normalize_run_request(raw: &Value) -> Result<QueryRunRequest> {
    let root = Fields::root(raw)?;

    let parameters = match root.object("parameters")? {
        Some(params) => QueryParameters {
            datasets: params.optional("datasets")?,
            filters: params.list("filters")?,
            filter_combination: params.optional("filterCombination")?,
            calculations: params.list("calculations")?,
            group_bys: params.list("groupBys")?,
            order_by: params.optional("orderBy")?,
            limit: params.optional("limit")?,
            needle: params.optional("needle")?,
        },
        None => return Err(Error::validation("parameters", "required object")),
    };

    let request = QueryRunRequest {
        query_id: root.required("queryId")?,
        parameters,
        timeframe: root.required("timeframe")?,
        granularity: root.optional("granularity")?,
        limit: root.optional("limit")?.unwrap_or(DEFAULT_QUERY_LIMIT),
        view: root.optional("view")?.unwrap_or_default(),
        dry: root.optional("dry")?.unwrap_or(false),
        pagination: crate::models::Pagination {
            offset: root.optional("offset")?,
            offset_by: root.optional("offsetBy")?,
            offset_direction: root.optional("offsetDirection")?,
        },
    };

    request.validate()?;
    Ok(request)
}

/// Normalize a raw keys request
pub fn normalize_keys_request(raw: &Value) -> Result<KeysRequest> {
    let root = Fields::root(raw)?;

    let request = KeysRequest {
        timeframe: root.optional("timeframe")?,
        datasets: root.optional("datasets")?.unwrap_or_default(),
        filters: root.list("filters")?.unwrap_or_default(),
        limit: root.optional("limit")?,
        needle: root.optional("needle")?,
        key_needle: root.optional("keyNeedle")?,
    };

    request.validate()?;
    Ok(request)
}

/// Normalize a raw values request
pub fn normalize_values_request(raw: &Value) -> Result<ValuesRequest> {
    let root = Fields::root(raw)?;

    let request = ValuesRequest {
        timeframe: root.required("timeframe")?,
        key: root.required("key")?,
        value_type: root.required("type")?,
        datasets: root.required("datasets")?,
        filters: root.list("filters")?.unwrap_or_default(),
        limit: root.optional("limit")?.unwrap_or(DEFAULT_VALUES_LIMIT),
        needle: root.optional("needle")?,
    };

    request.validate()?;
    Ok(request)
}

/// Field accessor over a JSON object that tracks where it is
///
/// Unknown fields are ignored. A present `null` is rejected; optional
/// fields are either absent or well-typed.
struct Fields<'a> {
    map: &'a Map<String, Value>,
    prefix: Option<String>,
}

impl<'a> Fields<'a> {
    fn root(value: &'a Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self { map, prefix: None }),
            other => Err(Error::validation(
                "$",
                format!("object, found {}", json_kind(other)),
            )),
        }
    }

    fn path(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}.{key}"),
            None => key.to_string(),
        }
    }

    fn present(&self, key: &str) -> Result<Option<&'a Value>> {
        match self.map.get(key) {
            None => Ok(None),
            Some(Value::Null) => Err(Error::validation(
                self.path(key),
                "a value or no field at all, found null",
            )),
            Some(value) => Ok(Some(value)),
        }
    }

    fn required<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        match self.present(key)? {
            Some(value) => decode(value, self.path(key)),
            None => Err(Error::validation(self.path(key), "required field")),
        }
    }

    fn optional<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.present(key)?
            .map(|value| decode(value, self.path(key)))
            .transpose()
    }

    /// Decode an array element by element so errors carry the index
    fn list<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Vec<T>>> {
        let Some(value) = self.present(key)? else {
            return Ok(None);
        };
        let path = self.path(key);
        let Value::Array(items) = value else {
            return Err(Error::validation(
                path,
                format!("array, found {}", json_kind(value)),
            ));
        };
        items
            .iter()
            .enumerate()
            .map(|(i, item)| decode(item, format!("{path}[{i}]")))
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    fn object(&self, key: &str) -> Result<Option<Fields<'a>>> {
        let Some(value) = self.present(key)? else {
            return Ok(None);
        };
        match value {
            Value::Object(map) => Ok(Some(Fields {
                map,
                prefix: Some(self.path(key)),
            })),
            other => Err(Error::validation(
                self.path(key),
                format!("object, found {}", json_kind(other)),
            )),
        }
    }
}

fn decode<T: DeserializeOwned>(value: &Value, path: String) -> Result<T> {
    T::deserialize(value).map_err(|e| Error::validation(path, e.to_string()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
