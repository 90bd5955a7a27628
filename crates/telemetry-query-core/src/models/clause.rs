//! Query clauses: filters, calculations, group-bys, ordering, time windows,
//! and the opaque pagination cursor

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::primitive::{PrimitiveValue, ValueType};

/// Comparison applied by a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOperation {
    /// Substring match (strings only)
    Includes,
    /// Negated substring match (strings only)
    NotIncludes,
    /// Prefix match
    StartsWith,
    /// Regular expression match
    Regex,
    /// Key is present
    Exists,
    /// Key is present with a null value
    IsNull,
    /// Value is one of a comma separated list
    In,
    /// Value is none of a comma separated list
    NotIn,
    /// Equal to
    Eq,
    /// Not equal to
    Neq,
    /// Greater than
    Gt,
    /// Greater than or equal to
    Gte,
    /// Less than
    Lt,
    /// Less than or equal to
    Lte,
}

impl QueryOperation {
    /// Operations that test for presence and ignore `value`
    pub fn is_existence(self) -> bool {
        matches!(self, Self::Exists | Self::IsNull)
    }

    /// Operations whose right hand side is a comma separated list
    pub fn is_list(self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }

    /// Operations that only make sense on string fields
    pub fn is_textual(self) -> bool {
        matches!(
            self,
            Self::Includes | Self::NotIncludes | Self::StartsWith | Self::Regex
        )
    }

    /// Equality and ordering comparisons
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Neq | Self::Gt | Self::Gte | Self::Lt | Self::Lte
        )
    }
}

/// A single filter condition on a telemetry field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    /// Field to filter on, e.g. `$metadata.service`
    pub key: String,
    /// Comparison to apply
    pub operation: QueryOperation,
    /// Right hand side; ignored by `exists` and `is_null`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<PrimitiveValue>,
    /// Declared type of the field
    #[serde(rename = "type")]
    pub value_type: ValueType,
}

impl QueryFilter {
    /// Build a filter comparing `key` with `value`
    pub fn new(
        key: impl Into<String>,
        operation: QueryOperation,
        value: impl Into<PrimitiveValue>,
    ) -> Self {
        let value = value.into();
        Self {
            key: key.into(),
            operation,
            value_type: value.value_type(),
            value: Some(value),
        }
    }

    /// `key == value`
    pub fn eq(key: impl Into<String>, value: impl Into<PrimitiveValue>) -> Self {
        Self::new(key, QueryOperation::Eq, value)
    }

    /// `key` is present
    pub fn exists(key: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            key: key.into(),
            operation: QueryOperation::Exists,
            value: None,
            value_type,
        }
    }

    /// `key` is one of `values`
    pub fn one_of<S: AsRef<str>>(key: impl Into<String>, values: &[S]) -> Self {
        let joined = values
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(",");
        Self {
            key: key.into(),
            operation: QueryOperation::In,
            value: Some(PrimitiveValue::String(joined)),
            value_type: ValueType::String,
        }
    }

    /// Check the operation / value / type contract
    ///
    /// `path` locates the filter inside the enclosing request and prefixes
    /// every reported field.
    pub fn validate_at(&self, path: &str) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(Error::validation(
                format!("{path}.key"),
                "non-empty field name",
            ));
        }

        if self.operation.is_existence() {
            return Ok(());
        }

        let value_path = format!("{path}.value");
        let Some(value) = &self.value else {
            return Err(Error::validation(
                value_path,
                format!(
                    "a {} value for operation `{}`",
                    self.value_type,
                    operation_name(self.operation)
                ),
            ));
        };

        if self.operation.is_list() {
            let Some(list) = value.as_str() else {
                return Err(Error::validation(
                    value_path,
                    "a comma separated string",
                ));
            };
            return check_list_items(list, self.value_type, &value_path);
        }

        if self.operation.is_textual() {
            if self.value_type != ValueType::String {
                return Err(Error::validation(
                    format!("{path}.type"),
                    format!(
                        "`string` for operation `{}`",
                        operation_name(self.operation)
                    ),
                ));
            }
            if value.as_str().is_none() {
                return Err(Error::validation(value_path, "a string value"));
            }
            return Ok(());
        }

        if value.value_type() != self.value_type {
            return Err(Error::validation(
                value_path,
                format!(
                    "a {} value matching the declared type, found {}",
                    self.value_type,
                    value.value_type()
                ),
            ));
        }

        Ok(())
    }
}

fn check_list_items(list: &str, value_type: ValueType, path: &str) -> Result<()> {
    for item in list.split(',').map(str::trim) {
        let ok = match value_type {
            ValueType::String => !item.is_empty(),
            ValueType::Number => item.parse::<f64>().is_ok(),
            ValueType::Boolean => item == "true" || item == "false",
        };
        if !ok {
            return Err(Error::validation(
                path,
                format!("comma separated {value_type} values, found `{item}`"),
            ));
        }
    }
    Ok(())
}

fn operation_name(operation: QueryOperation) -> String {
    serde_json::to_value(operation)
        .ok()
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_else(|| format!("{operation:?}"))
}

/// How multiple filters are combined
///
/// The backend accepts both lower and upper case spellings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterCombination {
    /// All filters must match
    #[default]
    #[serde(alias = "AND")]
    And,
    /// Any filter may match
    #[serde(alias = "OR")]
    Or,
}

/// Aggregation operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryOperator {
    Uniq,
    Count,
    Max,
    Min,
    Sum,
    Avg,
    Median,
    P001,
    P01,
    P05,
    P10,
    P25,
    P75,
    P90,
    P95,
    P99,
    P999,
    Stddev,
    Variance,
}

impl QueryOperator {
    /// Every operator except `count` aggregates over a field
    pub fn requires_key(self) -> bool {
        !matches!(self, Self::Count)
    }
}

/// An aggregate computed over the matching events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryCalculation {
    /// Field to aggregate; required for everything but `count`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Declared type of `key`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_type: Option<ValueType>,
    /// Aggregation to apply
    pub operator: QueryOperator,
    /// Display name for the resulting series
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl QueryCalculation {
    /// Count of matching events
    pub fn count() -> Self {
        Self {
            key: None,
            key_type: None,
            operator: QueryOperator::Count,
            alias: None,
        }
    }

    /// `operator` applied to a numeric field
    pub fn of(operator: QueryOperator, key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            key_type: Some(ValueType::Number),
            operator,
            alias: None,
        }
    }

    /// Attach an alias to the resulting series
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Check that operators other than `count` name a field
    pub fn validate_at(&self, path: &str) -> Result<()> {
        if !self.operator.requires_key() {
            return Ok(());
        }
        match self.key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(()),
            _ => Err(Error::validation(
                format!("{path}.key"),
                format!(
                    "a field name; operator `{}` requires a key",
                    operator_name(self.operator)
                ),
            )),
        }
    }
}

fn operator_name(operator: QueryOperator) -> String {
    serde_json::to_value(operator)
        .ok()
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_else(|| format!("{operator:?}"))
}

/// Group aggregate results by a field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryGroupBy {
    /// Declared type of the field
    #[serde(rename = "type")]
    pub value_type: ValueType,
    /// Field to group by
    pub value: String,
}

impl QueryGroupBy {
    /// Group by a string field
    pub fn string(key: impl Into<String>) -> Self {
        Self {
            value_type: ValueType::String,
            value: key.into(),
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Ascending
    Asc,
    /// Descending
    Desc,
}

/// Ordering applied to grouped results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Calculation alias or field to order by
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<SortOrder>,
}

/// Query window in epoch milliseconds
///
/// `from <= to` is the caller's responsibility; the backend may reject
/// inverted windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeframe {
    /// Inclusive start
    #[serde(deserialize_with = "epoch_millis")]
    pub from: i64,
    /// Inclusive end
    #[serde(deserialize_with = "epoch_millis")]
    pub to: i64,
}

/// Accept any JSON number with no fractional part, e.g. `1000` or `1000.0`
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn epoch_millis<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let number = serde_json::Number::deserialize(deserializer)?;
    if let Some(ms) = number.as_i64() {
        return Ok(ms);
    }
    match number.as_f64() {
        Some(ms) if ms.fract() == 0.0 && ms >= i64::MIN as f64 && ms < i64::MAX as f64 => {
            Ok(ms as i64)
        }
        _ => Err(serde::de::Error::custom(format!(
            "epoch milliseconds as a whole number, found {number}"
        ))),
    }
}

impl Timeframe {
    /// Window between two epoch-millisecond bounds
    pub fn new(from: i64, to: i64) -> Self {
        Self { from, to }
    }

    /// Window of `span` ending now
    pub fn last(span: Duration) -> Self {
        let to = Utc::now().timestamp_millis();
        let span_ms = i64::try_from(span.as_millis()).unwrap_or(i64::MAX);
        Self {
            from: to.saturating_sub(span_ms),
            to,
        }
    }

    /// Whether `from <= to`
    pub fn is_ordered(&self) -> bool {
        self.from <= self.to
    }
}

/// Direction to move from the current page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetDirection {
    /// Following page
    Next,
    /// Preceding page
    Prev,
}

/// Backend-issued page cursor
///
/// The format belongs to the backend. It is stored and forwarded verbatim
/// and never inspected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OffsetToken(String);

impl OffsetToken {
    /// Wrap a cursor returned by the backend
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

/// Pagination fields forwarded to the backend untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<OffsetToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_by: Option<serde_json::Number>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_direction: Option<OffsetDirection>,
}

impl Pagination {
    /// No cursor fields set
    pub fn is_empty(&self) -> bool {
        self.offset.is_none() && self.offset_by.is_none() && self.offset_direction.is_none()
    }
}
