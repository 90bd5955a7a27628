//! Scalar values shared by filters, needles, and discovery results

use std::fmt;

use serde::{Deserialize, Serialize};

/// Declared type of a telemetry field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// UTF-8 string
    String,
    /// Integer or floating point number
    Number,
    /// true / false
    Boolean,
}

impl ValueType {
    /// Wire name of the type
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A string, number, or boolean
///
/// Numbers keep their JSON representation so integers are sent back
/// to the backend without gaining a fractional part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimitiveValue {
    /// Boolean value
    Bool(bool),
    /// Numeric value
    Number(serde_json::Number),
    /// String value
    String(String),
}

impl PrimitiveValue {
    /// The type this value satisfies
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Bool(_) => ValueType::Boolean,
            Self::Number(_) => ValueType::Number,
            Self::String(_) => ValueType::String,
        }
    }

    /// Borrow the inner string, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for PrimitiveValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for PrimitiveValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PrimitiveValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for PrimitiveValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PrimitiveValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<u64> for PrimitiveValue {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

/// A single free-text or pattern match applied across keys or values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchNeedle {
    /// Text, number, or pattern to look for
    pub value: PrimitiveValue,
    /// Interpret `value` as a regular expression
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_regex: Option<bool>,
    /// Match case-sensitively
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_case: Option<bool>,
}

impl SearchNeedle {
    /// Case-insensitive substring match
    pub fn contains(value: impl Into<PrimitiveValue>) -> Self {
        Self {
            value: value.into(),
            is_regex: None,
            match_case: Some(false),
        }
    }

    /// Regular expression match
    pub fn regex(pattern: impl Into<String>) -> Self {
        Self {
            value: PrimitiveValue::String(pattern.into()),
            is_regex: Some(true),
            match_case: None,
        }
    }
}
