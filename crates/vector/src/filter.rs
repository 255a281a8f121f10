//! Metadata filters for delete and search.
//!
//! Filters are equality-only (no substring or range matching) and may be
//! combined with `And`. Backends with native filtering compile them into
//! their own query language; the rest call [`Filter::matches`].

use crate::types::DOCUMENT_ID_KEY;
use docindex_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Right-hand side of an equality filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Text(value)
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        FilterValue::Number(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Number(value as f64)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Bool(value)
    }
}

impl FilterValue {
    /// Equality against a JSON metadata value.
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (FilterValue::Text(expected), Value::String(actual)) => expected == actual,
            (FilterValue::Number(expected), Value::Number(actual)) => {
                actual.as_f64().map(|a| a == *expected).unwrap_or(false)
            }
            (FilterValue::Bool(expected), Value::Bool(actual)) => expected == actual,
            _ => false,
        }
    }
}

/// Metadata filter expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    Eq { field: String, value: FilterValue },
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Match every chunk of one source document.
    pub fn document_id(document_id: impl Into<String>) -> Self {
        Filter::eq(DOCUMENT_ID_KEY, document_id.into())
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    /// Parse `field=value` as used on the command line.
    ///
    /// `true`/`false` become booleans and numeric literals numbers; anything
    /// else is text. Quote the value (`field="42"`) to force text.
    pub fn parse_assignment(input: &str) -> AppResult<Self> {
        let (field, raw) = input.split_once('=').ok_or_else(|| {
            AppError::InvalidFilter(format!("expected field=value, got '{}'", input))
        })?;

        let field = field.trim();
        let raw = raw.trim();

        let value = if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
            FilterValue::Text(raw[1..raw.len() - 1].to_string())
        } else if raw == "true" || raw == "false" {
            FilterValue::Bool(raw == "true")
        } else if let Ok(number) = raw.parse::<f64>() {
            FilterValue::Number(number)
        } else {
            FilterValue::Text(raw.to_string())
        };

        let filter = Filter::eq(field, value);
        filter.validate()?;
        Ok(filter)
    }

    /// Reject filters no backend can evaluate.
    pub fn validate(&self) -> AppResult<()> {
        match self {
            Filter::Eq { field, value } => {
                if !is_valid_field(field) {
                    return Err(AppError::InvalidFilter(format!(
                        "invalid field name '{}'",
                        field
                    )));
                }
                if let FilterValue::Number(n) = value {
                    if !n.is_finite() {
                        return Err(AppError::InvalidFilter(format!(
                            "non-finite value for '{}'",
                            field
                        )));
                    }
                }
                Ok(())
            }
            Filter::And(filters) => {
                if filters.is_empty() {
                    return Err(AppError::InvalidFilter("empty And".to_string()));
                }
                filters.iter().try_for_each(Filter::validate)
            }
        }
    }

    /// Evaluate against a metadata map. Missing fields never match.
    pub fn matches(&self, metadata: &Map<String, Value>) -> bool {
        match self {
            Filter::Eq { field, value } => metadata
                .get(field)
                .map(|actual| value.matches(actual))
                .unwrap_or(false),
            Filter::And(filters) => filters.iter().all(|f| f.matches(metadata)),
        }
    }
}

/// Field names must be plain identifiers so they can be spliced into
/// GraphQL paths and JSON paths unquoted.
pub fn is_valid_field(field: &str) -> bool {
    let mut chars = field.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
