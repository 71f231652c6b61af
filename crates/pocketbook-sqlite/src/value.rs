// crates/pocketbook-sqlite/src/value.rs
// ============================================================================
// Module: SQL Values
// Description: Parameter validation, materialized rows, and result shapes.
// Purpose: Normalize dynamic caller values and native results.
// Dependencies: rusqlite, serde, serde_json
// ============================================================================

//! ## Overview
//! Callers hand the adapter dynamic [`serde_json::Value`] parameters. Only
//! strings, numbers and null are bound; anything else is rejected with the
//! statement text before the native engine is reached. Results are
//! materialized into owned [`Row`] values so no engine borrow escapes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use rusqlite::types::Value as NativeValue;
use serde::Serialize;
use serde::Serializer;
use serde::ser::SerializeMap;
use serde_json::Value;

use crate::error::SqliteAdapterError;

// ============================================================================
// SECTION: Values
// ============================================================================

/// Owned column value read from a result row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Returns the integer payload, if any.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the text payload, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Returns true for SQL NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Converts the value to JSON; non-finite reals become null.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Integer(value) => Value::from(*value),
            Self::Real(value) => serde_json::Number::from_f64(*value).map_or(Value::Null, Value::Number),
            Self::Text(value) => Value::String(value.clone()),
            Self::Blob(bytes) => Value::Array(bytes.iter().map(|byte| Value::from(*byte)).collect()),
        }
    }
}

impl From<NativeValue> for SqlValue {
    fn from(value: NativeValue) -> Self {
        match value {
            NativeValue::Null => Self::Null,
            NativeValue::Integer(value) => Self::Integer(value),
            NativeValue::Real(value) => Self::Real(value),
            NativeValue::Text(value) => Self::Text(value),
            NativeValue::Blob(value) => Self::Blob(value),
        }
    }
}

// ============================================================================
// SECTION: Rows
// ============================================================================

/// One materialized result row.
///
/// # Invariants
/// - `values.len() == columns.len()`; order follows the statement's columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Column names shared by every row of one result set.
    columns: Arc<[String]>,
    /// Column values in column order.
    values: Vec<SqlValue>,
}

impl Row {
    /// Builds a row from shared column names and its values.
    pub(crate) const fn new(columns: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        Self {
            columns,
            values,
        }
    }

    /// Returns the value of the first column named `column`.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        let index = self.columns.iter().position(|name| name == column)?;
        self.values.get(index)
    }

    /// Returns the column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the values in column order.
    #[must_use]
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Converts the row into a JSON object keyed by column name.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let object = self
            .columns
            .iter()
            .zip(&self.values)
            .map(|(column, value)| (column.clone(), value.to_json()))
            .collect();
        Value::Object(object)
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.columns.iter().zip(&self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

// ============================================================================
// SECTION: Result Shapes
// ============================================================================

/// Mutation result returned by write statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Changes {
    /// Number of rows affected.
    pub changes: u64,
}

/// Result of [`crate::DatabaseHandle::run_query`].
///
/// Serializes as a bare row array or as `{"changes": n}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryOutcome {
    /// Materialized rows from a read.
    Rows(Vec<Row>),
    /// Affected-row count from a write.
    Changes(Changes),
}

// ============================================================================
// SECTION: Parameter Binding
// ============================================================================

/// Validates dynamic parameters and converts them to native values.
///
/// # Errors
///
/// Returns [`SqliteAdapterError::InvalidParameter`] for booleans, arrays and
/// objects, naming the statement and the offending value.
pub fn bind_params(sql: &str, params: &[Value]) -> Result<Vec<NativeValue>, SqliteAdapterError> {
    params.iter().map(|param| bind_param(sql, param)).collect()
}

/// Converts one dynamic parameter.
fn bind_param(sql: &str, param: &Value) -> Result<NativeValue, SqliteAdapterError> {
    match param {
        Value::Null => Ok(NativeValue::Null),
        Value::String(text) => Ok(NativeValue::Text(text.clone())),
        Value::Number(number) => {
            if let Some(integer) = number.as_i64() {
                Ok(NativeValue::Integer(integer))
            } else if let Some(real) = number.as_f64() {
                Ok(NativeValue::Real(real))
            } else {
                Err(invalid_parameter(sql, param))
            }
        }
        Value::Bool(_) | Value::Array(_) | Value::Object(_) => Err(invalid_parameter(sql, param)),
    }
}

/// Builds the invalid-parameter error for `param`.
fn invalid_parameter(sql: &str, param: &Value) -> SqliteAdapterError {
    SqliteAdapterError::InvalidParameter {
        sql: sql.to_string(),
        value: param.to_string(),
    }
}
