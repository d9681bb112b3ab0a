//! Shared value types: instance identifiers, bind parameters, and the
//! statement request sent to every instance.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Opaque token naming one database instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for InstanceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A single bind parameter. Only primitives and null are accepted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlParam {
    /// Convert a JSON value into a parameter.
    ///
    /// Integers that fit in `i64` become [`SqlParam::Int`]; any other number
    /// becomes [`SqlParam::Float`]. Arrays and objects are rejected.
    pub fn from_json(position: usize, value: Value) -> Result<Self, CoreError> {
        match value {
            Value::Null => Ok(SqlParam::Null),
            Value::Bool(b) => Ok(SqlParam::Bool(b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(SqlParam::Int(i)),
                None => n.as_f64().map(SqlParam::Float).ok_or_else(|| {
                    CoreError::Input(format!(
                        "Parameter ${} is not a representable number",
                        position + 1
                    ))
                }),
            },
            Value::String(s) => Ok(SqlParam::Text(s)),
            Value::Array(_) | Value::Object(_) => Err(CoreError::Input(format!(
                "Parameter ${} must be a string, number, boolean, or null",
                position + 1
            ))),
        }
    }
}

/// The statement and its parameters, shared read-only by every instance
/// execution in a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementRequest {
    sql: String,
    params: Vec<SqlParam>,
}

impl StatementRequest {
    /// Build a request, rejecting blank statement text.
    pub fn new(sql: impl Into<String>, params: Vec<SqlParam>) -> Result<Self, CoreError> {
        let sql = sql.into();
        if sql.trim().is_empty() {
            return Err(CoreError::Input("SQL statement must not be empty".to_string()));
        }
        Ok(Self { sql, params })
    }

    /// Build a request from statement text and an optional JSON array of
    /// parameters. `None` means no parameters.
    pub fn from_json(sql: impl Into<String>, params_json: Option<&str>) -> Result<Self, CoreError> {
        let params = match params_json {
            Some(raw) => parse_params(raw)?,
            None => Vec::new(),
        };
        Self::new(sql, params)
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }
}

/// Parse a JSON array of bind parameters.
pub fn parse_params(raw: &str) -> Result<Vec<SqlParam>, CoreError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| CoreError::Input(format!("Parameters are not valid JSON: {e}")))?;

    let Value::Array(items) = value else {
        return Err(CoreError::Input("Parameters must be a JSON array".to_string()));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, v)| SqlParam::from_json(i, v))
        .collect()
}

/// Parse a JSON array of instance identifiers.
///
/// Order is preserved and duplicates are kept: each entry is one attempt.
pub fn parse_instance_list(raw: &str) -> Result<Vec<InstanceId>, CoreError> {
    let ids: Vec<String> = serde_json::from_str(raw).map_err(|e| {
        CoreError::Input(format!("Instance list must be a JSON array of strings: {e}"))
    })?;

    if let Some(pos) = ids.iter().position(|id| id.trim().is_empty()) {
        return Err(CoreError::Input(format!(
            "Instance identifier at index {pos} must not be empty"
        )));
    }

    Ok(ids.into_iter().map(InstanceId::from).collect())
}
