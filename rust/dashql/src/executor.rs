//! Seams to the SQL execution endpoint and the column metadata provider.

use crate::{
    error::{DashboardError, Result},
    models::{ColumnInfo, ColumnMeta, QueryResult},
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

/// Row cap requested from the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowLimit {
    /// Whatever limit the executor applies by default.
    #[default]
    Default,
    Rows(usize),
    All,
}

impl RowLimit {
    /// Wire encoding: absent, a positive count, or `-1` for unlimited.
    pub fn as_param(self) -> Option<i64> {
        match self {
            RowLimit::Default => None,
            RowLimit::Rows(rows) => Some(rows as i64),
            RowLimit::All => Some(-1),
        }
    }
}

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str, limit: RowLimit) -> Result<QueryResult>;
}

#[async_trait]
pub trait ColumnProvider: Send + Sync {
    async fn fetch_columns(&self, table: &str) -> Result<Vec<ColumnInfo>>;
}

/// Executor reply. A present, non-empty `error` wins over any rows sent alongside it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutorResponse {
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(rename = "metaData", default)]
    pub columns: Vec<ColumnMeta>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
}

impl ExecutorResponse {
    pub fn into_result(self) -> Result<QueryResult> {
        match self.error {
            None | Some(Value::Null) | Some(Value::Bool(false)) => {}
            Some(Value::String(ref message)) if message.is_empty() => {}
            Some(error) => return Err(DashboardError::Query(error_message(&error))),
        }
        Ok(QueryResult {
            columns: self.columns,
            rows: self.rows,
        })
    }
}

fn error_message(error: &Value) -> String {
    match error {
        Value::String(message) => message.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}
