use async_trait::async_trait;
use dashql::{
    config::EngineConfig,
    error::{DashboardError, Result},
    executor::{ColumnProvider, QueryExecutor, RowLimit},
    models::{ColumnInfo, QueryResult},
    state::EngineState,
    store::MemoryStore,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::{sync::Arc, time::Duration};

#[derive(Debug, Clone)]
pub enum Scripted {
    Rows(QueryResult),
    Error(String),
    /// Never resolves.
    Hang,
    Delay(Duration, QueryResult),
}

/// In-memory executor answering by SQL substring; the first matching rule wins and
/// unmatched statements return an empty result.
#[derive(Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<(String, Scripted)>>,
    calls: Mutex<Vec<(String, RowLimit)>>,
}

impl ScriptedExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Adds a rule, or replaces the response of an existing rule with the same needle.
    pub fn respond(&self, needle: &str, response: Scripted) {
        let mut rules = self.rules.lock();
        match rules.iter_mut().find(|(existing, _)| existing == needle) {
            Some((_, slot)) => *slot = response,
            None => rules.push((needle.to_string(), response)),
        }
    }

    pub fn calls(&self) -> Vec<(String, RowLimit)> {
        self.calls.lock().clone()
    }

    pub fn sql_calls(&self) -> Vec<String> {
        self.calls().into_iter().map(|(sql, _)| sql).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn execute(&self, sql: &str, limit: RowLimit) -> Result<QueryResult> {
        self.calls.lock().push((sql.to_string(), limit));
        let response = self
            .rules
            .lock()
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map(|(_, response)| response.clone());

        match response {
            None => Ok(QueryResult::default()),
            Some(Scripted::Rows(result)) => Ok(result),
            Some(Scripted::Error(message)) => Err(DashboardError::Query(message)),
            Some(Scripted::Hang) => std::future::pending().await,
            Some(Scripted::Delay(delay, result)) => {
                tokio::time::sleep(delay).await;
                Ok(result)
            }
        }
    }
}

pub struct StaticColumns {
    columns: Vec<ColumnInfo>,
    calls: Mutex<Vec<String>>,
}

impl StaticColumns {
    pub fn new(columns: &[(&str, Option<&str>)]) -> Arc<Self> {
        Arc::new(Self {
            columns: columns
                .iter()
                .map(|(name, data_type)| ColumnInfo::new(*name, *data_type))
                .collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn requested_tables(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ColumnProvider for StaticColumns {
    async fn fetch_columns(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        self.calls.lock().push(table.to_string());
        Ok(self.columns.clone())
    }
}

pub fn rows(columns: &[&str], rows: Vec<Vec<Value>>) -> Scripted {
    Scripted::Rows(QueryResult::new(columns, rows))
}

pub fn count(n: u64) -> Scripted {
    rows(&["COUNT(*)"], vec![vec![Value::from(n)]])
}

pub fn engine(executor: Arc<ScriptedExecutor>, columns: Arc<StaticColumns>) -> EngineState {
    dashql::telemetry::init_tracing_with("dashql=debug");
    EngineState::new(
        Arc::new(EngineConfig::default()),
        executor,
        columns,
        Arc::new(MemoryStore::new()),
    )
}
