//! Drill-down sessions: the raw rows behind one clicked bucket, re-filtered locally with a
//! debounced re-query and sorted client side.

use crate::{
    config::EngineConfig,
    error::{DashboardError, Result},
    executor::{QueryExecutor, RowLimit},
    grouping::AggregateBucket,
    models::{value_as_f64, value_as_text, Chart, ColumnMeta, DashboardContext, QueryResult},
    presets::{ExportSelection, PresetManager},
    session::{EventSink, SessionEvent},
    sql::{self, SqlBuilder, NULL_DISPLAY_LABEL},
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::{
    cmp::Ordering,
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering as AtomicOrdering},
        Arc,
    },
    time::Duration,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "phase", content = "message", rename_all = "snake_case")]
pub enum DrilldownPhase {
    #[default]
    Idle,
    Loading,
    Loaded,
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SortState {
    pub key: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrilldownSession {
    pub active: bool,
    pub phase: DrilldownPhase,
    pub title: String,
    pub base_sql: String,
    /// Row statement last committed, with local filters applied.
    pub current_sql: String,
    pub local_filters: BTreeMap<String, String>,
    pub sort: Option<SortState>,
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<Value>>,
    pub total_count: u64,
    pub source_table: String,
}

impl DrilldownSession {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Rows in the current sort order. Nulls always sort last.
    pub fn sorted_rows(&self) -> Vec<Vec<Value>> {
        let mut rows = self.rows.clone();
        let Some(sort) = &self.sort else {
            return rows;
        };
        let Some(idx) = self.columns.iter().position(|c| c.name == sort.key) else {
            return rows;
        };
        rows.sort_by(|a, b| compare_cells(a.get(idx), b.get(idx), sort.direction));
        rows
    }
}

fn compare_cells(a: Option<&Value>, b: Option<&Value>, direction: SortDirection) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    let ordering = match (a, b) {
        (None, None) => return Ordering::Equal,
        (None, Some(_)) => return Ordering::Greater,
        (Some(_), None) => return Ordering::Less,
        (Some(a), Some(b)) => match (value_as_f64(a), value_as_f64(b)) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => value_as_text(a).cmp(&value_as_text(b)),
        },
    };
    match direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    }
}

/// What the user clicked: the raw grouping value plus the rendered siblings, which the
/// overflow bucket needs to compute its complement.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketClick {
    pub value: Option<String>,
    pub label: String,
    pub siblings: Option<Vec<AggregateBucket>>,
}

impl BucketClick {
    pub fn from_bucket(bucket: &AggregateBucket, siblings: &[AggregateBucket]) -> Self {
        Self {
            value: bucket.drill_key.clone(),
            label: bucket.name.clone(),
            siblings: Some(siblings.to_vec()),
        }
    }

    /// A click on an ungrouped series, e.g. a bar.
    pub fn raw(value: Option<&str>) -> Self {
        let label = match value {
            Some(value) if !sql::is_null_bucket(Some(value)) => value.to_string(),
            _ => NULL_DISPLAY_LABEL.to_string(),
        };
        Self {
            value: value.map(str::to_string),
            label,
            siblings: None,
        }
    }
}

/// Selected columns of every filtered row, ready to be written out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ExportTable {
    pub fn to_delimited(&self, separator: char) -> String {
        let escape = |cell: &str| {
            if cell.contains(separator) || cell.contains('"') || cell.contains('\n') {
                format!("\"{}\"", cell.replace('"', "\"\""))
            } else {
                cell.to_string()
            }
        };
        std::iter::once(&self.headers)
            .chain(self.rows.iter())
            .map(|line| {
                line.iter()
                    .map(|cell| escape(cell.as_str()))
                    .collect::<Vec<_>>()
                    .join(&separator.to_string())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Clone)]
pub struct DrilldownOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    executor: Arc<dyn QueryExecutor>,
    presets: PresetManager,
    builder: SqlBuilder,
    debounce: Duration,
    row_limit: usize,
    state: Mutex<DrilldownSession>,
    generation: AtomicU64,
    events: Option<EventSink>,
}

impl Inner {
    fn notify(&self) {
        if let Some(events) = &self.events {
            if events.send(SessionEvent::DrilldownChanged).is_err() {
                debug!("session event receiver dropped");
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(AtomicOrdering::SeqCst) == generation
    }
}

impl DrilldownOrchestrator {
    pub fn new(
        executor: Arc<dyn QueryExecutor>,
        presets: PresetManager,
        builder: SqlBuilder,
        config: &EngineConfig,
        events: Option<EventSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                executor,
                presets,
                builder,
                debounce: config.drilldown_debounce,
                row_limit: config.drilldown_row_limit,
                state: Mutex::new(DrilldownSession::default()),
                generation: AtomicU64::new(0),
                events,
            }),
        }
    }

    pub fn presets(&self) -> &PresetManager {
        &self.inner.presets
    }

    pub fn snapshot(&self) -> DrilldownSession {
        self.inner.state.lock().clone()
    }

    /// Opens a session for a clicked bucket and schedules its first fetch.
    ///
    /// Charts without a source table or a resolvable grouping column are rejected and the
    /// session stays idle.
    pub fn open(
        &self,
        chart: &Chart,
        context: &DashboardContext,
        click: BucketClick,
    ) -> Result<JoinHandle<()>> {
        let resolved = chart
            .source()
            .ok_or_else(|| {
                DashboardError::Configuration(format!(
                    "chart '{}' does not declare a source table",
                    chart.title
                ))
            })
            .and_then(|source| {
                chart
                    .grouping_column(context)
                    .map(|column| (source, column))
                    .ok_or_else(|| {
                        DashboardError::Configuration(format!(
                            "chart '{}' has no grouping column to drill into",
                            chart.title
                        ))
                    })
            });
        let (source_table, column) = match resolved {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!(chart_id = %chart.id, error = %err, "drill-down rejected");
                return Err(err);
            }
        };

        let base_sql = self.inner.builder.drilldown_sql(
            source_table,
            column,
            click.value.as_deref(),
            click.siblings.as_deref(),
            context,
        );
        info!(chart_id = %chart.id, source_table, sql = %base_sql, "opening drill-down");

        let generation = self.inner.generation.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        {
            let mut state = self.inner.state.lock();
            *state = DrilldownSession {
                active: true,
                phase: DrilldownPhase::Loading,
                title: format!("{} - {}", chart.title, click.label),
                current_sql: base_sql.clone(),
                base_sql,
                source_table: source_table.to_string(),
                ..DrilldownSession::default()
            };
        }
        self.inner.notify();
        Ok(self.schedule_fetch(generation))
    }

    /// Sets or clears (blank value) one local filter and restarts the debounce.
    /// Returns `None` when no session is open.
    pub fn set_local_filter(&self, column: &str, value: &str) -> Option<JoinHandle<()>> {
        let generation = {
            let mut state = self.inner.state.lock();
            if !state.active {
                return None;
            }
            if value.is_empty() {
                state.local_filters.remove(column);
            } else {
                state
                    .local_filters
                    .insert(column.to_string(), value.to_string());
            }
            state.phase = DrilldownPhase::Loading;
            self.inner.generation.fetch_add(1, AtomicOrdering::SeqCst) + 1
        };
        self.inner.notify();
        Some(self.schedule_fetch(generation))
    }

    /// Same key flips the direction; a new key starts ascending. No re-query.
    pub fn set_sort(&self, key: &str) {
        {
            let mut state = self.inner.state.lock();
            if !state.active {
                return;
            }
            let direction = match &state.sort {
                Some(sort) if sort.key == key && sort.direction == SortDirection::Asc => {
                    SortDirection::Desc
                }
                _ => SortDirection::Asc,
            };
            state.sort = Some(SortState {
                key: key.to_string(),
                direction,
            });
        }
        self.inner.notify();
    }

    /// Clears the session. In-flight fetches are left to finish and are discarded.
    pub fn close(&self) {
        self.inner.generation.fetch_add(1, AtomicOrdering::SeqCst);
        *self.inner.state.lock() = DrilldownSession::default();
        debug!("drill-down closed");
        self.inner.notify();
    }

    /// Column picker seeded with the loaded result's columns, all selected.
    pub fn export_selection(&self) -> ExportSelection {
        ExportSelection::from_columns(self.inner.state.lock().column_names())
    }

    /// Re-runs the filtered statement without a row cap, projects the selected columns and
    /// records the selection in the source table's export history.
    pub async fn export(&self, selection: &ExportSelection) -> Result<ExportTable> {
        let (sql, source_table) = {
            let state = self.inner.state.lock();
            if !state.active {
                return Err(DashboardError::Validation(
                    "no drill-down session is open".into(),
                ));
            }
            (state.current_sql.clone(), state.source_table.clone())
        };
        let headers = selection.selected_names();
        if headers.is_empty() {
            return Err(DashboardError::Validation(
                "select at least one column to export".into(),
            ));
        }

        let result = self.inner.executor.execute(&sql, RowLimit::All).await?;
        let table = project(&result, headers);
        if let Err(err) = self
            .inner
            .presets
            .record_history(&source_table, table.headers.clone())
        {
            warn!(source_table, error = %err, "failed to record export history");
        }
        info!(source_table, rows = table.rows.len(), "exported drill-down rows");
        Ok(table)
    }

    fn schedule_fetch(&self, generation: u64) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            if !inner.is_current(generation) {
                return;
            }

            let (base_sql, filters) = {
                let state = inner.state.lock();
                (state.base_sql.clone(), state.local_filters.clone())
            };
            let (rows_sql, count_sql) = sql::drilldown_queries(&base_sql, &filters);
            debug!(sql = %rows_sql, "fetching drill-down rows");

            let outcome = tokio::try_join!(
                inner
                    .executor
                    .execute(&rows_sql, RowLimit::Rows(inner.row_limit)),
                inner.executor.execute(&count_sql, RowLimit::Default),
            );

            {
                let mut state = inner.state.lock();
                if !inner.is_current(generation) {
                    debug!(generation, "discarding stale drill-down response");
                    return;
                }
                match outcome {
                    Ok((rows, count)) => {
                        state.total_count = count
                            .first_value()
                            .and_then(value_as_f64)
                            .map(|n| n.max(0.0) as u64)
                            .unwrap_or(rows.rows.len() as u64);
                        state.columns = rows.columns;
                        state.rows = rows.rows;
                        state.current_sql = rows_sql;
                        state.phase = DrilldownPhase::Loaded;
                    }
                    Err(err) => {
                        warn!(error = %err, "drill-down fetch failed");
                        state.columns.clear();
                        state.rows.clear();
                        state.total_count = 0;
                        state.phase = DrilldownPhase::Error(err.to_string());
                    }
                }
            }
            inner.notify();
        })
    }
}

fn project(result: &QueryResult, headers: Vec<String>) -> ExportTable {
    let indexes: Vec<Option<usize>> = headers
        .iter()
        .map(|name| result.column_index(name))
        .collect();
    let rows = result
        .rows
        .iter()
        .map(|row| {
            indexes
                .iter()
                .map(|idx| {
                    idx.and_then(|idx| row.get(idx))
                        .and_then(value_as_text)
                        .unwrap_or_default()
                })
                .collect()
        })
        .collect();
    ExportTable { headers, rows }
}
