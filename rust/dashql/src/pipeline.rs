//! Per-chart data loading. Each relevant context change starts a new fetch cycle; a cycle
//! that resolves after it was superseded is computed but never committed.

use crate::{
    config::EngineConfig,
    error::{DashboardError, ErrorKind, Result},
    executor::{QueryExecutor, RowLimit},
    grouping::{self, ChartSeries, GroupingOptions, RawBucket},
    models::{value_as_f64, Chart, ChartKind, DashboardContext},
    session::{EventSink, SessionEvent},
    sql::SqlBuilder,
};
use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
    time::Duration,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[async_trait]
pub trait ChartDataSource: Send + Sync {
    async fn fetch(&self, chart: &Chart, context: &DashboardContext) -> Result<Vec<RawBucket>>;
}

/// Aggregates server side through the query executor.
#[derive(Clone)]
pub struct SqlChartSource {
    executor: Arc<dyn QueryExecutor>,
    builder: SqlBuilder,
    top_n: usize,
}

impl SqlChartSource {
    pub fn new(executor: Arc<dyn QueryExecutor>, builder: SqlBuilder, top_n: usize) -> Self {
        Self {
            executor,
            builder,
            top_n,
        }
    }
}

#[async_trait]
impl ChartDataSource for SqlChartSource {
    async fn fetch(&self, chart: &Chart, context: &DashboardContext) -> Result<Vec<RawBucket>> {
        // Circular charts need the full tail to size the overflow bucket.
        let limit = (!chart.kind.is_circular()).then_some(self.top_n);
        let sql = self.builder.aggregate_sql(chart, context, limit)?;
        debug!(chart_id = %chart.id, sql = %sql, "fetching chart data");
        let result = self.executor.execute(&sql, RowLimit::All).await?;

        if chart.kind == ChartKind::Kpi {
            let value = result.first_value().and_then(value_as_f64).unwrap_or(0.0);
            return Ok(vec![RawBucket::new(Some(&chart.title), value)]);
        }
        Ok(grouping::buckets_from_result(&result))
    }
}

/// Fetches the raw rows behind a chart and aggregates them in process.
#[derive(Clone)]
pub struct RowsChartSource {
    executor: Arc<dyn QueryExecutor>,
    builder: SqlBuilder,
    top_n: usize,
}

impl RowsChartSource {
    pub fn new(executor: Arc<dyn QueryExecutor>, builder: SqlBuilder, top_n: usize) -> Self {
        Self {
            executor,
            builder,
            top_n,
        }
    }
}

#[async_trait]
impl ChartDataSource for RowsChartSource {
    async fn fetch(&self, chart: &Chart, context: &DashboardContext) -> Result<Vec<RawBucket>> {
        let sql = self.builder.rows_sql(chart, context)?;
        debug!(chart_id = %chart.id, sql = %sql, "fetching chart rows");
        let rows = self.executor.execute(&sql, RowLimit::All).await?.to_objects();

        if chart.kind == ChartKind::Kpi {
            let value = grouping::kpi_value(&rows, chart);
            return Ok(vec![RawBucket::new(Some(&chart.title), value)]);
        }
        let top_n = if chart.kind.is_circular() {
            usize::MAX
        } else {
            self.top_n
        };
        grouping::aggregate_rows(&rows, chart, top_n)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchFailure {
    pub message: String,
    pub kind: ErrorKind,
    /// Timeout in effect for the failed cycle, shown next to the retry action.
    pub timeout_secs: u64,
}

impl FetchFailure {
    fn new(err: &DashboardError, timeout_secs: u64) -> Self {
        Self {
            message: err.to_string(),
            kind: err.kind(),
            timeout_secs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum ChartFetchState {
    #[default]
    Idle,
    Loading,
    Loaded(ChartSeries),
    Failed(FetchFailure),
}

/// Hash of everything that changes a chart's query.
pub fn dependency_key(chart: &Chart, context: &DashboardContext) -> u64 {
    let mut hasher = DefaultHasher::new();
    context.source_table.hash(&mut hasher);
    context.user_filters.hash(&mut hasher);
    context.scope_selector.hash(&mut hasher);
    context.group_by_column.hash(&mut hasher);
    context.sql_mode.hash(&mut hasher);
    chart.chart_specific_filters.hash(&mut hasher);
    hasher.finish()
}

struct Slot {
    state: ChartFetchState,
    cycle: u64,
    key: Option<u64>,
    context: Option<DashboardContext>,
    timeout: Duration,
    retries: u32,
}

#[derive(Clone)]
pub struct ChartFetchPipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    chart: Chart,
    source: Arc<dyn ChartDataSource>,
    grouping: GroupingOptions,
    slot: Mutex<Slot>,
    events: Option<EventSink>,
}

impl PipelineInner {
    fn notify(&self) {
        if let Some(events) = &self.events {
            let event = SessionEvent::ChartStateChanged {
                chart_id: self.chart.id,
            };
            if events.send(event).is_err() {
                debug!(chart_id = %self.chart.id, "session event receiver dropped");
            }
        }
    }
}

impl ChartFetchPipeline {
    pub fn new(
        chart: Chart,
        source: Arc<dyn ChartDataSource>,
        config: &EngineConfig,
        events: Option<EventSink>,
    ) -> Self {
        let grouping = GroupingOptions::from(config).for_chart(&chart);
        Self {
            inner: Arc::new(PipelineInner {
                chart,
                source,
                grouping,
                slot: Mutex::new(Slot {
                    state: ChartFetchState::Idle,
                    cycle: 0,
                    key: None,
                    context: None,
                    timeout: config.fetch_timeout,
                    retries: 0,
                }),
                events,
            }),
        }
    }

    pub fn chart(&self) -> &Chart {
        &self.inner.chart
    }

    pub fn state(&self) -> ChartFetchState {
        self.inner.slot.lock().state.clone()
    }

    pub fn retry_count(&self) -> u32 {
        self.inner.slot.lock().retries
    }

    pub fn timeout(&self) -> Duration {
        self.inner.slot.lock().timeout
    }

    /// Applies to the next cycle; use [`retry`](Self::retry) to re-run with it.
    pub fn set_timeout(&self, seconds: u64) {
        self.inner.slot.lock().timeout = Duration::from_secs(seconds.max(1));
    }

    /// Starts a cycle when the dependency key changed. `None` drops back to idle and
    /// orphans whatever is in flight.
    pub fn sync(&self, context: Option<&DashboardContext>) -> Option<JoinHandle<()>> {
        let Some(context) = context else {
            {
                let mut slot = self.inner.slot.lock();
                slot.cycle += 1;
                slot.key = None;
                slot.context = None;
                slot.state = ChartFetchState::Idle;
            }
            self.inner.notify();
            return None;
        };

        let key = dependency_key(&self.inner.chart, context);
        let mut slot = self.inner.slot.lock();
        if slot.key == Some(key) && slot.state != ChartFetchState::Idle {
            return None;
        }
        slot.key = Some(key);
        slot.context = Some(context.clone());
        Some(self.start_cycle(slot, context.clone()))
    }

    /// Re-runs the last context regardless of the dependency key.
    pub fn refresh(&self) -> Option<JoinHandle<()>> {
        let slot = self.inner.slot.lock();
        let context = slot.context.clone()?;
        Some(self.start_cycle(slot, context))
    }

    pub fn retry(&self) -> Option<JoinHandle<()>> {
        let mut slot = self.inner.slot.lock();
        slot.retries += 1;
        info!(chart_id = %self.inner.chart.id, retry = slot.retries, "retrying chart fetch");
        let context = slot.context.clone()?;
        Some(self.start_cycle(slot, context))
    }

    fn start_cycle(
        &self,
        mut slot: MutexGuard<'_, Slot>,
        context: DashboardContext,
    ) -> JoinHandle<()> {
        slot.cycle += 1;
        slot.state = ChartFetchState::Loading;
        let cycle = slot.cycle;
        let timeout = slot.timeout;
        drop(slot);
        self.inner.notify();

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let chart = &inner.chart;
            let timeout_secs = timeout.as_secs();
            let fetch = inner.source.fetch(chart, &context);
            let next = match tokio::time::timeout(timeout, fetch).await {
                Ok(Ok(raw)) => {
                    let series = grouping::prepare_series(chart.kind, raw, &inner.grouping);
                    ChartFetchState::Loaded(series)
                }
                Ok(Err(err)) => {
                    warn!(chart_id = %chart.id, error = %err, "chart fetch failed");
                    ChartFetchState::Failed(FetchFailure::new(&err, timeout_secs))
                }
                Err(_) => {
                    warn!(chart_id = %chart.id, timeout_secs, "chart fetch timed out");
                    let err = DashboardError::Timeout {
                        seconds: timeout_secs,
                    };
                    ChartFetchState::Failed(FetchFailure::new(&err, timeout_secs))
                }
            };

            {
                let mut slot = inner.slot.lock();
                if slot.cycle != cycle {
                    debug!(chart_id = %chart.id, cycle, "discarding superseded chart response");
                    return;
                }
                slot.state = next;
            }
            inner.notify();
        })
    }
}
