//! One open dashboard: per-chart pipelines, the drill-down orchestrator, the column
//! metadata cache and the typed command/event interface to the presentation layer.

use crate::{
    catalog::{self, ColumnKind, OperatorDef, TypeInference},
    drilldown::{BucketClick, DrilldownOrchestrator},
    error::{DashboardError, Result},
    executor::ColumnProvider,
    models::{ColumnInfo, Dashboard, DashboardContext, FilterRule},
    pipeline::{ChartFetchPipeline, ChartFetchState},
    state::EngineState,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    ChartStateChanged { chart_id: Uuid },
    DrilldownChanged,
    Error { message: String },
}

pub type EventSink = mpsc::UnboundedSender<SessionEvent>;

pub fn event_channel() -> (EventSink, mpsc::UnboundedReceiver<SessionEvent>) {
    mpsc::unbounded_channel()
}

/// Column metadata for one source table, fetched once and dropped when the table changes.
pub struct ColumnCache {
    provider: Arc<dyn ColumnProvider>,
    entry: Mutex<Option<(String, Arc<Vec<ColumnInfo>>)>>,
}

impl ColumnCache {
    pub fn new(provider: Arc<dyn ColumnProvider>) -> Self {
        Self {
            provider,
            entry: Mutex::new(None),
        }
    }

    pub fn cached(&self, table: &str) -> Option<Arc<Vec<ColumnInfo>>> {
        self.entry
            .lock()
            .as_ref()
            .filter(|(cached, _)| cached == table)
            .map(|(_, columns)| Arc::clone(columns))
    }

    pub async fn columns(&self, table: &str) -> Result<Arc<Vec<ColumnInfo>>> {
        if let Some(columns) = self.cached(table) {
            return Ok(columns);
        }
        let columns = Arc::new(self.provider.fetch_columns(table).await?);
        debug!(table, count = columns.len(), "cached column metadata");
        *self.entry.lock() = Some((table.to_string(), Arc::clone(&columns)));
        Ok(columns)
    }

    pub fn invalidate(&self) {
        self.entry.lock().take();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    SetUserFilters(Vec<FilterRule>),
    SetScope(String),
    SetSourceTable(String),
    RefreshCharts,
    RetryChart(Uuid),
    SetChartTimeout { chart_id: Uuid, seconds: u64 },
    /// `value` is the clicked bucket's drill key (`None` for the empty bucket).
    OpenDrilldown { chart_id: Uuid, value: Option<String> },
    SetDrillFilter { column: String, value: String },
    SortDrilldown(String),
    CloseDrilldown,
}

pub struct DashboardSession {
    dashboard: Dashboard,
    pipelines: Vec<ChartFetchPipeline>,
    drilldown: DrilldownOrchestrator,
    columns: ColumnCache,
    inference: Arc<dyn TypeInference>,
    events: EventSink,
}

impl DashboardSession {
    pub fn open(
        state: &EngineState,
        dashboard: Dashboard,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, receiver) = event_channel();
        let source = state.chart_source();
        let pipelines = dashboard
            .charts
            .iter()
            .cloned()
            .map(|chart| {
                ChartFetchPipeline::new(chart, source.clone(), &state.config, Some(events.clone()))
            })
            .collect();
        let drilldown = DrilldownOrchestrator::new(
            Arc::clone(&state.executor),
            state.presets(),
            state.builder.clone(),
            &state.config,
            Some(events.clone()),
        );
        info!(
            dashboard = %dashboard.name,
            charts = dashboard.charts.len(),
            "opened dashboard session"
        );
        let session = Self {
            dashboard,
            pipelines,
            drilldown,
            columns: ColumnCache::new(Arc::clone(&state.columns)),
            inference: Arc::clone(&state.inference),
            events,
        };
        (session, receiver)
    }

    pub fn dashboard(&self) -> &Dashboard {
        &self.dashboard
    }

    pub fn context(&self) -> &DashboardContext {
        &self.dashboard.context
    }

    pub fn drilldown(&self) -> &DrilldownOrchestrator {
        &self.drilldown
    }

    pub fn pipeline(&self, chart_id: Uuid) -> Option<&ChartFetchPipeline> {
        self.pipelines.iter().find(|p| p.chart().id == chart_id)
    }

    pub fn column_cache(&self) -> &ColumnCache {
        &self.columns
    }

    fn require_pipeline(&self, chart_id: Uuid) -> Result<&ChartFetchPipeline> {
        self.pipeline(chart_id)
            .ok_or_else(|| DashboardError::Validation(format!("unknown chart {chart_id}")))
    }

    /// Starts a fetch for every chart whose dependency key changed.
    pub fn sync_charts(&self) -> Vec<JoinHandle<()>> {
        self.pipelines
            .iter()
            .filter_map(|pipeline| pipeline.sync(Some(&self.dashboard.context)))
            .collect()
    }

    pub fn refresh_charts(&self) -> Vec<JoinHandle<()>> {
        self.pipelines
            .iter()
            .filter_map(|pipeline| {
                pipeline
                    .sync(Some(&self.dashboard.context))
                    .or_else(|| pipeline.refresh())
            })
            .collect()
    }

    async fn column_kind(&self, column: &str) -> Result<ColumnKind> {
        let columns = self.columns.columns(&self.dashboard.context.source_table).await?;
        let info = columns
            .iter()
            .find(|info| info.name.eq_ignore_ascii_case(column))
            .ok_or_else(|| {
                DashboardError::Validation(format!(
                    "column '{column}' does not exist in {}",
                    self.dashboard.context.source_table
                ))
            })?;
        Ok(self.inference.infer(info))
    }

    /// Operators offered for a column of the current source table.
    pub async fn operators_for_column(&self, column: &str) -> Result<&'static [OperatorDef]> {
        Ok(catalog::operators_for_kind(self.column_kind(column).await?))
    }

    /// Validates every complete rule against its column's inferred type, then refetches.
    pub async fn set_user_filters(
        &mut self,
        filters: Vec<FilterRule>,
    ) -> Result<Vec<JoinHandle<()>>> {
        for rule in filters.iter().filter(|rule| rule.is_complete()) {
            let kind = self.column_kind(rule.column.trim()).await?;
            rule.validate(kind)?;
        }
        self.dashboard.context.user_filters = filters;
        Ok(self.sync_charts())
    }

    pub fn set_scope(&mut self, selector: impl Into<String>) -> Vec<JoinHandle<()>> {
        self.dashboard.context.scope_selector = selector.into();
        self.sync_charts()
    }

    /// Switches the source table. Cached columns and user filters belong to the old table
    /// and are dropped; an open drill-down is closed.
    pub fn set_source_table(&mut self, table: impl Into<String>) -> Vec<JoinHandle<()>> {
        let table = table.into();
        if table == self.dashboard.context.source_table {
            return Vec::new();
        }
        self.columns.invalidate();
        self.drilldown.close();
        self.dashboard.context.source_table = table;
        self.dashboard.context.user_filters.clear();
        self.sync_charts()
    }

    /// Opens a drill-down on a chart bucket, taking the sibling snapshot from the chart's
    /// rendered series when it is grouped.
    pub fn open_drilldown(&self, chart_id: Uuid, value: Option<&str>) -> Result<JoinHandle<()>> {
        let pipeline = self.require_pipeline(chart_id)?;
        let click = match pipeline.state() {
            ChartFetchState::Loaded(series) => series
                .grouped()
                .and_then(|buckets| {
                    buckets
                        .iter()
                        .find(|bucket| bucket.drill_key.as_deref() == value)
                        .map(|bucket| BucketClick::from_bucket(bucket, buckets))
                })
                .unwrap_or_else(|| BucketClick::raw(value)),
            _ => BucketClick::raw(value),
        };
        self.drilldown.open(pipeline.chart(), &self.dashboard.context, click)
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("session event receiver dropped");
        }
    }

    /// Applies one command. Failures are also reported as [`SessionEvent::Error`].
    pub async fn dispatch(&mut self, command: SessionCommand) -> Result<()> {
        debug!(?command, "dispatching session command");
        let outcome = match command {
            SessionCommand::SetUserFilters(filters) => {
                self.set_user_filters(filters).await.map(drop)
            }
            SessionCommand::SetScope(selector) => {
                self.set_scope(selector);
                Ok(())
            }
            SessionCommand::SetSourceTable(table) => {
                self.set_source_table(table);
                Ok(())
            }
            SessionCommand::RefreshCharts => {
                self.refresh_charts();
                Ok(())
            }
            SessionCommand::RetryChart(chart_id) => self.require_pipeline(chart_id).map(|p| {
                p.retry();
            }),
            SessionCommand::SetChartTimeout { chart_id, seconds } => self
                .require_pipeline(chart_id)
                .map(|p| p.set_timeout(seconds)),
            SessionCommand::OpenDrilldown { chart_id, value } => {
                self.open_drilldown(chart_id, value.as_deref()).map(drop)
            }
            SessionCommand::SetDrillFilter { column, value } => {
                self.drilldown.set_local_filter(&column, &value);
                Ok(())
            }
            SessionCommand::SortDrilldown(key) => {
                self.drilldown.set_sort(&key);
                Ok(())
            }
            SessionCommand::CloseDrilldown => {
                self.drilldown.close();
                Ok(())
            }
        };

        if let Err(err) = &outcome {
            warn!(error = %err, "session command failed");
            self.emit(SessionEvent::Error {
                message: err.to_string(),
            });
        }
        outcome
    }
}
