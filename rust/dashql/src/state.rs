use crate::{
    catalog::{PrefixTypeInference, TypeInference},
    config::EngineConfig,
    executor::{ColumnProvider, QueryExecutor},
    models::Dashboard,
    pipeline::{ChartDataSource, RowsChartSource, SqlChartSource},
    presets::PresetManager,
    session::{DashboardSession, SessionEvent},
    sql::{ScopeColumnStrategy, SqlBuilder},
    store::{self, DashboardRepository, KeyValueStore},
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Collaborators shared by every dashboard session.
#[derive(Clone)]
pub struct EngineState {
    pub config: Arc<EngineConfig>,
    pub executor: Arc<dyn QueryExecutor>,
    pub columns: Arc<dyn ColumnProvider>,
    pub store: Arc<dyn KeyValueStore>,
    pub builder: SqlBuilder,
    pub inference: Arc<dyn TypeInference>,
}

impl EngineState {
    pub fn new(
        config: Arc<EngineConfig>,
        executor: Arc<dyn QueryExecutor>,
        columns: Arc<dyn ColumnProvider>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            config,
            executor,
            columns,
            store,
            builder: SqlBuilder::default(),
            inference: Arc::new(PrefixTypeInference),
        }
    }

    /// Reads `DASHQL_*` configuration and opens the configured store.
    pub fn from_env(
        executor: Arc<dyn QueryExecutor>,
        columns: Arc<dyn ColumnProvider>,
    ) -> anyhow::Result<Self> {
        let config = EngineConfig::from_env()?;
        let store = store::open_store(&config)?;
        Ok(Self::new(Arc::new(config), executor, columns, store))
    }

    pub fn with_inference(mut self, inference: Arc<dyn TypeInference>) -> Self {
        self.inference = inference;
        self
    }

    pub fn with_scope_strategy(mut self, scope: Arc<dyn ScopeColumnStrategy>) -> Self {
        self.builder = SqlBuilder::new(scope);
        self
    }

    pub fn presets(&self) -> PresetManager {
        PresetManager::new(Arc::clone(&self.store), self.config.preset_history_limit)
    }

    pub fn dashboards(&self) -> DashboardRepository {
        DashboardRepository::new(Arc::clone(&self.store))
    }

    pub fn chart_source(&self) -> Arc<dyn ChartDataSource> {
        let executor = Arc::clone(&self.executor);
        let builder = self.builder.clone();
        let top_n = self.config.top_buckets;
        if self.config.client_aggregation {
            Arc::new(RowsChartSource::new(executor, builder, top_n))
        } else {
            Arc::new(SqlChartSource::new(executor, builder, top_n))
        }
    }

    pub fn open_session(
        &self,
        dashboard: Dashboard,
    ) -> (DashboardSession, mpsc::UnboundedReceiver<SessionEvent>) {
        DashboardSession::open(self, dashboard)
    }
}
