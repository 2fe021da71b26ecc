use anyhow::{Context, Result};
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};

pub const DEFAULT_OTHERS_LABEL: &str = "Others";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub fetch_timeout: Duration,
    pub drilldown_debounce: Duration,
    pub drilldown_row_limit: usize,
    pub top_buckets: usize,
    pub min_slice_share: f64,
    pub others_label: String,
    pub preset_history_limit: usize,
    pub store_path: Option<PathBuf>,
    /// Fetch raw rows and aggregate in process instead of grouping in SQL.
    pub client_aggregation: bool,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default = "default_timeout_secs")]
    dashql_fetch_timeout_secs: u64,
    #[serde(default = "default_debounce_ms")]
    dashql_drilldown_debounce_ms: u64,
    #[serde(default = "default_row_limit")]
    dashql_drilldown_row_limit: usize,
    #[serde(default = "default_top_buckets")]
    dashql_top_buckets: usize,
    #[serde(default = "default_min_share")]
    dashql_min_slice_share: f64,
    #[serde(default)]
    dashql_others_label: Option<String>,
    #[serde(default = "default_history_limit")]
    dashql_preset_history_limit: usize,
    #[serde(default)]
    dashql_store_path: Option<String>,
    #[serde(default)]
    dashql_client_aggregation: bool,
}

const fn default_timeout_secs() -> u64 {
    120
}

const fn default_debounce_ms() -> u64 {
    500
}

const fn default_row_limit() -> usize {
    1000
}

const fn default_top_buckets() -> usize {
    20
}

const fn default_min_share() -> f64 {
    0.08
}

const fn default_history_limit() -> usize {
    5
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(default_timeout_secs()),
            drilldown_debounce: Duration::from_millis(default_debounce_ms()),
            drilldown_row_limit: default_row_limit(),
            top_buckets: default_top_buckets(),
            min_slice_share: default_min_share(),
            others_label: DEFAULT_OTHERS_LABEL.to_string(),
            preset_history_limit: default_history_limit(),
            store_path: None,
            client_aggregation: false,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let raw: RawConfig =
            envy::from_env().context("failed to parse DASHQL_* environment variables")?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawConfig) -> Self {
        let share = raw.dashql_min_slice_share;
        let min_slice_share = if share > 0.0 && share < 1.0 {
            share
        } else {
            default_min_share()
        };

        let others_label = raw
            .dashql_others_label
            .map(|label| label.trim().to_string())
            .filter(|label| !label.is_empty())
            .unwrap_or_else(|| DEFAULT_OTHERS_LABEL.to_string());

        let store_path = raw
            .dashql_store_path
            .map(|path| path.trim().to_string())
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);

        Self {
            fetch_timeout: Duration::from_secs(raw.dashql_fetch_timeout_secs.max(1)),
            drilldown_debounce: Duration::from_millis(raw.dashql_drilldown_debounce_ms),
            drilldown_row_limit: raw.dashql_drilldown_row_limit.max(1),
            top_buckets: raw.dashql_top_buckets.max(1),
            min_slice_share,
            others_label,
            preset_history_limit: raw.dashql_preset_history_limit.max(1),
            store_path,
            client_aggregation: raw.dashql_client_aggregation,
        }
    }
}
