//! Query engine behind configurable analytics dashboards: filter and bucket SQL, top-N
//! grouping with slice boosting, per-chart fetch cycles, drill-down sessions and export
//! presets.

pub mod catalog;
pub mod config;
pub mod drilldown;
pub mod error;
pub mod executor;
pub mod grouping;
pub mod models;
pub mod pipeline;
pub mod presets;
pub mod session;
pub mod sql;
pub mod state;
pub mod store;
pub mod telemetry;

pub use config::EngineConfig;
pub use error::{DashboardError, ErrorKind, Result};
pub use session::{DashboardSession, SessionCommand, SessionEvent};
pub use state::EngineState;
