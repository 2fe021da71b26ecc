use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DashboardError>;

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("fetch timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("failed to access store: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode stored value: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

/// Coarse classification used by the presentation layer to pick an error view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Query,
    Timeout,
    Validation,
    Storage,
    Internal,
}

impl DashboardError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DashboardError::Configuration(_) => ErrorKind::Configuration,
            DashboardError::Query(_) => ErrorKind::Query,
            DashboardError::Timeout { .. } => ErrorKind::Timeout,
            DashboardError::Validation(_) => ErrorKind::Validation,
            DashboardError::Io(_) | DashboardError::Serialization(_) => ErrorKind::Storage,
            DashboardError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Timeouts and query failures can be retried by the user; the rest need input changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Query | ErrorKind::Timeout)
    }
}
