use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryErrorKind {
    Failed,
    Timeout,
}

impl QueryErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Failed => "QUERY_FAILED",
            Self::Timeout => "QUERY_TIMEOUT",
        }
    }
}

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("CONNECTION_FAILED: {0}")]
    Connection(String),
    #[error("{}: {message}", .kind.as_str())]
    QueryExecution { kind: QueryErrorKind, message: String },
    #[error("INVALID_FILTER: {0}")]
    InvalidFilter(String),
    #[error("CONFIG_INVALID: {0}")]
    Config(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl DashboardError {
    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryExecution {
            kind: QueryErrorKind::Failed,
            message: message.into(),
        }
    }

    pub fn query_timeout(message: impl Into<String>) -> Self {
        Self::QueryExecution {
            kind: QueryErrorKind::Timeout,
            message: message.into(),
        }
    }

    /// Query failures are scoped to one selection; everything else halts the interaction.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::QueryExecution { .. })
    }
}

impl From<std::io::Error> for DashboardError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<serde_yaml::Error> for DashboardError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Config(value.to_string())
    }
}

impl From<serde_json::Error> for DashboardError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<tokio::task::JoinError> for DashboardError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type DashboardResult<T> = Result<T, DashboardError>;
