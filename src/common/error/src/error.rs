use std::sync::Arc;

use thiserror::Error;

pub type StrataResult<T> = std::result::Result<T, StrataError>;
pub type GenericError = Arc<dyn std::error::Error + Send + Sync>;

/// Errors shared by every crate in the workspace.
///
/// The enum is `Clone` because a single failure is delivered to every consumer of a
/// dataset through its terminal `finish` call.
#[derive(Debug, Error, Clone)]
pub enum StrataError {
    #[error("{0}")]
    ComputeError(String),
    #[error("{0}")]
    ValueError(String),
    #[error("{0}")]
    TypeError(String),
    #[error("unsupported operation kind: {0}")]
    UnsupportedKind(String),
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
    #[error("dataset {0} has already finished")]
    DatasetFinished(String),
    #[error("query cancelled")]
    Cancelled,
    #[error("{0}")]
    InternalError(String),
    #[error("{0:?}")]
    SerdeJsonError(Arc<serde_json::Error>),
    #[error("{0:?}")]
    External(GenericError),
}

impl StrataError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<serde_json::Error> for StrataError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerdeJsonError(Arc::new(err))
    }
}

impl From<std::io::Error> for StrataError {
    fn from(err: std::io::Error) -> Self {
        Self::External(Arc::new(err))
    }
}

impl From<std::fmt::Error> for StrataError {
    fn from(err: std::fmt::Error) -> Self {
        Self::External(Arc::new(err))
    }
}
