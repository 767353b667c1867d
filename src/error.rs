use thiserror::Error;

/// Failure taxonomy for batch analysis work.
///
/// `LayerNotFound`, `Upstream` and `EmptyResult` are per-item failures: they
/// are caught at the dispatcher's item boundary and drop that item from the
/// aggregated result. `InvalidInput` is a client error rejected before any
/// work is dispatched.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Layer not found: {0}")]
    LayerNotFound(String),

    #[error("Upstream failure: {0}")]
    Upstream(String),

    #[error("Empty result: {0}")]
    EmptyResult(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AnalysisError {
    /// Client errors are rejected at the request boundary instead of being
    /// downgraded to a missing item.
    pub fn is_client_error(&self) -> bool {
        matches!(self, AnalysisError::InvalidInput(_))
    }
}

impl From<anyhow::Error> for AnalysisError {
    fn from(err: anyhow::Error) -> Self {
        AnalysisError::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for AnalysisError {
    fn from(err: reqwest::Error) -> Self {
        AnalysisError::Upstream(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
