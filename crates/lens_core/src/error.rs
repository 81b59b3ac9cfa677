use std::time::Duration;

use thiserror::Error;

/// Every way a submitted analysis can end without a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("submission failed: {0}")]
    Submission(String),
    #[error("status polling failed after {attempts} attempts: {cause}")]
    Polling { attempts: u32, cause: String },
    #[error("analysis did not finish within {}s", budget.as_secs())]
    Timeout { budget: Duration },
    #[error("analysis failed: {0}")]
    JobFailed(String),
    #[error("could not fetch analysis result: {0}")]
    ResultFetch(String),
    #[error("an analysis is already in progress")]
    Busy,
    #[error("analysis was cancelled")]
    Cancelled,
}

impl AnalysisError {
    /// True for the distinguished wall-clock budget failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, AnalysisError::Timeout { .. })
    }
}
