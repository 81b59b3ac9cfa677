use crate::{AnalysisError, JobId, Phase};

/// Snapshot the UI renders from; never mutated directly.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PollerView {
    pub phase: Phase,
    pub job_id: Option<JobId>,
    pub progress_percent: u8,
    pub message: String,
    pub can_submit: bool,
    pub error: Option<AnalysisError>,
}
