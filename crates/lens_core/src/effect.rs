use std::time::Duration;

use crate::{AnalysisError, AnalysisResult, AnalyzeRequest, Generation, Job, JobId};

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    PostAnalysis {
        generation: Generation,
        request: AnalyzeRequest,
    },
    ArmDeadline {
        generation: Generation,
        budget: Duration,
    },
    SchedulePoll {
        generation: Generation,
        job_id: JobId,
        delay: Duration,
    },
    FetchResult {
        generation: Generation,
        job_id: JobId,
    },
    PersistResult {
        result: AnalysisResult,
        origin_url: Option<String>,
    },
    ReportProgress { generation: Generation, job: Job },
    ReportTerminal { generation: Generation, job: Job },
    /// Cancel every timer and request issued for `generation`.
    StopTimers { generation: Generation },
    /// The submission was refused without touching the current job.
    RejectSubmission(AnalysisError),
}
