use crate::{AnalysisInput, AnalysisResult, AnalyzeReply, Generation, StatusReply};

#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    /// Caller asked for a new analysis.
    SubmitRequested(AnalysisInput),
    /// The analyze request finished. Errors carry the transport cause.
    SubmitCompleted {
        generation: Generation,
        reply: Result<AnalyzeReply, String>,
    },
    /// One status poll finished.
    StatusReceived {
        generation: Generation,
        reply: Result<StatusReply, String>,
    },
    /// The result fetch finished.
    ResultReceived {
        generation: Generation,
        reply: Result<AnalysisResult, String>,
    },
    /// The wall-clock budget armed at submission ran out.
    DeadlineElapsed { generation: Generation },
    /// Caller abandoned the current job.
    CancelRequested,
}
