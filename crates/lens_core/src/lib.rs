//! TruthLens core: pure job state machine, domain types and view-model helpers.
mod effect;
mod error;
mod job;
mod msg;
mod result;
mod settings;
mod state;
mod update;
mod view_model;

pub use effect::Effect;
pub use error::AnalysisError;
pub use job::{
    AnalysisInput, AnalysisMode, AnalyzeReply, AnalyzeRequest, Generation, Job, JobId, JobStatus,
    Phase, StatusReply,
};
pub use msg::Msg;
pub use result::{AnalysisResult, DETAILED_ANALYSIS_KEY, DISPLAY_KEYS};
pub use settings::{ConcurrencyPolicy, PollSettings};
pub use state::PollerState;
pub use update::update;
pub use view_model::PollerView;
