use std::time::Duration;

use crate::AnalysisMode;

/// What to do with a submit that arrives while another job is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyPolicy {
    /// Refuse the new submission with `AnalysisError::Busy`.
    Reject,
    /// Cancel the running job silently and start the new one.
    #[default]
    CancelPrevious,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    pub poll_interval: Duration,
    pub news_budget: Duration,
    pub transcript_budget: Duration,
    /// Consecutive failed polls tolerated before the job fails.
    pub max_poll_retries: u32,
    pub policy: ConcurrencyPolicy,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            news_budget: Duration::from_secs(2 * 60),
            transcript_budget: Duration::from_secs(10 * 60),
            max_poll_retries: 3,
            policy: ConcurrencyPolicy::default(),
        }
    }
}

impl PollSettings {
    pub fn budget_for(&self, mode: AnalysisMode) -> Duration {
        match mode {
            AnalysisMode::News => self.news_budget,
            AnalysisMode::Transcript => self.transcript_budget,
        }
    }
}
