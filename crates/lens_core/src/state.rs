use std::time::Duration;

use crate::view_model::PollerView;
use crate::{
    AnalysisError, AnalysisResult, AnalyzeRequest, Generation, Job, JobId, JobStatus, Phase,
    PollSettings, StatusReply,
};

/// State of a single poller. Only `update` mutates it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PollerState {
    settings: PollSettings,
    phase: Phase,
    generation: Generation,
    job: Option<Job>,
    origin_url: Option<String>,
    budget: Duration,
    poll_failures: u32,
}

impl PollerState {
    pub fn new(settings: PollSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn job(&self) -> Option<&Job> {
        self.job.as_ref()
    }

    /// Submission is allowed whenever nothing is in flight.
    pub fn can_submit(&self) -> bool {
        !self.phase.is_active()
    }

    pub fn view(&self) -> PollerView {
        let job = self.job.as_ref();
        PollerView {
            phase: self.phase,
            job_id: job.and_then(|j| j.job_id.clone()),
            progress_percent: job.map_or(0, |j| j.progress_percent),
            message: job.map(|j| j.message.clone()).unwrap_or_default(),
            can_submit: self.can_submit(),
            error: job.and_then(|j| j.error.clone()),
        }
    }

    /// True when a completion for `generation` may be applied in `expected`.
    pub(crate) fn accepts(&self, generation: Generation, expected: Phase) -> bool {
        self.generation == generation && self.phase == expected
    }

    pub(crate) fn advance_generation(&mut self) -> Generation {
        self.generation += 1;
        self.generation
    }

    pub(crate) fn begin_submission(&mut self, request: &AnalyzeRequest, budget: Duration) {
        self.phase = Phase::Submitting;
        self.origin_url = request.url.clone();
        self.budget = budget;
        self.poll_failures = 0;
        self.job = Some(Job {
            message: "Submitting".to_string(),
            ..Job::default()
        });
    }

    pub(crate) fn start_polling(&mut self, job_id: JobId) -> Job {
        self.phase = Phase::Polling;
        let job = self.job.get_or_insert_with(Job::default);
        job.job_id = Some(job_id);
        job.status = JobStatus::Queued;
        job.message = "Queued".to_string();
        job.clone()
    }

    /// Applies a status reply. Progress is clamped and never moves backwards.
    pub(crate) fn apply_status(&mut self, reply: &StatusReply) -> Job {
        self.poll_failures = 0;
        let job = self.job.get_or_insert_with(Job::default);
        if let Some(progress) = reply.progress {
            let clamped = progress.clamp(0, 100) as u8;
            job.progress_percent = job.progress_percent.max(clamped);
        }
        if let Some(message) = &reply.message {
            job.message = message.clone();
        }
        if reply.claims_checked.is_some() {
            job.claims_checked = reply.claims_checked;
        }
        match reply.status {
            JobStatus::Queued | JobStatus::Running => job.status = reply.status,
            // The job stays running until its result is in hand.
            JobStatus::Completed => job.status = JobStatus::Running,
            JobStatus::Failed => job.status = JobStatus::Failed,
        }
        job.clone()
    }

    pub(crate) fn begin_fetch(&mut self) {
        self.phase = Phase::FetchingResult;
    }

    /// Counts a failed poll and returns the number of consecutive failures.
    pub(crate) fn record_poll_failure(&mut self) -> u32 {
        self.poll_failures += 1;
        self.poll_failures
    }

    pub(crate) fn complete(&mut self, result: AnalysisResult) -> Job {
        self.phase = Phase::Done;
        let job = self.job.get_or_insert_with(Job::default);
        job.status = JobStatus::Completed;
        job.progress_percent = 100;
        job.message = "Analysis complete".to_string();
        job.result = Some(result);
        job.error = None;
        job.clone()
    }

    pub(crate) fn fail(&mut self, error: AnalysisError) -> Job {
        self.phase = Phase::Failed;
        let job = self.job.get_or_insert_with(Job::default);
        job.status = JobStatus::Failed;
        job.message = error.to_string();
        job.error = Some(error);
        job.clone()
    }

    pub(crate) fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.job = None;
        self.origin_url = None;
        self.poll_failures = 0;
    }

    pub(crate) fn origin_url(&self) -> Option<String> {
        self.origin_url.clone()
    }

    pub(crate) fn budget(&self) -> Duration {
        self.budget
    }

    pub(crate) fn current_job_id(&self) -> Option<JobId> {
        self.job.as_ref().and_then(|job| job.job_id.clone())
    }
}
