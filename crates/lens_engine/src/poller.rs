//! Async driver for the job state machine in `lens_core`.
//!
//! The poller owns the `PollerState`, feeds it messages, and carries out the
//! returned effects outside the state lock. Every timer and request belongs to
//! one generation and is cancelled through that generation's token, so a
//! cancelled or replaced job cannot reach the network or the observers again.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lens_core::{
    update, AnalysisError, AnalysisInput, Effect, Generation, Job, JobId, Msg, PollSettings,
    PollerState, PollerView,
};
use lens_logging::{lens_debug, lens_info, lens_warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::AnalysisApi;
use crate::cache::ResultCache;

type Observer = Arc<dyn Fn(&Job) + Send + Sync>;

/// How a successful `submit` was taken on by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accepted {
    /// Queued remotely; progress and the outcome arrive through the observers.
    Job(JobId),
    /// Answered inline; the terminal observers have already run.
    Immediate,
}

struct Timers {
    generation: Generation,
    token: CancellationToken,
}

struct Shared {
    api: Arc<dyn AnalysisApi>,
    cache: Arc<ResultCache>,
    state: Mutex<PollerState>,
    timers: Mutex<Option<Timers>>,
    /// Request task started by the latest `submit`.
    submission: Mutex<Option<(Generation, JoinHandle<()>)>>,
    /// Held while the state machine advances and while progress is delivered,
    /// so no report for a superseded generation runs after `cancel` returns.
    delivery: Mutex<()>,
    progress_observers: Mutex<Vec<Observer>>,
    terminal_observers: Mutex<Vec<Observer>>,
}

/// Drives one analysis job at a time from submission to a terminal state.
///
/// Cloning yields another handle to the same poller.
#[derive(Clone)]
pub struct JobPoller {
    shared: Arc<Shared>,
}

impl JobPoller {
    pub fn new(api: Arc<dyn AnalysisApi>, cache: Arc<ResultCache>, settings: PollSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                api,
                cache,
                state: Mutex::new(PollerState::new(settings)),
                timers: Mutex::new(None),
                submission: Mutex::new(None),
                delivery: Mutex::new(()),
                progress_observers: Mutex::new(Vec::new()),
                terminal_observers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Called with the job after every status update from the backend.
    ///
    /// Progress callbacks must not call `submit` or `cancel` on this poller.
    pub fn on_progress(&self, callback: impl Fn(&Job) + Send + Sync + 'static) {
        lock(&self.shared.progress_observers).push(Arc::new(callback));
    }

    /// Called exactly once per job when it completes or fails.
    pub fn on_terminal(&self, callback: impl Fn(&Job) + Send + Sync + 'static) {
        lock(&self.shared.terminal_observers).push(Arc::new(callback));
    }

    pub fn view(&self) -> PollerView {
        lock(&self.shared.state).view()
    }

    pub fn is_active(&self) -> bool {
        lock(&self.shared.state).phase().is_active()
    }

    /// Validates and submits `input`, returning once the backend has accepted
    /// or refused it. Polling continues in the background.
    ///
    /// Validation failures return before any network call is made.
    pub async fn submit(&self, input: AnalysisInput) -> Result<Accepted, AnalysisError> {
        let effects = self.shared.dispatch(Msg::SubmitRequested(input));

        let mut posted = None;
        let mut refused = None;
        for effect in effects {
            match &effect {
                Effect::PostAnalysis { generation, .. } => posted = Some(*generation),
                Effect::RejectSubmission(error) => refused = Some(error.clone()),
                Effect::ReportTerminal { job, .. } => refused = job.error.clone(),
                _ => {}
            }
            self.shared.execute(effect);
        }
        let Some(generation) = posted else {
            return Err(refused.unwrap_or(AnalysisError::Cancelled));
        };

        if let Some(request) = self.shared.take_submission(generation) {
            if let Err(err) = request.await {
                lens_warn!("Submission task ended abnormally: {}", err);
            }
        }
        self.shared.outcome(generation)
    }

    /// Abandons the current job. Returns false when nothing was in flight.
    pub fn cancel(&self) -> bool {
        let effects = self.shared.dispatch(Msg::CancelRequested);
        let cancelled = !effects.is_empty();
        for effect in effects {
            self.shared.execute(effect);
        }
        if cancelled {
            lens_info!("Analysis cancelled");
        }
        cancelled
    }
}

impl Shared {
    fn dispatch(&self, msg: Msg) -> Vec<Effect> {
        let _delivery = lock(&self.delivery);
        let mut guard = lock(&self.state);
        let state = std::mem::take(&mut *guard);
        let (state, effects) = update(state, msg);
        *guard = state;
        effects
    }

    fn apply(self: &Arc<Self>, msg: Msg) {
        for effect in self.dispatch(msg) {
            self.execute(effect);
        }
    }

    fn is_current(&self, generation: Generation) -> bool {
        lock(&self.state).generation() == generation
    }

    fn take_submission(&self, generation: Generation) -> Option<JoinHandle<()>> {
        let mut slot = lock(&self.submission);
        match slot.take() {
            Some((posted, handle)) if posted == generation => Some(handle),
            other => {
                *slot = other;
                None
            }
        }
    }

    /// Result of the submission made under `generation`, as seen right now.
    fn outcome(&self, generation: Generation) -> Result<Accepted, AnalysisError> {
        let state = lock(&self.state);
        if state.generation() != generation {
            return Err(AnalysisError::Cancelled);
        }
        match state.job() {
            Some(job) => match (&job.error, &job.job_id) {
                (Some(error), _) => Err(error.clone()),
                (None, Some(job_id)) => Ok(Accepted::Job(job_id.clone())),
                (None, None) if job.result.is_some() => Ok(Accepted::Immediate),
                (None, None) => Err(AnalysisError::Cancelled),
            },
            None => Err(AnalysisError::Cancelled),
        }
    }

    /// Token shared by every timer and request of `generation`. Stale
    /// generations get an already-cancelled token.
    fn token_for(&self, generation: Generation) -> CancellationToken {
        if !self.is_current(generation) {
            let token = CancellationToken::new();
            token.cancel();
            return token;
        }
        let mut timers = lock(&self.timers);
        if let Some(current) = timers.as_ref() {
            if current.generation == generation {
                return current.token.clone();
            }
        }
        if let Some(previous) = timers.take() {
            previous.token.cancel();
        }
        let token = CancellationToken::new();
        *timers = Some(Timers {
            generation,
            token: token.clone(),
        });
        token
    }

    fn stop_timers(&self, generation: Generation) {
        let mut timers = lock(&self.timers);
        if timers.as_ref().is_some_and(|t| t.generation == generation) {
            if let Some(stopped) = timers.take() {
                stopped.token.cancel();
            }
        }
    }

    fn execute(self: &Arc<Self>, effect: Effect) {
        match effect {
            Effect::ArmDeadline { generation, budget } => {
                let token = self.token_for(generation);
                let shared = Arc::clone(self);
                tokio::spawn(async move {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {}
                        _ = tokio::time::sleep(budget) => {
                            lens_warn!("Analysis exceeded its {}s budget", budget.as_secs());
                            shared.apply(Msg::DeadlineElapsed { generation });
                        }
                    }
                });
            }
            Effect::SchedulePoll {
                generation,
                job_id,
                delay,
            } => self.spawn_poll(generation, job_id, delay),
            Effect::FetchResult { generation, job_id } => {
                let token = self.token_for(generation);
                let shared = Arc::clone(self);
                tokio::spawn(async move {
                    let reply = tokio::select! {
                        biased;
                        _ = token.cancelled() => return,
                        reply = shared.api.results(&job_id) => reply,
                    };
                    if let Err(err) = &reply {
                        lens_warn!("Fetching result of job {} failed: {}", job_id, err);
                    }
                    shared.apply(Msg::ResultReceived {
                        generation,
                        reply: reply.map_err(|err| err.to_string()),
                    });
                });
            }
            Effect::PostAnalysis {
                generation,
                request,
            } => {
                let token = self.token_for(generation);
                let shared = Arc::clone(self);
                let handle = tokio::spawn(async move {
                    let reply = tokio::select! {
                        biased;
                        _ = token.cancelled() => return,
                        reply = shared.api.analyze(&request) => reply,
                    };
                    shared.apply(Msg::SubmitCompleted {
                        generation,
                        reply: reply.map_err(|err| err.to_string()),
                    });
                });
                *lock(&self.submission) = Some((generation, handle));
            }
            Effect::PersistResult { result, origin_url } => {
                self.cache.save(&result, origin_url.as_deref());
            }
            Effect::ReportProgress { generation, job } => {
                let _delivery = lock(&self.delivery);
                if self.is_current(generation) {
                    notify(&self.progress_observers, &job);
                }
            }
            // Already approved by `update`; a later submit must not swallow it.
            Effect::ReportTerminal { job, .. } => {
                match &job.error {
                    Some(error) => lens_warn!("Analysis failed: {}", error),
                    None => lens_info!(
                        "Analysis finished{}",
                        job.job_id
                            .as_ref()
                            .map(|id| format!(" for job {id}"))
                            .unwrap_or_default()
                    ),
                }
                notify(&self.terminal_observers, &job);
            }
            Effect::StopTimers { generation } => self.stop_timers(generation),
            Effect::RejectSubmission(error) => {
                lens_warn!("Submission refused: {}", error);
            }
        }
    }

    fn spawn_poll(self: &Arc<Self>, generation: Generation, job_id: JobId, delay: Duration) {
        let token = self.token_for(generation);
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let reply = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    lens_debug!("Dropping status poll for job {}", job_id);
                    return;
                }
                reply = shared.api.status(&job_id) => reply,
            };
            if let Err(err) = &reply {
                lens_warn!("Status poll for job {} failed: {}", job_id, err);
            }
            shared.apply(Msg::StatusReceived {
                generation,
                reply: reply.map_err(|err| err.to_string()),
            });
        });
    }
}

fn notify(observers: &Mutex<Vec<Observer>>, job: &Job) {
    // Snapshot so observers may register further callbacks.
    let observers: Vec<Observer> = lock(observers).clone();
    for observer in observers {
        observer(job);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
