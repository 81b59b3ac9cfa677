use crate::{
    AnalysisError, AnalysisInput, AnalysisResult, AnalyzeReply, ConcurrencyPolicy, Effect,
    Generation, JobStatus, Msg, Phase, PollerState, StatusReply,
};

/// Pure update function: applies a message to state and returns any effects.
///
/// Completions tagged with a stale generation, or arriving in a phase that
/// does not expect them, are dropped without effects. This is what makes
/// termination idempotent and cancellation safe.
pub fn update(mut state: PollerState, msg: Msg) -> (PollerState, Vec<Effect>) {
    let effects = match msg {
        Msg::SubmitRequested(input) => submit_requested(&mut state, input),
        Msg::SubmitCompleted { generation, reply } => {
            if !state.accepts(generation, Phase::Submitting) {
                return (state, Vec::new());
            }
            submit_completed(&mut state, generation, reply)
        }
        Msg::StatusReceived { generation, reply } => {
            if !state.accepts(generation, Phase::Polling) {
                return (state, Vec::new());
            }
            status_received(&mut state, generation, reply)
        }
        Msg::ResultReceived { generation, reply } => {
            if !state.accepts(generation, Phase::FetchingResult) {
                return (state, Vec::new());
            }
            match reply {
                Ok(result) => complete(&mut state, generation, result),
                Err(cause) => fail(&mut state, generation, AnalysisError::ResultFetch(cause)),
            }
        }
        Msg::DeadlineElapsed { generation } => {
            if state.generation() != generation || !state.phase().is_active() {
                return (state, Vec::new());
            }
            let budget = state.budget();
            fail(&mut state, generation, AnalysisError::Timeout { budget })
        }
        Msg::CancelRequested => {
            if !state.phase().is_active() {
                return (state, Vec::new());
            }
            let stale = state.generation();
            state.advance_generation();
            state.reset();
            vec![Effect::StopTimers { generation: stale }]
        }
    };

    (state, effects)
}

fn submit_requested(state: &mut PollerState, input: AnalysisInput) -> Vec<Effect> {
    let validated = input.validate();
    let mut effects = Vec::new();
    if state.phase().is_active() {
        // Bad input never disturbs the job already in flight.
        if let Err(error) = validated {
            return vec![Effect::RejectSubmission(error)];
        }
        match state.settings().policy {
            ConcurrencyPolicy::Reject => {
                return vec![Effect::RejectSubmission(AnalysisError::Busy)];
            }
            ConcurrencyPolicy::CancelPrevious => {
                effects.push(Effect::StopTimers {
                    generation: state.generation(),
                });
            }
        }
    }

    let generation = state.advance_generation();
    match validated {
        Ok(request) => {
            let budget = state.settings().budget_for(request.analysis_mode);
            state.begin_submission(&request, budget);
            effects.push(Effect::ArmDeadline { generation, budget });
            effects.push(Effect::PostAnalysis {
                generation,
                request,
            });
        }
        Err(error) => {
            state.reset();
            let job = state.fail(error);
            effects.push(Effect::ReportTerminal { generation, job });
        }
    }
    effects
}

fn submit_completed(
    state: &mut PollerState,
    generation: Generation,
    reply: Result<AnalyzeReply, String>,
) -> Vec<Effect> {
    match reply {
        Ok(AnalyzeReply::Queued(job_id)) => {
            let job = state.start_polling(job_id.clone());
            vec![
                Effect::ReportProgress { generation, job },
                Effect::SchedulePoll {
                    generation,
                    job_id,
                    delay: state.settings().poll_interval,
                },
            ]
        }
        Ok(AnalyzeReply::Immediate(result)) => complete(state, generation, result),
        Err(cause) => fail(state, generation, AnalysisError::Submission(cause)),
    }
}

fn status_received(
    state: &mut PollerState,
    generation: Generation,
    reply: Result<StatusReply, String>,
) -> Vec<Effect> {
    let Some(job_id) = state.current_job_id() else {
        return Vec::new();
    };

    let reply = match reply {
        Ok(reply) => reply,
        Err(cause) => {
            let attempts = state.record_poll_failure();
            if attempts > state.settings().max_poll_retries {
                return fail(state, generation, AnalysisError::Polling { attempts, cause });
            }
            return vec![Effect::SchedulePoll {
                generation,
                job_id,
                delay: state.settings().poll_interval,
            }];
        }
    };

    let job = state.apply_status(&reply);
    match reply.status {
        JobStatus::Failed => {
            let reason = reply
                .error
                .or(reply.message)
                .unwrap_or_else(|| "backend reported failure".to_string());
            fail(state, generation, AnalysisError::JobFailed(reason))
        }
        JobStatus::Completed => {
            state.begin_fetch();
            vec![
                Effect::ReportProgress { generation, job },
                Effect::FetchResult { generation, job_id },
            ]
        }
        JobStatus::Queued | JobStatus::Running => vec![
            Effect::ReportProgress { generation, job },
            Effect::SchedulePoll {
                generation,
                job_id,
                delay: state.settings().poll_interval,
            },
        ],
    }
}

fn complete(state: &mut PollerState, generation: Generation, result: AnalysisResult) -> Vec<Effect> {
    let origin_url = state.origin_url();
    let job = state.complete(result.clone());
    vec![
        Effect::StopTimers { generation },
        Effect::PersistResult { result, origin_url },
        Effect::ReportTerminal { generation, job },
    ]
}

fn fail(state: &mut PollerState, generation: Generation, error: AnalysisError) -> Vec<Effect> {
    let job = state.fail(error);
    vec![
        Effect::StopTimers { generation },
        Effect::ReportTerminal { generation, job },
    ]
}
