use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::time::Duration;

use lens_core::{
    AnalysisError, AnalysisInput, AnalysisResult, AnalyzeReply, AnalyzeRequest,
    ConcurrencyPolicy, Job, JobId, JobStatus, Phase, PollSettings, StatusReply,
};
use lens_engine::{
    Accepted, AnalysisApi, ApiError, CacheEvent, CacheSettings, CacheTier, ExportFormat,
    FailureKind, JobPoller, MemoryStore, ResultCache, StorageBackend, StorageError, SystemClock,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

/// Backend double that answers from a script and records every call.
#[derive(Default)]
struct ScriptedApi {
    immediate: Option<AnalysisResult>,
    analyze_failure: Option<ApiError>,
    statuses: Mutex<VecDeque<Result<StatusReply, ApiError>>>,
    status_delay: Duration,
    result: Option<AnalysisResult>,
    analyze_calls: AtomicUsize,
    status_calls: Mutex<Vec<String>>,
    result_calls: AtomicUsize,
}

impl ScriptedApi {
    fn with_statuses(statuses: Vec<Result<StatusReply, ApiError>>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            ..Self::default()
        }
    }

    fn status_count(&self) -> usize {
        self.status_calls.lock().unwrap().len()
    }

    fn status_count_for(&self, job: &str) -> usize {
        self.status_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == job)
            .count()
    }
}

#[async_trait::async_trait]
impl AnalysisApi for ScriptedApi {
    async fn analyze(&self, _request: &AnalyzeRequest) -> Result<AnalyzeReply, ApiError> {
        let call = self.analyze_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(err) = &self.analyze_failure {
            return Err(err.clone());
        }
        if let Some(result) = &self.immediate {
            return Ok(AnalyzeReply::Immediate(result.clone()));
        }
        Ok(AnalyzeReply::Queued(JobId::new(format!("job-{call}"))))
    }

    async fn status(&self, job_id: &JobId) -> Result<StatusReply, ApiError> {
        self.status_calls
            .lock()
            .unwrap()
            .push(job_id.as_str().to_string());
        if !self.status_delay.is_zero() {
            tokio::time::sleep(self.status_delay).await;
        }
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(StatusReply::new(JobStatus::Running)))
    }

    async fn results(&self, _job_id: &JobId) -> Result<AnalysisResult, ApiError> {
        self.result_calls.fetch_add(1, Ordering::SeqCst);
        self.result
            .clone()
            .ok_or_else(|| ApiError::new(FailureKind::Rejected, "no result"))
    }

    async fn export(&self, _format: ExportFormat, _job_id: &JobId) -> Result<Vec<u8>, ApiError> {
        Ok(Vec::new())
    }
}

struct Harness {
    api: Arc<ScriptedApi>,
    cache: Arc<ResultCache>,
    poller: JobPoller,
    progress: Arc<Mutex<Vec<Job>>>,
    terminal_count: Arc<AtomicUsize>,
    terminal_rx: mpsc::UnboundedReceiver<Job>,
}

fn settings() -> PollSettings {
    PollSettings {
        poll_interval: Duration::from_secs(1),
        news_budget: Duration::from_secs(10),
        transcript_budget: Duration::from_secs(60),
        max_poll_retries: 3,
        policy: ConcurrencyPolicy::CancelPrevious,
    }
}

fn harness(api: ScriptedApi, settings: PollSettings) -> Harness {
    lens_logging::initialize_for_tests();
    let api = Arc::new(api);
    let cache = Arc::new(ResultCache::new(
        vec![CacheTier::session(Arc::new(MemoryStore::new()))],
        Arc::new(SystemClock),
        CacheSettings::default(),
    ));
    let poller = JobPoller::new(api.clone(), cache.clone(), settings);

    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = progress.clone();
    poller.on_progress(move |job| sink.lock().unwrap().push(job.clone()));

    let terminal_count = Arc::new(AtomicUsize::new(0));
    let (tx, terminal_rx) = mpsc::unbounded_channel();
    let count = terminal_count.clone();
    poller.on_terminal(move |job| {
        count.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send(job.clone());
    });

    Harness {
        api,
        cache,
        poller,
        progress,
        terminal_count,
        terminal_rx,
    }
}

#[tokio::test(start_paused = true)]
async fn completed_job_is_cached_and_reported_once() {
    let mut api = ScriptedApi::with_statuses(vec![
        Ok(StatusReply::new(JobStatus::Running).with_progress(40)),
        Ok(StatusReply::new(JobStatus::Completed).with_progress(100)),
    ]);
    let result = AnalysisResult::new(json!({ "trust_score": 72 }));
    api.result = Some(result.clone());
    let mut h = harness(api, settings());
    let mut saved = h.cache.subscribe();

    let accepted = h
        .poller
        .submit(AnalysisInput::text("short article"))
        .await
        .unwrap();
    assert_eq!(accepted, Accepted::Job(JobId::new("job-1")));

    let job = h.terminal_rx.recv().await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.result, Some(result.clone()));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.terminal_count.load(Ordering::SeqCst), 1);
    assert_eq!(h.api.status_count(), 2);
    assert_eq!(h.api.result_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.cache.load(), Some(result));
    assert!(matches!(saved.try_recv(), Ok(CacheEvent::Saved { .. })));
    assert!(saved.try_recv().is_err());

    let reported: Vec<u8> = h
        .progress
        .lock()
        .unwrap()
        .iter()
        .map(|job| job.progress_percent)
        .collect();
    assert_eq!(reported, vec![0, 40, 100]);
    assert!(h.poller.view().can_submit);
}

#[tokio::test(start_paused = true)]
async fn timeout_fails_job_and_stops_polling() {
    let mut h = harness(ScriptedApi::default(), settings());

    h.poller.submit(AnalysisInput::text("endless")).await.unwrap();
    let job = h.terminal_rx.recv().await.unwrap();

    assert_eq!(
        job.error,
        Some(AnalysisError::Timeout {
            budget: Duration::from_secs(10)
        })
    );
    let calls_at_timeout = h.api.status_count();
    assert!(calls_at_timeout > 0);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.api.status_count(), calls_at_timeout);
    assert_eq!(h.terminal_count.load(Ordering::SeqCst), 1);
    assert_eq!(h.poller.view().phase, Phase::Failed);
    assert_eq!(h.cache.load(), None);
}

#[tokio::test(start_paused = true)]
async fn cancel_discards_in_flight_poll() {
    let api = ScriptedApi {
        status_delay: Duration::from_secs(5),
        ..ScriptedApi::with_statuses(vec![Ok(StatusReply::new(JobStatus::Completed))])
    };
    let h = harness(api, settings());

    h.poller.submit(AnalysisInput::text("article")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.api.status_count(), 1);
    let progress_before = h.progress.lock().unwrap().len();

    assert!(h.poller.cancel());
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(h.progress.lock().unwrap().len(), progress_before);
    assert_eq!(h.terminal_count.load(Ordering::SeqCst), 0);
    assert_eq!(h.api.status_count(), 1);
    assert_eq!(h.api.result_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.poller.view().phase, Phase::Idle);
    assert!(!h.poller.cancel());
}

#[tokio::test(start_paused = true)]
async fn empty_input_is_rejected_before_any_request() {
    let mut h = harness(ScriptedApi::default(), settings());

    let err = h
        .poller
        .submit(AnalysisInput {
            url: Some(String::new()),
            text: Some("  ".to_string()),
            ..AnalysisInput::default()
        })
        .await
        .unwrap_err();

    assert!(matches!(err, AnalysisError::Validation(_)));
    assert_eq!(h.api.analyze_calls.load(Ordering::SeqCst), 0);
    let job = h.terminal_rx.recv().await.unwrap();
    assert_eq!(job.error, Some(err));
    assert!(h.poller.view().can_submit);
}

#[tokio::test(start_paused = true)]
async fn submission_failure_is_surfaced_once() {
    let api = ScriptedApi {
        analyze_failure: Some(ApiError::new(FailureKind::HttpStatus(502), "bad gateway")),
        ..ScriptedApi::default()
    };
    let mut h = harness(api, settings());

    let err = h.poller.submit(AnalysisInput::text("article")).await.unwrap_err();

    assert!(matches!(err, AnalysisError::Submission(ref cause) if cause.contains("502")));
    assert_eq!(h.terminal_rx.recv().await.unwrap().error, Some(err));
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.terminal_count.load(Ordering::SeqCst), 1);
    assert_eq!(h.api.status_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn immediate_answer_skips_polling() {
    let result = AnalysisResult::new(json!({ "trust_score": 55 }));
    let api = ScriptedApi {
        immediate: Some(result.clone()),
        ..ScriptedApi::default()
    };
    let h = harness(api, settings());

    let accepted = h
        .poller
        .submit(AnalysisInput::url("https://news.example.com/story"))
        .await
        .unwrap();

    assert_eq!(accepted, Accepted::Immediate);
    assert_eq!(h.terminal_count.load(Ordering::SeqCst), 1);
    assert_eq!(h.cache.load(), Some(result));
    assert_eq!(h.api.status_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn repeated_poll_errors_escalate() {
    let failures = (0..4)
        .map(|_| Err(ApiError::new(FailureKind::HttpStatus(503), "unavailable")))
        .collect();
    let mut h = harness(ScriptedApi::with_statuses(failures), settings());

    h.poller.submit(AnalysisInput::text("article")).await.unwrap();
    let job = h.terminal_rx.recv().await.unwrap();

    match job.error {
        Some(AnalysisError::Polling { attempts, .. }) => assert_eq!(attempts, 4),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(h.api.status_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn reject_policy_refuses_second_submit() {
    let settings = PollSettings {
        policy: ConcurrencyPolicy::Reject,
        ..settings()
    };
    let h = harness(ScriptedApi::default(), settings);

    h.poller.submit(AnalysisInput::text("first")).await.unwrap();
    let err = h.poller.submit(AnalysisInput::text("second")).await.unwrap_err();

    assert_eq!(err, AnalysisError::Busy);
    assert_eq!(h.api.analyze_calls.load(Ordering::SeqCst), 1);
    assert!(h.poller.is_active());
    h.poller.cancel();
}

#[tokio::test(start_paused = true)]
async fn new_submit_replaces_running_job() {
    let mut h = harness(ScriptedApi::default(), settings());

    h.poller.submit(AnalysisInput::text("first")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    let first_polls = h.api.status_count_for("job-1");
    assert!(first_polls > 0);

    let accepted = h.poller.submit(AnalysisInput::text("second")).await.unwrap();
    assert_eq!(accepted, Accepted::Job(JobId::new("job-2")));

    let job = h.terminal_rx.recv().await.unwrap();
    assert_eq!(job.job_id, Some(JobId::new("job-2")));
    assert!(job.error.unwrap().is_timeout());
    assert_eq!(h.api.status_count_for("job-1"), first_polls);
    assert!(h.api.status_count_for("job-2") > 0);
    assert_eq!(h.terminal_count.load(Ordering::SeqCst), 1);
}

/// Session store whose first write parks until the test releases it.
struct GatedStore {
    inner: MemoryStore,
    entered: Mutex<Option<oneshot::Sender<()>>>,
    release: Mutex<std_mpsc::Receiver<()>>,
}

impl StorageBackend for GatedStore {
    fn name(&self) -> &str {
        "gated"
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let entered = self.entered.lock().unwrap().take();
        if let Some(entered) = entered {
            let _ = entered.send(());
            let _ = self.release.lock().unwrap().recv();
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.inner.remove(key)
    }
}

fn fast_settings() -> PollSettings {
    PollSettings {
        poll_interval: Duration::from_millis(10),
        ..settings()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn finished_job_is_reported_even_if_resubmitted_while_saving() {
    lens_logging::initialize_for_tests();
    let mut api = ScriptedApi::with_statuses(vec![Ok(StatusReply::new(JobStatus::Completed))]);
    let result = AnalysisResult::new(json!({ "trust_score": 81 }));
    api.result = Some(result.clone());
    let (entered_tx, entered_rx) = oneshot::channel();
    let (release_tx, release_rx) = std_mpsc::channel();
    let store = Arc::new(GatedStore {
        inner: MemoryStore::new(),
        entered: Mutex::new(Some(entered_tx)),
        release: Mutex::new(release_rx),
    });
    let cache = Arc::new(ResultCache::new(
        vec![CacheTier::session(store)],
        Arc::new(SystemClock),
        CacheSettings::default(),
    ));
    let poller = JobPoller::new(Arc::new(api), cache.clone(), fast_settings());
    let (tx, mut terminal_rx) = mpsc::unbounded_channel();
    poller.on_terminal(move |job| {
        let _ = tx.send(job.clone());
    });

    poller.submit(AnalysisInput::text("first")).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), entered_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(poller.view().phase, Phase::Done);

    let accepted = poller.submit(AnalysisInput::text("second")).await.unwrap();
    assert_eq!(accepted, Accepted::Job(JobId::new("job-2")));
    release_tx.send(()).unwrap();

    let job = tokio::time::timeout(Duration::from_secs(5), terminal_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.job_id, Some(JobId::new("job-1")));
    assert_eq!(job.result, Some(result.clone()));
    assert_eq!(cache.load(), Some(result));
    poller.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_waits_for_progress_delivery_in_progress() {
    lens_logging::initialize_for_tests();
    let api = ScriptedApi::with_statuses(vec![Ok(
        StatusReply::new(JobStatus::Running).with_progress(40)
    )]);
    let poller = JobPoller::new(
        Arc::new(api),
        Arc::new(ResultCache::new(
            vec![CacheTier::session(Arc::new(MemoryStore::new()))],
            Arc::new(SystemClock),
            CacheSettings::default(),
        )),
        fast_settings(),
    );
    let log = Arc::new(Mutex::new(Vec::new()));
    let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
    let parked = Arc::new(AtomicBool::new(false));
    let sink = log.clone();
    poller.on_progress(move |job| {
        if job.progress_percent == 40 && !parked.swap(true, Ordering::SeqCst) {
            let _ = entered_tx.send(());
            std::thread::sleep(Duration::from_millis(200));
        }
        sink.lock().unwrap().push(format!("progress {}", job.progress_percent));
    });

    poller.submit(AnalysisInput::text("article")).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), entered_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(poller.cancel());
    log.lock().unwrap().push("cancelled".to_string());
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "progress 0".to_string(),
            "progress 40".to_string(),
            "cancelled".to_string()
        ]
    );
}
