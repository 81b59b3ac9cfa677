use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{AnalysisError, AnalysisResult};

/// Counter identifying one submit/poll sequence. Completions tagged with an
/// older generation are stale and must be dropped.
pub type Generation = u64;

/// Opaque, server-assigned job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    #[serde(alias = "pending")]
    Queued,
    #[serde(alias = "processing", alias = "in_progress")]
    Running,
    #[serde(alias = "complete", alias = "done")]
    Completed,
    #[serde(alias = "error")]
    Failed,
}

/// Life-cycle phase of the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Submitting,
    Polling,
    FetchingResult,
    Done,
    Failed,
}

impl Phase {
    /// A job is in flight; timers and requests may still be outstanding.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Phase::Submitting | Phase::Polling | Phase::FetchingResult
        )
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Job {
    pub job_id: Option<JobId>,
    pub status: JobStatus,
    /// Highest progress the backend reported. Set to 100 locally once the
    /// result has been received, whatever the backend last said.
    pub progress_percent: u8,
    pub message: String,
    pub claims_checked: Option<u32>,
    pub result: Option<AnalysisResult>,
    pub error: Option<AnalysisError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    #[default]
    News,
    Transcript,
}

/// Caller input for one analysis. At least one of `url` or `text` must be non-blank.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnalysisInput {
    pub url: Option<String>,
    pub text: Option<String>,
    pub mode: AnalysisMode,
}

impl AnalysisInput {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: AnalysisMode) -> Self {
        self.mode = mode;
        self
    }

    /// Trims both fields and builds the request body, or explains why it cannot.
    pub fn validate(&self) -> Result<AnalyzeRequest, AnalysisError> {
        let url = non_blank(self.url.as_deref());
        let text = non_blank(self.text.as_deref());

        if url.is_none() && text.is_none() {
            return Err(AnalysisError::Validation(
                "provide an article url or text to analyze".to_string(),
            ));
        }

        if let Some(raw) = url.as_deref() {
            let parsed = Url::parse(raw)
                .map_err(|err| AnalysisError::Validation(format!("invalid url {raw:?}: {err}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(AnalysisError::Validation(format!(
                    "unsupported url scheme {:?}",
                    parsed.scheme()
                )));
            }
        }

        Ok(AnalyzeRequest {
            url,
            text,
            analysis_mode: self.mode,
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
}

/// Body of `POST /api/analyze`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub analysis_mode: AnalysisMode,
}

/// The analyze endpoint either queues a job or answers inline.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyzeReply {
    Queued(JobId),
    Immediate(AnalysisResult),
}

/// Body of a status poll response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReply {
    pub status: JobStatus,
    #[serde(default)]
    pub progress: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub claims_checked: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StatusReply {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            progress: None,
            message: None,
            claims_checked: None,
            error: None,
        }
    }

    pub fn with_progress(mut self, progress: i64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
