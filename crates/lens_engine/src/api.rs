use std::time::Duration;

use futures_util::StreamExt;
use lens_core::{AnalysisResult, AnalyzeReply, AnalyzeRequest, JobId, StatusReply};
use lens_logging::lens_debug;
use reqwest::{Response, Url};
use serde_json::Value;

use crate::{ApiError, ExportFormat, FailureKind};

const ERROR_BODY_LIMIT: usize = 200;

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_export_bytes: u64,
    pub analyze_path: String,
    /// Prefix of the `status/{id}` and `results/{id}` endpoints.
    pub jobs_prefix: String,
    pub export_prefix: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_export_bytes: 20 * 1024 * 1024,
            analyze_path: "/api/analyze".to_string(),
            jobs_prefix: "/api/transcript".to_string(),
            export_prefix: "/api/export".to_string(),
        }
    }
}

/// Remote analysis backend.
#[async_trait::async_trait]
pub trait AnalysisApi: Send + Sync {
    async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalyzeReply, ApiError>;
    async fn status(&self, job_id: &JobId) -> Result<StatusReply, ApiError>;
    async fn results(&self, job_id: &JobId) -> Result<AnalysisResult, ApiError>;
    async fn export(&self, format: ExportFormat, job_id: &JobId) -> Result<Vec<u8>, ApiError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestAnalysisApi {
    settings: ApiSettings,
    base_url: Url,
    client: reqwest::Client,
}

impl ReqwestAnalysisApi {
    pub fn new(settings: ApiSettings) -> Result<Self, ApiError> {
        let base_url = Url::parse(&settings.base_url)
            .map_err(|err| ApiError::new(FailureKind::InvalidUrl, err.to_string()))?;
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| ApiError::new(FailureKind::Network, err.to_string()))?;
        Ok(Self {
            settings,
            base_url,
            client,
        })
    }

    /// `{base}{prefix}/{segments...}` with each segment percent-encoded.
    fn endpoint(&self, prefix: &str, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self
            .base_url
            .join(prefix)
            .map_err(|err| ApiError::new(FailureKind::InvalidUrl, err.to_string()))?;
        if !segments.is_empty() {
            let mut path = url.path_segments_mut().map_err(|()| {
                ApiError::new(FailureKind::InvalidUrl, "base url cannot carry a path")
            })?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    async fn get_json(&self, url: Url) -> Result<Value, ApiError> {
        lens_debug!("GET {}", url);
        let response = self.client.get(url).send().await.map_err(map_reqwest_error)?;
        read_json(response).await
    }
}

#[async_trait::async_trait]
impl AnalysisApi for ReqwestAnalysisApi {
    async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalyzeReply, ApiError> {
        let url = self.endpoint(&self.settings.analyze_path, &[])?;
        lens_debug!("POST {} mode={:?}", url, request.analysis_mode);
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        decode_analyze_reply(read_json(response).await?)
    }

    async fn status(&self, job_id: &JobId) -> Result<StatusReply, ApiError> {
        let url = self.endpoint(&self.settings.jobs_prefix, &["status", job_id.as_str()])?;
        let body = self.get_json(url).await?;
        serde_json::from_value(body)
            .map_err(|err| ApiError::new(FailureKind::Decode, err.to_string()))
    }

    async fn results(&self, job_id: &JobId) -> Result<AnalysisResult, ApiError> {
        let url = self.endpoint(&self.settings.jobs_prefix, &["results", job_id.as_str()])?;
        decode_results(self.get_json(url).await?)
    }

    async fn export(&self, format: ExportFormat, job_id: &JobId) -> Result<Vec<u8>, ApiError> {
        let url = self.endpoint(
            &self.settings.export_prefix,
            &[format.as_str(), job_id.as_str()],
        )?;
        lens_debug!("GET {}", url);
        let response = self.client.get(url).send().await.map_err(map_reqwest_error)?;
        let response = ensure_success(response).await?;

        let max_bytes = self.settings.max_export_bytes;
        if let Some(content_len) = response.content_length() {
            if content_len > max_bytes {
                return Err(ApiError::new(
                    FailureKind::TooLarge {
                        max_bytes,
                        actual: Some(content_len),
                    },
                    "export too large",
                ));
            }
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = bytes.len() as u64 + chunk.len() as u64;
            if next_len > max_bytes {
                return Err(ApiError::new(
                    FailureKind::TooLarge {
                        max_bytes,
                        actual: Some(next_len),
                    },
                    "export too large",
                ));
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }
}

async fn ensure_success(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    Err(ApiError::new(
        FailureKind::HttpStatus(status.as_u16()),
        snippet.trim().to_string(),
    ))
}

async fn read_json(response: Response) -> Result<Value, ApiError> {
    ensure_success(response)
        .await?
        .json::<Value>()
        .await
        .map_err(map_reqwest_error)
}

/// The analyze endpoint answers `{job_id}` for queued work, or the result inline,
/// optionally wrapped as `{success, results}`.
pub(crate) fn decode_analyze_reply(body: Value) -> Result<AnalyzeReply, ApiError> {
    if let Some(job_id) = body.get("job_id").and_then(Value::as_str) {
        if job_id.trim().is_empty() {
            return Err(ApiError::new(FailureKind::Decode, "empty job_id"));
        }
        return Ok(AnalyzeReply::Queued(JobId::new(job_id)));
    }
    if body.get("results").is_some() || body.get("success").is_some() {
        return decode_results(body).map(AnalyzeReply::Immediate);
    }
    if !body.is_object() {
        return Err(ApiError::new(
            FailureKind::Decode,
            "analysis reply is not an object",
        ));
    }
    Ok(AnalyzeReply::Immediate(AnalysisResult::new(body)))
}

pub(crate) fn decode_results(mut body: Value) -> Result<AnalysisResult, ApiError> {
    let success = body.get("success").and_then(Value::as_bool).unwrap_or(true);
    if !success {
        let reason = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("analysis unavailable");
        return Err(ApiError::new(FailureKind::Rejected, reason));
    }
    match body.get_mut("results").map(Value::take) {
        Some(Value::Null) | None => Err(ApiError::new(
            FailureKind::Decode,
            "response has no results",
        )),
        Some(results) => Ok(AnalysisResult::new(results)),
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        return ApiError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_decode() {
        return ApiError::new(FailureKind::Decode, err.to_string());
    }
    ApiError::new(FailureKind::Network, err.to_string())
}
