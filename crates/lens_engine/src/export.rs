use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use lens_core::JobId;
use serde_json::json;
use thiserror::Error;

use crate::api::AnalysisApi;
use crate::cache::ResultCache;
use crate::persist::{AtomicFileWriter, PersistError};
use crate::{ApiError, ExportFormat};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("download failed: {0}")]
    Download(#[from] ApiError),
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("no cached analysis to export")]
    NothingCached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub output_path: PathBuf,
    pub bytes_written: u64,
}

/// File name for a server-side export: `analysis-{job}.{ext}`.
pub fn export_filename(job_id: &JobId, format: ExportFormat) -> String {
    let safe: String = job_id
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("analysis-{safe}.{}", format.as_str())
}

/// Downloads the backend's rendering of a finished job into `dir`.
pub async fn export_job(
    api: &dyn AnalysisApi,
    format: ExportFormat,
    job_id: &JobId,
    dir: &Path,
) -> Result<ExportSummary, ExportError> {
    let bytes = api.export(format, job_id).await?;
    let writer = AtomicFileWriter::new(dir.to_path_buf());
    let output_path = writer.write(&export_filename(job_id, format), &bytes)?;
    Ok(ExportSummary {
        output_path,
        bytes_written: bytes.len() as u64,
    })
}

/// Writes the cached analysis, with its provenance, as pretty JSON.
pub fn export_cached_json(
    cache: &ResultCache,
    dir: &Path,
    filename: &str,
) -> Result<ExportSummary, ExportError> {
    let document = match cache.entry() {
        Some(entry) => json!({
            "origin_url": entry.origin_url,
            "saved_at": format_millis(entry.saved_at_millis),
            "expires_at": format_millis(entry.expires_at_millis),
            "result": entry.payload,
        }),
        // The session copy carries no provenance.
        None => match cache.load() {
            Some(result) => json!({ "result": result }),
            None => return Err(ExportError::NothingCached),
        },
    };

    let content = serde_json::to_string_pretty(&document)?;
    let writer = AtomicFileWriter::new(dir.to_path_buf());
    let output_path = writer.write(filename, content.as_bytes())?;
    Ok(ExportSummary {
        output_path,
        bytes_written: content.len() as u64,
    })
}

fn format_millis(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| millis.to_string())
}
