//! Terminal rendering of jobs and cached results.
use chrono::{DateTime, Local, Utc};
use lens_core::{AnalysisError, AnalysisResult, Job, JobStatus};
use lens_engine::CacheEntry;

const BAR_WIDTH: usize = 30;

pub fn progress_line(job: &Job) -> String {
    let filled = usize::from(job.progress_percent) * BAR_WIDTH / 100;
    let status = match job.status {
        JobStatus::Queued => "queued",
        JobStatus::Running => "running",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
    };
    let mut line = format!(
        "[{}{}] {:>3}% {}",
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH - filled),
        job.progress_percent,
        status
    );
    if !job.message.is_empty() {
        line.push_str(" - ");
        line.push_str(&job.message);
    }
    if let Some(claims) = job.claims_checked {
        line.push_str(&format!(" ({claims} claims checked)"));
    }
    line
}

pub fn failure(error: &AnalysisError) -> String {
    let hint = match error {
        AnalysisError::Validation(_) => "check the url or text you passed",
        AnalysisError::Submission(_) | AnalysisError::Polling { .. } => {
            "is the analysis service reachable?"
        }
        AnalysisError::Timeout { .. } => "try again later or raise the budget in truthlens.ron",
        AnalysisError::JobFailed(_) | AnalysisError::ResultFetch(_) => "the service gave up",
        AnalysisError::Busy | AnalysisError::Cancelled => "nothing was analyzed",
    };
    format!("Analysis failed: {error} ({hint})")
}

pub fn summary(result: &AnalysisResult, entry: Option<&CacheEntry>) -> String {
    let mut out = String::new();
    match result.trust_score() {
        Some(score) => out.push_str(&format!("Trust score: {score:.0}/100\n")),
        None => out.push_str("Trust score: n/a\n"),
    }
    if let Some(summary) = result
        .as_value()
        .get("article_summary")
        .and_then(|v| v.as_str())
    {
        out.push_str(&format!("Summary: {summary}\n"));
    }
    let services = result.service_names();
    if !services.is_empty() {
        out.push_str(&format!("Services: {}\n", services.join(", ")));
    }
    if let Some(entry) = entry {
        out.push_str(&format!(
            "Source: {}\nCached: {} (expires {})\n",
            entry.origin_url,
            local_time(entry.saved_at_millis),
            local_time(entry.expires_at_millis)
        ));
    }
    out
}

fn local_time(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|at| at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
