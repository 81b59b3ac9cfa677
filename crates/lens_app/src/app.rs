use std::fs;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use lens_core::{AnalysisInput, AnalysisMode, JobId};
use lens_engine::{
    export_cached_json, export_job, Accepted, ExportError, JobPoller, ReqwestAnalysisApi,
    ResultCache,
};
use lens_logging::{lens_info, lens_warn};
use tokio::sync::mpsc;

use crate::config::LensConfig;
use crate::render;
use crate::{Cli, Command};

pub async fn run(cli: Cli, config: LensConfig) -> anyhow::Result<ExitCode> {
    match cli.command {
        Command::Analyze {
            url,
            text,
            text_file,
            transcript,
        } => {
            let text = match text_file {
                Some(path) => Some(
                    fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?,
                ),
                None => text,
            };
            let mode = if transcript {
                AnalysisMode::Transcript
            } else {
                AnalysisMode::News
            };
            analyze(&config, AnalysisInput { url, text, mode }).await
        }
        Command::Show { service, json } => show(&config, service.as_deref(), json),
        Command::Clear => {
            open_cache(&config).clear();
            println!("Cached analysis cleared.");
            Ok(ExitCode::SUCCESS)
        }
        Command::Export { job, format, out } => {
            let api = ReqwestAnalysisApi::new(config.api_settings())?;
            let summary = export_job(&api, format, &JobId::new(job), &out).await?;
            println!(
                "Wrote {} ({} bytes)",
                summary.output_path.display(),
                summary.bytes_written
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::ExportCached { out, file } => {
            match export_cached_json(&open_cache(&config), &out, &file) {
                Ok(summary) => {
                    println!("Wrote {}", summary.output_path.display());
                    Ok(ExitCode::SUCCESS)
                }
                Err(ExportError::NothingCached) => {
                    println!("No cached analysis to export.");
                    Ok(ExitCode::FAILURE)
                }
                Err(err) => Err(err.into()),
            }
        }
        Command::InitConfig { force } => {
            if cli.config.exists() && !force {
                bail!(
                    "{} already exists (pass --force to overwrite)",
                    cli.config.display()
                );
            }
            let path = config.write(&cli.config)?;
            println!("Wrote {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn open_cache(config: &LensConfig) -> ResultCache {
    ResultCache::with_dir(config.cache_dir(), config.cache_settings())
}

async fn analyze(config: &LensConfig, input: AnalysisInput) -> anyhow::Result<ExitCode> {
    let api = Arc::new(ReqwestAnalysisApi::new(config.api_settings())?);
    let cache = Arc::new(open_cache(config));
    let poller = JobPoller::new(api, cache.clone(), config.poll_settings());

    poller.on_progress(|job| println!("{}", render::progress_line(job)));
    let (tx, mut terminal) = mpsc::unbounded_channel();
    poller.on_terminal(move |job| {
        let _ = tx.send(job.clone());
    });

    match poller.submit(input).await {
        Ok(Accepted::Job(job_id)) => lens_info!("Submitted job {}", job_id),
        Ok(Accepted::Immediate) => {}
        // Errors that ended a job are reported once, through the terminal job.
        Err(err) if terminal.is_empty() => {
            println!("{}", render::failure(&err));
            return Ok(ExitCode::FAILURE);
        }
        Err(_) => {}
    }

    let job = tokio::select! {
        job = terminal.recv() => job,
        _ = tokio::signal::ctrl_c() => {
            poller.cancel();
            println!("Cancelled.");
            return Ok(ExitCode::FAILURE);
        }
    };
    let Some(job) = job else {
        bail!("analysis ended without a result");
    };

    if let Some(error) = &job.error {
        println!("{}", render::failure(error));
        return Ok(ExitCode::FAILURE);
    }
    match &job.result {
        Some(result) => {
            print!("{}", render::summary(result, cache.entry().as_ref()));
            if let Some(job_id) = &job.job_id {
                println!("Job: {job_id} (use `truthlens export --job {job_id}` for a report)");
            }
            Ok(ExitCode::SUCCESS)
        }
        None => {
            lens_warn!("Terminal job carried neither result nor error");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn show(config: &LensConfig, service: Option<&str>, json: bool) -> anyhow::Result<ExitCode> {
    let cache = open_cache(config);
    let Some(result) = cache.load() else {
        println!("No cached analysis. Run `truthlens analyze` first.");
        return Ok(ExitCode::FAILURE);
    };

    if let Some(name) = service {
        return match result.service(name) {
            Some(section) => {
                println!("{}", serde_json::to_string_pretty(section)?);
                Ok(ExitCode::SUCCESS)
            }
            None => {
                let available = result.service_names();
                if available.is_empty() {
                    println!("The cached analysis has no per-service breakdown.");
                } else {
                    println!(
                        "No section for {name:?}. Available: {}",
                        available.join(", ")
                    );
                }
                Ok(ExitCode::FAILURE)
            }
        };
    }

    if json {
        println!("{}", serde_json::to_string_pretty(result.as_value())?);
    } else {
        if !result.is_displayable() {
            lens_warn!("Cached analysis has none of the expected top-level keys");
        }
        print!("{}", render::summary(&result, cache.entry().as_ref()));
    }
    Ok(ExitCode::SUCCESS)
}
