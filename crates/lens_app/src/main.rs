mod app;
mod config;
mod render;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use lens_logging::{lens_info, LogDestination};

use crate::config::{LensConfig, DEFAULT_CONFIG_FILE};

/// Credibility analysis client: submit articles or transcripts and inspect the
/// most recent result.
#[derive(Debug, Parser)]
#[command(name = "truthlens", version)]
pub struct Cli {
    /// Path to the RON config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,
    /// Override the analysis service base URL.
    #[arg(long, global = true, env = "TRUTHLENS_BASE_URL")]
    pub base_url: Option<String>,
    /// Override the durable cache directory.
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,
    /// Also log to the terminal.
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Submit an article URL, text or transcript and wait for the result.
    Analyze {
        #[arg(long)]
        url: Option<String>,
        #[arg(long, conflicts_with = "text_file")]
        text: Option<String>,
        /// Read the text to analyze from a file.
        #[arg(long)]
        text_file: Option<PathBuf>,
        /// Analyze as a transcript (longer budget).
        #[arg(long)]
        transcript: bool,
    },
    /// Show the cached result without contacting the service.
    Show {
        /// Print one service section of the detailed analysis.
        #[arg(long)]
        service: Option<String>,
        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Remove the cached result.
    Clear,
    /// Download a server-side export of a finished job.
    Export {
        #[arg(long)]
        job: String,
        #[arg(long, default_value = "pdf")]
        format: lens_engine::ExportFormat,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// Write the cached result and its provenance as JSON.
    ExportCached {
        #[arg(long, default_value = ".")]
        out: PathBuf,
        #[arg(long, default_value = "truthlens-analysis.json")]
        file: String,
    },
    /// Write a config file holding the effective settings.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (mut config, source) = match LensConfig::load(&cli.config) {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(cache_dir) = &cli.cache_dir {
        config.cache_dir = Some(cache_dir.clone());
    }

    let destination = if cli.verbose {
        LogDestination::Both
    } else {
        LogDestination::File
    };
    lens_logging::initialize(destination, log::LevelFilter::Info, &config.log_file);
    lens_info!("Configuration from {}", source);

    match app::run(cli, config).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
