//! Snapconvert - Batch Image and Video Conversion
//!
//! Command-line entry point: converts batches of files, probes media
//! details, and checks the external ffmpeg tools.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use snapconvert::cli::{self, Args, Commands};
use snapconvert::config::Config;
use snapconvert::engine::{BatchEngine, BatchReport, BatchRequest};
use snapconvert::media::{self, MediaProber, ToolStatus};
use snapconvert::progress::{FnSink, ProgressEvent};
use snapconvert::selection::FileSelection;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Setup logging to both console and file
    let _guard = setup_logging(args.verbose)?;

    let config = Config::load(args.config.as_deref())?;

    match args.command {
        Commands::Convert {
            inputs,
            output,
            format,
            converter_type,
            jobs,
            timeout,
            json,
        } => {
            let converter_type = cli::resolve_converter_type(converter_type, &format)?;
            let files = cli::expand_inputs(&inputs, Some(converter_type));
            if files.is_empty() {
                println!("No {} files found in the given inputs.", converter_type);
                return Ok(ExitCode::SUCCESS);
            }

            warn_if_unavailable(&config).await;

            let cancel = CancellationToken::new();
            spawn_ctrl_c_handler(cancel.clone());

            let request = BatchRequest::new(files, output, &format, converter_type)
                .with_concurrency_limit(jobs.or(config.conversion.concurrency_limit))
                .with_task_timeout(
                    timeout
                        .map(std::time::Duration::from_secs)
                        .or_else(|| config.conversion.task_timeout()),
                )
                .with_cancellation(cancel);

            let bar = progress_bar(request.inputs.len() as u64, json)?;
            let sink_bar = bar.clone();
            let sink = FnSink(move |event: &ProgressEvent| {
                sink_bar.set_position(event.completed as u64);
                sink_bar.set_message(event.message.clone());
            });

            let engine = BatchEngine::from_config(&config);
            let report = engine.run(request, sink).await?;
            bar.finish_and_clear();

            if json {
                println!("{}", report.to_json()?);
            } else {
                print_report(&report);
            }

            if !report.all_succeeded() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Probe { inputs, json } => {
            warn_if_unavailable(&config).await;

            let prober = MediaProber::new(config.tools.ffprobe_path.clone())
                .with_timeout(config.conversion.probe_timeout());
            let mut selection = FileSelection::new(prober, config.conversion.probe_concurrency);
            let files = cli::expand_inputs(&inputs, None);
            selection.add(&files).await;

            if json {
                println!("{}", serde_json::to_string_pretty(selection.entries())?);
            } else {
                println!(
                    "\n{:<30} {:<6} {:<12} {:<12} {:<10}",
                    "Name", "Type", "Size", "Resolution", "Duration"
                );
                println!("{}", "-".repeat(74));
                for details in selection.entries() {
                    println!(
                        "{:<30} {:<6} {:<12} {:<12} {:<10}",
                        details.name, details.file_type, details.size, details.resolution, details.duration
                    );
                    if let Some(error) = &details.error {
                        println!("  ! {}", error);
                    }
                }
            }
        }
        Commands::Tools => {
            let statuses = check_tools(&config).await;
            println!("\n{:<10} {:<40} {:<10}", "Tool", "Path", "Status");
            println!("{}", "-".repeat(80));
            for status in &statuses {
                let path = status
                    .resolved_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| status.configured_path.clone());
                let state = match (&status.version, &status.error) {
                    (Some(version), _) => version.clone(),
                    (None, Some(error)) => format!("Missing ({})", error),
                    (None, None) => "Missing".to_string(),
                };
                println!("{:<10} {:<40} {}", status.name, path, state);
            }

            if statuses.iter().any(|s| !s.available()) {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::InitConfig { path } => {
            write_default_config(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Setup logging to both console and file. The returned guard flushes the
/// file writer when dropped.
fn setup_logging(verbose: bool) -> Result<WorkerGuard> {
    let log_dir = std::env::current_dir()?.join(".snapconvert").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Daily rotation
    let file_appender = rolling::daily(&log_dir, "snapconvert.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("snapconvert.log").display()
    );

    Ok(guard)
}

fn progress_bar(total: u64, hidden: bool) -> Result<ProgressBar> {
    if hidden {
        return Ok(ProgressBar::hidden());
    }

    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {wide_msg}")?
            .progress_chars("#>-"),
    );
    Ok(bar)
}

fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling remaining conversions...");
            cancel.cancel();
        }
    });
}

async fn check_tools(config: &Config) -> Vec<ToolStatus> {
    let (ffmpeg, ffprobe) = tokio::join!(
        media::check_tool("ffmpeg", &config.tools.ffmpeg_path),
        media::check_tool("ffprobe", &config.tools.ffprobe_path),
    );
    vec![ffmpeg, ffprobe]
}

/// Warn about every tool that cannot be run.
async fn warn_if_unavailable(config: &Config) {
    let statuses = check_tools(config).await;
    for status in statuses.iter().filter(|s| !s.available()) {
        warn!(
            "{} not found at '{}'. Please install FFmpeg or set its path in {}",
            status.name,
            status.configured_path,
            snapconvert::config::DEFAULT_CONFIG_FILE
        );
        if status.name == "ffprobe" {
            warn!("Media details (size, resolution, duration) will be unavailable");
        }
    }
}

fn print_report(report: &BatchReport) {
    println!(
        "\nBatch {} finished in {:.2}s: {}",
        report.batch_id,
        report.elapsed_ms as f64 / 1000.0,
        report.summary()
    );

    let failed: Vec<_> = report.failed().collect();
    if !failed.is_empty() {
        println!("\nFailed files:");
        for outcome in failed {
            println!(
                "  {}: {}",
                outcome.input_name(),
                outcome.error_detail.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

fn write_default_config(path: &Path) -> Result<()> {
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    Config::default().save_to_file(path)?;
    Ok(())
}
