//! Concurrent batch conversion.
//!
//! [`BatchEngine::run`] converts every input of a [`BatchRequest`] with the
//! strategy selected by its converter type. At most `concurrency_limit`
//! conversions run at once. A failing, panicking, timed out, or cancelled
//! file becomes a failed [`ConversionOutcome`]; it never stops the others.
//!
//! Workers send their outcome over a channel. The `run` future alone owns the
//! completed counter and the outcome list, and reports progress after every
//! file through a [`ProgressReporter`].
//!
//! A concurrency slot stays taken until the conversion has really stopped,
//! including blocking work that outlived a timeout. `run` returns only after
//! every slot is free again, and dropping the `run` future aborts its jobs.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::{Config, ToolsConfig};
use crate::converter::{
    ConversionTask, ConvertError, Converter, ConverterFactory, ConverterType, TaskLease,
};
use crate::error::{Result, SnapError};
use crate::paths::{PathReservations, output_path_for};
use crate::progress::{ProgressReporter, ProgressSink};

/// Concurrency used when the request does not set one: the number of
/// logical CPUs, or 4 when that cannot be determined.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Everything a caller supplies for one batch.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub inputs: Vec<PathBuf>,
    pub output_folder: PathBuf,
    pub target_format: String,
    pub converter_type: ConverterType,
    pub concurrency_limit: Option<usize>,
    pub task_timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

impl BatchRequest {
    pub fn new<P: Into<PathBuf>>(
        inputs: Vec<PathBuf>,
        output_folder: P,
        target_format: &str,
        converter_type: ConverterType,
    ) -> Self {
        Self {
            inputs,
            output_folder: output_folder.into(),
            target_format: target_format.to_string(),
            converter_type,
            concurrency_limit: None,
            task_timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_concurrency_limit(mut self, limit: Option<usize>) -> Self {
        self.concurrency_limit = limit;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Result of converting one input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionOutcome {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub success: bool,
    pub error_detail: Option<String>,
}

impl ConversionOutcome {
    fn succeeded(task: &ConversionTask) -> Self {
        Self {
            input_path: task.input_path.clone(),
            output_path: task.output_path.clone(),
            success: true,
            error_detail: None,
        }
    }

    fn failed(task: &ConversionTask, error: &ConvertError) -> Self {
        Self {
            input_path: task.input_path.clone(),
            output_path: task.output_path.clone(),
            success: false,
            error_detail: Some(error.to_string()),
        }
    }

    /// File name of the input, for user-facing messages.
    pub fn input_name(&self) -> String {
        display_name(&self.input_path)
    }

    pub fn message(&self) -> String {
        match &self.error_detail {
            None => format!(
                "Succeeded: {} -> {}",
                self.input_name(),
                self.output_path.display()
            ),
            Some(detail) => format!("Failed: {} ({})", self.input_name(), detail),
        }
    }
}

/// All outcomes of one batch, in completion order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub outcomes: Vec<ConversionOutcome>,
}

impl BatchReport {
    fn empty() -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            started_at: Utc::now(),
            elapsed_ms: 0,
            outcomes: Vec::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed_count(&self) -> usize {
        self.total() - self.succeeded_count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &ConversionOutcome> {
        self.outcomes.iter().filter(|o| !o.success)
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed_count() == 0
    }

    /// Pretty-printed JSON form of the report.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} succeeded, {} failed",
            self.succeeded_count(),
            self.failed_count()
        )
    }
}

pub struct BatchEngine {
    image: Arc<dyn Converter>,
    video: Arc<dyn Converter>,
}

impl BatchEngine {
    /// Engine backed by the built-in image and ffmpeg strategies.
    pub fn new(tools: &ToolsConfig) -> Self {
        Self {
            image: ConverterFactory::create_converter(ConverterType::Image, tools),
            video: ConverterFactory::create_converter(ConverterType::Video, tools),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.tools)
    }

    /// Engine with caller-supplied strategies.
    pub fn with_converters(image: Arc<dyn Converter>, video: Arc<dyn Converter>) -> Self {
        Self { image, video }
    }

    pub fn converter_for(&self, converter_type: ConverterType) -> Arc<dyn Converter> {
        match converter_type {
            ConverterType::Image => self.image.clone(),
            ConverterType::Video => self.video.clone(),
        }
    }

    /// Convert every input and return once all of them have finished.
    ///
    /// Fails only when the request itself is unusable (no target format, a
    /// zero concurrency limit, an output folder that cannot be written);
    /// that is checked before any task is scheduled. An empty input list
    /// returns an empty report without emitting progress.
    pub async fn run<S: ProgressSink>(&self, request: BatchRequest, sink: S) -> Result<BatchReport> {
        if request.inputs.is_empty() {
            return Ok(BatchReport::empty());
        }

        validate_request(&request)?;
        ensure_output_folder(&request.output_folder).await?;

        let batch_id = Uuid::new_v4();
        let span = info_span!("batch", %batch_id, converter = %request.converter_type);
        self.run_batch(batch_id, request, sink).instrument(span).await
    }

    async fn run_batch<S: ProgressSink>(
        &self,
        batch_id: Uuid,
        request: BatchRequest,
        sink: S,
    ) -> Result<BatchReport> {
        let started_at = Utc::now();
        let started = Instant::now();
        let total = request.inputs.len();
        let limit = request
            .concurrency_limit
            .unwrap_or_else(default_concurrency)
            .min(u32::MAX as usize);
        let target_format = request.target_format.trim().trim_start_matches('.').to_lowercase();

        info!(
            "Converting {} files to {} into {} (concurrency {})",
            total,
            target_format,
            request.output_folder.display(),
            limit
        );

        // Cancelled when the batch ends or its future is dropped, so leased
        // blocking work notices and discards its output.
        let batch_cancel = request.cancel.child_token();
        let _stop = batch_cancel.clone().drop_guard();

        let converter = self.converter_for(request.converter_type);
        let semaphore = Arc::new(Semaphore::new(limit));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut collector = Collector::new(total, sink);
        let mut reservations = PathReservations::new();
        let mut workers = JoinSet::new();

        for input in &request.inputs {
            let desired = output_path_for(input, &request.output_folder, &target_format);
            let task = ConversionTask {
                input_path: input.clone(),
                output_path: reservations.reserve(&desired),
                target_format: target_format.clone(),
                converter_type: request.converter_type,
            };

            if batch_cancel.is_cancelled() {
                collector.record(ConversionOutcome::failed(&task, &ConvertError::Cancelled));
                continue;
            }

            let worker = Worker {
                converter: converter.clone(),
                semaphore: semaphore.clone(),
                timeout: request.task_timeout,
                cancel: batch_cancel.clone(),
            };
            let tx = tx.clone();
            workers.spawn(
                async move {
                    let outcome = worker.run(task).await;
                    let _ = tx.send(outcome);
                }
                .in_current_span(),
            );
        }
        drop(tx);

        while let Some(outcome) = rx.recv().await {
            collector.record(outcome);
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Conversion worker ended abnormally: {}", e);
            }
        }

        // Work abandoned after a timeout or cancel still holds its slot.
        if semaphore.available_permits() < limit {
            debug!("Waiting for abandoned conversions to stop");
        }
        if semaphore.acquire_many(limit as u32).await.is_err() {
            error!("Conversion scheduler closed before the batch drained");
        }

        let outcomes = collector.finish();
        let report = BatchReport {
            batch_id,
            started_at,
            elapsed_ms: started.elapsed().as_millis() as u64,
            outcomes,
        };

        info!(
            "Batch finished in {:.2}s: {}",
            started.elapsed().as_secs_f64(),
            report.summary()
        );
        Ok(report)
    }
}

/// Owns the mutable bookkeeping of one batch.
struct Collector<S> {
    total: usize,
    completed: usize,
    outcomes: Vec<ConversionOutcome>,
    reporter: ProgressReporter<S>,
}

impl<S: ProgressSink> Collector<S> {
    fn new(total: usize, sink: S) -> Self {
        Self {
            total,
            completed: 0,
            outcomes: Vec::with_capacity(total),
            reporter: ProgressReporter::new(sink),
        }
    }

    fn record(&mut self, outcome: ConversionOutcome) {
        self.completed += 1;
        let message = outcome.message();
        if outcome.success {
            info!("{}", message);
        } else {
            warn!("{}", message);
        }
        self.reporter.report(self.completed, self.total, message);
        self.outcomes.push(outcome);
    }

    fn finish(self) -> Vec<ConversionOutcome> {
        debug!(
            "{} of {} progress events forwarded",
            self.reporter.forwarded_count(),
            self.completed
        );
        self.outcomes
    }
}

/// What a spawned task needs to convert one file.
struct Worker {
    converter: Arc<dyn Converter>,
    semaphore: Arc<Semaphore>,
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self, task: ConversionTask) -> ConversionOutcome {
        let permit = tokio::select! {
            permit = self.semaphore.clone().acquire_owned() => permit,
            _ = self.cancel.cancelled() => {
                return ConversionOutcome::failed(&task, &ConvertError::Cancelled);
            }
        };
        let Ok(permit) = permit else {
            let error = ConvertError::Internal("scheduler closed".to_string());
            return ConversionOutcome::failed(&task, &error);
        };
        if self.cancel.is_cancelled() {
            return ConversionOutcome::failed(&task, &ConvertError::Cancelled);
        }

        debug!(
            "Starting {} -> {}",
            task.input_path.display(),
            task.output_path.display()
        );

        let task_cancel = self.cancel.child_token();
        let lease = TaskLease::new(permit, task_cancel.clone());
        let converter = self.converter.clone();
        let owned_task = task.clone();
        let mut job = AbortOnDropHandle::new(tokio::spawn(
            async move { converter.convert(&owned_task, &lease).await }.in_current_span(),
        ));

        let deadline = async {
            match self.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        let (result, joined) = tokio::select! {
            joined = &mut job => match joined {
                Ok(result) => (result, true),
                Err(e) if e.is_panic() => (Err(ConvertError::Panicked(panic_message(e.into_panic()))), true),
                Err(e) => (Err(ConvertError::Internal(e.to_string())), true),
            },
            _ = deadline => (Err(ConvertError::TimedOut(self.timeout.unwrap_or_default())), false),
            _ = self.cancel.cancelled() => (Err(ConvertError::Cancelled), false),
        };

        if !joined {
            debug!("Abandoning {}", task.input_path.display());
            abandon(job, &task_cancel, &task.output_path).await;
        } else if matches!(result, Err(ConvertError::Cancelled)) {
            remove_partial_output(&task.output_path).await;
        }

        match result {
            Ok(()) => ConversionOutcome::succeeded(&task),
            Err(error) => ConversionOutcome::failed(&task, &error),
        }
    }
}

/// Stop an unfinished job and remove whatever output it left behind.
///
/// Aborting drops the strategy future, and with it any child process
/// handle, which kills the external tool. Blocking work keeps running until
/// it sees the cancelled lease, then removes its own output.
async fn abandon(
    job: AbortOnDropHandle<std::result::Result<(), ConvertError>>,
    task_cancel: &CancellationToken,
    output: &Path,
) {
    task_cancel.cancel();
    job.abort();
    let _ = job.await;
    remove_partial_output(output).await;
}

async fn remove_partial_output(output: &Path) {
    match tokio::fs::remove_file(output).await {
        Ok(()) => debug!("Removed partial output {}", output.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove partial output {}: {}", output.display(), e),
    }
}

fn validate_request(request: &BatchRequest) -> Result<()> {
    if request.target_format.trim().trim_start_matches('.').is_empty() {
        return Err(SnapError::InvalidRequest(
            "target format must not be empty".to_string(),
        ));
    }
    if request.concurrency_limit == Some(0) {
        return Err(SnapError::InvalidRequest(
            "concurrency limit must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Create the output folder if needed and prove it is writable.
async fn ensure_output_folder(folder: &Path) -> Result<()> {
    let unusable = |reason: String| SnapError::OutputFolder {
        path: folder.to_path_buf(),
        reason,
    };

    tokio::fs::create_dir_all(folder)
        .await
        .map_err(|e| unusable(e.to_string()))?;

    tempfile::Builder::new()
        .prefix(".snapconvert-write-check")
        .tempfile_in(folder)
        .map_err(|e| unusable(format!("not writable: {}", e)))?;

    Ok(())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
