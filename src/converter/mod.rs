// Conversion strategies
//
// A conversion strategy turns one input file into one output file:
// - image: decode with the image crate and re-encode in the target format
// - video: stream-copy through ffmpeg into the target container
//
// The strategy for a batch is chosen from an explicit ConverterType tag,
// never from the input file's extension.

pub mod image;
pub mod video;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;

use crate::config::ToolsConfig;

/// Which strategy handles a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConverterType {
    Image,
    Video,
}

impl fmt::Display for ConverterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConverterType::Image => write!(f, "image"),
            ConverterType::Video => write!(f, "video"),
        }
    }
}

impl FromStr for ConverterType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "image" => Ok(ConverterType::Image),
            "video" => Ok(ConverterType::Video),
            _ => Err(format!(
                "Unknown converter type '{}'. Valid types: image, video",
                s
            )),
        }
    }
}

/// One unit of work: a single input file and the output path reserved for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionTask {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub target_format: String,
    pub converter_type: ConverterType,
}

/// Why a single file failed to convert.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("{tool} not found. Please install FFmpeg.")]
    ToolMissing { tool: String },

    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("{tool} could not be run: {message}")]
    Launch { tool: String, message: String },

    #[error("image error: {0}")]
    Image(#[from] ::image::ImageError),

    #[error("PNG encoding error: {0}")]
    Png(#[from] png::EncodingError),

    #[error("unsupported target format: {0}")]
    UnsupportedFormat(String),

    #[error("timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("cancelled before completion")]
    Cancelled,

    #[error("conversion task panicked: {0}")]
    Panicked(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// A task's claim on one conversion slot, plus its cancellation signal.
///
/// The slot stays occupied until every clone is dropped. Strategies that
/// hand work to a blocking thread move a clone into that thread, so the
/// slot is only freed once the work has really stopped, even when the
/// awaiting future was abandoned on timeout or cancel.
#[derive(Debug, Clone)]
pub struct TaskLease {
    permit: Option<Arc<OwnedSemaphorePermit>>,
    cancel: CancellationToken,
}

impl TaskLease {
    pub fn new(permit: OwnedSemaphorePermit, cancel: CancellationToken) -> Self {
        Self {
            permit: Some(Arc::new(permit)),
            cancel,
        }
    }

    /// Lease outside any scheduler, for running a strategy directly.
    pub fn detached() -> Self {
        Self {
            permit: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Timed out, cancelled, or abandoned by the engine.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn holds_slot(&self) -> bool {
        self.permit.is_some()
    }
}

/// Capability shared by every conversion strategy.
#[async_trait]
pub trait Converter: Send + Sync {
    fn converter_type(&self) -> ConverterType;

    /// Convert `task.input_path` into `task.output_path`.
    ///
    /// Work that outlives the returned future must keep a clone of `lease`
    /// and must not leave an output behind once the lease is cancelled.
    async fn convert(&self, task: &ConversionTask, lease: &TaskLease) -> Result<(), ConvertError>;
}

/// Factory for conversion strategies
pub struct ConverterFactory;

impl ConverterFactory {
    pub fn create_converter(converter_type: ConverterType, tools: &ToolsConfig) -> Arc<dyn Converter> {
        match converter_type {
            ConverterType::Image => Arc::new(image::ImageConverter::new()),
            ConverterType::Video => Arc::new(video::VideoConverter::new(tools.ffmpeg_path.clone())),
        }
    }
}
