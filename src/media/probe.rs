//! ffprobe-backed metadata lookup for the file listing.
//!
//! [`MediaProber::probe`] never fails: every problem is classified into a
//! [`ProbeError`] and recorded on the returned [`MediaDetails`], with the
//! fields that could be determined still populated.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::commands::MediaCommandBuilder;
use crate::error::SnapError;
use crate::format::{NOT_AVAILABLE, format_duration_str, format_size, format_size_str};

/// Extensions (uppercase) whose duration is always reported as `N/A`.
pub const STILL_IMAGE_TYPES: [&str; 6] = ["PNG", "JPG", "JPEG", "GIF", "WEBP", "BMP"];

const DIAGNOSTIC_LIMIT: usize = 150;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDetails {
    pub name: String,
    #[serde(rename = "type")]
    pub file_type: String,
    pub size: String,
    pub resolution: String,
    pub duration: String,
    pub full_path: String,
    pub error: Option<String>,
}

impl MediaDetails {
    /// Fields derivable from the path string alone; the rest are `N/A`.
    pub fn from_path(path: &Path) -> Self {
        let file_type = path
            .extension()
            .map(|e| e.to_string_lossy().to_uppercase())
            .unwrap_or_default();

        Self {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            file_type,
            size: NOT_AVAILABLE.to_string(),
            resolution: NOT_AVAILABLE.to_string(),
            duration: NOT_AVAILABLE.to_string(),
            full_path: path.to_string_lossy().into_owned(),
            error: None,
        }
    }

    pub fn is_still_image(&self) -> bool {
        STILL_IMAGE_TYPES.contains(&self.file_type.as_str())
    }

    /// Still images never carry a duration, whatever the prober said.
    pub fn enforce_still_image_duration(&mut self) {
        if self.is_still_image() {
            self.duration = NOT_AVAILABLE.to_string();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("ffprobe command not found. Please install FFmpeg.")]
    ToolMissing,

    #[error("File not found or cannot be opened: {0}")]
    FileNotFound(String),

    #[error("Invalid data in file (corrupted?): {0}")]
    Corrupted(String),

    #[error("ffprobe error processing file: {name}. Details: {details}")]
    Tool { name: String, details: String },

    #[error("Failed to parse ffprobe output for {0}.")]
    Parse(String),

    #[error("ffprobe timed out after {secs}s for {name}")]
    Timeout { name: String, secs: u64 },

    #[error("An unexpected error occurred while processing {name}: {message}")]
    Unexpected { name: String, message: String },
}

impl ProbeError {
    /// Classify a nonzero ffprobe exit by its diagnostic text.
    pub fn classify(name: &str, diagnostics: &str) -> Self {
        let lowered = diagnostics.to_lowercase();
        if lowered.contains("no such file or directory")
            || lowered.contains("file not found")
            || lowered.contains("cannot open")
        {
            ProbeError::FileNotFound(name.to_string())
        } else if lowered.contains("invalid data") {
            ProbeError::Corrupted(name.to_string())
        } else {
            ProbeError::Tool {
                name: name.to_string(),
                details: diagnostics.chars().take(DIAGNOSTIC_LIMIT).collect(),
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: Option<ProbeFormat>,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u64>,
    height: Option<u64>,
}

impl ProbeStream {
    fn dimensions(&self) -> Option<String> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some(format!("{}x{}", w, h)),
            _ => None,
        }
    }
}

/// Merge ffprobe JSON into `details`.
///
/// Format-level duration and size override earlier values. The first video
/// stream with dimensions sets the resolution outright; an image stream is
/// used only while the resolution is still unset.
pub fn apply_probe_json(details: &mut MediaDetails, json: &str) -> Result<(), ProbeError> {
    let parsed: ProbeOutput =
        serde_json::from_str(json).map_err(|_| ProbeError::Parse(details.name.clone()))?;

    if let Some(format) = &parsed.format {
        if let Some(duration) = &format.duration {
            details.duration = format_duration_str(duration);
        }
        if let Some(size) = &format.size {
            details.size = format_size_str(size);
        }
    }

    for stream in &parsed.streams {
        match stream.codec_type.as_deref() {
            Some("video") => {
                if let Some(resolution) = stream.dimensions() {
                    details.resolution = resolution;
                    break;
                }
            }
            Some("image") => {
                if let Some(resolution) = stream.dimensions() {
                    if details.resolution == NOT_AVAILABLE {
                        details.resolution = resolution;
                    }
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// Runs ffprobe on one file at a time and normalizes the result.
#[derive(Debug, Clone)]
pub struct MediaProber {
    commands: MediaCommandBuilder,
    timeout: Option<Duration>,
}

impl MediaProber {
    pub fn new<S: Into<String>>(binary_path: S) -> Self {
        Self {
            commands: MediaCommandBuilder::new(binary_path),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn probe(&self, path: &Path) -> MediaDetails {
        let mut details = MediaDetails::from_path(path);

        if let Ok(metadata) = tokio::fs::metadata(path).await {
            details.size = format_size(metadata.len());
        }

        if let Err(error) = self.run_probe(path, &mut details).await {
            debug!("Probe of {} failed: {}", path.display(), error);
            details.error = Some(error.to_string());
        }

        details.enforce_still_image_duration();
        details
    }

    /// Probe many files, at most `concurrency` ffprobe processes at a time.
    /// Results follow the order of `paths`.
    pub async fn probe_many<P: AsRef<Path>>(&self, paths: &[P], concurrency: usize) -> Vec<MediaDetails> {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut join_set = JoinSet::new();

        for (index, path) in paths.iter().enumerate() {
            let path = path.as_ref().to_path_buf();
            let prober = self.clone();
            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (index, prober.probe(&path).await)
            });
        }

        let mut slots: Vec<Option<MediaDetails>> = vec![None; paths.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, details)) => slots[index] = Some(details),
                Err(e) => warn!("Probe task failed: {}", e),
            }
        }

        slots
            .into_iter()
            .zip(paths)
            .map(|(slot, path)| {
                slot.unwrap_or_else(|| {
                    let mut details = MediaDetails::from_path(path.as_ref());
                    details.error = Some(
                        ProbeError::Unexpected {
                            name: details.name.clone(),
                            message: "probe task did not complete".to_string(),
                        }
                        .to_string(),
                    );
                    details.enforce_still_image_duration();
                    details
                })
            })
            .collect()
    }

    async fn run_probe(&self, path: &Path, details: &mut MediaDetails) -> Result<(), ProbeError> {
        let command = self.commands.probe(path);

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, command.run())
                .await
                .map_err(|_| ProbeError::Timeout {
                    name: details.name.clone(),
                    secs: limit.as_secs(),
                })?,
            None => command.run().await,
        };

        let output = output.map_err(|e| match e {
            SnapError::ToolMissing { .. } => ProbeError::ToolMissing,
            other => ProbeError::Unexpected {
                name: details.name.clone(),
                message: other.to_string(),
            },
        })?;

        if !output.success() {
            let diagnostics = if output.stderr.trim().is_empty() {
                format!("ffprobe exited with {}", output.status)
            } else {
                output.stderr.clone()
            };
            return Err(ProbeError::classify(&details.name, &diagnostics));
        }

        apply_probe_json(details, &output.stdout)
    }
}
