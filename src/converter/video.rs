use async_trait::async_trait;
use tracing::debug;

use super::{ConversionTask, ConvertError, Converter, ConverterType, TaskLease};
use crate::error::SnapError;
use crate::media::MediaCommandBuilder;

/// Keep only the tail of ffmpeg's stderr; the banner at the top is noise.
const STDERR_TAIL_CHARS: usize = 500;

/// Remuxes video through ffmpeg with stream copy for both video and audio.
#[derive(Debug, Clone)]
pub struct VideoConverter {
    commands: MediaCommandBuilder,
}

impl VideoConverter {
    pub fn new<S: Into<String>>(ffmpeg_path: S) -> Self {
        Self {
            commands: MediaCommandBuilder::new(ffmpeg_path),
        }
    }
}

#[async_trait]
impl Converter for VideoConverter {
    fn converter_type(&self) -> ConverterType {
        ConverterType::Video
    }

    async fn convert(&self, task: &ConversionTask, lease: &TaskLease) -> Result<(), ConvertError> {
        if lease.is_cancelled() {
            return Err(ConvertError::Cancelled);
        }

        let command = self.commands.stream_copy(&task.input_path, &task.output_path);
        let tool = command.tool_name();

        // dropping the run future kills ffmpeg
        let output = tokio::select! {
            output = command.run() => output,
            _ = lease.cancelled() => return Err(ConvertError::Cancelled),
        };

        let output = output.map_err(|e| match e {
            SnapError::ToolMissing { tool } => ConvertError::ToolMissing { tool },
            other => ConvertError::Launch {
                tool: tool.clone(),
                message: other.to_string(),
            },
        })?;

        if !output.success() {
            return Err(ConvertError::ToolFailed {
                tool,
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        debug!(
            "Video remuxed: {} -> {}",
            task.input_path.display(),
            task.output_path.display()
        );
        Ok(())
    }
}

fn stderr_tail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    let count = trimmed.chars().count();
    if count <= STDERR_TAIL_CHARS {
        return trimmed.to_string();
    }
    let tail: String = trimmed.chars().skip(count - STDERR_TAIL_CHARS).collect();
    format!("...{}", tail)
}
