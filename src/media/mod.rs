// External media tool plumbing
//
// - commands: command-line builders and async execution for ffmpeg/ffprobe
// - probe: ffprobe metadata lookup normalized into MediaDetails

pub mod commands;
pub mod probe;

use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};

pub use commands::*;
pub use probe::*;

use crate::error::{Result, SnapError};

/// Availability report for one external tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    pub name: String,
    pub configured_path: String,
    pub resolved_path: Option<PathBuf>,
    pub version: Option<String>,
    pub error: Option<String>,
}

impl ToolStatus {
    pub fn available(&self) -> bool {
        self.version.is_some()
    }
}

/// Run `<tool> -version` and return the first line of its output.
pub async fn get_version_info(binary_path: &str) -> Result<String> {
    let output = MediaCommandBuilder::new(binary_path)
        .version_check()
        .execute()
        .await?;

    output
        .stdout
        .lines()
        .next()
        .map(|line| line.trim().to_string())
        .ok_or_else(|| SnapError::Tool {
            tool: binary_path.to_string(),
            message: "empty version output".to_string(),
        })
}

/// Check one tool, never failing: problems are recorded on the status.
pub async fn check_tool(name: &str, binary_path: &str) -> ToolStatus {
    let resolved_path = which::which(binary_path).ok();

    let (version, error) = match get_version_info(binary_path).await {
        Ok(version) => {
            info!("{} is available: {}", name, version);
            (Some(version), None)
        }
        Err(e) => {
            warn!("{} is not usable: {}", name, e);
            (None, Some(e.to_string()))
        }
    };

    ToolStatus {
        name: name.to_string(),
        configured_path: binary_path.to_string(),
        resolved_path,
        version,
        error,
    }
}
