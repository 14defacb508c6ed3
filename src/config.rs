use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, SnapError};

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "snapconvert.toml";

/// Environment variable overriding the ffmpeg path.
pub const ENV_FFMPEG: &str = "SNAPCONVERT_FFMPEG";
/// Environment variable overriding the ffprobe path.
pub const ENV_FFPROBE: &str = "SNAPCONVERT_FFPROBE";

fn default_probe_concurrency() -> usize {
    4
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub conversion: ConversionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Path to the ffmpeg binary
    pub ffmpeg_path: String,
    /// Path to the ffprobe binary
    pub ffprobe_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Maximum conversions running at once; defaults to the CPU count
    #[serde(default)]
    pub concurrency_limit: Option<usize>,
    /// Kill a conversion that runs longer than this
    #[serde(default)]
    pub task_timeout_secs: Option<u64>,
    /// Kill an ffprobe call that runs longer than this
    #[serde(default)]
    pub probe_timeout_secs: Option<u64>,
    /// Maximum ffprobe processes at once when listing files
    #[serde(default = "default_probe_concurrency")]
    pub probe_concurrency: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: None,
            task_timeout_secs: None,
            probe_timeout_secs: None,
            probe_concurrency: default_probe_concurrency(),
        }
    }
}

impl ConversionConfig {
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }

    pub fn probe_timeout(&self) -> Option<Duration> {
        self.probe_timeout_secs.map(Duration::from_secs)
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SnapError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)?;

        Ok(())
    }

    /// Load from `path`, else `snapconvert.toml` in the working directory,
    /// else defaults; then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Config::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                info!("Found {} in current directory, loading...", DEFAULT_CONFIG_FILE);
                Config::from_file(DEFAULT_CONFIG_FILE)?
            }
            None => Config::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Replace tool paths with non-empty values returned by `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup(ENV_FFMPEG).filter(|p| !p.trim().is_empty()) {
            info!("Using ffmpeg from {}: {}", ENV_FFMPEG, path);
            self.tools.ffmpeg_path = path;
        }
        if let Some(path) = lookup(ENV_FFPROBE).filter(|p| !p.trim().is_empty()) {
            info!("Using ffprobe from {}: {}", ENV_FFPROBE, path);
            self.tools.ffprobe_path = path;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.conversion.concurrency_limit == Some(0) {
            return Err(SnapError::Config(
                "conversion.concurrency_limit must be at least 1".to_string(),
            ));
        }
        if self.conversion.probe_concurrency == 0 {
            return Err(SnapError::Config(
                "conversion.probe_concurrency must be at least 1".to_string(),
            ));
        }
        if self.tools.ffmpeg_path.trim().is_empty() || self.tools.ffprobe_path.trim().is_empty() {
            return Err(SnapError::Config("tool paths must not be empty".to_string()));
        }
        Ok(())
    }
}
