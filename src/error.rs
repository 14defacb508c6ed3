use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{tool} not found. Please install FFmpeg or set its path in the configuration")]
    ToolMissing { tool: String },

    #[error("{tool} error: {message}")]
    Tool { tool: String, message: String },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Output folder {} is not usable: {reason}", path.display())]
    OutputFolder { path: PathBuf, reason: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, SnapError>;
