use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::converter::ConverterType;
use crate::error::{Result, SnapError};

/// Input extensions picked up from directories for image batches.
pub const IMAGE_INPUT_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "webp", "bmp"];
/// Input extensions picked up from directories for video batches.
pub const VIDEO_INPUT_EXTENSIONS: [&str; 5] = ["mp4", "avi", "mov", "mkv", "flv"];

const IMAGE_TARGETS: [&str; 9] = ["png", "jpg", "jpeg", "gif", "webp", "bmp", "tiff", "tif", "ico"];
const VIDEO_TARGETS: [&str; 7] = ["mp4", "avi", "mov", "mkv", "flv", "webm", "wmv"];

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert files (or every media file under given directories)
    Convert {
        /// Input files or directories
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output folder for converted files
        #[arg(short, long)]
        output: PathBuf,

        /// Target format, e.g. png, webp, mp4
        #[arg(short, long)]
        format: String,

        /// Converter to use (image or video); inferred from the format when omitted
        #[arg(short = 't', long = "type")]
        converter_type: Option<ConverterType>,

        /// Maximum conversions running at once
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Per-file timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Print the batch report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show name, type, size, resolution, and duration of media files
    Probe {
        /// Input files or directories
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Print the details as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that ffmpeg and ffprobe can be run
    Tools,

    /// Write the default configuration to a file
    InitConfig {
        /// Destination file
        #[arg(default_value = "snapconvert.toml")]
        path: PathBuf,
    },
}

/// Pick the converter for a target format: the explicit choice wins,
/// otherwise the format's usual kind.
pub fn resolve_converter_type(explicit: Option<ConverterType>, target_format: &str) -> Result<ConverterType> {
    if let Some(converter_type) = explicit {
        return Ok(converter_type);
    }

    let format = target_format.trim().trim_start_matches('.').to_lowercase();
    if IMAGE_TARGETS.contains(&format.as_str()) {
        Ok(ConverterType::Image)
    } else if VIDEO_TARGETS.contains(&format.as_str()) {
        Ok(ConverterType::Video)
    } else {
        Err(SnapError::UnsupportedFormat(format!(
            "cannot tell whether '{}' is an image or video format; pass --type",
            target_format
        )))
    }
}

/// Expand directories into the media files beneath them. Files given
/// explicitly are kept as they are, whatever their extension.
pub fn expand_inputs(inputs: &[PathBuf], converter_type: Option<ConverterType>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for input in inputs {
        if !input.is_dir() {
            files.push(input.clone());
            continue;
        }

        let mut found: Vec<PathBuf> = WalkDir::new(input)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| matches_type(p, converter_type))
            .collect();
        found.sort();
        files.extend(found);
    }

    files
}

fn matches_type(path: &Path, converter_type: Option<ConverterType>) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    let ext = ext.to_lowercase();
    let is_image = IMAGE_INPUT_EXTENSIONS.contains(&ext.as_str());
    let is_video = VIDEO_INPUT_EXTENSIONS.contains(&ext.as_str());

    match converter_type {
        Some(ConverterType::Image) => is_image,
        Some(ConverterType::Video) => is_video,
        None => is_image || is_video,
    }
}
