//! Snapconvert - Batch Image and Video Conversion
//!
//! Converts many image or video files into one target format at once,
//! running conversions concurrently with bounded parallelism, and reads
//! basic media details (type, size, resolution, duration) through ffprobe.

pub mod cli;
pub mod config;
pub mod converter;
pub mod engine;
pub mod error;
pub mod format;
pub mod media;
pub mod paths;
pub mod progress;
pub mod selection;

pub use config::Config;
pub use converter::{ConversionTask, ConvertError, Converter, ConverterType};
pub use engine::{BatchEngine, BatchReport, BatchRequest, ConversionOutcome};
pub use error::{Result, SnapError};
pub use progress::{ProgressEvent, ProgressSink};
