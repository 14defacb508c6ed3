use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, SnapError};

/// Captured result of one external tool run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// An external media tool invocation: binary, arguments, and a short
/// description used in logs and error messages.
#[derive(Debug, Clone)]
pub struct MediaCommand {
    pub binary_path: String,
    pub args: Vec<OsString>,
    pub description: String,
}

impl MediaCommand {
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|s| s.as_ref().to_os_string()));
        self
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref())
    }

    /// Add output file
    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref())
    }

    pub fn video_codec<S: AsRef<OsStr>>(self, codec: S) -> Self {
        self.arg("-c:v").arg(codec)
    }

    pub fn audio_codec<S: AsRef<OsStr>>(self, codec: S) -> Self {
        self.arg("-c:a").arg(codec)
    }

    /// Copy the video stream without re-encoding
    pub fn copy_video(self) -> Self {
        self.video_codec("copy")
    }

    /// Copy the audio stream without re-encoding
    pub fn copy_audio(self) -> Self {
        self.audio_codec("copy")
    }

    /// Run the tool to completion and capture its output, whatever the exit
    /// status.
    ///
    /// The child is killed if the returned future is dropped before it
    /// finishes, so wrapping this in a timeout or aborting the task that
    /// awaits it terminates the external process.
    ///
    /// A binary that cannot be found yields [`SnapError::ToolMissing`].
    pub async fn run(&self) -> Result<ToolOutput> {
        debug!("Executing {}: {} {:?}", self.description, self.binary_path, self.args);

        let child = Command::new(&self.binary_path)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let output = child.wait_with_output().await.map_err(|e| SnapError::Tool {
            tool: self.tool_name(),
            message: format!("I/O error waiting for process: {}", e),
        })?;

        Ok(ToolOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run the tool and treat a nonzero exit as an error carrying stderr.
    pub async fn execute(&self) -> Result<ToolOutput> {
        let output = self.run().await?;

        if !output.success() {
            return Err(SnapError::Tool {
                tool: self.tool_name(),
                message: format!(
                    "{} failed ({}): {}",
                    self.description,
                    output.status,
                    output.stderr.trim()
                ),
            });
        }

        Ok(output)
    }

    /// File name of the binary, for messages.
    pub fn tool_name(&self) -> String {
        Path::new(&self.binary_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.binary_path.clone())
    }

    fn spawn_error(&self, err: std::io::Error) -> SnapError {
        if err.kind() == std::io::ErrorKind::NotFound {
            SnapError::ToolMissing {
                tool: self.tool_name(),
            }
        } else {
            SnapError::Tool {
                tool: self.tool_name(),
                message: format!("failed to launch: {}", err),
            }
        }
    }
}

/// Builds the command lines this crate sends to ffmpeg and ffprobe.
#[derive(Debug, Clone)]
pub struct MediaCommandBuilder {
    binary_path: String,
}

impl MediaCommandBuilder {
    pub fn new<S: Into<String>>(binary_path: S) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    /// `<prober> -v quiet -print_format json -show_format -show_streams <file>`
    pub fn probe<P: AsRef<Path>>(&self, file: P) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Media probe")
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(file.as_ref())
    }

    /// `<transcoder> -i <input> -c:v copy -c:a copy <output>`
    pub fn stream_copy<P: AsRef<Path>, Q: AsRef<Path>>(&self, input: P, output: Q) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Stream copy")
            .input(input)
            .copy_video()
            .copy_audio()
            .output(output)
    }

    pub fn version_check(&self) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Version check").arg("-version")
    }
}
