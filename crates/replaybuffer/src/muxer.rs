//! Lossless clip muxing.
//!
//! The muxer joins the segments listed in a [`Manifest`] into one output file
//! by stream copy. It never re-encodes.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::manifest::Manifest;

/// A trait for stream-copy concatenation backends.
#[async_trait]
pub trait Muxer: Send + Sync + std::fmt::Debug {
    /// The name of this muxer (for logging/debugging).
    fn name(&self) -> &'static str;

    /// Concatenate the manifest's segments into `output`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MuxerFailure`] if the output could not be produced.
    async fn concat(&self, manifest: &Manifest, output: &Path) -> Result<()>;
}

/// Muxer backed by the ffmpeg concat demuxer.
#[derive(Debug, Clone)]
pub struct FfmpegMuxer {
    program: String,
}

impl FfmpegMuxer {
    /// Create a muxer that runs the given ffmpeg executable.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments for one concat invocation.
    #[must_use]
    pub fn args(manifest: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-nostdin",
            "-n",
            "-f",
            "concat",
            "-safe",
            "0",
            "-i",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        args.push(manifest.as_os_str().to_owned());
        args.extend(["-c", "copy"].iter().map(OsString::from));
        args.push(output.as_os_str().to_owned());
        args
    }
}

impl Default for FfmpegMuxer {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl Muxer for FfmpegMuxer {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn concat(&self, manifest: &Manifest, output: &Path) -> Result<()> {
        let args = Self::args(manifest.path(), output);
        debug!(program = %self.program, ?args, "Launching concat");

        let result = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::muxer(self.name(), format!("failed to launch {}: {e}", self.program)))?;

        if result.status.success() {
            info!(output = %output.display(), segments = manifest.entries().len(), "Concatenated clip");
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let stderr = stderr.trim();
            Err(Error::muxer(
                self.name(),
                if stderr.is_empty() {
                    format!("exited with {}", result.status)
                } else {
                    format!("exited with {}: {stderr}", result.status)
                },
            ))
        }
    }
}
