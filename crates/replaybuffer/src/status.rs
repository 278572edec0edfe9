//! Point-in-time view of the buffer directory.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::clip::{self, ClipNaming};
use crate::config::Config;
use crate::error::Result;
use crate::segment::{self, SegmentNaming};
use crate::window::{self, SequenceGap};

/// The window an assembly started now would use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowPreview {
    /// First sequence number in the window.
    pub first: u64,
    /// Last sequence number in the window.
    pub last: u64,
    /// Number of segments.
    pub len: usize,
    /// Holes in the numbering inside the window.
    pub gaps: Vec<SequenceGap>,
    /// Sequence numbers held by more than one file.
    pub duplicates: Vec<u64>,
}

/// A clip on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClipSummary {
    /// File name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
}

/// Snapshot of the buffer directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BufferStatus {
    /// The buffer directory.
    pub directory: PathBuf,
    /// Segments on disk.
    pub segments: usize,
    /// Segments confirmed complete.
    pub complete: usize,
    /// Names of segments that may still be written.
    pub in_flight: Vec<String>,
    /// Lowest sequence number on disk.
    pub oldest_sequence: Option<u64>,
    /// Highest sequence number on disk.
    pub newest_sequence: Option<u64>,
    /// Segments the window needs.
    pub window_segments: usize,
    /// The window a trigger would select now, if there is enough data.
    pub window: Option<WindowPreview>,
    /// Clips in the directory, oldest first.
    pub clips: Vec<ClipSummary>,
}

impl BufferStatus {
    /// Check if a trigger right now would produce a clip.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.window.is_some()
    }
}

/// Inspect the buffer directory described by `config`.
///
/// # Errors
///
/// Returns an error if the naming configuration is invalid or the directory
/// cannot be read.
pub fn collect(config: &Config) -> Result<BufferStatus> {
    collect_in(
        &config.segment_dir(),
        &SegmentNaming::from_config(&config.buffer)?,
        &ClipNaming::from_config(&config.buffer)?,
        config.buffer.window_segments,
        config.buffer.settle_segments,
    )
}

/// Inspect `dir` with explicit naming and window parameters.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub fn collect_in(
    dir: &Path,
    segments: &SegmentNaming,
    clips: &ClipNaming,
    window_segments: usize,
    settle: usize,
) -> Result<BufferStatus> {
    let listing = segment::scan(dir, segments, settle)?;
    let complete = listing.complete();

    let window = window::select(&complete, window_segments)
        .ok()
        .map(|w| WindowPreview {
            first: w.first_sequence(),
            last: w.last_sequence(),
            len: w.len(),
            gaps: w.gaps(),
            duplicates: w.duplicates(),
        });

    let clips = clip::list(dir, clips)?
        .into_iter()
        .map(|c| ClipSummary {
            size: std::fs::metadata(&c.path).map(|m| m.len()).unwrap_or(0),
            name: c.name,
        })
        .collect();

    Ok(BufferStatus {
        directory: dir.to_path_buf(),
        segments: listing.len(),
        complete: complete.len(),
        in_flight: listing.in_flight().iter().map(|s| s.file_name()).collect(),
        oldest_sequence: listing.all().first().map(|s| s.sequence),
        newest_sequence: listing.newest_sequence(),
        window_segments,
        window,
        clips,
    })
}
