//! Segment naming and directory scanning.
//!
//! The producer writes `<prefix><zero-padded sequence>.<extension>` files into
//! a single shared directory. This module recognizes those files, orders them
//! by sequence number and decides which of them are complete.
//!
//! Completeness is inferred only from producer advancement: a segment counts
//! as complete once `settle` newer segment files exist. File sizes and
//! modification times are never consulted since the producer may be writing
//! concurrently.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::config::BufferConfig;
use crate::error::{Error, Result};

/// File naming convention shared with the segment producer.
#[derive(Debug, Clone)]
pub struct SegmentNaming {
    prefix: String,
    extension: String,
    width: usize,
    pattern: Regex,
}

impl SegmentNaming {
    /// Create a naming convention.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix or extension cannot form a valid pattern.
    pub fn new(prefix: &str, extension: &str, width: usize) -> Result<Self> {
        let pattern = Regex::new(&format!(
            r"^{}(\d+)\.{}$",
            regex::escape(prefix),
            regex::escape(extension)
        ))
        .map_err(|e| Error::ConfigValidation {
            message: format!("invalid segment naming: {e}"),
        })?;

        Ok(Self {
            prefix: prefix.to_string(),
            extension: extension.to_string(),
            width,
            pattern,
        })
    }

    /// Create the naming convention described by the buffer configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured names cannot form a valid pattern.
    pub fn from_config(buffer: &BufferConfig) -> Result<Self> {
        Self::new(
            &buffer.segment_prefix,
            &buffer.segment_extension,
            buffer.sequence_width,
        )
    }

    /// Parse the sequence number out of a file name.
    ///
    /// Returns `None` for files that are not segments.
    #[must_use]
    pub fn parse(&self, file_name: &str) -> Option<u64> {
        self.pattern
            .captures(file_name)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    /// Build the file name of the given sequence number.
    #[must_use]
    pub fn file_name(&self, sequence: u64) -> String {
        format!(
            "{}{:0width$}.{}",
            self.prefix,
            sequence,
            self.extension,
            width = self.width
        )
    }

    /// The output template handed to the producer, e.g. `segment_%03d.mp4`.
    #[must_use]
    pub fn producer_template(&self) -> String {
        format!("{}%0{}d.{}", self.prefix, self.width, self.extension)
    }

    /// The file extension of segments.
    #[must_use]
    pub fn extension(&self) -> &str {
        &self.extension
    }
}

/// One media segment on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    /// Producer-assigned sequence number.
    pub sequence: u64,
    /// Path of the segment file.
    pub path: PathBuf,
    /// Whether the producer has provably moved past this segment.
    pub is_complete: bool,
}

impl Segment {
    /// The file name of this segment.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Snapshot of the segment directory, ordered by sequence number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SegmentListing {
    segments: Vec<Segment>,
}

impl SegmentListing {
    /// Build a listing from unordered segments, marking completeness.
    #[must_use]
    pub fn new(mut segments: Vec<Segment>, settle: usize) -> Self {
        segments.sort_by(|a, b| a.sequence.cmp(&b.sequence).then_with(|| a.path.cmp(&b.path)));

        let total = segments.len();
        let sequences: Vec<u64> = segments.iter().map(|s| s.sequence).collect();
        for segment in &mut segments {
            let not_newer = sequences.partition_point(|&seq| seq <= segment.sequence);
            segment.is_complete = total - not_newer >= settle;
        }

        Self { segments }
    }

    /// All segments, oldest first.
    #[must_use]
    pub fn all(&self) -> &[Segment] {
        &self.segments
    }

    /// Complete segments, oldest first.
    #[must_use]
    pub fn complete(&self) -> Vec<Segment> {
        self.segments
            .iter()
            .filter(|s| s.is_complete)
            .cloned()
            .collect()
    }

    /// Segments the producer may still be writing, oldest first.
    #[must_use]
    pub fn in_flight(&self) -> Vec<&Segment> {
        self.segments.iter().filter(|s| !s.is_complete).collect()
    }

    /// The highest sequence number present.
    #[must_use]
    pub fn newest_sequence(&self) -> Option<u64> {
        self.segments.last().map(|s| s.sequence)
    }

    /// Number of segments in the listing.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Check if the listing is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Scan the shared directory for segments.
///
/// # Errors
///
/// Returns [`Error::DirectoryUnavailable`] if the directory is missing or
/// cannot be read.
pub fn scan(dir: &Path, naming: &SegmentNaming, settle: usize) -> Result<SegmentListing> {
    let entries = fs::read_dir(dir).map_err(|source| Error::DirectoryUnavailable {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut segments = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };

        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        let Some(sequence) = naming.parse(&name) else {
            trace!(file = %name, "Ignoring non-segment file");
            continue;
        };
        if entry.file_type().map(|t| !t.is_file()).unwrap_or(true) {
            continue;
        }

        segments.push(Segment {
            sequence,
            path: entry.path(),
            is_complete: false,
        });
    }

    let listing = SegmentListing::new(segments, settle);
    debug!(
        dir = %dir.display(),
        total = listing.len(),
        in_flight = listing.in_flight().len(),
        "Scanned segment directory"
    );
    Ok(listing)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naming() -> SegmentNaming {
        SegmentNaming::new("segment_", "mp4", 3).unwrap()
    }

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn test_parse_segment_names() {
        let naming = naming();
        assert_eq!(naming.parse("segment_000.mp4"), Some(0));
        assert_eq!(naming.parse("segment_042.mp4"), Some(42));
        assert_eq!(naming.parse("segment_1000.mp4"), Some(1000));
        assert_eq!(naming.parse("segment_.mp4"), None);
        assert_eq!(naming.parse("segment_001.mp4.part"), None);
        assert_eq!(naming.parse("clip_20240101_120000.mp4"), None);
        assert_eq!(naming.parse("segment_001.mkv"), None);
    }

    #[test]
    fn test_prefix_is_matched_literally() {
        let naming = SegmentNaming::new("cam.", "ts", 4).unwrap();
        assert_eq!(naming.parse("cam.0007.ts"), Some(7));
        assert_eq!(naming.parse("camX0007.ts"), None);
    }

    #[test]
    fn test_file_name_and_template() {
        let naming = naming();
        assert_eq!(naming.file_name(7), "segment_007.mp4");
        assert_eq!(naming.file_name(1234), "segment_1234.mp4");
        assert_eq!(naming.producer_template(), "segment_%03d.mp4");
    }

    #[test]
    fn test_scan_sorts_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["segment_1000.mp4", "segment_998.mp4", "segment_999.mp4"] {
            touch(dir.path(), name);
        }

        let listing = scan(dir.path(), &naming(), 1).unwrap();
        let sequences: Vec<u64> = listing.all().iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![998, 999, 1000]);
        assert_eq!(listing.newest_sequence(), Some(1000));
    }

    #[test]
    fn test_scan_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "segment_000.mp4");
        touch(dir.path(), "clip_20240101_120000.mp4");
        touch(dir.path(), "concat.txt");
        fs::create_dir(dir.path().join("segment_001.mp4")).unwrap();

        let listing = scan(dir.path(), &naming(), 1).unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing.all()[0].file_name(), "segment_000.mp4");
    }

    #[test]
    fn test_newest_segment_is_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        for seq in 0..3 {
            touch(dir.path(), &naming().file_name(seq));
        }

        let listing = scan(dir.path(), &naming(), 1).unwrap();
        let complete: Vec<u64> = listing.complete().iter().map(|s| s.sequence).collect();
        assert_eq!(complete, vec![0, 1]);
        assert_eq!(listing.in_flight().len(), 1);
        assert_eq!(listing.in_flight()[0].sequence, 2);
    }

    #[test]
    fn test_single_segment_is_never_complete() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "segment_000.mp4");

        let listing = scan(dir.path(), &naming(), 1).unwrap();
        assert!(listing.complete().is_empty());
    }

    #[test]
    fn test_settle_two_holds_back_two_segments() {
        let dir = tempfile::tempdir().unwrap();
        for seq in 0..5 {
            touch(dir.path(), &naming().file_name(seq));
        }

        let listing = scan(dir.path(), &naming(), 2).unwrap();
        let complete: Vec<u64> = listing.complete().iter().map(|s| s.sequence).collect();
        assert_eq!(complete, vec![0, 1, 2]);
    }

    #[test]
    fn test_settle_zero_marks_everything_complete() {
        let listing = SegmentListing::new(
            vec![Segment {
                sequence: 3,
                path: PathBuf::from("segment_003.mp4"),
                is_complete: false,
            }],
            0,
        );
        assert_eq!(listing.complete().len(), 1);
    }

    #[test]
    fn test_completeness_ignores_gaps_in_numbering() {
        // 5 proves 2 complete even though 3 and 4 are missing
        let segments = [0, 2, 5]
            .iter()
            .map(|&sequence| Segment {
                sequence,
                path: PathBuf::from(format!("segment_{sequence:03}.mp4")),
                is_complete: false,
            })
            .collect();
        let listing = SegmentListing::new(segments, 1);
        let complete: Vec<u64> = listing.complete().iter().map(|s| s.sequence).collect();
        assert_eq!(complete, vec![0, 2]);
    }

    #[test]
    fn test_scan_missing_directory() {
        let err = scan(Path::new("/nonexistent/replaybuffer"), &naming(), 1).unwrap_err();
        assert!(matches!(err, Error::DirectoryUnavailable { .. }));
    }

    #[test]
    fn test_scan_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let listing = scan(dir.path(), &naming(), 1).unwrap();
        assert!(listing.is_empty());
        assert_eq!(listing.newest_sequence(), None);
    }
}
