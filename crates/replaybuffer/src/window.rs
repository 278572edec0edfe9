//! Window selection over complete segments.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::segment::Segment;

/// A hole in the sequence numbering inside a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SequenceGap {
    /// Last sequence number present before the hole.
    pub after: u64,
    /// First sequence number present after the hole.
    pub before: u64,
}

impl SequenceGap {
    /// Number of segments missing in this gap.
    #[must_use]
    pub fn missing(&self) -> u64 {
        self.before - self.after - 1
    }
}

impl fmt::Display for SequenceGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} segment(s) missing between {} and {}",
            self.missing(),
            self.after,
            self.before
        )
    }
}

/// The N most recent complete segments, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Window {
    segments: Vec<Segment>,
}

impl Window {
    /// Segments in concatenation order.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Paths in concatenation order.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.segments.iter().map(|s| s.path.clone()).collect()
    }

    /// Sequence number of the oldest segment.
    #[must_use]
    pub fn first_sequence(&self) -> u64 {
        self.segments.first().map_or(0, |s| s.sequence)
    }

    /// Sequence number of the newest segment.
    #[must_use]
    pub fn last_sequence(&self) -> u64 {
        self.segments.last().map_or(0, |s| s.sequence)
    }

    /// Number of segments in the window.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Check if the window is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Holes in the sequence numbering. Empty for a contiguous window.
    #[must_use]
    pub fn gaps(&self) -> Vec<SequenceGap> {
        self.segments
            .windows(2)
            .filter(|pair| pair[1].sequence > pair[0].sequence.saturating_add(1))
            .map(|pair| SequenceGap {
                after: pair[0].sequence,
                before: pair[1].sequence,
            })
            .collect()
    }

    /// Sequence numbers carried by more than one file, such as
    /// `segment_01.mp4` next to `segment_001.mp4`.
    #[must_use]
    pub fn duplicates(&self) -> Vec<u64> {
        let mut duplicates: Vec<u64> = self
            .segments
            .windows(2)
            .filter(|pair| pair[0].sequence == pair[1].sequence)
            .map(|pair| pair[0].sequence)
            .collect();
        duplicates.dedup();
        duplicates
    }
}

/// Select the `size` most recent segments from an ordered complete list.
///
/// No partial window is ever produced.
///
/// # Errors
///
/// Returns [`Error::InsufficientData`] when fewer than `size` complete
/// segments are available.
pub fn select(complete: &[Segment], size: usize) -> Result<Window> {
    if size == 0 || complete.len() < size {
        return Err(Error::InsufficientData {
            available: complete.len(),
            required: size,
        });
    }

    Ok(Window {
        segments: complete[complete.len() - size..].to_vec(),
    })
}
