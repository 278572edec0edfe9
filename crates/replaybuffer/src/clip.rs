//! Clip naming and discovery.
//!
//! Clips are named `<prefix>YYYYmmdd_HHMMSS.<ext>` after the moment they were
//! assembled. A second clip within the same second gets a `_<n>` suffix.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use regex::Regex;
use serde::Serialize;

use crate::config::BufferConfig;
use crate::error::{Error, Result};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// File naming convention for assembled clips.
#[derive(Debug, Clone)]
pub struct ClipNaming {
    prefix: String,
    extension: String,
    pattern: Regex,
}

impl ClipNaming {
    /// Create a clip naming convention.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix or extension cannot form a valid pattern.
    pub fn new(prefix: &str, extension: &str) -> Result<Self> {
        let pattern = Regex::new(&format!(
            r"^{}(\d{{8}}_\d{{6}})(?:_(\d+))?\.{}$",
            regex::escape(prefix),
            regex::escape(extension)
        ))
        .map_err(|e| Error::ConfigValidation {
            message: format!("invalid clip naming: {e}"),
        })?;

        Ok(Self {
            prefix: prefix.to_string(),
            extension: extension.to_string(),
            pattern,
        })
    }

    /// Create the clip naming convention described by the buffer configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured names cannot form a valid pattern.
    pub fn from_config(buffer: &BufferConfig) -> Result<Self> {
        Self::new(&buffer.clip_prefix, &buffer.segment_extension)
    }

    /// Build a clip file name.
    #[must_use]
    pub fn file_name(&self, assembled_at: NaiveDateTime, suffix: u32) -> String {
        let stamp = assembled_at.format(TIMESTAMP_FORMAT);
        if suffix == 0 {
            format!("{}{stamp}.{}", self.prefix, self.extension)
        } else {
            format!("{}{stamp}_{suffix}.{}", self.prefix, self.extension)
        }
    }

    /// The first clip path in `dir` for `assembled_at` that does not exist yet.
    #[must_use]
    pub fn next_path(&self, dir: &Path, assembled_at: NaiveDateTime) -> PathBuf {
        (0..)
            .map(|suffix| dir.join(self.file_name(assembled_at, suffix)))
            .find(|path| !path.exists())
            .unwrap_or_else(|| dir.join(self.file_name(assembled_at, u32::MAX)))
    }

    /// Parse a clip file name.
    #[must_use]
    pub fn parse(&self, file_name: &str) -> Option<(NaiveDateTime, u32)> {
        let caps = self.pattern.captures(file_name)?;
        let assembled_at =
            NaiveDateTime::parse_from_str(caps.get(1)?.as_str(), TIMESTAMP_FORMAT).ok()?;
        let suffix = caps
            .get(2)
            .map_or(Some(0), |m| m.as_str().parse().ok())?;
        Some((assembled_at, suffix))
    }
}

/// An assembled clip on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Clip {
    /// File name of the clip.
    pub name: String,
    /// Path of the clip.
    pub path: PathBuf,
    /// When the clip was assembled, local time.
    pub assembled_at: NaiveDateTime,
    /// Disambiguation suffix for clips assembled in the same second.
    pub suffix: u32,
}

/// List clips in `dir`, oldest first.
///
/// # Errors
///
/// Returns [`Error::DirectoryUnavailable`] if the directory cannot be read.
pub fn list(dir: &Path, naming: &ClipNaming) -> Result<Vec<Clip>> {
    let entries = fs::read_dir(dir).map_err(|source| Error::DirectoryUnavailable {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut clips: Vec<Clip> = entries
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|e| {
            let name = e.file_name().to_str()?.to_owned();
            let (assembled_at, suffix) = naming.parse(&name)?;
            Some(Clip {
                name,
                path: e.path(),
                assembled_at,
                suffix,
            })
        })
        .collect();

    clips.sort_by_key(|c| (c.assembled_at, c.suffix));
    Ok(clips)
}

/// The most recently assembled clip in `dir`.
///
/// # Errors
///
/// Returns [`Error::DirectoryUnavailable`] if the directory cannot be read.
pub fn latest(dir: &Path, naming: &ClipNaming) -> Result<Option<Clip>> {
    Ok(list(dir, naming)?.pop())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn naming() -> ClipNaming {
        ClipNaming::new("clip_", "mp4").unwrap()
    }

    #[test]
    fn test_file_name() {
        assert_eq!(naming().file_name(at(9, 5, 1), 0), "clip_20240601_090501.mp4");
        assert_eq!(
            naming().file_name(at(9, 5, 1), 2),
            "clip_20240601_090501_2.mp4"
        );
    }

    #[test]
    fn test_parse_round_trip_with_suffix() {
        let naming = naming();
        assert_eq!(
            naming.parse("clip_20240601_090501_3.mp4"),
            Some((at(9, 5, 1), 3))
        );
        assert_eq!(naming.parse("segment_001.mp4"), None);
        assert_eq!(naming.parse("clip_20241301_000000.mp4"), None);
    }

    #[test]
    fn test_next_path_avoids_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let naming = naming();

        let first = naming.next_path(dir.path(), at(12, 0, 0));
        assert!(first.ends_with("clip_20240601_120000.mp4"));
        fs::write(&first, b"clip").unwrap();

        let second = naming.next_path(dir.path(), at(12, 0, 0));
        assert!(second.ends_with("clip_20240601_120000_1.mp4"));
    }

    #[test]
    fn test_latest_orders_by_timestamp_then_suffix() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "clip_20240601_120000_10.mp4",
            "clip_20240601_120000_2.mp4",
            "clip_20240601_110000.mp4",
            "segment_004.mp4",
        ] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }

        let clips = list(dir.path(), &naming()).unwrap();
        assert_eq!(clips.len(), 3);
        assert_eq!(clips[0].name, "clip_20240601_110000.mp4");

        let latest = latest(dir.path(), &naming()).unwrap().unwrap();
        assert_eq!(latest.name, "clip_20240601_120000_10.mp4");
    }

    #[test]
    fn test_latest_in_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(latest(dir.path(), &naming()).unwrap().is_none());
    }
}
