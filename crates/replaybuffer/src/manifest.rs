//! Concat manifests for the muxer.
//!
//! A manifest lists absolute segment paths in window order using the concat
//! demuxer syntax, one `file '<path>'` line per segment. It belongs to exactly
//! one assembly and is removed when that assembly finishes.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;

const SUFFIX: &str = ".concat.txt";

/// Manifest path for the assembly producing `clip`, inside `dir`.
///
/// Manifests are hidden files named after the clip they belong to.
#[must_use]
pub fn path_for(dir: &Path, clip: &Path) -> PathBuf {
    let stem = clip
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.join(format!(".{stem}{SUFFIX}"))
}

/// Check if `file_name` looks like a manifest left behind by an assembly.
#[must_use]
pub fn is_manifest_name(file_name: &str) -> bool {
    file_name.starts_with('.') && file_name.ends_with(SUFFIX)
}

/// An ordered list of segment paths written to disk.
#[derive(Debug)]
pub struct Manifest {
    path: PathBuf,
    entries: Vec<PathBuf>,
}

impl Manifest {
    /// Write a manifest for `segments` at `path`.
    ///
    /// Relative segment paths are made absolute against the current
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be written.
    pub fn write(path: impl Into<PathBuf>, segments: &[PathBuf]) -> Result<Self> {
        let path = path.into();
        let entries = segments
            .iter()
            .map(|p| absolute(p))
            .collect::<io::Result<Vec<_>>>()?;

        fs::write(&path, render(&entries))?;
        debug!(manifest = %path.display(), entries = entries.len(), "Wrote concat manifest");

        Ok(Self { path, entries })
    }

    /// Path of the manifest file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Absolute segment paths, in order.
    #[must_use]
    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    /// Delete the manifest file. A manifest that is already gone is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn remove(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Render manifest lines for the given paths.
#[must_use]
pub fn render(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| format!("file '{}'\n", quote(&p.to_string_lossy())))
        .collect()
}

/// Escape single quotes for the concat demuxer: `'` becomes `'\''`.
fn quote(path: &str) -> String {
    path.replace('\'', r"'\''")
}

fn absolute(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
