//! Segment reclamation.
//!
//! Both the assembler's cleaning stage and the periodic janitor remove
//! segments through [`remove_segments`]. Removal is best effort: every failure
//! is logged and collected, and a file that is already gone counts as removed
//! so that running the same cleanup twice is harmless.
//!
//! The janitor keeps the newest `keep` complete segments plus the unconfirmed
//! tail, so a trigger arriving right after a sweep still finds a full window.
//! A sweep holds both the assembly flag and the [`DirectoryLock`], so it never
//! runs while any process is assembling from the same directory.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::assembler::AssemblyFlag;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::lock::DirectoryLock;
use crate::segment::{self, Segment, SegmentNaming};

/// A segment that could not be removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupFailure {
    /// Path of the segment.
    pub path: PathBuf,
    /// Why removal failed.
    pub message: String,
}

/// Outcome of removing a set of segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Segments deleted by this call.
    pub removed: Vec<PathBuf>,
    /// Segments that were already gone.
    pub already_absent: Vec<PathBuf>,
    /// Segments that could not be deleted.
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    /// Check if every segment is gone from disk.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Remove the given segments from disk.
pub fn remove_segments<'a>(segments: impl IntoIterator<Item = &'a Segment>) -> CleanupReport {
    let mut report = CleanupReport::default();

    for segment in segments {
        match std::fs::remove_file(&segment.path) {
            Ok(()) => {
                debug!(segment = %segment.path.display(), "Removed segment");
                report.removed.push(segment.path.clone());
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                report.already_absent.push(segment.path.clone());
            }
            Err(e) => {
                warn!(segment = %segment.path.display(), error = %e, "Failed to remove segment");
                report.failures.push(CleanupFailure {
                    path: segment.path.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    report
}

/// Run filesystem work on the blocking pool.
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Io(io::Error::other(e)))?
}

/// Periodic pruning of the segment directory between triggers.
#[derive(Debug, Clone)]
pub struct Janitor {
    dir: PathBuf,
    naming: SegmentNaming,
    keep: usize,
    settle: usize,
    flag: AssemblyFlag,
}

impl Janitor {
    /// Create a janitor that keeps the newest `keep` complete segments.
    #[must_use]
    pub fn new(
        dir: impl Into<PathBuf>,
        naming: SegmentNaming,
        keep: usize,
        settle: usize,
        flag: AssemblyFlag,
    ) -> Self {
        Self {
            dir: dir.into(),
            naming,
            keep,
            settle,
            flag,
        }
    }

    /// Create a janitor from configuration, sharing the assembler's flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured segment naming is invalid.
    pub fn from_config(config: &Config, flag: AssemblyFlag) -> Result<Self> {
        Ok(Self::new(
            config.segment_dir(),
            SegmentNaming::from_config(&config.buffer)?,
            config.buffer.window_segments,
            config.buffer.settle_segments,
            flag,
        ))
    }

    /// The directory this janitor prunes.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Run one sweep.
    ///
    /// Returns `Ok(None)` without touching the directory if an assembly is in
    /// progress in this process or another one.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment directory cannot be locked or scanned.
    pub fn sweep(&self) -> Result<Option<CleanupReport>> {
        let Some(_guard) = self.flag.try_acquire_sweep() else {
            debug!("Assembly in progress, skipping sweep");
            return Ok(None);
        };
        let Some(_lock) = DirectoryLock::try_acquire(&self.dir)? else {
            debug!("Segment directory busy in another process, skipping sweep");
            return Ok(None);
        };

        let listing = segment::scan(&self.dir, &self.naming, self.settle)?;
        let complete = listing.complete();
        if complete.len() <= self.keep {
            return Ok(Some(CleanupReport::default()));
        }

        let cutoff = complete[complete.len() - self.keep].sequence;
        let report = remove_segments(listing.all().iter().filter(|s| s.sequence < cutoff));

        if !report.removed.is_empty() {
            info!(
                removed = report.removed.len(),
                failed = report.failures.len(),
                kept_from = cutoff,
                "Janitor pruned old segments"
            );
        }
        Ok(Some(report))
    }

    /// Sweep every `interval` until `shutdown` flips to `true`.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let janitor = self.clone();
                    if let Err(e) = run_blocking(move || janitor.sweep()).await {
                        warn!(error = %e, "Janitor sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Janitor stopping");
                        break;
                    }
                }
            }
        }
    }
}
