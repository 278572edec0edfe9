//! Cross-process ownership of the segment directory.
//!
//! [`AssemblyFlag`](crate::AssemblyFlag) only serializes work inside one
//! process. A daemon and a one-shot `rebuf assemble` or `rebuf sweep` also
//! take an advisory lock on a file in the segment directory and hold it from
//! the directory scan until cleanup is done.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Name of the lock file inside the segment directory.
pub const LOCK_FILE_NAME: &str = ".rebuf.lock";

/// Exclusive advisory lock on a segment directory. Released on drop.
#[derive(Debug)]
pub struct DirectoryLock {
    file: File,
    path: PathBuf,
}

impl DirectoryLock {
    /// Take the lock for `dir` without waiting.
    ///
    /// Returns `Ok(None)` if another process, or another handle in this
    /// process, holds it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DirectoryUnavailable`] if the lock file cannot be
    /// opened in `dir`, and [`Error::Io`] if locking fails for another reason.
    pub fn try_acquire(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| Error::DirectoryUnavailable {
                path: dir.to_path_buf(),
                source,
            })?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                debug!(lock = %path.display(), "Segment directory locked");
                Ok(Some(Self { file, path }))
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                debug!(lock = %path.display(), "Segment directory locked elsewhere");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirectoryLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(lock = %self.path.display(), error = %e, "Failed to unlock segment directory");
        }
    }
}
