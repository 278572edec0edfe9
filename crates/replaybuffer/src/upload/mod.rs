//! Clip publishing and remote retention.
//!
//! The [`Uploader`] hands the newest local clip to a [`RemoteStore`] together
//! with a fixed-name alias, records it in the [`UploadLedger`] so it is never
//! sent twice, and then purges remote objects older than the retention age.

mod ledger;
mod migrations;
mod remote;
mod schema;

pub use ledger::{UploadLedger, UploadRecord};
pub use remote::{RcloneStore, RemoteEntry, RemoteStore};

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::clip::{self, Clip, ClipNaming};
use crate::config::Config;
use crate::error::Result;
use crate::janitor;

/// How often the background uploader re-checks without a new clip.
const IDLE_PASS_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Result of trying to publish one clip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PublishOutcome {
    /// The clip and its alias were uploaded.
    Uploaded {
        /// Clip file name.
        name: String,
        /// Attempts it took.
        attempts: u32,
    },
    /// The ledger already holds this clip.
    AlreadyUploaded {
        /// Clip file name.
        name: String,
    },
    /// Every attempt failed.
    Failed {
        /// Clip file name.
        name: String,
        /// The last error.
        message: String,
    },
}

/// Result of one retention pass over the remote folder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    /// Objects deleted for exceeding the retention age.
    pub deleted: Vec<String>,
    /// Objects still within the retention age.
    pub kept: Vec<String>,
    /// Objects whose modification time could not be parsed.
    pub skipped: Vec<String>,
    /// Objects that should have been deleted but could not be.
    pub failed: Vec<String>,
}

/// Result of [`Uploader::run_once`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UploadPass {
    /// What happened to the newest clip, `None` if there was no clip.
    pub publish: Option<PublishOutcome>,
    /// Retention pass, `None` if the remote could not be listed.
    pub purge: Option<PurgeReport>,
}

/// Publishes clips to a remote store.
#[derive(Debug)]
pub struct Uploader {
    clips_dir: PathBuf,
    naming: ClipNaming,
    store: Arc<dyn RemoteStore>,
    ledger: Mutex<UploadLedger>,
    latest_alias: Option<String>,
    attempts: u32,
    retry_delay: Duration,
    retention: Duration,
}

impl Uploader {
    /// Create an uploader.
    ///
    /// `attempts` is the number of tries per clip before giving up.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clips_dir: impl Into<PathBuf>,
        naming: ClipNaming,
        store: Arc<dyn RemoteStore>,
        ledger: UploadLedger,
        latest_alias: Option<String>,
        attempts: u32,
        retry_delay: Duration,
        retention: Duration,
    ) -> Self {
        Self {
            clips_dir: clips_dir.into(),
            naming,
            store,
            ledger: Mutex::new(ledger),
            latest_alias,
            attempts: attempts.max(1),
            retry_delay,
            retention,
        }
    }

    /// Create an uploader from configuration with an rclone store.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be opened or clip naming is
    /// invalid.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = Arc::new(RcloneStore::new(
            config.upload.program.clone(),
            config.upload.remote.clone(),
        ));
        Ok(Self::new(
            config.segment_dir(),
            ClipNaming::from_config(&config.buffer)?,
            store,
            UploadLedger::open(config.ledger_path())?,
            config.upload.latest_alias.clone(),
            config.upload.retries,
            config.retry_delay(),
            config.retention(),
        ))
    }

    fn ledger(&self) -> MutexGuard<'_, UploadLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Most recent uploads, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger query fails.
    pub fn recent_uploads(&self, limit: usize) -> Result<Vec<UploadRecord>> {
        self.ledger().recent(limit)
    }

    /// Upload `clip` and the alias unless the ledger already has it.
    ///
    /// Transient failures are retried. Exhausting every attempt is reported
    /// as [`PublishOutcome::Failed`], not as an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the clip cannot be read or the ledger fails.
    pub async fn publish(&self, clip: &Clip) -> Result<PublishOutcome> {
        if self.ledger().contains(&clip.name)? {
            debug!(clip = %clip.name, "Clip already uploaded");
            return Ok(PublishOutcome::AlreadyUploaded {
                name: clip.name.clone(),
            });
        }

        let path = clip.path.clone();
        let (content_hash, size) = janitor::run_blocking(move || hash_file(&path)).await?;

        if let Some(existing) = self.ledger().find_by_hash(&content_hash)? {
            info!(clip = %clip.name, same_as = %existing.name, "Identical clip already uploaded");
            return Ok(PublishOutcome::AlreadyUploaded {
                name: clip.name.clone(),
            });
        }

        let mut last_error = String::new();
        for attempt in 1..=self.attempts {
            match self.upload_with_alias(clip).await {
                Ok(()) => {
                    self.ledger().record(&UploadRecord {
                        name: clip.name.clone(),
                        content_hash,
                        size,
                        uploaded_at: Utc::now(),
                    })?;
                    info!(clip = %clip.name, attempt, "Clip uploaded");
                    return Ok(PublishOutcome::Uploaded {
                        name: clip.name.clone(),
                        attempts: attempt,
                    });
                }
                Err(e) => {
                    warn!(clip = %clip.name, attempt, error = %e, "Upload failed");
                    last_error = e.to_string();
                    if attempt < self.attempts {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        error!(clip = %clip.name, attempts = self.attempts, "Giving up on clip upload");
        Ok(PublishOutcome::Failed {
            name: clip.name.clone(),
            message: last_error,
        })
    }

    async fn upload_with_alias(&self, clip: &Clip) -> Result<()> {
        self.store.upload(&clip.path, &clip.name).await?;
        if let Some(alias) = &self.latest_alias {
            self.store.upload(&clip.path, alias).await?;
        }
        Ok(())
    }

    /// Delete remote objects modified before `now - retention`.
    ///
    /// Directories are ignored. Objects with an unparseable modification time
    /// are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote folder cannot be listed.
    pub async fn purge(&self, now: DateTime<Utc>) -> Result<PurgeReport> {
        let cutoff = chrono::Duration::from_std(self.retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut report = PurgeReport::default();

        for entry in self.store.list().await? {
            if entry.is_dir {
                continue;
            }
            let Some(modified) = entry.modified() else {
                warn!(object = %entry.name, mod_time = %entry.mod_time, "Unparseable remote modification time, skipping");
                report.skipped.push(entry.name);
                continue;
            };

            if modified >= cutoff {
                report.kept.push(entry.name);
                continue;
            }

            match self.store.delete(&entry.name).await {
                Ok(()) => {
                    info!(object = %entry.name, %modified, "Deleted expired remote clip");
                    report.deleted.push(entry.name);
                }
                Err(e) => {
                    warn!(object = %entry.name, error = %e, "Failed to delete expired remote clip");
                    report.failed.push(entry.name);
                }
            }
        }

        Ok(report)
    }

    /// Publish the newest local clip, then run a retention pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the clip directory cannot be read, the clip cannot
    /// be hashed, or the ledger fails.
    pub async fn run_once(&self) -> Result<UploadPass> {
        let publish = match clip::latest(&self.clips_dir, &self.naming)? {
            Some(clip) => Some(self.publish(&clip).await?),
            None => {
                debug!(dir = %self.clips_dir.display(), "No clip to upload");
                None
            }
        };

        let purge = match self.purge(Utc::now()).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "Remote retention pass failed");
                None
            }
        };

        Ok(UploadPass { publish, purge })
    }

    /// Run a pass whenever a clip is announced on `clips`, and periodically
    /// otherwise, until `shutdown` flips to `true` or `clips` closes.
    pub async fn run(
        self: Arc<Self>,
        mut clips: mpsc::Receiver<PathBuf>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(IDLE_PASS_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                clip = clips.recv() => {
                    let Some(clip) = clip else { break };
                    debug!(clip = %clip.display(), "New clip announced");
                }
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if let Err(e) = self.run_once().await {
                warn!(error = %e, "Upload pass failed");
            }
        }

        debug!("Uploader stopping");
    }
}

/// BLAKE3 hash (hex) and size of a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let size = io::copy(&mut file, &mut hasher)?;
    Ok((hasher.finalize().to_hex().to_string(), size))
}
