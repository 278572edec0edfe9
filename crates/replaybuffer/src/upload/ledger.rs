//! Record of clips that reached the remote store.
//!
//! A clip recorded here is never uploaded again, even after a restart.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};

use super::migrations;
use crate::error::{Error, Result};

/// One uploaded clip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadRecord {
    /// Clip file name, also its remote name.
    pub name: String,
    /// BLAKE3 hash of the clip contents, hex encoded.
    pub content_hash: String,
    /// Clip size in bytes.
    pub size: u64,
    /// When the upload finished.
    pub uploaded_at: DateTime<Utc>,
}

/// `SQLite` ledger of uploaded clips.
#[derive(Debug)]
pub struct UploadLedger {
    path: PathBuf,
    conn: Connection,
}

impl UploadLedger {
    /// Open or create the ledger at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening upload ledger at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::LedgerOpen {
            path: path.clone(),
            source,
        })?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Upload ledger opened at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::LedgerOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Path to the ledger database.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if a clip with this name was uploaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn contains(&self, name: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM uploads WHERE name = ?1",
            [name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Find an uploaded clip with identical contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn find_by_hash(&self, content_hash: &str) -> Result<Option<UploadRecord>> {
        Ok(self
            .conn
            .query_row(
                "SELECT name, content_hash, size, uploaded_at FROM uploads
                 WHERE content_hash = ?1 LIMIT 1",
                [content_hash],
                row_to_record,
            )
            .optional()?)
    }

    /// Record an upload. Returns `false` if the name was already recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn record(&self, record: &UploadRecord) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO uploads (name, content_hash, size, uploaded_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.name,
                record.content_hash,
                i64::try_from(record.size).unwrap_or(i64::MAX),
                record.uploaded_at.to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    }

    /// The most recent uploads, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn recent(&self, limit: usize) -> Result<Vec<UploadRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, content_hash, size, uploaded_at FROM uploads
             ORDER BY uploaded_at DESC, id DESC LIMIT ?1",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = stmt
            .query_map([limit], row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Number of recorded uploads.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn count(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM uploads", [], |row| row.get(0))?)
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<UploadRecord> {
    let size: i64 = row.get(2)?;
    let uploaded_at: String = row.get(3)?;
    Ok(UploadRecord {
        name: row.get(0)?,
        content_hash: row.get(1)?,
        size: u64::try_from(size).unwrap_or(0),
        uploaded_at: DateTime::parse_from_rfc3339(&uploaded_at)
            .map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc)),
    })
}
