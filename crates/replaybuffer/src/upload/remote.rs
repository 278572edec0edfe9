//! Remote clip storage.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};

/// An object listed in the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteEntry {
    /// Object name relative to the remote folder.
    pub name: String,
    /// Modification time as reported by the remote, RFC 3339.
    #[serde(default)]
    pub mod_time: String,
    /// Whether the entry is a directory.
    #[serde(default)]
    pub is_dir: bool,
    /// Size in bytes, or -1 if unknown.
    #[serde(default)]
    pub size: i64,
}

impl RemoteEntry {
    /// The parsed modification time, if the remote reported a valid one.
    #[must_use]
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.mod_time)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// A trait for remote folders clips are published to.
#[async_trait]
pub trait RemoteStore: Send + Sync + std::fmt::Debug {
    /// The name of this store (for logging/debugging).
    fn name(&self) -> &'static str;

    /// Copy `local` to the remote folder as `remote_name`, replacing any
    /// existing object with that name.
    async fn upload(&self, local: &Path, remote_name: &str) -> Result<()>;

    /// List the remote folder.
    async fn list(&self) -> Result<Vec<RemoteEntry>>;

    /// Delete one object from the remote folder.
    async fn delete(&self, remote_name: &str) -> Result<()>;
}

/// Remote store driven by the `rclone` command line.
#[derive(Debug, Clone)]
pub struct RcloneStore {
    program: String,
    remote: String,
}

impl RcloneStore {
    /// Create a store for `remote`, e.g. `dropbox:clips`.
    #[must_use]
    pub fn new(program: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            remote: remote.into(),
        }
    }

    /// Full rclone path of `name` inside the remote folder.
    #[must_use]
    pub fn object_path(&self, name: &str) -> String {
        if self.remote.ends_with(':') {
            format!("{}{name}", self.remote)
        } else {
            format!("{}/{name}", self.remote.trim_end_matches('/'))
        }
    }

    async fn run(&self, operation: &'static str, args: Vec<OsString>) -> Result<Vec<u8>> {
        debug!(program = %self.program, ?args, "Running rclone");

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                Error::remote(self.name(), operation, format!("failed to launch {}: {e}", self.program))
            })?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(Error::remote(
                self.name(),
                operation,
                format!("exited with {}: {}", output.status, stderr.trim()),
            ))
        }
    }
}

#[async_trait]
impl RemoteStore for RcloneStore {
    fn name(&self) -> &'static str {
        "rclone"
    }

    async fn upload(&self, local: &Path, remote_name: &str) -> Result<()> {
        self.run(
            "upload",
            vec![
                "copyto".into(),
                local.as_os_str().to_owned(),
                self.object_path(remote_name).into(),
            ],
        )
        .await
        .map(|_| ())
    }

    async fn list(&self) -> Result<Vec<RemoteEntry>> {
        let stdout = self
            .run("list", vec!["lsjson".into(), self.remote.clone().into()])
            .await?;
        Ok(serde_json::from_slice(&stdout)?)
    }

    async fn delete(&self, remote_name: &str) -> Result<()> {
        self.run(
            "delete",
            vec!["deletefile".into(), self.object_path(remote_name).into()],
        )
        .await
        .map(|_| ())
    }
}
