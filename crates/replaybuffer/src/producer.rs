//! Segment producer supervision.
//!
//! The producer is an external `ffmpeg` process that records the capture
//! device into fixed-duration segments in the buffer directory. The
//! [`Supervisor`] starts it, restarts it when it dies, and stops it on
//! request. Every (re)start resumes numbering after the newest segment on
//! disk so buffered segments are never overwritten.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{Config, ProducerConfig};
use crate::error::{Error, Result};
use crate::manifest;
use crate::segment::{self, SegmentNaming};

const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the producer's command line.
///
/// `start_number` is the sequence number of the first segment this run
/// writes.
#[must_use]
pub fn args(
    producer: &ProducerConfig,
    segment_secs: u64,
    dir: &Path,
    naming: &SegmentNaming,
    start_number: u64,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];

    let input = [
        ("-f", producer.input_format.clone()),
        ("-framerate", producer.framerate.to_string()),
        ("-video_size", producer.video_size.clone()),
        ("-i", producer.device.clone()),
        ("-vcodec", producer.codec.clone()),
        ("-b:v", producer.bitrate.clone()),
        ("-f", "segment".to_string()),
        ("-segment_time", segment_secs.to_string()),
        ("-reset_timestamps", "1".to_string()),
        ("-segment_start_number", start_number.to_string()),
    ];
    for (flag, value) in input {
        args.push(flag.into());
        args.push(value.into());
    }

    args.push(dir.join(naming.producer_template()).into_os_string());
    args
}

/// Create the buffer directory and optionally clear what a previous run left.
///
/// Clearing removes segments and stale manifests. Clips are kept.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or listed.
pub fn prepare_directory(dir: &Path, naming: &SegmentNaming, clear: bool) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|source| Error::DirectoryCreate {
        path: dir.to_path_buf(),
        source,
    })?;

    if !clear {
        return Ok(());
    }

    let entries = std::fs::read_dir(dir).map_err(|source| Error::DirectoryUnavailable {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut removed = 0usize;
    for entry in entries.filter_map(std::result::Result::ok) {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if naming.parse(name).is_none() && !manifest::is_manifest_name(name) {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(file = %entry.path().display(), error = %e, "Failed to clear stale file"),
        }
    }

    if removed > 0 {
        info!(removed, dir = %dir.display(), "Cleared stale segments");
    }
    Ok(())
}

/// Sequence number the next producer run should start at.
///
/// # Errors
///
/// Returns an error if the directory cannot be scanned.
pub fn next_start_number(dir: &Path, naming: &SegmentNaming) -> Result<u64> {
    Ok(segment::scan(dir, naming, 0)?
        .newest_sequence()
        .map_or(0, |newest| newest + 1))
}

/// Runs and restarts the producer process.
#[derive(Debug, Clone)]
pub struct Supervisor {
    producer: ProducerConfig,
    segment_secs: u64,
    dir: PathBuf,
    naming: SegmentNaming,
    restart_delay: Duration,
    stop_timeout: Duration,
}

impl Supervisor {
    /// Create a supervisor.
    #[must_use]
    pub fn new(
        producer: ProducerConfig,
        segment_secs: u64,
        dir: impl Into<PathBuf>,
        naming: SegmentNaming,
    ) -> Self {
        let restart_delay = Duration::from_secs(producer.restart_delay_secs);
        Self {
            producer,
            segment_secs,
            dir: dir.into(),
            naming,
            restart_delay,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Create a supervisor from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured segment naming is invalid.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            config.producer.clone(),
            config.buffer.segment_duration_secs,
            config.segment_dir(),
            SegmentNaming::from_config(&config.buffer)?,
        ))
    }

    /// Override the delay between a crash and the next start.
    #[must_use]
    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Override how long a graceful stop may take before the process is
    /// killed.
    #[must_use]
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Start supervising in a background task.
    #[must_use]
    pub fn start(self) -> ProducerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let restarts = Arc::new(AtomicU32::new(0));
        let task = tokio::spawn(self.supervise(stop_rx, Arc::clone(&restarts)));

        ProducerHandle {
            stop: stop_tx,
            task,
            restarts,
        }
    }

    fn spawn_child(&self) -> Result<Child> {
        let start_number = next_start_number(&self.dir, &self.naming)?;
        let args = args(
            &self.producer,
            self.segment_secs,
            &self.dir,
            &self.naming,
            start_number,
        );
        debug!(program = %self.producer.program, ?args, "Launching producer");

        let child = Command::new(&self.producer.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::producer(format!("failed to launch {}: {e}", self.producer.program))
            })?;

        info!(pid = child.id(), start_number, "Producer started");
        Ok(child)
    }

    async fn supervise(
        self,
        mut stop: watch::Receiver<bool>,
        restarts: Arc<AtomicU32>,
    ) -> Result<()> {
        loop {
            let mut child = self.spawn_child()?;

            let status = tokio::select! {
                status = child.wait() => status,
                () = stop_requested(&mut stop) => {
                    self.stop_child(&mut child).await;
                    return Ok(());
                }
            };

            report_exit(&status);

            let attempt = restarts.load(Ordering::SeqCst) + 1;
            let limit = self.producer.max_restarts;
            if limit > 0 && attempt > limit {
                return Err(Error::producer(format!(
                    "producer exited {limit} times, giving up"
                )));
            }

            tokio::select! {
                () = tokio::time::sleep(self.restart_delay) => {}
                () = stop_requested(&mut stop) => return Ok(()),
            }
            restarts.store(attempt, Ordering::SeqCst);
            info!(attempt, "Restarting producer");
        }
    }

    /// Ask ffmpeg to finish its current segment by sending `q`, then kill it
    /// if it does not exit in time.
    async fn stop_child(&self, child: &mut Child) {
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(b"q\n").await {
                debug!(error = %e, "Producer stdin already closed");
            }
            drop(stdin);
        }

        match tokio::time::timeout(self.stop_timeout, child.wait()).await {
            Ok(status) => {
                debug!(?status, "Producer stopped");
            }
            Err(_) => {
                warn!(timeout = ?self.stop_timeout, "Producer did not stop, killing it");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill producer");
                }
            }
        }
    }
}

fn report_exit(status: &io::Result<ExitStatus>) {
    match status {
        Ok(status) if status.success() => warn!("Producer exited unexpectedly"),
        Ok(status) => warn!(%status, "Producer crashed"),
        Err(e) => warn!(error = %e, "Failed to wait on producer"),
    }
}

async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    while !*stop.borrow() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// Control handle for a running [`Supervisor`].
#[derive(Debug)]
pub struct ProducerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
    restarts: Arc<AtomicU32>,
}

impl ProducerHandle {
    /// Ask the producer to stop. Returns immediately; use [`Self::join`] to
    /// wait.
    pub fn terminate(&self) {
        self.stop.send_replace(true);
    }

    /// How many times the producer has been restarted.
    #[must_use]
    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::SeqCst)
    }

    /// Check if the supervisor task has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the supervisor to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the producer could not be started or exceeded its
    /// restart limit.
    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| Error::producer(format!("supervisor task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn naming() -> SegmentNaming {
        SegmentNaming::new("segment_", "mp4", 3).unwrap()
    }

    fn as_strings(args: &[OsString]) -> Vec<String> {
        args.iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_args_segment_muxer() {
        let args = as_strings(&args(
            &ProducerConfig::default(),
            6,
            Path::new("/buf"),
            &naming(),
            42,
        ));
        let joined = args.join(" ");

        assert!(joined.starts_with("-hide_banner -loglevel error -f v4l2"));
        assert!(joined.contains("-i /dev/video0"));
        assert!(joined.contains("-vcodec h264_v4l2m2m -b:v 8M"));
        assert!(joined.contains("-f segment -segment_time 6 -reset_timestamps 1"));
        assert!(joined.contains("-segment_start_number 42"));
        assert_eq!(args.last().map(String::as_str), Some("/buf/segment_%03d.mp4"));
    }

    #[test]
    fn test_prepare_directory_clears_segments_not_clips() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "segment_000.mp4",
            "segment_001.mp4",
            ".clip_20240601_120000.concat.txt",
            "clip_20240601_120000.mp4",
            "notes.txt",
        ] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }

        prepare_directory(dir.path(), &naming(), true).unwrap();

        let mut left: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left, vec!["clip_20240601_120000.mp4", "notes.txt"]);
    }

    #[test]
    fn test_prepare_directory_without_clear_keeps_segments() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = dir.path().join("nested/buffer");
        prepare_directory(&buffer, &naming(), false).unwrap();
        fs::write(buffer.join("segment_007.mp4"), b"x").unwrap();

        prepare_directory(&buffer, &naming(), false).unwrap();
        assert!(buffer.join("segment_007.mp4").exists());
    }

    #[test]
    fn test_next_start_number_resumes_after_newest() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(next_start_number(dir.path(), &naming()).unwrap(), 0);

        for seq in [3, 1000, 17] {
            fs::write(dir.path().join(naming().file_name(seq)), b"x").unwrap();
        }
        assert_eq!(next_start_number(dir.path(), &naming()).unwrap(), 1001);
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        /// Write an executable shell script that ignores its arguments.
        fn script(dir: &Path, body: &str) -> String {
            let path = dir.join("fake-ffmpeg");
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path.to_string_lossy().into_owned()
        }

        fn supervisor(dir: &Path, program: String, max_restarts: u32) -> Supervisor {
            let producer = ProducerConfig {
                program,
                max_restarts,
                ..ProducerConfig::default()
            };
            Supervisor::new(producer, 6, dir.join("buffer"), naming())
                .with_restart_delay(Duration::from_millis(10))
        }

        #[tokio::test]
        async fn test_gives_up_after_restart_limit() {
            let dir = tempfile::tempdir().unwrap();
            let program = script(dir.path(), "exit 1");
            fs::create_dir(dir.path().join("buffer")).unwrap();

            let handle = supervisor(dir.path(), program, 2).start();
            let restarts = Arc::clone(&handle.restarts);
            let result = tokio::time::timeout(Duration::from_secs(10), handle.join())
                .await
                .unwrap();

            assert!(matches!(result, Err(Error::Producer { .. })));
            assert_eq!(restarts.load(Ordering::SeqCst), 2);
        }

        #[tokio::test]
        async fn test_terminate_stops_gracefully() {
            let dir = tempfile::tempdir().unwrap();
            // Exits as soon as it reads the quit command
            let program = script(dir.path(), "read line\nexit 0");
            fs::create_dir(dir.path().join("buffer")).unwrap();

            let handle = supervisor(dir.path(), program, 0).start();
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(!handle.is_finished());

            handle.terminate();
            tokio::time::timeout(Duration::from_secs(5), handle.join())
                .await
                .unwrap()
                .unwrap();
        }

        #[tokio::test]
        async fn test_terminate_kills_stubborn_producer() {
            let dir = tempfile::tempdir().unwrap();
            let program = script(dir.path(), "exec sleep 30");
            fs::create_dir(dir.path().join("buffer")).unwrap();

            let handle = supervisor(dir.path(), program, 0)
                .with_stop_timeout(Duration::from_millis(100))
                .start();
            tokio::time::sleep(Duration::from_millis(100)).await;

            handle.terminate();
            tokio::time::timeout(Duration::from_secs(5), handle.join())
                .await
                .unwrap()
                .unwrap();
        }

        #[tokio::test]
        async fn test_missing_program_fails_to_start() {
            let dir = tempfile::tempdir().unwrap();
            fs::create_dir(dir.path().join("buffer")).unwrap();

            let handle = supervisor(
                dir.path(),
                "/nonexistent/replaybuffer-ffmpeg".to_string(),
                0,
            )
            .start();
            let result = tokio::time::timeout(Duration::from_secs(5), handle.join())
                .await
                .unwrap();
            assert!(matches!(result, Err(Error::Producer { .. })));
        }
    }
}
