//! The long-running recorder.
//!
//! Wires the producer supervisor, trigger source, assembler, janitor and
//! uploader together and runs them until Ctrl-C or `SIGTERM`.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::assembler::{Assembler, AssemblyOutcome, AssemblyReport};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::janitor::Janitor;
use crate::muxer::FfmpegMuxer;
use crate::producer::{self, Supervisor};
use crate::segment::SegmentNaming;
use crate::trigger::{self, TriggerEvent};
use crate::upload::Uploader;

/// Parts of the daemon that can be switched off from the command line.
#[derive(Debug, Clone, Copy)]
pub struct DaemonOptions {
    /// Start and supervise the segment producer.
    pub producer: bool,
    /// Publish clips to the remote store.
    pub upload: bool,
}

impl DaemonOptions {
    /// Options as configured.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            producer: config.producer.enabled,
            upload: config.upload.enabled,
        }
    }
}

/// Run the recorder until interrupted.
///
/// # Errors
///
/// Returns an error if the buffer directory cannot be prepared, a component
/// cannot be built from the configuration, or the producer gives up.
pub async fn run(config: Config, options: DaemonOptions) -> Result<()> {
    let dir = config.segment_dir();
    let naming = SegmentNaming::from_config(&config.buffer)?;
    producer::prepare_directory(
        &dir,
        &naming,
        options.producer && config.producer.clear_on_start,
    )?;
    info!(
        dir = %dir.display(),
        window = config.buffer.window_segments,
        span = ?config.clip_span(),
        "Replay buffer starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let muxer = Arc::new(FfmpegMuxer::new(config.muxer.program.clone()));
    let assembler = Arc::new(Assembler::from_config(&config, muxer)?);

    if let Some(interval) = config.janitor_interval() {
        let janitor = Janitor::from_config(&config, assembler.flag().clone())?;
        tasks.push(tokio::spawn(janitor.run(interval, shutdown_rx.clone())));
    }

    let clips_tx = if options.upload {
        let uploader = Arc::new(Uploader::from_config(&config)?);
        let (tx, rx) = mpsc::channel::<PathBuf>(4);
        tasks.push(tokio::spawn(uploader.run(rx, shutdown_rx.clone())));
        Some(tx)
    } else {
        None
    };

    let (trigger_tx, mut triggers) = trigger::channel(config.debounce());
    let mut source = trigger::from_config(&config)?;
    let source_name = source.name();
    let trigger_shutdown = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = source.run(trigger_tx, trigger_shutdown).await {
            error!(source = source_name, error = %e, "Trigger source stopped");
        }
    }));

    let mut producer = if options.producer {
        Some(Supervisor::from_config(&config)?.start())
    } else {
        None
    };

    let (reports_tx, mut reports) = mpsc::channel::<Result<AssemblyReport>>(1);
    let mut result = Ok(());
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = triggers.recv() => {
                let Some(event) = event else {
                    result = Err(Error::trigger(source_name, "trigger source stopped"));
                    break;
                };
                dispatch(&assembler, event, &reports_tx);
            }
            report = reports.recv() => {
                if let Some(report) = report {
                    handle_report(report, clips_tx.as_ref());
                }
            }
            () = producer_finished(producer.as_ref()) => {
                if let Some(handle) = producer.take() {
                    result = handle.join().await;
                    if let Err(e) = &result {
                        error!(error = %e, "Producer stopped for good");
                    }
                }
                break;
            }
            () = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    shutdown_tx.send_replace(true);
    if let Some(handle) = producer {
        handle.terminate();
        if let Err(e) = handle.join().await {
            warn!(error = %e, "Producer did not shut down cleanly");
        }
    }
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Background task failed");
        }
    }

    info!("Replay buffer stopped");
    result
}

/// Start an assembly for `event` unless one is already running.
fn dispatch(
    assembler: &Arc<Assembler>,
    event: TriggerEvent,
    reports: &mpsc::Sender<Result<AssemblyReport>>,
) {
    let Some(handle) = assembler.spawn() else {
        info!(
            source = event.source,
            state = %assembler.flag().state(),
            "Assembly in progress, trigger dropped"
        );
        return;
    };

    info!(source = event.source, "Trigger accepted");
    let reports = reports.clone();
    tokio::spawn(async move {
        let report = match handle.await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Assembly task panicked");
                return;
            }
        };
        let _ = reports.send(report).await;
    });
}

/// Log the outcome of an assembly and announce a new clip to the uploader.
///
/// Never waits on the uploader. A busy uploader publishes the newest clip on
/// its next pass anyway.
fn handle_report(report: Result<AssemblyReport>, clips: Option<&mpsc::Sender<PathBuf>>) {
    let report = match report {
        Ok(report) => report,
        Err(e) if e.is_insufficient_data() => {
            info!("Buffer still filling, no clip: {e}");
            return;
        }
        Err(e) if e.is_assembly_in_progress() => {
            info!("No clip: {e}");
            return;
        }
        Err(e) => {
            warn!(error = %e, "Assembly did not run");
            return;
        }
    };

    match &report.outcome {
        AssemblyOutcome::Clip { path } => {
            match clips.map(|clips| clips.try_send(path.clone())) {
                None | Some(Ok(())) => {}
                Some(Err(TrySendError::Full(_))) => {
                    debug!(clip = %path.display(), "Uploader busy, clip left for its next pass");
                }
                Some(Err(TrySendError::Closed(_))) => {
                    debug!("Uploader gone, clip not announced");
                }
            }
        }
        AssemblyOutcome::MuxerFailed { message } => {
            warn!(%message, "No clip from this trigger");
        }
    }
}

async fn producer_finished(producer: Option<&producer::ProducerHandle>) {
    match producer {
        Some(handle) => {
            while !handle.is_finished() {
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            }
        }
        None => std::future::pending().await,
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::ClipNaming;
    use crate::muxer::Muxer;
    use crate::manifest::Manifest;
    use async_trait::async_trait;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    #[derive(Debug)]
    struct SlowMuxer;

    #[async_trait]
    impl Muxer for SlowMuxer {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn concat(&self, _manifest: &Manifest, output: &Path) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            fs::write(output, b"clip")?;
            Ok(())
        }
    }

    #[test]
    fn test_options_from_config() {
        let mut config = Config::default();
        config.upload.enabled = true;
        let options = DaemonOptions::from_config(&config);
        assert!(options.producer);
        assert!(options.upload);
    }

    #[tokio::test]
    async fn test_dispatch_drops_trigger_while_assembling() {
        let dir = tempfile::tempdir().unwrap();
        for seq in 0..12 {
            fs::write(dir.path().join(format!("segment_{seq:03}.mp4")), b"x").unwrap();
        }
        let assembler = Arc::new(Assembler::new(
            dir.path(),
            SegmentNaming::new("segment_", "mp4", 3).unwrap(),
            ClipNaming::new("clip_", "mp4").unwrap(),
            10,
            1,
            Arc::new(SlowMuxer),
        ));
        let (reports_tx, mut reports) = mpsc::channel(4);
        let event = TriggerEvent {
            source: "test",
            at: std::time::Instant::now(),
        };

        dispatch(&assembler, event, &reports_tx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        dispatch(&assembler, event, &reports_tx);

        let report = tokio::time::timeout(Duration::from_secs(5), reports.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(report.clip().is_some());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(reports.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handle_report_announces_clip() {
        let dir = tempfile::tempdir().unwrap();
        for seq in 0..12 {
            fs::write(dir.path().join(format!("segment_{seq:03}.mp4")), b"x").unwrap();
        }
        let assembler = Assembler::new(
            dir.path(),
            SegmentNaming::new("segment_", "mp4", 3).unwrap(),
            ClipNaming::new("clip_", "mp4").unwrap(),
            10,
            1,
            Arc::new(SlowMuxer),
        );
        let report = assembler.assemble().await;
        let (clips_tx, mut clips_rx) = mpsc::channel(1);

        handle_report(report, Some(&clips_tx));
        let announced = clips_rx.try_recv().unwrap();
        assert!(announced.starts_with(dir.path()));
    }

    #[tokio::test]
    async fn test_handle_report_does_not_wait_for_busy_uploader() {
        let dir = tempfile::tempdir().unwrap();
        for seq in 0..12 {
            fs::write(dir.path().join(format!("segment_{seq:03}.mp4")), b"x").unwrap();
        }
        let assembler = Assembler::new(
            dir.path(),
            SegmentNaming::new("segment_", "mp4", 3).unwrap(),
            ClipNaming::new("clip_", "mp4").unwrap(),
            10,
            1,
            Arc::new(SlowMuxer),
        );
        let report = assembler.assemble().await;
        let (clips_tx, mut clips_rx) = mpsc::channel(1);
        clips_tx.try_send(PathBuf::from("/buf/clip_older.mp4")).unwrap();

        handle_report(report, Some(&clips_tx));

        assert_eq!(clips_rx.try_recv().unwrap(), PathBuf::from("/buf/clip_older.mp4"));
        assert!(clips_rx.try_recv().is_err());
    }

    #[test]
    fn test_handle_report_without_uploader() {
        handle_report(Err(Error::AssemblyInProgress), None);
        handle_report(
            Err(Error::InsufficientData {
                available: 3,
                required: 10,
            }),
            None,
        );
    }
}
