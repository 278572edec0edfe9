//! Trigger sources.
//!
//! A trigger source watches some external signal and fires "assemble now"
//! events into a [`TriggerSender`]. The sender debounces: triggers closer
//! together than the debounce window are dropped, and the channel holds at
//! most one pending event so a burst never queues more than one assembly.

mod gpio;
#[cfg(unix)]
mod signal;

pub use gpio::SysfsGpioTrigger;
#[cfg(unix)]
pub use signal::SignalTrigger;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use crate::config::{Config, TriggerKind};
use crate::error::Result;

/// One accepted trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerEvent {
    /// Name of the source that fired.
    pub source: &'static str,
    /// When the trigger was accepted.
    pub at: Instant,
}

/// Suppresses triggers that follow an accepted one too closely.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last: Option<Instant>,
}

impl Debouncer {
    /// Create a debouncer with the given minimum spacing.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Decide whether a trigger at `now` is accepted.
    pub fn accept(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) < self.window {
                return false;
            }
        }
        self.last = Some(now);
        true
    }
}

/// Sending half of the trigger channel.
#[derive(Debug)]
pub struct TriggerSender {
    tx: mpsc::Sender<TriggerEvent>,
    debouncer: Debouncer,
}

impl TriggerSender {
    /// Fire a trigger from `source`.
    ///
    /// Returns `true` if the event was queued, `false` if it was debounced,
    /// coalesced with a pending event, or nobody is listening.
    pub fn fire(&mut self, source: &'static str) -> bool {
        let now = Instant::now();
        if !self.debouncer.accept(now) {
            trace!(source, "Trigger debounced");
            return false;
        }

        match self.tx.try_send(TriggerEvent { source, at: now }) {
            Ok(()) => {
                debug!(source, "Trigger fired");
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(source, "Trigger coalesced with pending event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Check if the receiving side has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create a single-slot trigger channel with the given debounce window.
#[must_use]
pub fn channel(debounce: Duration) -> (TriggerSender, mpsc::Receiver<TriggerEvent>) {
    let (tx, rx) = mpsc::channel(1);
    (
        TriggerSender {
            tx,
            debouncer: Debouncer::new(debounce),
        },
        rx,
    )
}

/// A trait for things that produce trigger events.
#[async_trait]
pub trait TriggerSource: Send + std::fmt::Debug {
    /// The name of this source (for logging/debugging).
    fn name(&self) -> &'static str;

    /// Watch for triggers until `shutdown` flips to `true` or the receiver
    /// is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be set up.
    async fn run(
        &mut self,
        sender: TriggerSender,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()>;
}

/// Build the trigger source selected in the configuration.
///
/// # Errors
///
/// Returns an error if the selected source is unsupported on this platform.
pub fn from_config(config: &Config) -> Result<Box<dyn TriggerSource>> {
    match config.trigger.kind {
        TriggerKind::Gpio => Ok(Box::new(SysfsGpioTrigger::from_config(config))),
        #[cfg(unix)]
        TriggerKind::Signal => Ok(Box::new(SignalTrigger::new())),
        #[cfg(not(unix))]
        TriggerKind::Signal => Err(crate::error::Error::trigger(
            "signal",
            "signal triggers are only supported on Unix",
        )),
    }
}

/// Wait until `shutdown` is `true` or its sender is dropped.
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
