//! Push-button trigger on a sysfs GPIO line.
//!
//! The line is polled rather than interrupt driven; only the inactive to
//! active edge fires, so holding the button down triggers once.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{TriggerSender, TriggerSource};
use crate::config::Config;
use crate::error::{Error, Result};

const NAME: &str = "gpio";

/// Polls `<root>/gpio<pin>/value` for a rising edge.
#[derive(Debug, Clone)]
pub struct SysfsGpioTrigger {
    root: PathBuf,
    pin: u32,
    active_low: bool,
    poll_interval: Duration,
}

impl SysfsGpioTrigger {
    /// Create a trigger for `pin` under the sysfs GPIO root.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, pin: u32, active_low: bool, poll_interval: Duration) -> Self {
        Self {
            root: root.into(),
            pin,
            active_low,
            poll_interval,
        }
    }

    /// Create a trigger from the `[trigger]` configuration section.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.trigger.sysfs_root,
            config.trigger.pin,
            config.trigger.active_low,
            config.poll_interval(),
        )
    }

    fn pin_dir(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.pin))
    }

    fn value_path(&self) -> PathBuf {
        self.pin_dir().join("value")
    }

    /// Export the pin as an input if the kernel has not done so yet.
    async fn export(&self) {
        if self.pin_dir().exists() {
            return;
        }

        debug!(pin = self.pin, "Exporting GPIO pin");
        if let Err(e) = tokio::fs::write(self.root.join("export"), self.pin.to_string()).await {
            warn!(pin = self.pin, error = %e, "Failed to export GPIO pin");
            return;
        }
        if let Err(e) = tokio::fs::write(self.pin_dir().join("direction"), "in").await {
            warn!(pin = self.pin, error = %e, "Failed to set GPIO direction");
        }
    }

    async fn read(&self, path: &Path) -> Option<bool> {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => is_active(&raw, self.active_low),
            Err(e) => {
                warn!(pin = self.pin, error = %e, "Failed to read GPIO value");
                None
            }
        }
    }
}

/// Interpret a sysfs `value` file.
///
/// Returns `None` for anything other than `0` or `1`.
#[must_use]
pub fn is_active(raw: &str, active_low: bool) -> Option<bool> {
    let high = match raw.trim() {
        "1" => true,
        "0" => false,
        _ => return None,
    };
    Some(high != active_low)
}

#[async_trait]
impl TriggerSource for SysfsGpioTrigger {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(
        &mut self,
        mut sender: TriggerSender,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        self.export().await;

        let value = self.value_path();
        if !value.exists() {
            return Err(Error::trigger(
                NAME,
                format!("{} does not exist", value.display()),
            ));
        }

        info!(pin = self.pin, active_low = self.active_low, "Watching GPIO trigger");

        // Treat the initial level as already seen so a stuck button does not
        // fire on startup.
        let mut was_active = self.read(&value).await.unwrap_or(false);
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if sender.is_closed() {
                        break;
                    }
                    let Some(active) = self.read(&value).await else {
                        continue;
                    };
                    if active && !was_active {
                        sender.fire(NAME);
                    }
                    was_active = active;
                }
                () = super::stopped(&mut shutdown) => break,
            }
        }

        debug!(pin = self.pin, "GPIO trigger stopped");
        Ok(())
    }
}
