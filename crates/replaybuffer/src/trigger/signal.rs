//! Trigger on `SIGUSR1`, for installs without a button (`kill -USR1 <pid>`).

use async_trait::async_trait;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{debug, info};

use super::{TriggerSender, TriggerSource};
use crate::error::{Error, Result};

const NAME: &str = "signal";

/// Fires a trigger each time the process receives `SIGUSR1`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalTrigger;

impl SignalTrigger {
    /// Create a signal trigger.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TriggerSource for SignalTrigger {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn run(
        &mut self,
        mut sender: TriggerSender,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut usr1 = signal(SignalKind::user_defined1())
            .map_err(|e| Error::trigger(NAME, format!("cannot install SIGUSR1 handler: {e}")))?;

        info!(pid = std::process::id(), "Watching SIGUSR1 trigger");

        loop {
            tokio::select! {
                received = usr1.recv() => {
                    if received.is_none() || sender.is_closed() {
                        break;
                    }
                    sender.fire(NAME);
                }
                () = super::stopped(&mut shutdown) => break,
            }
        }

        debug!("Signal trigger stopped");
        Ok(())
    }
}
