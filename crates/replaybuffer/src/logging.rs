//! Tracing setup for `rebuf`.
//!
//! Events always go to stderr; stdout carries command output such as
//! `rebuf status --json`. The daemon logs timestamped lines with event
//! targets, one-shot commands print the level and message only.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How much `rebuf` logs, from `-q` / `-v` / `-vv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Info and above.
    #[default]
    Normal,
    /// Debug and above.
    Verbose,
    /// Everything.
    Trace,
}

impl Verbosity {
    /// Map the command-line flags. `quiet` wins over any `-v`.
    #[must_use]
    pub fn from_flags(verbose: u8, quiet: bool) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Normal,
            (false, 1) => Self::Verbose,
            (false, _) => Self::Trace,
        }
    }

    /// The most detailed level shown.
    #[must_use]
    pub fn level(self) -> LevelFilter {
        match self {
            Self::Quiet => LevelFilter::ERROR,
            Self::Normal => LevelFilter::INFO,
            Self::Verbose => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// Line layout of log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStyle {
    /// `rebuf run`: timestamps and targets, for a journal.
    Daemon,
    /// One-shot commands: level and message.
    Command,
}

/// Filter used when `RUST_LOG` is unset: the library and the `rebuf` binary
/// target, both at the verbosity's level.
#[must_use]
pub fn default_directives(verbosity: Verbosity) -> String {
    let level = verbosity.level().to_string().to_lowercase();
    format!("replaybuffer={level},rebuf={level}")
}

/// Install the global subscriber. `RUST_LOG` overrides `verbosity`.
///
/// A second call is a no-op.
///
/// ```no_run
/// use replaybuffer::logging::{LogStyle, Verbosity};
///
/// replaybuffer::init_logging(Verbosity::Verbose, LogStyle::Daemon);
/// ```
pub fn init_logging(verbosity: Verbosity, style: LogStyle) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbosity)));
    let layer = fmt::layer().with_writer(std::io::stderr);

    let installed = match style {
        LogStyle::Daemon => tracing_subscriber::registry()
            .with(filter)
            .with(layer.with_target(true))
            .try_init(),
        LogStyle::Command => tracing_subscriber::registry()
            .with(filter)
            .with(layer.with_target(false).without_time())
            .try_init(),
    };
    let _ = installed;
}
