//! Command-line interface for replaybuffer.
//!
//! This module provides the CLI structure for the `rebuf` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::logging::{LogStyle, Verbosity};

pub use commands::{
    AssembleCommand, ConfigCommand, RunCommand, StatusCommand, SweepCommand, UploadCommand,
};

/// rebuf - Keep the last minute of video, save it on demand
///
/// Records a camera into a rolling buffer of short segments and, when
/// triggered, joins the most recent ones into a clip without re-encoding.
#[derive(Debug, Parser)]
#[command(name = "rebuf")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the recorder: producer, trigger, assembler, janitor and uploader
    Run(RunCommand),

    /// Assemble a clip from the buffer right now
    Assemble(AssembleCommand),

    /// Show buffer status
    Status(StatusCommand),

    /// Prune old segments once
    Sweep(SweepCommand),

    /// Publish the newest clip and apply remote retention once
    Upload(UploadCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.verbose, self.quiet)
    }

    /// Daemon-style logs for `run`, terse logs for everything else.
    #[must_use]
    pub fn log_style(&self) -> LogStyle {
        match self.command {
            Command::Run(_) => LogStyle::Daemon,
            _ => LogStyle::Command,
        }
    }
}
