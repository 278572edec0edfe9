//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Daemon command arguments.
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Do not start the segment producer (segments come from elsewhere)
    #[arg(long)]
    pub no_producer: bool,

    /// Do not publish clips even if uploads are enabled
    #[arg(long)]
    pub no_upload: bool,
}

/// One-shot assembly arguments.
#[derive(Debug, Args)]
pub struct AssembleCommand {
    /// Output the assembly report as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// One-shot janitor arguments.
#[derive(Debug, Args)]
pub struct SweepCommand {
    /// Output the cleanup report as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// One-shot upload arguments.
#[derive(Debug, Args)]
pub struct UploadCommand {
    /// Output the upload report as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_command_debug() {
        let cmd = RunCommand {
            no_producer: true,
            no_upload: false,
        };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("no_producer"));
    }

    #[test]
    fn test_status_command_debug() {
        let cmd = StatusCommand { json: true };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("json"));
    }

    #[test]
    fn test_config_command_debug() {
        let cmd = ConfigCommand::Show { json: false };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Show"));
    }
}
