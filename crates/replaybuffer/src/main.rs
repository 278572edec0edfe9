//! `rebuf` - CLI for replaybuffer
//!
//! This binary runs the replay buffer daemon and the one-shot maintenance
//! commands.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use replaybuffer::cli::{Cli, Command, ConfigCommand};
use replaybuffer::daemon::{self, DaemonOptions};
use replaybuffer::janitor::Janitor;
use replaybuffer::muxer::FfmpegMuxer;
use replaybuffer::upload::{PublishOutcome, Uploader};
use replaybuffer::{init_logging, status, Assembler, AssemblyFlag, AssemblyOutcome, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity(), cli.log_style());

    let config_path = cli.config.clone();
    let load = || Config::load_from(config_path.clone()).context("loading configuration");

    match cli.command {
        Command::Run(run) => {
            let config = load()?;
            let mut options = DaemonOptions::from_config(&config);
            options.producer &= !run.no_producer;
            options.upload &= !run.no_upload;
            daemon::run(config, options).await?;
        }
        Command::Assemble(cmd) => handle_assemble(&load()?, cmd.json).await?,
        Command::Status(cmd) => handle_status(&load()?, cmd.json)?,
        Command::Sweep(cmd) => handle_sweep(&load()?, cmd.json)?,
        Command::Upload(cmd) => handle_upload(&load()?, cmd.json).await?,
        Command::Config(ConfigCommand::Show { json }) => handle_config_show(&load()?, json)?,
        Command::Config(ConfigCommand::Path) => {
            println!(
                "{}",
                cli.config
                    .unwrap_or_else(Config::default_config_path)
                    .display()
            );
        }
        Command::Config(ConfigCommand::Validate { file }) => {
            let path = file
                .or(cli.config)
                .unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => anyhow::bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}

async fn handle_assemble(config: &Config, json: bool) -> anyhow::Result<()> {
    let muxer = Arc::new(FfmpegMuxer::new(config.muxer.program.clone()));
    let assembler = Assembler::from_config(config, muxer)?;

    let report = match assembler.assemble().await {
        Ok(report) => report,
        Err(e) if e.is_insufficient_data() || e.is_assembly_in_progress() => {
            println!("No clip: {e}");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Window:    {} segments ({}..={})",
        report.window.len(),
        report.window.first_sequence(),
        report.window.last_sequence()
    );
    for gap in &report.gaps {
        println!("Gap:       {gap}");
    }
    for sequence in &report.duplicates {
        println!("Duplicate: sequence {sequence} has several files");
    }
    match &report.outcome {
        AssemblyOutcome::Clip { path } => println!("Clip:      {}", path.display()),
        AssemblyOutcome::MuxerFailed { message } => println!("Failed:    {message}"),
    }
    println!(
        "Reclaimed: {} segments ({} already gone, {} failed)",
        report.cleanup.removed.len(),
        report.cleanup.already_absent.len(),
        report.cleanup.failures.len()
    );
    Ok(())
}

fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let status = status::collect(config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("rebuf status");
    println!("------------");
    println!("Directory:   {}", status.directory.display());
    println!(
        "Segments:    {} on disk, {} complete, {} in flight",
        status.segments,
        status.complete,
        status.in_flight.len()
    );
    if let (Some(oldest), Some(newest)) = (status.oldest_sequence, status.newest_sequence) {
        println!("Sequence:    {oldest}..={newest}");
    }
    match &status.window {
        Some(window) => {
            println!(
                "Next clip:   {}..={} ({} segments)",
                window.first, window.last, window.len
            );
            for gap in &window.gaps {
                println!("  gap:       {gap}");
            }
            for sequence in &window.duplicates {
                println!("  duplicate: sequence {sequence}");
            }
        }
        None => println!(
            "Next clip:   not ready ({} of {} segments)",
            status.complete, status.window_segments
        ),
    }
    println!("Clips:       {}", status.clips.len());
    for clip in status.clips.iter().rev().take(5) {
        println!("  {:<32} {:>12} bytes", clip.name, clip.size);
    }
    Ok(())
}

fn handle_sweep(config: &Config, json: bool) -> anyhow::Result<()> {
    // Coordinates with a running daemon through the directory lock
    let janitor = Janitor::from_config(config, AssemblyFlag::new())?;
    let Some(report) = janitor.sweep()? else {
        println!("Assembly in progress, nothing swept.");
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Removed {} segments ({} failed).",
            report.removed.len(),
            report.failures.len()
        );
        for failure in &report.failures {
            println!("  {}: {}", failure.path.display(), failure.message);
        }
    }
    Ok(())
}

async fn handle_upload(config: &Config, json: bool) -> anyhow::Result<()> {
    let uploader = Uploader::from_config(config)?;
    let pass = uploader.run_once().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&pass)?);
        return Ok(());
    }

    match &pass.publish {
        Some(PublishOutcome::Uploaded { name, attempts }) => {
            println!("Uploaded {name} ({attempts} attempt(s)).");
        }
        Some(PublishOutcome::AlreadyUploaded { name }) => println!("{name} was already uploaded."),
        Some(PublishOutcome::Failed { name, message }) => {
            println!("Failed to upload {name}: {message}");
        }
        None => println!("No clip to upload."),
    }
    match &pass.purge {
        Some(purge) => println!(
            "Remote retention: {} deleted, {} kept, {} skipped, {} failed.",
            purge.deleted.len(),
            purge.kept.len(),
            purge.skipped.len(),
            purge.failed.len()
        ),
        None => println!("Remote retention: listing failed."),
    }
    Ok(())
}

fn handle_config_show(config: &Config, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    println!("Current Configuration");
    println!("=====================");
    println!();
    println!("[Buffer]");
    println!("  Directory:          {}", config.segment_dir().display());
    println!(
        "  Segments:           {}<{}>.{}",
        config.buffer.segment_prefix, config.buffer.sequence_width, config.buffer.segment_extension
    );
    println!("  Segment duration:   {}s", config.buffer.segment_duration_secs);
    println!("  Window:             {} segments", config.buffer.window_segments);
    println!("  Settle:             {} segments", config.buffer.settle_segments);
    println!("  Janitor interval:   {}s", config.buffer.janitor_interval_secs);
    println!();
    println!("[Producer]");
    println!("  Enabled:            {}", config.producer.enabled);
    println!(
        "  Input:              {} {}",
        config.producer.input_format, config.producer.device
    );
    println!(
        "  Encoding:           {} @ {}",
        config.producer.codec, config.producer.bitrate
    );
    println!();
    println!("[Trigger]");
    println!("  Kind:               {:?}", config.trigger.kind);
    println!("  Pin:                {}", config.trigger.pin);
    println!("  Debounce:           {}ms", config.trigger.debounce_ms);
    println!();
    println!("[Upload]");
    println!("  Enabled:            {}", config.upload.enabled);
    println!("  Remote:             {}", config.upload.remote);
    println!("  Retention:          {}h", config.upload.retention_hours);
    println!("  Ledger:             {}", config.ledger_path().display());
    Ok(())
}
