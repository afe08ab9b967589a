//! Entry point for the rompatch tool.
//!
//! This file handles high-level application flow:
//! 1. Parse command-line arguments using `clap`.
//! 2. Initialize logging at the requested level.
//! 3. Dispatch to the requested command.
//!
//! Error handling is done via `anyhow`; any error ends the process with a
//! non-zero exit status.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::fs;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use rompatch::blob::Side;
use rompatch::commit::{self, Direction};
use rompatch::config::{Cli, Command, PatchConfig};
use rompatch::engine::Engine;
use rompatch::image::{Access, MappedImage};
use rompatch::patch::PatchFile;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = PatchConfig::default();

    match cli.command {
        Command::Inspect { patch } => inspect(&patch, config),
        Command::Test { patch, image } => {
            let report = commit::check(&patch, &image, Direction::Apply, config)?;
            if !report.is_ok() {
                bail!(
                    "patch is incompatible with {}: {}",
                    image.display(),
                    commit::summary(&report)
                );
            }
            println!("Patch can be applied to {}", image.display());
            Ok(())
        }
        Command::Apply { patch, image } => {
            commit::commit(&patch, &image, Direction::Apply, config)?;
            println!("Patch applied to {}", image.display());
            Ok(())
        }
        Command::Applied { patch, image } => {
            let report = commit::check(&patch, &image, Direction::Remove, config)?;
            if !report.is_ok() {
                bail!(
                    "patch is not applied to {}: {}",
                    image.display(),
                    commit::summary(&report)
                );
            }
            println!("Patch is applied to {}", image.display());
            Ok(())
        }
        Command::Remove { patch, image } => {
            commit::commit(&patch, &image, Direction::Remove, config)?;
            println!("Patch removed from {}", image.display());
            Ok(())
        }
        Command::Baseline {
            patch,
            image,
            output,
        } => {
            let decoded = PatchFile::load(&patch, &config)?;
            let rom = MappedImage::open(&image, Access::ReadOnly)
                .with_context(|| format!("failed to open image {}", image.display()))?;
            let lines = Engine::new(&decoded, config).extract_baseline(&rom)?;
            let mut text = lines.join("\n");
            text.push('\n');
            match output {
                Some(path) => fs::write(&path, text)
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => print!("{}", text),
            }
            Ok(())
        }
    }
}

fn inspect(path: &Path, config: PatchConfig) -> Result<()> {
    let patch = PatchFile::load(path, &config)?;
    let meta = &patch.metadata;

    println!("Patch file:   {}", path.display());
    if !patch.header.is_empty() {
        println!("Header:       {}", patch.header);
    }
    println!("Version:      {}", meta.version);
    println!("Source image: {}", meta.calibration.source_id());
    println!("Target image: {}", meta.calibration.target_id());
    println!("Data records: {}", patch.data_records);

    for side in [Side::After, Side::Before] {
        println!("{} ranges:", side);
        for blob in patch.blobs.blobs(side) {
            println!(
                "  0x{:08X}-0x{:08X} ({} bytes)",
                blob.base,
                blob.end(),
                blob.data.len()
            );
        }
    }

    println!("Patches:");
    for d in &meta.descriptors {
        println!("  0x{:08X}-0x{:08X} ({} bytes)", d.start, d.end, d.len());
    }
    Ok(())
}
