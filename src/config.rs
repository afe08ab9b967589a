//! Configuration module.
//!
//! This module defines the command-line interface using `clap`, and the
//! fixed layout constants of the patch format. The constants are gathered in
//! a [`PatchConfig`] value that is handed to the loader and the engine, so
//! they can be exercised against synthetic versions and layouts.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::blob::Side;

/// Version of the patch format this engine implements. Patch files must
/// carry exactly this version.
pub const ENGINE_VERSION: u32 = 1;

/// Transport addresses at or above this hold baseline bytes.
pub const BASELINE_OFFSET: u32 = 0x8000_0000;

/// Transport address of the metadata blob.
pub const METADATA_ADDRESS: u32 = 0x7FFF_0000;

/// Payload bytes per emitted S-record line.
pub const RECORD_WIDTH: usize = 16;

/// Firmware patcher for S-record patch files.
///
/// Patches are applied to a working copy of the image, verified, and only
/// then renamed over the original.
#[derive(Parser, Debug)]
#[command(name = "rompatch", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info", help = "Set the logging level")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the records, ranges and metadata of a patch file
    Inspect {
        /// Patch file (S-records)
        patch: PathBuf,
    },

    /// Check that a patch can be applied to an image
    Test {
        /// Patch file (S-records)
        patch: PathBuf,
        /// ROM image
        image: PathBuf,
    },

    /// Apply a patch to an image
    Apply {
        /// Patch file (S-records)
        patch: PathBuf,
        /// ROM image, replaced on success
        image: PathBuf,
    },

    /// Check whether a patch is already applied to an image
    Applied {
        /// Patch file (S-records)
        patch: PathBuf,
        /// ROM image
        image: PathBuf,
    },

    /// Remove a previously applied patch from an image
    Remove {
        /// Patch file (S-records)
        patch: PathBuf,
        /// ROM image, replaced on success
        image: PathBuf,
    },

    /// Emit the image's current bytes under every patched range as baseline records
    Baseline {
        /// Patch file (S-records)
        patch: PathBuf,
        /// ROM image
        image: PathBuf,
        /// Output file (defaults to stdout)
        #[arg(short, long, help = "Write baseline records to this file")]
        output: Option<PathBuf>,
    },
}

/// Layout parameters of the patch format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchConfig {
    pub engine_version: u32,
    pub baseline_offset: u32,
    pub metadata_address: u32,
    pub record_width: usize,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            engine_version: ENGINE_VERSION,
            baseline_offset: BASELINE_OFFSET,
            metadata_address: METADATA_ADDRESS,
            record_width: RECORD_WIDTH,
        }
    }
}

impl PatchConfig {
    /// Splits a transport address into its side and image address.
    pub fn classify(&self, address: u32) -> (Side, u32) {
        if address >= self.baseline_offset {
            (Side::Before, address - self.baseline_offset)
        } else {
            (Side::After, address)
        }
    }

    /// Whether a transport address lies in the window reserved for metadata,
    /// from `metadata_address` up to the baseline half.
    pub fn is_metadata(&self, address: u32) -> bool {
        address >= self.metadata_address && address < self.baseline_offset
    }

    /// Transport address for an image address on `side`.
    pub fn transport_address(&self, side: Side, address: u32) -> u32 {
        match side {
            Side::Before => address.wrapping_add(self.baseline_offset),
            Side::After => address,
        }
    }
}
