//! Patch engine.
//!
//! This module contains the `Engine` struct which runs a decoded patch
//! against a ROM image:
//! 1. Verify: checks the image holds the baseline bytes of every descriptor.
//! 2. Apply: writes the patch bytes of every descriptor.
//! 3. Reverse: swaps baseline and patch bytes, so verify and apply implement
//!    patch removal.
//! 4. Baseline extraction: records the image's current bytes as baseline
//!    S-records for patch authoring.

use crate::blob::{BlobSet, Side};
use crate::config::PatchConfig;
use crate::error::{CoverageError, EngineError};
use crate::image::{bounds, Image};
use crate::metadata::Descriptor;
use crate::patch::PatchFile;
use crate::record;
use crate::utils::hex_bytes;

/// Result of checking one descriptor against an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Match,
    /// `bytes` bytes differ; `first` is the lowest differing address.
    Mismatch { bytes: usize, first: u32 },
    /// No baseline blob covers the descriptor.
    Uncovered(CoverageError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub descriptor: Descriptor,
    pub outcome: Outcome,
}

/// Per-descriptor results of a verify pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub checks: Vec<Check>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.checks.iter().all(|c| c.outcome == Outcome::Match)
    }

    /// Total differing bytes across all descriptors.
    pub fn mismatched_bytes(&self) -> usize {
        self.checks
            .iter()
            .map(|c| match c.outcome {
                Outcome::Mismatch { bytes, .. } => bytes,
                _ => 0,
            })
            .sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| c.outcome != Outcome::Match)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Engine {
    config: PatchConfig,
    descriptors: Vec<Descriptor>,
    blobs: BlobSet,
    reversed: bool,
}

impl Engine {
    pub fn new(patch: &PatchFile, config: PatchConfig) -> Self {
        Self::from_parts(patch.metadata.descriptors.clone(), patch.blobs.clone(), config)
    }

    pub fn from_parts(descriptors: Vec<Descriptor>, blobs: BlobSet, config: PatchConfig) -> Self {
        Self {
            config,
            descriptors,
            blobs,
            reversed: false,
        }
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    /// Swaps the roles of baseline and patch bytes.
    ///
    /// Afterwards `verify` checks the image holds the patched bytes and
    /// `apply` writes the baseline back.
    pub fn reverse(&mut self) {
        self.blobs.swap_sides();
        self.reversed = !self.reversed;
        tracing::debug!("engine reversed: {}", self.reversed);
    }

    /// Compares the image against the baseline bytes of every descriptor.
    ///
    /// All descriptors are checked even after a failure so the report is
    /// complete. Only I/O errors (including reads past the end of the image)
    /// abort the pass. Failures are left to the caller to report.
    pub fn verify<I: Image + ?Sized>(&self, image: &I) -> Result<VerifyReport, EngineError> {
        let mut report = VerifyReport::default();
        for d in &self.descriptors {
            let outcome = match self.blobs.find(Side::Before, d.start, d.len()) {
                Err(err) => Outcome::Uncovered(err),
                Ok(expected) => {
                    bounds(image.size(), d.start, d.len())?;
                    let mut actual = vec![0u8; d.len()];
                    image.read_at(d.start, &mut actual)?;
                    compare(d, expected, &actual)
                }
            };
            report.checks.push(Check {
                descriptor: *d,
                outcome,
            });
        }
        Ok(report)
    }

    /// Writes the patch bytes of every descriptor into the image.
    ///
    /// Stops at the first descriptor without a covering patch blob. Writes
    /// made for earlier descriptors stay in place; callers that need
    /// all-or-nothing behaviour run this against a working copy.
    pub fn apply<I: Image + ?Sized>(&self, image: &mut I) -> Result<usize, EngineError> {
        let mut written = 0;
        for d in &self.descriptors {
            let data = self
                .blobs
                .find(Side::After, d.start, d.len())
                .inspect_err(|err| tracing::error!("0x{:08X}-0x{:08X}: {}", d.start, d.end, err))?;
            image.write_at(d.start, data)?;
            tracing::debug!("wrote {} bytes at 0x{:08X}", data.len(), d.start);
            written += data.len();
        }
        Ok(written)
    }

    /// Reads the image's current bytes under every descriptor and encodes them
    /// as baseline S-records, framed by a header and a terminator.
    pub fn extract_baseline<I: Image + ?Sized>(&self, image: &I) -> Result<Vec<String>, EngineError> {
        let mut lines = vec![record::encode_header("baseline")];
        let mut data_records = 0u32;
        for d in &self.descriptors {
            bounds(image.size(), d.start, d.len())?;
            let mut current = vec![0u8; d.len()];
            image.read_at(d.start, &mut current)?;
            let address = self.config.transport_address(Side::Before, d.start);
            let encoded = record::encode_data(address, &current, self.config.record_width);
            data_records += encoded.len() as u32;
            lines.extend(encoded);
        }
        lines.extend(record::encode_count(data_records));
        lines.push(record::encode_terminator(0));
        Ok(lines)
    }
}

fn compare(d: &Descriptor, expected: &[u8], actual: &[u8]) -> Outcome {
    let mut differing = expected
        .iter()
        .zip(actual)
        .enumerate()
        .filter(|(_, (e, a))| e != a)
        .map(|(i, _)| i);
    let Some(first) = differing.next() else {
        return Outcome::Match;
    };
    let bytes = 1 + differing.count();
    tracing::debug!(
        "0x{:08X}-0x{:08X}: {} byte(s) differ\n  expected {}\n  found    {}",
        d.start,
        d.end,
        bytes,
        hex_bytes(expected),
        hex_bytes(actual)
    );
    Outcome::Mismatch {
        bytes,
        first: d.start + first as u32,
    }
}
