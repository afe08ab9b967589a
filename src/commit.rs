//! Commit workflow.
//!
//! Mutating commands never touch the target image directly. The image is
//! copied to a working file, the patch is verified and applied there, and a
//! second, independent pass re-reads both the patch file and the working copy
//! to confirm the new state. Only then is the working copy renamed over the
//! original. On any earlier failure the working copy is discarded; if the
//! rename itself fails it is kept.

use anyhow::{bail, Context, Result};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::PatchConfig;
use crate::engine::{Engine, VerifyReport};
use crate::image::{Access, Image, MappedImage};
use crate::patch::PatchFile;

/// Which way a patch is moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Apply,
    Remove,
}

impl Direction {
    /// Engine set up to verify the state this direction starts from.
    fn engine(self, patch: &PatchFile, config: PatchConfig) -> Engine {
        let mut engine = Engine::new(patch, config);
        if self == Direction::Remove {
            engine.reverse();
        }
        engine
    }

    /// Engine set up to verify the state this direction ends in.
    fn final_engine(self, patch: &PatchFile, config: PatchConfig) -> Engine {
        let mut engine = Engine::new(patch, config);
        if self == Direction::Apply {
            engine.reverse();
        }
        engine
    }
}

/// Path of the working copy for `image`, next to it.
pub fn working_path(image: &Path) -> PathBuf {
    let mut name = image
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("image"));
    name.push(".rompatch-work");
    image.with_file_name(name)
}

/// Deletes the working copy on drop unless it was promoted or kept.
struct WorkingCopy {
    path: PathBuf,
    keep: bool,
}

impl WorkingCopy {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    /// Renames the working copy over `target`. On failure the working copy
    /// stays on disk.
    fn promote(&mut self, target: &Path) -> std::io::Result<()> {
        if let Err(err) = fs::rename(&self.path, target) {
            self.keep = true;
            tracing::warn!("keeping verified working copy {}", self.path.display());
            return Err(err);
        }
        Ok(())
    }
}

impl Drop for WorkingCopy {
    fn drop(&mut self) {
        if !self.keep && self.path.exists() {
            if let Err(err) = fs::remove_file(&self.path) {
                tracing::warn!("failed to remove {}: {}", self.path.display(), err);
            }
        }
    }
}

/// Logs every failing descriptor of a report.
pub fn log_failures(report: &VerifyReport) {
    for check in report.failures() {
        tracing::error!(
            "0x{:08X}-0x{:08X}: {:?}",
            check.descriptor.start,
            check.descriptor.end,
            check.outcome
        );
    }
}

/// One-line count of failing ranges, e.g. `2 of 3 ranges differ (5 bytes)`.
/// Ranges without covering bytes count as failing but add no bytes.
pub fn summary(report: &VerifyReport) -> String {
    format!(
        "{} of {} ranges differ ({} bytes)",
        report.failures().count(),
        report.checks.len(),
        report.mismatched_bytes()
    )
}

/// Loads a patch and checks the image is in the state `direction` starts
/// from (for `Apply`) or has already reached (for `Remove`, the patched
/// state). Read-only.
pub fn check(
    patch_path: &Path,
    image_path: &Path,
    direction: Direction,
    config: PatchConfig,
) -> Result<VerifyReport> {
    let patch = PatchFile::load(patch_path, &config)?;
    let image = MappedImage::open(image_path, Access::ReadOnly)
        .with_context(|| format!("failed to open image {}", image_path.display()))?;
    let report = direction.engine(&patch, config).verify(&image)?;
    log_failures(&report);
    Ok(report)
}

/// Moves `image_path` through the patch in `direction`, replacing the file
/// only if the result verifies.
pub fn commit(
    patch_path: &Path,
    image_path: &Path,
    direction: Direction,
    config: PatchConfig,
) -> Result<()> {
    let patch = PatchFile::load(patch_path, &config)?;
    let mut work = WorkingCopy::new(working_path(image_path));
    fs::copy(image_path, &work.path).with_context(|| {
        format!(
            "failed to copy {} to {}",
            image_path.display(),
            work.path.display()
        )
    })?;
    tracing::info!("working copy {}", work.path.display());

    {
        let mut image = MappedImage::open(&work.path, Access::ReadWrite)
            .with_context(|| format!("failed to open {}", work.path.display()))?;
        let engine = direction.engine(&patch, config);

        let report = engine.verify(&image)?;
        if !report.is_ok() {
            log_failures(&report);
            match direction {
                Direction::Apply => bail!(
                    "patch is incompatible with {}: {}",
                    image_path.display(),
                    summary(&report)
                ),
                Direction::Remove => bail!(
                    "patch is not applied to {} (already removed?): {}",
                    image_path.display(),
                    summary(&report)
                ),
            }
        }

        let written = engine.apply(&mut image).context("failed to write patch")?;
        image.flush()?;
        tracing::info!("wrote {} bytes to {}", written, image.path().display());
    }

    let fresh = PatchFile::load(patch_path, &config).context("failed to re-read patch for verification")?;
    let image = MappedImage::open(&work.path, Access::ReadOnly)
        .with_context(|| format!("failed to reopen {}", work.path.display()))?;
    let report = direction.final_engine(&fresh, config).verify(&image)?;
    drop(image);
    if !report.is_ok() {
        log_failures(&report);
        bail!(
            "written image failed verification ({}); {} left unchanged",
            summary(&report),
            image_path.display()
        );
    }

    work.promote(image_path).with_context(|| {
        format!(
            "failed to replace {} with {}; the verified result is kept there",
            image_path.display(),
            work.path.display()
        )
    })?;
    tracing::info!("committed {}", image_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn working_copy_sits_next_to_image() {
        assert_eq!(
            working_path(Path::new("/tmp/roms/car.bin")),
            PathBuf::from("/tmp/roms/car.bin.rompatch-work")
        );
    }

    #[test]
    fn working_copy_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w");
        fs::write(&path, b"x").unwrap();
        drop(WorkingCopy::new(path.clone()));
        assert!(!path.exists());
    }

    #[test]
    fn promotion_replaces_target_and_consumes_working_copy() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("rom.bin");
        fs::write(&target, b"old").unwrap();
        let mut work = WorkingCopy::new(working_path(&target));
        fs::write(&work.path, b"new").unwrap();

        work.promote(&target).unwrap();
        drop(work);
        assert_eq!(fs::read(&target).unwrap(), b"new");
        assert!(!working_path(&target).exists());
    }

    #[test]
    fn failed_promotion_keeps_working_copy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rom.bin.rompatch-work");
        fs::write(&path, b"verified").unwrap();

        let mut work = WorkingCopy::new(path.clone());
        assert!(work.promote(&dir.path().join("missing").join("rom.bin")).is_err());
        drop(work);
        assert_eq!(fs::read(&path).unwrap(), b"verified");
    }

    #[test]
    fn summary_counts_uncovered_ranges() {
        use crate::blob::Side;
        use crate::engine::{Check, Outcome};
        use crate::error::CoverageError;
        use crate::metadata::Descriptor;

        let descriptor = Descriptor { start: 0x10, end: 0x13 };
        let report = VerifyReport {
            checks: vec![
                Check {
                    descriptor,
                    outcome: Outcome::Uncovered(CoverageError::Uncovered {
                        side: Side::Before,
                        address: 0x10,
                    }),
                },
                Check {
                    descriptor,
                    outcome: Outcome::Match,
                },
            ],
        };
        assert_eq!(summary(&report), "1 of 2 ranges differ (0 bytes)");
    }
}
