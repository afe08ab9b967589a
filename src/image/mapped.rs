//! Memory-mapped image backend.
//!
//! Implements the `Image` trait over a file mapping. Read-write access uses a
//! shared mapping, so writes land in the file once flushed. Read-only access
//! uses a private copy-on-write mapping: the engine can run unchanged against
//! it and the file is never modified.

use super::{bounds, Image};
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// A ROM image file mapped into memory.
pub struct MappedImage {
    path: PathBuf,
    access: Access,
    map: MmapMut,
}

impl MappedImage {
    pub fn open(path: &Path, access: Access) -> io::Result<Self> {
        let map = match access {
            Access::ReadOnly => {
                let file = File::open(path)?;
                // SAFETY: single-writer assumption; nothing else modifies the
                // image while it is mapped.
                unsafe { MmapOptions::new().map_copy(&file)? }
            }
            Access::ReadWrite => {
                let file = OpenOptions::new().read(true).write(true).open(path)?;
                // SAFETY: as above.
                unsafe { MmapMut::map_mut(&file)? }
            }
        };
        tracing::debug!(
            "mapped {} ({} bytes, {:?})",
            path.display(),
            map.len(),
            access
        );
        Ok(Self {
            path: path.to_path_buf(),
            access,
            map,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Image for MappedImage {
    fn size(&self) -> u64 {
        self.map.len() as u64
    }

    fn read_at(&self, offset: u32, buf: &mut [u8]) -> io::Result<()> {
        let range = bounds(self.size(), offset, buf.len())?;
        buf.copy_from_slice(&self.map[range]);
        Ok(())
    }

    fn write_at(&mut self, offset: u32, data: &[u8]) -> io::Result<()> {
        let range = bounds(self.size(), offset, data.len())?;
        self.map[range].copy_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.access {
            Access::ReadWrite => self.map.flush(),
            Access::ReadOnly => Ok(()),
        }
    }
}
