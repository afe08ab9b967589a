//! Image access abstraction.
//!
//! The engine never touches files directly. It reads and writes the target
//! image through the `Image` trait, which is implemented for in-memory
//! buffers and for memory-mapped files.

use std::io;

pub mod mapped;

pub use mapped::{Access, MappedImage};

/// Random-access storage holding a ROM image.
pub trait Image {
    /// Size of the image in bytes.
    fn size(&self) -> u64;

    /// Fills `buf` with the bytes at `offset`. Reading past the end of the
    /// image is an `UnexpectedEof` error; nothing is read in that case.
    fn read_at(&self, offset: u32, buf: &mut [u8]) -> io::Result<()>;

    /// Writes `data` at `offset`. Writing past the end of the image is an
    /// error; images never grow.
    fn write_at(&mut self, offset: u32, data: &[u8]) -> io::Result<()>;

    /// Makes prior writes durable.
    fn flush(&mut self) -> io::Result<()>;
}

/// Byte range `[offset, offset + len)` if it lies inside an image of `size`.
pub(crate) fn bounds(size: u64, offset: u32, len: usize) -> io::Result<std::ops::Range<usize>> {
    let end = offset as u64 + len as u64;
    if end > size {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "0x{:08X}+{} lies beyond the end of the {}-byte image",
                offset, len, size
            ),
        ));
    }
    Ok(offset as usize..end as usize)
}

impl Image for Vec<u8> {
    fn size(&self) -> u64 {
        self.len() as u64
    }

    fn read_at(&self, offset: u32, buf: &mut [u8]) -> io::Result<()> {
        let range = bounds(self.size(), offset, buf.len())?;
        buf.copy_from_slice(&self[range]);
        Ok(())
    }

    fn write_at(&mut self, offset: u32, data: &[u8]) -> io::Result<()> {
        let range = bounds(self.size(), offset, data.len())?;
        self[range].copy_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
