//! Blob input: a file plus a logical read position.
//!
//! A `BlobInput` provides two coordinated views over one blob file:
//!
//! - a **sequential** view (`io::Read`) used by the header and schema
//!   parsers and by the on-heap copy path;
//! - a **mapped** view (`map_remainder`) used by the segmented arrays in
//!   shared-memory modes to reference payload bytes without copying.
//!
//! The file cursor and the mapped region advance independently: an array
//! that takes mapped views over its payload still calls [`BlobInput::skip`]
//! so the next sequential read starts after the payload.

use crate::mode::MemoryMode;
use memmap2::Mmap;
use shale_core::{ShaleError, ShaleResult};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

/// A blob file opened for reading under a [`MemoryMode`].
pub struct BlobInput {
    file: File,
    position: u64,
    len: u64,
    mode: MemoryMode,
    region: Option<Arc<Mmap>>,
}

impl BlobInput {
    /// Open the blob at `path`.
    ///
    /// In `SharedMemoryEager` mode the whole file is mapped and prefaulted
    /// immediately; in `SharedMemoryLazy` mode mapping is deferred until the
    /// first payload read requests it.
    pub fn open(path: impl AsRef<Path>, mode: MemoryMode) -> ShaleResult<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let mut input = BlobInput {
            file,
            position: 0,
            len,
            mode,
            region: None,
        };
        if mode == MemoryMode::SharedMemoryEager && len > 0 {
            let region = input.ensure_region()?;
            #[cfg(unix)]
            region.advise(memmap2::Advice::WillNeed)?;
            prefault(&region);
        }
        Ok(input)
    }

    /// The active memory mode.
    pub fn mode(&self) -> MemoryMode {
        self.mode
    }

    /// Current logical read position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Total blob length in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the blob is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes between the current position and the end of the blob.
    pub fn remaining(&self) -> u64 {
        self.len - self.position
    }

    /// Advance the read position by `count` bytes without consuming them.
    ///
    /// Skipping past the end of the blob is a framing defect of the stream
    /// being walked, so it fails with `MalformedBlob`.
    pub fn skip(&mut self, count: u64) -> ShaleResult<()> {
        if count > self.remaining() {
            return Err(ShaleError::malformed(format!(
                "skip of {count} bytes runs past end of blob ({} remaining)",
                self.remaining()
            )));
        }
        self.file.seek(SeekFrom::Current(count as i64))?;
        self.position += count;
        Ok(())
    }

    /// The mapped region covering the whole blob, plus the byte offset of
    /// the current read position within it.
    ///
    /// The region is created on first use and shared by every segmented
    /// array populated from this input; each array holds its own `Arc` so
    /// the mapping outlives the input.
    pub fn map_remainder(&mut self) -> ShaleResult<(Arc<Mmap>, usize)> {
        let offset = self.position as usize;
        let region = self.ensure_region()?;
        Ok((region, offset))
    }

    fn ensure_region(&mut self) -> ShaleResult<Arc<Mmap>> {
        if let Some(region) = &self.region {
            return Ok(Arc::clone(region));
        }
        // SAFETY: the mapping is read-only and the file was opened
        // read-only. Truncation of the underlying file while mapped is
        // outside the blob contract.
        let mmap = unsafe { Mmap::map(&self.file) }?;
        let region = Arc::new(mmap);
        self.region = Some(Arc::clone(&region));
        Ok(region)
    }
}

impl Read for BlobInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.file.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

/// Touch one byte per page so the mapping is resident before reads start.
fn prefault(region: &Mmap) {
    const PAGE: usize = 4096;
    let mut acc = 0u8;
    let mut index = 0;
    while index < region.len() {
        acc ^= region[index];
        index += PAGE;
    }
    std::hint::black_box(acc);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn blob_with(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_sequential_read_advances_position() {
        let file = blob_with(b"abcdef");
        let mut input = BlobInput::open(file.path(), MemoryMode::SharedMemoryLazy).unwrap();

        let mut buf = [0u8; 3];
        input.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");
        assert_eq!(input.position(), 3);
        assert_eq!(input.remaining(), 3);
    }

    #[test]
    fn test_skip_and_read() {
        let file = blob_with(b"abcdef");
        let mut input = BlobInput::open(file.path(), MemoryMode::SharedMemoryLazy).unwrap();

        input.skip(4).unwrap();
        let mut buf = [0u8; 2];
        input.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ef");
        assert_eq!(input.remaining(), 0);
    }

    #[test]
    fn test_skip_past_end_is_malformed() {
        let file = blob_with(b"abc");
        let mut input = BlobInput::open(file.path(), MemoryMode::SharedMemoryLazy).unwrap();

        let err = input.skip(4).unwrap_err();
        assert!(matches!(err, ShaleError::MalformedBlob { .. }));
    }

    #[test]
    fn test_map_remainder_reflects_position() {
        let file = blob_with(b"abcdef");
        let mut input = BlobInput::open(file.path(), MemoryMode::SharedMemoryLazy).unwrap();
        input.skip(2).unwrap();

        let (region, offset) = input.map_remainder().unwrap();
        assert_eq!(offset, 2);
        assert_eq!(&region[offset..], b"cdef");
    }

    #[test]
    fn test_mapped_region_is_shared() {
        let file = blob_with(b"abcdef");
        let mut input = BlobInput::open(file.path(), MemoryMode::SharedMemoryLazy).unwrap();

        let (a, _) = input.map_remainder().unwrap();
        let (b, _) = input.map_remainder().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_eager_mode_maps_at_open() {
        let file = blob_with(&vec![7u8; 16384]);
        let mut input = BlobInput::open(file.path(), MemoryMode::SharedMemoryEager).unwrap();
        let (region, _) = input.map_remainder().unwrap();
        assert_eq!(region.len(), 16384);
    }
}
