//! Segmented byte array.
//!
//! A logical byte sequence indexed by a 64-bit offset, composed of
//! power-of-two segments: `segment = index >> L`, `offset = index & (2^L-1)`.
//! Segments are views into the blob's mapped region (shared modes) or
//! recycler-owned buffers (on-heap mode). The segment vector grows by 3/2;
//! segments themselves are never resized or copied, so held references to
//! the mapped region stay valid for the life of the array.

use crate::blob_input::BlobInput;
use crate::recycler::SegmentRecycler;
use crate::segment::Segment;
use memmap2::Mmap;
use shale_core::{ShaleError, ShaleResult};
use std::io::Read;
use std::sync::Arc;

/// A growable logical byte array over mapped or pooled segments.
pub struct SegmentedByteArray {
    segments: Vec<Option<Segment>>,
    log2_of_segment_size: u32,
    bitmask: u64,
    length: u64,
    /// Owning handle that keeps the mapped region alive for the views in
    /// `segments`. Dropped last, after the views are cleared.
    region: Option<Arc<Mmap>>,
}

impl SegmentedByteArray {
    /// Create an empty array whose segment size comes from the recycler.
    pub fn new(recycler: &SegmentRecycler) -> Self {
        let log2 = recycler.log2_byte_segment_size();
        SegmentedByteArray {
            segments: Vec::new(),
            log2_of_segment_size: log2,
            bitmask: (1u64 << log2) - 1,
            length: 0,
            region: None,
        }
    }

    /// Number of populated bytes.
    pub fn len(&self) -> u64 {
        self.length
    }

    /// Whether the array holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The byte at `index`.
    pub fn get(&self, index: u64) -> ShaleResult<u8> {
        if index >= self.length {
            return Err(ShaleError::OutOfRange {
                index,
                max: self.length.saturating_sub(1),
            });
        }
        let segment = self.segment(index)?;
        Ok(segment.as_bytes()[(index & self.bitmask) as usize])
    }

    /// Copy `out.len()` bytes starting at `index` into `out`.
    ///
    /// Chunked per segment rather than byte-at-a-time; used by var-width
    /// field reads to materialize strings and byte payloads.
    pub fn copy_to(&self, index: u64, out: &mut [u8]) -> ShaleResult<()> {
        let end = index + out.len() as u64;
        if end > self.length {
            return Err(ShaleError::OutOfRange {
                index: end.saturating_sub(1),
                max: self.length.saturating_sub(1),
            });
        }
        let mut copied = 0usize;
        let mut cursor = index;
        while copied < out.len() {
            let segment = self.segment(cursor)?;
            let offset = (cursor & self.bitmask) as usize;
            let bytes = segment.as_bytes();
            let chunk = (bytes.len() - offset).min(out.len() - copied);
            out[copied..copied + chunk].copy_from_slice(&bytes[offset..offset + chunk]);
            copied += chunk;
            cursor += chunk as u64;
        }
        Ok(())
    }

    /// Populate the array with exactly `length` bytes from the input's
    /// current position, advancing the input by `length`.
    ///
    /// Shared modes take non-copying views into the blob's mapped region
    /// and retain a handle to keep it alive; on-heap mode copies into
    /// recycler-owned segments.
    pub fn read_from(
        &mut self,
        input: &mut BlobInput,
        recycler: &mut SegmentRecycler,
        length: u64,
    ) -> ShaleResult<()> {
        self.length = length;
        if length == 0 {
            return Ok(());
        }
        if length > input.remaining() {
            return Err(ShaleError::malformed(format!(
                "byte array of {length} bytes runs past end of blob ({} remaining)",
                input.remaining()
            )));
        }
        let segment_size = 1u64 << self.log2_of_segment_size;
        if input.mode().is_shared() {
            let (region, base) = input.map_remainder()?;
            let mut offset = base;
            let mut remaining = length;
            let mut segment = 0usize;
            while remaining > 0 {
                self.ensure_capacity(segment);
                let span = segment_size.min(remaining) as usize;
                self.segments[segment] = Some(Segment::Mapped {
                    region: Arc::clone(&region),
                    offset,
                    len: span,
                });
                offset += span;
                segment += 1;
                remaining -= span as u64;
            }
            self.region = Some(region);
            input.skip(length)?;
        } else {
            let mut remaining = length;
            let mut segment = 0usize;
            while remaining > 0 {
                self.ensure_capacity(segment);
                let mut buffer = recycler.byte_segment();
                let span = segment_size.min(remaining) as usize;
                read_exact_payload(input, &mut buffer[..span])?;
                self.segments[segment] = Some(Segment::Owned(buffer));
                segment += 1;
                remaining -= span as u64;
            }
        }
        Ok(())
    }

    /// Clear the array, returning owned segments to the recycler.
    ///
    /// Views are dropped before the region handle so the mapping is never
    /// released while a segment still points into it.
    pub fn destroy(&mut self, recycler: &mut SegmentRecycler) {
        for slot in self.segments.drain(..) {
            if let Some(Segment::Owned(buffer)) = slot {
                recycler.recycle_byte_segment(buffer);
            }
        }
        self.length = 0;
        self.region = None;
    }

    fn segment(&self, index: u64) -> ShaleResult<&Segment> {
        let segment_index = (index >> self.log2_of_segment_size) as usize;
        self.segments
            .get(segment_index)
            .and_then(Option::as_ref)
            .ok_or(ShaleError::OutOfRange {
                index,
                max: self.length.saturating_sub(1),
            })
    }

    /// Grow the segment vector by 3/2 until `segment_index` is addressable.
    fn ensure_capacity(&mut self, segment_index: usize) {
        if segment_index < self.segments.len() {
            return;
        }
        let mut new_len = self.segments.len().max(2);
        while new_len <= segment_index {
            new_len = new_len * 3 / 2 + 1;
        }
        self.segments.resize_with(new_len, || None);
    }
}

/// `read_exact` with truncation reported as a framing defect.
pub(crate) fn read_exact_payload(input: &mut BlobInput, buf: &mut [u8]) -> ShaleResult<()> {
    match input.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ShaleError::malformed("payload truncated"))
        }
        Err(e) => Err(ShaleError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::MemoryMode;
    use std::io::Write;

    fn blob_with(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    /// Small segments (16 bytes) so multi-segment paths are exercised.
    fn small_recycler() -> SegmentRecycler {
        SegmentRecycler::new(4, 2)
    }

    fn populate(mode: MemoryMode, payload: &[u8], prefix: usize) -> (SegmentedByteArray, u64) {
        let mut bytes = vec![0xEEu8; prefix];
        bytes.extend_from_slice(payload);
        bytes.extend_from_slice(b"trailer");
        let file = blob_with(&bytes);

        let mut input = BlobInput::open(file.path(), mode).unwrap();
        input.skip(prefix as u64).unwrap();

        let mut recycler = small_recycler();
        let mut array = SegmentedByteArray::new(&recycler);
        array
            .read_from(&mut input, &mut recycler, payload.len() as u64)
            .unwrap();
        (array, input.position())
    }

    #[test]
    fn test_mapped_read_matches_source() {
        let payload: Vec<u8> = (0..100u8).collect();
        let (array, position) = populate(MemoryMode::SharedMemoryLazy, &payload, 5);

        assert_eq!(array.len(), 100);
        for (i, &expected) in payload.iter().enumerate() {
            assert_eq!(array.get(i as u64).unwrap(), expected, "index {i}");
        }
        // Input advanced by exactly the payload length.
        assert_eq!(position, 5 + 100);
    }

    #[test]
    fn test_on_heap_read_matches_source() {
        let payload: Vec<u8> = (0..100u8).collect();
        let (array, position) = populate(MemoryMode::OnHeap, &payload, 3);

        for (i, &expected) in payload.iter().enumerate() {
            assert_eq!(array.get(i as u64).unwrap(), expected, "index {i}");
        }
        assert_eq!(position, 3 + 100);
    }

    #[test]
    fn test_get_past_length_is_out_of_range() {
        let (array, _) = populate(MemoryMode::SharedMemoryLazy, b"abcd", 0);
        let err = array.get(4).unwrap_err();
        assert!(matches!(err, ShaleError::OutOfRange { index: 4, max: 3 }));
    }

    #[test]
    fn test_copy_to_spans_segments() {
        let payload: Vec<u8> = (0..64u8).collect();
        let (array, _) = populate(MemoryMode::SharedMemoryLazy, &payload, 0);

        // 16-byte segments: this range crosses two boundaries.
        let mut out = vec![0u8; 40];
        array.copy_to(10, &mut out).unwrap();
        assert_eq!(out, payload[10..50]);
    }

    #[test]
    fn test_read_longer_than_blob_is_malformed() {
        let file = blob_with(b"short");
        let mut input = BlobInput::open(file.path(), MemoryMode::SharedMemoryLazy).unwrap();
        let mut recycler = small_recycler();
        let mut array = SegmentedByteArray::new(&recycler);

        let err = array.read_from(&mut input, &mut recycler, 100).unwrap_err();
        assert!(matches!(err, ShaleError::MalformedBlob { .. }));
    }

    #[test]
    fn test_destroy_recycles_owned_segments() {
        let payload = vec![1u8; 40]; // 3 segments of 16
        let file = blob_with(&payload);
        let mut input = BlobInput::open(file.path(), MemoryMode::OnHeap).unwrap();
        let mut recycler = small_recycler();
        let mut array = SegmentedByteArray::new(&recycler);
        array.read_from(&mut input, &mut recycler, 40).unwrap();

        array.destroy(&mut recycler);
        assert_eq!(recycler.free_segments(), 0);
        recycler.swap();
        assert_eq!(recycler.free_segments(), 3);
        assert!(array.is_empty());
    }

    #[test]
    fn test_zero_length_read_is_noop() {
        let file = blob_with(b"abc");
        let mut input = BlobInput::open(file.path(), MemoryMode::SharedMemoryLazy).unwrap();
        let mut recycler = small_recycler();
        let mut array = SegmentedByteArray::new(&recycler);

        array.read_from(&mut input, &mut recycler, 0).unwrap();
        assert!(array.is_empty());
        assert_eq!(input.position(), 0);
    }
}
