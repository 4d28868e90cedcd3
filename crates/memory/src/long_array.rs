//! Segmented long array with bit-packed read helpers.
//!
//! The same segmentation as the byte array, reinterpreted as little-endian
//! 64-bit words. Word decoding goes through `u64::from_le_bytes` on byte
//! slices, so mapped payloads need no alignment guarantee from the wire.
//!
//! Object type states pack fixed-width fields into contiguous bit streams
//! over this array; [`get_element_value`] reads up to 58 bits spanning at
//! most two adjacent words, [`get_large_element_value`] extends that to the
//! full 64 bits needed by long and double fields.
//!
//! [`get_element_value`]: SegmentedLongArray::get_element_value
//! [`get_large_element_value`]: SegmentedLongArray::get_large_element_value

use crate::blob_input::BlobInput;
use crate::byte_array::read_exact_payload;
use crate::recycler::SegmentRecycler;
use crate::segment::Segment;
use memmap2::Mmap;
use shale_core::{ShaleError, ShaleResult};
use std::sync::Arc;

/// A logical array of little-endian 64-bit words over mapped or pooled
/// segments.
pub struct SegmentedLongArray {
    segments: Vec<Option<Segment>>,
    /// Log2 of the segment size in words.
    log2_of_segment_size: u32,
    bitmask: u64,
    max_longs: u64,
    region: Option<Arc<Mmap>>,
}

impl SegmentedLongArray {
    /// Create an empty array whose segment size comes from the recycler.
    pub fn new(recycler: &SegmentRecycler) -> Self {
        let log2 = recycler.log2_long_segment_size();
        SegmentedLongArray {
            segments: Vec::new(),
            log2_of_segment_size: log2,
            bitmask: (1u64 << log2) - 1,
            max_longs: 0,
            region: None,
        }
    }

    /// Number of populated words.
    pub fn max_longs(&self) -> u64 {
        self.max_longs
    }

    /// Largest byte index at which a full word read may start, or `None`
    /// when the array is empty: `max_longs * 8 - 8`.
    pub fn max_byte_index(&self) -> Option<u64> {
        self.max_longs.checked_sub(1).map(|longs| longs * 8)
    }

    /// The word at `index`.
    ///
    /// A read whose byte offset exceeds `max_byte_index` fails with
    /// `OutOfRange`.
    pub fn get(&self, index: u64) -> ShaleResult<u64> {
        match self.max_byte_index() {
            Some(max) if index * 8 <= max => {}
            _ => {
                return Err(ShaleError::OutOfRange {
                    index: index * 8,
                    max: self.max_byte_index().unwrap_or(0),
                });
            }
        }
        let segment_index = (index >> self.log2_of_segment_size) as usize;
        let segment = self
            .segments
            .get(segment_index)
            .and_then(Option::as_ref)
            .ok_or(ShaleError::OutOfRange {
                index: index * 8,
                max: self.max_byte_index().unwrap_or(0),
            })?;
        let offset = ((index & self.bitmask) * 8) as usize;
        let bytes = segment.as_bytes();
        Ok(u64::from_le_bytes(
            bytes[offset..offset + 8].try_into().expect("8-byte slice"),
        ))
    }

    /// Read a bit-packed element of up to 58 bits starting at `bit_offset`.
    ///
    /// Spans at most two adjacent words: shifts by `bit_offset & 63` within
    /// the first word and OR-combines the next word when
    /// `(bit_offset & 63) + bit_length > 64`, then masks to `bit_length`.
    #[inline]
    pub fn get_element_value(&self, bit_offset: u64, bit_length: u32) -> ShaleResult<u64> {
        debug_assert!(bit_length > 0 && bit_length <= 58);
        self.element_value(bit_offset, bit_length)
    }

    /// Read a bit-packed element of up to 64 bits.
    ///
    /// Needed by fields whose packed width reaches a full word; same
    /// two-word combine as [`get_element_value`](Self::get_element_value).
    #[inline]
    pub fn get_large_element_value(&self, bit_offset: u64, bit_length: u32) -> ShaleResult<u64> {
        debug_assert!(bit_length > 0 && bit_length <= 64);
        self.element_value(bit_offset, bit_length)
    }

    #[inline]
    fn element_value(&self, bit_offset: u64, bit_length: u32) -> ShaleResult<u64> {
        let word_index = bit_offset >> 6;
        let shift = (bit_offset & 63) as u32;
        let mut value = self.get(word_index)? >> shift;
        if shift + bit_length > 64 {
            value |= self.get(word_index + 1)? << (64 - shift);
        }
        let mask = if bit_length == 64 {
            u64::MAX
        } else {
            (1u64 << bit_length) - 1
        };
        Ok(value & mask)
    }

    /// Populate the array with `num_longs` words from the input's current
    /// position, advancing it by `num_longs * 8` bytes.
    pub fn read_from(
        &mut self,
        input: &mut BlobInput,
        recycler: &mut SegmentRecycler,
        num_longs: u64,
    ) -> ShaleResult<()> {
        self.max_longs = num_longs;
        if num_longs == 0 {
            return Ok(());
        }
        let byte_length = num_longs * 8;
        if byte_length > input.remaining() {
            return Err(ShaleError::malformed(format!(
                "long array of {byte_length} bytes runs past end of blob ({} remaining)",
                input.remaining()
            )));
        }
        let segment_bytes = 8u64 << self.log2_of_segment_size;
        if input.mode().is_shared() {
            let (region, base) = input.map_remainder()?;
            let mut offset = base;
            let mut remaining = byte_length;
            let mut segment = 0usize;
            while remaining > 0 {
                self.ensure_capacity(segment);
                let span = segment_bytes.min(remaining) as usize;
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
            input.skip(byte_length)?;
        } else {
            let mut remaining = byte_length;
            let mut segment = 0usize;
            while remaining > 0 {
                self.ensure_capacity(segment);
                let mut buffer = recycler.long_segment();
                let span = segment_bytes.min(remaining) as usize;
                read_exact_payload(input, &mut buffer[..span])?;
                self.segments[segment] = Some(Segment::Owned(buffer));
                segment += 1;
                remaining -= span as u64;
            }
        }
        Ok(())
    }

    /// Clear the array, returning owned segments to the recycler.
    pub fn destroy(&mut self, recycler: &mut SegmentRecycler) {
        for slot in self.segments.drain(..) {
            if let Some(Segment::Owned(buffer)) = slot {
                recycler.recycle_long_segment(buffer);
            }
        }
        self.max_longs = 0;
        self.region = None;
    }

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::MemoryMode;
    use std::io::Write;

    fn blob_with_longs(words: &[u64]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for word in words {
            file.write_all(&word.to_le_bytes()).unwrap();
        }
        file.flush().unwrap();
        file
    }

    /// 4 words per segment so multi-segment paths are exercised.
    fn small_recycler() -> SegmentRecycler {
        SegmentRecycler::new(4, 2)
    }

    fn populate(mode: MemoryMode, words: &[u64]) -> SegmentedLongArray {
        let file = blob_with_longs(words);
        let mut input = BlobInput::open(file.path(), mode).unwrap();
        let mut recycler = small_recycler();
        let mut array = SegmentedLongArray::new(&recycler);
        array
            .read_from(&mut input, &mut recycler, words.len() as u64)
            .unwrap();
        array
    }

    #[test]
    fn test_words_match_source_mapped() {
        let words: Vec<u64> = (0..10).map(|i| i * 0x0101_0101_0101_0101).collect();
        let array = populate(MemoryMode::SharedMemoryLazy, &words);

        assert_eq!(array.max_longs(), 10);
        assert_eq!(array.max_byte_index(), Some(72));
        for (i, &expected) in words.iter().enumerate() {
            assert_eq!(array.get(i as u64).unwrap(), expected, "word {i}");
        }
    }

    #[test]
    fn test_words_match_source_on_heap() {
        let words: Vec<u64> = (0..10).map(|i| !(i as u64)).collect();
        let array = populate(MemoryMode::OnHeap, &words);
        for (i, &expected) in words.iter().enumerate() {
            assert_eq!(array.get(i as u64).unwrap(), expected, "word {i}");
        }
    }

    #[test]
    fn test_read_past_max_byte_index_fails() {
        let array = populate(MemoryMode::SharedMemoryLazy, &[1, 2, 3]);
        // max_byte_index = 16; word 3 starts at byte 24.
        let err = array.get(3).unwrap_err();
        assert!(matches!(err, ShaleError::OutOfRange { index: 24, max: 16 }));
    }

    #[test]
    fn test_empty_array_rejects_all_reads() {
        let file = blob_with_longs(&[]);
        let mut input = BlobInput::open(file.path(), MemoryMode::SharedMemoryLazy).unwrap();
        let mut recycler = small_recycler();
        let mut array = SegmentedLongArray::new(&recycler);
        array.read_from(&mut input, &mut recycler, 0).unwrap();

        assert_eq!(array.max_byte_index(), None);
        assert!(array.get(0).is_err());
    }

    #[test]
    fn test_element_value_within_word() {
        // Word 0 = 0b...1101_0110; 6-bit element at offset 2 = 0b110101.
        let array = populate(MemoryMode::SharedMemoryLazy, &[0xD6, 0]);
        assert_eq!(array.get_element_value(2, 6).unwrap(), 0b110101);
    }

    #[test]
    fn test_element_value_spanning_word_boundary() {
        // 16-bit element starting at bit 56: low 8 bits from word 0's top
        // byte (0xAB), high 8 bits from word 1's bottom byte (0xCD).
        let words = [0xAB00_0000_0000_0000u64, 0xCD];
        let array = populate(MemoryMode::SharedMemoryLazy, &words);
        assert_eq!(array.get_element_value(56, 16).unwrap(), 0xCDAB);
    }

    #[test]
    fn test_large_element_value_full_word_unaligned() {
        let words = [0xFFFF_FFFF_FFFF_FFF0u64, 0xF];
        let array = populate(MemoryMode::SharedMemoryLazy, &words);
        assert_eq!(array.get_large_element_value(4, 64).unwrap(), u64::MAX);
    }

    #[test]
    fn test_element_value_aligned_full_width() {
        let words = [0x0123_4567_89AB_CDEFu64, 0];
        let array = populate(MemoryMode::SharedMemoryLazy, &words);
        assert_eq!(
            array.get_large_element_value(0, 64).unwrap(),
            0x0123_4567_89AB_CDEF
        );
    }

    #[test]
    fn test_element_spanning_past_end_fails() {
        let array = populate(MemoryMode::SharedMemoryLazy, &[0xFF]);
        // Offset 60, length 8 needs word 1, which does not exist.
        assert!(array.get_element_value(60, 8).is_err());
    }

    #[test]
    fn test_destroy_recycles_owned_segments() {
        let words: Vec<u64> = (0..9).collect(); // 3 segments of 4 words
        let file = blob_with_longs(&words);
        let mut input = BlobInput::open(file.path(), MemoryMode::OnHeap).unwrap();
        let mut recycler = small_recycler();
        let mut array = SegmentedLongArray::new(&recycler);
        array.read_from(&mut input, &mut recycler, 9).unwrap();

        array.destroy(&mut recycler);
        recycler.swap();
        assert_eq!(recycler.free_segments(), 3);
    }
}
