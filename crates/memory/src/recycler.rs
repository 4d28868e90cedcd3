//! Two-generation pool of reusable array segments.
//!
//! Segments returned by a torn-down type state are not handed out again
//! immediately: they park in the retired generation until [`swap`] runs,
//! which the blob reader calls between type applications. The window keeps
//! a segment from being rewritten while a read that started under the old
//! generation is still walking it.
//!
//! [`swap`]: SegmentRecycler::swap

/// Default log2 of the byte-segment size (16 KiB segments).
pub const DEFAULT_LOG2_BYTE_SEGMENT_SIZE: u32 = 14;

/// Default log2 of the long-segment size in 64-bit words (16 KiB segments).
pub const DEFAULT_LOG2_LONG_SEGMENT_SIZE: u32 = 11;

/// Pool of reusable byte and long segment buffers.
pub struct SegmentRecycler {
    log2_byte_segment_size: u32,
    log2_long_segment_size: u32,
    free_byte: Vec<Box<[u8]>>,
    free_long: Vec<Box<[u8]>>,
    retired_byte: Vec<Box<[u8]>>,
    retired_long: Vec<Box<[u8]>>,
}

impl SegmentRecycler {
    /// Create a pool with the given segment size exponents.
    pub fn new(log2_byte_segment_size: u32, log2_long_segment_size: u32) -> Self {
        SegmentRecycler {
            log2_byte_segment_size,
            log2_long_segment_size,
            free_byte: Vec::new(),
            free_long: Vec::new(),
            retired_byte: Vec::new(),
            retired_long: Vec::new(),
        }
    }

    /// Log2 of the byte-segment size.
    pub fn log2_byte_segment_size(&self) -> u32 {
        self.log2_byte_segment_size
    }

    /// Log2 of the long-segment size, in 64-bit words.
    pub fn log2_long_segment_size(&self) -> u32 {
        self.log2_long_segment_size
    }

    /// A zeroed byte segment, reused from the pool when one is free.
    pub fn byte_segment(&mut self) -> Box<[u8]> {
        self.free_byte
            .pop()
            .unwrap_or_else(|| vec![0u8; 1 << self.log2_byte_segment_size].into_boxed_slice())
    }

    /// A zeroed long segment (byte-addressed), reused when one is free.
    pub fn long_segment(&mut self) -> Box<[u8]> {
        self.free_long
            .pop()
            .unwrap_or_else(|| vec![0u8; 8 << self.log2_long_segment_size].into_boxed_slice())
    }

    /// Return a byte segment to the retired generation.
    pub fn recycle_byte_segment(&mut self, segment: Box<[u8]>) {
        debug_assert_eq!(segment.len(), 1 << self.log2_byte_segment_size);
        self.retired_byte.push(segment);
    }

    /// Return a long segment to the retired generation.
    pub fn recycle_long_segment(&mut self, segment: Box<[u8]>) {
        debug_assert_eq!(segment.len(), 8 << self.log2_long_segment_size);
        self.retired_long.push(segment);
    }

    /// Promote the retired generation into the free pool.
    ///
    /// Retired segments are zeroed here, not on hand-out, so reuse cannot
    /// leak stale payload into a freshly populated array.
    pub fn swap(&mut self) {
        for segment in &mut self.retired_byte {
            segment.fill(0);
        }
        for segment in &mut self.retired_long {
            segment.fill(0);
        }
        self.free_byte.append(&mut self.retired_byte);
        self.free_long.append(&mut self.retired_long);
    }

    /// Number of segments currently available for reuse.
    pub fn free_segments(&self) -> usize {
        self.free_byte.len() + self.free_long.len()
    }
}

impl Default for SegmentRecycler {
    fn default() -> Self {
        SegmentRecycler::new(
            DEFAULT_LOG2_BYTE_SEGMENT_SIZE,
            DEFAULT_LOG2_LONG_SEGMENT_SIZE,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_sizes() {
        let mut recycler = SegmentRecycler::new(4, 2);
        assert_eq!(recycler.byte_segment().len(), 16);
        assert_eq!(recycler.long_segment().len(), 32);
    }

    #[test]
    fn test_recycled_segment_unavailable_until_swap() {
        let mut recycler = SegmentRecycler::new(4, 2);
        let segment = recycler.byte_segment();
        recycler.recycle_byte_segment(segment);

        assert_eq!(recycler.free_segments(), 0);
        recycler.swap();
        assert_eq!(recycler.free_segments(), 1);
    }

    #[test]
    fn test_swap_zeroes_reused_segments() {
        let mut recycler = SegmentRecycler::new(4, 2);
        let mut segment = recycler.byte_segment();
        segment[3] = 0xAB;
        recycler.recycle_byte_segment(segment);
        recycler.swap();

        let reused = recycler.byte_segment();
        assert!(reused.iter().all(|&b| b == 0));
    }
}
