//! Population bitmaps.
//!
//! Each shard of a type opens with a bitmap of the shard-local ordinals it
//! populates, serialized as a varint word count followed by little-endian
//! 64-bit words. Bitmaps are registry structures, small next to payload, so
//! they are copied off the stream rather than mapped.

use shale_core::encoding::{read_u64_le, read_vu32};
use shale_core::ShaleResult;
use shale_memory::BlobInput;

/// A bitset of populated shard-local ordinals.
#[derive(Debug, Clone, Default)]
pub struct OrdinalBitmap {
    words: Vec<u64>,
}

impl OrdinalBitmap {
    /// Read a bitmap from the input: varint word count, then raw words.
    pub fn read_from(input: &mut BlobInput) -> ShaleResult<OrdinalBitmap> {
        let num_words = read_vu32(input)? as usize;
        let mut words = Vec::with_capacity(num_words);
        for _ in 0..num_words {
            words.push(read_u64_le(input)?);
        }
        Ok(OrdinalBitmap { words })
    }

    /// Advance the input past a serialized bitmap without retaining it.
    pub fn skip(input: &mut BlobInput) -> ShaleResult<()> {
        let num_words = read_vu32(input)? as u64;
        input.skip(num_words * 8)
    }

    /// Whether `ordinal` is populated.
    pub fn contains(&self, ordinal: u64) -> bool {
        let word = (ordinal >> 6) as usize;
        match self.words.get(word) {
            Some(&bits) => bits & (1u64 << (ordinal & 63)) != 0,
            None => false,
        }
    }

    /// Number of populated ordinals.
    pub fn cardinality(&self) -> u64 {
        self.words.iter().map(|w| u64::from(w.count_ones())).sum()
    }

    /// Iterate populated ordinals in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.words.iter().enumerate().flat_map(|(word_index, &word)| {
            (0..64u64)
                .filter(move |bit| word & (1u64 << bit) != 0)
                .map(move |bit| (word_index as u64) * 64 + bit)
        })
    }

    /// The highest populated ordinal, if any.
    pub fn max_ordinal(&self) -> Option<u64> {
        self.words
            .iter()
            .enumerate()
            .rev()
            .find(|(_, &word)| word != 0)
            .map(|(word_index, &word)| (word_index as u64) * 64 + 63 - u64::from(word.leading_zeros()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shale_core::encoding::write_vu32;
    use shale_memory::MemoryMode;
    use std::io::Write;

    fn bitmap_from_bits(bits: &[u64]) -> OrdinalBitmap {
        let max = bits.iter().copied().max().unwrap_or(0);
        let mut words = vec![0u64; (max as usize / 64) + 1];
        for &bit in bits {
            words[(bit / 64) as usize] |= 1u64 << (bit % 64);
        }

        let mut bytes = Vec::new();
        write_vu32(&mut bytes, words.len() as u32).unwrap();
        for word in &words {
            bytes.extend_from_slice(&word.to_le_bytes());
        }

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();
        let mut input = BlobInput::open(file.path(), MemoryMode::SharedMemoryLazy).unwrap();
        OrdinalBitmap::read_from(&mut input).unwrap()
    }

    #[test]
    fn test_contains_and_cardinality() {
        let bitmap = bitmap_from_bits(&[0, 1, 63, 64, 130]);
        for bit in [0u64, 1, 63, 64, 130] {
            assert!(bitmap.contains(bit), "bit {bit}");
        }
        assert!(!bitmap.contains(2));
        assert!(!bitmap.contains(1000));
        assert_eq!(bitmap.cardinality(), 5);
    }

    #[test]
    fn test_iter_ascending() {
        let bitmap = bitmap_from_bits(&[130, 0, 64]);
        let ordinals: Vec<u64> = bitmap.iter().collect();
        assert_eq!(ordinals, vec![0, 64, 130]);
    }

    #[test]
    fn test_max_ordinal() {
        assert_eq!(bitmap_from_bits(&[0, 5, 200]).max_ordinal(), Some(200));
        assert_eq!(OrdinalBitmap::default().max_ordinal(), None);
    }
}
