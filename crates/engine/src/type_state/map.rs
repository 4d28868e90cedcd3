//! Map type read state.
//!
//! ## Shard payload layout
//!
//! ```text
//! ordinal_span     : varint
//! population       : varint numLongs + longs
//! bits_per_pointer : varint
//! bits_per_size    : varint
//! bits_per_key     : varint
//! bits_per_value   : varint
//! total_buckets    : varint
//! pointers         : varint numLongs + longs
//!                    per slot: bucket_end | (size << bits_per_pointer)
//! buckets          : varint numLongs + longs
//!                    entries of bits_per_key + bits_per_value bits,
//!                    key in the low bits
//! ```
//!
//! Same open addressing as sets, keyed on the key ordinal: an all-ones key
//! marks an empty bucket, probes start at `ordinal_hash(key) & (span - 1)`.

use crate::ordinal::OrdinalBitmap;
use crate::type_state::{collect_populated, local_ordinal};
use shale_core::encoding::{ordinal_hash, read_vu32, read_vu64};
use shale_core::{MapSchema, ShaleError, ShaleResult};
use shale_memory::{BlobInput, MemoryMode, SegmentRecycler, SegmentedLongArray};
use tracing::trace;

struct MapShard {
    ordinal_span: u32,
    population: OrdinalBitmap,
    bits_per_pointer: u32,
    bits_per_size: u32,
    bits_per_key: u32,
    bits_per_value: u32,
    total_buckets: u64,
    pointers: SegmentedLongArray,
    buckets: SegmentedLongArray,
}

impl MapShard {
    fn pointer_and_size(&self, slot: u64) -> ShaleResult<(u64, u64)> {
        let width = self.bits_per_pointer + self.bits_per_size;
        let raw = if width > 58 {
            self.pointers
                .get_large_element_value(slot * u64::from(width), width)?
        } else {
            self.pointers.get_element_value(slot * u64::from(width), width)?
        };
        let end = raw & ((1u64 << self.bits_per_pointer) - 1);
        let size = raw >> self.bits_per_pointer;
        Ok((end, size))
    }

    fn bucket_range(&self, local: u64) -> ShaleResult<(u64, u64, u64)> {
        let start = if local == 0 {
            0
        } else {
            self.pointer_and_size(local - 1)?.0
        };
        let (end, size) = self.pointer_and_size(local)?;
        if end < start || end > self.total_buckets {
            return Err(ShaleError::malformed(format!(
                "map bucket pointers regress or overflow ({start} -> {end} of {})",
                self.total_buckets
            )));
        }
        let span = end - start;
        if span != 0 && !span.is_power_of_two() {
            return Err(ShaleError::malformed(format!(
                "map bucket span {span} is not a power of two"
            )));
        }
        Ok((start, span, size))
    }

    fn entry(&self, index: u64) -> ShaleResult<(u64, u64)> {
        let width = self.bits_per_key + self.bits_per_value;
        let raw = if width > 58 {
            self.buckets
                .get_large_element_value(index * u64::from(width), width)?
        } else {
            self.buckets.get_element_value(index * u64::from(width), width)?
        };
        let key = raw & ((1u64 << self.bits_per_key) - 1);
        let value = raw >> self.bits_per_key;
        Ok((key, value))
    }

    fn empty_key(&self) -> u64 {
        (1u64 << self.bits_per_key) - 1
    }
}

/// Read state for a map type.
pub struct MapTypeReadState {
    schema: MapSchema,
    num_shards: u32,
    shard_bits: u32,
    shards: Vec<MapShard>,
    mode: MemoryMode,
}

impl MapTypeReadState {
    /// Create an unpopulated state.
    pub fn new(schema: MapSchema, num_shards: u32) -> Self {
        debug_assert!(num_shards.is_power_of_two());
        MapTypeReadState {
            schema,
            num_shards,
            shard_bits: num_shards.trailing_zeros(),
            shards: Vec::new(),
            mode: MemoryMode::default(),
        }
    }

    /// The map schema.
    pub fn schema(&self) -> &MapSchema {
        &self.schema
    }

    /// Number of shards.
    pub fn num_shards(&self) -> u32 {
        self.num_shards
    }

    /// Memory mode the payload was loaded under.
    pub fn mode(&self) -> MemoryMode {
        self.mode
    }

    /// Populated global ordinals, ascending.
    pub fn populated_ordinals(&self) -> Vec<u32> {
        collect_populated(self.shards.iter().map(|s| &s.population), self.shard_bits)
    }

    /// Number of entries in the map at `ordinal`.
    pub fn size(&self, ordinal: u32) -> ShaleResult<usize> {
        let (shard, local) = self.locate(ordinal)?;
        let (_, _, size) = shard.bucket_range(local)?;
        Ok(size as usize)
    }

    /// The value ordinal stored under `key` in the map at `ordinal`.
    pub fn get(&self, ordinal: u32, key: u32) -> ShaleResult<Option<u32>> {
        let (shard, local) = self.locate(ordinal)?;
        let (start, span, _) = shard.bucket_range(local)?;
        if span == 0 {
            return Ok(None);
        }
        let mask = span - 1;
        let empty = shard.empty_key();
        let mut bucket = u64::from(ordinal_hash(key)) & mask;
        for _ in 0..span {
            let (entry_key, entry_value) = shard.entry(start + bucket)?;
            if entry_key == empty {
                return Ok(None);
            }
            if entry_key == u64::from(key) {
                return Ok(Some(entry_value as u32));
            }
            bucket = (bucket + 1) & mask;
        }
        Ok(None)
    }

    /// All `(key, value)` ordinal pairs of the map at `ordinal`, in bucket
    /// order.
    pub fn entries(&self, ordinal: u32) -> ShaleResult<Vec<(u32, u32)>> {
        let (shard, local) = self.locate(ordinal)?;
        let (start, span, size) = shard.bucket_range(local)?;
        let empty = shard.empty_key();
        let mut out = Vec::with_capacity(size as usize);
        for bucket in start..start + span {
            let (key, value) = shard.entry(bucket)?;
            if key != empty {
                out.push((key as u32, value as u32));
            }
        }
        Ok(out)
    }

    fn locate(&self, ordinal: u32) -> ShaleResult<(&MapShard, u64)> {
        if self.shards.is_empty() {
            return Err(ShaleError::OutOfRange {
                index: u64::from(ordinal),
                max: 0,
            });
        }
        let shard = &self.shards[(ordinal & (self.num_shards - 1)) as usize];
        let local = local_ordinal(ordinal, self.shard_bits);
        if local >= u64::from(shard.ordinal_span) || !shard.population.contains(local) {
            return Err(ShaleError::OutOfRange {
                index: u64::from(ordinal),
                max: u64::from(shard.ordinal_span.saturating_sub(1)),
            });
        }
        Ok((shard, local))
    }

    pub(crate) fn read_snapshot(
        &mut self,
        input: &mut BlobInput,
        recycler: &mut SegmentRecycler,
    ) -> ShaleResult<()> {
        self.mode = input.mode();
        self.shards = Vec::with_capacity(self.num_shards as usize);
        for _ in 0..self.num_shards {
            let ordinal_span = read_vu32(input)?;
            let population = OrdinalBitmap::read_from(input)?;
            let bits_per_pointer = read_vu32(input)?;
            let bits_per_size = read_vu32(input)?;
            let bits_per_key = read_vu32(input)?;
            let bits_per_value = read_vu32(input)?;
            for (what, bits) in [
                ("map pointer", bits_per_pointer),
                ("map size", bits_per_size),
                ("map key", bits_per_key),
                ("map value", bits_per_value),
            ] {
                if bits == 0 || bits > 58 {
                    return Err(ShaleError::malformed(format!(
                        "{what} width of {bits} bits is out of range"
                    )));
                }
            }
            if bits_per_pointer + bits_per_size > 64 || bits_per_key + bits_per_value > 64 {
                return Err(ShaleError::malformed(
                    "map packed slot exceeds 64 bits",
                ));
            }
            let total_buckets = read_vu64(input)?;

            let pointer_longs = read_vu64(input)?;
            let mut pointers = SegmentedLongArray::new(recycler);
            pointers.read_from(input, recycler, pointer_longs)?;

            let bucket_longs = read_vu64(input)?;
            let mut buckets = SegmentedLongArray::new(recycler);
            buckets.read_from(input, recycler, bucket_longs)?;

            self.shards.push(MapShard {
                ordinal_span,
                population,
                bits_per_pointer,
                bits_per_size,
                bits_per_key,
                bits_per_value,
                total_buckets,
                pointers,
                buckets,
            });
        }
        trace!(
            type_name = %self.schema.name,
            shards = self.num_shards,
            buckets = self.shards.iter().map(|s| s.total_buckets).sum::<u64>(),
            "map type populated"
        );
        Ok(())
    }
}

/// Advance the input past a map type's snapshot payload.
pub(super) fn discard_snapshot(input: &mut BlobInput, num_shards: u32) -> ShaleResult<()> {
    for _ in 0..num_shards {
        let _ordinal_span = read_vu32(input)?;
        OrdinalBitmap::skip(input)?;
        for _ in 0..4 {
            let _bits = read_vu32(input)?;
        }
        let _total_buckets = read_vu64(input)?;
        let pointer_longs = read_vu64(input)?;
        input.skip(pointer_longs * 8)?;
        let bucket_longs = read_vu64(input)?;
        input.skip(bucket_longs * 8)?;
    }
    Ok(())
}
