//! Set type read state.
//!
//! ## Shard payload layout
//!
//! ```text
//! ordinal_span     : varint
//! population       : varint numLongs + longs
//! bits_per_pointer : varint    width of the bucket-end offset
//! bits_per_size    : varint    width of the set size
//! bits_per_element : varint    width of a bucket entry
//! total_buckets    : varint
//! pointers         : varint numLongs + longs
//!                    per slot: bucket_end | (size << bits_per_pointer)
//! buckets          : varint numLongs + longs
//! ```
//!
//! Each set owns a power-of-two span of open-addressed buckets; an
//! all-ones entry is an empty bucket. Membership probes start at
//! `ordinal_hash(element) & (span - 1)` and walk linearly, stopping at the
//! first empty bucket.

use crate::ordinal::OrdinalBitmap;
use crate::type_state::{collect_populated, local_ordinal};
use shale_core::encoding::{ordinal_hash, read_vu32, read_vu64};
use shale_core::{SetSchema, ShaleError, ShaleResult};
use shale_memory::{BlobInput, MemoryMode, SegmentRecycler, SegmentedLongArray};
use tracing::trace;

struct SetShard {
    ordinal_span: u32,
    population: OrdinalBitmap,
    bits_per_pointer: u32,
    bits_per_size: u32,
    bits_per_element: u32,
    total_buckets: u64,
    pointers: SegmentedLongArray,
    buckets: SegmentedLongArray,
}

impl SetShard {
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
                "set bucket pointers regress or overflow ({start} -> {end} of {})",
                self.total_buckets
            )));
        }
        let span = end - start;
        if span != 0 && !span.is_power_of_two() {
            return Err(ShaleError::malformed(format!(
                "set bucket span {span} is not a power of two"
            )));
        }
        Ok((start, span, size))
    }

    fn bucket(&self, index: u64) -> ShaleResult<u64> {
        self.buckets
            .get_element_value(index * u64::from(self.bits_per_element), self.bits_per_element)
    }

    fn empty_sentinel(&self) -> u64 {
        (1u64 << self.bits_per_element) - 1
    }
}

/// Read state for a set type.
pub struct SetTypeReadState {
    schema: SetSchema,
    num_shards: u32,
    shard_bits: u32,
    shards: Vec<SetShard>,
    mode: MemoryMode,
}

impl SetTypeReadState {
    /// Create an unpopulated state.
    pub fn new(schema: SetSchema, num_shards: u32) -> Self {
        debug_assert!(num_shards.is_power_of_two());
        SetTypeReadState {
            schema,
            num_shards,
            shard_bits: num_shards.trailing_zeros(),
            shards: Vec::new(),
            mode: MemoryMode::default(),
        }
    }

    /// The set schema.
    pub fn schema(&self) -> &SetSchema {
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

    /// Number of elements in the set at `ordinal`.
    pub fn size(&self, ordinal: u32) -> ShaleResult<usize> {
        let (shard, local) = self.locate(ordinal)?;
        let (_, _, size) = shard.bucket_range(local)?;
        Ok(size as usize)
    }

    /// Whether the set at `ordinal` contains `element`.
    pub fn contains(&self, ordinal: u32, element: u32) -> ShaleResult<bool> {
        let (shard, local) = self.locate(ordinal)?;
        let (start, span, _) = shard.bucket_range(local)?;
        if span == 0 {
            return Ok(false);
        }
        let mask = span - 1;
        let empty = shard.empty_sentinel();
        let mut bucket = u64::from(ordinal_hash(element)) & mask;
        for _ in 0..span {
            let entry = shard.bucket(start + bucket)?;
            if entry == empty {
                return Ok(false);
            }
            if entry == u64::from(element) {
                return Ok(true);
            }
            bucket = (bucket + 1) & mask;
        }
        Ok(false)
    }

    /// All element ordinals of the set at `ordinal`, in bucket order.
    pub fn elements(&self, ordinal: u32) -> ShaleResult<Vec<u32>> {
        let (shard, local) = self.locate(ordinal)?;
        let (start, span, size) = shard.bucket_range(local)?;
        let empty = shard.empty_sentinel();
        let mut out = Vec::with_capacity(size as usize);
        for bucket in start..start + span {
            let entry = shard.bucket(bucket)?;
            if entry != empty {
                out.push(entry as u32);
            }
        }
        Ok(out)
    }

    fn locate(&self, ordinal: u32) -> ShaleResult<(&SetShard, u64)> {
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
            let bits_per_element = read_vu32(input)?;
            for (what, bits) in [
                ("set pointer", bits_per_pointer),
                ("set size", bits_per_size),
                ("set element", bits_per_element),
            ] {
                if bits == 0 || bits > 58 {
                    return Err(ShaleError::malformed(format!(
                        "{what} width of {bits} bits is out of range"
                    )));
                }
            }
            if bits_per_pointer + bits_per_size > 64 {
                return Err(ShaleError::malformed(
                    "set pointer+size slot exceeds 64 bits",
                ));
            }
            let total_buckets = read_vu64(input)?;

            let pointer_longs = read_vu64(input)?;
            let mut pointers = SegmentedLongArray::new(recycler);
            pointers.read_from(input, recycler, pointer_longs)?;

            let bucket_longs = read_vu64(input)?;
            let mut buckets = SegmentedLongArray::new(recycler);
            buckets.read_from(input, recycler, bucket_longs)?;

            self.shards.push(SetShard {
                ordinal_span,
                population,
                bits_per_pointer,
                bits_per_size,
                bits_per_element,
                total_buckets,
                pointers,
                buckets,
            });
        }
        trace!(
            type_name = %self.schema.name,
            shards = self.num_shards,
            buckets = self.shards.iter().map(|s| s.total_buckets).sum::<u64>(),
            "set type populated"
        );
        Ok(())
    }
}

/// Advance the input past a set type's snapshot payload.
pub(super) fn discard_snapshot(input: &mut BlobInput, num_shards: u32) -> ShaleResult<()> {
    for _ in 0..num_shards {
        let _ordinal_span = read_vu32(input)?;
        OrdinalBitmap::skip(input)?;
        let _bits_per_pointer = read_vu32(input)?;
        let _bits_per_size = read_vu32(input)?;
        let _bits_per_element = read_vu32(input)?;
        let _total_buckets = read_vu64(input)?;
        let pointer_longs = read_vu64(input)?;
        input.skip(pointer_longs * 8)?;
        let bucket_longs = read_vu64(input)?;
        input.skip(bucket_longs * 8)?;
    }
    Ok(())
}
