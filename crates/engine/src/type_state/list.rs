//! List type read state.
//!
//! ## Shard payload layout
//!
//! ```text
//! ordinal_span     : varint
//! population       : varint numLongs + longs
//! bits_per_pointer : varint
//! bits_per_element : varint
//! total_elements   : varint
//! pointers         : varint numLongs + longs
//! elements         : varint numLongs + longs
//! ```
//!
//! The pointer stream holds one end offset per shard-local slot; slot `n`'s
//! list occupies element slots `[pointer(n-1), pointer(n))` (zero for slot
//! 0). Unpopulated slots carry the previous end forward so the subtraction
//! stays valid for every populated slot.

use crate::ordinal::OrdinalBitmap;
use crate::type_state::{collect_populated, local_ordinal};
use shale_core::encoding::{read_vu32, read_vu64};
use shale_core::{ListSchema, ShaleError, ShaleResult};
use shale_memory::{BlobInput, MemoryMode, SegmentRecycler, SegmentedLongArray};
use tracing::trace;

struct ListShard {
    ordinal_span: u32,
    population: OrdinalBitmap,
    bits_per_pointer: u32,
    bits_per_element: u32,
    total_elements: u64,
    pointers: SegmentedLongArray,
    elements: SegmentedLongArray,
}

impl ListShard {
    fn pointer(&self, slot: u64) -> ShaleResult<u64> {
        self.pointers
            .get_element_value(slot * u64::from(self.bits_per_pointer), self.bits_per_pointer)
    }

    fn element_range(&self, local: u64) -> ShaleResult<(u64, u64)> {
        let start = if local == 0 { 0 } else { self.pointer(local - 1)? };
        let end = self.pointer(local)?;
        if end < start || end > self.total_elements {
            return Err(ShaleError::malformed(format!(
                "list pointers regress or overflow ({start} -> {end} of {})",
                self.total_elements
            )));
        }
        Ok((start, end))
    }
}

/// Read state for a list type.
pub struct ListTypeReadState {
    schema: ListSchema,
    num_shards: u32,
    shard_bits: u32,
    shards: Vec<ListShard>,
    mode: MemoryMode,
}

impl ListTypeReadState {
    /// Create an unpopulated state.
    pub fn new(schema: ListSchema, num_shards: u32) -> Self {
        debug_assert!(num_shards.is_power_of_two());
        ListTypeReadState {
            schema,
            num_shards,
            shard_bits: num_shards.trailing_zeros(),
            shards: Vec::new(),
            mode: MemoryMode::default(),
        }
    }

    /// The list schema.
    pub fn schema(&self) -> &ListSchema {
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

    /// Number of elements in the list at `ordinal`.
    pub fn size(&self, ordinal: u32) -> ShaleResult<usize> {
        let (shard, local) = self.locate(ordinal)?;
        let (start, end) = shard.element_range(local)?;
        Ok((end - start) as usize)
    }

    /// The element ordinal at `index` within the list at `ordinal`.
    pub fn element(&self, ordinal: u32, index: usize) -> ShaleResult<u32> {
        let (shard, local) = self.locate(ordinal)?;
        let (start, end) = shard.element_range(local)?;
        let slot = start + index as u64;
        if slot >= end {
            return Err(ShaleError::OutOfRange {
                index: index as u64,
                max: (end - start).saturating_sub(1),
            });
        }
        let value = shard
            .elements
            .get_element_value(slot * u64::from(shard.bits_per_element), shard.bits_per_element)?;
        Ok(value as u32)
    }

    /// All element ordinals of the list at `ordinal`, in list order.
    pub fn elements(&self, ordinal: u32) -> ShaleResult<Vec<u32>> {
        let (shard, local) = self.locate(ordinal)?;
        let (start, end) = shard.element_range(local)?;
        let mut out = Vec::with_capacity((end - start) as usize);
        for slot in start..end {
            let value = shard.elements.get_element_value(
                slot * u64::from(shard.bits_per_element),
                shard.bits_per_element,
            )?;
            out.push(value as u32);
        }
        Ok(out)
    }

    fn locate(&self, ordinal: u32) -> ShaleResult<(&ListShard, u64)> {
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
            let bits_per_pointer = read_bits(input, "list pointer")?;
            let bits_per_element = read_bits(input, "list element")?;
            let total_elements = read_vu64(input)?;

            let pointer_longs = read_vu64(input)?;
            let mut pointers = SegmentedLongArray::new(recycler);
            pointers.read_from(input, recycler, pointer_longs)?;

            let element_longs = read_vu64(input)?;
            let mut elements = SegmentedLongArray::new(recycler);
            elements.read_from(input, recycler, element_longs)?;

            self.shards.push(ListShard {
                ordinal_span,
                population,
                bits_per_pointer,
                bits_per_element,
                total_elements,
                pointers,
                elements,
            });
        }
        trace!(
            type_name = %self.schema.name,
            shards = self.num_shards,
            elements = self.shards.iter().map(|s| s.total_elements).sum::<u64>(),
            "list type populated"
        );
        Ok(())
    }
}

fn read_bits(input: &mut BlobInput, what: &str) -> ShaleResult<u32> {
    let bits = read_vu32(input)?;
    if bits == 0 || bits > 58 {
        return Err(ShaleError::malformed(format!(
            "{what} width of {bits} bits is out of range"
        )));
    }
    Ok(bits)
}

/// Advance the input past a list type's snapshot payload.
pub(super) fn discard_snapshot(input: &mut BlobInput, num_shards: u32) -> ShaleResult<()> {
    for _ in 0..num_shards {
        let _ordinal_span = read_vu32(input)?;
        OrdinalBitmap::skip(input)?;
        let _bits_per_pointer = read_vu32(input)?;
        let _bits_per_element = read_vu32(input)?;
        let _total_elements = read_vu64(input)?;
        let pointer_longs = read_vu64(input)?;
        input.skip(pointer_longs * 8)?;
        let element_longs = read_vu64(input)?;
        input.skip(element_longs * 8)?;
    }
    Ok(())
}
