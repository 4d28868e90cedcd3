//! Object type read state.
//!
//! ## Shard payload layout
//!
//! ```text
//! ordinal_span   : varint            shard-local ordinal slots (0 = empty)
//! population     : varint numLongs + longs (bitset of populated slots)
//! per stored field, in stored-schema order:
//!   bits_per_field : varint          1..=64
//! fixed data     : varint numLongs + longs
//!                  records bit-packed at local_ordinal * bits_per_record,
//!                  fields at cumulative stored-order offsets
//! per stored VAR-WIDTH field, in stored order:
//!   heap_len     : varint
//!   heap bytes   : heap_len bytes (retained only if the field is included)
//! ```
//!
//! The fixed stream carries every stored field — it is one interleaved bit
//! stream and cannot be split — so filtering an object type drops var-width
//! heaps (the bulk of the bytes) and hides excluded fixed slots behind the
//! filtered schema. Var-width heaps of excluded fields are read and
//! dropped, keeping the stream position identical to an unfiltered read.
//!
//! ## Null sentinels
//!
//! - fixed-width fields: all ones in `bits_per_field`
//! - boolean: 2 bits, `3` = null
//! - var-width fields: the slot's high bit flags null; the remaining bits
//!   always carry the running end offset into the heap, so the start of
//!   record `n` is the offset carried by record `n-1` even across nulls

use crate::ordinal::OrdinalBitmap;
use crate::type_state::{collect_populated, local_ordinal};
use shale_core::encoding::{read_vu32, read_vu64, zigzag_decode};
use shale_core::{FieldType, ObjectSchema, ShaleError, ShaleResult};
use shale_memory::{BlobInput, MemoryMode, SegmentRecycler, SegmentedByteArray, SegmentedLongArray};
use tracing::trace;

/// Bit layout of one stored field within a shard's records.
struct FieldSlot {
    field_type: FieldType,
    bits: u32,
    start_bit: u32,
    /// Index into the retained var-heap vector; `None` for fixed-width or
    /// excluded var-width fields.
    var_heap_index: Option<usize>,
}

struct ObjectShard {
    ordinal_span: u32,
    population: OrdinalBitmap,
    slots: Vec<FieldSlot>,
    bits_per_record: u64,
    fixed: SegmentedLongArray,
    var_heaps: Vec<SegmentedByteArray>,
}

impl ObjectShard {
    fn read_raw(&self, local: u64, slot: &FieldSlot) -> ShaleResult<u64> {
        let bit_offset = local * self.bits_per_record + u64::from(slot.start_bit);
        if slot.bits > 58 {
            self.fixed.get_large_element_value(bit_offset, slot.bits)
        } else {
            self.fixed.get_element_value(bit_offset, slot.bits)
        }
    }
}

/// Read state for an object type.
pub struct ObjectTypeReadState {
    schema: ObjectSchema,
    stored_schema: ObjectSchema,
    num_shards: u32,
    shard_bits: u32,
    shards: Vec<ObjectShard>,
    mode: MemoryMode,
}

impl ObjectTypeReadState {
    /// Create an unpopulated state for `schema` (the filter-derived schema)
    /// over `stored_schema` (the schema as read from the blob).
    pub fn new(schema: ObjectSchema, stored_schema: ObjectSchema, num_shards: u32) -> Self {
        debug_assert!(num_shards.is_power_of_two());
        ObjectTypeReadState {
            schema,
            stored_schema,
            num_shards,
            shard_bits: num_shards.trailing_zeros(),
            shards: Vec::new(),
            mode: MemoryMode::default(),
        }
    }

    /// The filtered schema reads resolve against.
    pub fn schema(&self) -> &ObjectSchema {
        &self.schema
    }

    /// The unfiltered schema as stored in the blob.
    pub fn stored_schema(&self) -> &ObjectSchema {
        &self.stored_schema
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

    /// Whether `ordinal` is populated.
    pub fn is_populated(&self, ordinal: u32) -> bool {
        if self.shards.is_empty() {
            return false;
        }
        let shard = &self.shards[(ordinal & (self.num_shards - 1)) as usize];
        shard
            .population
            .contains(local_ordinal(ordinal, self.shard_bits))
    }

    pub(crate) fn read_snapshot(
        &mut self,
        input: &mut BlobInput,
        recycler: &mut SegmentRecycler,
    ) -> ShaleResult<()> {
        self.mode = input.mode();
        self.shards = Vec::with_capacity(self.num_shards as usize);
        for _ in 0..self.num_shards {
            let shard = self.read_shard(input, recycler)?;
            self.shards.push(shard);
        }
        trace!(
            type_name = %self.schema.name,
            shards = self.num_shards,
            populated = self.shards.iter().map(|s| s.population.cardinality()).sum::<u64>(),
            "object type populated"
        );
        Ok(())
    }

    fn read_shard(
        &self,
        input: &mut BlobInput,
        recycler: &mut SegmentRecycler,
    ) -> ShaleResult<ObjectShard> {
        let ordinal_span = read_vu32(input)?;
        let population = OrdinalBitmap::read_from(input)?;

        let mut slots = Vec::with_capacity(self.stored_schema.num_fields());
        let mut bits_per_record = 0u64;
        for field in &self.stored_schema.fields {
            let bits = read_vu32(input)?;
            if bits == 0 || bits > 64 {
                return Err(ShaleError::malformed(format!(
                    "field `{}` declares {bits} bits per value",
                    field.name
                )));
            }
            slots.push(FieldSlot {
                field_type: field.field_type,
                bits,
                start_bit: bits_per_record as u32,
                var_heap_index: None,
            });
            bits_per_record += u64::from(bits);
        }

        let fixed_longs = read_vu64(input)?;
        if fixed_longs * 64 < u64::from(ordinal_span) * bits_per_record {
            return Err(ShaleError::malformed(format!(
                "fixed stream of {fixed_longs} longs cannot hold {ordinal_span} records of {bits_per_record} bits"
            )));
        }
        let mut fixed = SegmentedLongArray::new(recycler);
        fixed.read_from(input, recycler, fixed_longs)?;

        let mut var_heaps = Vec::new();
        for field in &self.stored_schema.fields {
            if !field.field_type.is_var_width() {
                continue;
            }
            let heap_len = read_vu64(input)?;
            let included = self
                .schema
                .fields
                .iter()
                .any(|f| f.stored_position == field.stored_position);
            if included {
                let mut heap = SegmentedByteArray::new(recycler);
                heap.read_from(input, recycler, heap_len)?;
                slots[field.stored_position].var_heap_index = Some(var_heaps.len());
                var_heaps.push(heap);
            } else {
                // Excluded field: parse and drop.
                input.skip(heap_len)?;
            }
        }

        Ok(ObjectShard {
            ordinal_span,
            population,
            slots,
            bits_per_record,
            fixed,
            var_heaps,
        })
    }

    /// Resolve `(ordinal, filtered field index)` to the shard, local
    /// ordinal, and slot, verifying population.
    fn locate(&self, ordinal: u32, field: usize) -> ShaleResult<(&ObjectShard, u64, &FieldSlot)> {
        let schema_field = self.schema.fields.get(field).ok_or_else(|| {
            ShaleError::OutOfRange {
                index: field as u64,
                max: self.schema.num_fields().saturating_sub(1) as u64,
            }
        })?;
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
        Ok((shard, local, &shard.slots[schema_field.stored_position]))
    }

    /// Whether the field is null for `ordinal`.
    pub fn is_null(&self, ordinal: u32, field: usize) -> ShaleResult<bool> {
        let (shard, local, slot) = self.locate(ordinal, field)?;
        let raw = shard.read_raw(local, slot)?;
        Ok(match slot.field_type {
            FieldType::Boolean => raw == 3,
            ty if ty.is_var_width() => raw >> (slot.bits - 1) & 1 == 1,
            _ => raw == all_ones(slot.bits),
        })
    }

    /// Read an `Int` field.
    pub fn read_int(&self, ordinal: u32, field: usize) -> ShaleResult<Option<i32>> {
        let (shard, local, slot) = self.locate(ordinal, field)?;
        self.expect_type(slot, FieldType::Int)?;
        let raw = shard.read_raw(local, slot)?;
        if raw == all_ones(slot.bits) {
            return Ok(None);
        }
        Ok(Some(zigzag_decode(raw) as i32))
    }

    /// Read a `Long` field.
    pub fn read_long(&self, ordinal: u32, field: usize) -> ShaleResult<Option<i64>> {
        let (shard, local, slot) = self.locate(ordinal, field)?;
        self.expect_type(slot, FieldType::Long)?;
        let raw = shard.read_raw(local, slot)?;
        if raw == all_ones(slot.bits) {
            return Ok(None);
        }
        Ok(Some(zigzag_decode(raw)))
    }

    /// Read a `Boolean` field.
    pub fn read_boolean(&self, ordinal: u32, field: usize) -> ShaleResult<Option<bool>> {
        let (shard, local, slot) = self.locate(ordinal, field)?;
        self.expect_type(slot, FieldType::Boolean)?;
        match shard.read_raw(local, slot)? {
            3 => Ok(None),
            1 => Ok(Some(true)),
            0 => Ok(Some(false)),
            other => Err(ShaleError::malformed(format!(
                "boolean slot holds {other}"
            ))),
        }
    }

    /// Read a `Float` field.
    pub fn read_float(&self, ordinal: u32, field: usize) -> ShaleResult<Option<f32>> {
        let (shard, local, slot) = self.locate(ordinal, field)?;
        self.expect_type(slot, FieldType::Float)?;
        let raw = shard.read_raw(local, slot)?;
        if raw == all_ones(slot.bits) {
            return Ok(None);
        }
        Ok(Some(f32::from_bits(raw as u32)))
    }

    /// Read a `Double` field.
    pub fn read_double(&self, ordinal: u32, field: usize) -> ShaleResult<Option<f64>> {
        let (shard, local, slot) = self.locate(ordinal, field)?;
        self.expect_type(slot, FieldType::Double)?;
        let raw = shard.read_raw(local, slot)?;
        if raw == all_ones(slot.bits) {
            return Ok(None);
        }
        Ok(Some(f64::from_bits(raw)))
    }

    /// Read a `Reference` field: the ordinal in the referenced type.
    pub fn read_ordinal(&self, ordinal: u32, field: usize) -> ShaleResult<Option<u32>> {
        let (shard, local, slot) = self.locate(ordinal, field)?;
        self.expect_type(slot, FieldType::Reference)?;
        let raw = shard.read_raw(local, slot)?;
        if raw == all_ones(slot.bits) {
            return Ok(None);
        }
        Ok(Some(raw as u32))
    }

    /// Read a `String` field.
    pub fn read_string(&self, ordinal: u32, field: usize) -> ShaleResult<Option<String>> {
        match self.read_var_bytes(ordinal, field, FieldType::String)? {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| ShaleError::malformed("string field is not valid UTF-8")),
        }
    }

    /// Read a `Bytes` field.
    pub fn read_bytes(&self, ordinal: u32, field: usize) -> ShaleResult<Option<Vec<u8>>> {
        self.read_var_bytes(ordinal, field, FieldType::Bytes)
    }

    fn read_var_bytes(
        &self,
        ordinal: u32,
        field: usize,
        expected: FieldType,
    ) -> ShaleResult<Option<Vec<u8>>> {
        let (shard, local, slot) = self.locate(ordinal, field)?;
        self.expect_type(slot, expected)?;
        let heap_index = slot.var_heap_index.ok_or_else(|| {
            ShaleError::malformed(format!(
                "var-width field {field} of `{}` has no retained heap",
                self.schema.name
            ))
        })?;
        let raw = shard.read_raw(local, slot)?;
        let null_flag = 1u64 << (slot.bits - 1);
        if raw & null_flag != 0 {
            return Ok(None);
        }
        let offset_mask = null_flag - 1;
        let end = raw & offset_mask;
        let start = if local == 0 {
            0
        } else {
            shard.read_raw(local - 1, slot)? & offset_mask
        };
        if end < start {
            return Err(ShaleError::malformed(format!(
                "var-width offsets regress ({start} -> {end})"
            )));
        }
        let mut bytes = vec![0u8; (end - start) as usize];
        shard.var_heaps[heap_index].copy_to(start, &mut bytes)?;
        Ok(Some(bytes))
    }

    fn expect_type(&self, slot: &FieldSlot, expected: FieldType) -> ShaleResult<()> {
        if slot.field_type != expected {
            return Err(ShaleError::SchemaMismatch {
                type_name: self.schema.name.clone(),
                reason: format!(
                    "field read as {expected:?} but schema declares {:?}",
                    slot.field_type
                ),
            });
        }
        Ok(())
    }
}

#[inline]
fn all_ones(bits: u32) -> u64 {
    if bits == 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Advance the input past an object type's snapshot payload.
pub(super) fn discard_snapshot(
    input: &mut BlobInput,
    schema: &ObjectSchema,
    num_shards: u32,
) -> ShaleResult<()> {
    for _ in 0..num_shards {
        let _ordinal_span = read_vu32(input)?;
        OrdinalBitmap::skip(input)?;
        for _ in 0..schema.num_fields() {
            let _bits = read_vu32(input)?;
        }
        let fixed_longs = read_vu64(input)?;
        input.skip(fixed_longs * 8)?;
        for field in &schema.fields {
            if field.field_type.is_var_width() {
                let heap_len = read_vu64(input)?;
                input.skip(heap_len)?;
            }
        }
    }
    Ok(())
}
