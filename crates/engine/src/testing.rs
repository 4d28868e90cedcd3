//! Test-support blob builders.
//!
//! Wire-correct snapshot and delta fixtures for this crate's tests and for
//! downstream consumers' tests. Producers proper live outside this
//! repository; these builders cover exactly the layouts the read path
//! understands and panic on fixture mistakes (wrong value arity, values
//! that cannot reserve a null sentinel) rather than returning errors.

use crate::header::{BLOB_FORMAT_VERSION, BLOB_MAGIC};
use shale_core::encoding::{ordinal_hash, write_vstring, write_vu32, write_vu64, zigzag_encode};
use shale_core::{FieldType, ListSchema, MapSchema, ObjectSchema, Schema, SetSchema};

/// A field value for an [`ObjectTypeFixture`] record. `None` encodes null.
#[derive(Debug, Clone)]
pub enum FieldValue {
    /// Int field (must fit `i32`).
    Int(Option<i64>),
    /// Long field.
    Long(Option<i64>),
    /// Boolean field.
    Boolean(Option<bool>),
    /// Float field.
    Float(Option<f32>),
    /// Double field.
    Double(Option<f64>),
    /// String field.
    Str(Option<String>),
    /// Bytes field.
    Bytes(Option<Vec<u8>>),
    /// Reference field (ordinal in the referenced type).
    Ref(Option<u32>),
}

/// Builder for one object type's snapshot block.
pub struct ObjectTypeFixture {
    schema: ObjectSchema,
    num_shards: u32,
    records: Vec<(u32, Vec<FieldValue>)>,
}

impl ObjectTypeFixture {
    /// A fixture for `schema` split over `num_shards` shards.
    pub fn new(schema: ObjectSchema, num_shards: u32) -> Self {
        assert!(num_shards.is_power_of_two());
        ObjectTypeFixture {
            schema,
            num_shards,
            records: Vec::new(),
        }
    }

    /// Add a record at `ordinal`; `values` must match the schema's fields.
    pub fn record(mut self, ordinal: u32, values: Vec<FieldValue>) -> Self {
        assert_eq!(
            values.len(),
            self.schema.num_fields(),
            "record arity must match schema"
        );
        self.records.push((ordinal, values));
        self
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        Schema::Object(self.schema.clone())
            .write_to(&mut out)
            .unwrap();
        write_shard_preamble(&mut out, self.num_shards);

        let shard_bits = self.num_shards.trailing_zeros();
        for shard in 0..self.num_shards {
            let locals = shard_records(&self.records, shard, self.num_shards, shard_bits);
            let span = span_of(&locals);
            write_vu32(&mut out, span).unwrap();
            write_population(&mut out, &locals, span);

            // Per-field encodings over this shard's local slots.
            let mut slot_values: Vec<Vec<u64>> = Vec::new();
            let mut bits: Vec<u32> = Vec::new();
            let mut heaps: Vec<Vec<u8>> = Vec::new();
            for (field_index, field) in self.schema.fields.iter().enumerate() {
                let (field_bits, values, heap) =
                    encode_field(field.field_type, field_index, &locals, span);
                bits.push(field_bits);
                slot_values.push(values);
                if field.field_type.is_var_width() {
                    heaps.push(heap);
                }
            }

            for &b in &bits {
                write_vu32(&mut out, b).unwrap();
            }

            let mut writer = BitWriter::new();
            for local in 0..span as usize {
                for (field_index, &b) in bits.iter().enumerate() {
                    writer.put(slot_values[field_index][local], b);
                }
            }
            write_long_stream(&mut out, &writer.finish());

            for heap in &heaps {
                write_vu64(&mut out, heap.len() as u64).unwrap();
                out.extend_from_slice(heap);
            }
        }
        out
    }
}

/// Builder for one list type's snapshot block.
pub struct ListTypeFixture {
    schema: ListSchema,
    num_shards: u32,
    lists: Vec<(u32, Vec<u32>)>,
}

impl ListTypeFixture {
    /// A fixture for `schema` split over `num_shards` shards.
    pub fn new(schema: ListSchema, num_shards: u32) -> Self {
        assert!(num_shards.is_power_of_two());
        ListTypeFixture {
            schema,
            num_shards,
            lists: Vec::new(),
        }
    }

    /// Add a list of element ordinals at `ordinal`.
    pub fn list(mut self, ordinal: u32, elements: Vec<u32>) -> Self {
        self.lists.push((ordinal, elements));
        self
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        Schema::List(self.schema.clone()).write_to(&mut out).unwrap();
        write_shard_preamble(&mut out, self.num_shards);

        let shard_bits = self.num_shards.trailing_zeros();
        for shard in 0..self.num_shards {
            let locals = shard_records(&self.lists, shard, self.num_shards, shard_bits);
            let span = span_of(&locals);
            write_vu32(&mut out, span).unwrap();
            write_population(&mut out, &locals, span);

            let total_elements: u64 = locals.iter().map(|(_, l)| l.len() as u64).sum();
            let max_element = locals
                .iter()
                .flat_map(|(_, l)| l.iter().copied())
                .max()
                .unwrap_or(0);
            let bits_per_pointer = bits_for(total_elements).max(1);
            let bits_per_element = bits_for(u64::from(max_element)).max(1);

            write_vu32(&mut out, bits_per_pointer).unwrap();
            write_vu32(&mut out, bits_per_element).unwrap();
            write_vu64(&mut out, total_elements).unwrap();

            // Pointer stream: running end offsets, carried through
            // unpopulated slots.
            let mut pointers = BitWriter::new();
            let mut end = 0u64;
            for local in 0..span as u64 {
                if let Some((_, elements)) = locals.iter().find(|(l, _)| *l == local) {
                    end += elements.len() as u64;
                }
                pointers.put(end, bits_per_pointer);
            }
            write_long_stream(&mut out, &pointers.finish());

            let mut elements = BitWriter::new();
            let mut ordered: Vec<&(u64, Vec<u32>)> = locals.iter().collect();
            ordered.sort_by_key(|(l, _)| *l);
            for (_, list) in ordered {
                for &element in list {
                    elements.put(u64::from(element), bits_per_element);
                }
            }
            write_long_stream(&mut out, &elements.finish());
        }
        out
    }
}

/// Builder for one set type's snapshot block.
pub struct SetTypeFixture {
    schema: SetSchema,
    num_shards: u32,
    sets: Vec<(u32, Vec<u32>)>,
}

impl SetTypeFixture {
    /// A fixture for `schema` split over `num_shards` shards.
    pub fn new(schema: SetSchema, num_shards: u32) -> Self {
        assert!(num_shards.is_power_of_two());
        SetTypeFixture {
            schema,
            num_shards,
            sets: Vec::new(),
        }
    }

    /// Add a set of element ordinals at `ordinal`.
    pub fn set(mut self, ordinal: u32, elements: Vec<u32>) -> Self {
        self.sets.push((ordinal, elements));
        self
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        Schema::Set(self.schema.clone()).write_to(&mut out).unwrap();
        write_shard_preamble(&mut out, self.num_shards);

        let shard_bits = self.num_shards.trailing_zeros();
        for shard in 0..self.num_shards {
            let locals = shard_records(&self.sets, shard, self.num_shards, shard_bits);
            let span = span_of(&locals);
            write_vu32(&mut out, span).unwrap();
            write_population(&mut out, &locals, span);

            let max_element = locals
                .iter()
                .flat_map(|(_, s)| s.iter().copied())
                .max()
                .unwrap_or(0);
            let max_size = locals.iter().map(|(_, s)| s.len() as u64).max().unwrap_or(0);
            let bits_per_element = bits_for(u64::from(max_element) + 1);

            // Place every set's elements into its power-of-two bucket span.
            let empty = (1u64 << bits_per_element) - 1;
            let mut buckets: Vec<u64> = Vec::new();
            let mut ends: Vec<(u64, u64, u64)> = Vec::new(); // (local, end, size)
            let mut ordered: Vec<&(u64, Vec<u32>)> = locals.iter().collect();
            ordered.sort_by_key(|(l, _)| *l);
            for (local, elements) in ordered {
                let span_buckets = bucket_count(elements.len() as u64);
                let base = buckets.len() as u64;
                buckets.resize(buckets.len() + span_buckets as usize, empty);
                if span_buckets > 0 {
                    let mask = span_buckets - 1;
                    for &element in elements {
                        let mut bucket = u64::from(ordinal_hash(element)) & mask;
                        while buckets[(base + bucket) as usize] != empty {
                            bucket = (bucket + 1) & mask;
                        }
                        buckets[(base + bucket) as usize] = u64::from(element);
                    }
                }
                ends.push((*local, buckets.len() as u64, elements.len() as u64));
            }

            let total_buckets = buckets.len() as u64;
            let bits_per_pointer = bits_for(total_buckets).max(1);
            let bits_per_size = bits_for(max_size).max(1);
            write_vu32(&mut out, bits_per_pointer).unwrap();
            write_vu32(&mut out, bits_per_size).unwrap();
            write_vu32(&mut out, bits_per_element).unwrap();
            write_vu64(&mut out, total_buckets).unwrap();

            let mut pointers = BitWriter::new();
            let mut end = 0u64;
            for local in 0..span as u64 {
                let size = match ends.iter().find(|(l, _, _)| *l == local) {
                    Some(&(_, slot_end, slot_size)) => {
                        end = slot_end;
                        slot_size
                    }
                    None => 0,
                };
                pointers.put(end | (size << bits_per_pointer), bits_per_pointer + bits_per_size);
            }
            write_long_stream(&mut out, &pointers.finish());

            let mut bucket_writer = BitWriter::new();
            for &bucket in &buckets {
                bucket_writer.put(bucket, bits_per_element);
            }
            write_long_stream(&mut out, &bucket_writer.finish());
        }
        out
    }
}

/// Builder for one map type's snapshot block.
pub struct MapTypeFixture {
    schema: MapSchema,
    num_shards: u32,
    maps: Vec<(u32, Vec<(u32, u32)>)>,
}

impl MapTypeFixture {
    /// A fixture for `schema` split over `num_shards` shards.
    pub fn new(schema: MapSchema, num_shards: u32) -> Self {
        assert!(num_shards.is_power_of_two());
        MapTypeFixture {
            schema,
            num_shards,
            maps: Vec::new(),
        }
    }

    /// Add a map of `(key, value)` ordinal pairs at `ordinal`.
    pub fn map(mut self, ordinal: u32, entries: Vec<(u32, u32)>) -> Self {
        self.maps.push((ordinal, entries));
        self
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        Schema::Map(self.schema.clone()).write_to(&mut out).unwrap();
        write_shard_preamble(&mut out, self.num_shards);

        let shard_bits = self.num_shards.trailing_zeros();
        for shard in 0..self.num_shards {
            let locals = shard_records(&self.maps, shard, self.num_shards, shard_bits);
            let span = span_of(&locals);
            write_vu32(&mut out, span).unwrap();
            write_population(&mut out, &locals, span);

            let max_key = locals
                .iter()
                .flat_map(|(_, m)| m.iter().map(|&(k, _)| k))
                .max()
                .unwrap_or(0);
            let max_value = locals
                .iter()
                .flat_map(|(_, m)| m.iter().map(|&(_, v)| v))
                .max()
                .unwrap_or(0);
            let max_size = locals.iter().map(|(_, m)| m.len() as u64).max().unwrap_or(0);
            let bits_per_key = bits_for(u64::from(max_key) + 1);
            let bits_per_value = bits_for(u64::from(max_value)).max(1);

            let empty_key = (1u64 << bits_per_key) - 1;
            let mut buckets: Vec<(u64, u64)> = Vec::new();
            let mut ends: Vec<(u64, u64, u64)> = Vec::new();
            let mut ordered: Vec<&(u64, Vec<(u32, u32)>)> = locals.iter().collect();
            ordered.sort_by_key(|(l, _)| *l);
            for (local, entries) in ordered {
                let span_buckets = bucket_count(entries.len() as u64);
                let base = buckets.len() as u64;
                buckets.resize(buckets.len() + span_buckets as usize, (empty_key, 0));
                if span_buckets > 0 {
                    let mask = span_buckets - 1;
                    for &(key, value) in entries {
                        let mut bucket = u64::from(ordinal_hash(key)) & mask;
                        while buckets[(base + bucket) as usize].0 != empty_key {
                            bucket = (bucket + 1) & mask;
                        }
                        buckets[(base + bucket) as usize] = (u64::from(key), u64::from(value));
                    }
                }
                ends.push((*local, buckets.len() as u64, entries.len() as u64));
            }

            let total_buckets = buckets.len() as u64;
            let bits_per_pointer = bits_for(total_buckets).max(1);
            let bits_per_size = bits_for(max_size).max(1);
            write_vu32(&mut out, bits_per_pointer).unwrap();
            write_vu32(&mut out, bits_per_size).unwrap();
            write_vu32(&mut out, bits_per_key).unwrap();
            write_vu32(&mut out, bits_per_value).unwrap();
            write_vu64(&mut out, total_buckets).unwrap();

            let mut pointers = BitWriter::new();
            let mut end = 0u64;
            for local in 0..span as u64 {
                let size = match ends.iter().find(|(l, _, _)| *l == local) {
                    Some(&(_, slot_end, slot_size)) => {
                        end = slot_end;
                        slot_size
                    }
                    None => 0,
                };
                pointers.put(end | (size << bits_per_pointer), bits_per_pointer + bits_per_size);
            }
            write_long_stream(&mut out, &pointers.finish());

            let mut bucket_writer = BitWriter::new();
            for &(key, value) in &buckets {
                bucket_writer.put(key | (value << bits_per_key), bits_per_key + bits_per_value);
            }
            write_long_stream(&mut out, &bucket_writer.finish());
        }
        out
    }
}

/// Builder for a complete snapshot blob.
pub struct SnapshotBuilder {
    version: u32,
    destination_tag: u64,
    tags: Vec<(String, String)>,
    type_blocks: Vec<Vec<u8>>,
}

impl SnapshotBuilder {
    /// An empty snapshot with destination tag 1 and no header tags.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        SnapshotBuilder {
            version: BLOB_FORMAT_VERSION,
            destination_tag: 1,
            tags: Vec::new(),
            type_blocks: Vec::new(),
        }
    }

    /// Override the declared format version (for rejection tests).
    pub fn format_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Set the destination randomized tag.
    pub fn destination_tag(mut self, tag: u64) -> Self {
        self.destination_tag = tag;
        self
    }

    /// Attach a header key/value tag.
    pub fn header_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    /// Append an object type block.
    pub fn object_type(mut self, fixture: ObjectTypeFixture) -> Self {
        self.type_blocks.push(fixture.encode());
        self
    }

    /// Append a list type block.
    pub fn list_type(mut self, fixture: ListTypeFixture) -> Self {
        self.type_blocks.push(fixture.encode());
        self
    }

    /// Append a set type block.
    pub fn set_type(mut self, fixture: SetTypeFixture) -> Self {
        self.type_blocks.push(fixture.encode());
        self
    }

    /// Append a map type block.
    pub fn map_type(mut self, fixture: MapTypeFixture) -> Self {
        self.type_blocks.push(fixture.encode());
        self
    }

    /// Serialize the snapshot blob.
    pub fn build(self) -> Vec<u8> {
        let mut out = Vec::new();
        write_header(
            &mut out,
            self.version,
            0,
            self.destination_tag,
            &self.tags,
        );
        write_vu32(&mut out, self.type_blocks.len() as u32).unwrap();
        for block in &self.type_blocks {
            out.extend_from_slice(block);
        }
        out
    }
}

/// Builder for a delta blob.
///
/// Delta type payloads are length-delimited per shard and opaque to this
/// builder; record-level delta encoding is a producer concern.
pub struct DeltaBuilder {
    version: u32,
    origin_tag: u64,
    destination_tag: u64,
    tags: Vec<(String, String)>,
    type_blocks: Vec<Vec<u8>>,
}

impl DeltaBuilder {
    /// A delta originating from the state tagged `origin_tag`.
    pub fn new(origin_tag: u64) -> Self {
        DeltaBuilder {
            version: BLOB_FORMAT_VERSION,
            origin_tag,
            destination_tag: origin_tag.wrapping_add(1),
            tags: Vec::new(),
            type_blocks: Vec::new(),
        }
    }

    /// Set the destination randomized tag.
    pub fn destination_tag(mut self, tag: u64) -> Self {
        self.destination_tag = tag;
        self
    }

    /// Attach a header key/value tag.
    pub fn header_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    /// Append a type block whose shard payloads are opaque bytes.
    pub fn opaque_type(mut self, schema: &Schema, num_shards: u32, shards: &[&[u8]]) -> Self {
        assert_eq!(shards.len(), num_shards as usize);
        let mut block = Vec::new();
        schema.write_to(&mut block).unwrap();
        write_shard_preamble(&mut block, num_shards);
        for shard in shards {
            write_vu64(&mut block, shard.len() as u64).unwrap();
            block.extend_from_slice(shard);
        }
        self.type_blocks.push(block);
        self
    }

    /// Serialize the delta blob.
    pub fn build(self) -> Vec<u8> {
        let mut out = Vec::new();
        write_header(
            &mut out,
            self.version,
            self.origin_tag,
            self.destination_tag,
            &self.tags,
        );
        write_vu32(&mut out, self.type_blocks.len() as u32).unwrap();
        for block in &self.type_blocks {
            out.extend_from_slice(block);
        }
        out
    }
}

// ============================================================================
// Shared encoding helpers
// ============================================================================

fn write_header(
    out: &mut Vec<u8>,
    version: u32,
    origin_tag: u64,
    destination_tag: u64,
    tags: &[(String, String)],
) {
    out.extend_from_slice(&BLOB_MAGIC.to_le_bytes());
    out.extend_from_slice(&version.to_le_bytes());
    out.extend_from_slice(&origin_tag.to_le_bytes());
    out.extend_from_slice(&destination_tag.to_le_bytes());
    write_vu32(out, tags.len() as u32).unwrap();
    for (key, value) in tags {
        write_vstring(out, key).unwrap();
        write_vstring(out, value).unwrap();
    }
}

/// Pre-sharding sentinel for one shard; modern preamble otherwise.
fn write_shard_preamble(out: &mut Vec<u8>, num_shards: u32) {
    if num_shards == 1 {
        write_vu32(out, 0).unwrap();
    } else {
        write_vu32(out, 1).unwrap();
        write_vu32(out, 0).unwrap();
        write_vu32(out, num_shards).unwrap();
    }
}

/// Split records across shards and key them by shard-local ordinal.
fn shard_records<T: Clone>(
    records: &[(u32, T)],
    shard: u32,
    num_shards: u32,
    shard_bits: u32,
) -> Vec<(u64, T)> {
    records
        .iter()
        .filter(|(ordinal, _)| ordinal & (num_shards - 1) == shard)
        .map(|(ordinal, value)| (u64::from(ordinal >> shard_bits), value.clone()))
        .collect()
}

fn span_of<T>(locals: &[(u64, T)]) -> u32 {
    locals
        .iter()
        .map(|(local, _)| *local + 1)
        .max()
        .unwrap_or(0) as u32
}

fn write_population<T>(out: &mut Vec<u8>, locals: &[(u64, T)], span: u32) {
    let num_words = (span as usize).div_ceil(64);
    let mut words = vec![0u64; num_words];
    for (local, _) in locals {
        words[(local / 64) as usize] |= 1u64 << (local % 64);
    }
    write_vu32(out, num_words as u32).unwrap();
    for word in &words {
        out.extend_from_slice(&word.to_le_bytes());
    }
}

fn write_long_stream(out: &mut Vec<u8>, words: &[u64]) {
    write_vu64(out, words.len() as u64).unwrap();
    for word in words {
        out.extend_from_slice(&word.to_le_bytes());
    }
}

/// Bits needed to represent `value` (at least 1).
fn bits_for(value: u64) -> u32 {
    (64 - value.leading_zeros()).max(1)
}

/// Power-of-two bucket count for a set/map of `size` entries (~0.7 load).
fn bucket_count(size: u64) -> u64 {
    if size == 0 {
        return 0;
    }
    let mut buckets = 1u64;
    while buckets * 7 < size * 10 {
        buckets <<= 1;
    }
    buckets
}

/// Encode one stored field over a shard's local slots.
///
/// Returns `(bits_per_field, slot values, heap bytes)`; the heap is empty
/// for fixed-width fields.
fn encode_field(
    field_type: FieldType,
    field_index: usize,
    locals: &[(u64, Vec<FieldValue>)],
    span: u32,
) -> (u32, Vec<u64>, Vec<u8>) {
    let value_at = |local: u64| -> Option<&FieldValue> {
        locals
            .iter()
            .find(|(l, _)| *l == local)
            .map(|(_, values)| &values[field_index])
    };

    if field_type.is_var_width() {
        let mut heap = Vec::new();
        let mut slots = Vec::with_capacity(span as usize);
        let mut raw_ends = Vec::with_capacity(span as usize);
        // First pass: build the heap and per-slot (end, null) pairs.
        let mut nulls = Vec::with_capacity(span as usize);
        for local in 0..u64::from(span) {
            let null = match value_at(local) {
                Some(FieldValue::Str(Some(s))) => {
                    heap.extend_from_slice(s.as_bytes());
                    false
                }
                Some(FieldValue::Bytes(Some(b))) => {
                    heap.extend_from_slice(b);
                    false
                }
                Some(FieldValue::Str(None)) | Some(FieldValue::Bytes(None)) | None => true,
                Some(other) => panic!("var-width field holds {other:?}"),
            };
            raw_ends.push(heap.len() as u64);
            nulls.push(null);
        }
        let bits = bits_for(heap.len() as u64) + 1;
        let null_flag = 1u64 << (bits - 1);
        for (end, null) in raw_ends.into_iter().zip(nulls) {
            slots.push(if null { end | null_flag } else { end });
        }
        return (bits, slots, heap);
    }

    // Fixed-width: collect raw packed values, then size the slot so the
    // all-ones sentinel stays distinct.
    let mut packed: Vec<Option<u64>> = Vec::with_capacity(span as usize);
    for local in 0..u64::from(span) {
        let raw = match value_at(local) {
            None => None,
            Some(value) => match (field_type, value) {
                (FieldType::Int, FieldValue::Int(v)) => v.map(zigzag_encode),
                (FieldType::Long, FieldValue::Long(v)) => v.map(zigzag_encode),
                (FieldType::Boolean, FieldValue::Boolean(v)) => v.map(u64::from),
                (FieldType::Float, FieldValue::Float(v)) => {
                    v.map(|f| u64::from(f.to_bits()))
                }
                (FieldType::Double, FieldValue::Double(v)) => v.map(f64::to_bits),
                (FieldType::Reference, FieldValue::Ref(v)) => v.map(u64::from),
                (ty, value) => panic!("{ty:?} field holds {value:?}"),
            },
        };
        packed.push(raw);
    }

    let bits = match field_type {
        FieldType::Boolean => 2,
        FieldType::Float => 32,
        FieldType::Double => 64,
        _ => {
            let max = packed.iter().flatten().copied().max().unwrap_or(0);
            assert!(max < u64::MAX, "value cannot reserve a null sentinel");
            bits_for(max + 1)
        }
    };
    let sentinel = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
    let slots = packed
        .into_iter()
        .map(|raw| match (field_type, raw) {
            (FieldType::Boolean, None) => 3,
            (_, None) => sentinel,
            (_, Some(v)) => v,
        })
        .collect();
    (bits, slots, Vec::new())
}

/// Packs fixed-width values into little-endian 64-bit words, padding the
/// output with one extra word so unaligned two-word reads at the tail stay
/// in bounds.
struct BitWriter {
    words: Vec<u64>,
    bit_len: u64,
}

impl BitWriter {
    fn new() -> Self {
        BitWriter {
            words: Vec::new(),
            bit_len: 0,
        }
    }

    fn put(&mut self, value: u64, bits: u32) {
        debug_assert!(bits >= 1 && bits <= 64);
        debug_assert!(bits == 64 || value < (1u64 << bits));
        let word = (self.bit_len >> 6) as usize;
        let shift = (self.bit_len & 63) as u32;
        if self.words.len() < word + 2 {
            self.words.resize(word + 2, 0);
        }
        self.words[word] |= value << shift;
        if shift + bits > 64 {
            self.words[word + 1] |= value >> (64 - shift);
        }
        self.bit_len += u64::from(bits);
    }

    fn finish(self) -> Vec<u64> {
        if self.bit_len == 0 {
            return Vec::new();
        }
        let needed = (self.bit_len as usize).div_ceil(64) + 1;
        let mut words = self.words;
        words.resize(needed, 0);
        words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_for() {
        assert_eq!(bits_for(0), 1);
        assert_eq!(bits_for(1), 1);
        assert_eq!(bits_for(2), 2);
        assert_eq!(bits_for(255), 8);
        assert_eq!(bits_for(256), 9);
        assert_eq!(bits_for(u64::MAX), 64);
    }

    #[test]
    fn test_bucket_count_load_factor() {
        assert_eq!(bucket_count(0), 0);
        assert_eq!(bucket_count(1), 2);
        assert_eq!(bucket_count(5), 8);
        // 7 * 16 = 112 >= 80.
        assert_eq!(bucket_count(8), 16);
    }

    #[test]
    fn test_bit_writer_packs_across_words() {
        let mut writer = BitWriter::new();
        // 10 values of 7 bits = 70 bits, crossing into the second word.
        for value in 0..10u64 {
            writer.put(value, 7);
        }
        let words = writer.finish();
        assert_eq!(words.len(), 3); // 2 data words + 1 pad

        for (i, expected) in (0..10u64).enumerate() {
            let bit_offset = i as u64 * 7;
            let word = (bit_offset >> 6) as usize;
            let shift = (bit_offset & 63) as u32;
            let mut raw = words[word] >> shift;
            if shift + 7 > 64 {
                raw |= words[word + 1] << (64 - shift);
            }
            assert_eq!(raw & 0x7F, expected);
        }
    }

    #[test]
    fn test_bit_writer_empty() {
        assert!(BitWriter::new().finish().is_empty());
    }
}
