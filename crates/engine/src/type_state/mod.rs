//! Typed read states.
//!
//! A type read state owns everything loaded for one type: its (filtered)
//! schema, one shard per `ordinal & (num_shards - 1)` partition, and the
//! listeners interested in its update lifecycle. The kind set is closed —
//! object, list, set, map — so the polymorphism is a tagged enum rather
//! than open inheritance.
//!
//! Capability surface per state: `read_snapshot`, `apply_delta`, shard
//! count, schema, populated-ordinal queries, and listener fanout. The
//! filtered-out analogues `discard_snapshot` / `discard_delta` are free
//! functions: they advance the stream past a type without constructing
//! anything.

mod list;
mod map;
mod object;
mod set;

pub use list::ListTypeReadState;
pub use map::MapTypeReadState;
pub use object::ObjectTypeReadState;
pub use set::SetTypeReadState;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use shale_core::encoding::{read_vu32, read_vu64};
use shale_core::{Schema, ShaleError, ShaleResult};
use shale_memory::{BlobInput, SegmentRecycler};
use std::sync::{Arc, Weak};

/// Listener notified when a type state's data begins and finishes changing.
///
/// Callbacks run synchronously on the update thread; derived structures
/// (indexes, caches) rebuild in `end_update`.
pub trait TypeStateListener: Send + Sync {
    /// The type's data is about to change.
    fn begin_update(&self) {}
    /// The type's data finished changing and is safe to read.
    fn end_update(&self) {}
}

/// The per-kind payload of a type read state.
pub enum TypeStateData {
    /// Object type: bit-packed fields plus var-width heaps.
    Object(ObjectTypeReadState),
    /// List type: pointer and element streams.
    List(ListTypeReadState),
    /// Set type: pointer/size and hashed bucket streams.
    Set(SetTypeReadState),
    /// Map type: pointer/size and hashed key/value bucket streams.
    Map(MapTypeReadState),
}

/// A loaded type: schema, shards, listeners, and resolved references.
pub struct TypeReadState {
    data: TypeStateData,
    listeners: RwLock<Vec<Arc<dyn TypeStateListener>>>,
    /// Referenced type name → state, resolved by
    /// `ReadStateEngine::wire_type_states_to_schemas`. Weak: the engine
    /// owns the strong handles, and references may be cyclic.
    references: RwLock<FxHashMap<String, Weak<TypeReadState>>>,
}

impl TypeReadState {
    /// Wrap per-kind data into a registered-able state.
    pub fn new(data: TypeStateData) -> Self {
        TypeReadState {
            data,
            listeners: RwLock::new(Vec::new()),
            references: RwLock::new(FxHashMap::default()),
        }
    }

    /// The type name.
    pub fn name(&self) -> &str {
        match &self.data {
            TypeStateData::Object(s) => &s.schema().name,
            TypeStateData::List(s) => &s.schema().name,
            TypeStateData::Set(s) => &s.schema().name,
            TypeStateData::Map(s) => &s.schema().name,
        }
    }

    /// The (filtered) schema this state was populated under.
    pub fn schema(&self) -> Schema {
        match &self.data {
            TypeStateData::Object(s) => Schema::Object(s.schema().clone()),
            TypeStateData::List(s) => Schema::List(s.schema().clone()),
            TypeStateData::Set(s) => Schema::Set(s.schema().clone()),
            TypeStateData::Map(s) => Schema::Map(s.schema().clone()),
        }
    }

    /// Number of shards (a power of two).
    pub fn num_shards(&self) -> u32 {
        match &self.data {
            TypeStateData::Object(s) => s.num_shards(),
            TypeStateData::List(s) => s.num_shards(),
            TypeStateData::Set(s) => s.num_shards(),
            TypeStateData::Map(s) => s.num_shards(),
        }
    }

    /// The shard holding `ordinal`.
    pub fn shard_of(&self, ordinal: u32) -> u32 {
        ordinal & (self.num_shards() - 1)
    }

    /// All populated ordinals, ascending.
    pub fn populated_ordinals(&self) -> Vec<u32> {
        match &self.data {
            TypeStateData::Object(s) => s.populated_ordinals(),
            TypeStateData::List(s) => s.populated_ordinals(),
            TypeStateData::Set(s) => s.populated_ordinals(),
            TypeStateData::Map(s) => s.populated_ordinals(),
        }
    }

    /// The highest populated ordinal, if any.
    pub fn max_ordinal(&self) -> Option<u32> {
        self.populated_ordinals().last().copied()
    }

    /// The object payload, if this is an object type.
    pub fn as_object(&self) -> Option<&ObjectTypeReadState> {
        match &self.data {
            TypeStateData::Object(s) => Some(s),
            _ => None,
        }
    }

    /// The list payload, if this is a list type.
    pub fn as_list(&self) -> Option<&ListTypeReadState> {
        match &self.data {
            TypeStateData::List(s) => Some(s),
            _ => None,
        }
    }

    /// The set payload, if this is a set type.
    pub fn as_set(&self) -> Option<&SetTypeReadState> {
        match &self.data {
            TypeStateData::Set(s) => Some(s),
            _ => None,
        }
    }

    /// The map payload, if this is a map type.
    pub fn as_map(&self) -> Option<&MapTypeReadState> {
        match &self.data {
            TypeStateData::Map(s) => Some(s),
            _ => None,
        }
    }

    /// Consume this type's snapshot sub-stream.
    pub(crate) fn read_snapshot(
        &mut self,
        input: &mut BlobInput,
        recycler: &mut SegmentRecycler,
    ) -> ShaleResult<()> {
        match &mut self.data {
            TypeStateData::Object(s) => s.read_snapshot(input, recycler),
            TypeStateData::List(s) => s.read_snapshot(input, recycler),
            TypeStateData::Set(s) => s.read_snapshot(input, recycler),
            TypeStateData::Map(s) => s.read_snapshot(input, recycler),
        }
    }

    /// Apply this type's delta sub-stream.
    ///
    /// Validates the delta schema against the resident schema and the shard
    /// count against the resident shard count, then refuses: in-place
    /// mutation of populated states is not implemented — mapped segments
    /// are immutable views. Deltas succeed only for types the engine does
    /// not hold (see `discard_delta`).
    pub(crate) fn apply_delta(
        &self,
        _input: &mut BlobInput,
        schema: &Schema,
        num_shards: u32,
        _recycler: &mut SegmentRecycler,
    ) -> ShaleResult<()> {
        if !self.schema().matches(schema) {
            return Err(ShaleError::SchemaMismatch {
                type_name: schema.name().to_string(),
                reason: "delta schema does not match resident schema".to_string(),
            });
        }
        if num_shards != self.num_shards() {
            return Err(ShaleError::SchemaMismatch {
                type_name: schema.name().to_string(),
                reason: format!(
                    "delta declares {num_shards} shards, resident state has {}",
                    self.num_shards()
                ),
            });
        }
        let mode = match &self.data {
            TypeStateData::Object(s) => s.mode(),
            TypeStateData::List(s) => s.mode(),
            TypeStateData::Set(s) => s.mode(),
            TypeStateData::Map(s) => s.mode(),
        };
        Err(ShaleError::DeltaUnsupported { mode: mode.label() })
    }

    /// Register a lifecycle listener.
    pub fn add_listener(&self, listener: Arc<dyn TypeStateListener>) {
        self.listeners.write().push(listener);
    }

    /// Number of registered listeners.
    pub fn num_listeners(&self) -> usize {
        self.listeners.read().len()
    }

    pub(crate) fn notify_begin_update(&self) {
        for listener in self.listeners.read().iter() {
            listener.begin_update();
        }
    }

    pub(crate) fn notify_end_update(&self) {
        for listener in self.listeners.read().iter() {
            listener.end_update();
        }
    }

    pub(crate) fn wire_reference(&self, name: &str, target: Weak<TypeReadState>) {
        self.references.write().insert(name.to_string(), target);
    }

    /// The resolved state for a referenced type name, if wired and alive.
    pub fn referenced_state(&self, name: &str) -> Option<Arc<TypeReadState>> {
        self.references.read().get(name).and_then(Weak::upgrade)
    }
}

/// Read the shard-count preamble that precedes every type payload.
///
/// A leading zero varint is the pre-sharding sentinel: one shard, nothing
/// else to read. Otherwise a varint counts forwards-compatibility bytes to
/// skip, then the shard count itself follows; it must be a power of two.
pub fn read_num_shards(input: &mut BlobInput) -> ShaleResult<u32> {
    let sentinel = read_vu32(input)?;
    if sentinel == 0 {
        return Ok(1);
    }
    let compat_bytes = read_vu32(input)?;
    input.skip(u64::from(compat_bytes))?;
    let num_shards = read_vu32(input)?;
    if num_shards == 0 || !num_shards.is_power_of_two() {
        return Err(ShaleError::malformed(format!(
            "shard count {num_shards} is not a power of two"
        )));
    }
    Ok(num_shards)
}

/// Advance the input past a type's snapshot payload without retaining it.
pub fn discard_snapshot(
    input: &mut BlobInput,
    schema: &Schema,
    num_shards: u32,
) -> ShaleResult<()> {
    match schema {
        Schema::Object(s) => object::discard_snapshot(input, s, num_shards),
        Schema::List(_) => list::discard_snapshot(input, num_shards),
        Schema::Set(_) => set::discard_snapshot(input, num_shards),
        Schema::Map(_) => map::discard_snapshot(input, num_shards),
    }
}

/// Advance the input past a type's delta payload without retaining it.
///
/// Delta payloads are length-delimited per shard, so skipping needs no
/// kind-specific knowledge.
pub fn discard_delta(input: &mut BlobInput, num_shards: u32) -> ShaleResult<()> {
    for _ in 0..num_shards {
        let body_len = read_vu64(input)?;
        input.skip(body_len)?;
    }
    Ok(())
}

/// Shard-local ordinal of `ordinal` given `shard_bits = log2(num_shards)`.
#[inline]
pub(crate) fn local_ordinal(ordinal: u32, shard_bits: u32) -> u64 {
    u64::from(ordinal >> shard_bits)
}

/// Reassemble a global ordinal from its shard and shard-local ordinal.
#[inline]
pub(crate) fn global_ordinal(local: u64, shard: u32, shard_bits: u32) -> u32 {
    ((local as u32) << shard_bits) | shard
}

/// Collect the populated global ordinals across shards, ascending.
pub(crate) fn collect_populated<'a>(
    shards: impl Iterator<Item = &'a crate::ordinal::OrdinalBitmap>,
    shard_bits: u32,
) -> Vec<u32> {
    let mut ordinals: Vec<u32> = shards
        .enumerate()
        .flat_map(|(shard, bitmap)| {
            bitmap
                .iter()
                .map(move |local| global_ordinal(local, shard as u32, shard_bits))
                .collect::<Vec<u32>>()
        })
        .collect();
    ordinals.sort_unstable();
    ordinals
}
