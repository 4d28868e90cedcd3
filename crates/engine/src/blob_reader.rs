//! The blob reader: top-level snapshot and delta walker.
//!
//! A snapshot walk reinitializes an empty engine:
//!
//! 1. read and verify the header (not-delta mode), ingest tags
//! 2. broadcast `begin_update`
//! 3. varint type count; per type: parse schema, read the shard preamble,
//!    then either discard (filter excludes the type) or construct the
//!    matching typed state, populate it, and register it
//! 4. wire type states to schemas
//! 5. broadcast `end_update`, then run one-time initialization
//!
//! A delta walk verifies the origin tag against the engine's randomized
//! tag, replaces the tag with the header's destination, and dispatches each
//! type sub-stream: types the engine holds apply (validation + mode gate),
//! unknown types are discarded. The recycler's generations swap between
//! types. Any failure after the tag swap leaves the engine poisoned.

use crate::header::read_header;
use crate::state_engine::ReadStateEngine;
use crate::type_state::{
    self, read_num_shards, ListTypeReadState, MapTypeReadState, ObjectTypeReadState,
    SetTypeReadState, TypeReadState, TypeStateData,
};
use shale_core::encoding::read_vu32;
use shale_core::{FilterConfig, Schema, ShaleError, ShaleResult};
use shale_memory::BlobInput;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Populates and updates a [`ReadStateEngine`] from snapshot and delta
/// blobs.
pub struct BlobReader<'a> {
    engine: &'a mut ReadStateEngine,
}

impl<'a> BlobReader<'a> {
    /// A reader over `engine`.
    pub fn new(engine: &'a mut ReadStateEngine) -> Self {
        BlobReader { engine }
    }

    /// Initialize the engine from a snapshot blob, retaining only what
    /// `filter` includes.
    pub fn read_snapshot(
        &mut self,
        input: &mut BlobInput,
        filter: &FilterConfig,
    ) -> ShaleResult<()> {
        let header = read_header(input)?;
        self.engine
            .set_randomized_tag(header.destination_randomized_tag);
        self.engine.set_header_tags(header.tags);

        self.engine.notify_begin_update();
        let start = Instant::now();

        let num_types = read_vu32(input)?;
        let mut type_names = BTreeSet::new();
        for _ in 0..num_types {
            type_names.insert(self.read_type_snapshot(input, filter)?);
        }

        self.engine.wire_type_states_to_schemas();
        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            types = ?type_names,
            "snapshot load complete"
        );

        self.engine.notify_end_update();
        self.engine.after_initialization()
    }

    /// Apply a delta blob to the engine.
    ///
    /// The delta's origin tag must equal the engine's current randomized
    /// tag; that check runs before any engine mutation, so a `WrongOrigin`
    /// failure leaves the engine untouched.
    pub fn apply_delta(&mut self, input: &mut BlobInput) -> ShaleResult<()> {
        let header = read_header(input)?;
        if header.origin_randomized_tag != self.engine.randomized_tag() {
            return Err(ShaleError::WrongOrigin {
                expected: self.engine.randomized_tag(),
                actual: header.origin_randomized_tag,
            });
        }

        self.engine.mark_dirty();
        self.engine
            .set_randomized_tag(header.destination_randomized_tag);
        self.engine.set_header_tags(header.tags);

        self.engine.notify_begin_update();
        let start = Instant::now();

        let num_types = read_vu32(input)?;
        let mut type_names = BTreeSet::new();
        for _ in 0..num_types {
            type_names.insert(self.read_type_delta(input)?);
            self.engine.recycler_mut().swap();
        }

        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            types = ?type_names,
            "delta application complete"
        );

        self.engine.notify_end_update();
        self.engine.mark_clean();
        Ok(())
    }

    fn read_type_snapshot(
        &mut self,
        input: &mut BlobInput,
        filter: &FilterConfig,
    ) -> ShaleResult<String> {
        let schema = Schema::read_from(input)?;
        let num_shards = read_num_shards(input)?;
        let name = schema.name().to_string();

        if !filter.includes_type(&name) {
            type_state::discard_snapshot(input, &schema, num_shards)?;
            return Ok(name);
        }

        let data = match schema {
            Schema::Object(stored) => {
                let filtered = stored.filter(filter);
                TypeStateData::Object(ObjectTypeReadState::new(filtered, stored, num_shards))
            }
            Schema::List(s) => TypeStateData::List(ListTypeReadState::new(s, num_shards)),
            Schema::Set(s) => TypeStateData::Set(SetTypeReadState::new(s, num_shards)),
            Schema::Map(s) => TypeStateData::Map(MapTypeReadState::new(s, num_shards)),
        };
        let mut state = TypeReadState::new(data);
        state.read_snapshot(input, self.engine.recycler_mut())?;
        self.engine.add_type_state(Arc::new(state))?;
        Ok(name)
    }

    fn read_type_delta(&mut self, input: &mut BlobInput) -> ShaleResult<String> {
        let schema = Schema::read_from(input)?;
        let num_shards = read_num_shards(input)?;
        let name = schema.name().to_string();

        match self.engine.type_state(&name) {
            Some(state) => {
                state.apply_delta(input, &schema, num_shards, self.engine.recycler_mut())?;
            }
            None => {
                type_state::discard_delta(input, num_shards)?;
            }
        }
        Ok(name)
    }
}
