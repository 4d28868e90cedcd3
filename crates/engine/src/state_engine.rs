//! The read state engine: registry of type states and engine lifecycle.
//!
//! Constructed empty, populated by a snapshot load, optionally touched by
//! delta application, and superseded wholesale when a consumer
//! re-snapshots. The engine is single-writer: one update driver mutates it
//! while readers hold a handle to a completed generation.
//!
//! The `dirty` marker brackets the mutation window: the blob reader sets
//! it before the first engine mutation of a delta and clears it after a
//! successful walk. A failure in between leaves the engine poisoned — the
//! update driver refuses further deltas until a fresh snapshot succeeds.

use crate::pk_index::PrimaryKeyIndex;
use crate::type_state::TypeReadState;
use rustc_hash::FxHashMap;
use shale_core::{ShaleError, ShaleResult};
use shale_memory::SegmentRecycler;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Registry of typed read states plus engine-wide identity and lifecycle.
pub struct ReadStateEngine {
    states: Vec<Arc<TypeReadState>>,
    index: FxHashMap<String, usize>,
    recycler: SegmentRecycler,
    randomized_tag: u64,
    header_tags: BTreeMap<String, String>,
    pk_indexes: FxHashMap<String, PrimaryKeyIndex>,
    dirty: bool,
}

impl ReadStateEngine {
    /// An empty engine with default segment sizes.
    pub fn new() -> Self {
        ReadStateEngine::with_recycler(SegmentRecycler::default())
    }

    /// An empty engine over a specific segment recycler.
    pub fn with_recycler(recycler: SegmentRecycler) -> Self {
        ReadStateEngine {
            states: Vec::new(),
            index: FxHashMap::default(),
            recycler,
            randomized_tag: 0,
            header_tags: BTreeMap::new(),
            pk_indexes: FxHashMap::default(),
            dirty: false,
        }
    }

    /// Register a populated type state.
    ///
    /// Schema names are unique within a blob, so a duplicate registration
    /// is a framing defect of the stream being walked.
    pub fn add_type_state(&mut self, state: Arc<TypeReadState>) -> ShaleResult<()> {
        let name = state.name().to_string();
        if self.index.contains_key(&name) {
            return Err(ShaleError::malformed(format!(
                "duplicate schema name `{name}`"
            )));
        }
        self.index.insert(name, self.states.len());
        self.states.push(state);
        Ok(())
    }

    /// The type state registered under `name`, if any.
    pub fn type_state(&self, name: &str) -> Option<Arc<TypeReadState>> {
        self.index.get(name).map(|&i| Arc::clone(&self.states[i]))
    }

    /// All registered type states, in registration (blob) order.
    pub fn type_states(&self) -> &[Arc<TypeReadState>] {
        &self.states
    }

    /// Resolve cross-type references so accessors can follow a reference
    /// field, list element, or map key/value by pointer.
    pub fn wire_type_states_to_schemas(&self) {
        for state in &self.states {
            for referenced in state.schema().referenced_types() {
                if let Some(&target_index) = self.index.get(referenced) {
                    state.wire_reference(referenced, Arc::downgrade(&self.states[target_index]));
                }
            }
        }
    }

    /// One-time hook after the first snapshot: build primary-key indexes
    /// for object types that declare one.
    pub fn after_initialization(&mut self) -> ShaleResult<()> {
        for state in &self.states {
            let Some(object) = state.as_object() else {
                continue;
            };
            if let Some(index) = PrimaryKeyIndex::build(object)? {
                debug!(
                    type_name = state.name(),
                    keys = index.len(),
                    "primary key index built"
                );
                self.pk_indexes.insert(state.name().to_string(), index);
            }
        }
        Ok(())
    }

    /// The primary-key index for `type_name`, if one was built.
    pub fn pk_index(&self, type_name: &str) -> Option<&PrimaryKeyIndex> {
        self.pk_indexes.get(type_name)
    }

    /// Broadcast `begin_update` to every type state's listeners.
    pub fn notify_begin_update(&self) {
        for state in &self.states {
            state.notify_begin_update();
        }
    }

    /// Broadcast `end_update` to every type state's listeners.
    pub fn notify_end_update(&self) {
        for state in &self.states {
            state.notify_end_update();
        }
    }

    /// The engine's current randomized tag.
    pub fn randomized_tag(&self) -> u64 {
        self.randomized_tag
    }

    /// Replace the randomized tag (header ingestion).
    pub fn set_randomized_tag(&mut self, tag: u64) {
        self.randomized_tag = tag;
    }

    /// Header tags of the most recently ingested blob.
    pub fn header_tags(&self) -> &BTreeMap<String, String> {
        &self.header_tags
    }

    /// Replace the header tags (header ingestion).
    pub fn set_header_tags(&mut self, tags: BTreeMap<String, String>) {
        self.header_tags = tags;
    }

    /// The segment recycler shared by this engine's populators.
    pub(crate) fn recycler_mut(&mut self) -> &mut SegmentRecycler {
        &mut self.recycler
    }

    /// Mark the start of an in-place mutation window.
    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Mark the mutation window successfully closed.
    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Whether a mutation window was opened and never closed: the engine
    /// may hold partially applied state.
    pub fn is_poisoned(&self) -> bool {
        self.dirty
    }
}

impl Default for ReadStateEngine {
    fn default() -> Self {
        ReadStateEngine::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::type_state::{ListTypeReadState, TypeStateData};
    use shale_core::ListSchema;

    fn list_state(name: &str, element_type: &str) -> Arc<TypeReadState> {
        Arc::new(TypeReadState::new(TypeStateData::List(
            ListTypeReadState::new(ListSchema::new(name, element_type), 1),
        )))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut engine = ReadStateEngine::new();
        engine.add_type_state(list_state("ListOfMovie", "Movie")).unwrap();

        assert!(engine.type_state("ListOfMovie").is_some());
        assert!(engine.type_state("Movie").is_none());
        assert_eq!(engine.type_states().len(), 1);
    }

    #[test]
    fn test_duplicate_name_is_malformed() {
        let mut engine = ReadStateEngine::new();
        engine.add_type_state(list_state("L", "Movie")).unwrap();
        let err = engine.add_type_state(list_state("L", "Movie")).unwrap_err();
        assert!(matches!(err, ShaleError::MalformedBlob { .. }));
    }

    #[test]
    fn test_wiring_resolves_references() {
        let mut engine = ReadStateEngine::new();
        engine.add_type_state(list_state("ListOfMovie", "Movie")).unwrap();
        engine.add_type_state(list_state("Movie", "Unused")).unwrap();
        engine.wire_type_states_to_schemas();

        let list = engine.type_state("ListOfMovie").unwrap();
        let resolved = list.referenced_state("Movie").unwrap();
        assert_eq!(resolved.name(), "Movie");
        // "Unused" has no registered state and so stays unresolved.
        let movie = engine.type_state("Movie").unwrap();
        assert!(movie.referenced_state("Unused").is_none());
    }

    #[test]
    fn test_dirty_marker() {
        let mut engine = ReadStateEngine::new();
        assert!(!engine.is_poisoned());
        engine.mark_dirty();
        assert!(engine.is_poisoned());
        engine.mark_clean();
        assert!(!engine.is_poisoned());
    }

    #[test]
    fn test_tag_replacement() {
        let mut engine = ReadStateEngine::new();
        assert_eq!(engine.randomized_tag(), 0);
        engine.set_randomized_tag(0xAB);
        assert_eq!(engine.randomized_tag(), 0xAB);
    }
}
