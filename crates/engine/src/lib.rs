//! Read-state engine for Shale
//!
//! This crate walks snapshot and delta blobs and materializes them as typed
//! read states over memory-mapped segmented arrays:
//! - Header: blob framing constants and the header reader
//! - Type states: per-kind populators (object, list, set, map), sharding,
//!   and discard paths for filtered-out types
//! - State engine: the registry of type states, schema wiring, primary-key
//!   indexes, and lifecycle notifications
//! - Blob reader: the top-level snapshot/delta walker
//!
//! The `testing` module carries an in-tree blob builder used by this
//! crate's tests and by downstream consumers' tests.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod blob_reader;
pub mod header;
pub mod ordinal;
pub mod pk_index;
pub mod state_engine;
pub mod testing;
pub mod type_state;

pub use blob_reader::BlobReader;
pub use header::{read_header, BlobHeader, BLOB_FORMAT_VERSION, BLOB_MAGIC};
pub use ordinal::OrdinalBitmap;
pub use pk_index::{IndexValue, PrimaryKeyIndex};
pub use state_engine::ReadStateEngine;
pub use type_state::{
    ListTypeReadState, MapTypeReadState, ObjectTypeReadState, SetTypeReadState, TypeReadState,
    TypeStateListener,
};
