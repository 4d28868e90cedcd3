//! Core types and wire primitives for Shale
//!
//! This crate defines the foundational pieces shared by every layer:
//! - Error: the `ShaleError` taxonomy and `ShaleResult` alias
//! - Encoding: varint/vstring codecs and fixed-width little-endian helpers
//! - Schema: typed descriptions of object, list, set, and map types
//! - Filter: declarative include/exclude of types and object fields

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod encoding;
pub mod error;
pub mod filter;
pub mod schema;

pub use error::{ShaleError, ShaleResult};
pub use filter::FilterConfig;
pub use schema::{
    FieldType, ListSchema, MapSchema, ObjectField, ObjectSchema, Schema, SchemaKind, SetSchema,
};
