//! Primary-key indexes.
//!
//! Object schemas may declare a primary key: a list of field names whose
//! values uniquely identify a record. After the first snapshot the engine
//! builds one index per declaring type, mapping key values → ordinal.
//!
//! Float and double fields cannot key an index (no total equality), and
//! key paths must name top-level fields of the declaring type; a schema
//! whose declaration violates either rule gets no index and a warning.

use crate::type_state::ObjectTypeReadState;
use rustc_hash::FxHashMap;
use shale_core::{FieldType, ShaleResult};
use tracing::warn;

/// A hashable key-field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexValue {
    /// Int or Long field value.
    Int(i64),
    /// Boolean field value.
    Bool(bool),
    /// String field value.
    Str(String),
    /// Bytes field value.
    Bytes(Vec<u8>),
    /// Reference field value (ordinal in the referenced type).
    Ordinal(u32),
}

/// Key values → ordinal for one object type's declared primary key.
pub struct PrimaryKeyIndex {
    type_name: String,
    field_indices: Vec<usize>,
    by_key: FxHashMap<Vec<IndexValue>, u32>,
}

impl PrimaryKeyIndex {
    /// Build the index for a populated object state.
    ///
    /// Returns `None` when the schema declares no primary key or declares
    /// one this index cannot serve.
    pub(crate) fn build(state: &ObjectTypeReadState) -> ShaleResult<Option<PrimaryKeyIndex>> {
        let schema = state.schema();
        if schema.primary_key.is_empty() {
            return Ok(None);
        }
        let mut field_indices = Vec::with_capacity(schema.primary_key.len());
        for path in &schema.primary_key {
            let Some(index) = schema.field_index(path) else {
                warn!(
                    type_name = %schema.name,
                    path = %path,
                    "primary key path is not a top-level field; index skipped"
                );
                return Ok(None);
            };
            let field_type = schema.fields[index].field_type;
            if matches!(field_type, FieldType::Float | FieldType::Double) {
                warn!(
                    type_name = %schema.name,
                    path = %path,
                    "primary key field is floating-point; index skipped"
                );
                return Ok(None);
            }
            field_indices.push(index);
        }

        let mut by_key = FxHashMap::default();
        for ordinal in state.populated_ordinals() {
            let mut key = Vec::with_capacity(field_indices.len());
            let mut complete = true;
            for &field in &field_indices {
                match extract(state, ordinal, field)? {
                    Some(value) => key.push(value),
                    None => {
                        // A null key field cannot be indexed.
                        complete = false;
                        break;
                    }
                }
            }
            if complete {
                by_key.insert(key, ordinal);
            }
        }

        Ok(Some(PrimaryKeyIndex {
            type_name: schema.name.clone(),
            field_indices,
            by_key,
        }))
    }

    /// The indexed type's name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Filtered-schema indices of the key fields, in key order.
    pub fn key_fields(&self) -> &[usize] {
        &self.field_indices
    }

    /// The ordinal whose key fields equal `key`, if any.
    pub fn ordinal(&self, key: &[IndexValue]) -> Option<u32> {
        self.by_key.get(key).copied()
    }

    /// Number of indexed records.
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Whether no records are indexed.
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

fn extract(
    state: &ObjectTypeReadState,
    ordinal: u32,
    field: usize,
) -> ShaleResult<Option<IndexValue>> {
    let field_type = state.schema().fields[field].field_type;
    Ok(match field_type {
        FieldType::Int => state.read_int(ordinal, field)?.map(|v| IndexValue::Int(v.into())),
        FieldType::Long => state.read_long(ordinal, field)?.map(IndexValue::Int),
        FieldType::Boolean => state.read_boolean(ordinal, field)?.map(IndexValue::Bool),
        FieldType::String => state.read_string(ordinal, field)?.map(IndexValue::Str),
        FieldType::Bytes => state.read_bytes(ordinal, field)?.map(IndexValue::Bytes),
        FieldType::Reference => state.read_ordinal(ordinal, field)?.map(IndexValue::Ordinal),
        FieldType::Float | FieldType::Double => None,
    })
}
