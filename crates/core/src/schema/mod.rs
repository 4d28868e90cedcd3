//! Schema model
//!
//! A blob declares each type it carries with a schema record, serialized as
//! `[kind:u8][name:vstring][body]` where the body is kind-specific:
//!
//! ```text
//! kind 0 (object): field_count vu32
//!                  fields:     field_count × (name vstring, type u8,
//!                              referenced_type vstring — REFERENCE only)
//!                  pk_count    vu32 (0 = no primary key)
//!                  pk_paths    pk_count × vstring
//! kind 1 (list):   element_type vstring
//! kind 2 (set):    element_type vstring, hash_count vu32 + vstrings
//! kind 3 (map):    key_type vstring, value_type vstring,
//!                  hash_count vu32 + vstrings
//! ```
//!
//! Schema names are unique within a blob. A delta's schema must structurally
//! match the resident schema of the same name (`matches`), otherwise the
//! transition fails with `SchemaMismatch`.

mod collection;
mod object;

pub use collection::{ListSchema, MapSchema, SetSchema};
pub use object::{ObjectField, ObjectSchema};

use crate::encoding::{read_vstring, write_vstring};
use crate::error::{ShaleError, ShaleResult};
use std::io::{Read, Write};

/// Discriminant of a schema record on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaKind {
    /// Named fields with fixed- or variable-width values.
    Object,
    /// Ordered collection of element-type ordinals.
    List,
    /// Hashed collection of element-type ordinals.
    Set,
    /// Hashed key-type → value-type ordinal pairs.
    Map,
}

impl SchemaKind {
    /// Wire discriminant.
    pub fn to_wire(self) -> u8 {
        match self {
            SchemaKind::Object => 0,
            SchemaKind::List => 1,
            SchemaKind::Set => 2,
            SchemaKind::Map => 3,
        }
    }

    fn from_wire(value: u8) -> ShaleResult<Self> {
        match value {
            0 => Ok(SchemaKind::Object),
            1 => Ok(SchemaKind::List),
            2 => Ok(SchemaKind::Set),
            3 => Ok(SchemaKind::Map),
            other => Err(ShaleError::malformed(format!(
                "unknown schema kind {other}"
            ))),
        }
    }
}

/// Type of a single object field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Ordinal of a record in another (or the same) type.
    Reference,
    /// 32-bit signed integer, ZigZag bit-packed.
    Int,
    /// 64-bit signed integer, ZigZag bit-packed.
    Long,
    /// Two-bit packed boolean.
    Boolean,
    /// 32-bit IEEE-754, raw bits.
    Float,
    /// 64-bit IEEE-754, raw bits.
    Double,
    /// UTF-8 bytes in the per-field varbyte heap.
    String,
    /// Raw bytes in the per-field varbyte heap.
    Bytes,
}

impl FieldType {
    /// Wire discriminant.
    pub fn to_wire(self) -> u8 {
        match self {
            FieldType::Reference => 0,
            FieldType::Int => 1,
            FieldType::Long => 2,
            FieldType::Boolean => 3,
            FieldType::Float => 4,
            FieldType::Double => 5,
            FieldType::String => 6,
            FieldType::Bytes => 7,
        }
    }

    /// Decode a wire discriminant.
    pub fn from_wire(value: u8) -> ShaleResult<Self> {
        match value {
            0 => Ok(FieldType::Reference),
            1 => Ok(FieldType::Int),
            2 => Ok(FieldType::Long),
            3 => Ok(FieldType::Boolean),
            4 => Ok(FieldType::Float),
            5 => Ok(FieldType::Double),
            6 => Ok(FieldType::String),
            7 => Ok(FieldType::Bytes),
            other => Err(ShaleError::malformed(format!("unknown field type {other}"))),
        }
    }

    /// Whether values of this type live in a varbyte heap rather than the
    /// bit-packed fixed stream.
    pub fn is_var_width(self) -> bool {
        matches!(self, FieldType::String | FieldType::Bytes)
    }
}

/// A parsed schema record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schema {
    /// Object type.
    Object(ObjectSchema),
    /// List type.
    List(ListSchema),
    /// Set type.
    Set(SetSchema),
    /// Map type.
    Map(MapSchema),
}

impl Schema {
    /// The type name this schema declares.
    pub fn name(&self) -> &str {
        match self {
            Schema::Object(s) => &s.name,
            Schema::List(s) => &s.name,
            Schema::Set(s) => &s.name,
            Schema::Map(s) => &s.name,
        }
    }

    /// The schema kind.
    pub fn kind(&self) -> SchemaKind {
        match self {
            Schema::Object(_) => SchemaKind::Object,
            Schema::List(_) => SchemaKind::List,
            Schema::Set(_) => SchemaKind::Set,
            Schema::Map(_) => SchemaKind::Map,
        }
    }

    /// Names of other types this schema references, in declaration order.
    pub fn referenced_types(&self) -> Vec<&str> {
        match self {
            Schema::Object(s) => s
                .fields
                .iter()
                .filter_map(|f| f.referenced_type.as_deref())
                .collect(),
            Schema::List(s) => vec![&s.element_type],
            Schema::Set(s) => vec![&s.element_type],
            Schema::Map(s) => vec![&s.key_type, &s.value_type],
        }
    }

    /// Parse a schema record from the stream.
    pub fn read_from(input: &mut impl Read) -> ShaleResult<Schema> {
        let mut kind_byte = [0u8; 1];
        match input.read_exact(&mut kind_byte) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(ShaleError::malformed("schema record truncated"));
            }
            Err(e) => return Err(ShaleError::Io(e)),
        }
        let kind = SchemaKind::from_wire(kind_byte[0])?;
        let name = read_vstring(input)?;
        match kind {
            SchemaKind::Object => Ok(Schema::Object(ObjectSchema::read_body(name, input)?)),
            SchemaKind::List => Ok(Schema::List(ListSchema::read_body(name, input)?)),
            SchemaKind::Set => Ok(Schema::Set(SetSchema::read_body(name, input)?)),
            SchemaKind::Map => Ok(Schema::Map(MapSchema::read_body(name, input)?)),
        }
    }

    /// Serialize this schema record.
    pub fn write_to(&self, out: &mut impl Write) -> std::io::Result<()> {
        out.write_all(&[self.kind().to_wire()])?;
        write_vstring(out, self.name())?;
        match self {
            Schema::Object(s) => s.write_body(out),
            Schema::List(s) => s.write_body(out),
            Schema::Set(s) => s.write_body(out),
            Schema::Map(s) => s.write_body(out),
        }
    }

    /// Structural equality, ignoring filter-derived stored positions.
    ///
    /// Used to validate that a delta's schema matches the resident schema
    /// for the same type name.
    pub fn matches(&self, other: &Schema) -> bool {
        match (self, other) {
            (Schema::Object(a), Schema::Object(b)) => a.matches(b),
            (Schema::List(a), Schema::List(b)) => a == b,
            (Schema::Set(a), Schema::Set(b)) => a == b,
            (Schema::Map(a), Schema::Map(b)) => a == b,
            _ => false,
        }
    }

    /// The object schema, if this is an object type.
    pub fn as_object(&self) -> Option<&ObjectSchema> {
        match self {
            Schema::Object(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn movie_schema() -> ObjectSchema {
        ObjectSchema::new(
            "Movie",
            vec![
                ObjectField::new("id", FieldType::Int),
                ObjectField::new("title", FieldType::String),
                ObjectField::reference("country", "Country"),
            ],
        )
        .with_primary_key(vec!["id".to_string()])
    }

    fn roundtrip(schema: Schema) -> Schema {
        let mut buf = Vec::new();
        schema.write_to(&mut buf).unwrap();
        Schema::read_from(&mut Cursor::new(buf)).unwrap()
    }

    #[test]
    fn test_object_schema_roundtrip() {
        let schema = Schema::Object(movie_schema());
        assert_eq!(roundtrip(schema.clone()), schema);
    }

    #[test]
    fn test_list_schema_roundtrip() {
        let schema = Schema::List(ListSchema::new("ListOfMovie", "Movie"));
        assert_eq!(roundtrip(schema.clone()), schema);
    }

    #[test]
    fn test_set_schema_roundtrip() {
        let schema = Schema::Set(SetSchema::new(
            "SetOfMovie",
            "Movie",
            vec!["id".to_string()],
        ));
        assert_eq!(roundtrip(schema.clone()), schema);
    }

    #[test]
    fn test_map_schema_roundtrip() {
        let schema = Schema::Map(MapSchema::new(
            "MapOfMovie",
            "String",
            "Movie",
            Vec::new(),
        ));
        assert_eq!(roundtrip(schema.clone()), schema);
    }

    #[test]
    fn test_unknown_kind_is_malformed() {
        let err = Schema::read_from(&mut Cursor::new(vec![9u8])).unwrap_err();
        assert!(matches!(err, ShaleError::MalformedBlob { .. }));
    }

    #[test]
    fn test_referenced_types() {
        let schema = Schema::Object(movie_schema());
        assert_eq!(schema.referenced_types(), vec!["Country"]);

        let map = Schema::Map(MapSchema::new("M", "K", "V", Vec::new()));
        assert_eq!(map.referenced_types(), vec!["K", "V"]);
    }

    #[test]
    fn test_matches_rejects_cross_kind() {
        let object = Schema::Object(movie_schema());
        let list = Schema::List(ListSchema::new("Movie", "Movie"));
        assert!(!object.matches(&list));
    }
}
