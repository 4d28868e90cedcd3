//! Object schemas: named, ordered fields plus an optional primary key.

use super::FieldType;
use crate::encoding::{read_vstring, read_vu32, write_vstring, write_vu32};
use crate::error::{ShaleError, ShaleResult};
use crate::filter::FilterConfig;
use std::io::{Read, Write};

/// A single field of an object schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectField {
    /// Field name, unique within the schema.
    pub name: String,
    /// Field value type.
    pub field_type: FieldType,
    /// Referenced type name; present iff `field_type` is `Reference`.
    pub referenced_type: Option<String>,
    /// Position of this field in the stored (unfiltered) schema. Filtering
    /// keeps the stored position so the populator can address the field's
    /// bit slot and skip excluded var-width heaps.
    pub stored_position: usize,
}

impl ObjectField {
    /// A non-reference field.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        debug_assert!(field_type != FieldType::Reference);
        ObjectField {
            name: name.into(),
            field_type,
            referenced_type: None,
            stored_position: 0,
        }
    }

    /// A reference field pointing at `referenced_type`.
    pub fn reference(name: impl Into<String>, referenced_type: impl Into<String>) -> Self {
        ObjectField {
            name: name.into(),
            field_type: FieldType::Reference,
            referenced_type: Some(referenced_type.into()),
            stored_position: 0,
        }
    }
}

/// Schema of an object type: ordered fields and an optional primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSchema {
    /// Type name.
    pub name: String,
    /// Fields in declaration order. `stored_position` is the index each
    /// field had in the schema as read from the wire.
    pub fields: Vec<ObjectField>,
    /// Primary-key field names (empty = no primary key declared).
    pub primary_key: Vec<String>,
}

impl ObjectSchema {
    /// Build a schema, assigning stored positions by declaration order.
    pub fn new(name: impl Into<String>, mut fields: Vec<ObjectField>) -> Self {
        for (position, field) in fields.iter_mut().enumerate() {
            field.stored_position = position;
        }
        ObjectSchema {
            name: name.into(),
            fields,
            primary_key: Vec::new(),
        }
    }

    /// Attach a primary key declaration.
    pub fn with_primary_key(mut self, primary_key: Vec<String>) -> Self {
        self.primary_key = primary_key;
        self
    }

    /// Number of fields.
    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    /// Index of the named field, if present.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Derive the schema containing only the fields `filter` includes.
    ///
    /// Kept fields retain their stored positions, so a populator walking
    /// the wire in stored order knows which slots to retain and which
    /// var-width heaps to read and drop. The primary key survives only if
    /// every key field survives.
    pub fn filter(&self, filter: &FilterConfig) -> ObjectSchema {
        let fields: Vec<ObjectField> = self
            .fields
            .iter()
            .filter(|f| filter.includes_field(&self.name, &f.name))
            .cloned()
            .collect();
        let primary_key = if self
            .primary_key
            .iter()
            .all(|k| fields.iter().any(|f| &f.name == k))
        {
            self.primary_key.clone()
        } else {
            Vec::new()
        };
        ObjectSchema {
            name: self.name.clone(),
            fields,
            primary_key,
        }
    }

    /// Structural match: same name, same fields in the same stored order.
    pub fn matches(&self, other: &ObjectSchema) -> bool {
        self.name == other.name
            && self.fields.len() == other.fields.len()
            && self.fields.iter().zip(&other.fields).all(|(a, b)| {
                a.name == b.name
                    && a.field_type == b.field_type
                    && a.referenced_type == b.referenced_type
            })
    }

    pub(super) fn read_body(name: String, input: &mut impl Read) -> ShaleResult<ObjectSchema> {
        let field_count = read_vu32(input)? as usize;
        let mut fields = Vec::with_capacity(field_count);
        for position in 0..field_count {
            let field_name = read_vstring(input)?;
            let mut type_byte = [0u8; 1];
            match input.read_exact(&mut type_byte) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Err(ShaleError::malformed("object schema truncated"));
                }
                Err(e) => return Err(ShaleError::Io(e)),
            }
            let field_type = FieldType::from_wire(type_byte[0])?;
            let referenced_type = if field_type == FieldType::Reference {
                Some(read_vstring(input)?)
            } else {
                None
            };
            fields.push(ObjectField {
                name: field_name,
                field_type,
                referenced_type,
                stored_position: position,
            });
        }
        let pk_count = read_vu32(input)? as usize;
        let mut primary_key = Vec::with_capacity(pk_count);
        for _ in 0..pk_count {
            primary_key.push(read_vstring(input)?);
        }
        Ok(ObjectSchema {
            name,
            fields,
            primary_key,
        })
    }

    pub(super) fn write_body(&self, out: &mut impl Write) -> std::io::Result<()> {
        write_vu32(out, self.fields.len() as u32)?;
        for field in &self.fields {
            write_vstring(out, &field.name)?;
            out.write_all(&[field.field_type.to_wire()])?;
            if let Some(referenced) = &field.referenced_type {
                write_vstring(out, referenced)?;
            }
        }
        write_vu32(out, self.primary_key.len() as u32)?;
        for path in &self.primary_key {
            write_vstring(out, path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> ObjectSchema {
        ObjectSchema::new(
            "Movie",
            vec![
                ObjectField::new("id", FieldType::Int),
                ObjectField::new("title", FieldType::String),
                ObjectField::new("runtime", FieldType::Long),
            ],
        )
        .with_primary_key(vec!["id".to_string()])
    }

    #[test]
    fn test_stored_positions_follow_declaration_order() {
        let s = schema();
        let positions: Vec<usize> = s.fields.iter().map(|f| f.stored_position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[test]
    fn test_filter_preserves_stored_positions() {
        let mut filter = FilterConfig::include_all();
        filter.add_type_fields("Movie", &["id", "runtime"]);

        let filtered = schema().filter(&filter);
        assert_eq!(filtered.num_fields(), 2);
        assert_eq!(filtered.fields[0].name, "id");
        assert_eq!(filtered.fields[0].stored_position, 0);
        assert_eq!(filtered.fields[1].name, "runtime");
        assert_eq!(filtered.fields[1].stored_position, 2);
    }

    #[test]
    fn test_filter_drops_primary_key_when_key_field_excluded() {
        let mut filter = FilterConfig::include_all();
        filter.add_type_fields("Movie", &["title"]);

        let filtered = schema().filter(&filter);
        assert!(filtered.primary_key.is_empty());
    }

    #[test]
    fn test_filter_keeps_primary_key_when_key_field_included() {
        let filtered = schema().filter(&FilterConfig::include_all());
        assert_eq!(filtered.primary_key, vec!["id".to_string()]);
    }

    #[test]
    fn test_matches_ignores_primary_key_and_positions() {
        let a = schema();
        let mut b = schema();
        b.primary_key.clear();
        assert!(a.matches(&b));

        let mut c = schema();
        c.fields[1].field_type = FieldType::Bytes;
        assert!(!a.matches(&c));
    }
}
