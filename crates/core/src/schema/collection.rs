//! List, set, and map schemas.

use crate::encoding::{read_vstring, read_vu32, write_vstring, write_vu32};
use crate::error::ShaleResult;
use std::io::{Read, Write};

fn read_hash_key(input: &mut impl Read) -> ShaleResult<Vec<String>> {
    let count = read_vu32(input)? as usize;
    let mut paths = Vec::with_capacity(count);
    for _ in 0..count {
        paths.push(read_vstring(input)?);
    }
    Ok(paths)
}

fn write_hash_key(out: &mut impl Write, paths: &[String]) -> std::io::Result<()> {
    write_vu32(out, paths.len() as u32)?;
    for path in paths {
        write_vstring(out, path)?;
    }
    Ok(())
}

/// Schema of a list type: an ordered collection of element ordinals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSchema {
    /// Type name.
    pub name: String,
    /// Name of the element type.
    pub element_type: String,
}

impl ListSchema {
    /// Build a list schema.
    pub fn new(name: impl Into<String>, element_type: impl Into<String>) -> Self {
        ListSchema {
            name: name.into(),
            element_type: element_type.into(),
        }
    }

    pub(super) fn read_body(name: String, input: &mut impl Read) -> ShaleResult<ListSchema> {
        Ok(ListSchema {
            name,
            element_type: read_vstring(input)?,
        })
    }

    pub(super) fn write_body(&self, out: &mut impl Write) -> std::io::Result<()> {
        write_vstring(out, &self.element_type)
    }
}

/// Schema of a set type: a hashed collection of element ordinals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetSchema {
    /// Type name.
    pub name: String,
    /// Name of the element type.
    pub element_type: String,
    /// Field paths in the element type that define the hash key.
    pub hash_key: Vec<String>,
}

impl SetSchema {
    /// Build a set schema.
    pub fn new(
        name: impl Into<String>,
        element_type: impl Into<String>,
        hash_key: Vec<String>,
    ) -> Self {
        SetSchema {
            name: name.into(),
            element_type: element_type.into(),
            hash_key,
        }
    }

    pub(super) fn read_body(name: String, input: &mut impl Read) -> ShaleResult<SetSchema> {
        Ok(SetSchema {
            name,
            element_type: read_vstring(input)?,
            hash_key: read_hash_key(input)?,
        })
    }

    pub(super) fn write_body(&self, out: &mut impl Write) -> std::io::Result<()> {
        write_vstring(out, &self.element_type)?;
        write_hash_key(out, &self.hash_key)
    }
}

/// Schema of a map type: hashed key ordinals to value ordinals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapSchema {
    /// Type name.
    pub name: String,
    /// Name of the key type.
    pub key_type: String,
    /// Name of the value type.
    pub value_type: String,
    /// Field paths in the key type that define the hash key.
    pub hash_key: Vec<String>,
}

impl MapSchema {
    /// Build a map schema.
    pub fn new(
        name: impl Into<String>,
        key_type: impl Into<String>,
        value_type: impl Into<String>,
        hash_key: Vec<String>,
    ) -> Self {
        MapSchema {
            name: name.into(),
            key_type: key_type.into(),
            value_type: value_type.into(),
            hash_key,
        }
    }

    pub(super) fn read_body(name: String, input: &mut impl Read) -> ShaleResult<MapSchema> {
        Ok(MapSchema {
            name,
            key_type: read_vstring(input)?,
            value_type: read_vstring(input)?,
            hash_key: read_hash_key(input)?,
        })
    }

    pub(super) fn write_body(&self, out: &mut impl Write) -> std::io::Result<()> {
        write_vstring(out, &self.key_type)?;
        write_vstring(out, &self.value_type)?;
        write_hash_key(out, &self.hash_key)
    }
}
