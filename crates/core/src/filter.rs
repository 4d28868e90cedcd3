//! Filter configuration
//!
//! A filter declares which types — and for object types, which fields —
//! a snapshot load retains. Excluded data is parsed and discarded during
//! ingestion rather than held in memory, so a consumer interested in two
//! types out of two hundred pays for two.
//!
//! The configuration is declarative and serde-(de)serializable, so an
//! embedding can ship it as JSON alongside the rest of its config.
//!
//! Resolution rules:
//! - `include_all()` retains every type and field until told otherwise;
//!   `exclude_all()` retains nothing until types are added.
//! - An explicit per-type entry always wins over the default.
//! - A type added with a field list retains only those fields; a type added
//!   without one retains all fields.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

/// Per-type filter entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct TypeFilter {
    include: bool,
    /// `None` = all fields; `Some` = only the named fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fields: Option<FxHashSet<String>>,
}

/// Declarative include/exclude of types and object fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    default_include: bool,
    #[serde(default, skip_serializing_if = "FxHashMap::is_empty")]
    types: FxHashMap<String, TypeFilter>,
}

impl FilterConfig {
    /// A filter that retains every type and every field.
    pub fn include_all() -> Self {
        FilterConfig {
            default_include: true,
            types: FxHashMap::default(),
        }
    }

    /// A filter that retains nothing until types are added.
    pub fn exclude_all() -> Self {
        FilterConfig {
            default_include: false,
            types: FxHashMap::default(),
        }
    }

    /// Retain the named type with all of its fields.
    pub fn add_type(&mut self, type_name: impl Into<String>) -> &mut Self {
        self.types.insert(
            type_name.into(),
            TypeFilter {
                include: true,
                fields: None,
            },
        );
        self
    }

    /// Retain only the named fields of an object type.
    pub fn add_type_fields(&mut self, type_name: impl Into<String>, fields: &[&str]) -> &mut Self {
        self.types.insert(
            type_name.into(),
            TypeFilter {
                include: true,
                fields: Some(fields.iter().map(|f| f.to_string()).collect()),
            },
        );
        self
    }

    /// Exclude the named type entirely.
    pub fn exclude_type(&mut self, type_name: impl Into<String>) -> &mut Self {
        self.types.insert(
            type_name.into(),
            TypeFilter {
                include: false,
                fields: None,
            },
        );
        self
    }

    /// Whether the named type is retained.
    pub fn includes_type(&self, type_name: &str) -> bool {
        match self.types.get(type_name) {
            Some(entry) => entry.include,
            None => self.default_include,
        }
    }

    /// Whether the named field of an object type is retained.
    ///
    /// A field of an excluded type is never retained.
    pub fn includes_field(&self, type_name: &str, field_name: &str) -> bool {
        match self.types.get(type_name) {
            Some(entry) => {
                entry.include
                    && entry
                        .fields
                        .as_ref()
                        .map(|fields| fields.contains(field_name))
                        .unwrap_or(true)
            }
            None => self.default_include,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig::include_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_include_all_accepts_everything() {
        let filter = FilterConfig::include_all();
        assert!(filter.includes_type("Movie"));
        assert!(filter.includes_field("Movie", "title"));
    }

    #[test]
    fn test_exclude_all_rejects_until_added() {
        let mut filter = FilterConfig::exclude_all();
        assert!(!filter.includes_type("Movie"));

        filter.add_type("Movie");
        assert!(filter.includes_type("Movie"));
        assert!(filter.includes_field("Movie", "title"));
        assert!(!filter.includes_type("Junk"));
    }

    #[test]
    fn test_explicit_exclusion_wins_over_default() {
        let mut filter = FilterConfig::include_all();
        filter.exclude_type("Junk");
        assert!(!filter.includes_type("Junk"));
        assert!(!filter.includes_field("Junk", "anything"));
        assert!(filter.includes_type("Movie"));
    }

    #[test]
    fn test_field_list_restricts_fields() {
        let mut filter = FilterConfig::include_all();
        filter.add_type_fields("Movie", &["id"]);
        assert!(filter.includes_type("Movie"));
        assert!(filter.includes_field("Movie", "id"));
        assert!(!filter.includes_field("Movie", "title"));
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut filter = FilterConfig::exclude_all();
        filter.add_type_fields("Movie", &["id", "title"]);
        filter.exclude_type("Junk");

        let json = serde_json::to_string(&filter).unwrap();
        let back: FilterConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(filter, back);
    }
}
