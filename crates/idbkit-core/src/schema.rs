//! Store schema descriptors and upgrade planning
//!
//! A [`StoreSchema`] names a store and maps version numbers to the fields
//! introduced at that version. The JSON form matches what the JavaScript
//! bindings accept:
//!
//! ```json
//! {"name": "users", "fields": {"1": {"email": {"index": true, "unique": true}}}}
//! ```
//!
//! The nested map is flattened into [`FieldDefinition`]s sorted descending by
//! version, which is the order the upgrade pass walks.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{DatabaseError, Result};

/// Flags attached to a field at a given version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOptions {
    /// Reject duplicate values in the field's index
    #[serde(default)]
    pub unique: bool,
    /// Create a secondary index over the field
    #[serde(default)]
    pub index: bool,
}

impl FieldOptions {
    /// A declared field with no index.
    pub fn plain() -> Self {
        Self::default()
    }

    /// A non-unique indexed field.
    pub fn indexed() -> Self {
        Self {
            unique: false,
            index: true,
        }
    }

    /// An indexed field whose values must be unique.
    pub fn unique_index() -> Self {
        Self {
            unique: true,
            index: true,
        }
    }
}

/// One `(version, field, flags)` entry of a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDefinition {
    pub version: u32,
    pub name: String,
    pub unique: bool,
    pub index: bool,
}

/// Declarative description of one store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoreSchema {
    pub name: String,
    #[serde(default)]
    pub fields: BTreeMap<u32, BTreeMap<String, FieldOptions>>,
}

impl StoreSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Declare `field` at `version`.
    pub fn field(mut self, version: u32, field: impl Into<String>, options: FieldOptions) -> Self {
        self.fields
            .entry(version)
            .or_default()
            .insert(field.into(), options);
        self
    }

    /// Register a version with no fields (bumps the target version only).
    pub fn version(mut self, version: u32) -> Self {
        self.fields.entry(version).or_default();
        self
    }

    /// Highest version declared by this schema.
    pub fn latest_version(&self) -> Option<u32> {
        self.fields.keys().next_back().copied()
    }

    /// All field definitions, highest version first.
    ///
    /// Within a version, fields are ordered by name.
    pub fn field_definitions(&self) -> Vec<FieldDefinition> {
        self.fields
            .iter()
            .rev()
            .flat_map(|(version, fields)| {
                fields.iter().map(move |(name, options)| FieldDefinition {
                    version: *version,
                    name: name.clone(),
                    unique: options.unique,
                    index: options.index,
                })
            })
            .collect()
    }

    /// Definitions the upgrade pass applies when moving from `old_version`.
    ///
    /// Only versions strictly above `old_version` are considered. A field
    /// redefined at several of those versions keeps only its highest-version
    /// definition.
    pub fn upgrade_plan(&self, old_version: u32) -> Vec<FieldDefinition> {
        let mut seen = HashSet::new();
        self.field_definitions()
            .into_iter()
            .filter(|def| def.version > old_version)
            .filter(|def| seen.insert(def.name.clone()))
            .collect()
    }

    fn validate(&self) -> Result<u32> {
        if self.name.is_empty() {
            return Err(DatabaseError::InvalidSchema(
                "store name must not be empty".into(),
            ));
        }
        if self.fields.contains_key(&0) {
            return Err(DatabaseError::InvalidSchema(format!(
                "store '{}' declares version 0; versions start at 1",
                self.name
            )));
        }
        self.latest_version().ok_or_else(|| {
            DatabaseError::InvalidSchema(format!(
                "store '{}' declares no field versions",
                self.name
            ))
        })
    }
}

/// The version a database must be opened at: the highest version declared
/// by any schema.
pub fn target_version(schemas: &[StoreSchema]) -> Result<u32> {
    let mut max = None;
    for schema in schemas {
        let latest = schema.validate()?;
        max = Some(max.map_or(latest, |m: u32| m.max(latest)));
    }
    max.ok_or_else(|| DatabaseError::InvalidSchema("no store schemas declared".into()))
}
