//! Schema boundary.
//!
//! The stack never looks inside a schema. It compares `SchemaRef`s for
//! compatibility and calls a `Migrator` hook when a stored version differs
//! from the requested one.

use crate::error::ConfigError;
use crate::store::engine::StorageEngine;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Opaque schema identifier: a model name plus a version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaRef {
    pub name: String,
    pub version: u32,
}

impl SchemaRef {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Same model name, any version.
    pub fn same_model(&self, other: &SchemaRef) -> bool {
        self.name == other.name
    }
}

impl fmt::Display for SchemaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.name, self.version)
    }
}

/// Migration hook invoked when an existing store carries a different schema.
pub trait Migrator: Send + Sync {
    /// Upgrade the store behind `engine` from `from` to `to` in place.
    /// The caller restamps the schema after this returns `Ok`.
    fn migrate(
        &self,
        from: &SchemaRef,
        to: &SchemaRef,
        engine: &dyn StorageEngine,
    ) -> Result<(), String>;
}

/// Accepts forward version bumps within one model name without touching
/// stored records.
#[derive(Debug, Clone, Copy, Default)]
pub struct LightweightMigration;

impl Migrator for LightweightMigration {
    fn migrate(
        &self,
        from: &SchemaRef,
        to: &SchemaRef,
        _engine: &dyn StorageEngine,
    ) -> Result<(), String> {
        if !from.same_model(to) {
            return Err(format!("no migration path from model '{}' to '{}'", from.name, to.name));
        }
        if from.version > to.version {
            return Err(format!(
                "cannot downgrade from version {} to {}",
                from.version, to.version
            ));
        }
        Ok(())
    }
}

/// A schema reference together with its migration hook.
#[derive(Clone)]
pub struct Schema {
    reference: SchemaRef,
    migrator: Arc<dyn Migrator>,
}

#[derive(Deserialize)]
struct SchemaFile {
    name: String,
    version: u32,
}

impl Schema {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            reference: SchemaRef::new(name, version),
            migrator: Arc::new(LightweightMigration),
        }
    }

    pub fn with_migrator(mut self, migrator: Arc<dyn Migrator>) -> Self {
        self.migrator = migrator;
        self
    }

    /// Resolve a schema descriptor file (`name` and `version` keys, TOML).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::SchemaFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let parsed: SchemaFile = toml::from_str(&raw).map_err(|e| ConfigError::SchemaFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if parsed.name.trim().is_empty() {
            return Err(ConfigError::SchemaFile {
                path: path.to_path_buf(),
                reason: "schema name cannot be empty".to_string(),
            });
        }
        Ok(Self::new(parsed.name, parsed.version))
    }

    pub fn reference(&self) -> &SchemaRef {
        &self.reference
    }

    pub fn migrator(&self) -> &dyn Migrator {
        self.migrator.as_ref()
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("reference", &self.reference)
            .finish_non_exhaustive()
    }
}
