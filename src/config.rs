//! Configuration System
//!
//! Layered configuration for opening a stack: which store, which schema, and
//! how to log. Sources and their precedence live in [`ConfigLoader`].

use crate::error::{ConfigError, OpenError};
use crate::logging::LoggingConfig;
use crate::store::{Schema, StoreDescriptor, StoreKind, StoreOptions};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub schema: SchemaConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[store]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_kind")]
    pub kind: StoreKind,

    /// Required for durable stores, ignored for ephemeral ones.
    #[serde(default)]
    pub location: Option<PathBuf>,

    #[serde(default)]
    pub auto_migrate: bool,

    #[serde(default)]
    pub readonly: bool,
}

fn default_store_kind() -> StoreKind {
    StoreKind::Ephemeral
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: default_store_kind(),
            location: None,
            auto_migrate: false,
            readonly: false,
        }
    }
}

impl StoreConfig {
    pub fn options(&self) -> StoreOptions {
        StoreOptions {
            auto_migrate: self.auto_migrate,
            readonly: self.readonly,
        }
    }

    pub fn descriptor(&self) -> Result<StoreDescriptor, OpenError> {
        StoreDescriptor::new(self.kind, self.location.clone(), self.options())
    }

    pub fn validate(&self) -> Result<(), String> {
        match (self.kind, &self.location) {
            (StoreKind::Durable, None) => Err("Durable store requires a location".to_string()),
            (StoreKind::Durable, Some(path)) if path.as_os_str().is_empty() => {
                Err("Store location cannot be empty".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// `[schema]` table. A `file` takes precedence over `name`/`version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default = "default_schema_name")]
    pub name: String,

    #[serde(default = "default_schema_version")]
    pub version: u32,

    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_schema_name() -> String {
    "default".to_string()
}

fn default_schema_version() -> u32 {
    1
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            name: default_schema_name(),
            version: default_schema_version(),
            file: None,
        }
    }
}

impl SchemaConfig {
    pub fn resolve(&self) -> Result<Schema, ConfigError> {
        match &self.file {
            Some(path) => Schema::from_file(path),
            None => Ok(Schema::new(self.name.clone(), self.version)),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.file.is_none() && self.name.trim().is_empty() {
            return Err("Schema name cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Store(String),
    Schema(String),
    Logging(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Store(msg) => write!(f, "Store: {}", msg),
            ValidationError::Schema(msg) => write!(f, "Schema: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl StackConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.store.validate() {
            errors.push(ValidationError::Store(e));
        }
        if let Err(e) = self.schema.validate() {
            errors.push(ValidationError::Schema(e));
        }
        if let Err(e) = self.logging.validate() {
            errors.push(ValidationError::Logging(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate, folding every problem into one error.
    pub fn validated(self) -> Result<Self, ConfigError> {
        self.validate().map_err(|errors| {
            let msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            ConfigError::Invalid(format!(
                "Configuration validation failed:\n{}",
                msgs.join("\n")
            ))
        })?;
        Ok(self)
    }
}
