//! Error types for the persistence stack.

use crate::store::schema::SchemaRef;
use crate::types::{ContextId, EntityId};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Storage-engine errors. Always wrapped by the caller, never swallowed.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Stored data is corrupt: {0}")]
    Corrupt(String),

    #[error("Failed to encode record: {0}")]
    Encoding(String),

    #[error("Store is read-only")]
    ReadOnly,

    #[error("Coordinator has been released")]
    Closed,

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        match err {
            sled::Error::Corruption { .. } => StorageError::Corrupt(err.to_string()),
            sled::Error::Io(io) => StorageError::IoError(io),
            other => StorageError::Backend(other.to_string()),
        }
    }
}

/// Failure to open a coordinator. Fatal to the `open` call.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("Durable store requires a location")]
    MissingLocation,

    #[error("Store location {location:?} is not writable: {reason}")]
    LocationUnwritable { location: PathBuf, reason: String },

    #[error("Store {location:?} is already open with readonly = {open_readonly}")]
    AccessConflict { location: PathBuf, open_readonly: bool },

    #[error("Schema mismatch: store has {found}, expected {expected}")]
    SchemaMismatch { found: SchemaRef, expected: SchemaRef },

    #[error("Store is corrupt: {0}")]
    CorruptStore(String),

    #[error("Migration from {from} to {to} failed: {cause}")]
    MigrationFailed {
        from: SchemaRef,
        to: SchemaRef,
        cause: String,
    },
}

impl From<StorageError> for OpenError {
    fn from(err: StorageError) -> Self {
        OpenError::CorruptStore(err.to_string())
    }
}

/// Rejected context-graph construction. No context is mutated when returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidTopology {
    #[error("Invalid topology: {context} is an ancestor of proposed parent {parent}")]
    Cycle { context: ContextId, parent: ContextId },

    #[error("Invalid topology: {context} already has a parent and cannot be re-parented")]
    AlreadyParented { context: ContextId },

    #[error("Invalid topology: {parent} belongs to a different context graph")]
    ForeignGraph { parent: ContextId },

    #[error("Invalid topology: context graph has been closed")]
    GraphClosed,
}

/// One failed validation rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub entity: EntityId,
    pub message: String,
}

/// All validation failures found for one save.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn push(&mut self, entity: EntityId, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            entity,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msgs: Vec<String> = self
            .issues
            .iter()
            .map(|i| format!("{}: {}", i.entity, i.message))
            .collect();
        write!(f, "{}", msgs.join("; "))
    }
}

/// Save failures. Recoverable: the context stays usable for a retry.
#[derive(Debug, Error)]
pub enum SaveError {
    #[error("Validation failed: {0}")]
    ValidationFailed(ValidationReport),

    #[error("Storage commit failed: {0}")]
    StorageCommitFailed(#[from] StorageError),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Invalid(String),

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Failed to read schema file {path:?}: {reason}")]
    SchemaFile { path: PathBuf, reason: String },
}
