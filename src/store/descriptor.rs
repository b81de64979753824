//! Store descriptors: what to open and how.

use crate::error::OpenError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Store kind enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Disk-backed single-location store (sled).
    Durable,
    /// In-memory store, discarded with its coordinator.
    Ephemeral,
}

/// Options recognized when opening a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreOptions {
    /// Attempt an in-place schema upgrade when the stored version differs.
    #[serde(default)]
    pub auto_migrate: bool,

    /// Reject commits and migrations.
    #[serde(default)]
    pub readonly: bool,
}

impl StoreOptions {
    pub fn auto_migrating() -> Self {
        Self {
            auto_migrate: true,
            readonly: false,
        }
    }
}

/// Immutable description of one store.
///
/// Ephemeral descriptors never carry a location; durable descriptors always
/// do. Both invariants are enforced at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDescriptor {
    kind: StoreKind,
    location: Option<PathBuf>,
    options: StoreOptions,
}

impl StoreDescriptor {
    pub fn durable<P: AsRef<Path>>(location: P, options: StoreOptions) -> Self {
        Self {
            kind: StoreKind::Durable,
            location: Some(location.as_ref().to_path_buf()),
            options,
        }
    }

    pub fn ephemeral(options: StoreOptions) -> Self {
        Self {
            kind: StoreKind::Ephemeral,
            location: None,
            options,
        }
    }

    /// Build a descriptor from loose parts.
    ///
    /// A location given with `Ephemeral` is ignored.
    pub fn new(
        kind: StoreKind,
        location: Option<PathBuf>,
        options: StoreOptions,
    ) -> Result<Self, OpenError> {
        match kind {
            StoreKind::Durable => {
                let location = location.ok_or(OpenError::MissingLocation)?;
                Ok(Self::durable(location, options))
            }
            StoreKind::Ephemeral => {
                if let Some(ignored) = location {
                    debug!(location = %ignored.display(), "Ignoring location for ephemeral store");
                }
                Ok(Self::ephemeral(options))
            }
        }
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }
}
