//! Core identifier and record types shared across the stack.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Globally unique entity identifier (ULID, millisecond-ordered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Ulid);

impl EntityId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Storage key used by engines.
    pub fn key(&self) -> String {
        self.0.to_string()
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

macro_rules! sequential_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u64);

        impl $name {
            pub(crate) fn next() -> Self {
                use std::sync::atomic::{AtomicU64, Ordering};
                static NEXT: AtomicU64 = AtomicU64::new(1);
                Self(NEXT.fetch_add(1, Ordering::Relaxed))
            }

            pub fn as_u64(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

sequential_id!(
    /// Process-unique coordinator identifier.
    CoordinatorId,
    "coord"
);
sequential_id!(
    /// Process-unique context identifier (arena key).
    ContextId,
    "ctx"
);
sequential_id!(
    /// Process-unique execution domain identifier.
    DomainId,
    "domain"
);

/// A stored object: a kind name, scalar attributes, and relations to other
/// entities by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub kind: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub relations: BTreeMap<String, Vec<EntityId>>,
}

impl Entity {
    /// Create an empty entity of the given kind with a fresh id.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(),
            kind: kind.into(),
            attributes: BTreeMap::new(),
            relations: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_relation(mut self, name: impl Into<String>, target: EntityId) -> Self {
        self.relations.entry(name.into()).or_default().push(target);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.attributes.get(name)
    }

    /// Every entity id this entity points at, across all relations.
    pub fn referenced_ids(&self) -> impl Iterator<Item = &EntityId> {
        self.relations.values().flatten()
    }
}
