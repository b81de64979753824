//! Storestack: Confined Persistence Contexts
//!
//! A persistence stack manager. A [`Stack`] opens one store through a
//! [`Coordinator`] and hands out [`Context`]s, each pinned to a single
//! execution domain. Contexts nest: saving a child merges its changes into
//! the parent, saving a root commits them to the store.

pub mod changes;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod logging;
pub mod stack;
pub mod store;
pub mod types;

pub use changes::{Change, ChangeSet};
pub use config::{ConfigLoader, StackConfig};
pub use context::{Context, ContextGraph, ParentRef};
pub use coordinator::{CommitReceipt, Coordinator};
pub use domain::{Confinement, Domain, DomainKind};
pub use error::{
    ConfigError, InvalidTopology, OpenError, SaveError, StorageError, ValidationIssue,
    ValidationReport,
};
pub use stack::{Stack, StackConfigError, TeardownError, TeardownPolicy};
pub use store::{Schema, SchemaRef, StoreDescriptor, StoreKind, StoreOptions};
pub use types::{ContextId, CoordinatorId, DomainId, Entity, EntityId};
