//! Store layer
//!
//! Descriptors, the schema boundary, and the storage engines coordinators
//! drive. Engines are external collaborators: the rest of the crate only sees
//! the `StorageEngine` trait.

pub mod descriptor;
pub mod engine;
pub mod memory_engine;
pub mod schema;
pub mod sled_engine;

pub use descriptor::{StoreDescriptor, StoreKind, StoreOptions};
pub use engine::StorageEngine;
pub use memory_engine::MemoryEngine;
pub use schema::{LightweightMigration, Migrator, Schema, SchemaRef};
pub use sled_engine::SledEngine;
