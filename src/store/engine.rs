//! Storage engine boundary.
//!
//! Coordinators talk to storage only through this trait. The engine owns the
//! on-disk (or in-memory) format; the coordinator owns ordering, validation,
//! and schema policy.

use crate::changes::ChangeSet;
use crate::error::StorageError;
use crate::store::schema::SchemaRef;
use crate::types::{Entity, EntityId};

pub trait StorageEngine: Send + Sync {
    /// Schema stamp of the store, `None` for a freshly created store.
    fn schema_stamp(&self) -> Result<Option<SchemaRef>, StorageError>;

    fn stamp_schema(&self, schema: &SchemaRef) -> Result<(), StorageError>;

    fn load(&self, id: &EntityId) -> Result<Option<Entity>, StorageError>;

    fn contains(&self, id: &EntityId) -> Result<bool, StorageError> {
        Ok(self.load(id)?.is_some())
    }

    /// All entities of one kind.
    fn scan_kind(&self, kind: &str) -> Result<Vec<Entity>, StorageError>;

    /// Apply every change in `changes` as one atomic unit.
    fn commit(&self, changes: &ChangeSet) -> Result<(), StorageError>;

    fn flush(&self) -> Result<(), StorageError>;
}
