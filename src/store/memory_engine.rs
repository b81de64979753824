//! In-memory engine backing ephemeral stores.

use crate::changes::{Change, ChangeSet};
use crate::error::StorageError;
use crate::store::engine::StorageEngine;
use crate::store::schema::SchemaRef;
use crate::types::{Entity, EntityId};
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Default)]
struct MemoryState {
    schema: Option<SchemaRef>,
    entities: BTreeMap<EntityId, Entity>,
}

/// Map-backed engine. A commit swaps all entries under one write lock, so
/// readers never see half a change set.
#[derive(Default)]
pub struct MemoryEngine {
    state: RwLock<MemoryState>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.read().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StorageEngine for MemoryEngine {
    fn schema_stamp(&self) -> Result<Option<SchemaRef>, StorageError> {
        Ok(self.state.read().schema.clone())
    }

    fn stamp_schema(&self, schema: &SchemaRef) -> Result<(), StorageError> {
        self.state.write().schema = Some(schema.clone());
        Ok(())
    }

    fn load(&self, id: &EntityId) -> Result<Option<Entity>, StorageError> {
        Ok(self.state.read().entities.get(id).cloned())
    }

    fn contains(&self, id: &EntityId) -> Result<bool, StorageError> {
        Ok(self.state.read().entities.contains_key(id))
    }

    fn scan_kind(&self, kind: &str) -> Result<Vec<Entity>, StorageError> {
        Ok(self
            .state
            .read()
            .entities
            .values()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect())
    }

    fn commit(&self, changes: &ChangeSet) -> Result<(), StorageError> {
        let mut state = self.state.write();
        for (id, change) in changes.iter() {
            match change {
                Change::Insert(e) | Change::Update(e) => {
                    state.entities.insert(*id, e.clone());
                }
                Change::Delete => {
                    state.entities.remove(id);
                }
            }
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
