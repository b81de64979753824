//! Pending change sets.
//!
//! A `ChangeSet` is the working set a context accumulates between saves.
//! Recording rules keep at most one entry per entity, so a change set can be
//! handed to a storage engine as a single batch or merged into a parent
//! context's own change set.

use crate::types::{Entity, EntityId};
use std::collections::BTreeMap;

/// One pending change for an entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Insert(Entity),
    Update(Entity),
    Delete,
}

impl Change {
    /// The entity value this change writes, if any.
    pub fn entity(&self) -> Option<&Entity> {
        match self {
            Change::Insert(e) | Change::Update(e) => Some(e),
            Change::Delete => None,
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Change::Delete)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: BTreeMap<EntityId, Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn get(&self, id: &EntityId) -> Option<&Change> {
        self.changes.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntityId, &Change)> {
        self.changes.iter()
    }

    /// Entities written (inserted or updated) by this change set.
    pub fn upserts(&self) -> impl Iterator<Item = &Entity> {
        self.changes.values().filter_map(Change::entity)
    }

    /// Ids deleted by this change set.
    pub fn deletions(&self) -> impl Iterator<Item = &EntityId> {
        self.changes
            .iter()
            .filter(|(_, c)| c.is_delete())
            .map(|(id, _)| id)
    }

    pub fn record_insert(&mut self, entity: Entity) {
        let id = entity.id;
        let next = match self.changes.remove(&id) {
            // delete followed by insert rewrites an existing row
            Some(Change::Delete) | Some(Change::Update(_)) => Change::Update(entity),
            Some(Change::Insert(_)) | None => Change::Insert(entity),
        };
        self.changes.insert(id, next);
    }

    pub fn record_update(&mut self, entity: Entity) {
        let id = entity.id;
        let next = match self.changes.remove(&id) {
            Some(Change::Insert(_)) => Change::Insert(entity),
            Some(Change::Update(_)) | Some(Change::Delete) | None => Change::Update(entity),
        };
        self.changes.insert(id, next);
    }

    pub fn record_delete(&mut self, id: EntityId) {
        match self.changes.remove(&id) {
            // never reached storage; nothing left to delete
            Some(Change::Insert(_)) => {}
            Some(Change::Update(_)) | Some(Change::Delete) | None => {
                self.changes.insert(id, Change::Delete);
            }
        }
    }

    pub fn record(&mut self, id: EntityId, change: Change) {
        match change {
            Change::Insert(e) => self.record_insert(e),
            Change::Update(e) => self.record_update(e),
            Change::Delete => self.record_delete(id),
        }
    }

    /// Fold another change set into this one, applying the recording rules
    /// entry by entry.
    pub fn merge(&mut self, other: ChangeSet) {
        for (id, change) in other.changes {
            self.record(id, change);
        }
    }

    pub fn remove(&mut self, id: &EntityId) -> Option<Change> {
        self.changes.remove(id)
    }

    pub fn clear(&mut self) {
        self.changes.clear();
    }
}

impl IntoIterator for ChangeSet {
    type Item = (EntityId, Change);
    type IntoIter = std::collections::btree_map::IntoIter<EntityId, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.into_iter()
    }
}
