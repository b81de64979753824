//! Contexts
//!
//! A context is a confined working session: reads, writes, and saves all run
//! on the domain it is pinned to, and each operation checks that before doing
//! anything else. Running a context operation from the wrong domain panics.
//!
//! Reads resolve through the context's own pending changes, then the changes
//! it saved into a parent that are not yet durable (nested contexts only),
//! then objects it has materialized, then the store. A context never sees
//! another context's unsaved work, including its parent's. Once an ancestor
//! saves or discards what a child pushed, the child stops overlaying it.
//! Materialized objects stay as they were until [`Context::refresh`] or
//! [`Context::refresh_all`].

pub mod graph;
mod validation;

pub use graph::{ContextGraph, ParentRef};

use crate::changes::ChangeSet;
use crate::coordinator::Coordinator;
use crate::domain::{Confinement, Domain};
use crate::error::{SaveError, StorageError};
use crate::types::{ContextId, Entity, EntityId};
use graph::ContextState;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub(crate) struct ContextHandle {
    pub(crate) id: ContextId,
    pub(crate) graph: Arc<ContextGraph>,
    pub(crate) domain: Domain,
    pub(crate) confinement: Confinement,
    pub(crate) state: Arc<Mutex<ContextState>>,
    // Owning reference: a parent outlives every child.
    pub(crate) parent: Option<Context>,
}

impl Drop for ContextHandle {
    fn drop(&mut self) {
        self.graph.detach(self.id);
    }
}

/// Shared handle to a context. The context is released when the last handle
/// (including those held by its children) is dropped.
#[derive(Clone)]
pub struct Context {
    handle: Arc<ContextHandle>,
}

impl Context {
    pub(crate) fn from_handle(handle: ContextHandle) -> Self {
        Self {
            handle: Arc::new(handle),
        }
    }

    pub fn id(&self) -> ContextId {
        self.handle.id
    }

    pub fn confinement(&self) -> Confinement {
        self.handle.confinement
    }

    pub fn domain(&self) -> &Domain {
        &self.handle.domain
    }

    pub fn graph(&self) -> &Arc<ContextGraph> {
        &self.handle.graph
    }

    pub fn parent(&self) -> Option<&Context> {
        self.handle.parent.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.handle.parent.is_none()
    }

    /// Coordinator at the root of this context's chain.
    pub fn coordinator(&self) -> Result<Coordinator, StorageError> {
        self.handle.graph.coordinator_for(self.handle.id)
    }

    /// Same context (not merely an equal one).
    pub fn ptr_eq(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.handle, &other.handle)
    }

    #[track_caller]
    fn confined(&self, operation: &str) -> parking_lot::MutexGuard<'_, ContextState> {
        self.handle.domain.assert_current(operation);
        self.handle.state.lock()
    }

    /// Like `confined`, with pushed changes settled against the ancestors.
    #[track_caller]
    fn confined_settled(&self, operation: &str) -> parking_lot::MutexGuard<'_, ContextState> {
        let mut state = self.confined(operation);
        if !self.is_root() {
            state.settle_pushed(&self.ancestor_states());
        }
        state
    }

    fn ancestor_states(&self) -> Vec<Arc<Mutex<ContextState>>> {
        let mut states = Vec::new();
        let mut current = self.parent();
        while let Some(ancestor) = current {
            states.push(Arc::clone(&ancestor.handle.state));
            current = ancestor.parent();
        }
        states
    }

    /// Post `f` to this context's domain.
    pub fn perform<F>(&self, f: F)
    where
        F: FnOnce(&Context) + Send + 'static,
    {
        let ctx = self.clone();
        self.handle.domain.execute(move || f(&ctx));
    }

    /// Run `f` on this context's domain and wait for its result.
    pub fn perform_and_wait<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Context) -> R + Send + 'static,
        R: Send + 'static,
    {
        let ctx = self.clone();
        self.handle.domain.execute_and_wait(move || f(&ctx))
    }

    /// Stage a new entity. Returns its id.
    #[track_caller]
    pub fn insert(&self, entity: Entity) -> EntityId {
        let id = entity.id;
        self.confined("Context::insert").pending.record_insert(entity);
        id
    }

    /// Stage a replacement value for an existing entity.
    #[track_caller]
    pub fn update(&self, entity: Entity) {
        self.confined("Context::update").pending.record_update(entity);
    }

    #[track_caller]
    pub fn delete(&self, id: EntityId) {
        self.confined("Context::delete").pending.record_delete(id);
    }

    /// Look up one entity as this context sees it.
    #[track_caller]
    pub fn object(&self, id: &EntityId) -> Result<Option<Entity>, StorageError> {
        let mut state = self.confined_settled("Context::object");
        if let Some(found) = state.lookup(id) {
            return Ok(found);
        }
        let loaded = self.coordinator()?.load(id)?;
        if let Some(entity) = &loaded {
            state.cache.insert(*id, entity.clone());
        }
        Ok(loaded)
    }

    /// Every entity of `kind` visible to this context, ordered by id.
    #[track_caller]
    pub fn fetch(&self, kind: &str) -> Result<Vec<Entity>, StorageError> {
        let mut state = self.confined_settled("Context::fetch");
        let stored = self.coordinator()?.scan_kind(kind)?;

        let mut visible: BTreeMap<EntityId, Entity> = BTreeMap::new();
        for entity in stored {
            // materialized objects keep their in-context value
            let value = state
                .cache
                .entry(entity.id)
                .or_insert_with(|| entity.clone())
                .clone();
            visible.insert(entity.id, value);
        }
        for overlay in [&state.pushed, &state.pending] {
            overlay_changes(&mut visible, overlay, kind);
        }
        visible.retain(|_, e| e.kind == kind);
        Ok(visible.into_values().collect())
    }

    #[track_caller]
    pub fn has_changes(&self) -> bool {
        !self.confined("Context::has_changes").pending.is_empty()
    }

    /// Copy of the unsaved change set.
    #[track_caller]
    pub fn pending_changes(&self) -> ChangeSet {
        self.confined("Context::pending_changes").pending.clone()
    }

    /// Save pending changes one hop up: into the store for a root context,
    /// into the parent's pending changes for a nested one.
    ///
    /// On failure the pending changes are left exactly as they were.
    #[track_caller]
    pub fn save(&self) -> Result<(), SaveError> {
        self.handle.domain.assert_current("Context::save");
        self.handle.graph.save_record(self.handle.id).map(|_| ())
    }

    /// Discard every unsaved change.
    #[track_caller]
    pub fn rollback(&self) {
        self.confined("Context::rollback").pending.clear();
    }

    /// Forget the materialized copy of one entity so the next read refetches.
    /// Pushed changes an ancestor has since saved or discarded are dropped
    /// too.
    #[track_caller]
    pub fn refresh(&self, id: &EntityId) {
        self.confined_settled("Context::refresh").cache.remove(id);
    }

    #[track_caller]
    pub fn refresh_all(&self) {
        self.confined_settled("Context::refresh_all").cache.clear();
    }
}

fn overlay_changes(visible: &mut BTreeMap<EntityId, Entity>, changes: &ChangeSet, kind: &str) {
    for (id, change) in changes.iter() {
        match change.entity() {
            Some(entity) if entity.kind == kind => {
                visible.insert(*id, entity.clone());
            }
            // written under another kind, or deleted
            _ => {
                visible.remove(id);
            }
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.handle.id)
            .field("confinement", &self.handle.confinement)
            .field("domain", &self.handle.domain.id())
            .field("parent", &self.handle.parent.as_ref().map(Context::id))
            .finish()
    }
}
