//! Context graph
//!
//! Arena of context records. Each record names its parent through a tagged
//! union (`ParentRef`): a coordinator for root contexts, another context for
//! nested ones. The graph never stores pointers between records, and every
//! ancestor walk is an explicit loop over parent ids.
//!
//! The graph also owns the interactive domain shared by all of its
//! interactive contexts, and holds the coordinators its root contexts are
//! bound to. Closing the graph releases those coordinators.

use crate::changes::{Change, ChangeSet};
use crate::context::validation::validate;
use crate::context::{Context, ContextHandle};
use crate::coordinator::{CommitReceipt, Coordinator};
use crate::domain::{Confinement, Domain, DomainKind};
use crate::error::{InvalidTopology, SaveError, StorageError};
use crate::types::{ContextId, CoordinatorId, Entity, EntityId};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// What a context is bound to. Exactly one, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentRef {
    Coordinator(CoordinatorId),
    Context(ContextId),
}

/// Working state of one context.
#[derive(Debug, Default)]
pub(crate) struct ContextState {
    /// Changes not yet saved.
    pub pending: ChangeSet,
    /// Changes saved into a parent context that some ancestor still holds
    /// unsaved. Always empty for roots.
    pub pushed: ChangeSet,
    /// Objects materialized in this context.
    pub cache: HashMap<EntityId, Entity>,
}

impl ContextState {
    /// Overlay lookup: pending, then pushed, then cache. `Some(None)` means
    /// this context knows the entity is deleted.
    pub fn lookup(&self, id: &EntityId) -> Option<Option<Entity>> {
        if let Some(change) = self.pending.get(id) {
            return Some(change.entity().cloned());
        }
        if let Some(change) = self.pushed.get(id) {
            return Some(change.entity().cloned());
        }
        self.cache.get(id).map(|e| Some(e.clone()))
    }

    /// Drop pushed entries no ancestor still carries. Once the root saves
    /// them they are durable, and once an ancestor discards them they are
    /// gone; either way the store answers for them from then on.
    ///
    /// `ancestors` runs from the parent up to the root. Locks are taken one
    /// at a time in that order, after this context's own.
    pub fn settle_pushed(&mut self, ancestors: &[Arc<Mutex<ContextState>>]) {
        if self.pushed.is_empty() {
            return;
        }
        let settled: Vec<EntityId> = self
            .pushed
            .iter()
            .filter(|(id, change)| !held_by_ancestor(id, change, ancestors))
            .map(|(id, _)| *id)
            .collect();
        for id in &settled {
            self.pushed.remove(id);
        }
        if !settled.is_empty() {
            trace!(settled = settled.len(), "Settled pushed changes");
        }
    }

    fn view_contains(&self, id: &EntityId, coordinator: &Coordinator) -> Result<bool, StorageError> {
        match self.lookup(id) {
            Some(found) => Ok(found.is_some()),
            None => coordinator.contains(id),
        }
    }

    fn absorb_saved(&mut self, saved: &ChangeSet) {
        for (id, change) in saved.iter() {
            match change.entity() {
                Some(entity) => {
                    self.cache.insert(*id, entity.clone());
                }
                None => {
                    self.cache.remove(id);
                }
            }
        }
    }
}

/// A pushed change is still in flight while the nearest ancestor that has
/// the entity pending holds the same value, and every ancestor in between
/// pushed that same value along.
fn held_by_ancestor(id: &EntityId, change: &Change, ancestors: &[Arc<Mutex<ContextState>>]) -> bool {
    for ancestor in ancestors {
        let ancestor = ancestor.lock();
        if let Some(pending) = ancestor.pending.get(id) {
            return pending.entity() == change.entity();
        }
        match ancestor.pushed.get(id) {
            Some(pushed) if pushed.entity() == change.entity() => continue,
            _ => return false,
        }
    }
    false
}

struct ContextRecord {
    parent: ParentRef,
    confinement: Confinement,
    domain: Domain,
    state: Arc<Mutex<ContextState>>,
}

#[derive(Default)]
struct Arena {
    records: HashMap<ContextId, ContextRecord>,
    coordinators: HashMap<CoordinatorId, Coordinator>,
    closed: bool,
}

impl Arena {
    /// Walk from `start` to its root, yielding each context id on the way.
    fn chain(&self, start: ContextId) -> Vec<ContextId> {
        let mut out = Vec::new();
        let mut current = Some(start);
        while let Some(id) = current {
            out.push(id);
            current = match self.records.get(&id).map(|r| r.parent) {
                Some(ParentRef::Context(parent)) => Some(parent),
                _ => None,
            };
        }
        out
    }

    fn root_coordinator(&self, id: ContextId) -> Result<Coordinator, StorageError> {
        let mut current = id;
        loop {
            let record = self.records.get(&current).ok_or(StorageError::Closed)?;
            match record.parent {
                ParentRef::Coordinator(cid) => {
                    return self
                        .coordinators
                        .get(&cid)
                        .cloned()
                        .ok_or(StorageError::Closed)
                }
                ParentRef::Context(parent) => current = parent,
            }
        }
    }
}

/// Owner of context records for one stack (or one standalone graph).
pub struct ContextGraph {
    arena: RwLock<Arena>,
    interactive: Domain,
}

impl ContextGraph {
    /// Create a graph whose interactive domain is the calling thread.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            arena: RwLock::new(Arena::default()),
            interactive: Domain::interactive(),
        })
    }

    pub fn interactive_domain(&self) -> &Domain {
        &self.interactive
    }

    /// Create a context bound directly to `coordinator`.
    pub fn make_root_context(
        self: &Arc<Self>,
        coordinator: &Coordinator,
        confinement: Confinement,
    ) -> Result<Context, InvalidTopology> {
        let domain = self.domain_for(confinement);
        self.make_root_context_on(coordinator, &domain)
    }

    /// Create a root context pinned to an explicit domain.
    pub fn make_root_context_on(
        self: &Arc<Self>,
        coordinator: &Coordinator,
        domain: &Domain,
    ) -> Result<Context, InvalidTopology> {
        let id = ContextId::next();
        {
            let mut arena = self.arena.write();
            if arena.closed {
                return Err(InvalidTopology::GraphClosed);
            }
            arena
                .coordinators
                .entry(coordinator.id())
                .or_insert_with(|| coordinator.clone());
        }
        self.attach(id, ParentRef::Coordinator(coordinator.id()), domain, None)
    }

    /// Create a context nested under `parent`. Its saves merge into the
    /// parent's pending changes instead of reaching the store.
    pub fn make_child_context(
        self: &Arc<Self>,
        parent: &Context,
        confinement: Confinement,
    ) -> Result<Context, InvalidTopology> {
        let domain = self.domain_for(confinement);
        self.make_child_context_on(parent, &domain)
    }

    pub fn make_child_context_on(
        self: &Arc<Self>,
        parent: &Context,
        domain: &Domain,
    ) -> Result<Context, InvalidTopology> {
        if !Arc::ptr_eq(parent.graph(), self) {
            return Err(InvalidTopology::ForeignGraph {
                parent: parent.id(),
            });
        }
        let id = ContextId::next();
        self.attach(
            id,
            ParentRef::Context(parent.id()),
            domain,
            Some(parent.clone()),
        )
    }

    /// Re-parenting request. Always rejected; contexts keep the parent they
    /// were created with.
    pub fn set_parent(&self, context: &Context, parent: &Context) -> Result<(), InvalidTopology> {
        if !std::ptr::eq(parent.graph().as_ref(), self) || !std::ptr::eq(context.graph().as_ref(), self) {
            return Err(InvalidTopology::ForeignGraph {
                parent: parent.id(),
            });
        }
        let arena = self.arena.read();
        if arena.chain(parent.id()).contains(&context.id()) {
            return Err(InvalidTopology::Cycle {
                context: context.id(),
                parent: parent.id(),
            });
        }
        Err(InvalidTopology::AlreadyParented {
            context: context.id(),
        })
    }

    fn domain_for(&self, confinement: Confinement) -> Domain {
        match confinement {
            Confinement::Interactive => self.interactive.clone(),
            Confinement::Background => Domain::worker("storestack-bg"),
        }
    }

    fn attach(
        self: &Arc<Self>,
        id: ContextId,
        parent: ParentRef,
        domain: &Domain,
        parent_handle: Option<Context>,
    ) -> Result<Context, InvalidTopology> {
        let confinement = match domain.kind() {
            DomainKind::Interactive => Confinement::Interactive,
            DomainKind::Worker => Confinement::Background,
        };
        let state = Arc::new(Mutex::new(ContextState::default()));

        let mut arena = self.arena.write();
        if arena.closed {
            return Err(InvalidTopology::GraphClosed);
        }
        if let ParentRef::Context(parent_id) = parent {
            if arena.chain(parent_id).contains(&id) {
                return Err(InvalidTopology::Cycle {
                    context: id,
                    parent: parent_id,
                });
            }
        }
        arena.records.insert(
            id,
            ContextRecord {
                parent,
                confinement,
                domain: domain.clone(),
                state: Arc::clone(&state),
            },
        );
        drop(arena);

        debug!(context = %id, parent = ?parent, domain = %domain.id(), "Created context");
        Ok(Context::from_handle(ContextHandle {
            id,
            graph: Arc::clone(self),
            domain: domain.clone(),
            confinement,
            state,
            parent: parent_handle,
        }))
    }

    pub(crate) fn detach(&self, id: ContextId) {
        let removed = self.arena.write().records.remove(&id);
        if let Some(record) = removed {
            let pending = record.state.lock().pending.len();
            if pending > 0 {
                warn!(context = %id, pending, "Context released with unsaved changes");
            }
            trace!(context = %id, "Released context");
        }
    }

    pub fn parent_of(&self, id: ContextId) -> Option<ParentRef> {
        self.arena.read().records.get(&id).map(|r| r.parent)
    }

    /// Nesting depth: 0 for a root context.
    pub fn depth(&self, id: ContextId) -> usize {
        self.arena.read().chain(id).len().saturating_sub(1)
    }

    pub fn live_contexts(&self) -> usize {
        self.arena.read().records.len()
    }

    pub fn is_closed(&self) -> bool {
        self.arena.read().closed
    }

    pub(crate) fn coordinator_for(&self, id: ContextId) -> Result<Coordinator, StorageError> {
        self.arena.read().root_coordinator(id)
    }

    /// Save one context's pending changes one hop up.
    ///
    /// Callers are responsible for running this on the context's domain.
    pub(crate) fn save_record(&self, id: ContextId) -> Result<Option<CommitReceipt>, SaveError> {
        let (state, parent, ancestors, coordinator) = {
            let arena = self.arena.read();
            let record = arena.records.get(&id).ok_or(StorageError::Closed)?;
            let ancestors = arena
                .chain(id)
                .into_iter()
                .skip(1)
                .map(|aid| {
                    arena
                        .records
                        .get(&aid)
                        .map(|r| Arc::clone(&r.state))
                        .ok_or(StorageError::Closed)
                })
                .collect::<Result<Vec<_>, _>>()?;
            (
                Arc::clone(&record.state),
                record.parent,
                ancestors,
                arena.root_coordinator(id),
            )
        };

        let mut own = state.lock();
        own.settle_pushed(&ancestors);
        if own.pending.is_empty() {
            return Ok(None);
        }
        let coordinator = coordinator?;

        match (parent, ancestors.split_first()) {
            (ParentRef::Coordinator(_), _) => {
                let receipt = coordinator
                    .commit(&own.pending, |engine| validate(&own.pending, |eid| engine.contains(eid)))
                    .inspect_err(|e| log_save_failure(id, e))?;
                let saved = std::mem::take(&mut own.pending);
                own.absorb_saved(&saved);
                Ok(Some(receipt))
            }
            (ParentRef::Context(pid), Some((parent_state, above))) => {
                let mut parent = parent_state.lock();
                parent.settle_pushed(above);
                let report = validate(&own.pending, |eid| parent.view_contains(eid, &coordinator))?;
                if !report.is_empty() {
                    let err = SaveError::ValidationFailed(report);
                    log_save_failure(id, &err);
                    return Err(err);
                }
                let saved = std::mem::take(&mut own.pending);
                parent.pending.merge(saved.clone());
                drop(parent);

                own.absorb_saved(&saved);
                own.pushed.merge(saved);
                debug!(context = %id, parent = %pid, "Merged changes into parent context");
                Ok(None)
            }
            (ParentRef::Context(_), None) => Err(SaveError::StorageCommitFailed(StorageError::Closed)),
        }
    }

    /// Save every live context, deepest first, each on its own domain.
    pub(crate) fn flush_all(self: &Arc<Self>) -> Result<(), (ContextId, SaveError)> {
        for (id, domain) in self.deepest_first() {
            let graph = Arc::clone(self);
            domain
                .execute_and_wait(move || graph.save_record(id))
                .map_err(|e| (id, e))?;
        }
        Ok(())
    }

    /// Drop every pending change in every live context.
    pub(crate) fn discard_all(&self) {
        let states: Vec<(ContextId, Arc<Mutex<ContextState>>)> = self
            .arena
            .read()
            .records
            .iter()
            .map(|(id, r)| (*id, Arc::clone(&r.state)))
            .collect();
        for (id, state) in states {
            let mut state = state.lock();
            if !state.pending.is_empty() {
                debug!(context = %id, discarded = state.pending.len(), "Discarding pending changes");
                state.pending.clear();
            }
        }
    }

    /// Mark the graph closed and release its coordinators.
    pub(crate) fn close(&self) {
        let coordinators = {
            let mut arena = self.arena.write();
            if arena.closed {
                return;
            }
            arena.closed = true;
            std::mem::take(&mut arena.coordinators)
        };
        for coordinator in coordinators.values() {
            if let Err(e) = coordinator.flush() {
                warn!(coordinator = %coordinator.id(), error = %e, "Flush failed while closing graph");
            }
        }
        info!(coordinators = coordinators.len(), "Closed context graph");
    }

    fn deepest_first(&self) -> Vec<(ContextId, Domain)> {
        let arena = self.arena.read();
        let mut order: Vec<(usize, ContextId, Domain)> = arena
            .records
            .iter()
            .map(|(id, r)| (arena.chain(*id).len(), *id, r.domain.clone()))
            .collect();
        order.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        order.into_iter().map(|(_, id, d)| (id, d)).collect()
    }

    pub fn confinement_of(&self, id: ContextId) -> Option<Confinement> {
        self.arena.read().records.get(&id).map(|r| r.confinement)
    }
}

fn log_save_failure(id: ContextId, err: &SaveError) {
    warn!(context = %id, error = %err, "Save failed");
}

impl fmt::Debug for ContextGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arena = self.arena.read();
        f.debug_struct("ContextGraph")
            .field("contexts", &arena.records.len())
            .field("coordinators", &arena.coordinators.len())
            .field("closed", &arena.closed)
            .finish()
    }
}
