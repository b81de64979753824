//! Stack
//!
//! The stack is the entry point: it opens the default coordinator, opens an
//! independent coordinator over the same store for imports, and builds three
//! long-lived contexts:
//!
//! - `interactive_context`: interactive domain, root over the default
//!   coordinator. Everything the UI reads and edits goes here.
//! - `export_context`: background worker, root over the default coordinator.
//!   Shares the coordinator with the interactive context, so saves from either
//!   are visible to the other without reopening the store.
//! - `import_context`: background worker, root over the import coordinator.
//!   Bulk writes commit through their own lock and never queue behind
//!   interactive saves; they still land in the same store.
//!
//! Ad-hoc contexts come from the factory methods. Nested contexts cost an
//! extra merge hop per save, so prefer root contexts unless you need a
//! discardable scratch layer.

use crate::config::StackConfig;
use crate::context::{Context, ContextGraph};
use crate::coordinator::Coordinator;
use crate::domain::{Confinement, Domain};
use crate::error::{ConfigError, InvalidTopology, OpenError, SaveError};
use crate::store::{Schema, StoreDescriptor, StoreKind, StoreOptions};
use crate::types::ContextId;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// What happens to unsaved changes at teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownPolicy {
    /// Drop every pending change.
    Discard,
    /// Save every live context, deepest first. Stop at the first failure.
    FlushOrFail,
}

/// Flush failure during `FlushOrFail` teardown. The stack is handed back
/// intact so the caller can fix data and retry or discard.
#[derive(Error)]
#[error("Failed to flush context {context} during teardown: {source}")]
pub struct TeardownError {
    pub context: ContextId,
    #[source]
    pub source: SaveError,
    pub stack: Stack,
}

impl fmt::Debug for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeardownError")
            .field("context", &self.context)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl TeardownError {
    pub fn into_stack(self) -> Stack {
        self.stack
    }
}

/// Failure to build a stack from configuration.
#[derive(Debug, Error)]
pub enum StackConfigError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Open(#[from] OpenError),
}

pub struct Stack {
    graph: Arc<ContextGraph>,
    default_coordinator: Coordinator,
    import_coordinator: Coordinator,
    interactive_context: Context,
    export_context: Context,
    import_context: Context,
}

impl Stack {
    /// Open the store and build all three long-lived contexts.
    ///
    /// The calling thread becomes the stack's interactive domain.
    pub fn initialize(descriptor: StoreDescriptor, schema: Schema) -> Result<Self, OpenError> {
        let default_coordinator = Coordinator::open(descriptor, &schema)?;
        let import_coordinator = default_coordinator.open_independent();
        let graph = ContextGraph::new();

        let interactive_context = root(&graph, &default_coordinator, Confinement::Interactive);
        let export_context = root(&graph, &default_coordinator, Confinement::Background);
        let import_context = root(&graph, &import_coordinator, Confinement::Background);

        info!(
            coordinator = %default_coordinator.id(),
            import_coordinator = %import_coordinator.id(),
            kind = ?default_coordinator.descriptor().kind(),
            schema = %default_coordinator.schema(),
            "Initialized stack"
        );

        Ok(Self {
            graph,
            default_coordinator,
            import_coordinator,
            interactive_context,
            export_context,
            import_context,
        })
    }

    /// `initialize` from loose parts. A location passed with `Ephemeral` is
    /// ignored.
    pub fn initialize_with(
        kind: StoreKind,
        location: Option<PathBuf>,
        schema: Schema,
        options: StoreOptions,
    ) -> Result<Self, OpenError> {
        Self::initialize(StoreDescriptor::new(kind, location, options)?, schema)
    }

    /// Auto-migrating durable store in the platform data directory, named
    /// after the schema.
    pub fn auto_migrating_durable(schema: Schema) -> Result<Self, OpenError> {
        let location = default_store_location(&schema.reference().name)?;
        Self::initialize(
            StoreDescriptor::durable(location, StoreOptions::auto_migrating()),
            schema,
        )
    }

    pub fn auto_migrating_ephemeral(schema: Schema) -> Result<Self, OpenError> {
        Self::initialize(StoreDescriptor::ephemeral(StoreOptions::auto_migrating()), schema)
    }

    /// Build a stack from loaded configuration.
    pub fn from_config(config: &StackConfig) -> Result<Self, StackConfigError> {
        let descriptor = config.store.descriptor()?;
        let schema = config.schema.resolve()?;
        Ok(Self::initialize(descriptor, schema)?)
    }

    pub fn interactive_context(&self) -> &Context {
        &self.interactive_context
    }

    pub fn export_context(&self) -> &Context {
        &self.export_context
    }

    pub fn import_context(&self) -> &Context {
        &self.import_context
    }

    pub fn default_coordinator(&self) -> &Coordinator {
        &self.default_coordinator
    }

    pub fn import_coordinator(&self) -> &Coordinator {
        &self.import_coordinator
    }

    pub fn graph(&self) -> &Arc<ContextGraph> {
        &self.graph
    }

    pub fn interactive_domain(&self) -> &Domain {
        self.graph.interactive_domain()
    }

    /// General factory: a child of `parent` when given, otherwise a root over
    /// `coordinator`.
    pub fn context_with(
        &self,
        parent: Option<&Context>,
        confinement: Confinement,
        coordinator: &Coordinator,
    ) -> Result<Context, InvalidTopology> {
        match parent {
            Some(parent) => self.graph.make_child_context(parent, confinement),
            None => self.graph.make_root_context(coordinator, confinement),
        }
    }

    /// Background root context over the default coordinator.
    ///
    /// This and [`Stack::new_interactive_context`] add roots beyond the
    /// interactive and export contexts that otherwise share the default
    /// coordinator. For a root that shares nothing, use
    /// [`Stack::new_import_context`] or one of the `_on` variants.
    pub fn new_background_context(&self) -> Result<Context, InvalidTopology> {
        self.graph
            .make_root_context(&self.default_coordinator, Confinement::Background)
    }

    /// Interactive root context over the default coordinator.
    pub fn new_interactive_context(&self) -> Result<Context, InvalidTopology> {
        self.graph
            .make_root_context(&self.default_coordinator, Confinement::Interactive)
    }

    /// Background root context over a fresh independent coordinator.
    pub fn new_import_context(&self) -> Result<Context, InvalidTopology> {
        let coordinator = self.default_coordinator.open_independent();
        self.graph
            .make_root_context(&coordinator, Confinement::Background)
    }

    pub fn new_background_context_on(&self, coordinator: &Coordinator) -> Result<Context, InvalidTopology> {
        self.graph.make_root_context(coordinator, Confinement::Background)
    }

    pub fn new_interactive_context_on(&self, coordinator: &Coordinator) -> Result<Context, InvalidTopology> {
        self.graph.make_root_context(coordinator, Confinement::Interactive)
    }

    /// Background context nested under `parent`. Make sure you need the
    /// extra hop.
    pub fn new_background_child(&self, parent: &Context) -> Result<Context, InvalidTopology> {
        self.graph.make_child_context(parent, Confinement::Background)
    }

    pub fn new_interactive_child(&self, parent: &Context) -> Result<Context, InvalidTopology> {
        self.graph.make_child_context(parent, Confinement::Interactive)
    }

    /// Dispose of pending changes per `policy`, then release both
    /// coordinators.
    ///
    /// Must run on the interactive domain. With `FlushOrFail`, a failed save
    /// returns the stack unchanged inside the error.
    #[track_caller]
    pub fn teardown(self, policy: TeardownPolicy) -> Result<(), TeardownError> {
        self.graph.interactive_domain().assert_current("Stack::teardown");

        match policy {
            TeardownPolicy::Discard => self.graph.discard_all(),
            TeardownPolicy::FlushOrFail => {
                if let Err((context, source)) = self.graph.flush_all() {
                    warn!(context = %context, error = %source, "Teardown flush failed");
                    return Err(TeardownError {
                        context,
                        source,
                        stack: self,
                    });
                }
            }
        }

        info!(policy = ?policy, "Tearing down stack");
        // Drop runs the rest.
        Ok(())
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        self.graph.close();
    }
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack")
            .field("default_coordinator", &self.default_coordinator)
            .field("import_coordinator", &self.import_coordinator.id())
            .field("graph", &self.graph)
            .finish()
    }
}

// A fresh graph is open and the coordinator is ours, so construction cannot
// fail here.
fn root(graph: &Arc<ContextGraph>, coordinator: &Coordinator, confinement: Confinement) -> Context {
    match graph.make_root_context(coordinator, confinement) {
        Ok(ctx) => ctx,
        Err(e) => unreachable!("fresh context graph rejected a root context: {e}"),
    }
}

fn default_store_location(name: &str) -> Result<PathBuf, OpenError> {
    let base = directories::BaseDirs::new().ok_or_else(|| OpenError::LocationUnwritable {
        location: PathBuf::from(name),
        reason: "no home directory to place the store in".to_string(),
    })?;
    Ok(base.data_dir().join("storestack").join(format!("{name}.store")))
}
