//! Coordinator
//!
//! A coordinator owns the engine handle for one store and is the single point
//! of truth for what data exists. Every commit, and every structural
//! operation (open, schema migration), is serialized: commits through the
//! coordinator's own commit lock, opens and migrations through the
//! process-wide registry lock.
//!
//! Durable stores are opened at most once per process. A second `open` of the
//! same location returns the live coordinator. Callers that want an isolated
//! commit path over the same store ask for one explicitly with
//! [`Coordinator::open_independent`].

use crate::changes::ChangeSet;
use crate::error::{OpenError, SaveError, StorageError, ValidationReport};
use crate::store::{
    MemoryEngine, Schema, SchemaRef, SledEngine, StorageEngine, StoreDescriptor, StoreKind,
    StoreOptions,
};
use crate::types::{CoordinatorId, Entity, EntityId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};
use tracing::{debug, info, warn};

/// Result of one successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    pub coordinator: CoordinatorId,
    /// Per-coordinator commit sequence, starting at 1.
    pub sequence: u64,
    pub changes: usize,
    pub committed_at: DateTime<Utc>,
}

#[derive(Default)]
struct CommitLog {
    sequence: u64,
    last: Option<CommitReceipt>,
}

struct CoordinatorInner {
    id: CoordinatorId,
    descriptor: StoreDescriptor,
    schema: SchemaRef,
    engine: Arc<dyn StorageEngine>,
    commits: Mutex<CommitLog>,
}

impl Drop for CoordinatorInner {
    fn drop(&mut self) {
        if let Err(e) = self.engine.flush() {
            warn!(coordinator = %self.id, error = %e, "Failed to flush store on release");
        }
        debug!(coordinator = %self.id, "Coordinator released");
    }
}

/// Shared handle to a coordinator. Cloning shares the same coordinator.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

type Registry = Mutex<HashMap<PathBuf, Weak<CoordinatorInner>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

impl Coordinator {
    /// Open the store described by `descriptor` with `schema`.
    ///
    /// Durable: creates the store when none exists, migrates when the stored
    /// schema differs and `auto_migrate` is set, fails with `SchemaMismatch`
    /// otherwise. Ephemeral: always a fresh, empty store.
    ///
    /// A durable store already open in this process is shared, provided the
    /// schema and the readonly option match the open coordinator's.
    pub fn open(descriptor: StoreDescriptor, schema: &Schema) -> Result<Self, OpenError> {
        let mut registry = registry().lock();
        registry.retain(|_, weak| weak.strong_count() > 0);

        match descriptor.kind() {
            StoreKind::Ephemeral => {
                let engine: Arc<dyn StorageEngine> = Arc::new(MemoryEngine::new());
                let schema_ref = prepare_schema(engine.as_ref(), schema, &descriptor)?;
                let coordinator = Self::from_parts(descriptor, schema_ref, engine);
                info!(coordinator = %coordinator.id(), "Opened ephemeral store");
                Ok(coordinator)
            }
            StoreKind::Durable => {
                let location = descriptor
                    .location()
                    .ok_or(OpenError::MissingLocation)?
                    .to_path_buf();
                let key = prepare_location(&location, descriptor.options())?;

                if let Some(inner) = registry.get(&key).and_then(Weak::upgrade) {
                    let open_readonly = inner.descriptor.options().readonly;
                    if open_readonly != descriptor.options().readonly {
                        return Err(OpenError::AccessConflict {
                            location: key,
                            open_readonly,
                        });
                    }
                    if &inner.schema != schema.reference() {
                        return Err(OpenError::SchemaMismatch {
                            found: inner.schema.clone(),
                            expected: schema.reference().clone(),
                        });
                    }
                    debug!(coordinator = %inner.id, location = %key.display(), "Reusing open coordinator");
                    return Ok(Self { inner });
                }

                let engine: Arc<dyn StorageEngine> =
                    Arc::new(SledEngine::open(&location).map_err(|e| map_open_failure(&location, e))?);
                let schema_ref = prepare_schema(engine.as_ref(), schema, &descriptor)?;
                let coordinator = Self::from_parts(descriptor, schema_ref, engine);
                registry.insert(key.clone(), Arc::downgrade(&coordinator.inner));
                info!(
                    coordinator = %coordinator.id(),
                    location = %key.display(),
                    schema = %coordinator.schema(),
                    "Opened durable store"
                );
                Ok(coordinator)
            }
        }
    }

    /// Open a coordinator over a caller-supplied engine.
    ///
    /// The engine is not registered for reuse; schema policy still applies.
    pub fn with_engine(
        descriptor: StoreDescriptor,
        schema: &Schema,
        engine: Arc<dyn StorageEngine>,
    ) -> Result<Self, OpenError> {
        let _structural = registry().lock();
        let schema_ref = prepare_schema(engine.as_ref(), schema, &descriptor)?;
        Ok(Self::from_parts(descriptor, schema_ref, engine))
    }

    /// A distinct coordinator over the same store.
    ///
    /// It has its own identity and commit lock, so its commits do not queue
    /// behind this coordinator's. Both write into the same engine.
    ///
    /// Validation sees whatever the engine holds when a commit starts. Two
    /// commits racing through different coordinators are not checked against
    /// each other, so one may add a relation to an entity the other is
    /// deleting at the same moment. Commits that do not overlap in time are
    /// always checked against each other's results.
    pub fn open_independent(&self) -> Self {
        let coordinator = Self::from_parts(
            self.inner.descriptor.clone(),
            self.inner.schema.clone(),
            Arc::clone(&self.inner.engine),
        );
        info!(
            coordinator = %coordinator.id(),
            source = %self.id(),
            "Opened independent coordinator"
        );
        coordinator
    }

    fn from_parts(
        descriptor: StoreDescriptor,
        schema: SchemaRef,
        engine: Arc<dyn StorageEngine>,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                id: CoordinatorId::next(),
                descriptor,
                schema,
                engine,
                commits: Mutex::new(CommitLog::default()),
            }),
        }
    }

    pub fn id(&self) -> CoordinatorId {
        self.inner.id
    }

    pub fn descriptor(&self) -> &StoreDescriptor {
        &self.inner.descriptor
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.inner.schema
    }

    pub fn is_readonly(&self) -> bool {
        self.inner.descriptor.options().readonly
    }

    /// Same coordinator (not merely the same store).
    pub fn ptr_eq(&self, other: &Coordinator) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Both coordinators write into the same engine handle.
    pub fn shares_store_with(&self, other: &Coordinator) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.inner.engine) as *const (),
            Arc::as_ptr(&other.inner.engine) as *const (),
        )
    }

    pub fn load(&self, id: &EntityId) -> Result<Option<Entity>, StorageError> {
        self.inner.engine.load(id)
    }

    pub fn contains(&self, id: &EntityId) -> Result<bool, StorageError> {
        self.inner.engine.contains(id)
    }

    pub fn scan_kind(&self, kind: &str) -> Result<Vec<Entity>, StorageError> {
        self.inner.engine.scan_kind(kind)
    }

    /// Validate and commit `changes` as one atomic unit.
    ///
    /// `validate` runs under the commit lock against the engine, so no other
    /// commit on this coordinator can interleave between the check and the
    /// write.
    pub fn commit<F>(&self, changes: &ChangeSet, validate: F) -> Result<CommitReceipt, SaveError>
    where
        F: FnOnce(&dyn StorageEngine) -> Result<ValidationReport, StorageError>,
    {
        let mut log = self.inner.commits.lock();

        if self.is_readonly() {
            return Err(SaveError::StorageCommitFailed(StorageError::ReadOnly));
        }

        let report = validate(self.inner.engine.as_ref())?;
        if !report.is_empty() {
            return Err(SaveError::ValidationFailed(report));
        }

        self.inner.engine.commit(changes)?;

        log.sequence += 1;
        let receipt = CommitReceipt {
            coordinator: self.inner.id,
            sequence: log.sequence,
            changes: changes.len(),
            committed_at: Utc::now(),
        };
        log.last = Some(receipt.clone());
        debug!(
            coordinator = %self.inner.id,
            sequence = receipt.sequence,
            changes = receipt.changes,
            "Committed change set"
        );
        Ok(receipt)
    }

    pub fn last_commit(&self) -> Option<CommitReceipt> {
        self.inner.commits.lock().last.clone()
    }

    /// Flush all pending writes to the backing store
    pub fn flush(&self) -> Result<(), StorageError> {
        self.inner.engine.flush()
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("id", &self.inner.id)
            .field("descriptor", &self.inner.descriptor)
            .field("schema", &self.inner.schema)
            .finish()
    }
}

/// Validate the location and return the registry key for it.
fn prepare_location(location: &Path, options: StoreOptions) -> Result<PathBuf, OpenError> {
    if options.readonly && !location.exists() {
        return Err(OpenError::LocationUnwritable {
            location: location.to_path_buf(),
            reason: "no store exists and the store was opened read-only".to_string(),
        });
    }
    std::fs::create_dir_all(location).map_err(|e| OpenError::LocationUnwritable {
        location: location.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(location
        .canonicalize()
        .unwrap_or_else(|_| location.to_path_buf()))
}

fn map_open_failure(location: &Path, err: StorageError) -> OpenError {
    match err {
        StorageError::IoError(e) => OpenError::LocationUnwritable {
            location: location.to_path_buf(),
            reason: e.to_string(),
        },
        other => OpenError::CorruptStore(other.to_string()),
    }
}

/// Create, accept, or migrate the store's schema stamp.
fn prepare_schema(
    engine: &dyn StorageEngine,
    schema: &Schema,
    descriptor: &StoreDescriptor,
) -> Result<SchemaRef, OpenError> {
    let options = descriptor.options();
    let expected = schema.reference();
    match engine.schema_stamp()? {
        None => {
            if let (true, Some(location)) = (options.readonly, descriptor.location()) {
                return Err(OpenError::LocationUnwritable {
                    location: location.to_path_buf(),
                    reason: "store is empty and was opened read-only".to_string(),
                });
            }
            engine.stamp_schema(expected)?;
            debug!(schema = %expected, "Created store");
        }
        Some(found) if &found == expected => {}
        Some(found) => {
            if !options.auto_migrate {
                return Err(OpenError::SchemaMismatch {
                    found,
                    expected: expected.clone(),
                });
            }
            if options.readonly {
                return Err(OpenError::MigrationFailed {
                    from: found,
                    to: expected.clone(),
                    cause: "store is read-only".to_string(),
                });
            }
            schema
                .migrator()
                .migrate(&found, expected, engine)
                .map_err(|cause| OpenError::MigrationFailed {
                    from: found.clone(),
                    to: expected.clone(),
                    cause,
                })?;
            engine
                .stamp_schema(expected)
                .map_err(|e| OpenError::MigrationFailed {
                    from: found.clone(),
                    to: expected.clone(),
                    cause: e.to_string(),
                })?;
            info!(from = %found, to = %expected, "Migrated store schema");
        }
    }
    Ok(expected.clone())
}
