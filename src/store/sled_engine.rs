//! Sled-backed engine for durable stores.

use crate::changes::{Change, ChangeSet};
use crate::error::StorageError;
use crate::store::engine::StorageEngine;
use crate::store::schema::SchemaRef;
use crate::types::{Entity, EntityId};
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionResult};
use sled::{Db, Transactional, Tree};
use std::path::Path;

const TREE_ENTITIES: &str = "entities";
const TREE_KINDS: &str = "kind_index";
const TREE_META: &str = "meta";
const META_SCHEMA: &[u8] = b"schema";

/// Sled implementation of `StorageEngine`.
///
/// Entities are stored as JSON keyed by their id. A secondary `kind_index`
/// tree maps `{kind}\0{id}` to the entity key so kind scans avoid a full
/// table walk. Commits run as one multi-tree transaction.
pub struct SledEngine {
    db: Db,
    entities: Tree,
    kinds: Tree,
    meta: Tree,
}

impl SledEngine {
    /// Open (or create) a sled database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let entities = db.open_tree(TREE_ENTITIES)?;
        let kinds = db.open_tree(TREE_KINDS)?;
        let meta = db.open_tree(TREE_META)?;
        Ok(Self {
            db,
            entities,
            kinds,
            meta,
        })
    }

    /// Get the underlying sled database (for advanced operations)
    pub fn db(&self) -> &Db {
        &self.db
    }
}

impl StorageEngine for SledEngine {
    fn schema_stamp(&self) -> Result<Option<SchemaRef>, StorageError> {
        let Some(raw) = self.meta.get(META_SCHEMA)? else {
            return Ok(None);
        };
        let parsed = serde_json::from_slice(&raw)
            .map_err(|e| StorageError::Corrupt(format!("unreadable schema stamp: {}", e)))?;
        Ok(Some(parsed))
    }

    fn stamp_schema(&self, schema: &SchemaRef) -> Result<(), StorageError> {
        let value = serde_json::to_vec(schema).map_err(to_storage_encoding)?;
        self.meta.insert(META_SCHEMA, value)?;
        Ok(())
    }

    fn load(&self, id: &EntityId) -> Result<Option<Entity>, StorageError> {
        match self.entities.get(id.key().as_bytes())? {
            Some(raw) => Ok(Some(decode_entity(&raw)?)),
            None => Ok(None),
        }
    }

    fn contains(&self, id: &EntityId) -> Result<bool, StorageError> {
        Ok(self.entities.contains_key(id.key().as_bytes())?)
    }

    fn scan_kind(&self, kind: &str) -> Result<Vec<Entity>, StorageError> {
        let prefix = index_prefix(kind);
        let mut out = Vec::new();
        for item in self.kinds.scan_prefix(prefix.as_bytes()) {
            let (_, entity_key) = item?;
            match self.entities.get(&entity_key)? {
                Some(raw) => out.push(decode_entity(&raw)?),
                None => {
                    return Err(StorageError::Corrupt(format!(
                        "kind index for '{}' points at a missing entity",
                        kind
                    )))
                }
            }
        }
        Ok(out)
    }

    fn commit(&self, changes: &ChangeSet) -> Result<(), StorageError> {
        let result: TransactionResult<(), StorageError> =
            (&self.entities, &self.kinds).transaction(|(entities, kinds)| {
                for (id, change) in changes.iter() {
                    let key = id.key();
                    if let Some(previous) = entities.get(key.as_bytes())? {
                        let previous =
                            decode_entity(&previous).map_err(ConflictableTransactionError::Abort)?;
                        kinds.remove(index_key(&previous.kind, id).as_bytes())?;
                    }
                    match change {
                        Change::Insert(entity) | Change::Update(entity) => {
                            let value = serde_json::to_vec(entity)
                                .map_err(|e| ConflictableTransactionError::Abort(to_storage_encoding(e)))?;
                            entities.insert(key.as_bytes(), value)?;
                            kinds.insert(index_key(&entity.kind, id).as_bytes(), key.as_bytes())?;
                        }
                        Change::Delete => {
                            entities.remove(key.as_bytes())?;
                        }
                    }
                }
                Ok(())
            });

        result.map_err(|e| match e {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => err.into(),
        })
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

fn index_prefix(kind: &str) -> String {
    format!("{kind}\0")
}

fn index_key(kind: &str, id: &EntityId) -> String {
    format!("{kind}\0{id}")
}

fn decode_entity(raw: &[u8]) -> Result<Entity, StorageError> {
    serde_json::from_slice(raw)
        .map_err(|e| StorageError::Corrupt(format!("Failed to deserialize entity: {}", e)))
}

fn to_storage_encoding(err: serde_json::Error) -> StorageError {
    StorageError::Encoding(err.to_string())
}
