//! Save-time validation of a change set against the view it will land in.

use crate::changes::{Change, ChangeSet};
use crate::error::{StorageError, ValidationReport};
use crate::types::EntityId;

/// Check `changes` against a target view described by `exists`.
///
/// Rules: inserts must be new, updates and deletes must hit existing
/// entities, kinds must be non-empty, and every relation target must either
/// be written by `changes` or exist in the view. A relation may not point at
/// an entity `changes` deletes.
pub(crate) fn validate<F>(changes: &ChangeSet, mut exists: F) -> Result<ValidationReport, StorageError>
where
    F: FnMut(&EntityId) -> Result<bool, StorageError>,
{
    let mut report = ValidationReport::default();

    for (id, change) in changes.iter() {
        match change {
            Change::Insert(entity) => {
                if exists(id)? {
                    report.push(*id, "inserted entity already exists");
                }
                if entity.kind.trim().is_empty() {
                    report.push(*id, "entity kind is empty");
                }
            }
            Change::Update(entity) => {
                if !exists(id)? {
                    report.push(*id, "updated entity does not exist");
                }
                if entity.kind.trim().is_empty() {
                    report.push(*id, "entity kind is empty");
                }
            }
            Change::Delete => {
                if !exists(id)? {
                    report.push(*id, "deleted entity does not exist");
                }
            }
        }

        let Some(entity) = change.entity() else {
            continue;
        };
        for target in entity.referenced_ids() {
            match changes.get(target) {
                Some(Change::Delete) => {
                    report.push(*id, format!("references {} which is being deleted", target));
                }
                Some(_) => {}
                None => {
                    if !exists(target)? {
                        report.push(*id, format!("references missing entity {}", target));
                    }
                }
            }
        }
    }

    Ok(report)
}
