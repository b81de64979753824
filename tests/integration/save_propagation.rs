//! One save moves changes exactly one hop toward the store.

use crate::integration::test_utils::{ephemeral_stack, note, title_of};
use storestack::{Entity, SaveError};

#[test]
fn test_three_level_chain_needs_three_saves() {
    let stack = ephemeral_stack();
    let root = stack.interactive_context();
    let child = stack.new_interactive_child(root).unwrap();
    let grandchild = stack.new_interactive_child(&child).unwrap();
    let coordinator = stack.default_coordinator();

    let id = grandchild.insert(note("draft"));

    grandchild.save().unwrap();
    assert!(!grandchild.has_changes());
    assert!(child.has_changes());
    assert!(!root.has_changes());
    assert!(!coordinator.contains(&id).unwrap());

    child.save().unwrap();
    assert!(!child.has_changes());
    assert!(root.has_changes());
    assert!(!coordinator.contains(&id).unwrap());

    root.save().unwrap();
    assert!(!root.has_changes());
    assert!(coordinator.contains(&id).unwrap());
}

#[test]
fn test_failed_middle_hop_leaves_both_layers_intact() {
    let stack = ephemeral_stack();
    let root = stack.interactive_context();

    let existing = note("original");
    let id = root.insert(existing.clone());
    root.save().unwrap();

    let child = stack.new_interactive_child(root).unwrap();
    let grandchild = stack.new_interactive_child(&child).unwrap();

    grandchild.update(existing.with_attribute("title", "edited"));
    grandchild.save().unwrap();

    // The root deletes the entity the child is about to update.
    root.delete(id);

    let err = child.save().unwrap_err();
    assert!(matches!(err, SaveError::ValidationFailed(ref report) if report.len() == 1));

    let child_pending = child.pending_changes();
    assert_eq!(child_pending.len(), 1);
    assert!(child_pending.get(&id).is_some_and(|c| !c.is_delete()));

    let root_pending = root.pending_changes();
    assert_eq!(root_pending.len(), 1);
    assert!(root_pending.get(&id).is_some_and(|c| c.is_delete()));
}

#[test]
fn test_failed_root_save_keeps_pending_and_store() {
    let stack = ephemeral_stack();
    let root = stack.interactive_context();
    let coordinator = stack.default_coordinator();

    let good = root.insert(note("fine"));
    root.insert(note("broken").with_relation("folder", storestack::EntityId::new()));

    assert!(root.save().is_err());
    assert_eq!(root.pending_changes().len(), 2);
    assert!(!coordinator.contains(&good).unwrap());
    assert!(coordinator.last_commit().is_none());
}

#[test]
fn test_child_reads_own_saved_changes_before_parent_saves() {
    let stack = ephemeral_stack();
    let root = stack.interactive_context();
    let child = stack.new_interactive_child(root).unwrap();

    let id = child.insert(note("mine"));
    child.save().unwrap();

    let seen = child.object(&id).unwrap().unwrap();
    assert_eq!(title_of(&seen), Some("mine"));
    assert_eq!(child.fetch("Note").unwrap().len(), 1);
}

#[test]
fn test_child_delete_merges_into_parent() {
    let stack = ephemeral_stack();
    let root = stack.interactive_context();
    let id = root.insert(note("doomed"));
    root.save().unwrap();

    let child = stack.new_interactive_child(root).unwrap();
    child.delete(id);
    child.save().unwrap();

    assert!(root.object(&id).unwrap().is_none());
    assert!(stack.default_coordinator().contains(&id).unwrap());

    root.save().unwrap();
    assert!(!stack.default_coordinator().contains(&id).unwrap());
}

#[test]
fn test_relations_resolved_against_parent_view() {
    let stack = ephemeral_stack();
    let root = stack.interactive_context();
    let child = stack.new_interactive_child(root).unwrap();

    // Folder only exists in the parent's pending changes.
    let folder = Entity::new("Folder").with_attribute("name", "inbox");
    let folder_id = root.insert(folder);

    child.insert(note("filed").with_relation("folder", folder_id));
    child.save().unwrap();
    root.save().unwrap();

    let notes = root.fetch("Note").unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].relations.get("folder"), Some(&vec![folder_id]));
}

#[test]
fn test_root_commits_produce_increasing_receipts() {
    let stack = ephemeral_stack();
    let root = stack.interactive_context();
    let coordinator = stack.default_coordinator();

    root.insert(note("one"));
    root.save().unwrap();
    let first = coordinator.last_commit().unwrap();

    root.insert(note("two"));
    root.insert(note("three"));
    root.save().unwrap();
    let second = coordinator.last_commit().unwrap();

    assert!(second.sequence > first.sequence);
    assert_eq!(second.changes, 2);
    assert!(second.committed_at >= first.committed_at);
    assert_eq!(second.coordinator, coordinator.id());
}

#[test]
fn test_child_refresh_picks_up_newer_store_value() {
    let stack = ephemeral_stack();
    let root = stack.interactive_context();
    let child = stack.new_interactive_child(root).unwrap();

    let draft = note("v1");
    let id = child.insert(draft.clone());
    child.save().unwrap();
    root.save().unwrap();

    let sibling = stack.new_interactive_context().unwrap();
    sibling.update(draft.with_attribute("title", "v2"));
    sibling.save().unwrap();

    // Materialized copy stays until refreshed.
    assert_eq!(title_of(&child.object(&id).unwrap().unwrap()), Some("v1"));

    child.refresh(&id);
    assert_eq!(title_of(&child.object(&id).unwrap().unwrap()), Some("v2"));

    let latest = child.object(&id).unwrap().unwrap();
    sibling.update(latest.with_attribute("title", "v3"));
    sibling.save().unwrap();

    child.refresh_all();
    assert_eq!(title_of(&child.object(&id).unwrap().unwrap()), Some("v3"));
    let fetched = child.fetch("Note").unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(title_of(&fetched[0]), Some("v3"));
}

#[test]
fn test_parent_rollback_hides_pushed_changes_after_refresh() {
    let stack = ephemeral_stack();
    let root = stack.interactive_context();
    let child = stack.new_interactive_child(root).unwrap();

    let draft = note("discarded");
    let id = child.insert(draft.clone());
    child.save().unwrap();

    root.rollback();
    child.refresh_all();

    assert!(child.object(&id).unwrap().is_none());
    assert!(child.fetch("Note").unwrap().is_empty());

    // Re-inserting is valid again; the parent never kept the first one.
    child.insert(draft);
    child.save().unwrap();
    root.save().unwrap();
    assert!(stack.default_coordinator().contains(&id).unwrap());
}

#[test]
fn test_grandchild_keeps_pushed_changes_until_root_saves() {
    let stack = ephemeral_stack();
    let root = stack.interactive_context();
    let child = stack.new_interactive_child(root).unwrap();
    let grandchild = stack.new_interactive_child(&child).unwrap();

    let id = grandchild.insert(note("deep"));
    grandchild.save().unwrap();
    child.save().unwrap();

    // Only the root holds it now, unsaved.
    grandchild.refresh_all();
    assert_eq!(title_of(&grandchild.object(&id).unwrap().unwrap()), Some("deep"));

    root.rollback();
    grandchild.refresh_all();
    assert!(grandchild.object(&id).unwrap().is_none());
}
