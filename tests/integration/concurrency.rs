//! Saves from several domains at once.

use crate::integration::test_utils::{ephemeral_stack, note, title_of};
use std::sync::mpsc;
use storestack::{Entity, EntityId, SaveError};

#[test]
fn test_interactive_and_export_save_disjoint_entities_concurrently() {
    let stack = ephemeral_stack();
    let (tx, rx) = mpsc::channel();

    stack.export_context().perform(move |ctx| {
        let ids: Vec<EntityId> = (0..100)
            .map(|i| {
                let id = ctx.insert(note(&format!("export {i}")));
                if i % 10 == 9 {
                    ctx.save().unwrap();
                }
                id
            })
            .collect();
        tx.send(ids).unwrap();
    });

    let interactive = stack.interactive_context();
    let mine: Vec<EntityId> = (0..100)
        .map(|i| {
            let id = interactive.insert(note(&format!("ui {i}")));
            if i % 10 == 9 {
                interactive.save().unwrap();
            }
            id
        })
        .collect();

    let theirs = rx.recv().unwrap();
    let coordinator = stack.default_coordinator();
    for id in mine.iter().chain(theirs.iter()) {
        assert!(coordinator.contains(id).unwrap());
    }
    assert_eq!(interactive.fetch("Note").unwrap().len(), 200);
    assert_eq!(coordinator.last_commit().unwrap().sequence, 20);
}

#[test]
fn test_import_commits_independently_of_default_coordinator() {
    let stack = ephemeral_stack();

    stack.interactive_context().insert(note("ui"));
    stack.interactive_context().save().unwrap();

    let imported = stack.import_context().perform_and_wait(|ctx| {
        let id = ctx.insert(note("bulk"));
        ctx.save().map(|_| id)
    });
    let imported = imported.unwrap();

    assert_eq!(stack.default_coordinator().last_commit().unwrap().sequence, 1);
    assert_eq!(stack.import_coordinator().last_commit().unwrap().sequence, 1);

    let seen = stack.interactive_context().object(&imported).unwrap().unwrap();
    assert_eq!(title_of(&seen), Some("bulk"));
}

#[test]
fn test_stale_update_after_import_delete_fails_validation() {
    let stack = ephemeral_stack();
    let ui = stack.interactive_context();

    let original = note("shared");
    let id = ui.insert(original.clone());
    ui.save().unwrap();

    stack.import_context().perform_and_wait(move |ctx| {
        ctx.delete(id);
        ctx.save().unwrap();
    });

    ui.update(original.with_attribute("title", "too late"));
    let err = ui.save().unwrap_err();
    assert!(matches!(err, SaveError::ValidationFailed(_)));
    assert!(ui.has_changes());
}

#[test]
fn test_relation_to_entity_deleted_by_import_is_rejected() {
    let stack = ephemeral_stack();
    let ui = stack.interactive_context();

    let folder = Entity::new("Folder").with_attribute("name", "inbox");
    let folder_id = ui.insert(folder);
    ui.save().unwrap();

    stack.import_context().perform_and_wait(move |ctx| {
        ctx.delete(folder_id);
        ctx.save().unwrap();
    });
    assert!(stack.import_coordinator().last_commit().is_some());

    ui.insert(note("orphan").with_relation("folder", folder_id));
    let err = ui.save().unwrap_err();
    match err {
        SaveError::ValidationFailed(report) => {
            assert_eq!(report.len(), 1);
            assert!(report.issues[0].message.contains("references missing entity"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!stack.default_coordinator().contains(&folder_id).unwrap());
}

#[test]
fn test_sibling_sees_stale_object_until_refresh() {
    let stack = ephemeral_stack();
    let ui = stack.interactive_context();
    let id = ui.insert(note("v1"));
    ui.save().unwrap();

    let export = stack.export_context();
    let cached = export.perform_and_wait(move |ctx| ctx.object(&id).unwrap().unwrap());
    assert_eq!(title_of(&cached), Some("v1"));

    ui.update(cached.clone().with_attribute("title", "v2"));
    ui.save().unwrap();

    let (stale, fresh) = export.perform_and_wait(move |ctx| {
        let stale = ctx.object(&id).unwrap().unwrap();
        ctx.refresh(&id);
        let fresh = ctx.object(&id).unwrap().unwrap();
        (stale, fresh)
    });
    assert_eq!(title_of(&stale), Some("v1"));
    assert_eq!(title_of(&fresh), Some("v2"));
}

#[test]
fn test_many_background_contexts_save_in_parallel() {
    let stack = ephemeral_stack();
    let contexts: Vec<_> = (0..8)
        .map(|_| stack.new_background_context().unwrap())
        .collect();

    let (tx, rx) = mpsc::channel();
    for (n, ctx) in contexts.iter().enumerate() {
        let tx = tx.clone();
        ctx.perform(move |ctx| {
            for i in 0..25 {
                ctx.insert(note(&format!("worker {n} row {i}")));
            }
            tx.send(ctx.save().is_ok()).unwrap();
        });
    }
    drop(tx);

    assert!(rx.iter().all(|ok| ok));
    assert_eq!(stack.interactive_context().fetch("Note").unwrap().len(), 200);
}
