//! Stack construction, long-lived context wiring, and teardown policies.

use crate::integration::test_utils::{ephemeral_stack, note, notes_schema, title_of, with_xdg_env};
use std::path::PathBuf;
use storestack::{
    Confinement, OpenError, ParentRef, SaveError, Stack, StoreKind, StoreOptions, TeardownPolicy,
};
use tempfile::TempDir;

#[test]
fn test_initialize_builds_three_root_contexts() {
    let stack = ephemeral_stack();
    let graph = stack.graph();

    for ctx in [
        stack.interactive_context(),
        stack.export_context(),
        stack.import_context(),
    ] {
        assert!(ctx.is_root());
        assert!(matches!(graph.parent_of(ctx.id()), Some(ParentRef::Coordinator(_))));
        assert_eq!(graph.depth(ctx.id()), 0);
    }
    assert_eq!(graph.live_contexts(), 3);
    assert_eq!(stack.default_coordinator().schema().name, "Notes");
}

#[test]
fn test_interactive_and_export_share_coordinator_import_does_not() {
    let stack = ephemeral_stack();
    let interactive = stack.interactive_context().coordinator().unwrap();
    let export = stack.export_context().coordinator().unwrap();
    let import = stack.import_context().coordinator().unwrap();

    assert!(interactive.ptr_eq(stack.default_coordinator()));
    assert!(export.ptr_eq(stack.default_coordinator()));
    assert!(import.ptr_eq(stack.import_coordinator()));
    assert!(!import.ptr_eq(&interactive));
    assert!(import.shares_store_with(&interactive));
}

#[test]
fn test_initialize_with_ignores_location_for_ephemeral() {
    let stack = Stack::initialize_with(
        StoreKind::Ephemeral,
        Some(PathBuf::from("/nonexistent/ignored")),
        notes_schema(1),
        StoreOptions::default(),
    )
    .unwrap();
    assert_eq!(stack.default_coordinator().descriptor().kind(), StoreKind::Ephemeral);
    assert!(stack.default_coordinator().descriptor().location().is_none());
}

#[test]
fn test_initialize_with_durable_requires_location() {
    let result = Stack::initialize_with(
        StoreKind::Durable,
        None,
        notes_schema(1),
        StoreOptions::default(),
    );
    assert!(matches!(result, Err(OpenError::MissingLocation)));
}

#[test]
fn test_separate_ephemeral_stacks_are_isolated() {
    let first = ephemeral_stack();
    let second = ephemeral_stack();

    let id = first.interactive_context().insert(note("only here"));
    first.interactive_context().save().unwrap();

    assert!(first.interactive_context().object(&id).unwrap().is_some());
    assert!(second.interactive_context().object(&id).unwrap().is_none());
}

#[test]
fn test_teardown_discard_leaves_store_untouched() {
    let stack = ephemeral_stack();
    let coordinator = stack.default_coordinator().clone();

    let saved = stack.interactive_context().insert(note("saved"));
    stack.interactive_context().save().unwrap();
    let unsaved = stack.interactive_context().insert(note("unsaved"));

    stack.teardown(TeardownPolicy::Discard).unwrap();
    assert!(coordinator.contains(&saved).unwrap());
    assert!(!coordinator.contains(&unsaved).unwrap());
}

#[test]
fn test_teardown_flush_saves_background_and_nested_contexts() {
    let stack = ephemeral_stack();
    let coordinator = stack.default_coordinator().clone();
    let import_coordinator = stack.import_coordinator().clone();

    let scratch = stack.new_interactive_child(stack.interactive_context()).unwrap();
    let nested = scratch.insert(note("nested"));
    let exported = stack
        .export_context()
        .perform_and_wait(|ctx| ctx.insert(note("export")));
    let imported = stack
        .import_context()
        .perform_and_wait(|ctx| ctx.insert(note("import")));

    stack.teardown(TeardownPolicy::FlushOrFail).unwrap();

    assert!(coordinator.contains(&nested).unwrap());
    assert!(coordinator.contains(&exported).unwrap());
    assert!(import_coordinator.contains(&imported).unwrap());
}

#[test]
fn test_teardown_flush_failure_hands_back_stack() {
    let stack = ephemeral_stack();
    let bad = note("dangling").with_relation("folder", storestack::EntityId::new());
    stack.export_context().perform_and_wait(move |ctx| {
        ctx.insert(bad);
    });

    let err = stack.teardown(TeardownPolicy::FlushOrFail).unwrap_err();
    assert!(matches!(err.source, SaveError::ValidationFailed(_)));
    assert!(err.to_string().contains("during teardown"));

    let stack = err.into_stack();
    assert!(!stack.graph().is_closed());
    assert!(stack.export_context().perform_and_wait(|ctx| ctx.has_changes()));

    stack
        .export_context()
        .perform_and_wait(|ctx| ctx.rollback());
    stack.teardown(TeardownPolicy::FlushOrFail).unwrap();
}

#[test]
fn test_teardown_closes_graph() {
    let stack = ephemeral_stack();
    let graph = stack.graph().clone();
    let ctx = stack.new_background_context().unwrap();

    stack.teardown(TeardownPolicy::Discard).unwrap();
    assert!(graph.is_closed());
    assert!(ctx.perform_and_wait(|ctx| ctx.fetch("Note")).is_err());
}

#[test]
fn test_teardown_off_interactive_domain_panics() {
    let stack = ephemeral_stack();
    let outcome = std::thread::spawn(move || stack.teardown(TeardownPolicy::Discard)).join();

    let payload = outcome.unwrap_err();
    let message = payload.downcast_ref::<String>().unwrap();
    assert!(message.contains("confinement violation"), "{message}");
}

#[test]
fn test_auto_migrating_durable_places_store_in_data_dir() {
    let test_dir = TempDir::new().unwrap();
    with_xdg_env(&test_dir, || {
        let stack = Stack::auto_migrating_durable(notes_schema(1)).unwrap();
        let location = stack
            .default_coordinator()
            .descriptor()
            .location()
            .unwrap()
            .to_path_buf();
        assert!(stack.default_coordinator().descriptor().options().auto_migrate);
        assert!(location.ends_with("storestack/Notes.store"));
        assert!(location.exists());

        let id = stack.interactive_context().insert(note("persisted"));
        stack.teardown(TeardownPolicy::FlushOrFail).unwrap();

        let reopened = Stack::auto_migrating_durable(notes_schema(2)).unwrap();
        assert_eq!(reopened.default_coordinator().schema().version, 2);
        let found = reopened.interactive_context().object(&id).unwrap().unwrap();
        assert_eq!(title_of(&found), Some("persisted"));
        reopened.teardown(TeardownPolicy::Discard).unwrap();
    });
}

#[test]
fn test_ad_hoc_factories() {
    let stack = ephemeral_stack();

    let bg = stack.new_background_context().unwrap();
    assert_eq!(bg.confinement(), Confinement::Background);
    assert!(bg.coordinator().unwrap().ptr_eq(stack.default_coordinator()));

    let ui = stack.new_interactive_context().unwrap();
    assert_eq!(ui.confinement(), Confinement::Interactive);
    assert_eq!(ui.domain().id(), stack.interactive_domain().id());

    let on_import = stack
        .new_interactive_context_on(stack.import_coordinator())
        .unwrap();
    assert!(on_import.coordinator().unwrap().ptr_eq(stack.import_coordinator()));
    let bg_on_import = stack
        .new_background_context_on(stack.import_coordinator())
        .unwrap();
    assert!(bg_on_import.coordinator().unwrap().ptr_eq(stack.import_coordinator()));

    let child = stack.new_background_child(&ui).unwrap();
    assert_eq!(child.confinement(), Confinement::Background);
    assert_eq!(stack.graph().depth(child.id()), 1);
    assert!(child.coordinator().unwrap().ptr_eq(stack.default_coordinator()));
}

#[test]
fn test_ephemeral_data_does_not_survive_stack() {
    let stack = Stack::auto_migrating_ephemeral(notes_schema(1)).unwrap();
    assert!(stack.default_coordinator().descriptor().options().auto_migrate);
    let id = stack.interactive_context().insert(note("transient"));
    stack.teardown(TeardownPolicy::FlushOrFail).unwrap();

    let stack = Stack::auto_migrating_ephemeral(notes_schema(1)).unwrap();
    assert!(stack.interactive_context().object(&id).unwrap().is_none());
    assert!(stack.interactive_context().fetch("Note").unwrap().is_empty());
}
