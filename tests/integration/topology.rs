//! Parent/child wiring rules and context release.

use crate::integration::test_utils::{ephemeral_stack, note};
use storestack::{Confinement, InvalidTopology, ParentRef};

#[test]
fn test_child_parent_reference_is_fixed() {
    let stack = ephemeral_stack();
    let root = stack.interactive_context();
    let child = stack.new_interactive_child(root).unwrap();

    assert_eq!(stack.graph().parent_of(child.id()), Some(ParentRef::Context(root.id())));
    assert!(child.parent().unwrap().ptr_eq(root));

    let other_root = stack.new_interactive_context().unwrap();
    let err = stack.graph().set_parent(&child, &other_root).unwrap_err();
    assert_eq!(err, InvalidTopology::AlreadyParented { context: child.id() });
    assert_eq!(stack.graph().parent_of(child.id()), Some(ParentRef::Context(root.id())));
}

#[test]
fn test_reparenting_under_own_descendant_is_a_cycle() {
    let stack = ephemeral_stack();
    let root = stack.new_interactive_context().unwrap();
    let child = stack.new_interactive_child(&root).unwrap();
    let grandchild = stack.new_interactive_child(&child).unwrap();

    let err = stack.graph().set_parent(&root, &grandchild).unwrap_err();
    assert!(matches!(err, InvalidTopology::Cycle { .. }));

    let err = stack.graph().set_parent(&child, &child).unwrap_err();
    assert!(matches!(err, InvalidTopology::Cycle { .. }));
}

#[test]
fn test_parent_from_another_stack_is_rejected() {
    let stack = ephemeral_stack();
    let other = ephemeral_stack();

    let err = stack
        .context_with(
            Some(other.interactive_context()),
            Confinement::Interactive,
            stack.default_coordinator(),
        )
        .unwrap_err();
    assert!(matches!(err, InvalidTopology::ForeignGraph { .. }));
}

#[test]
fn test_every_chain_terminates_at_a_coordinator() {
    let stack = ephemeral_stack();
    let mut ctx = stack.new_background_context().unwrap();
    for _ in 0..5 {
        ctx = stack.new_background_child(&ctx).unwrap();
    }
    assert_eq!(stack.graph().depth(ctx.id()), 5);
    assert!(ctx.coordinator().unwrap().ptr_eq(stack.default_coordinator()));
}

#[test]
fn test_child_keeps_parent_alive() {
    let stack = ephemeral_stack();
    let baseline = stack.graph().live_contexts();

    let parent = stack.new_interactive_context().unwrap();
    let parent_id = parent.id();
    let child = stack.new_interactive_child(&parent).unwrap();
    drop(parent);

    assert_eq!(stack.graph().live_contexts(), baseline + 2);
    assert!(stack.graph().parent_of(parent_id).is_some());

    let id = child.insert(note("still reachable"));
    child.save().unwrap();
    let parent = child.parent().unwrap();
    parent.save().unwrap();
    assert!(stack.default_coordinator().contains(&id).unwrap());

    drop(child);
    assert_eq!(stack.graph().live_contexts(), baseline);
    assert!(stack.graph().parent_of(parent_id).is_none());
}

#[test]
fn test_released_contexts_do_not_block_teardown() {
    let stack = ephemeral_stack();
    let scratch = stack.new_interactive_child(stack.interactive_context()).unwrap();
    scratch.insert(note("abandoned"));
    drop(scratch);

    stack
        .teardown(storestack::TeardownPolicy::FlushOrFail)
        .unwrap();
}
