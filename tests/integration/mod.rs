//! Integration tests for the storestack persistence stack

mod concurrency;
mod save_propagation;
mod stack_lifecycle;
mod topology;
