//! Service layer for the Mediaflow engine.
//!
//! The workflow service coordinates the execution driver, the repository
//! and registered listeners for callers such as a REST layer or a worker.

pub mod listener;
pub mod workflow;

pub use listener::{ListenerSet, WorkflowListener};
pub use workflow::WorkflowService;
