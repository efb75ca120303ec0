//! Mediaflow Worker
//!
//! Runs media processing workflows on top of `mediaflow-engine`.
//!
//! This crate provides:
//! - Built-in operation handlers (`defaults`, `hold`, `include`, `shell`)
//! - A worker that loads YAML definitions and drives many workflows in parallel
//! - Environment configuration and workflow request helpers for the binary

pub mod config;
pub mod error;
pub mod handlers;
pub mod request;
pub mod worker;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use request::{load_artifact, parse_config_pair, WorkflowRequest};
pub use worker::Worker;
