//! Mediaflow Engine Library
//!
//! Workflow execution state machine for media processing. A workflow
//! definition is instantiated against an artifact and driven through its
//! operations one at a time:
//!
//! - **Definitions**: YAML workflow templates and a registry to resolve them
//! - **Model**: workflow and operation instances, position resolution, stored documents
//! - **Engine**: condition evaluation, pluggable operation handlers and the execution driver
//! - **Jobs**: job bookkeeping per execution attempt and the job barrier
//! - **Services**: the lifecycle facade (`start`, `stop`, `suspend`, `resume`, ...)
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading from environment variables
//! - [`db`]: Persistence collaborator and in-memory repository
//! - [`error`]: Engine and operation error types
//!
//! ## Example
//!
//! ```ignore
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use mediaflow_engine::{
//!     config::EngineConfig,
//!     definition::DefinitionRegistry,
//!     engine::HandlerRegistry,
//!     model::{Artifact, Identity},
//!     services::WorkflowService,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let definitions = Arc::new(DefinitionRegistry::new());
//!     definitions.load_dir("definitions".as_ref())?;
//!     let handlers = Arc::new(HandlerRegistry::new());
//!     let service = WorkflowService::in_memory(handlers, definitions.clone(), EngineConfig::from_env()?);
//!
//!     let definition = definitions.get("publish")?;
//!     let started = service
//!         .start(&definition, Artifact::new("mp-1"), None, Identity::new("admin", "org"), BTreeMap::new())
//!         .await?;
//!     let finished = service.wait(started.id).await?;
//!     println!("{}", finished.state());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod db;
pub mod definition;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod model;
pub mod result_ext;
pub mod services;

pub use error::{EngineError, EngineResult, OperationError};
pub use result_ext::ResultExt;
