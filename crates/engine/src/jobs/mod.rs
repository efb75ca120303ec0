//! Job bookkeeping collaborators.

pub mod barrier;
pub mod registry;

pub use barrier::{BarrierResult, JobBarrier};
pub use registry::{InMemoryJobRegistry, Job, JobRegistry, JobStatus, NewJob};
