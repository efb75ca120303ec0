//! Execution engine: condition evaluation, handler dispatch and the driver loop.

pub mod condition;
pub mod control;
pub mod driver;
pub mod handler;
pub mod result;

pub use condition::{ConditionEvaluator, ConditionOutcome};
pub use control::{control_channel, ControlReceiver, ControlSender, ControlSignal, JobContext};
pub use driver::{ExecutionDriver, RunOutcome, StepOutcome, RETRY_STRATEGY_PROPERTY};
pub use handler::{HandlerRegistry, HoldState, OperationHandler};
pub use result::{Action, OperationResult};
