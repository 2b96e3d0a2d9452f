// Execution Engine Module
// Step execution, async action accounting, suspension, and run scheduling

pub mod async_actions;
pub mod context;
pub mod events;
pub mod gate;
pub mod handler;
pub mod params;
pub mod report;
pub mod scheduler;
pub mod start_at;
pub mod step_executor;

// Re-export key types
pub use async_actions::{AsyncActionsManager, AsyncCompletion, JoinScope};
pub use context::{ActionRecord, ActionStatus, RuntimeContext};
pub use events::{
    progress_channel, EventSender, ExecutionEvent, LogLevel, ProgressReceiver, ProgressSender,
};
pub use gate::{GateError, Resumption, SuspensionGate};
pub use handler::{
    run_handler, ActionContext, ActionHandler, CompareValuesHandler, FailHandler, HandlerError,
    HandlerOutput, HandlerRegistry, SetStaticHandler, SleepHandler,
};
pub use params::{DependencyError, ParamError, ParamsCalculator};
pub use report::{ActionReport, MatrixReport, RunReport, StepReport};
pub use scheduler::{RunState, Scheduler};
pub use start_at::{start_deadline, StartAt, StartAtError};
pub use step_executor::{ExecutionState, StepExecutor};
