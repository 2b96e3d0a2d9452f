// Matrix Execution Engine Library
// Formula references, phased step scheduling, and suspendable runs over test matrices

pub mod config;
pub mod error;
pub mod execution;
pub mod expression;
pub mod logging;
pub mod model;
pub mod script;

// Re-export commonly used types
pub use config::{EngineConfig, MatrixFailurePolicy};
pub use error::{EngineError, EngineResult};

// Re-export model types
pub use model::{
    Action, ActionOutcome, AsyncTracker, FailReason, Matrix, StartAtType, Step, StepKind,
    StepStatus, Value, WaitAsyncEnd,
};

// Re-export formula types
pub use expression::{
    ActionReference, CalcError, EvalError, FormulaCalculator, FormulaContext, FormulaDelimiters,
    IdSanitizer, ReferenceScanner, ScanResult, ScanWarning,
};

// Re-export execution types
pub use execution::{
    progress_channel, ActionContext, ActionHandler, ExecutionEvent, GateError, HandlerError,
    HandlerOutput, HandlerRegistry, ProgressSender, RunReport, RunState, RuntimeContext,
    Scheduler, SuspensionGate,
};

// Re-export script types
pub use script::{
    ParseError, ParseErrorKind, RunScript, ScriptParser, ScriptValidator, ValidationError,
};
