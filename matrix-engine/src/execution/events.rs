// Execution Events
// Progress reporting for scheduler runs

use crate::model::{FailReason, StepKind, StepStatus};

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted during a scheduler run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Run started
    SchedulerStarted {
        scheduler_name: String,
        user: String,
        total_steps: usize,
        total_matrices: usize,
    },

    /// Run finished, naturally or by stop()
    SchedulerCompleted {
        scheduler_name: String,
        success: bool,
        interrupted: bool,
        duration: Duration,
    },

    /// Step execution started
    StepStarted {
        step_name: String,
        kind: StepKind,
        step_index: usize,
    },

    /// Step execution finished
    StepCompleted {
        step_name: String,
        status: StepStatus,
        success: bool,
        duration: Duration,
    },

    /// Step was not run (execute flag off, or run stopped before it)
    StepSkipped { step_name: String, reason: String },

    /// Step is waiting on the suspension gate
    StepSuspended { step_name: String },

    /// Step left the suspension gate
    StepResumed { step_name: String, replay: bool },

    /// Action execution started
    ActionStarted {
        matrix_name: String,
        action_id: String,
        action_type: String,
        step_name: String,
    },

    /// Action finished with an outcome
    ActionCompleted {
        matrix_name: String,
        action_id: String,
        success: bool,
        fail_reason: FailReason,
        duration: Duration,
    },

    /// Action was handed to the async pool
    AsyncActionDispatched {
        matrix_name: String,
        action_id: String,
        step_name: String,
    },

    /// Async action finished and its outcome was applied
    AsyncActionCompleted {
        matrix_name: String,
        action_id: String,
        success: bool,
    },

    /// Log message (info, warning, error)
    Log {
        level: LogLevel,
        message: String,
        step_name: Option<String>,
    },
}

/// Log level for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl ExecutionEvent {
    /// Create a scheduler started event
    pub fn scheduler_started(
        name: impl Into<String>,
        user: impl Into<String>,
        total_steps: usize,
        total_matrices: usize,
    ) -> Self {
        Self::SchedulerStarted {
            scheduler_name: name.into(),
            user: user.into(),
            total_steps,
            total_matrices,
        }
    }

    /// Create a scheduler completed event
    pub fn scheduler_completed(
        name: impl Into<String>,
        success: bool,
        interrupted: bool,
        duration: Duration,
    ) -> Self {
        Self::SchedulerCompleted {
            scheduler_name: name.into(),
            success,
            interrupted,
            duration,
        }
    }

    /// Create a step started event
    pub fn step_started(name: impl Into<String>, kind: StepKind, step_index: usize) -> Self {
        Self::StepStarted {
            step_name: name.into(),
            kind,
            step_index,
        }
    }

    /// Create a step completed event
    pub fn step_completed(
        name: impl Into<String>,
        status: StepStatus,
        success: bool,
        duration: Duration,
    ) -> Self {
        Self::StepCompleted {
            step_name: name.into(),
            status,
            success,
            duration,
        }
    }

    /// Create an action started event
    pub fn action_started(
        matrix_name: impl Into<String>,
        action_id: impl Into<String>,
        action_type: impl Into<String>,
        step_name: impl Into<String>,
    ) -> Self {
        Self::ActionStarted {
            matrix_name: matrix_name.into(),
            action_id: action_id.into(),
            action_type: action_type.into(),
            step_name: step_name.into(),
        }
    }

    /// Create an action completed event
    pub fn action_completed(
        matrix_name: impl Into<String>,
        action_id: impl Into<String>,
        success: bool,
        fail_reason: FailReason,
        duration: Duration,
    ) -> Self {
        Self::ActionCompleted {
            matrix_name: matrix_name.into(),
            action_id: action_id.into(),
            success,
            fail_reason,
            duration,
        }
    }

    /// Create an info log event
    pub fn info(message: impl Into<String>, step_name: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Info,
            message: message.into(),
            step_name,
        }
    }

    /// Create a warning log event
    pub fn warning(message: impl Into<String>, step_name: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Warning,
            message: message.into(),
            step_name,
        }
    }

    /// Create an error log event
    pub fn error(message: impl Into<String>, step_name: Option<String>) -> Self {
        Self::Log {
            level: LogLevel::Error,
            message: message.into(),
            step_name,
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}
