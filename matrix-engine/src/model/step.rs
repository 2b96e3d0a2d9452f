// Steps
// Global phases executed in sequence across all matrices

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Kind of a step; selects the execution handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepKind {
    /// Dispatches the actions assigned to the step
    #[default]
    Default,
    /// Pauses for the number of seconds given in the parameter
    Sleep,
    /// Suspends until the operator continues or replays
    AskForContinue,
    /// Joins every outstanding async action
    WaitAsyncActions,
}

impl StepKind {
    /// Control steps never own actions
    pub fn is_control(&self) -> bool {
        !matches!(self, StepKind::Default)
    }
}

/// Step execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Suspended,
    Completed,
    Failed,
}

/// What a relative start time (`+HH:MM:SS`) is counted from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StartAtType {
    /// End of the previous executable step
    #[default]
    EndStep,
    /// Start of the previous executable step
    StartStep,
    /// Start of the run
    StartScheduler,
    /// Start of the first step that actually ran
    StartExecution,
}

/// Count of async actions dispatched by a step and not yet finished.
/// Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct AsyncTracker {
    pending: Arc<AtomicUsize>,
}

impl AsyncTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrement, saturating at zero
    pub fn decrement(&self) {
        let _ = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_async(&self) -> bool {
        self.pending() > 0
    }
}

fn default_true() -> bool {
    true
}

/// A global phase of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub name: String,

    #[serde(default)]
    pub kind: StepKind,

    /// Kind-specific parameter, e.g. the sleep duration in seconds
    #[serde(default)]
    pub parameter: String,

    #[serde(default)]
    pub ask_for_continue: bool,

    #[serde(default)]
    pub ask_if_failed: bool,

    #[serde(default = "default_true")]
    pub execute: bool,

    /// Time of day `HH:MM[:SS]`, or a `+HH:MM[:SS]` offset, before which
    /// the step does not start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<String>,

    #[serde(default)]
    pub start_at_type: StartAtType,

    /// A start time already past moves to the next day instead of being
    /// ignored
    #[serde(default)]
    pub wait_next_day: bool,

    #[serde(skip)]
    pub started: Option<DateTime<Utc>>,

    #[serde(skip)]
    pub finished: Option<DateTime<Utc>>,

    #[serde(skip)]
    pub status: StepStatus,

    /// Cause of failure, kept for the report
    #[serde(skip)]
    pub error: Option<String>,

    #[serde(skip)]
    pub success: bool,

    #[serde(skip)]
    pub async_tracker: AsyncTracker,
}

impl Step {
    pub fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            kind,
            parameter: String::new(),
            ask_for_continue: false,
            ask_if_failed: false,
            execute: true,
            start_at: None,
            start_at_type: StartAtType::EndStep,
            wait_next_day: false,
            started: None,
            finished: None,
            status: StepStatus::Pending,
            error: None,
            success: false,
            async_tracker: AsyncTracker::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.parameter = parameter.into();
        self
    }

    pub fn with_ask_for_continue(mut self, ask: bool) -> Self {
        self.ask_for_continue = ask;
        self
    }

    pub fn with_ask_if_failed(mut self, ask: bool) -> Self {
        self.ask_if_failed = ask;
        self
    }

    pub fn with_execute(mut self, execute: bool) -> Self {
        self.execute = execute;
        self
    }

    pub fn with_start_at(mut self, start_at: impl Into<String>, start_at_type: StartAtType) -> Self {
        self.start_at = Some(start_at.into());
        self.start_at_type = start_at_type;
        self
    }

    pub fn with_wait_next_day(mut self, wait: bool) -> Self {
        self.wait_next_day = wait;
        self
    }

    /// True while actions dispatched by this step are still in flight
    pub fn is_async(&self) -> bool {
        self.async_tracker.is_async()
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, StepStatus::Completed | StepStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_async_tracker_shared_between_clones() {
        let tracker = AsyncTracker::new();
        let clone = tracker.clone();

        tracker.increment();
        tracker.increment();
        assert_eq!(clone.pending(), 2);
        assert!(clone.is_async());

        clone.decrement();
        clone.decrement();
        assert!(!tracker.is_async());
    }

    #[test]
    fn test_async_tracker_saturates_at_zero() {
        let tracker = AsyncTracker::new();
        tracker.decrement();
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_step_deserialize_defaults() {
        let step: Step = serde_yaml::from_str("name: Pause\nkind: sleep\nparameter: '2'").unwrap();
        assert_eq!(step.kind, StepKind::Sleep);
        assert_eq!(step.parameter, "2");
        assert!(step.execute);
        assert!(!step.ask_for_continue);
        assert_eq!(step.status, StepStatus::Pending);
        assert!(step.start_at.is_none());
        assert_eq!(step.start_at_type, StartAtType::EndStep);
    }

    #[test]
    fn test_step_deserialize_start_at() {
        let yaml = "name: Open\nstartAt: '+00:00:05'\nstartAtType: startScheduler\nwaitNextDay: true";
        let step: Step = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(step.start_at.as_deref(), Some("+00:00:05"));
        assert_eq!(step.start_at_type, StartAtType::StartScheduler);
        assert!(step.wait_next_day);
    }

    #[test]
    fn test_control_kinds() {
        assert!(!StepKind::Default.is_control());
        assert!(StepKind::Sleep.is_control());
        assert!(StepKind::AskForContinue.is_control());
        assert!(StepKind::WaitAsyncActions.is_control());
    }
}
