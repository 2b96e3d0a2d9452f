// Scheduler
// Drives the steps of a run on a tokio task and exposes the control surface

use crate::config::{EngineConfig, MatrixFailurePolicy};
use crate::error::{EngineError, EngineResult};
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::gate::{GateError, SuspensionGate};
use crate::execution::handler::HandlerRegistry;
use crate::execution::params::ParamsCalculator;
use crate::execution::report::{MatrixReport, RunReport, StepReport};
use crate::execution::start_at::start_deadline;
use crate::execution::step_executor::{ExecutionState, StepExecutor};
use crate::model::{AsyncTracker, Matrix, Step, StepKind, StepStatus};
use crate::script::{RunScript, ScriptValidator};

use chrono::{DateTime, Local, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunState {
    Idle,
    Running,
    /// Running, parked on the suspension gate
    Suspended,
    /// Stop requested; the run task is still settling
    Stopping,
    /// Finished or stopped; a scheduler runs once
    Stopped,
}

/// State visible to both the control surface and the run task
#[derive(Debug)]
struct Shared {
    name: String,
    state: Mutex<RunState>,
    current_step: Mutex<Option<String>>,
    successful: AtomicBool,
    pause_requested: AtomicBool,
    gate: SuspensionGate,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct Plan {
    steps: Vec<Step>,
    matrices: Vec<Matrix>,
}

/// Runs steps in order across all matrices
#[derive(Debug)]
pub struct Scheduler {
    shared: Arc<Shared>,
    registry: HandlerRegistry,
    config: EngineConfig,
    event_tx: Option<ProgressSender>,
    trackers: HashMap<String, AsyncTracker>,
    plan: Mutex<Option<Plan>>,
    handle: Mutex<Option<JoinHandle<RunReport>>>,
}

impl Scheduler {
    /// Check the plan and create an idle scheduler
    pub fn new(
        name: impl Into<String>,
        steps: Vec<Step>,
        matrices: Vec<Matrix>,
        registry: HandlerRegistry,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        let name = name.into();
        config.validate()?;
        ScriptValidator::validate_plan(&steps, &matrices).map_err(|errors| {
            EngineError::InvalidPlan(
                errors
                    .iter()
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        })?;

        let trackers = steps
            .iter()
            .map(|s| (s.name.clone(), s.async_tracker.clone()))
            .collect();
        let cancel = CancellationToken::new();

        Ok(Self {
            shared: Arc::new(Shared {
                name,
                state: Mutex::new(RunState::Idle),
                current_step: Mutex::new(None),
                successful: AtomicBool::new(false),
                pause_requested: AtomicBool::new(false),
                gate: SuspensionGate::new(cancel.clone()),
                cancel,
            }),
            registry,
            config,
            event_tx: None,
            trackers,
            plan: Mutex::new(Some(Plan { steps, matrices })),
            handle: Mutex::new(None),
        })
    }

    /// Create a scheduler for a loaded script
    pub fn from_script(
        script: RunScript,
        registry: HandlerRegistry,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        Self::new(script.name, script.steps, script.matrices, registry, config)
    }

    /// Set progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Spawn the run. A scheduler can be started once.
    pub fn start(&self, user: impl Into<String>) -> EngineResult<()> {
        let mut state = self.shared.state.lock();
        if *state != RunState::Idle {
            return Err(EngineError::AlreadyStarted(self.shared.name.clone()));
        }
        let Some(plan) = self.plan.lock().take() else {
            return Err(EngineError::AlreadyStarted(self.shared.name.clone()));
        };
        *state = RunState::Running;
        drop(state);

        let run = Run {
            shared: self.shared.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
            event_tx: self.event_tx.clone(),
            user: user.into(),
        };
        *self.handle.lock() = Some(tokio::spawn(run.execute(plan)));
        Ok(())
    }

    /// Cancel the run. Wakes the gate, sleeps and async joins. The state
    /// reads `Stopping` until the run task has finished.
    pub fn stop(&self) {
        tracing::info!(scheduler = %self.shared.name, "stop requested");
        let mut state = self.shared.state.lock();
        self.shared.cancel.cancel();
        *state = match *state {
            RunState::Running | RunState::Suspended => RunState::Stopping,
            _ => RunState::Stopped,
        };
    }

    /// Resume a suspended run
    pub fn continue_execution(&self) -> EngineResult<()> {
        self.ensure_running()?;
        self.shared.gate.resume(false);
        Ok(())
    }

    /// Resume a suspended run, re-running the failed actions of the current step
    pub fn replay_step(&self) -> EngineResult<()> {
        self.ensure_running()?;
        self.shared.gate.resume(true);
        Ok(())
    }

    /// Suspend before the next step starts
    pub fn pause(&self) -> EngineResult<()> {
        self.ensure_running()?;
        self.shared.pause_requested.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Wait for the run to finish
    pub async fn wait(&self) -> EngineResult<RunReport> {
        let handle = self
            .handle
            .lock()
            .take()
            .ok_or_else(|| EngineError::NotStarted(self.shared.name.clone()))?;
        Ok(handle.await?)
    }

    pub fn state(&self) -> RunState {
        let state = *self.shared.state.lock();
        if state == RunState::Running && self.shared.gate.is_suspended() {
            RunState::Suspended
        } else {
            state
        }
    }

    /// True until the run task has finished, including while stopping
    pub fn is_running(&self) -> bool {
        matches!(
            self.state(),
            RunState::Running | RunState::Suspended | RunState::Stopping
        )
    }

    pub fn is_suspended(&self) -> bool {
        self.shared.gate.is_suspended()
    }

    /// True once the run finished with every step and matrix successful
    pub fn is_successful(&self) -> bool {
        self.shared.successful.load(Ordering::SeqCst)
    }

    pub fn current_step(&self) -> Option<String> {
        self.shared.current_step.lock().clone()
    }

    /// True while async actions dispatched by `step` are in flight
    pub fn is_async(&self, step: &str) -> bool {
        self.trackers.get(step).is_some_and(AsyncTracker::is_async)
    }

    fn ensure_running(&self) -> EngineResult<()> {
        if matches!(self.state(), RunState::Running | RunState::Suspended) {
            Ok(())
        } else {
            Err(EngineError::NotStarted(self.shared.name.clone()))
        }
    }
}

/// Everything the run task owns
struct Run {
    shared: Arc<Shared>,
    registry: HandlerRegistry,
    config: EngineConfig,
    event_tx: Option<ProgressSender>,
    user: String,
}

impl Run {
    async fn execute(self, plan: Plan) -> RunReport {
        let Plan {
            mut steps,
            matrices,
        } = plan;
        let started = Utc::now();
        let clock = Instant::now();
        let shared = &self.shared;

        tracing::info!(
            scheduler = %shared.name,
            user = %self.user,
            steps = steps.len(),
            matrices = matrices.len(),
            "run started"
        );
        self.event_tx.send_event(ExecutionEvent::scheduler_started(
            &shared.name,
            &self.user,
            steps.len(),
            matrices.len(),
        ));

        let params = ParamsCalculator::from_config(&self.config);
        let mut state = ExecutionState::new(matrices, &self.config, shared.cancel.clone());
        let executor = StepExecutor::new(
            &self.registry,
            &params,
            &shared.gate,
            &shared.cancel,
            &self.config,
            &self.event_tx,
        );

        let mut interrupted = false;
        for index in 0..steps.len() {
            if shared.cancel.is_cancelled() {
                interrupted = true;
                break;
            }

            *shared.current_step.lock() = Some(steps[index].name.clone());

            if shared.pause_requested.swap(false, Ordering::SeqCst) {
                let step = &steps[index];
                tracing::info!(step = %step.name, "paused before step");
                self.event_tx.send_event(ExecutionEvent::StepSuspended {
                    step_name: step.name.clone(),
                });
                if let Err(e) = shared.gate.request_suspend().await {
                    self.interrupt(&mut steps[index], e);
                    interrupted = true;
                    break;
                }
            }

            if let Err(e) = self.wait_for_start(&steps, index, started).await {
                self.interrupt(&mut steps[index], e);
                interrupted = true;
                break;
            }

            let step = &mut steps[index];
            executor.execute(step, index, &mut state).await;

            if shared.cancel.is_cancelled() {
                interrupted = true;
                break;
            }

            if self.config.failure_policy == MatrixFailurePolicy::StopRun && !step.success {
                tracing::warn!(step = %step.name, "step failed, stopping run");
                self.event_tx.send_event(ExecutionEvent::warning(
                    "Run stopped after failed step",
                    Some(step.name.clone()),
                ));
                break;
            }
        }

        // Outstanding async actions are always joined before the run ends
        if executor.join_all(&mut state).await.is_err() {
            interrupted = true;
        }
        *shared.current_step.lock() = None;

        let reason = if interrupted {
            "run was stopped"
        } else {
            "run ended before this step"
        };
        for step in steps.iter().filter(|s| s.status == StepStatus::Pending) {
            self.event_tx.send_event(ExecutionEvent::StepSkipped {
                step_name: step.name.clone(),
                reason: reason.to_string(),
            });
        }

        // Late async results count against the step that dispatched them
        for step in steps.iter_mut().filter(|s| s.kind == StepKind::Default) {
            let matrices_ok = state
                .matrices
                .iter()
                .all(|m| m.step_success.get(&step.name).copied().unwrap_or(true));
            step.success &= matrices_ok;
        }

        let success = !interrupted
            && steps.iter().all(|s| s.success)
            && state.matrices.iter().all(|m| m.successful);

        shared.successful.store(success, Ordering::SeqCst);
        *shared.state.lock() = RunState::Stopped;

        let duration = clock.elapsed();
        tracing::info!(
            scheduler = %shared.name,
            success,
            interrupted,
            duration_ms = duration.as_millis() as u64,
            "run finished"
        );
        self.event_tx.send_event(ExecutionEvent::scheduler_completed(
            &shared.name,
            success,
            interrupted,
            duration,
        ));

        RunReport {
            scheduler: shared.name.clone(),
            user: self.user.clone(),
            started,
            finished: Utc::now(),
            success,
            interrupted,
            steps: steps.iter().map(StepReport::from).collect(),
            matrices: state.matrices.iter().map(MatrixReport::from).collect(),
        }
    }

    /// Hold `steps[index]` back until its start time. A malformed setting
    /// is reported and the step starts at once.
    async fn wait_for_start(
        &self,
        steps: &[Step],
        index: usize,
        run_started: DateTime<Utc>,
    ) -> Result<(), GateError> {
        let step = &steps[index];
        let deadline = match start_deadline(steps, index, run_started, Local::now()) {
            Ok(Some(deadline)) => deadline,
            Ok(None) => return Ok(()),
            Err(e) => {
                tracing::warn!(step = %step.name, error = %e, "ignoring start time");
                self.event_tx
                    .send_event(ExecutionEvent::warning(e.to_string(), Some(step.name.clone())));
                return Ok(());
            }
        };

        let delay = (deadline - Utc::now()).to_std().unwrap_or_default();
        tracing::info!(step = %step.name, until = %deadline, "waiting for step start time");
        self.event_tx.send_event(ExecutionEvent::info(
            format!("Waiting until {}", deadline.to_rfc3339()),
            Some(step.name.clone()),
        ));

        tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => Err(GateError::Interrupted),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Fail a step that was interrupted before it began
    fn interrupt(&self, step: &mut Step, error: GateError) {
        tracing::warn!(step = %step.name, error = %error, "step interrupted before start");
        self.event_tx
            .send_event(ExecutionEvent::error(error.to_string(), Some(step.name.clone())));
        step.status = StepStatus::Failed;
        step.success = false;
        step.error = Some(error.to_string());
        step.finished = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Action;

    fn scheduler(steps: Vec<Step>, matrices: Vec<Matrix>) -> Scheduler {
        Scheduler::new(
            "test",
            steps,
            matrices,
            HandlerRegistry::with_builtins(),
            EngineConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_plan_rejected() {
        let result = Scheduler::new(
            "bad",
            vec![Step::new("A", StepKind::Default)],
            vec![Matrix::new("m1").with_action(Action::new("x", "B", "SetStatic"))],
            HandlerRegistry::with_builtins(),
            EngineConfig::default(),
        );

        match result {
            Err(EngineError::InvalidPlan(message)) => assert!(message.contains("unknown step 'B'")),
            other => panic!("expected invalid plan, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_idle_queries() {
        let scheduler = scheduler(vec![Step::new("A", StepKind::Default)], Vec::new());

        assert_eq!(scheduler.state(), RunState::Idle);
        assert!(!scheduler.is_running());
        assert!(!scheduler.is_successful());
        assert!(scheduler.current_step().is_none());
        assert!(!scheduler.is_async("A"));
        assert!(matches!(
            scheduler.continue_execution(),
            Err(EngineError::NotStarted(_))
        ));
    }

    #[tokio::test]
    async fn test_wait_before_start() {
        let scheduler = scheduler(vec![Step::new("A", StepKind::Default)], Vec::new());
        assert!(matches!(
            scheduler.wait().await,
            Err(EngineError::NotStarted(_))
        ));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let scheduler = scheduler(vec![Step::new("A", StepKind::Default)], Vec::new());

        scheduler.start("tester").unwrap();
        assert!(matches!(
            scheduler.start("tester"),
            Err(EngineError::AlreadyStarted(_))
        ));

        let report = scheduler.wait().await.unwrap();
        assert!(report.success);
        assert_eq!(scheduler.state(), RunState::Stopped);
        assert!(matches!(
            scheduler.start("tester"),
            Err(EngineError::AlreadyStarted(_))
        ));
    }
}
