// Step Executor
// Runs one step across all matrices, dispatching on the step kind

use crate::config::{EngineConfig, MatrixFailurePolicy};
use crate::execution::async_actions::{AsyncActionsManager, JoinScope};
use crate::execution::context::RuntimeContext;
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::gate::{GateError, SuspensionGate};
use crate::execution::handler::{run_handler, ActionContext, HandlerRegistry};
use crate::execution::params::{self, ParamsCalculator};
use crate::model::{ActionOutcome, Matrix, Step, StepKind, StepStatus};

use chrono::Utc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const STEP_NOT_EXECUTABLE: &str = "step is not executable";
const ACTION_NOT_EXECUTABLE: &str = "action is not executable";

/// Mutable state of a run, owned by the execution task
#[derive(Debug)]
pub struct ExecutionState {
    pub matrices: Vec<Matrix>,
    pub context: RuntimeContext,
    pub async_actions: AsyncActionsManager,
}

impl ExecutionState {
    pub fn new(matrices: Vec<Matrix>, config: &EngineConfig, cancel: CancellationToken) -> Self {
        let context = RuntimeContext::from_matrices(&matrices);
        Self {
            matrices,
            context,
            async_actions: AsyncActionsManager::new(config.max_async_actions, cancel),
        }
    }

    /// True if some action of `step` failed in any matrix
    pub fn step_failed(&self, step: &str) -> bool {
        self.matrices.iter().any(|m| m.has_failures_in_step(step))
    }
}

/// Executes steps. Borrowed per run; all mutable state lives in
/// `ExecutionState`.
pub struct StepExecutor<'a> {
    registry: &'a HandlerRegistry,
    params: &'a ParamsCalculator,
    gate: &'a SuspensionGate,
    cancel: &'a CancellationToken,
    config: &'a EngineConfig,
    events: &'a Option<ProgressSender>,
}

impl<'a> StepExecutor<'a> {
    pub fn new(
        registry: &'a HandlerRegistry,
        params: &'a ParamsCalculator,
        gate: &'a SuspensionGate,
        cancel: &'a CancellationToken,
        config: &'a EngineConfig,
        events: &'a Option<ProgressSender>,
    ) -> Self {
        Self {
            registry,
            params,
            gate,
            cancel,
            config,
            events,
        }
    }

    /// Run `step` to completion. Leaves the status, timing, success flag and
    /// failure cause on the step.
    pub async fn execute(&self, step: &mut Step, step_index: usize, state: &mut ExecutionState) {
        let clock = Instant::now();
        step.status = StepStatus::Running;
        step.started = Some(Utc::now());
        step.error = None;

        tracing::info!(step = %step.name, kind = ?step.kind, "step started");
        self.events
            .send_event(ExecutionEvent::step_started(&step.name, step.kind, step_index));

        let result = if step.execute {
            match step.kind {
                StepKind::Default => self.run_default(step, state).await,
                StepKind::Sleep => self.run_sleep(step).await,
                StepKind::AskForContinue => self.run_ask_for_continue(step).await,
                StepKind::WaitAsyncActions => self.run_wait_async(state).await,
            }
        } else {
            self.skip(step, state);
            Ok(true)
        };

        match result {
            Ok(success) => {
                step.status = StepStatus::Completed;
                step.success = success;
            }
            Err(e) => {
                tracing::warn!(step = %step.name, error = %e, "step failed");
                self.events
                    .send_event(ExecutionEvent::error(e.to_string(), Some(step.name.clone())));
                step.status = StepStatus::Failed;
                step.success = false;
                step.error = Some(e.to_string());
            }
        }
        step.finished = Some(Utc::now());

        tracing::info!(
            step = %step.name,
            status = ?step.status,
            success = step.success,
            "step finished"
        );
        self.events.send_event(ExecutionEvent::step_completed(
            &step.name,
            step.status,
            step.success,
            clock.elapsed(),
        ));
    }

    /// Join every outstanding async action and apply the results
    pub async fn join_all(&self, state: &mut ExecutionState) -> Result<(), GateError> {
        self.join(state, JoinScope::All).await
    }

    // =========================================================================
    // Step kinds
    // =========================================================================

    async fn run_default(
        &self,
        step: &mut Step,
        state: &mut ExecutionState,
    ) -> Result<bool, GateError> {
        self.join(state, JoinScope::BeforeStep(&step.name)).await?;

        loop {
            self.run_actions(step, state).await?;
            self.join(state, JoinScope::Step(&step.name)).await?;

            let failed = state.step_failed(&step.name);
            if !(step.ask_for_continue || (step.ask_if_failed && failed)) {
                return Ok(!failed);
            }

            if self.suspend(step).await? {
                self.reset_failed(step, state);
                continue;
            }
            return Ok(!failed);
        }
    }

    async fn run_sleep(&self, step: &Step) -> Result<bool, GateError> {
        let secs = match step.parameter.trim().parse::<u64>() {
            Ok(secs) => secs,
            Err(_) => {
                tracing::debug!(
                    step = %step.name,
                    parameter = %step.parameter,
                    "sleep parameter is not a number of seconds, skipping"
                );
                return Ok(true);
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(GateError::Interrupted),
            _ = tokio::time::sleep(Duration::from_secs(secs)) => Ok(true),
        }
    }

    async fn run_ask_for_continue(&self, step: &mut Step) -> Result<bool, GateError> {
        // Replay re-enters the step, which asks again
        while self.suspend(step).await? {
            tracing::debug!(step = %step.name, "replay requested, asking again");
        }
        Ok(true)
    }

    async fn run_wait_async(&self, state: &mut ExecutionState) -> Result<bool, GateError> {
        self.join(state, JoinScope::All).await?;
        Ok(true)
    }

    /// Record every action of the step as not executed so references to
    /// them still resolve
    fn skip(&self, step: &Step, state: &mut ExecutionState) {
        tracing::debug!(step = %step.name, "step is switched off");
        self.events.send_event(ExecutionEvent::StepSkipped {
            step_name: step.name.clone(),
            reason: STEP_NOT_EXECUTABLE.to_string(),
        });

        for matrix_index in 0..state.matrices.len() {
            for action_index in state.matrices[matrix_index].step_actions(&step.name) {
                if !state.matrices[matrix_index].actions[action_index].is_finished() {
                    let outcome = ActionOutcome::not_executed(STEP_NOT_EXECUTABLE);
                    self.record(state, matrix_index, action_index, outcome);
                }
            }
        }
    }

    // =========================================================================
    // Actions
    // =========================================================================

    async fn run_actions(&self, step: &Step, state: &mut ExecutionState) -> Result<(), GateError> {
        for matrix_index in 0..state.matrices.len() {
            if self.config.failure_policy == MatrixFailurePolicy::SkipFailedMatrix
                && failed_before(&state.matrices[matrix_index], &step.name)
            {
                tracing::debug!(
                    matrix = %state.matrices[matrix_index].name,
                    step = %step.name,
                    "matrix failed earlier, skipping its actions"
                );
                continue;
            }

            for action_index in state.matrices[matrix_index].step_actions(&step.name) {
                if self.cancel.is_cancelled() {
                    return Err(GateError::Interrupted);
                }

                state.async_actions.drain();
                self.apply_completions(state);

                if state.matrices[matrix_index].actions[action_index].is_finished() {
                    continue;
                }
                self.run_action(step, state, matrix_index, action_index)
                    .await;
            }
        }
        Ok(())
    }

    async fn run_action(
        &self,
        step: &Step,
        state: &mut ExecutionState,
        matrix_index: usize,
        action_index: usize,
    ) {
        let matrix_name = state.matrices[matrix_index].name.clone();
        let action = state.matrices[matrix_index].actions[action_index].clone();

        if !action.executable {
            self.record(
                state,
                matrix_index,
                action_index,
                ActionOutcome::not_executed(ACTION_NOT_EXECUTABLE),
            );
            return;
        }

        self.events.send_event(ExecutionEvent::action_started(
            &matrix_name,
            &action.id,
            &action.action_type,
            &step.name,
        ));

        let inputs = match self.params.calculate(&state.context, &matrix_name, &action) {
            Ok(inputs) => inputs,
            Err(errors) => {
                let comment = params::describe(&errors);
                tracing::warn!(
                    matrix = %matrix_name,
                    action = %action.id,
                    "parameters not calculated: {}",
                    comment
                );
                let now = Utc::now();
                let outcome = ActionOutcome::failed(params::fail_reason(&errors), comment)
                    .with_timing(now, now);
                self.record(state, matrix_index, action_index, outcome);
                return;
            }
        };

        let ctx = ActionContext {
            matrix: matrix_name.clone(),
            action_id: action.id.clone(),
            action_type: action.action_type.clone(),
            step: step.name.clone(),
            inputs: inputs.clone(),
            cancel: self.cancel.clone(),
        };
        let handler = self.registry.get(&action.action_type);

        if action.is_async {
            state.async_actions.dispatch(
                handler,
                ctx,
                action.wait_async_end,
                action.wait_async_end_step.clone(),
                step.async_tracker.clone(),
            );
            self.events.send_event(ExecutionEvent::AsyncActionDispatched {
                matrix_name,
                action_id: action.id.clone(),
                step_name: step.name.clone(),
            });
            self.record(
                state,
                matrix_index,
                action_index,
                ActionOutcome::async_dispatched(inputs),
            );
        } else {
            let outcome = run_handler(handler, &ctx).await;
            self.record(state, matrix_index, action_index, outcome);
        }
    }

    fn record(
        &self,
        state: &mut ExecutionState,
        matrix_index: usize,
        action_index: usize,
        outcome: ActionOutcome,
    ) {
        let matrix = &mut state.matrices[matrix_index];
        let action_id = matrix.actions[action_index].id.clone();

        state.context.record(&matrix.name, &action_id, &outcome);

        if !outcome.async_pending {
            tracing::debug!(
                matrix = %matrix.name,
                action = %action_id,
                success = outcome.success,
                reason = outcome.fail_reason.as_str(),
                "action finished"
            );
            self.events.send_event(ExecutionEvent::action_completed(
                &matrix.name,
                &action_id,
                outcome.success,
                outcome.fail_reason,
                Duration::from_millis(outcome.duration_ms),
            ));
        }

        matrix.actions[action_index].outcome = Some(outcome);
        matrix.refresh_success();
    }

    // =========================================================================
    // Async joins and suspension
    // =========================================================================

    async fn join(&self, state: &mut ExecutionState, scope: JoinScope<'_>) -> Result<(), GateError> {
        let result = state.async_actions.join(scope).await;
        self.apply_completions(state);
        result
    }

    fn apply_completions(&self, state: &mut ExecutionState) {
        for completion in state.async_actions.take_ready() {
            let Some(matrix_index) = state
                .matrices
                .iter()
                .position(|m| m.name == completion.matrix)
            else {
                continue;
            };
            let Some(action_index) = state.matrices[matrix_index].action_index(&completion.action_id)
            else {
                continue;
            };

            // A replayed action may have been reset meanwhile
            let still_waiting = state.matrices[matrix_index].actions[action_index]
                .outcome
                .as_ref()
                .is_some_and(|o| o.async_pending);
            if !still_waiting {
                continue;
            }

            self.events.send_event(ExecutionEvent::AsyncActionCompleted {
                matrix_name: completion.matrix.clone(),
                action_id: completion.action_id.clone(),
                success: completion.outcome.success,
            });
            self.record(state, matrix_index, action_index, completion.outcome);
        }
    }

    /// Park on the gate. Returns true when a replay was requested.
    async fn suspend(&self, step: &mut Step) -> Result<bool, GateError> {
        step.status = StepStatus::Suspended;
        tracing::info!(step = %step.name, "waiting for operator");
        self.events.send_event(ExecutionEvent::StepSuspended {
            step_name: step.name.clone(),
        });

        let resumption = self.gate.request_suspend().await?;

        step.status = StepStatus::Running;
        tracing::info!(step = %step.name, replay = resumption.replay, "resumed");
        self.events.send_event(ExecutionEvent::StepResumed {
            step_name: step.name.clone(),
            replay: resumption.replay,
        });
        Ok(resumption.replay)
    }

    /// Clear failed actions of the step everywhere so the next pass runs them
    fn reset_failed(&self, step: &Step, state: &mut ExecutionState) {
        for matrix in &mut state.matrices {
            for action_id in matrix.reset_failed(&step.name) {
                state.context.clear(&matrix.name, &action_id);
                tracing::debug!(matrix = %matrix.name, action = %action_id, "action reset for replay");
            }
        }
    }
}

/// True if the matrix has a failed action in a step other than `step`
fn failed_before(matrix: &Matrix, step: &str) -> bool {
    matrix
        .step_success
        .iter()
        .any(|(name, ok)| name != step && !ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::events::progress_channel;
    use crate::model::{Action, FailReason, WaitAsyncEnd};
    use std::sync::Arc;

    struct Harness {
        registry: HandlerRegistry,
        params: ParamsCalculator,
        gate: Arc<SuspensionGate>,
        cancel: CancellationToken,
        config: EngineConfig,
        events: Option<ProgressSender>,
    }

    impl Harness {
        fn new(config: EngineConfig) -> Self {
            let cancel = CancellationToken::new();
            Self {
                registry: HandlerRegistry::with_builtins(),
                params: ParamsCalculator::from_config(&config),
                gate: Arc::new(SuspensionGate::new(cancel.clone())),
                cancel,
                config,
                events: None,
            }
        }

        fn executor(&self) -> StepExecutor<'_> {
            StepExecutor::new(
                &self.registry,
                &self.params,
                &self.gate,
                &self.cancel,
                &self.config,
                &self.events,
            )
        }

        fn state(&self, matrices: Vec<Matrix>) -> ExecutionState {
            ExecutionState::new(matrices, &self.config, self.cancel.clone())
        }
    }

    fn outcome<'s>(state: &'s ExecutionState, matrix: usize, id: &str) -> &'s ActionOutcome {
        state.matrices[matrix]
            .action(id)
            .and_then(|a| a.outcome.as_ref())
            .unwrap()
    }

    #[tokio::test]
    async fn test_default_step_runs_actions_in_order() {
        let harness = Harness::new(EngineConfig::default());
        let matrix = Matrix::new("m1")
            .with_action(Action::new("id1", "Step1", "SetStatic").with_param("Qty", "10"))
            .with_action(
                Action::new("id2", "Step1", "SetStatic").with_param("Total", "@{mul(id1.Qty, 2)}"),
            );
        let mut state = harness.state(vec![matrix]);
        let mut step = Step::new("Step1", StepKind::Default);

        harness.executor().execute(&mut step, 0, &mut state).await;

        assert_eq!(step.status, StepStatus::Completed);
        assert!(step.success);
        assert_eq!(outcome(&state, 0, "id2").outputs["Total"], "20");
    }

    #[tokio::test]
    async fn test_dependency_failure_only_fails_action() {
        let harness = Harness::new(EngineConfig::default());
        let matrix = Matrix::new("m1")
            .with_action(Action::new("id1", "Step1", "SetStatic").with_param("P", "@{later.X}"))
            .with_action(Action::new("id2", "Step1", "SetStatic").with_param("Q", "1"))
            .with_action(Action::new("later", "Step2", "SetStatic"));
        let mut state = harness.state(vec![matrix]);
        let mut step = Step::new("Step1", StepKind::Default);

        harness.executor().execute(&mut step, 0, &mut state).await;

        assert_eq!(step.status, StepStatus::Completed);
        assert!(!step.success);
        assert_eq!(outcome(&state, 0, "id1").fail_reason, FailReason::Dependency);
        assert!(outcome(&state, 0, "id2").success);
        assert!(!state.matrices[0].successful);
    }

    #[tokio::test]
    async fn test_not_executable_step_records_passed() {
        let harness = Harness::new(EngineConfig::default());
        let matrix = Matrix::new("m1").with_action(Action::new("id1", "Step1", "Fail"));
        let mut state = harness.state(vec![matrix]);
        let mut step = Step::new("Step1", StepKind::Default).with_execute(false);

        harness.executor().execute(&mut step, 0, &mut state).await;

        let recorded = outcome(&state, 0, "id1");
        assert!(recorded.success);
        assert_eq!(recorded.comment.as_deref(), Some("step is not executable"));
        assert!(step.success);
    }

    #[tokio::test]
    async fn test_sleep_parameter_handling() {
        let harness = Harness::new(EngineConfig::default());
        let mut state = harness.state(Vec::new());

        let mut step = Step::new("Pause", StepKind::Sleep).with_parameter("soon");
        let clock = Instant::now();
        harness.executor().execute(&mut step, 0, &mut state).await;
        assert_eq!(step.status, StepStatus::Completed);
        assert!(clock.elapsed() < Duration::from_millis(500));

        let mut step = Step::new("Pause", StepKind::Sleep);
        harness.executor().execute(&mut step, 0, &mut state).await;
        assert_eq!(step.status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_sleep_interrupted() {
        let harness = Harness::new(EngineConfig::default());
        let mut state = harness.state(Vec::new());
        let mut step = Step::new("Pause", StepKind::Sleep).with_parameter("30");

        let stopper = harness.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stopper.cancel();
        });

        harness.executor().execute(&mut step, 0, &mut state).await;
        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.error.as_deref(), Some("Execution was interrupted"));
    }

    #[tokio::test]
    async fn test_ask_if_failed_replay_reruns_failed_actions() {
        let harness = Harness::new(EngineConfig::default());
        let matrix = Matrix::new("m1")
            .with_action(Action::new("ok", "Step1", "SetStatic"))
            .with_action(
                Action::new("check", "Step1", "CompareValues")
                    .with_param("Expected", "1")
                    .with_param("Actual", "2"),
            );
        let mut state = harness.state(vec![matrix]);
        let mut step = Step::new("Step1", StepKind::Default).with_ask_if_failed(true);

        let gate = harness.gate.clone();
        let operator = tokio::spawn(async move {
            gate.suspended().await;
            gate.resume(true);
            // Wait for the second suspension after the rerun
            loop {
                tokio::time::sleep(Duration::from_millis(5)).await;
                if gate.is_suspended() {
                    break;
                }
            }
            gate.resume(false);
        });

        harness.executor().execute(&mut step, 0, &mut state).await;
        operator.await.unwrap();

        assert_eq!(step.status, StepStatus::Completed);
        assert!(!step.success);
        assert!(outcome(&state, 0, "ok").success);
        assert_eq!(outcome(&state, 0, "check").fail_reason, FailReason::Failed);
    }

    #[tokio::test]
    async fn test_async_actions_joined_at_step_end() {
        let harness = Harness::new(EngineConfig::default());
        let matrix = Matrix::new("m1").with_action(
            Action::new("bg", "Step1", "Sleep")
                .with_param("Millis", "10")
                .with_async(WaitAsyncEnd::Step),
        );
        let mut state = harness.state(vec![matrix]);
        let mut step = Step::new("Step1", StepKind::Default);

        harness.executor().execute(&mut step, 0, &mut state).await;

        assert!(!step.is_async());
        let recorded = outcome(&state, 0, "bg");
        assert!(!recorded.async_pending);
        assert_eq!(recorded.outputs["SleptMillis"], "10");
    }

    #[tokio::test]
    async fn test_scheduler_async_stays_pending_until_wait_step() {
        let harness = Harness::new(EngineConfig::default());
        let matrix = Matrix::new("m1").with_action(
            Action::new("bg", "Step1", "Sleep")
                .with_param("Millis", "10")
                .with_async(WaitAsyncEnd::Scheduler),
        );
        let mut state = harness.state(vec![matrix]);
        let mut step = Step::new("Step1", StepKind::Default);
        harness.executor().execute(&mut step, 0, &mut state).await;

        assert!(outcome(&state, 0, "bg").async_pending);

        let mut wait = Step::new("Wait", StepKind::WaitAsyncActions);
        harness.executor().execute(&mut wait, 1, &mut state).await;

        assert!(!step.is_async());
        assert!(!outcome(&state, 0, "bg").async_pending);
    }

    #[tokio::test]
    async fn test_skip_failed_matrix_policy() {
        let config = EngineConfig::default().with_failure_policy(MatrixFailurePolicy::SkipFailedMatrix);
        let harness = Harness::new(config);
        let failing = Matrix::new("bad")
            .with_action(Action::new("f", "Step1", "Fail"))
            .with_action(Action::new("next", "Step2", "SetStatic"));
        let passing = Matrix::new("good")
            .with_action(Action::new("a", "Step1", "SetStatic"))
            .with_action(Action::new("next", "Step2", "SetStatic"));
        let mut state = harness.state(vec![failing, passing]);

        let mut step1 = Step::new("Step1", StepKind::Default);
        let mut step2 = Step::new("Step2", StepKind::Default);
        harness.executor().execute(&mut step1, 0, &mut state).await;
        harness.executor().execute(&mut step2, 1, &mut state).await;

        assert!(state.matrices[0].action("next").unwrap().outcome.is_none());
        assert!(outcome(&state, 1, "next").success);
    }

    #[tokio::test]
    async fn test_events_emitted_for_step() {
        let mut harness = Harness::new(EngineConfig::default());
        let (tx, mut rx) = progress_channel();
        harness.events = Some(tx);

        let matrix = Matrix::new("m1").with_action(Action::new("id1", "Step1", "SetStatic"));
        let mut state = harness.state(vec![matrix]);
        let mut step = Step::new("Step1", StepKind::Default);
        harness.executor().execute(&mut step, 0, &mut state).await;

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                ExecutionEvent::StepStarted { .. } => "step_started",
                ExecutionEvent::ActionStarted { .. } => "action_started",
                ExecutionEvent::ActionCompleted { .. } => "action_completed",
                ExecutionEvent::StepCompleted { .. } => "step_completed",
                _ => "other",
            });
        }
        assert_eq!(
            kinds,
            vec!["step_started", "action_started", "action_completed", "step_completed"]
        );
    }
}
