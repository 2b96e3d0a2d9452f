// Async Actions
// Bounded background execution of asynchronous actions and their join points

use crate::execution::gate::GateError;
use crate::execution::handler::{run_handler, ActionContext, ActionHandler};
use crate::model::{ActionOutcome, AsyncTracker, FailReason, WaitAsyncEnd};

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

/// Result of a finished async action, waiting to be applied
#[derive(Debug, Clone)]
pub struct AsyncCompletion {
    pub matrix: String,
    pub action_id: String,
    /// Step that dispatched the action
    pub step: String,
    pub outcome: ActionOutcome,
}

/// Which outstanding actions a join waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinScope<'a> {
    /// Actions whose `wait_async_end_step` names this step
    BeforeStep(&'a str),
    /// Actions with `WaitAsyncEnd::Step` dispatched by this step
    Step(&'a str),
    /// Everything still in flight
    All,
}

#[derive(Debug)]
struct PendingAsync {
    matrix: String,
    action_id: String,
    step: String,
    wait: WaitAsyncEnd,
    before_step: Option<String>,
}

impl PendingAsync {
    fn in_scope(&self, scope: JoinScope<'_>) -> bool {
        match scope {
            JoinScope::BeforeStep(step) => self.before_step.as_deref() == Some(step),
            JoinScope::Step(step) => {
                self.before_step.is_none()
                    && self.wait == WaitAsyncEnd::Step
                    && self.step == step
            }
            JoinScope::All => true,
        }
    }
}

/// Runs async actions on tokio tasks, at most `max_async_actions` at a time.
/// Completions come back over a channel and are handed out from the
/// execution task only.
#[derive(Debug)]
pub struct AsyncActionsManager {
    limiter: Arc<Semaphore>,
    tx: mpsc::UnboundedSender<AsyncCompletion>,
    rx: mpsc::UnboundedReceiver<AsyncCompletion>,
    pending: Vec<PendingAsync>,
    ready: Vec<AsyncCompletion>,
    cancel: CancellationToken,
}

impl AsyncActionsManager {
    pub fn new(max_async_actions: usize, cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            limiter: Arc::new(Semaphore::new(max_async_actions.max(1))),
            tx,
            rx,
            pending: Vec::new(),
            ready: Vec::new(),
            cancel,
        }
    }

    /// Spawn the action. `tracker` is incremented now and decremented by the
    /// worker as soon as the action finishes, before its completion is
    /// taken in.
    pub fn dispatch(
        &mut self,
        handler: Option<Arc<dyn ActionHandler>>,
        ctx: ActionContext,
        wait: WaitAsyncEnd,
        before_step: Option<String>,
        tracker: AsyncTracker,
    ) {
        tracker.increment();
        self.pending.push(PendingAsync {
            matrix: ctx.matrix.clone(),
            action_id: ctx.action_id.clone(),
            step: ctx.step.clone(),
            wait,
            before_step,
        });

        tracing::debug!(
            matrix = %ctx.matrix,
            action = %ctx.action_id,
            step = %ctx.step,
            "dispatching async action"
        );

        let limiter = self.limiter.clone();
        let tx = self.tx.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => interrupted(&ctx),
                permit = limiter.acquire_owned() => match permit {
                    Ok(_permit) => run_handler(handler, &ctx).await,
                    Err(_) => interrupted(&ctx),
                },
            };

            tracker.decrement();
            let _ = tx.send(AsyncCompletion {
                matrix: ctx.matrix,
                action_id: ctx.action_id,
                step: ctx.step,
                outcome,
            });
        });
    }

    /// Number of dispatched actions whose completion has not been taken in
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, matrix: &str, action_id: &str) -> bool {
        self.pending
            .iter()
            .any(|p| p.matrix == matrix && p.action_id == action_id)
    }

    /// Take in whatever has already finished, without waiting
    pub fn drain(&mut self) {
        while let Ok(completion) = self.rx.try_recv() {
            self.accept(completion);
        }
    }

    /// Wait until no outstanding action falls in `scope`. Completions
    /// received meanwhile are kept for `take_ready`, also on interruption.
    pub async fn join(&mut self, scope: JoinScope<'_>) -> Result<(), GateError> {
        self.drain();

        while self.pending.iter().any(|p| p.in_scope(scope)) {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(GateError::Interrupted),
                received = self.rx.recv() => match received {
                    Some(completion) => self.accept(completion),
                    None => break,
                },
            }
        }

        Ok(())
    }

    /// Completions taken in and not yet applied, in arrival order
    pub fn take_ready(&mut self) -> Vec<AsyncCompletion> {
        std::mem::take(&mut self.ready)
    }

    fn accept(&mut self, completion: AsyncCompletion) {
        if let Some(index) = self
            .pending
            .iter()
            .position(|p| p.matrix == completion.matrix && p.action_id == completion.action_id)
        {
            self.pending.remove(index);
        }
        self.ready.push(completion);
    }
}

fn interrupted(ctx: &ActionContext) -> ActionOutcome {
    let now = Utc::now();
    ActionOutcome::failed(FailReason::Interrupted, "Execution was interrupted")
        .with_inputs(ctx.inputs.clone())
        .with_timing(now, now)
}
