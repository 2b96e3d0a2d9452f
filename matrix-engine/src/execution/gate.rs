// Suspension Gate
// Parks the execution task until an operator continues or replays

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Errors from waiting on the gate or on async joins
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum GateError {
    #[error("Execution was interrupted")]
    Interrupted,
}

/// How a suspension ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resumption {
    pub replay: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct GateState {
    suspended: bool,
    replay: bool,
    /// Bumped on every suspend and resume
    generation: u64,
}

/// Cross-task suspend/resume point. The suspended flag is checked and
/// awaited on the same watch channel, so a resume between the two cannot
/// be lost.
#[derive(Debug)]
pub struct SuspensionGate {
    state: watch::Sender<GateState>,
    cancel: CancellationToken,
}

impl SuspensionGate {
    pub fn new(cancel: CancellationToken) -> Self {
        let (state, _) = watch::channel(GateState::default());
        Self { state, cancel }
    }

    /// Suspend the calling task until `resume` is called or the run is
    /// cancelled
    pub async fn request_suspend(&self) -> Result<Resumption, GateError> {
        let mut rx = self.state.subscribe();
        self.state.send_modify(|s| {
            s.suspended = true;
            s.replay = false;
            s.generation += 1;
        });
        tracing::debug!("execution suspended");

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(GateError::Interrupted),
            changed = rx.wait_for(|s| !s.suspended) => match changed {
                Ok(state) => Ok(Resumption { replay: state.replay }),
                // The sender lives in self, so the channel cannot close here
                Err(_) => Err(GateError::Interrupted),
            },
        };

        if result.is_err() {
            self.state.send_modify(|s| {
                s.suspended = false;
                s.generation += 1;
            });
        }
        result
    }

    /// Wake the suspended task. Without a suspended task only the replay
    /// flag is recorded.
    pub fn resume(&self, replay: bool) {
        let woke = self.state.send_if_modified(|s| {
            let was_suspended = s.suspended;
            s.replay = replay;
            if was_suspended {
                s.suspended = false;
                s.generation += 1;
            }
            was_suspended
        });
        tracing::debug!(replay, woke, "resume requested");
    }

    pub fn is_suspended(&self) -> bool {
        self.state.borrow().suspended
    }

    pub fn is_replay_requested(&self) -> bool {
        self.state.borrow().replay
    }

    /// Number of suspend/resume transitions so far
    pub fn generation(&self) -> u64 {
        self.state.borrow().generation
    }

    /// Wait until the gate reports a suspended task
    pub async fn suspended(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| s.suspended).await;
    }
}
