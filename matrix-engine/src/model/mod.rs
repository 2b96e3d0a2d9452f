// Matrix Data Model
// Matrices, actions, steps, and formula values

pub mod action;
pub mod matrix;
pub mod step;
pub mod value;

pub use action::{Action, ActionOutcome, FailReason, WaitAsyncEnd};
pub use matrix::Matrix;
pub use step::{AsyncTracker, StartAtType, Step, StepKind, StepStatus};
pub use value::Value;
