// Matrices
// Named, ordered collections of actions with their success bookkeeping

use crate::model::action::Action;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_true() -> bool {
    true
}

/// A loaded test script
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Matrix {
    pub name: String,

    /// Named values available as bare identifiers in formulas
    #[serde(default)]
    pub constants: BTreeMap<String, String>,

    #[serde(default)]
    pub actions: Vec<Action>,

    #[serde(skip, default = "default_true")]
    pub successful: bool,

    #[serde(skip)]
    pub step_success: BTreeMap<String, bool>,
}

impl Matrix {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constants: BTreeMap::new(),
            actions: Vec::new(),
            successful: true,
            step_success: BTreeMap::new(),
        }
    }

    pub fn with_constant(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.constants.insert(name.into(), value.into());
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn action(&self, id: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.id == id)
    }

    pub fn action_index(&self, id: &str) -> Option<usize> {
        self.actions.iter().position(|a| a.id == id)
    }

    /// Indices of the actions assigned to `step`, in matrix order
    pub fn step_actions(&self, step: &str) -> Vec<usize> {
        self.actions
            .iter()
            .enumerate()
            .filter(|(_, a)| a.step == step)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn has_failures_in_step(&self, step: &str) -> bool {
        self.actions
            .iter()
            .any(|a| a.step == step && a.is_failed())
    }

    /// Clear the outcomes of the failed actions in `step` so they run again.
    /// Returns the ids that were reset.
    pub fn reset_failed(&mut self, step: &str) -> Vec<String> {
        let mut reset = Vec::new();
        for action in self.actions.iter_mut().filter(|a| a.step == step) {
            if action.is_failed() {
                action.outcome = None;
                reset.push(action.id.clone());
            }
        }
        self.refresh_success();
        reset
    }

    /// Recompute the matrix and per-step success flags from the recorded outcomes
    pub fn refresh_success(&mut self) {
        let mut step_success: BTreeMap<String, bool> = BTreeMap::new();
        for action in &self.actions {
            if let Some(outcome) = &action.outcome {
                let entry = step_success.entry(action.step.clone()).or_insert(true);
                *entry &= outcome.success;
            }
        }
        self.successful = step_success.values().all(|ok| *ok);
        self.step_success = step_success;
    }
}
