// Engine Configuration
// Settings for formula markers, async concurrency, and failure propagation

use crate::error::{EngineError, EngineResult};
use crate::expression::{FormulaDelimiters, FORMULA_END, FORMULA_START, MAX_FORMULA_ITERATIONS};

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default number of async actions allowed to run at once
pub const DEFAULT_MAX_ASYNC_ACTIONS: usize = 16;

/// How an action failure in one matrix affects the rest of the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatrixFailurePolicy {
    /// Failures only mark the failing matrix; everything keeps running
    #[default]
    ContinueAll,
    /// A failed matrix skips its actions in later steps
    SkipFailedMatrix,
    /// Any failure stops the run after the current step
    StopRun,
}

/// Engine configuration, usually loaded from YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Marker opening a formula in parameter text
    pub formula_start: String,

    /// Marker closing a formula
    pub formula_end: String,

    /// Upper bound on concurrently running async actions
    pub max_async_actions: usize,

    pub failure_policy: MatrixFailurePolicy,

    /// Upper bound on formula evaluations per parameter
    pub max_formula_iterations: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            formula_start: FORMULA_START.to_string(),
            formula_end: FORMULA_END.to_string(),
            max_async_actions: DEFAULT_MAX_ASYNC_ACTIONS,
            failure_policy: MatrixFailurePolicy::default(),
            max_formula_iterations: MAX_FORMULA_ITERATIONS,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_policy(mut self, policy: MatrixFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_max_async_actions(mut self, max: usize) -> Self {
        self.max_async_actions = max;
        self
    }

    pub fn with_delimiters(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.formula_start = start.into();
        self.formula_end = end.into();
        self
    }

    /// Parse and validate a YAML configuration
    pub fn from_yaml_str(content: &str) -> EngineResult<Self> {
        let config: EngineConfig = serde_yaml::from_str(content)
            .map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.formula_start.is_empty() || self.formula_end.is_empty() {
            return Err(EngineError::Config(
                "formula markers must not be empty".to_string(),
            ));
        }
        if self.formula_start == self.formula_end {
            return Err(EngineError::Config(format!(
                "formula start and end markers must differ, both are '{}'",
                self.formula_start
            )));
        }
        if self.max_async_actions == 0 {
            return Err(EngineError::Config(
                "maxAsyncActions must be at least 1".to_string(),
            ));
        }
        if self.max_formula_iterations == 0 {
            return Err(EngineError::Config(
                "maxFormulaIterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn delimiters(&self) -> FormulaDelimiters {
        FormulaDelimiters::new(self.formula_start.clone(), self.formula_end.clone())
    }
}
