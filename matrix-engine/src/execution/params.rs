// Action Parameter Calculation
// Checks formula dependencies and evaluates raw parameters into inputs

use crate::config::EngineConfig;
use crate::execution::context::{ActionStatus, RuntimeContext};
use crate::expression::{CalcError, FormulaCalculator, IdSanitizer, ReferenceScanner};
use crate::model::{Action, FailReason};

use std::collections::BTreeMap;
use thiserror::Error;

/// A formula references an action that cannot supply a value
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DependencyError {
    #[error("parameter '{param}' refers to action '{action_id}' which does not exist")]
    UnknownAction { param: String, action_id: String },

    #[error("parameter '{param}' refers to action '{action_id}' which is not completed")]
    Unresolved {
        param: String,
        action_id: String,
        pending: bool,
    },
}

/// Why a parameter could not be calculated
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParamError {
    #[error(transparent)]
    Dependency(#[from] DependencyError),

    #[error("error in parameter '{param}': {source}")]
    Calculation { param: String, source: CalcError },
}

impl ParamError {
    pub fn is_dependency(&self) -> bool {
        matches!(self, ParamError::Dependency(_))
    }
}

/// Fail reason for a set of parameter errors: dependency problems win
pub fn fail_reason(errors: &[ParamError]) -> FailReason {
    if errors.iter().any(ParamError::is_dependency) {
        FailReason::Dependency
    } else {
        FailReason::Calculation
    }
}

/// One line per error, for the action comment
pub fn describe(errors: &[ParamError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Turns raw action parameters into the inputs handed to the handler
#[derive(Debug, Clone, Default)]
pub struct ParamsCalculator {
    scanner: ReferenceScanner,
    calculator: FormulaCalculator,
}

impl ParamsCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let delimiters = config.delimiters();
        Self {
            scanner: ReferenceScanner::with_delimiters(delimiters.clone()),
            calculator: FormulaCalculator::new()
                .with_delimiters(delimiters)
                .with_max_iterations(config.max_formula_iterations),
        }
    }

    /// Calculate every parameter of `action`. Parameters without formulas
    /// pass through unchanged. All errors are collected.
    pub fn calculate(
        &self,
        ctx: &RuntimeContext,
        matrix: &str,
        action: &Action,
    ) -> Result<BTreeMap<String, String>, Vec<ParamError>> {
        let mut inputs = BTreeMap::new();
        let mut errors = Vec::new();
        let mut formula_ctx = None;
        let fallback = IdSanitizer::default();
        let sanitizer = ctx.sanitizer(matrix).unwrap_or(&fallback);

        for (name, raw) in &action.params {
            if !self.calculator.has_formula(raw) {
                inputs.insert(name.clone(), raw.clone());
                continue;
            }

            let dependency_errors = self.check_dependencies(ctx, matrix, name, raw);
            if !dependency_errors.is_empty() {
                errors.extend(dependency_errors.into_iter().map(ParamError::from));
                continue;
            }

            let bindings = formula_ctx.get_or_insert_with(|| ctx.formula_context(matrix));
            match self.calculator.calculate(raw, bindings, sanitizer) {
                Ok(value) => {
                    inputs.insert(name.clone(), value);
                }
                Err(source) => errors.push(ParamError::Calculation {
                    param: name.clone(),
                    source,
                }),
            }
        }

        if errors.is_empty() {
            Ok(inputs)
        } else {
            Err(errors)
        }
    }

    /// Check that every action referenced by `raw` has completed
    pub fn check_dependencies(
        &self,
        ctx: &RuntimeContext,
        matrix: &str,
        param: &str,
        raw: &str,
    ) -> Vec<DependencyError> {
        let scan = self.scanner.scan(raw);
        let mut errors: Vec<DependencyError> = Vec::new();

        for reference in scan.references {
            let action_id = reference.action_id;
            if errors.iter().any(|e| dependency_action(e) == action_id) {
                continue;
            }

            match ctx.status(matrix, &action_id) {
                ActionStatus::Completed => {}
                ActionStatus::Unknown => {
                    // Members of constants look like references
                    if !ctx.is_constant(matrix, &action_id) {
                        errors.push(DependencyError::UnknownAction {
                            param: param.to_string(),
                            action_id,
                        });
                    }
                }
                status => errors.push(DependencyError::Unresolved {
                    param: param.to_string(),
                    action_id,
                    pending: status == ActionStatus::Pending,
                }),
            }
        }

        errors
    }
}

fn dependency_action(error: &DependencyError) -> &str {
    match error {
        DependencyError::UnknownAction { action_id, .. }
        | DependencyError::Unresolved { action_id, .. } => action_id,
    }
}
