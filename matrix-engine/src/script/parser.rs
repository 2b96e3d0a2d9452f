// Run Script Parser
// Loads steps and matrices from YAML and checks that they form a runnable plan

use crate::error::{EngineError, EngineResult};
use crate::model::{Matrix, Step};
use crate::script::error::{ParseError, ParseResult, ValidationError};

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

/// A scheduler run as written in a script file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunScript {
    #[serde(default)]
    pub name: String,

    pub steps: Vec<Step>,

    #[serde(default)]
    pub matrices: Vec<Matrix>,
}

impl RunScript {
    /// Parse and validate a script file
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let script = ScriptParser::parse_file(path)?;
        ScriptValidator::validate(&script).map_err(EngineError::Validation)?;
        Ok(script)
    }
}

/// YAML run script parser
pub struct ScriptParser;

impl ScriptParser {
    /// Parse a script from a YAML string
    pub fn parse(content: &str) -> ParseResult<RunScript> {
        let script: RunScript =
            serde_yaml::from_str(content).map_err(|e| ParseError::from_yaml_error(&e, content))?;

        Ok(script)
    }

    /// Parse a script from a file
    pub fn parse_file(path: impl AsRef<Path>) -> ParseResult<RunScript> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ParseError::io_error(format!("failed to read '{}': {}", path.display(), e))
        })?;

        Self::parse(&content)
    }
}

/// Semantic checks on a parsed script
pub struct ScriptValidator;

impl ScriptValidator {
    pub fn validate(script: &RunScript) -> Result<(), Vec<ValidationError>> {
        Self::validate_plan(&script.steps, &script.matrices)
    }

    /// Check that steps and matrices fit together
    pub fn validate_plan(steps: &[Step], matrices: &[Matrix]) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if steps.is_empty() {
            errors.push(
                ValidationError::new("script must define at least one step", "steps")
                    .with_suggestion("add 'steps:' with at least one '- name: ...' entry"),
            );
        }

        // Step name -> position
        let mut positions: HashMap<&str, usize> = HashMap::new();
        for (i, step) in steps.iter().enumerate() {
            let path = format!("steps[{}]", i);
            if step.name.trim().is_empty() {
                errors.push(ValidationError::new("step name must not be empty", path));
            } else if positions.insert(step.name.as_str(), i).is_some() {
                errors.push(ValidationError::new(
                    format!("duplicate step name '{}'", step.name),
                    path,
                ));
            }
        }

        let mut matrix_names = HashSet::new();
        for (i, matrix) in matrices.iter().enumerate() {
            let path = format!("matrices[{}]", i);
            if !matrix_names.insert(matrix.name.as_str()) {
                errors.push(ValidationError::new(
                    format!("duplicate matrix name '{}'", matrix.name),
                    path.clone(),
                ));
            }
            Self::validate_matrix(matrix, steps, &positions, &path, &mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_matrix(
        matrix: &Matrix,
        steps: &[Step],
        positions: &HashMap<&str, usize>,
        path: &str,
        errors: &mut Vec<ValidationError>,
    ) {
        let mut ids = HashSet::new();

        for (i, action) in matrix.actions.iter().enumerate() {
            let path = format!("{}.actions[{}]", path, i);

            if action.id.trim().is_empty() {
                errors.push(ValidationError::new("action id must not be empty", path.clone()));
            } else if !ids.insert(action.id.as_str()) {
                errors.push(ValidationError::new(
                    format!("duplicate action id '{}' in matrix '{}'", action.id, matrix.name),
                    path.clone(),
                ));
            }

            let Some(&position) = positions.get(action.step.as_str()) else {
                let mut error = ValidationError::new(
                    format!("action '{}' refers to unknown step '{}'", action.id, action.step),
                    path.clone(),
                );
                if let Some(similar) = similar_step(steps, &action.step) {
                    error = error.with_suggestion(format!("did you mean '{}'?", similar));
                }
                errors.push(error);
                continue;
            };

            if steps[position].kind.is_control() {
                errors.push(
                    ValidationError::new(
                        format!(
                            "action '{}' is assigned to control step '{}'",
                            action.id, action.step
                        ),
                        path.clone(),
                    )
                    .with_suggestion("assign the action to a step of kind 'default'"),
                );
            }

            if let Some(wait_step) = &action.wait_async_end_step {
                if !action.is_async {
                    errors.push(
                        ValidationError::new(
                            format!(
                                "action '{}' sets waitAsyncEndStep but is not async",
                                action.id
                            ),
                            path.clone(),
                        )
                        .with_suggestion("add 'async: true' to the action"),
                    );
                }

                match positions.get(wait_step.as_str()) {
                    None => errors.push(ValidationError::new(
                        format!(
                            "action '{}' waits before unknown step '{}'",
                            action.id, wait_step
                        ),
                        path.clone(),
                    )),
                    Some(&wait_position) if wait_position <= position => {
                        errors.push(ValidationError::new(
                            format!(
                                "action '{}' waits before step '{}' which does not come after '{}'",
                                action.id, wait_step, action.step
                            ),
                            path.clone(),
                        ))
                    }
                    Some(_) => {}
                }
            }
        }
    }
}

fn similar_step<'a>(steps: &'a [Step], name: &str) -> Option<&'a str> {
    steps
        .iter()
        .find(|s| s.name.eq_ignore_ascii_case(name.trim()))
        .map(|s| s.name.as_str())
}
