// Action Units
// Executable matrix rows and the outcome recorded after they run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Where an asynchronous action is joined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WaitAsyncEnd {
    /// Never joined explicitly; picked up at the end of the run
    No,
    /// Joined when the step that dispatched it finishes
    #[default]
    Step,
    /// Joined when the whole run finishes
    Scheduler,
}

/// Why an action did not pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailReason {
    #[default]
    No,
    /// The handler reported a failed check
    Failed,
    /// A formula in the parameters could not be evaluated
    Calculation,
    /// A referenced action does not exist or has not completed
    Dependency,
    /// The run was stopped while the action was in flight
    Interrupted,
    /// The handler returned an error
    Exception,
}

impl FailReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailReason::No => "NO",
            FailReason::Failed => "FAILED",
            FailReason::Calculation => "CALCULATION",
            FailReason::Dependency => "DEPENDENCY",
            FailReason::Interrupted => "INTERRUPTED",
            FailReason::Exception => "EXCEPTION",
        }
    }
}

/// Result of running an action
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub success: bool,
    pub fail_reason: FailReason,
    pub comment: Option<String>,
    /// Parameter values after formula evaluation
    pub inputs: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, String>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    /// Dispatched asynchronously and not yet joined
    pub async_pending: bool,
}

impl ActionOutcome {
    pub fn passed(inputs: BTreeMap<String, String>, outputs: BTreeMap<String, String>) -> Self {
        Self {
            success: true,
            fail_reason: FailReason::No,
            comment: None,
            inputs,
            outputs,
            started: None,
            finished: None,
            duration_ms: 0,
            async_pending: false,
        }
    }

    pub fn failed(reason: FailReason, comment: impl Into<String>) -> Self {
        Self {
            success: false,
            fail_reason: reason,
            comment: Some(comment.into()),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            started: None,
            finished: None,
            duration_ms: 0,
            async_pending: false,
        }
    }

    /// Provisional outcome recorded while an async action is in flight
    pub fn async_dispatched(inputs: BTreeMap<String, String>) -> Self {
        Self {
            comment: Some("Action is executing asynchronously".to_string()),
            async_pending: true,
            ..Self::passed(inputs, BTreeMap::new())
        }
    }

    /// Outcome for actions that are switched off, so later references still resolve
    pub fn not_executed(comment: impl Into<String>) -> Self {
        Self {
            comment: Some(comment.into()),
            ..Self::passed(BTreeMap::new(), BTreeMap::new())
        }
    }

    pub fn with_inputs(mut self, inputs: BTreeMap<String, String>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_comment(mut self, comment: Option<String>) -> Self {
        self.comment = comment;
        self
    }

    pub fn with_timing(mut self, started: DateTime<Utc>, finished: DateTime<Utc>) -> Self {
        self.started = Some(started);
        self.finished = Some(finished);
        self.duration_ms = (finished - started).num_milliseconds().max(0) as u64;
        self
    }
}

fn default_true() -> bool {
    true
}

/// A single executable row of a matrix
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    /// Unique within its matrix; may start with a digit
    pub id: String,

    /// Name of the step this action belongs to
    pub step: String,

    /// Handler selector
    #[serde(rename = "type")]
    pub action_type: String,

    /// Raw parameter text, possibly carrying formulas
    #[serde(default, deserialize_with = "deserialize_params")]
    pub params: BTreeMap<String, String>,

    #[serde(default, rename = "async")]
    pub is_async: bool,

    #[serde(default)]
    pub wait_async_end: WaitAsyncEnd,

    /// Join this async action before the named step starts
    #[serde(default)]
    pub wait_async_end_step: Option<String>,

    #[serde(default = "default_true")]
    pub executable: bool,

    #[serde(default)]
    pub comment: Option<String>,

    #[serde(skip)]
    pub outcome: Option<ActionOutcome>,
}

impl Action {
    pub fn new(
        id: impl Into<String>,
        step: impl Into<String>,
        action_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            step: step.into(),
            action_type: action_type.into(),
            params: BTreeMap::new(),
            is_async: false,
            wait_async_end: WaitAsyncEnd::default(),
            wait_async_end_step: None,
            executable: true,
            comment: None,
            outcome: None,
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Run the action in the background, joined according to `wait`
    pub fn with_async(mut self, wait: WaitAsyncEnd) -> Self {
        self.is_async = true;
        self.wait_async_end = wait;
        self
    }

    /// Run the action in the background and join it before `step` starts
    pub fn with_wait_before_step(mut self, step: impl Into<String>) -> Self {
        self.is_async = true;
        self.wait_async_end_step = Some(step.into());
        self
    }

    pub fn with_executable(mut self, executable: bool) -> Self {
        self.executable = executable;
        self
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn is_failed(&self) -> bool {
        self.outcome.as_ref().is_some_and(|o| !o.success)
    }
}

/// Accept scalar YAML parameter values (numbers, booleans) as text
fn deserialize_params<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: BTreeMap<String, serde_yaml::Value> = BTreeMap::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(name, value)| {
            let text = match value {
                serde_yaml::Value::Null => String::new(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::String(s) => s,
                other => {
                    return Err(serde::de::Error::custom(format!(
                        "parameter '{}' must be a scalar, found {:?}",
                        name, other
                    )))
                }
            };
            Ok((name, text))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_builder() {
        let action = Action::new("id1", "Step1", "SetStatic")
            .with_param("Qty", "10")
            .with_async(WaitAsyncEnd::Scheduler);

        assert_eq!(action.params.get("Qty"), Some(&"10".to_string()));
        assert!(action.is_async);
        assert_eq!(action.wait_async_end, WaitAsyncEnd::Scheduler);
        assert!(action.executable);
        assert!(!action.is_finished());
    }

    #[test]
    fn test_action_deserialize_scalar_params() {
        let yaml = r#"
id: id1
step: Step1
type: SetStatic
async: true
waitAsyncEnd: scheduler
params:
  Qty: 10
  Price: 12.5
  Flag: true
  Name: abc
"#;
        let action: Action = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(action.params["Qty"], "10");
        assert_eq!(action.params["Price"], "12.5");
        assert_eq!(action.params["Flag"], "true");
        assert_eq!(action.params["Name"], "abc");
        assert!(action.is_async);
        assert_eq!(action.wait_async_end, WaitAsyncEnd::Scheduler);
    }

    #[test]
    fn test_outcome_timing() {
        let started = Utc::now();
        let finished = started + chrono::Duration::milliseconds(250);
        let outcome = ActionOutcome::passed(BTreeMap::new(), BTreeMap::new())
            .with_timing(started, finished);

        assert_eq!(outcome.duration_ms, 250);
        assert!(outcome.success);
        assert_eq!(outcome.fail_reason, FailReason::No);
    }

    #[test]
    fn test_async_dispatched_outcome() {
        let outcome = ActionOutcome::async_dispatched(BTreeMap::new());
        assert!(outcome.success);
        assert!(outcome.async_pending);
    }
}
