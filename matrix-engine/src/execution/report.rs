// Run Report
// Serializable summary of a finished scheduler run

use crate::model::{ActionOutcome, Matrix, Step, StepKind, StepStatus};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Final state of one step
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub name: String,
    pub kind: StepKind,
    pub status: StepStatus,
    pub success: bool,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Step> for StepReport {
    fn from(step: &Step) -> Self {
        Self {
            name: step.name.clone(),
            kind: step.kind,
            status: step.status,
            success: step.success,
            started: step.started,
            finished: step.finished,
            error: step.error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionReport {
    pub id: String,
    pub step: String,
    pub action_type: String,
    /// None when the action never ran
    pub outcome: Option<ActionOutcome>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatrixReport {
    pub name: String,
    pub successful: bool,
    pub actions: Vec<ActionReport>,
}

impl From<&Matrix> for MatrixReport {
    fn from(matrix: &Matrix) -> Self {
        Self {
            name: matrix.name.clone(),
            successful: matrix.successful,
            actions: matrix
                .actions
                .iter()
                .map(|a| ActionReport {
                    id: a.id.clone(),
                    step: a.step.clone(),
                    action_type: a.action_type.clone(),
                    outcome: a.outcome.clone(),
                })
                .collect(),
        }
    }
}

/// Result of `Scheduler::wait`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub scheduler: String,
    pub user: String,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub success: bool,
    /// The run was stopped before it finished
    pub interrupted: bool,
    pub steps: Vec<StepReport>,
    pub matrices: Vec<MatrixReport>,
}

impl RunReport {
    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn matrix(&self, name: &str) -> Option<&MatrixReport> {
        self.matrices.iter().find(|m| m.name == name)
    }

    pub fn outcome(&self, matrix: &str, action_id: &str) -> Option<&ActionOutcome> {
        self.matrix(matrix)?
            .actions
            .iter()
            .find(|a| a.id == action_id)?
            .outcome
            .as_ref()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, FailReason};

    fn report() -> RunReport {
        let mut matrix = Matrix::new("m1")
            .with_action(Action::new("id1", "Step1", "SetStatic"))
            .with_action(Action::new("id2", "Step1", "Fail"));
        matrix.actions[1].outcome = Some(ActionOutcome::failed(FailReason::Failed, "boom"));
        matrix.refresh_success();

        let mut step = Step::new("Step1", StepKind::Default);
        step.status = StepStatus::Completed;

        let now = Utc::now();
        RunReport {
            scheduler: "nightly".to_string(),
            user: "tester".to_string(),
            started: now,
            finished: now,
            success: false,
            interrupted: false,
            steps: vec![StepReport::from(&step)],
            matrices: vec![MatrixReport::from(&matrix)],
        }
    }

    #[test]
    fn test_lookup() {
        let report = report();
        assert!(report.step("Step1").is_some());
        assert!(report.outcome("m1", "id1").is_none());
        assert_eq!(
            report.outcome("m1", "id2").map(|o| o.fail_reason),
            Some(FailReason::Failed)
        );
        assert!(!report.matrix("m1").unwrap().successful);
    }

    #[test]
    fn test_json_shape() {
        let json = report().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["scheduler"], "nightly");
        assert_eq!(value["steps"][0]["status"], "completed");
        assert_eq!(value["matrices"][0]["actions"][1]["actionType"], "Fail");
        assert_eq!(
            value["matrices"][0]["actions"][1]["outcome"]["failReason"],
            "failed"
        );
        assert!(value["steps"][0].get("error").is_none());
    }
}
