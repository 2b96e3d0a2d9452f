// Runtime Execution Context
// Records completed actions per matrix and binds them for formula evaluation

use crate::expression::{FormulaContext, IdSanitizer};
use crate::model::{ActionOutcome, FailReason, Matrix, Value};

use std::collections::{BTreeMap, HashMap, HashSet};

/// What the context knows about an action id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    /// No action with this id in the matrix
    Unknown,
    /// The action exists but has not run yet
    NotCompleted,
    /// Dispatched asynchronously and not finished
    Pending,
    Completed,
}

/// Values an action left behind for later formulas
#[derive(Debug, Clone, Default)]
pub struct ActionRecord {
    pub inputs: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, String>,
    pub passed: bool,
    pub fail_reason: FailReason,
    pub comment: Option<String>,
}

impl ActionRecord {
    pub fn from_outcome(outcome: &ActionOutcome) -> Self {
        Self {
            inputs: outcome.inputs.clone(),
            outputs: outcome.outputs.clone(),
            passed: outcome.success,
            fail_reason: outcome.fail_reason,
            comment: outcome.comment.clone(),
        }
    }

    /// Formula binding: inputs overlaid with outputs, plus the `in`, `out`
    /// and `action` views
    pub fn to_value(&self) -> Value {
        let mut map: HashMap<String, Value> = self
            .inputs
            .iter()
            .chain(self.outputs.iter())
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        map.insert("in".to_string(), string_map(&self.inputs));
        map.insert("out".to_string(), string_map(&self.outputs));

        let mut meta = HashMap::new();
        meta.insert("passed".to_string(), Value::Bool(self.passed));
        meta.insert(
            "failReason".to_string(),
            Value::String(self.fail_reason.as_str().to_string()),
        );
        meta.insert(
            "comment".to_string(),
            Value::String(self.comment.clone().unwrap_or_default()),
        );
        map.insert("action".to_string(), Value::Object(meta));

        Value::Object(map)
    }
}

fn string_map(values: &BTreeMap<String, String>) -> Value {
    Value::Object(
        values
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

/// Per-matrix state
#[derive(Debug, Clone, Default)]
struct MatrixRecords {
    ids: HashSet<String>,
    constants: BTreeMap<String, String>,
    sanitizer: IdSanitizer,
    records: HashMap<String, ActionRecord>,
    pending: HashSet<String>,
}

/// Runtime context during a scheduler run
#[derive(Debug, Clone, Default)]
pub struct RuntimeContext {
    matrices: HashMap<String, MatrixRecords>,
}

impl RuntimeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context knowing the ids and constants of `matrices`. Actions
    /// that already carry an outcome are recorded.
    pub fn from_matrices(matrices: &[Matrix]) -> Self {
        let mut ctx = Self::new();
        for matrix in matrices {
            ctx.register_matrix(matrix);
        }
        ctx
    }

    pub fn register_matrix(&mut self, matrix: &Matrix) {
        let ids: HashSet<String> = matrix.actions.iter().map(|a| a.id.clone()).collect();
        let sanitizer = IdSanitizer::new(matrix.actions.iter().map(|a| a.id.as_str()));

        let mut records = MatrixRecords {
            ids,
            constants: matrix.constants.clone(),
            sanitizer,
            ..Default::default()
        };

        for action in &matrix.actions {
            if let Some(outcome) = &action.outcome {
                records
                    .records
                    .insert(action.id.clone(), ActionRecord::from_outcome(outcome));
                if outcome.async_pending {
                    records.pending.insert(action.id.clone());
                }
            }
        }

        self.matrices.insert(matrix.name.clone(), records);
    }

    /// Record an outcome. A provisional async outcome marks the action pending.
    pub fn record(&mut self, matrix: &str, action_id: &str, outcome: &ActionOutcome) {
        let Some(records) = self.matrices.get_mut(matrix) else {
            return;
        };

        records
            .records
            .insert(action_id.to_string(), ActionRecord::from_outcome(outcome));
        if outcome.async_pending {
            records.pending.insert(action_id.to_string());
        } else {
            records.pending.remove(action_id);
        }
    }

    /// Forget an action so it can run again
    pub fn clear(&mut self, matrix: &str, action_id: &str) {
        if let Some(records) = self.matrices.get_mut(matrix) {
            records.records.remove(action_id);
            records.pending.remove(action_id);
        }
    }

    pub fn status(&self, matrix: &str, action_id: &str) -> ActionStatus {
        let Some(records) = self.matrices.get(matrix) else {
            return ActionStatus::Unknown;
        };

        if !records.ids.contains(action_id) {
            ActionStatus::Unknown
        } else if records.pending.contains(action_id) {
            ActionStatus::Pending
        } else if records.records.contains_key(action_id) {
            ActionStatus::Completed
        } else {
            ActionStatus::NotCompleted
        }
    }

    pub fn record_of(&self, matrix: &str, action_id: &str) -> Option<&ActionRecord> {
        self.matrices.get(matrix)?.records.get(action_id)
    }

    pub fn is_constant(&self, matrix: &str, name: &str) -> bool {
        self.matrices
            .get(matrix)
            .is_some_and(|m| m.constants.contains_key(name))
    }

    pub fn sanitizer(&self, matrix: &str) -> Option<&IdSanitizer> {
        self.matrices.get(matrix).map(|m| &m.sanitizer)
    }

    /// Names visible to formulas of `matrix`: constants first, then completed
    /// actions under their sanitized ids
    pub fn formula_context(&self, matrix: &str) -> FormulaContext {
        let mut ctx = FormulaContext::new();
        let Some(records) = self.matrices.get(matrix) else {
            return ctx;
        };

        for (name, value) in &records.constants {
            ctx.set(name.clone(), Value::String(value.clone()));
        }
        for (id, record) in &records.records {
            ctx.set(records.sanitizer.sanitize(id).to_string(), record.to_value());
        }

        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::Evaluator;
    use crate::model::Action;

    fn matrix() -> Matrix {
        Matrix::new("m1")
            .with_constant("Market", "XLON")
            .with_action(Action::new("id1", "Step1", "SetStatic"))
            .with_action(Action::new("12", "Step1", "SetStatic"))
    }

    fn outcome(inputs: &[(&str, &str)], outputs: &[(&str, &str)]) -> ActionOutcome {
        let to_map = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>()
        };
        ActionOutcome::passed(to_map(inputs), to_map(outputs))
    }

    #[test]
    fn test_status_transitions() {
        let mut ctx = RuntimeContext::from_matrices(&[matrix()]);

        assert_eq!(ctx.status("m1", "id1"), ActionStatus::NotCompleted);
        assert_eq!(ctx.status("m1", "nope"), ActionStatus::Unknown);
        assert_eq!(ctx.status("m2", "id1"), ActionStatus::Unknown);

        ctx.record("m1", "id1", &ActionOutcome::async_dispatched(BTreeMap::new()));
        assert_eq!(ctx.status("m1", "id1"), ActionStatus::Pending);

        ctx.record("m1", "id1", &outcome(&[], &[]));
        assert_eq!(ctx.status("m1", "id1"), ActionStatus::Completed);

        ctx.clear("m1", "id1");
        assert_eq!(ctx.status("m1", "id1"), ActionStatus::NotCompleted);
    }

    #[test]
    fn test_formula_binding_views() {
        let mut ctx = RuntimeContext::from_matrices(&[matrix()]);
        ctx.record(
            "m1",
            "id1",
            &outcome(&[("Qty", "10"), ("Price", "1")], &[("Price", "2")]),
        );

        let formula_ctx = ctx.formula_context("m1");
        let eval = |body: &str| Evaluator::new(&formula_ctx).evaluate_str(body).unwrap();

        assert_eq!(eval("id1.Qty"), Value::from("10"));
        assert_eq!(eval("id1.Price"), Value::from("2"));
        assert_eq!(eval("id1.in.Price"), Value::from("1"));
        assert_eq!(eval("id1.out.Price"), Value::from("2"));
        assert_eq!(eval("id1.action.passed"), Value::Bool(true));
        assert_eq!(eval("id1.action.failReason"), Value::from("NO"));
        assert_eq!(eval("Market"), Value::from("XLON"));
    }

    #[test]
    fn test_digit_leading_id_bound_sanitized() {
        let mut ctx = RuntimeContext::from_matrices(&[matrix()]);
        ctx.record("m1", "12", &outcome(&[], &[("Side", "BUY")]));

        let formula_ctx = ctx.formula_context("m1");
        assert!(formula_ctx.get("_id12").is_some());
        assert!(formula_ctx.get("12").is_none());
        assert_eq!(ctx.sanitizer("m1").unwrap().sanitize("12"), "_id12");
    }

    #[test]
    fn test_failed_action_meta() {
        let mut ctx = RuntimeContext::from_matrices(&[matrix()]);
        ctx.record(
            "m1",
            "id1",
            &ActionOutcome::failed(FailReason::Calculation, "bad formula"),
        );

        let record = ctx.record_of("m1", "id1").unwrap();
        assert!(!record.passed);
        assert_eq!(record.fail_reason, FailReason::Calculation);
        assert_eq!(ctx.status("m1", "id1"), ActionStatus::Completed);
    }

    #[test]
    fn test_existing_outcomes_registered() {
        let mut m = matrix();
        m.actions[0].outcome = Some(outcome(&[("Qty", "1")], &[]));

        let ctx = RuntimeContext::from_matrices(&[m]);
        assert_eq!(ctx.status("m1", "id1"), ActionStatus::Completed);
        assert!(ctx.is_constant("m1", "Market"));
    }
}
