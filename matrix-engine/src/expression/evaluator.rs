// Formula Evaluator
// Evaluates parsed formula bodies against action records and matrix constants

use crate::expression::functions::BuiltinFunctions;
use crate::expression::parser::{BinaryOp, Expr, ExprParser, UnaryOp};
use crate::model::Value;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// Evaluation error
#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    pub message: String,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evaluation error: {}", self.message)
    }
}

impl std::error::Error for EvalError {}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Names visible to a formula: sanitized action ids bound to their records,
/// and matrix constants
#[derive(Debug, Clone, Default)]
pub struct FormulaContext {
    pub variables: HashMap<String, Value>,
}

impl FormulaContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }
}

/// Formula evaluator
pub struct Evaluator<'a> {
    context: &'a FormulaContext,
    functions: BuiltinFunctions,
}

impl<'a> Evaluator<'a> {
    pub fn new(context: &'a FormulaContext) -> Self {
        Self {
            context,
            functions: BuiltinFunctions::new(),
        }
    }

    /// Parse and evaluate a formula body
    pub fn evaluate_str(&self, body: &str) -> Result<Value, EvalError> {
        let ast = ExprParser::parse_str(body)
            .map_err(|e| EvalError::new(format!("invalid expression '{}': {}", body, e)))?;
        self.eval(&ast)
    }

    /// Evaluate an expression
    pub fn eval(&self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::String(s) => Ok(Value::String(s.clone())),

            Expr::Variable(name) => self
                .context
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::new(format!("unknown identifier '{}'", name))),

            Expr::FunctionCall { name, args } => self.eval_function(name, args),

            Expr::Index { object, index } => index_value(&self.eval(object)?, &self.eval(index)?),

            Expr::Member { object, property } => member_value(&self.eval(object)?, property),

            Expr::Unary { op, expr } => {
                let operand = self.eval(expr)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!operand.is_truthy())),
                    UnaryOp::Neg => operand
                        .as_number()
                        .map(|n| Value::Number(-n))
                        .ok_or_else(|| {
                            EvalError::new(format!("cannot negate {}", operand.to_literal()))
                        }),
                }
            }

            Expr::Binary { op, left, right } => match op {
                BinaryOp::And | BinaryOp::Or => self.eval_logical(*op, left, right),
                _ => apply_binary(*op, &self.eval(left)?, &self.eval(right)?),
            },

            Expr::Ternary {
                condition,
                then_expr,
                else_expr,
            } => self.eval_branch(condition, then_expr, else_expr),

            Expr::Array(items) => items
                .iter()
                .map(|e| self.eval(e))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
        }
    }

    /// `&&` and `||` leave the right side unevaluated once the left decides
    fn eval_logical(&self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Value, EvalError> {
        let decided_by_left = matches!(op, BinaryOp::Or);
        if self.eval(left)?.is_truthy() == decided_by_left {
            return Ok(Value::Bool(decided_by_left));
        }
        Ok(Value::Bool(self.eval(right)?.is_truthy()))
    }

    fn eval_branch(&self, condition: &Expr, yes: &Expr, no: &Expr) -> Result<Value, EvalError> {
        if self.eval(condition)?.is_truthy() {
            self.eval(yes)
        } else {
            self.eval(no)
        }
    }

    fn eval_function(&self, name: &str, args: &[Expr]) -> Result<Value, EvalError> {
        // iif evaluates only the selected branch
        if let ("iif", [condition, yes, no]) = (name.to_ascii_lowercase().as_str(), args) {
            return self.eval_branch(condition, yes, no);
        }

        let values = args
            .iter()
            .map(|a| self.eval(a))
            .collect::<Result<Vec<_>, _>>()?;
        self.functions.call(name, values)
    }
}

fn position(index: &Value) -> Option<usize> {
    match index.as_number() {
        Some(n) if n >= 0.0 && n.fract() == 0.0 => Some(n as usize),
        _ => None,
    }
}

fn index_value(object: &Value, index: &Value) -> Result<Value, EvalError> {
    let found = match object {
        Value::Object(map) => {
            return Ok(map.get(&index.as_string()).cloned().unwrap_or(Value::Null));
        }
        Value::Array(items) => position(index).and_then(|i| items.get(i).cloned()),
        Value::String(s) => position(index)
            .and_then(|i| s.chars().nth(i))
            .map(|c| Value::String(c.to_string())),
        _ => {
            return Err(EvalError::new(format!(
                "{} cannot be indexed",
                object.to_literal()
            )))
        }
    };

    found.ok_or_else(|| {
        EvalError::new(format!(
            "index {} is out of range for {}",
            index.to_literal(),
            object.to_literal()
        ))
    })
}

fn member_value(object: &Value, property: &str) -> Result<Value, EvalError> {
    match (object, property) {
        (Value::Object(map), _) => Ok(map.get(property).cloned().unwrap_or(Value::Null)),
        (Value::Array(items), "length") => Ok(Value::Number(items.len() as f64)),
        (Value::String(s), "length") => Ok(Value::Number(s.chars().count() as f64)),
        _ => Err(EvalError::new(format!(
            "{} has no property '{}'",
            object.to_literal(),
            property
        ))),
    }
}

/// Binary operators on already evaluated operands
fn apply_binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(left, right))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(left, right))),
        BinaryOp::And => Ok(Value::Bool(left.is_truthy() && right.is_truthy())),
        BinaryOp::Or => Ok(Value::Bool(left.is_truthy() || right.is_truthy())),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(left, right).ok_or_else(|| {
                EvalError::new(format!(
                    "cannot compare {} {} {}",
                    left.to_literal(),
                    op,
                    right.to_literal()
                ))
            })?;
            let holds = match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Ok(Value::Bool(holds))
        }
        BinaryOp::Add if is_text(left) || is_text(right) => {
            Ok(Value::String(left.as_string() + &right.as_string()))
        }
        _ => arithmetic(op, left, right),
    }
}

fn is_text(value: &Value) -> bool {
    matches!(value, Value::String(_))
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let (Some(a), Some(b)) = (left.as_number(), right.as_number()) else {
        return Err(EvalError::new(format!(
            "operator '{}' needs numbers, got {} and {}",
            op,
            left.to_literal(),
            right.to_literal()
        )));
    };

    let result = match op {
        BinaryOp::Div | BinaryOp::Mod if b == 0.0 => {
            return Err(EvalError::new("division by zero"));
        }
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        _ => a + b,
    };
    Ok(Value::Number(result))
}

/// Numbers (including numeric strings) compare numerically, other strings
/// lexically
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (left, right) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        },
    }
}

/// Equality with number/string and bool/string coercion. String comparison
/// is case-sensitive.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, Value::String(s)) | (Value::String(s), Value::Null) => s.is_empty(),
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => (a - b).abs() < f64::EPSILON,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Number(a), Value::String(b)) | (Value::String(b), Value::Number(a)) => b
            .trim()
            .parse::<f64>()
            .map(|n| (a - n).abs() < f64::EPSILON)
            .unwrap_or(false),
        (Value::Bool(a), Value::String(b)) | (Value::String(b), Value::Bool(a)) => {
            b.eq_ignore_ascii_case(if *a { "true" } else { "false" })
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => a == b,
        _ => false,
    }
}
