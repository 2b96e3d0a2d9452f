// Action Handlers
// Pluggable action implementations selected by action type

use crate::model::{ActionOutcome, FailReason};

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors returned by action handlers
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Missing required parameter '{0}'")]
    MissingParam(String),

    #[error("Invalid value '{value}' for parameter '{name}': {message}")]
    InvalidParam {
        name: String,
        value: String,
        message: String,
    },

    #[error("Action was interrupted")]
    Interrupted,

    #[error("{0}")]
    Execution(String),
}

/// Everything a handler gets to see about the action it runs
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub matrix: String,
    pub action_id: String,
    pub action_type: String,
    pub step: String,
    /// Parameters after formula evaluation
    pub inputs: BTreeMap<String, String>,
    /// Fires when the run is stopped
    pub cancel: CancellationToken,
}

impl ActionContext {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.inputs.get(name).map(String::as_str)
    }

    pub fn require(&self, name: &str) -> Result<&str, HandlerError> {
        self.param(name)
            .ok_or_else(|| HandlerError::MissingParam(name.to_string()))
    }
}

/// What a handler reports back
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerOutput {
    pub success: bool,
    pub outputs: BTreeMap<String, String>,
    pub comment: Option<String>,
}

impl HandlerOutput {
    pub fn passed() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(comment: impl Into<String>) -> Self {
        Self {
            success: false,
            outputs: BTreeMap::new(),
            comment: Some(comment.into()),
        }
    }

    pub fn with_output(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.insert(name.into(), value.into());
        self
    }

    pub fn with_outputs(mut self, outputs: BTreeMap<String, String>) -> Self {
        self.outputs = outputs;
        self
    }
}

/// Trait for action implementations
#[async_trait::async_trait]
pub trait ActionHandler: Send + Sync {
    /// Execute the action and return its outputs
    async fn execute(&self, ctx: &ActionContext) -> Result<HandlerOutput, HandlerError>;
}

/// Handler registry keyed by action type (case-insensitive)
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in handlers
    pub fn with_builtins() -> Self {
        Self::new()
            .with_handler("SetStatic", SetStaticHandler)
            .with_handler("CompareValues", CompareValuesHandler)
            .with_handler("Sleep", SleepHandler)
            .with_handler("Fail", FailHandler)
    }

    pub fn register(&mut self, action_type: &str, handler: impl ActionHandler + 'static) {
        self.handlers
            .insert(action_type.to_lowercase(), Arc::new(handler));
    }

    pub fn with_handler(
        mut self,
        action_type: &str,
        handler: impl ActionHandler + 'static,
    ) -> Self {
        self.register(action_type, handler);
        self
    }

    pub fn get(&self, action_type: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(&action_type.to_lowercase()).cloned()
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.handlers.contains_key(&action_type.to_lowercase())
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("HandlerRegistry")
            .field("types", &types)
            .finish()
    }
}

/// Run `handler` and turn its result into an outcome. Handler errors become
/// failures of this action and never propagate.
pub async fn run_handler(
    handler: Option<Arc<dyn ActionHandler>>,
    ctx: &ActionContext,
) -> ActionOutcome {
    let started = Utc::now();

    let outcome = match handler {
        None => ActionOutcome::failed(
            FailReason::Exception,
            format!("No handler registered for action type '{}'", ctx.action_type),
        ),
        Some(handler) => match handler.execute(ctx).await {
            Ok(output) if output.success => {
                ActionOutcome::passed(ctx.inputs.clone(), output.outputs)
                    .with_comment(output.comment)
            }
            Ok(output) => ActionOutcome {
                outputs: output.outputs,
                ..ActionOutcome::failed(
                    FailReason::Failed,
                    output.comment.unwrap_or_else(|| "Action failed".to_string()),
                )
            },
            Err(HandlerError::Interrupted) => {
                ActionOutcome::failed(FailReason::Interrupted, HandlerError::Interrupted.to_string())
            }
            Err(e) => ActionOutcome::failed(FailReason::Exception, e.to_string()),
        },
    };

    outcome
        .with_inputs(ctx.inputs.clone())
        .with_timing(started, Utc::now())
}

// =============================================================================
// Built-in Handlers
// =============================================================================

/// Copies its inputs to its outputs
#[derive(Debug, Clone, Copy, Default)]
pub struct SetStaticHandler;

#[async_trait::async_trait]
impl ActionHandler for SetStaticHandler {
    async fn execute(&self, ctx: &ActionContext) -> Result<HandlerOutput, HandlerError> {
        Ok(HandlerOutput::passed().with_outputs(ctx.inputs.clone()))
    }
}

/// Passes when `Expected` equals `Actual`
#[derive(Debug, Clone, Copy, Default)]
pub struct CompareValuesHandler;

#[async_trait::async_trait]
impl ActionHandler for CompareValuesHandler {
    async fn execute(&self, ctx: &ActionContext) -> Result<HandlerOutput, HandlerError> {
        let expected = ctx.require("Expected")?;
        let actual = ctx.require("Actual")?;

        if expected == actual {
            Ok(HandlerOutput::passed().with_output("Actual", actual))
        } else {
            Ok(HandlerOutput::failed(format!(
                "Expected '{}', actual '{}'",
                expected, actual
            ))
            .with_output("Actual", actual))
        }
    }
}

/// Waits for `Seconds` or `Millis`, interrupted by a stop
#[derive(Debug, Clone, Copy, Default)]
pub struct SleepHandler;

#[async_trait::async_trait]
impl ActionHandler for SleepHandler {
    async fn execute(&self, ctx: &ActionContext) -> Result<HandlerOutput, HandlerError> {
        let duration = match (ctx.param("Millis"), ctx.param("Seconds")) {
            (Some(millis), _) => Duration::from_millis(parse_u64("Millis", millis)?),
            (None, Some(secs)) => Duration::from_secs(parse_u64("Seconds", secs)?),
            (None, None) => return Err(HandlerError::MissingParam("Seconds".to_string())),
        };

        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(HandlerError::Interrupted),
            _ = tokio::time::sleep(duration) => Ok(HandlerOutput::passed()
                .with_output("SleptMillis", duration.as_millis().to_string())),
        }
    }
}

/// Always fails with `Reason`
#[derive(Debug, Clone, Copy, Default)]
pub struct FailHandler;

#[async_trait::async_trait]
impl ActionHandler for FailHandler {
    async fn execute(&self, ctx: &ActionContext) -> Result<HandlerOutput, HandlerError> {
        Ok(HandlerOutput::failed(
            ctx.param("Reason").unwrap_or("Failure requested"),
        ))
    }
}

fn parse_u64(name: &str, value: &str) -> Result<u64, HandlerError> {
    value
        .trim()
        .parse()
        .map_err(|_| HandlerError::InvalidParam {
            name: name.to_string(),
            value: value.to_string(),
            message: "expected a non-negative integer".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(action_type: &str, inputs: &[(&str, &str)]) -> ActionContext {
        ActionContext {
            matrix: "m1".to_string(),
            action_id: "id1".to_string(),
            action_type: action_type.to_string(),
            step: "Step1".to_string(),
            inputs: inputs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            cancel: CancellationToken::new(),
        }
    }

    async fn run(action_type: &str, inputs: &[(&str, &str)]) -> ActionOutcome {
        let registry = HandlerRegistry::with_builtins();
        let ctx = context(action_type, inputs);
        run_handler(registry.get(action_type), &ctx).await
    }

    #[test]
    fn test_registry_case_insensitive() {
        let registry = HandlerRegistry::with_builtins();
        assert!(registry.get("setstatic").is_some());
        assert!(registry.get("SETSTATIC").is_some());
        assert!(registry.contains("CompareValues"));
        assert!(registry.get("Missing").is_none());
    }

    #[tokio::test]
    async fn test_set_static_copies_inputs() {
        let outcome = run("SetStatic", &[("Qty", "10")]).await;
        assert!(outcome.success);
        assert_eq!(outcome.outputs.get("Qty"), Some(&"10".to_string()));
        assert_eq!(outcome.inputs.get("Qty"), Some(&"10".to_string()));
        assert!(outcome.started.is_some());
    }

    #[tokio::test]
    async fn test_compare_values() {
        let passed = run("CompareValues", &[("Expected", "5"), ("Actual", "5")]).await;
        assert!(passed.success);

        let failed = run("CompareValues", &[("Expected", "5"), ("Actual", "6")]).await;
        assert!(!failed.success);
        assert_eq!(failed.fail_reason, FailReason::Failed);
        assert_eq!(failed.comment.as_deref(), Some("Expected '5', actual '6'"));
    }

    #[tokio::test]
    async fn test_handler_error_becomes_exception() {
        let outcome = run("CompareValues", &[("Expected", "5")]).await;
        assert!(!outcome.success);
        assert_eq!(outcome.fail_reason, FailReason::Exception);
        assert!(outcome.comment.unwrap().contains("'Actual'"));
    }

    #[tokio::test]
    async fn test_unknown_type_fails_action() {
        let outcome = run("NoSuchType", &[]).await;
        assert_eq!(outcome.fail_reason, FailReason::Exception);
        assert!(outcome.comment.unwrap().contains("NoSuchType"));
    }

    #[tokio::test]
    async fn test_fail_handler() {
        let outcome = run("Fail", &[("Reason", "boom")]).await;
        assert_eq!(outcome.fail_reason, FailReason::Failed);
        assert_eq!(outcome.comment.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_sleep_interrupted_by_cancel() {
        let ctx = context("Sleep", &[("Seconds", "30")]);
        ctx.cancel.cancel();

        let outcome = run_handler(Some(Arc::new(SleepHandler)), &ctx).await;
        assert_eq!(outcome.fail_reason, FailReason::Interrupted);
    }

    #[tokio::test]
    async fn test_sleep_millis() {
        let outcome = run("Sleep", &[("Millis", "5")]).await;
        assert!(outcome.success);
        assert_eq!(outcome.outputs.get("SleptMillis"), Some(&"5".to_string()));
    }

    #[tokio::test]
    async fn test_sleep_invalid_param() {
        let outcome = run("Sleep", &[("Seconds", "soon")]).await;
        assert_eq!(outcome.fail_reason, FailReason::Exception);
    }

    #[tokio::test]
    async fn test_custom_handler() {
        struct Echo;

        #[async_trait::async_trait]
        impl ActionHandler for Echo {
            async fn execute(&self, ctx: &ActionContext) -> Result<HandlerOutput, HandlerError> {
                Ok(HandlerOutput::passed().with_output("Echo", ctx.action_id.clone()))
            }
        }

        let registry = HandlerRegistry::new().with_handler("Echo", Echo);
        let ctx = context("Echo", &[]);
        let outcome = run_handler(registry.get("echo"), &ctx).await;
        assert_eq!(outcome.outputs.get("Echo"), Some(&"id1".to_string()));
    }
}
