use crate::types::InputRequest;
use async_trait::async_trait;
use conductor_core::{into_params, ConductorResult, Params};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// What a handler produced for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum SkillOutcome {
    /// Finished; the map is the task's result payload.
    Completed(Params),
    /// Needs more input before it can continue.
    InputRequired(InputRequest),
}

impl SkillOutcome {
    /// Wrap a JSON object as a completed outcome.
    pub fn completed(value: Value) -> ConductorResult<Self> {
        Ok(SkillOutcome::Completed(into_params(value)?))
    }

    /// Ask the caller for `fields` before the skill can continue.
    pub fn input_required(message: impl Into<String>, fields: &[&str]) -> Self {
        SkillOutcome::InputRequired(InputRequest::new(message, fields))
    }
}

/// A capability provider behind one skill.
///
/// The endpoint calls `handle` exactly once per task execution, with input
/// already validated against the skill's input schema. Errors and panics are
/// recorded on the task; they never reach the endpoint's caller.
#[async_trait]
pub trait SkillHandler: Send + Sync {
    async fn handle(&self, input: Params) -> ConductorResult<SkillOutcome>;
}

/// Adapter turning an async closure into a [`SkillHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> SkillHandler for FnHandler<F>
where
    F: Fn(Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ConductorResult<SkillOutcome>> + Send + 'static,
{
    async fn handle(&self, input: Params) -> ConductorResult<SkillOutcome> {
        (self.0)(input).await
    }
}

/// Build a shared handler from an async closure.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn SkillHandler>
where
    F: Fn(Params) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ConductorResult<SkillOutcome>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use conductor_core::ConductorError;
    use serde_json::json;

    #[tokio::test]
    async fn test_closure_handler_echoes_input() {
        let handler = handler_fn(|input: Params| async move {
            Ok(SkillOutcome::Completed(input))
        });
        let input = into_params(json!({"question": "q"})).unwrap();
        let outcome = handler.handle(input.clone()).await.unwrap();
        assert_eq!(outcome, SkillOutcome::Completed(input));
    }

    #[tokio::test]
    async fn test_closure_handler_error_surfaces() {
        let handler = handler_fn(|_input: Params| async move {
            Err(ConductorError::HandlerFailure("catalog offline".into()))
        });
        let err = handler.handle(Params::new()).await.unwrap_err();
        assert_eq!(err.code(), "handler_failure");
    }

    #[test]
    fn test_completed_requires_object() {
        assert!(SkillOutcome::completed(json!({"sql": "SELECT 1"})).is_ok());
        assert!(SkillOutcome::completed(json!("SELECT 1")).is_err());
    }
}
