use async_trait::async_trait;
use conductor_a2a::{skill_ids, SkillDescriptor, SkillHandler, SkillOutcome};
use conductor_core::{ConductorError, ConductorResult, ParamType, Params, Schema};
use conductor_orchestrator::{Decomposer, Orchestrator, RunOptions};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// `answer-question`: the coordinator itself, reachable over the protocol.
///
/// Decomposes the question, runs the plan against the orchestrator's
/// registry and returns the aggregated result. A `context.prefer` object
/// (skill id to agent name) routes skills the way `RunOptions::prefer` does.
pub struct AnswerQuestion {
    orchestrator: Arc<Orchestrator>,
    decomposer: Arc<dyn Decomposer>,
}

impl AnswerQuestion {
    /// Answer questions with `decomposer` plans run on `orchestrator`.
    pub fn new(orchestrator: Arc<Orchestrator>, decomposer: Arc<dyn Decomposer>) -> Self {
        Self {
            orchestrator,
            decomposer,
        }
    }

    /// Card entry for `answer-question`.
    pub fn descriptor() -> SkillDescriptor {
        SkillDescriptor::new(
            skill_ids::ANSWER_QUESTION,
            Schema::new()
                .field("question", ParamType::String, true, "The business question to answer")
                .field("context", ParamType::Object, false, "Additional context, e.g. routing preferences"),
            Schema::new()
                .required("answer", ParamType::Object)
                .required("contributions", ParamType::Object)
                .required("subtasks", ParamType::Array)
                .required("partial", ParamType::Boolean),
        )
        .with_name("Answer Business Question")
        .with_description("Answer a business question by coordinating the analytics agents")
        .with_examples(&[
            "Why are sales declining for outdoor products in the Northeast?",
            "Which stores are underperforming?",
        ])
    }
}

fn run_options(context: Option<&Value>) -> RunOptions {
    let mut options = RunOptions::new();
    let prefer = context
        .and_then(|c| c.get("prefer"))
        .and_then(Value::as_object);
    for (skill, agent) in prefer.into_iter().flatten() {
        if let Some(agent) = agent.as_str() {
            options = options.prefer(skill.clone(), agent);
        }
    }
    options
}

#[async_trait]
impl SkillHandler for AnswerQuestion {
    async fn handle(&self, input: Params) -> ConductorResult<SkillOutcome> {
        let question = input
            .get("question")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim();
        if question.is_empty() {
            return Err(ConductorError::HandlerFailure("question is empty".to_string()));
        }

        let options = run_options(input.get("context"));
        let result = match self
            .orchestrator
            .run(self.decomposer.as_ref(), question, &options)
            .await
        {
            Ok(result) => result,
            Err(e @ ConductorError::OrchestrationFailed { .. }) => {
                return Err(ConductorError::HandlerFailure(e.to_string()))
            }
            Err(e) => return Err(e),
        };
        info!(
            question = %question,
            subtasks = result.subtasks.len(),
            partial = result.partial,
            "Question answered"
        );

        SkillOutcome::completed(serde_json::to_value(&result)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use conductor_a2a::{AgentRegistry, ClientConfig, LocalTransport, ProtocolClient};
    use conductor_core::into_params;
    use conductor_orchestrator::{OrchestratorConfig, RuleDecomposer};
    use serde_json::json;

    /// Coordinator over an empty registry: every plan fails to route.
    fn unrouted() -> AnswerQuestion {
        let client = ProtocolClient::new(Arc::new(LocalTransport::new()), ClientConfig::default());
        let orchestrator =
            Orchestrator::new(AgentRegistry::shared(), client, OrchestratorConfig::default());
        AnswerQuestion::new(Arc::new(orchestrator), Arc::new(RuleDecomposer::new()))
    }

    #[test]
    fn test_context_prefer_becomes_run_options() {
        let context = json!({"prefer": {"text-to-sql": "sql-backup", "bogus": 3}});
        let options = run_options(Some(&context));
        assert_eq!(options.prefer.len(), 1);
        assert_eq!(options.prefer["text-to-sql"], "sql-backup");
        assert!(run_options(None).prefer.is_empty());
    }

    #[tokio::test]
    async fn test_blank_question_is_handler_failure() {
        let skill = unrouted();
        let err = skill
            .handle(into_params(json!({"question": "  "})).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::HandlerFailure(_)));
    }

    #[tokio::test]
    async fn test_failed_final_answer_is_handler_failure() {
        let skill = unrouted();
        let err = skill
            .handle(into_params(json!({"question": "Total revenue by region"})).unwrap())
            .await
            .unwrap_err();
        match err {
            ConductorError::HandlerFailure(message) => {
                assert!(message.contains("no_capable_agent"), "{message}");
            }
            other => panic!("expected HandlerFailure, got {other:?}"),
        }
    }
}
