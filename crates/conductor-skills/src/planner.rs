use async_trait::async_trait;
use conductor_a2a::{skill_ids, SkillDescriptor, SkillHandler, SkillOutcome};
use conductor_core::{ConductorError, ConductorResult, ParamType, Params, Schema};
use conductor_orchestrator::RuleDecomposer;
use serde_json::{json, Value};

/// `plan-analysis`: the skill chain a question needs, as a remote planner.
#[derive(Debug, Clone, Default)]
pub struct PlanAnalysis {
    rules: RuleDecomposer,
}

impl PlanAnalysis {
    /// Plan with `rules`.
    pub fn new(rules: RuleDecomposer) -> Self {
        Self { rules }
    }

    /// Card entry for `plan-analysis`.
    pub fn descriptor() -> SkillDescriptor {
        SkillDescriptor::new(
            skill_ids::PLAN_ANALYSIS,
            Schema::new().field("question", ParamType::String, true, "Question to plan for"),
            Schema::new()
                .required("plan", ParamType::String)
                .required("required_skills", ParamType::Array)
                .optional("exploratory", ParamType::Boolean),
        )
        .with_name("Plan Analysis")
        .with_description("List the skills needed to answer a question, in order")
        .with_examples(&["Why are outdoor sales declining in the Northeast?"])
    }
}

fn step_description(skill: &str) -> &'static str {
    match skill {
        skill_ids::DISCOVER_TABLES => "find the tables that hold the relevant data",
        skill_ids::TEXT_TO_SQL => "generate and run a query over those tables",
        skill_ids::ANALYZE_RESULTS => "summarize the returned rows",
        _ => "run the skill",
    }
}

#[async_trait]
impl SkillHandler for PlanAnalysis {
    async fn handle(&self, input: Params) -> ConductorResult<SkillOutcome> {
        let question = input
            .get("question")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim();
        if question.is_empty() {
            return Err(ConductorError::HandlerFailure("question is empty".to_string()));
        }

        let chain = self.rules.skill_chain(question);
        let plan: Vec<String> = chain
            .iter()
            .enumerate()
            .map(|(idx, skill)| format!("{}. {skill}: {}", idx + 1, step_description(skill)))
            .collect();

        SkillOutcome::completed(json!({
            "plan": plan.join("\n"),
            "required_skills": chain,
            "exploratory": self.rules.is_exploratory(question),
        }))
    }
}
