use crate::plan::{Subtask, SubtaskPlan};
use async_trait::async_trait;
use conductor_a2a::{skill_ids, AgentCard, ProtocolClient, SharedRegistry, TaskOutcome};
use conductor_core::{ConductorError, ConductorResult, Params};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

/// Turns a question into a [`SubtaskPlan`].
#[async_trait]
pub trait Decomposer: Send + Sync {
    async fn decompose(&self, question: &str) -> ConductorResult<SubtaskPlan>;
}

/// Words that mark a question as exploratory rather than a direct lookup.
const EXPLORATORY_KEYWORDS: &[&str] = &[
    "why",
    "which",
    "compare",
    "trend",
    "declin",
    "underperform",
    "insight",
    "analy",
    "investigat",
    "impact",
];

/// Deterministic keyword decomposer.
///
/// Exploratory questions get the full chain (discover tables, generate and
/// run SQL, analyze rows). Anything else is a single SQL subtask.
#[derive(Debug, Clone)]
pub struct RuleDecomposer {
    keywords: Vec<String>,
}

impl Default for RuleDecomposer {
    fn default() -> Self {
        Self {
            keywords: EXPLORATORY_KEYWORDS.iter().map(|k| (*k).to_string()).collect(),
        }
    }
}

impl RuleDecomposer {
    /// Decomposer with the default exploratory keywords.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decomposer with a custom keyword list.
    pub fn with_keywords(keywords: &[&str]) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    /// Whether `question` warrants the full discovery chain.
    pub fn is_exploratory(&self, question: &str) -> bool {
        let lower = question.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
    }

    /// Skill ids the plan for `question` would run, in order.
    pub fn skill_chain(&self, question: &str) -> Vec<String> {
        let chain: &[&str] = if self.is_exploratory(question) {
            &[
                skill_ids::DISCOVER_TABLES,
                skill_ids::TEXT_TO_SQL,
                skill_ids::ANALYZE_RESULTS,
            ]
        } else {
            &[skill_ids::TEXT_TO_SQL]
        };
        chain.iter().map(|s| (*s).to_string()).collect()
    }
}

#[async_trait]
impl Decomposer for RuleDecomposer {
    async fn decompose(&self, question: &str) -> ConductorResult<SubtaskPlan> {
        plan_for_chain(question, &self.skill_chain(question))
    }
}

/// Build the canonical plan for a list of required skills.
///
/// Recognized skills are chained in a fixed order: `discover-tables` feeds
/// `tables` to `text-to-sql`, whose `rows` feed `analyze-results`. Unknown
/// skills are ignored. With nothing recognized the plan is a single
/// `text-to-sql` subtask.
pub fn plan_for_chain(question: &str, chain: &[String]) -> ConductorResult<SubtaskPlan> {
    if question.trim().is_empty() {
        return Err(ConductorError::Validation("question is empty".to_string()));
    }
    let wants = |skill: &str| chain.iter().any(|s| s.trim() == skill);
    let mut plan = SubtaskPlan::new(question);

    let discover = wants(skill_ids::DISCOVER_TABLES).then(|| {
        plan.add(Subtask::new("discover", skill_ids::DISCOVER_TABLES).with_question("question"))
    });

    let mut sql = Subtask::new("sql", skill_ids::TEXT_TO_SQL)
        .with_question("requirement")
        .with_literal("execute", json!(true));
    if let Some(discover) = discover {
        sql = sql.with_output("tables", discover, "tables");
    }
    let sql = plan.add(sql);

    if wants(skill_ids::ANALYZE_RESULTS) {
        plan.add(
            Subtask::new("analyze", skill_ids::ANALYZE_RESULTS)
                .with_question("question")
                .with_output("rows", sql, "rows"),
        );
    }

    let ignored: Vec<&String> = chain
        .iter()
        .filter(|s| {
            ![
                skill_ids::DISCOVER_TABLES,
                skill_ids::TEXT_TO_SQL,
                skill_ids::ANALYZE_RESULTS,
            ]
            .contains(&s.trim())
        })
        .collect();
    if !ignored.is_empty() {
        debug!(skills = ?ignored, "Skills without a plan step ignored");
    }

    plan.validate()?;
    Ok(plan)
}

/// Delegates planning to a remote `plan-analysis` skill and builds the plan
/// from the `required_skills` it returns.
pub struct SkillDecomposer {
    client: ProtocolClient,
    registry: SharedRegistry,
    timeout: Duration,
}

impl SkillDecomposer {
    /// Planner backed by whichever registered agent serves `plan-analysis`.
    pub fn new(client: ProtocolClient, registry: SharedRegistry) -> Self {
        let timeout = client.default_timeout();
        Self {
            client,
            registry,
            timeout,
        }
    }

    /// Bound on the wait for the planner agent.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn planner(&self) -> ConductorResult<AgentCard> {
        self.registry
            .read()
            .find_agents(skill_ids::PLAN_ANALYSIS)
            .first()
            .map(|card| (*card).clone())
            .ok_or_else(|| {
                ConductorError::NotFound(format!(
                    "no agent advertises '{}'",
                    skill_ids::PLAN_ANALYSIS
                ))
            })
    }
}

#[async_trait]
impl Decomposer for SkillDecomposer {
    async fn decompose(&self, question: &str) -> ConductorResult<SubtaskPlan> {
        let planner = self.planner()?;
        let mut input = Params::new();
        input.insert("question".into(), Value::String(question.to_string()));

        let handle = self
            .client
            .dispatch(&planner, skill_ids::PLAN_ANALYSIS, input)
            .await?;
        let result = match self.client.await_result(&handle, self.timeout).await? {
            TaskOutcome::Completed(result) => result,
            TaskOutcome::Failed(detail) => {
                return Err(ConductorError::HandlerFailure(format!(
                    "planner {} failed: {detail}",
                    planner.name
                )))
            }
            TaskOutcome::InputRequired(request) => {
                return Err(ConductorError::HandlerFailure(format!(
                    "planner {} asked for input: {}",
                    planner.name, request.message
                )))
            }
        };

        let chain: Vec<String> = result
            .get("required_skills")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ConductorError::Protocol("plan-analysis result lacks 'required_skills'".to_string())
            })?
            .iter()
            .filter_map(|s| s.as_str().map(str::to_string))
            .collect();

        info!(planner = %planner.name, skills = ?chain, "Remote plan received");
        plan_for_chain(question, &chain)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::plan::{InputBinding, SubtaskId};

    #[tokio::test]
    async fn test_direct_question_is_single_sql_subtask() {
        let plan = RuleDecomposer::new()
            .decompose("Total revenue by region")
            .await
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.subtasks[0].skill_id, skill_ids::TEXT_TO_SQL);
        assert!(plan.subtasks[0].depends_on.is_empty());
        assert_eq!(plan.final_answer(), SubtaskId(0));
    }

    #[tokio::test]
    async fn test_exploratory_question_chains_three_skills() {
        let plan = RuleDecomposer::new()
            .decompose("Why are outdoor sales declining in the Northeast?")
            .await
            .unwrap();
        let skills: Vec<&str> = plan.subtasks.iter().map(|s| s.skill_id.as_str()).collect();
        assert_eq!(
            skills,
            vec![
                skill_ids::DISCOVER_TABLES,
                skill_ids::TEXT_TO_SQL,
                skill_ids::ANALYZE_RESULTS
            ]
        );
        assert_eq!(
            plan.subtasks[1].inputs["tables"],
            InputBinding::Output {
                subtask: SubtaskId(0),
                field: "tables".into()
            }
        );
        assert_eq!(plan.subtasks[2].depends_on, vec![SubtaskId(1)]);
    }

    #[test]
    fn test_chain_ignores_unknown_skills_and_orders_known_ones() {
        let chain = vec![
            "synthesis".to_string(),
            " text-to-sql".to_string(),
            "discover-tables".to_string(),
        ];
        let plan = plan_for_chain("q", &chain).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.subtasks[0].skill_id, skill_ids::DISCOVER_TABLES);
    }

    #[test]
    fn test_empty_question_rejected() {
        assert!(matches!(
            plan_for_chain("  ", &[]),
            Err(ConductorError::Validation(_))
        ));
    }

    #[test]
    fn test_custom_keywords() {
        let rules = RuleDecomposer::with_keywords(&["Forecast"]);
        assert!(rules.is_exploratory("forecast next quarter"));
        assert!(!rules.is_exploratory("why is revenue down"));
    }
}
