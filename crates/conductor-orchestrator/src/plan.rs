use conductor_core::{ConductorError, ConductorResult, Params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Plan-local index of a subtask. Equal to its position in
/// [`SubtaskPlan::subtasks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubtaskId(pub usize);

impl std::fmt::Display for SubtaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where one input parameter of a subtask gets its value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum InputBinding {
    /// A fixed value.
    Literal { value: Value },
    /// The user's question, verbatim.
    Question,
    /// A field of a dependency's result payload.
    Output { subtask: SubtaskId, field: String },
}

/// One node of the plan: a skill requirement plus its input bindings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    /// Arena index, assigned by `SubtaskPlan::add`.
    pub id: SubtaskId,
    /// Unique within the plan.
    pub name: String,
    /// Skill to invoke.
    pub skill_id: String,
    /// Where each input parameter comes from.
    #[serde(default)]
    pub inputs: BTreeMap<String, InputBinding>,
    /// Subtasks that must complete first.
    #[serde(default)]
    pub depends_on: Vec<SubtaskId>,
    /// Route to this agent instead of the first capable one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

impl Subtask {
    /// A subtask with no inputs yet. Its id is assigned by [`SubtaskPlan::add`].
    pub fn new(name: impl Into<String>, skill_id: impl Into<String>) -> Self {
        Self {
            id: SubtaskId(0),
            name: name.into(),
            skill_id: skill_id.into(),
            inputs: BTreeMap::new(),
            depends_on: Vec::new(),
            agent: None,
        }
    }

    /// Bind `param` to the user's question.
    pub fn with_question(mut self, param: impl Into<String>) -> Self {
        self.inputs.insert(param.into(), InputBinding::Question);
        self
    }

    /// Bind `param` to a fixed value.
    pub fn with_literal(mut self, param: impl Into<String>, value: Value) -> Self {
        self.inputs
            .insert(param.into(), InputBinding::Literal { value });
        self
    }

    /// Bind `param` to `field` of `subtask`'s result, adding the dependency edge.
    pub fn with_output(
        mut self,
        param: impl Into<String>,
        subtask: SubtaskId,
        field: impl Into<String>,
    ) -> Self {
        self.inputs.insert(
            param.into(),
            InputBinding::Output {
                subtask,
                field: field.into(),
            },
        );
        if !self.depends_on.contains(&subtask) {
            self.depends_on.push(subtask);
        }
        self
    }

    /// Add ordering-only dependencies.
    pub fn with_dependencies(mut self, deps: Vec<SubtaskId>) -> Self {
        for dep in deps {
            if !self.depends_on.contains(&dep) {
                self.depends_on.push(dep);
            }
        }
        self
    }

    /// Pin the subtask to a named agent.
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }
}

/// Dependency-ordered set of subtasks derived from one question.
///
/// Lives for one orchestration request. Dependencies are plan-local indices,
/// so a plan serializes to JSON and can be logged or replayed as is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskPlan {
    /// The question the plan answers.
    pub question: String,
    /// Arena of subtasks, indexed by `SubtaskId`.
    pub subtasks: Vec<Subtask>,
    /// Subtask whose result is the answer. Defaults to the last one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<SubtaskId>,
}

impl SubtaskPlan {
    /// An empty plan for `question`.
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            subtasks: Vec::new(),
            final_answer: None,
        }
    }

    /// Append `subtask`, assigning it the next id.
    pub fn add(&mut self, mut subtask: Subtask) -> SubtaskId {
        let id = SubtaskId(self.subtasks.len());
        subtask.id = id;
        self.subtasks.push(subtask);
        id
    }

    /// Choose which subtask answers the question.
    pub fn set_final_answer(&mut self, id: SubtaskId) {
        self.final_answer = Some(id);
    }

    /// The designated final-answer subtask (the last one unless set).
    pub fn final_answer(&self) -> SubtaskId {
        self.final_answer
            .unwrap_or(SubtaskId(self.subtasks.len().saturating_sub(1)))
    }

    /// Subtask `id`, if it exists.
    pub fn get(&self, id: SubtaskId) -> Option<&Subtask> {
        self.subtasks.get(id.0)
    }

    /// Number of subtasks.
    pub fn len(&self) -> usize {
        self.subtasks.len()
    }

    /// Whether the plan has no subtasks.
    pub fn is_empty(&self) -> bool {
        self.subtasks.is_empty()
    }

    /// Subtasks that list `id` as a dependency, in id order.
    pub fn dependents(&self, id: SubtaskId) -> Vec<SubtaskId> {
        self.subtasks
            .iter()
            .filter(|s| s.depends_on.contains(&id))
            .map(|s| s.id)
            .collect()
    }

    /// Check the plan is executable.
    pub fn validate(&self) -> ConductorResult<()> {
        if self.subtasks.is_empty() {
            return Err(plan_error("plan has no subtasks"));
        }

        let mut names = HashSet::new();
        for (idx, subtask) in self.subtasks.iter().enumerate() {
            if subtask.id != SubtaskId(idx) {
                return Err(plan_error(format!(
                    "subtask '{}' has id {} but sits at position {idx}",
                    subtask.name, subtask.id
                )));
            }
            if subtask.skill_id.trim().is_empty() {
                return Err(plan_error(format!("subtask '{}' names no skill", subtask.name)));
            }
            if !names.insert(subtask.name.as_str()) {
                return Err(plan_error(format!("duplicate subtask name '{}'", subtask.name)));
            }
            for dep in &subtask.depends_on {
                if *dep == subtask.id {
                    return Err(plan_error(format!("subtask '{}' depends on itself", subtask.name)));
                }
                if dep.0 >= self.subtasks.len() {
                    return Err(plan_error(format!(
                        "subtask '{}' depends on unknown subtask {dep}",
                        subtask.name
                    )));
                }
            }
            for (param, binding) in &subtask.inputs {
                if let InputBinding::Output { subtask: source, .. } = binding {
                    if !subtask.depends_on.contains(source) {
                        return Err(plan_error(format!(
                            "input '{param}' of '{}' reads {source}, which is not a dependency",
                            subtask.name
                        )));
                    }
                }
            }
        }

        if self.has_cycle() {
            return Err(plan_error("dependency cycle detected"));
        }

        let last = self.final_answer();
        if last.0 >= self.subtasks.len() {
            return Err(plan_error(format!("final answer {last} is out of range")));
        }
        Ok(())
    }

    /// Build the concrete parameters for `id` from the question and the
    /// results of its completed dependencies.
    pub fn resolve_inputs(
        &self,
        id: SubtaskId,
        outputs: &HashMap<SubtaskId, Params>,
    ) -> ConductorResult<Params> {
        let subtask = self
            .get(id)
            .ok_or_else(|| plan_error(format!("unknown subtask {id}")))?;

        let mut params = Params::new();
        for (param, binding) in &subtask.inputs {
            let value = match binding {
                InputBinding::Literal { value } => value.clone(),
                InputBinding::Question => Value::String(self.question.clone()),
                InputBinding::Output { subtask: source, field } => outputs
                    .get(source)
                    .and_then(|result| result.get(field))
                    .cloned()
                    .ok_or_else(|| {
                        plan_error(format!(
                            "input '{param}' of '{}' needs field '{field}' from {source}, which produced none",
                            subtask.name
                        ))
                    })?,
            };
            params.insert(param.clone(), value);
        }
        Ok(params)
    }

    /// Subtask ids in an order that respects every dependency edge.
    pub fn topological_order(&self) -> Vec<SubtaskId> {
        let mut remaining: Vec<usize> = self.subtasks.iter().map(|s| s.depends_on.len()).collect();
        let mut ready: Vec<SubtaskId> = self
            .subtasks
            .iter()
            .filter(|s| s.depends_on.is_empty())
            .map(|s| s.id)
            .collect();
        let mut order = Vec::with_capacity(self.subtasks.len());

        while let Some(id) = ready.first().copied() {
            ready.remove(0);
            order.push(id);
            for dependent in self.dependents(id) {
                remaining[dependent.0] -= 1;
                if remaining[dependent.0] == 0 {
                    ready.push(dependent);
                    ready.sort_unstable();
                }
            }
        }
        order
    }

    fn has_cycle(&self) -> bool {
        let mut visited = HashMap::new();
        self.subtasks
            .iter()
            .any(|s| self.dfs_cycle(s.id, &mut visited))
    }

    fn dfs_cycle(&self, id: SubtaskId, visited: &mut HashMap<SubtaskId, u8>) -> bool {
        match visited.get(&id) {
            Some(1) => return true,  // back edge = cycle
            Some(2) => return false, // already processed
            _ => {}
        }
        visited.insert(id, 1);
        if let Some(subtask) = self.get(id) {
            for dep in &subtask.depends_on {
                if self.dfs_cycle(*dep, visited) {
                    return true;
                }
            }
        }
        visited.insert(id, 2);
        false
    }
}

fn plan_error(msg: impl Into<String>) -> ConductorError {
    ConductorError::Plan(msg.into())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exploratory() -> SubtaskPlan {
        let mut plan = SubtaskPlan::new("Why are outdoor sales declining?");
        let discover = plan.add(Subtask::new("discover", "discover-tables").with_question("question"));
        let sql = plan.add(
            Subtask::new("sql", "text-to-sql")
                .with_question("requirement")
                .with_output("tables", discover, "tables")
                .with_literal("execute", json!(true)),
        );
        plan.add(
            Subtask::new("analyze", "analyze-results")
                .with_output("rows", sql, "rows")
                .with_question("question"),
        );
        plan
    }

    #[test]
    fn test_valid_plan_passes_and_defaults_final_to_last() {
        let plan = exploratory();
        plan.validate().unwrap();
        assert_eq!(plan.final_answer(), SubtaskId(2));
        assert_eq!(plan.dependents(SubtaskId(0)), vec![SubtaskId(1)]);
    }

    #[test]
    fn test_empty_plan_rejected() {
        let err = SubtaskPlan::new("q").validate().unwrap_err();
        assert!(matches!(err, ConductorError::Plan(_)));
    }

    #[test]
    fn test_self_and_unknown_dependencies_rejected() {
        let mut plan = SubtaskPlan::new("q");
        plan.add(Subtask::new("a", "text-to-sql").with_dependencies(vec![SubtaskId(0)]));
        assert!(plan.validate().unwrap_err().to_string().contains("itself"));

        let mut plan = SubtaskPlan::new("q");
        plan.add(Subtask::new("a", "text-to-sql").with_dependencies(vec![SubtaskId(7)]));
        assert!(plan.validate().unwrap_err().to_string().contains("unknown"));
    }

    #[test]
    fn test_cycle_rejected() {
        let mut plan = SubtaskPlan::new("q");
        plan.add(Subtask::new("a", "discover-tables").with_dependencies(vec![SubtaskId(1)]));
        plan.add(Subtask::new("b", "text-to-sql").with_dependencies(vec![SubtaskId(0)]));
        assert!(plan.validate().unwrap_err().to_string().contains("cycle"));
    }

    #[test]
    fn test_output_binding_must_be_a_dependency() {
        let mut plan = exploratory();
        plan.subtasks[2].depends_on.clear();
        assert!(plan
            .validate()
            .unwrap_err()
            .to_string()
            .contains("not a dependency"));
    }

    #[test]
    fn test_duplicate_names_and_bad_final_rejected() {
        let mut plan = SubtaskPlan::new("q");
        plan.add(Subtask::new("a", "text-to-sql"));
        plan.add(Subtask::new("a", "validate-sql"));
        assert!(plan.validate().unwrap_err().to_string().contains("duplicate"));

        let mut plan = SubtaskPlan::new("q");
        plan.add(Subtask::new("a", "text-to-sql"));
        plan.set_final_answer(SubtaskId(3));
        assert!(plan.validate().unwrap_err().to_string().contains("out of range"));
    }

    #[test]
    fn test_resolve_inputs_reads_question_literals_and_outputs() {
        let plan = exploratory();
        let mut outputs = HashMap::new();
        outputs.insert(
            SubtaskId(0),
            json!({"tables": ["sales_transactions"]}).as_object().cloned().unwrap(),
        );
        let params = plan.resolve_inputs(SubtaskId(1), &outputs).unwrap();
        assert_eq!(params["requirement"], "Why are outdoor sales declining?");
        assert_eq!(params["tables"], json!(["sales_transactions"]));
        assert_eq!(params["execute"], json!(true));
    }

    #[test]
    fn test_resolve_inputs_missing_field_is_plan_error() {
        let plan = exploratory();
        let mut outputs = HashMap::new();
        outputs.insert(SubtaskId(0), Params::new());
        let err = plan.resolve_inputs(SubtaskId(1), &outputs).unwrap_err();
        assert!(err.to_string().contains("field 'tables'"));
    }

    #[test]
    fn test_plan_serializes_with_arena_ids() {
        let plan = exploratory();
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["subtasks"][1]["depends_on"], json!([0]));
        assert_eq!(json["subtasks"][1]["inputs"]["tables"]["source"], "output");
        assert_eq!(json["subtasks"][1]["inputs"]["tables"]["subtask"], 0);
        let back: SubtaskPlan = serde_json::from_value(json).unwrap();
        assert_eq!(back, plan);
    }

    #[test]
    fn test_topological_order_respects_edges() {
        let mut plan = SubtaskPlan::new("q");
        let c = SubtaskId(2);
        plan.add(Subtask::new("a", "s").with_dependencies(vec![c]));
        plan.add(Subtask::new("b", "s"));
        plan.add(Subtask::new("c", "s").with_dependencies(vec![SubtaskId(1)]));
        assert_eq!(
            plan.topological_order(),
            vec![SubtaskId(1), SubtaskId(2), SubtaskId(0)]
        );
    }
}
