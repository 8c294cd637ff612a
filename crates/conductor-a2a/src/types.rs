use chrono::{DateTime, Utc};
use conductor_core::{ConductorError, ConductorResult, Params, Schema};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Skill ids shared between the coordinator and the reference providers.
pub mod skill_ids {
    /// Find tables relevant to a question.
    pub const DISCOVER_TABLES: &str = "discover-tables";
    /// Describe the columns of named tables.
    pub const GET_TABLE_SCHEMA: &str = "get-table-schema";
    /// Turn a requirement into SQL, optionally executing it.
    pub const TEXT_TO_SQL: &str = "text-to-sql";
    /// Check a SQL statement without running it.
    pub const VALIDATE_SQL: &str = "validate-sql";
    /// Summarize result rows.
    pub const ANALYZE_RESULTS: &str = "analyze-results";
    /// Propose the skill chain for a question.
    pub const PLAN_ANALYSIS: &str = "plan-analysis";
    /// Answer a question end to end by coordinating other agents.
    pub const ANSWER_QUESTION: &str = "answer-question";
}

// --- Agent cards ---

/// One named, schema-typed capability an agent offers.
///
/// Schemas are optional on the wire so a discovery document that omits one
/// can still be parsed and then rejected by [`AgentCard::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillDescriptor {
    /// Stable identifier, e.g. `text-to-sql`.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// What the skill does.
    #[serde(default)]
    pub description: String,
    /// Schema the input parameters must satisfy.
    #[serde(default)]
    pub input_schema: Option<Schema>,
    /// Fields a completed result must carry.
    #[serde(default)]
    pub output_schema: Option<Schema>,
    /// Sample inputs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
}

impl SkillDescriptor {
    /// A descriptor with the given schemas and no display metadata.
    pub fn new(id: impl Into<String>, input_schema: Schema, output_schema: Schema) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            input_schema: Some(input_schema),
            output_schema: Some(output_schema),
            examples: Vec::new(),
        }
    }

    /// Human-readable skill name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// What the skill does.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sample inputs the skill handles.
    pub fn with_examples(mut self, examples: &[&str]) -> Self {
        self.examples = examples.iter().map(|e| (*e).to_string()).collect();
        self
    }

    /// The declared input schema, or a validation error if the descriptor has none.
    pub fn input(&self) -> ConductorResult<&Schema> {
        self.input_schema.as_ref().ok_or_else(|| {
            ConductorError::Validation(format!("skill '{}' declares no input schema", self.id))
        })
    }

    /// The declared output schema, or a validation error if the descriptor has none.
    pub fn output(&self) -> ConductorResult<&Schema> {
        self.output_schema.as_ref().ok_or_else(|| {
            ConductorError::Validation(format!("skill '{}' declares no output schema", self.id))
        })
    }
}

/// Identity and capability manifest of one agent; the discovery document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCard {
    /// Unique within a registry.
    pub name: String,
    /// Agent version string.
    pub version: String,
    /// What the agent does.
    #[serde(default)]
    pub description: String,
    /// Base URL the agent's protocol endpoint is served from.
    #[serde(default)]
    pub url: String,
    /// Skills the agent serves.
    pub skills: Vec<SkillDescriptor>,
}

impl AgentCard {
    /// An empty card with no URL or skills.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            url: String::new(),
            skills: Vec::new(),
        }
    }

    /// What the agent does.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Base URL the agent is reachable at.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Advertise `skill`.
    pub fn with_skill(mut self, skill: SkillDescriptor) -> Self {
        self.skills.push(skill);
        self
    }

    /// Descriptor for `skill_id`, if advertised.
    pub fn skill(&self, skill_id: &str) -> Option<&SkillDescriptor> {
        self.skills.iter().find(|s| s.id == skill_id)
    }

    /// Whether the card advertises `skill_id`.
    pub fn supports(&self, skill_id: &str) -> bool {
        self.skill(skill_id).is_some()
    }

    /// Reject cards with no name, skills with no id or schema, and duplicate skill ids.
    pub fn validate(&self) -> ConductorResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConductorError::Validation(
                "agent card has an empty name".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for skill in &self.skills {
            if skill.id.trim().is_empty() {
                return Err(ConductorError::Validation(format!(
                    "agent '{}' advertises a skill without an id",
                    self.name
                )));
            }
            skill.input()?;
            skill.output()?;
            if !seen.insert(skill.id.as_str()) {
                return Err(ConductorError::Validation(format!(
                    "agent '{}' advertises skill '{}' twice",
                    self.name, skill.id
                )));
            }
        }
        Ok(())
    }
}

// --- Task lifecycle ---

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    /// Created, handler not started yet.
    Submitted,
    /// Handler running.
    Working,
    /// Handler asked for more input; waits for a resubmission.
    InputRequired,
    /// Terminal success.
    Completed,
    /// Terminal failure.
    Failed,
}

impl TaskState {
    /// `completed` or `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// `input-required -> failed` only happens when a pending task expires.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Submitted, Working)
                | (Working, Completed)
                | (Working, Failed)
                | (Working, InputRequired)
                | (InputRequired, Working)
                | (InputRequired, Failed)
        )
    }

    /// Wire name, e.g. `input-required`.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Submitted => "submitted",
            TaskState::Working => "working",
            TaskState::InputRequired => "input-required",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error recorded on a failed task, also used for HTTP error bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Stable snake_case code.
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

impl ErrorDetail {
    /// An error with an arbitrary code.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// The skill handler returned an error.
    pub fn handler_failure(message: impl Into<String>) -> Self {
        Self::new("handler_failure", message)
    }

    /// The skill handler panicked.
    pub fn handler_panicked(message: impl Into<String>) -> Self {
        Self::new("handler_panicked", message)
    }

    /// The handler result broke the output schema.
    pub fn invalid_output(message: impl Into<String>) -> Self {
        Self::new("invalid_output", message)
    }

    /// Nobody answered an input request within the TTL.
    pub fn input_expired(waited_secs: i64) -> Self {
        Self::new(
            "input_expired",
            format!("no input provided within {waited_secs}s"),
        )
    }
}

impl From<&ConductorError> for ErrorDetail {
    fn from(err: &ConductorError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

impl std::fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// What a handler needs before it can continue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRequest {
    /// What the skill needs, for a human or a resolver.
    pub message: String,
    /// Parameter names the caller should supply on resubmission.
    #[serde(default)]
    pub fields: Vec<String>,
}

impl InputRequest {
    /// A request for `fields`, explained by `message`.
    pub fn new(message: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            message: message.into(),
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
        }
    }
}

/// Snapshot of a task as served by its owning agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Assigned by the owning agent.
    pub task_id: Uuid,
    /// Skill the task runs.
    pub skill_id: String,
    /// Parameters after validation and any input merges.
    pub input: Params,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Present only when `state` is `completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Params>,
    /// Present only when `state` is `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    /// Present only when `state` is `input-required`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_request: Option<InputRequest>,
    /// Every state the task has entered, oldest first.
    #[serde(default)]
    pub history: Vec<TaskState>,
    /// Time the task was submitted.
    pub created_at: DateTime<Utc>,
    /// Time of the last transition.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A fresh `submitted` task with a random id.
    pub fn new(skill_id: impl Into<String>, input: Params) -> Self {
        let now = Utc::now();
        Self {
            task_id: Uuid::new_v4(),
            skill_id: skill_id.into(),
            input,
            state: TaskState::Submitted,
            result: None,
            error: None,
            input_request: None,
            history: vec![TaskState::Submitted],
            created_at: now,
            updated_at: now,
        }
    }
}

// --- Wire messages ---

/// Body of `POST /tasks` and `POST /tasks/sync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Skill to invoke.
    pub skill_id: String,
    /// Input parameters.
    #[serde(default)]
    pub parameters: Params,
}

impl TaskRequest {
    /// A request for `skill_id` with `parameters`.
    pub fn new(skill_id: impl Into<String>, parameters: Params) -> Self {
        Self {
            skill_id: skill_id.into(),
            parameters,
        }
    }
}

/// Body of `POST /tasks/{task_id}/input`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputSubmission {
    /// Parameters merged into the task input.
    #[serde(default)]
    pub parameters: Params,
}

/// Answer to a task submission or resubmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Id of the created or resumed task.
    pub task_id: Uuid,
    /// State right after the request was accepted.
    pub state: TaskState,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// `"ok"` while the endpoint is serving.
    pub status: String,
    /// Name from the agent's card.
    pub agent: String,
}

impl HealthStatus {
    /// A healthy report for `agent`.
    pub fn ok(agent: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            agent: agent.into(),
        }
    }

    /// Whether the agent reported itself healthy.
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Error body returned by the HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Code and message of the rejection.
    pub error: ErrorDetail,
}
