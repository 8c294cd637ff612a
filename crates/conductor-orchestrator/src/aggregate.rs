use crate::plan::{SubtaskId, SubtaskPlan};
use chrono::{DateTime, Utc};
use conductor_a2a::ErrorDetail;
use conductor_core::{ConductorError, ConductorResult, Params};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Why a subtask did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtaskError {
    /// Stable code: a task error code (`handler_failure`, `input_expired`, ...)
    /// or a coordinator code (`unreachable`, `timed_out`, `no_capable_agent`, ...).
    pub kind: String,
    /// Human-readable detail.
    pub message: String,
}

impl SubtaskError {
    /// An error of `kind` with `message`.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<ConductorError> for SubtaskError {
    fn from(err: ConductorError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

impl From<ErrorDetail> for SubtaskError {
    fn from(detail: ErrorDetail) -> Self {
        Self::new(detail.code, detail.message)
    }
}

impl std::fmt::Display for SubtaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Final status of one subtask within a plan execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum SubtaskDisposition {
    /// Finished with a result.
    Completed,
    /// The agent or the coordinator reported an error.
    Failed {
        /// What went wrong.
        error: SubtaskError,
    },
    /// Never dispatched because a dependency did not complete.
    SkippedDependencyFailed {
        /// First dependency found not completed.
        blocked_by: SubtaskId,
    },
    /// The request was cancelled or timed out before this subtask finished.
    Abandoned {
        /// Cancellation or deadline.
        reason: String,
    },
}

impl SubtaskDisposition {
    /// Whether the subtask finished with a result.
    pub fn is_completed(&self) -> bool {
        matches!(self, SubtaskDisposition::Completed)
    }

    /// Kebab-case name used in logs and reports.
    pub fn label(&self) -> &'static str {
        match self {
            SubtaskDisposition::Completed => "completed",
            SubtaskDisposition::Failed { .. } => "failed",
            SubtaskDisposition::SkippedDependencyFailed { .. } => "skipped-dependency-failed",
            SubtaskDisposition::Abandoned { .. } => "abandoned",
        }
    }
}

/// What happened to one subtask, for the aggregated report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskReport {
    /// Position in the plan.
    pub id: SubtaskId,
    /// Name from the plan.
    pub name: String,
    /// Skill the subtask invoked.
    pub skill_id: String,
    /// Agent the subtask was routed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Remote task id, if the subtask was dispatched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
    /// How the subtask ended.
    pub disposition: SubtaskDisposition,
}

/// Everything the engine learned while executing a plan, before aggregation.
#[derive(Debug, Default)]
pub struct ExecutionRecord {
    /// Outcome of every subtask that reached one.
    pub dispositions: HashMap<SubtaskId, SubtaskDisposition>,
    /// Result payloads of completed subtasks.
    pub outputs: HashMap<SubtaskId, Params>,
    /// Agent each dispatched subtask was routed to.
    pub agents: HashMap<SubtaskId, String>,
    /// Remote task id of each dispatched subtask.
    pub task_ids: HashMap<SubtaskId, Uuid>,
    /// When execution began.
    pub started_at: Option<DateTime<Utc>>,
}

/// User-facing synthesis of all subtask results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    /// Question the plan was built for.
    pub question: String,
    /// Subtask whose result is the answer.
    pub final_subtask: SubtaskId,
    /// Result payload of the final-answer subtask.
    pub answer: Params,
    /// Result payload of every completed subtask, keyed by subtask name.
    pub contributions: BTreeMap<String, Params>,
    /// One report per subtask, in id order.
    pub subtasks: Vec<SubtaskReport>,
    /// Some subtask did not complete, but the final answer did.
    pub partial: bool,
    /// Ids of failed subtasks.
    pub failed: Vec<SubtaskId>,
    /// Ids skipped because a dependency did not complete.
    pub skipped: Vec<SubtaskId>,
    /// Ids abandoned on cancellation or deadline.
    pub abandoned: Vec<SubtaskId>,
    /// When execution began.
    pub started_at: DateTime<Utc>,
    /// When the last subtask settled.
    pub finished_at: DateTime<Utc>,
}

impl AggregatedResult {
    /// Merge `record` into a result for `plan`.
    ///
    /// The merge depends only on each subtask's disposition and output, never
    /// on the order they finished in. Fails with
    /// [`ConductorError::OrchestrationFailed`] when the final-answer subtask
    /// did not complete.
    pub fn assemble(plan: &SubtaskPlan, mut record: ExecutionRecord) -> ConductorResult<Self> {
        let mut subtasks = Vec::with_capacity(plan.len());
        let mut contributions = BTreeMap::new();
        let (mut failed, mut skipped, mut abandoned) = (Vec::new(), Vec::new(), Vec::new());

        for subtask in &plan.subtasks {
            let disposition = record.dispositions.remove(&subtask.id).unwrap_or_else(|| {
                SubtaskDisposition::Abandoned {
                    reason: "never scheduled".to_string(),
                }
            });
            match &disposition {
                SubtaskDisposition::Completed => {
                    let output = record.outputs.remove(&subtask.id).unwrap_or_default();
                    contributions.insert(subtask.name.clone(), output);
                }
                SubtaskDisposition::Failed { .. } => failed.push(subtask.id),
                SubtaskDisposition::SkippedDependencyFailed { .. } => skipped.push(subtask.id),
                SubtaskDisposition::Abandoned { .. } => abandoned.push(subtask.id),
            }
            subtasks.push(SubtaskReport {
                id: subtask.id,
                name: subtask.name.clone(),
                skill_id: subtask.skill_id.clone(),
                agent: record.agents.remove(&subtask.id),
                task_id: record.task_ids.remove(&subtask.id),
                disposition,
            });
        }

        let final_id = plan.final_answer();
        let final_report = subtasks
            .get(final_id.0)
            .ok_or_else(|| ConductorError::Plan(format!("final answer {final_id} is out of range")))?;

        if !final_report.disposition.is_completed() {
            return Err(ConductorError::OrchestrationFailed {
                subtask: final_report.name.clone(),
                chain: failure_chain(&subtasks, final_id),
            });
        }

        let answer = contributions
            .get(&final_report.name)
            .cloned()
            .unwrap_or_default();
        Ok(Self {
            question: plan.question.clone(),
            final_subtask: final_id,
            answer,
            contributions,
            partial: !(failed.is_empty() && skipped.is_empty() && abandoned.is_empty()),
            subtasks,
            failed,
            skipped,
            abandoned,
            started_at: record.started_at.unwrap_or_else(Utc::now),
            finished_at: Utc::now(),
        })
    }

    /// Report for subtask `id`.
    pub fn report(&self, id: SubtaskId) -> Option<&SubtaskReport> {
        self.subtasks.get(id.0)
    }

    /// Report for the subtask called `name`.
    pub fn report_named(&self, name: &str) -> Option<&SubtaskReport> {
        self.subtasks.iter().find(|r| r.name == name)
    }
}

/// Describe how `start` came to fail: walk `blocked_by` links back to the
/// root cause, then list every other subtask that did not complete.
fn failure_chain(reports: &[SubtaskReport], start: SubtaskId) -> Vec<String> {
    let mut chain = Vec::new();
    let mut on_path = Vec::new();
    let mut cursor = Some(start);

    while let Some(id) = cursor {
        let Some(report) = reports.get(id.0) else {
            break;
        };
        if on_path.contains(&id) {
            break;
        }
        on_path.push(id);
        chain.push(describe(report));
        cursor = match &report.disposition {
            SubtaskDisposition::SkippedDependencyFailed { blocked_by } => Some(*blocked_by),
            _ => None,
        };
    }

    for report in reports {
        if !on_path.contains(&report.id)
            && matches!(
                report.disposition,
                SubtaskDisposition::Failed { .. } | SubtaskDisposition::Abandoned { .. }
            )
        {
            chain.push(describe(report));
        }
    }
    chain
}

fn describe(report: &SubtaskReport) -> String {
    let name = &report.name;
    let skill = &report.skill_id;
    match &report.disposition {
        SubtaskDisposition::Completed => format!("{name} ({skill}) completed"),
        SubtaskDisposition::Failed { error } => format!("{name} ({skill}) failed: {error}"),
        SubtaskDisposition::SkippedDependencyFailed { blocked_by } => {
            format!("{name} ({skill}) skipped: dependency {blocked_by} did not complete")
        }
        SubtaskDisposition::Abandoned { reason } => format!("{name} ({skill}) abandoned: {reason}"),
    }
}
