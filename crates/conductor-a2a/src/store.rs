use crate::types::{ErrorDetail, InputRequest, Task, TaskState};
use chrono::{DateTime, Duration, Utc};
use conductor_core::{ConductorError, ConductorResult, Params};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Authoritative record of one agent's tasks, indexed by task id.
///
/// Every mutation goes through a transition method that checks the lifecycle
/// first, so a terminal task can never change again.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: HashMap<Uuid, Task>,
}

impl TaskStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly created task and return its id.
    pub fn create(&mut self, skill_id: &str, input: Params) -> Uuid {
        let task = Task::new(skill_id, input);
        let id = task.task_id;
        debug!(task_id = %id, skill = %skill_id, "Task created");
        self.tasks.insert(id, task);
        id
    }

    /// Task `id`, or `NotFound`.
    pub fn get(&self, id: &Uuid) -> ConductorResult<&Task> {
        self.tasks
            .get(id)
            .ok_or_else(|| ConductorError::NotFound(format!("task {id}")))
    }

    /// Whether task `id` exists.
    pub fn contains(&self, id: &Uuid) -> bool {
        self.tasks.contains_key(id)
    }

    /// Number of tasks held.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the store holds no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// `submitted -> working`.
    pub fn start(&mut self, id: &Uuid) -> ConductorResult<&Task> {
        self.transition(id, TaskState::Working, |_| {})
    }

    /// `working -> completed`, recording the result payload.
    pub fn complete(&mut self, id: &Uuid, result: Params) -> ConductorResult<&Task> {
        self.transition(id, TaskState::Completed, |task| task.result = Some(result))
    }

    /// `working -> failed` (or `input-required -> failed` on expiry).
    pub fn fail(&mut self, id: &Uuid, error: ErrorDetail) -> ConductorResult<&Task> {
        self.transition(id, TaskState::Failed, |task| {
            task.input_request = None;
            task.error = Some(error);
        })
    }

    /// `working -> input-required`.
    pub fn require_input(&mut self, id: &Uuid, request: InputRequest) -> ConductorResult<&Task> {
        self.transition(id, TaskState::InputRequired, |task| {
            task.input_request = Some(request)
        })
    }

    /// `input-required -> working`, replacing the task input with `input`.
    pub fn resume(&mut self, id: &Uuid, input: Params) -> ConductorResult<&Task> {
        self.transition(id, TaskState::Working, |task| {
            task.input_request = None;
            task.input = input;
        })
    }

    /// Fail `id` with `input_expired` if it has waited for input longer than `ttl`.
    ///
    /// Returns whether the task was expired by this call.
    pub fn expire_if_stale(&mut self, id: &Uuid, ttl: Duration, now: DateTime<Utc>) -> bool {
        let waited = match self.tasks.get(id) {
            Some(task) if task.state == TaskState::InputRequired => now - task.updated_at,
            _ => return false,
        };
        if waited <= ttl {
            return false;
        }
        self.fail(id, ErrorDetail::input_expired(waited.num_seconds()))
            .is_ok()
    }

    /// Expire every `input-required` task older than `ttl`, returning their ids.
    pub fn expire_input_required(&mut self, ttl: Duration, now: DateTime<Utc>) -> Vec<Uuid> {
        let stale: Vec<Uuid> = self
            .tasks
            .values()
            .filter(|t| t.state == TaskState::InputRequired && now - t.updated_at > ttl)
            .map(|t| t.task_id)
            .collect();

        stale
            .into_iter()
            .filter(|id| self.expire_if_stale(id, ttl, now))
            .collect()
    }

    fn transition(
        &mut self,
        id: &Uuid,
        next: TaskState,
        apply: impl FnOnce(&mut Task),
    ) -> ConductorResult<&Task> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| ConductorError::NotFound(format!("task {id}")))?;

        if !task.state.can_transition_to(next) {
            return Err(ConductorError::InvalidTransition {
                from: task.state.as_str(),
                to: next.as_str(),
            });
        }

        apply(task);
        task.state = next;
        task.history.push(next);
        task.updated_at = Utc::now();
        debug!(task_id = %id, state = %next, "Task transitioned");
        Ok(task)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input() -> Params {
        json!({"requirement": "Total revenue by region"})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_happy_path_records_history() {
        let mut store = TaskStore::new();
        let id = store.create("text-to-sql", input());
        store.start(&id).unwrap();
        let done = store.complete(&id, Params::new()).unwrap();
        assert_eq!(done.state, TaskState::Completed);
        assert_eq!(
            done.history,
            vec![TaskState::Submitted, TaskState::Working, TaskState::Completed]
        );
        assert!(done.result.is_some());
        assert!(done.error.is_none());
    }

    #[test]
    fn test_terminal_tasks_reject_further_transitions() {
        let mut store = TaskStore::new();
        let id = store.create("text-to-sql", input());
        store.start(&id).unwrap();
        store
            .fail(&id, ErrorDetail::handler_failure("boom"))
            .unwrap();

        let err = store.complete(&id, Params::new()).unwrap_err();
        assert!(matches!(
            err,
            ConductorError::InvalidTransition {
                from: "failed",
                to: "completed"
            }
        ));
        let task = store.get(&id).unwrap();
        assert!(task.result.is_none());
        assert_eq!(task.error.as_ref().unwrap().code, "handler_failure");
    }

    #[test]
    fn test_cannot_complete_before_start() {
        let mut store = TaskStore::new();
        let id = store.create("text-to-sql", input());
        assert!(store.complete(&id, Params::new()).is_err());
        assert_eq!(store.get(&id).unwrap().state, TaskState::Submitted);
    }

    #[test]
    fn test_unknown_task_is_not_found() {
        let store = TaskStore::new();
        assert!(matches!(
            store.get(&Uuid::new_v4()),
            Err(ConductorError::NotFound(_))
        ));
    }

    #[test]
    fn test_resume_replaces_input_and_clears_request() {
        let mut store = TaskStore::new();
        let id = store.create("text-to-sql", input());
        store.start(&id).unwrap();
        store
            .require_input(&id, InputRequest::new("which tables?", &["tables"]))
            .unwrap();
        assert!(store.get(&id).unwrap().input_request.is_some());

        let mut merged = input();
        merged.insert("tables".into(), json!(["sales_transactions"]));
        let resumed = store.resume(&id, merged).unwrap();
        assert_eq!(resumed.state, TaskState::Working);
        assert!(resumed.input_request.is_none());
        assert!(resumed.input.contains_key("tables"));
    }

    #[test]
    fn test_expiry_only_touches_stale_input_required_tasks() {
        let mut store = TaskStore::new();
        let waiting = store.create("text-to-sql", input());
        store.start(&waiting).unwrap();
        store
            .require_input(&waiting, InputRequest::new("which tables?", &["tables"]))
            .unwrap();
        let running = store.create("text-to-sql", input());
        store.start(&running).unwrap();

        let ttl = Duration::seconds(60);
        assert!(store.expire_input_required(ttl, Utc::now()).is_empty());

        let later = Utc::now() + Duration::seconds(120);
        assert_eq!(store.expire_input_required(ttl, later), vec![waiting]);

        let expired = store.get(&waiting).unwrap();
        assert_eq!(expired.state, TaskState::Failed);
        assert_eq!(expired.error.as_ref().unwrap().code, "input_expired");
        assert!(expired.input_request.is_none());
        assert_eq!(store.get(&running).unwrap().state, TaskState::Working);
    }
}
