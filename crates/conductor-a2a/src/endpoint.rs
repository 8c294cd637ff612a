use crate::handler::{SkillHandler, SkillOutcome};
use crate::store::TaskStore;
use crate::types::{AgentCard, ErrorDetail, SkillDescriptor, Task, TaskState};
use chrono::Utc;
use conductor_core::{ConductorError, ConductorResult, Params};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Endpoint-side settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// How long an `input-required` task may wait before it fails with
    /// `input_expired`. `None` keeps it pending forever.
    pub input_required_ttl_secs: Option<u64>,
    /// Upper bound on how long `POST /tasks/sync` waits for a task to settle.
    pub sync_timeout_ms: u64,
    /// Fail tasks whose result lacks a required output field.
    pub validate_output: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            input_required_ttl_secs: Some(300),
            sync_timeout_ms: 120_000,
            validate_output: true,
        }
    }
}

impl EndpointConfig {
    fn input_ttl(&self) -> Option<chrono::Duration> {
        self.input_required_ttl_secs
            .map(|secs| chrono::Duration::seconds(i64::from(u32::try_from(secs).unwrap_or(u32::MAX))))
    }
}

/// Builder for [`AgentEndpoint`]; collects skills and validates the card once.
pub struct AgentEndpointBuilder {
    card: AgentCard,
    handlers: HashMap<String, Arc<dyn SkillHandler>>,
    config: EndpointConfig,
}

impl AgentEndpointBuilder {
    /// Description shown on the card.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.card.description = description.into();
        self
    }

    /// Base URL advertised on the card.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.card.url = url.into();
        self
    }

    /// Endpoint settings; defaults otherwise.
    pub fn config(mut self, config: EndpointConfig) -> Self {
        self.config = config;
        self
    }

    /// Expose `handler` as the skill described by `descriptor`.
    pub fn skill(mut self, descriptor: SkillDescriptor, handler: Arc<dyn SkillHandler>) -> Self {
        self.handlers.insert(descriptor.id.clone(), handler);
        self.card.skills.push(descriptor);
        self
    }

    /// Validate the card and assemble the endpoint.
    pub fn build(self) -> ConductorResult<AgentEndpoint> {
        self.card.validate()?;
        Ok(AgentEndpoint {
            card: self.card,
            handlers: self.handlers,
            tasks: Arc::new(RwLock::new(TaskStore::new())),
            changed: Arc::new(Notify::new()),
            config: self.config,
        })
    }
}

/// Server side of the task protocol for one agent.
///
/// Owns the agent's [`TaskStore`]. Each accepted task runs its handler on a
/// dedicated tokio task, so a slow, failing, or panicking handler only
/// affects its own task record.
pub struct AgentEndpoint {
    card: AgentCard,
    handlers: HashMap<String, Arc<dyn SkillHandler>>,
    tasks: Arc<RwLock<TaskStore>>,
    changed: Arc<Notify>,
    config: EndpointConfig,
}

impl AgentEndpoint {
    /// Start building an endpoint for agent `name`.
    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> AgentEndpointBuilder {
        AgentEndpointBuilder {
            card: AgentCard::new(name, version),
            handlers: HashMap::new(),
            config: EndpointConfig::default(),
        }
    }

    /// The discovery document this endpoint publishes.
    pub fn card(&self) -> &AgentCard {
        &self.card
    }

    /// Settings the endpoint was built with.
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Set the advertised base URL, typically once the listener is bound.
    pub fn set_url(&mut self, url: impl Into<String>) {
        self.card.url = url.into();
    }

    /// Number of tasks this endpoint has ever accepted.
    pub async fn task_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Validate `input` against the skill's schema, create the task, and
    /// start executing it.
    ///
    /// Rejections happen before the task store is touched.
    pub async fn submit(&self, skill_id: &str, input: Params) -> ConductorResult<Uuid> {
        let descriptor = self.descriptor(skill_id)?;
        descriptor.input()?.validate(&input)?;

        let id = {
            let mut tasks = self.tasks.write().await;
            let id = tasks.create(skill_id, input.clone());
            tasks.start(&id)?;
            id
        };

        info!(agent = %self.card.name, task_id = %id, skill = %skill_id, "Task accepted");
        self.spawn_execution(id, descriptor, input)?;
        Ok(id)
    }

    /// Submit and wait, bounded by `sync_timeout_ms`, until the task is
    /// terminal or waiting for input.
    pub async fn submit_sync(&self, skill_id: &str, input: Params) -> ConductorResult<Task> {
        let id = self.submit(skill_id, input).await?;
        self.wait_settled(&id, Duration::from_millis(self.config.sync_timeout_ms))
            .await
    }

    /// Current snapshot of a task.
    ///
    /// An `input-required` task past its TTL is failed here before the
    /// snapshot is taken.
    pub async fn get_status(&self, id: &Uuid) -> ConductorResult<Task> {
        let Some(ttl) = self.config.input_ttl() else {
            return self.tasks.read().await.get(id).cloned();
        };

        let mut tasks = self.tasks.write().await;
        if tasks.expire_if_stale(id, ttl, Utc::now()) {
            info!(agent = %self.card.name, task_id = %id, "Input-required task expired");
            self.changed.notify_waiters();
        }
        tasks.get(id).cloned()
    }

    /// Resubmit an `input-required` task with additional parameters.
    ///
    /// The parameters are merged over the task's existing input and the
    /// merged input is validated again before the handler is re-invoked.
    pub async fn provide_input(&self, id: &Uuid, parameters: Params) -> ConductorResult<TaskState> {
        let (descriptor, merged) = {
            let mut tasks = self.tasks.write().await;
            if let Some(ttl) = self.config.input_ttl() {
                tasks.expire_if_stale(id, ttl, Utc::now());
            }

            let task = tasks.get(id)?;
            if task.state != TaskState::InputRequired {
                return Err(ConductorError::InvalidTransition {
                    from: task.state.as_str(),
                    to: TaskState::Working.as_str(),
                });
            }

            let descriptor = self.descriptor(&task.skill_id)?;
            let mut merged = task.input.clone();
            merged.extend(parameters);
            descriptor.input()?.validate(&merged)?;

            tasks.resume(id, merged.clone())?;
            (descriptor, merged)
        };

        info!(agent = %self.card.name, task_id = %id, "Task resumed with additional input");
        self.spawn_execution(*id, descriptor, merged)?;
        Ok(TaskState::Working)
    }

    /// Wait until `id` is terminal or `input-required`, or `timeout` elapses.
    /// Returns the latest snapshot either way.
    pub async fn wait_settled(&self, id: &Uuid, timeout: Duration) -> ConductorResult<Task> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let task = self.get_status(id).await?;
            if task.state.is_terminal() || task.state == TaskState::InputRequired {
                return Ok(task);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.get_status(id).await;
            }
        }
    }

    /// Fail every `input-required` task past its TTL. Returns the expired ids.
    pub async fn expire_stale(&self) -> Vec<Uuid> {
        let Some(ttl) = self.config.input_ttl() else {
            return Vec::new();
        };
        let expired = self
            .tasks
            .write()
            .await
            .expire_input_required(ttl, Utc::now());
        if !expired.is_empty() {
            info!(agent = %self.card.name, count = expired.len(), "Expired input-required tasks");
            self.changed.notify_waiters();
        }
        expired
    }

    /// Run [`expire_stale`](Self::expire_stale) every `period` until the
    /// endpoint is dropped. Returns `None` when no TTL is configured.
    pub fn spawn_expiry_sweeper(self: &Arc<Self>, period: Duration) -> Option<JoinHandle<()>> {
        self.config.input_required_ttl_secs?;
        let weak: Weak<Self> = Arc::downgrade(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(endpoint) = weak.upgrade() else {
                    break;
                };
                endpoint.expire_stale().await;
            }
        }))
    }

    fn descriptor(&self, skill_id: &str) -> ConductorResult<&SkillDescriptor> {
        self.card.skill(skill_id).ok_or_else(|| {
            ConductorError::NotFound(format!(
                "skill '{skill_id}' on agent '{}'",
                self.card.name
            ))
        })
    }

    fn spawn_execution(
        &self,
        id: Uuid,
        descriptor: &SkillDescriptor,
        input: Params,
    ) -> ConductorResult<()> {
        let handler = self.handlers.get(&descriptor.id).cloned().ok_or_else(|| {
            ConductorError::NotFound(format!("handler for skill '{}'", descriptor.id))
        })?;
        let output_schema = if self.config.validate_output {
            descriptor.output_schema.clone()
        } else {
            None
        };
        let tasks = Arc::clone(&self.tasks);
        let changed = Arc::clone(&self.changed);
        let agent = self.card.name.clone();

        tokio::spawn(async move {
            let run = tokio::spawn(async move { handler.handle(input).await }).await;

            let mut store = tasks.write().await;
            let recorded = match run {
                Ok(Ok(SkillOutcome::Completed(result))) => {
                    match output_schema.map(|schema| schema.validate(&result)) {
                        Some(Err(e)) => {
                            warn!(agent = %agent, task_id = %id, error = %e, "Handler output violates schema");
                            store.fail(&id, ErrorDetail::invalid_output(e.to_string()))
                        }
                        _ => store.complete(&id, result),
                    }
                }
                Ok(Ok(SkillOutcome::InputRequired(request))) => {
                    info!(agent = %agent, task_id = %id, fields = ?request.fields, "Task needs input");
                    store.require_input(&id, request)
                }
                Ok(Err(e)) => {
                    warn!(agent = %agent, task_id = %id, error = %e, "Handler failed");
                    let message = match e {
                        ConductorError::HandlerFailure(msg) => msg,
                        other => other.to_string(),
                    };
                    store.fail(&id, ErrorDetail::handler_failure(message))
                }
                Err(join_err) => {
                    error!(agent = %agent, task_id = %id, error = %join_err, "Handler panicked");
                    store.fail(&id, ErrorDetail::handler_panicked(join_err.to_string()))
                }
            };

            match recorded {
                Ok(task) => info!(agent = %agent, task_id = %id, state = %task.state, "Task settled"),
                Err(e) => warn!(agent = %agent, task_id = %id, error = %e, "Could not record task outcome"),
            }
            drop(store);
            changed.notify_waiters();
        });

        Ok(())
    }
}
