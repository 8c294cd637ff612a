use crate::registry::SharedRegistry;
use crate::retry::{jitter, with_retry, with_retry_if, RetryPolicy};
use crate::transport::{normalize_url, AgentTransport};
use crate::types::{AgentCard, ErrorDetail, InputRequest, Task, TaskRequest, TaskState};
use conductor_core::{ConductorError, ConductorResult, Params};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Coordinator-side protocol settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// First delay between status polls.
    pub poll_interval_ms: u64,
    /// Polling backs off up to this delay.
    pub max_poll_interval_ms: u64,
    /// Wait used by callers that do not pass their own timeout.
    pub default_timeout_ms: u64,
    /// Transport-level retries for every protocol call.
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            max_poll_interval_ms: 2_000,
            default_timeout_ms: 30_000,
            retry: RetryPolicy::default(),
        }
    }
}

/// Coordinator's reference to a remote task. The task itself stays owned by
/// the agent that created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    /// Name of the agent that owns the task.
    pub agent: String,
    /// Normalized base URL of that agent.
    pub endpoint: String,
    /// Skill the task invokes.
    pub skill_id: String,
    /// Id assigned by the agent.
    pub task_id: Uuid,
}

/// How a remote task ended, or why the wait stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// The task completed with this result.
    Completed(Params),
    /// The task failed with this detail.
    Failed(ErrorDetail),
    /// The agent wants more input; answer with
    /// [`ProtocolClient::provide_input`] or treat it as a failure.
    InputRequired(InputRequest),
}

/// Drives the task lifecycle from the caller's side over an [`AgentTransport`].
#[derive(Clone)]
pub struct ProtocolClient {
    transport: Arc<dyn AgentTransport>,
    config: ClientConfig,
}

impl ProtocolClient {
    /// A client over `transport`.
    pub fn new(transport: Arc<dyn AgentTransport>, config: ClientConfig) -> Self {
        Self { transport, config }
    }

    /// A client over HTTP.
    #[cfg(feature = "client")]
    pub fn http(config: ClientConfig) -> ConductorResult<Self> {
        let transport = crate::http::HttpTransport::new()?;
        Ok(Self::new(Arc::new(transport), config))
    }

    /// Settings this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// `default_timeout_ms` as a [`Duration`].
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.config.default_timeout_ms)
    }

    /// Submit a task for `skill_id` to `agent`.
    ///
    /// A synchronous rejection by the endpoint becomes
    /// [`ConductorError::RejectedInput`]. Only failures where the request
    /// never left are retried, ending in [`ConductorError::Unreachable`]; a
    /// lost response is returned as [`ConductorError::NoResponse`] without
    /// resending, since the agent may already be running the task.
    pub async fn dispatch(
        &self,
        agent: &AgentCard,
        skill_id: &str,
        input: Params,
    ) -> ConductorResult<TaskHandle> {
        if agent.url.trim().is_empty() {
            return Err(ConductorError::Validation(format!(
                "agent '{}' has no endpoint url",
                agent.name
            )));
        }
        let endpoint = normalize_url(&agent.url).to_string();
        let request = TaskRequest::new(skill_id, input);

        let accepted = with_retry_if(
            &self.config.retry,
            &endpoint,
            "submit",
            ConductorError::is_undelivered,
            || self.transport.submit(&endpoint, &request),
        )
        .await
        .map_err(as_rejection)?;

        info!(
            agent = %agent.name,
            skill = %skill_id,
            task_id = %accepted.task_id,
            "Task dispatched"
        );
        Ok(TaskHandle {
            agent: agent.name.clone(),
            endpoint,
            skill_id: skill_id.to_string(),
            task_id: accepted.task_id,
        })
    }

    /// One status read, with transport retries.
    pub async fn status(&self, handle: &TaskHandle) -> ConductorResult<Task> {
        with_retry(&self.config.retry, &handle.endpoint, "status", || {
            self.transport.status(&handle.endpoint, handle.task_id)
        })
        .await
    }

    /// Poll until the task is terminal, asks for input, or `timeout` elapses.
    ///
    /// Polls back off from `poll_interval_ms` to `max_poll_interval_ms` with
    /// jitter. A status call still retrying when the deadline passes counts
    /// as [`ConductorError::TimedOut`]; exhausting the retries first gives
    /// [`ConductorError::Unreachable`].
    pub async fn await_result(
        &self,
        handle: &TaskHandle,
        timeout: Duration,
    ) -> ConductorResult<TaskOutcome> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut interval = self.config.poll_interval_ms.max(1);

        loop {
            let task = match tokio::time::timeout_at(deadline, self.status(handle)).await {
                Ok(task) => task?,
                Err(_) => return Err(timed_out(handle, started)),
            };

            match task.state {
                TaskState::Completed => {
                    return Ok(TaskOutcome::Completed(task.result.unwrap_or_default()))
                }
                TaskState::Failed => {
                    let detail = task.error.unwrap_or_else(|| {
                        ErrorDetail::handler_failure("task failed without error detail")
                    });
                    return Ok(TaskOutcome::Failed(detail));
                }
                TaskState::InputRequired => {
                    let request = task.input_request.unwrap_or_else(|| {
                        InputRequest::new("additional input required", &[])
                    });
                    return Ok(TaskOutcome::InputRequired(request));
                }
                TaskState::Submitted | TaskState::Working => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(timed_out(handle, started));
            }
            let pause = Duration::from_millis(jitter(interval)).min(deadline - now);
            debug!(task_id = %handle.task_id, state = %task.state, pause_ms = pause.as_millis() as u64, "Task still running");
            tokio::time::sleep(pause).await;
            interval = interval
                .saturating_mul(2)
                .min(self.config.max_poll_interval_ms.max(1));
        }
    }

    /// Answer an `input-required` task with extra parameters bound to the same task id.
    ///
    /// Like [`ProtocolClient::dispatch`], only undelivered requests are
    /// resent. When the response is lost the task is read back: if it has
    /// left `input-required` the agent took the input and the call succeeds.
    pub async fn provide_input(&self, handle: &TaskHandle, parameters: Params) -> ConductorResult<()> {
        let sent = with_retry_if(
            &self.config.retry,
            &handle.endpoint,
            "provide_input",
            ConductorError::is_undelivered,
            || {
                self.transport
                    .provide_input(&handle.endpoint, handle.task_id, &parameters)
            },
        )
        .await;

        match sent {
            Ok(_) => {}
            Err(ConductorError::NoResponse(reason)) => {
                let task = self.status(handle).await?;
                if task.state == TaskState::InputRequired {
                    warn!(task_id = %handle.task_id, error = %reason, "Input resubmission unconfirmed");
                    return Err(ConductorError::NoResponse(reason));
                }
                debug!(task_id = %handle.task_id, state = %task.state, "Input accepted despite lost response");
            }
            Err(e) => return Err(as_rejection(e)),
        }
        info!(agent = %handle.agent, task_id = %handle.task_id, "Input provided");
        Ok(())
    }

    /// Whether the agent at `url` answers its health route.
    ///
    /// One attempt, no retries; any failure counts as unhealthy.
    pub async fn health_check(&self, url: &str) -> bool {
        let base = normalize_url(url);
        match self.transport.health(base).await {
            Ok(health) => health.is_ok(),
            Err(e) => {
                debug!(url = %base, error = %e, "Health check failed");
                false
            }
        }
    }

    /// Fetch the discovery document at `url`, with transport retries.
    ///
    /// A card that does not name its own url gets `url` filled in.
    pub async fn fetch_card(&self, url: &str) -> ConductorResult<AgentCard> {
        let base = normalize_url(url).to_string();
        let mut card = with_retry(&self.config.retry, &base, "fetch_card", || {
            self.transport.fetch_card(&base)
        })
        .await?;
        if card.url.trim().is_empty() {
            card.url = base;
        }
        Ok(card)
    }

    /// Fetch the card at `url` and register it.
    pub async fn discover(&self, url: &str, registry: &SharedRegistry) -> ConductorResult<AgentCard> {
        let card = self.fetch_card(url).await?;
        registry.write().register(card.clone())?;
        Ok(card)
    }
}

fn as_rejection(err: ConductorError) -> ConductorError {
    match err {
        ConductorError::Validation(msg) | ConductorError::NotFound(msg) => {
            ConductorError::RejectedInput(msg)
        }
        other => other,
    }
}

fn timed_out(handle: &TaskHandle, started: Instant) -> ConductorError {
    ConductorError::TimedOut {
        task_id: handle.task_id.to_string(),
        waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::endpoint::AgentEndpoint;
    use crate::handler::{handler_fn, SkillOutcome};
    use crate::registry::AgentRegistry;
    use crate::transport::LocalTransport;
    use crate::types::SkillDescriptor;
    use conductor_core::{into_params, ParamType, Schema};
    use serde_json::json;
    use tokio::sync::Notify;

    fn fast_config() -> ClientConfig {
        ClientConfig {
            poll_interval_ms: 5,
            max_poll_interval_ms: 20,
            default_timeout_ms: 2_000,
            retry: RetryPolicy {
                max_retries: 2,
                backoff_base_ms: 1,
                backoff_max_ms: 5,
            },
        }
    }

    fn analysis_endpoint(gate: Arc<Notify>) -> Arc<AgentEndpoint> {
        let endpoint = AgentEndpoint::builder("analysis", "1.0.0")
            .url("local://analysis")
            .skill(
                SkillDescriptor::new(
                    "analyze-results",
                    Schema::new().required("rows", ParamType::Array),
                    Schema::new().required("row_count", ParamType::Integer),
                ),
                handler_fn(move |input: Params| {
                    let gate = Arc::clone(&gate);
                    async move {
                        let rows = input["rows"].as_array().map_or(0, Vec::len);
                        if rows == 0 {
                            gate.notified().await;
                        }
                        SkillOutcome::completed(json!({"row_count": rows}))
                    }
                }),
            )
            .build()
            .unwrap();
        Arc::new(endpoint)
    }

    fn setup() -> (ProtocolClient, AgentCard, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let endpoint = analysis_endpoint(Arc::clone(&gate));
        let card = endpoint.card().clone();
        let transport = LocalTransport::new();
        transport.mount("local://analysis", endpoint);
        (
            ProtocolClient::new(Arc::new(transport), fast_config()),
            card,
            gate,
        )
    }

    #[tokio::test]
    async fn test_dispatch_and_await_completion() {
        let (client, card, _gate) = setup();
        let handle = client
            .dispatch(&card, "analyze-results", into_params(json!({"rows": [{"a": 1}]})).unwrap())
            .await
            .unwrap();
        assert_eq!(handle.agent, "analysis");

        let outcome = client
            .await_result(&handle, client.default_timeout())
            .await
            .unwrap();
        match outcome {
            TaskOutcome::Completed(result) => assert_eq!(result["row_count"], 1),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_synchronous_rejection_is_rejected_input() {
        let (client, card, _gate) = setup();
        let err = client
            .dispatch(&card, "analyze-results", into_params(json!({"rows": "nope"})).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::RejectedInput(_)));
    }

    #[tokio::test]
    async fn test_stuck_task_times_out() {
        let (client, card, _gate) = setup();
        let handle = client
            .dispatch(&card, "analyze-results", into_params(json!({"rows": []})).unwrap())
            .await
            .unwrap();
        let err = client
            .await_result(&handle, Duration::from_millis(80))
            .await
            .unwrap_err();
        match err {
            ConductorError::TimedOut { task_id, waited_ms } => {
                assert_eq!(task_id, handle.task_id.to_string());
                assert!(waited_ms >= 80);
            }
            other => panic!("expected TimedOut, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unmounted_agent_is_unreachable() {
        let (client, _card, _gate) = setup();
        let ghost = AgentCard::new("ghost", "1.0.0").with_url("local://ghost");
        let err = client
            .dispatch(&ghost, "analyze-results", Params::new())
            .await
            .unwrap_err();
        match err {
            ConductorError::Unreachable { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected Unreachable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_agent_without_url_is_rejected() {
        let (client, mut card, _gate) = setup();
        card.url.clear();
        let err = client
            .dispatch(&card, "analyze-results", Params::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::Validation(_)));
    }

    #[tokio::test]
    async fn test_discover_registers_fetched_card() {
        let (client, _card, _gate) = setup();
        let registry = AgentRegistry::shared();
        let card = client.discover("local://analysis/", &registry).await.unwrap();
        assert_eq!(card.url, "local://analysis");
        assert_eq!(registry.read().find_agents("analyze-results").len(), 1);
    }

    #[tokio::test]
    async fn test_health_check() {
        let (client, _card, _gate) = setup();
        assert!(client.health_check("local://analysis/").await);
        assert!(!client.health_check("local://ghost").await);
    }
}
