use crate::endpoint::AgentEndpoint;
use crate::types::{AgentCard, HealthStatus, SubmitResponse, Task, TaskRequest};
use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult, Params};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// How the protocol client reaches a remote endpoint.
///
/// Implementations report transient failures as
/// [`ConductorError::Transport`] and leave retrying to the caller.
/// Synchronous rejections surface as `Validation` or `NotFound`.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Fetch the discovery document served at `base_url`.
    async fn fetch_card(&self, base_url: &str) -> ConductorResult<AgentCard>;

    /// Submit a new task. Not safe to repeat once the request may have
    /// been delivered.
    async fn submit(&self, base_url: &str, request: &TaskRequest) -> ConductorResult<SubmitResponse>;

    /// Resubmit additional parameters to an `input-required` task.
    async fn provide_input(
        &self,
        base_url: &str,
        task_id: Uuid,
        parameters: &Params,
    ) -> ConductorResult<SubmitResponse>;

    /// Current snapshot of a task.
    async fn status(&self, base_url: &str, task_id: Uuid) -> ConductorResult<Task>;

    /// Read the agent's liveness route.
    async fn health(&self, base_url: &str) -> ConductorResult<HealthStatus>;
}

/// Normalize a base URL so `http://a/` and `http://a` address the same agent.
pub fn normalize_url(base_url: &str) -> &str {
    base_url.trim_end_matches('/')
}

/// In-process transport: endpoints are mounted under a URL and called directly.
///
/// Calls to an unmounted URL fail like a refused connection, so the client's
/// retry and `Unreachable` handling behave exactly as over HTTP.
#[derive(Default)]
pub struct LocalTransport {
    endpoints: RwLock<HashMap<String, Arc<AgentEndpoint>>>,
}

impl LocalTransport {
    /// A transport with nothing mounted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `endpoint` under `base_url`, replacing any earlier mount.
    pub fn mount(&self, base_url: &str, endpoint: Arc<AgentEndpoint>) {
        self.endpoints
            .write()
            .insert(normalize_url(base_url).to_string(), endpoint);
    }

    /// Stop serving `base_url`; later calls fail like a refused connection.
    pub fn unmount(&self, base_url: &str) -> Option<Arc<AgentEndpoint>> {
        self.endpoints.write().remove(normalize_url(base_url))
    }

    fn endpoint(&self, base_url: &str) -> ConductorResult<Arc<AgentEndpoint>> {
        self.endpoints
            .read()
            .get(normalize_url(base_url))
            .cloned()
            .ok_or_else(|| ConductorError::Transport(format!("connection refused: {base_url}")))
    }
}

/// Mirror what the HTTP client sees for a 409: a plain validation rejection.
fn as_wire_rejection(err: ConductorError) -> ConductorError {
    match err {
        ConductorError::InvalidTransition { .. } => ConductorError::Validation(err.to_string()),
        other => other,
    }
}

#[async_trait]
impl AgentTransport for LocalTransport {
    async fn fetch_card(&self, base_url: &str) -> ConductorResult<AgentCard> {
        let endpoint = self.endpoint(base_url)?;
        Ok(endpoint.card().clone())
    }

    async fn submit(&self, base_url: &str, request: &TaskRequest) -> ConductorResult<SubmitResponse> {
        let endpoint = self.endpoint(base_url)?;
        let task_id = endpoint
            .submit(&request.skill_id, request.parameters.clone())
            .await?;
        let state = endpoint.get_status(&task_id).await?.state;
        Ok(SubmitResponse { task_id, state })
    }

    async fn provide_input(
        &self,
        base_url: &str,
        task_id: Uuid,
        parameters: &Params,
    ) -> ConductorResult<SubmitResponse> {
        let endpoint = self.endpoint(base_url)?;
        let state = endpoint
            .provide_input(&task_id, parameters.clone())
            .await
            .map_err(as_wire_rejection)?;
        Ok(SubmitResponse { task_id, state })
    }

    async fn status(&self, base_url: &str, task_id: Uuid) -> ConductorResult<Task> {
        self.endpoint(base_url)?.get_status(&task_id).await
    }

    async fn health(&self, base_url: &str) -> ConductorResult<HealthStatus> {
        let endpoint = self.endpoint(base_url)?;
        Ok(HealthStatus::ok(&endpoint.card().name))
    }
}
