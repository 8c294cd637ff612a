use crate::server::WELL_KNOWN_CARD_PATH;
use crate::transport::{normalize_url, AgentTransport};
use crate::types::{
    AgentCard, ErrorBody, HealthStatus, InputSubmission, SubmitResponse, Task, TaskRequest,
};
use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult, Params};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use uuid::Uuid;

/// Per-request timeout for a single protocol call (not the task wait).
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP transport speaking the JSON task protocol.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// A transport with a 10 second per-call timeout.
    pub fn new() -> ConductorResult<Self> {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Build a transport whose individual calls give up after `timeout`.
    pub fn with_timeout(timeout: Duration) -> ConductorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConductorError::Config(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> ConductorResult<T> {
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| {
                if e.is_timeout() {
                    ConductorError::NoResponse(e.to_string())
                } else {
                    ConductorError::Protocol(format!("undecodable response body: {e}"))
                }
            });
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.error.message)
            .unwrap_or(text);
        Err(error_for_status(status, message))
    }
}

/// Map an HTTP failure status onto the error taxonomy.
///
/// 502/503 are transient and undelivered. A 504 means a gateway forwarded
/// the request and gave up waiting, so the agent may have seen it.
/// 400/409/422 are synchronous rejections.
fn error_for_status(status: StatusCode, message: String) -> ConductorError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            ConductorError::Validation(message)
        }
        StatusCode::NOT_FOUND => ConductorError::NotFound(message),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => {
            ConductorError::Transport(format!("HTTP {status}: {message}"))
        }
        StatusCode::GATEWAY_TIMEOUT => ConductorError::NoResponse(format!("HTTP {status}: {message}")),
        _ => ConductorError::Protocol(format!("HTTP {status}: {message}")),
    }
}

/// A failed connect never reached the agent. A timeout or a connection
/// dropped mid-request may have, so it is reported as a lost response.
fn send_error(err: reqwest::Error) -> ConductorError {
    if err.is_connect() {
        ConductorError::Transport(err.to_string())
    } else if err.is_timeout() || err.is_request() {
        ConductorError::NoResponse(err.to_string())
    } else {
        ConductorError::Protocol(err.to_string())
    }
}

#[async_trait]
impl AgentTransport for HttpTransport {
    async fn fetch_card(&self, base_url: &str) -> ConductorResult<AgentCard> {
        let url = format!("{}{WELL_KNOWN_CARD_PATH}", normalize_url(base_url));
        let response = self.client.get(url).send().await.map_err(send_error)?;
        Self::decode(response).await
    }

    async fn submit(&self, base_url: &str, request: &TaskRequest) -> ConductorResult<SubmitResponse> {
        let url = format!("{}/tasks", normalize_url(base_url));
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(send_error)?;
        Self::decode(response).await
    }

    async fn provide_input(
        &self,
        base_url: &str,
        task_id: Uuid,
        parameters: &Params,
    ) -> ConductorResult<SubmitResponse> {
        let url = format!("{}/tasks/{task_id}/input", normalize_url(base_url));
        let body = InputSubmission {
            parameters: parameters.clone(),
        };
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(send_error)?;
        Self::decode(response).await
    }

    async fn status(&self, base_url: &str, task_id: Uuid) -> ConductorResult<Task> {
        let url = format!("{}/tasks/{task_id}", normalize_url(base_url));
        let response = self.client.get(url).send().await.map_err(send_error)?;
        Self::decode(response).await
    }

    async fn health(&self, base_url: &str) -> ConductorResult<HealthStatus> {
        let url = format!("{}/health", normalize_url(base_url));
        let response = self.client.get(url).send().await.map_err(send_error)?;
        Self::decode(response).await
    }
}
