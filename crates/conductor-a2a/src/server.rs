use crate::endpoint::AgentEndpoint;
use crate::types::{
    AgentCard, ErrorBody, ErrorDetail, HealthStatus, InputSubmission, SubmitResponse, Task,
    TaskRequest,
};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use conductor_core::{ConductorError, ConductorResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Path of the discovery document.
pub const WELL_KNOWN_CARD_PATH: &str = "/.well-known/agent.json";

/// How often the expiry sweeper looks for stale `input-required` tasks.
const SWEEP_PERIOD: Duration = Duration::from_secs(5);

/// HTTP front of an [`AgentEndpoint`].
pub struct AgentServer;

impl AgentServer {
    /// Build the router for one agent.
    pub fn build(endpoint: Arc<AgentEndpoint>) -> Router {
        Router::new()
            .route(WELL_KNOWN_CARD_PATH, get(card_handler))
            .route("/health", get(health_handler))
            .route("/tasks", post(submit_handler))
            .route("/tasks/sync", post(submit_sync_handler))
            .route("/tasks/{task_id}", get(status_handler))
            .route("/tasks/{task_id}/input", post(input_handler))
            .with_state(endpoint)
    }

    /// Serve `endpoint` on `listener` until `shutdown` resolves, running the
    /// input-expiry sweeper alongside.
    pub async fn serve(
        listener: TcpListener,
        endpoint: Arc<AgentEndpoint>,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> ConductorResult<()> {
        let sweeper = endpoint.spawn_expiry_sweeper(SWEEP_PERIOD);
        let addr = listener.local_addr()?;
        info!(agent = %endpoint.card().name, addr = %addr, "Agent endpoint listening");

        let served = axum::serve(listener, Self::build(endpoint))
            .with_graceful_shutdown(shutdown)
            .await;

        if let Some(handle) = sweeper {
            handle.abort();
        }
        served.map_err(ConductorError::from)
    }
}

/// A [`ConductorError`] rendered as an HTTP error response.
#[derive(Debug)]
pub struct ApiError(pub ConductorError);

impl From<ConductorError> for ApiError {
    fn from(err: ConductorError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(ConductorError::Validation(rejection.body_text()))
    }
}

/// HTTP status the endpoint answers with for `err`.
pub fn status_for(err: &ConductorError) -> StatusCode {
    match err {
        ConductorError::Validation(_)
        | ConductorError::RejectedInput(_)
        | ConductorError::Json(_) => StatusCode::BAD_REQUEST,
        ConductorError::NotFound(_) => StatusCode::NOT_FOUND,
        ConductorError::InvalidTransition { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            warn!(status = %status, error = %self.0, "Request failed");
        } else {
            debug!(status = %status, error = %self.0, "Request rejected");
        }
        let body = ErrorBody {
            error: ErrorDetail::from(&self.0),
        };
        (status, Json(body)).into_response()
    }
}

fn parse_task_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError(ConductorError::NotFound(format!("task {raw}"))))
}

async fn card_handler(State(endpoint): State<Arc<AgentEndpoint>>) -> Json<AgentCard> {
    Json(endpoint.card().clone())
}

async fn health_handler(State(endpoint): State<Arc<AgentEndpoint>>) -> Json<HealthStatus> {
    Json(HealthStatus::ok(&endpoint.card().name))
}

async fn submit_handler(
    State(endpoint): State<Arc<AgentEndpoint>>,
    payload: Result<Json<TaskRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let Json(request) = payload?;
    let task_id = endpoint.submit(&request.skill_id, request.parameters).await?;
    let state = endpoint.get_status(&task_id).await?.state;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { task_id, state })))
}

async fn submit_sync_handler(
    State(endpoint): State<Arc<AgentEndpoint>>,
    payload: Result<Json<TaskRequest>, JsonRejection>,
) -> Result<Json<Task>, ApiError> {
    let Json(request) = payload?;
    let task = endpoint
        .submit_sync(&request.skill_id, request.parameters)
        .await?;
    Ok(Json(task))
}

async fn status_handler(
    State(endpoint): State<Arc<AgentEndpoint>>,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let id = parse_task_id(&task_id)?;
    Ok(Json(endpoint.get_status(&id).await?))
}

async fn input_handler(
    State(endpoint): State<Arc<AgentEndpoint>>,
    Path(task_id): Path<String>,
    payload: Result<Json<InputSubmission>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let id = parse_task_id(&task_id)?;
    let Json(submission) = payload?;
    let state = endpoint.provide_input(&id, submission.parameters).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse { task_id: id, state }),
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::handler::{handler_fn, SkillOutcome};
    use crate::types::{SkillDescriptor, TaskState};
    use axum::body::Body;
    use axum::http::Request;
    use conductor_core::{ParamType, Params, Schema};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Router {
        let endpoint = AgentEndpoint::builder("discovery", "0.3.0")
            .skill(
                SkillDescriptor::new(
                    "discover-tables",
                    Schema::new().required("question", ParamType::String),
                    Schema::new().required("tables", ParamType::Array),
                )
                .with_examples(&["Which stores sell the most?"]),
                handler_fn(|_input: Params| async move {
                    SkillOutcome::completed(json!({"tables": ["sales_transactions"]}))
                }),
            )
            .build()
            .unwrap();
        AgentServer::build(Arc::new(endpoint))
    }

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_discovery_document() {
        let (status, body) = call(app(), get(WELL_KNOWN_CARD_PATH)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "discovery");
        assert_eq!(body["skills"][0]["id"], "discover-tables");
        assert_eq!(body["skills"][0]["input_schema"]["question"]["type"], "string");
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(app(), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok", "agent": "discovery"}));
    }

    #[tokio::test]
    async fn test_invalid_submission_is_400_with_error_body() {
        let (status, body) = call(
            app(),
            post_json("/tasks", json!({"skill_id": "discover-tables", "parameters": {}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "validation_error");
    }

    #[tokio::test]
    async fn test_malformed_body_is_400() {
        let request = Request::builder()
            .method("POST")
            .uri("/tasks")
            .header("content-type", "application/json")
            .body(Body::from("{\"skill_id\":"))
            .unwrap();
        let (status, body) = call(app(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "validation_error");
    }

    #[tokio::test]
    async fn test_unknown_task_and_garbage_id_are_404() {
        let (status, _) = call(app(), get(&format!("/tasks/{}", Uuid::new_v4()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, body) = call(app(), get("/tasks/not-a-uuid")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn test_sync_submission_returns_terminal_snapshot() {
        let (status, body) = call(
            app(),
            post_json(
                "/tasks/sync",
                json!({"skill_id": "discover-tables", "parameters": {"question": "revenue"}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "completed");
        assert_eq!(body["result"]["tables"][0], "sales_transactions");
    }

    #[tokio::test]
    async fn test_submit_is_accepted_then_pollable() {
        let router = app();
        let (status, body) = call(
            router.clone(),
            post_json(
                "/tasks",
                json!({"skill_id": "discover-tables", "parameters": {"question": "revenue"}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let accepted: SubmitResponse = serde_json::from_value(body).unwrap();
        assert_ne!(accepted.state, TaskState::Submitted);

        let (status, body) = call(router, get(&format!("/tasks/{}", accepted.task_id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["skill_id"], "discover-tables");
    }

    #[tokio::test]
    async fn test_input_on_unknown_task_is_404() {
        let (status, _) = call(
            app(),
            post_json(
                &format!("/tasks/{}/input", Uuid::new_v4()),
                json!({"parameters": {}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&ConductorError::InvalidTransition {
                from: "completed",
                to: "working"
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&ConductorError::HandlerFailure("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
