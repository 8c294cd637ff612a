#![allow(clippy::unwrap_used, clippy::expect_used)]

use conductor_a2a::*;
use conductor_core::{into_params, ConductorError, ParamType, Params, Schema};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_client_config() -> ClientConfig {
    ClientConfig {
        poll_interval_ms: 10,
        max_poll_interval_ms: 50,
        default_timeout_ms: 5_000,
        retry: RetryPolicy {
            max_retries: 3,
            backoff_base_ms: 5,
            backoff_max_ms: 20,
        },
    }
}

fn sql_endpoint() -> AgentEndpoint {
    AgentEndpoint::builder("sql", "0.4.0")
        .description("Generates SQL for retail questions")
        .skill(
            SkillDescriptor::new(
                skill_ids::TEXT_TO_SQL,
                Schema::new()
                    .required("requirement", ParamType::String)
                    .optional("tables", ParamType::Array),
                Schema::new().required("sql", ParamType::String),
            ),
            handler_fn(|input: Params| async move {
                match input.get("tables").and_then(|t| t.as_array()) {
                    Some(tables) if !tables.is_empty() => {
                        let table = tables[0].as_str().unwrap_or("sales_transactions");
                        SkillOutcome::completed(json!({"sql": format!("SELECT * FROM {table}")}))
                    }
                    _ => Ok(SkillOutcome::input_required(
                        "Which tables should the query use?",
                        &["tables"],
                    )),
                }
            }),
        )
        .build()
        .unwrap()
}

/// Helper: serve an endpoint on a random port, returning its base URL.
async fn start_agent(mut endpoint: AgentEndpoint) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());
    endpoint.set_url(url.clone());
    let endpoint = Arc::new(endpoint);

    tokio::spawn(async move {
        AgentServer::serve(listener, endpoint, std::future::pending())
            .await
            .unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    url
}

fn http_client() -> ProtocolClient {
    ProtocolClient::new(
        Arc::new(HttpTransport::new().unwrap()),
        fast_client_config(),
    )
}

// ---------------------------------------------------------------------------
// 1. Discovery over HTTP
// ---------------------------------------------------------------------------

#[tokio::test]
async fn discover_registers_agent_from_well_known_document() {
    let url = start_agent(sql_endpoint()).await;
    let client = http_client();
    let registry = AgentRegistry::shared();

    let card = client.discover(&url, &registry).await.unwrap();
    assert_eq!(card.name, "sql");
    assert_eq!(card.url, url);

    let found = registry.read().find_agents(skill_ids::TEXT_TO_SQL).len();
    assert_eq!(found, 1);
}

#[tokio::test]
async fn health_check_over_http() {
    let url = start_agent(sql_endpoint()).await;
    let client = http_client();
    assert!(client.health_check(&url).await);
    assert!(!client.health_check("http://127.0.0.1:1").await);
}

// ---------------------------------------------------------------------------
// 2. Lifecycle over HTTP
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submitted_task_reaches_completed_over_http() {
    let url = start_agent(sql_endpoint()).await;
    let client = http_client();
    let card = client.fetch_card(&url).await.unwrap();

    let handle = client
        .dispatch(
            &card,
            skill_ids::TEXT_TO_SQL,
            into_params(json!({"requirement": "Total revenue by region", "tables": ["sales_transactions"]}))
                .unwrap(),
        )
        .await
        .unwrap();

    let outcome = client
        .await_result(&handle, client.default_timeout())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        TaskOutcome::Completed(into_params(json!({"sql": "SELECT * FROM sales_transactions"})).unwrap())
    );

    // Terminal reads are stable.
    let first = client.status(&handle).await.unwrap();
    let second = client.status(&handle).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.history.last(), Some(&TaskState::Completed));
}

#[tokio::test]
async fn invalid_submission_is_rejected_over_http() {
    let url = start_agent(sql_endpoint()).await;
    let client = http_client();
    let card = client.fetch_card(&url).await.unwrap();

    let err = client
        .dispatch(&card, skill_ids::TEXT_TO_SQL, into_params(json!({"tables": []})).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::RejectedInput(_)));

    let err = client
        .dispatch(&card, "summarize", Params::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::RejectedInput(_)));
}

#[tokio::test]
async fn input_required_resubmission_completes_same_task() {
    let url = start_agent(sql_endpoint()).await;
    let client = http_client();
    let card = client.fetch_card(&url).await.unwrap();

    let handle = client
        .dispatch(
            &card,
            skill_ids::TEXT_TO_SQL,
            into_params(json!({"requirement": "Top products"})).unwrap(),
        )
        .await
        .unwrap();

    let outcome = client
        .await_result(&handle, client.default_timeout())
        .await
        .unwrap();
    let TaskOutcome::InputRequired(request) = outcome else {
        panic!("expected input-required, got {outcome:?}");
    };
    assert_eq!(request.fields, vec!["tables"]);

    client
        .provide_input(&handle, into_params(json!({"tables": ["products_catalog"]})).unwrap())
        .await
        .unwrap();

    let outcome = client
        .await_result(&handle, client.default_timeout())
        .await
        .unwrap();
    assert!(matches!(outcome, TaskOutcome::Completed(_)));

    let task = client.status(&handle).await.unwrap();
    assert_eq!(
        task.history,
        vec![
            TaskState::Submitted,
            TaskState::Working,
            TaskState::InputRequired,
            TaskState::Working,
            TaskState::Completed
        ]
    );

    // A second resubmission hits a completed task: 409 on the wire.
    let err = client
        .provide_input(&handle, Params::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::RejectedInput(_)));
}

#[tokio::test]
async fn sync_endpoint_returns_snapshot() {
    let url = start_agent(sql_endpoint()).await;
    let response = reqwest::Client::new()
        .post(format!("{url}/tasks/sync"))
        .json(&json!({
            "skill_id": "text-to-sql",
            "parameters": {"requirement": "x", "tables": ["stores_locations"]}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let task: Task = response.json().await.unwrap();
    assert_eq!(task.state, TaskState::Completed);
}

// ---------------------------------------------------------------------------
// 3. Scripted remote failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transient_503_burst_is_retried() {
    let server = MockServer::start().await;
    let task_id = uuid::Uuid::new_v4();
    let status_path = format!("/tasks/{task_id}");

    Mock::given(method("GET"))
        .and(path(status_path.as_str()))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;

    let snapshot = {
        let mut task = Task::new("text-to-sql", Params::new());
        task.task_id = task_id;
        task.state = TaskState::Completed;
        task.result = Some(into_params(json!({"sql": "SELECT 1"})).unwrap());
        task
    };
    Mock::given(method("GET"))
        .and(path(status_path.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(&snapshot))
        .mount(&server)
        .await;

    let handle = TaskHandle {
        agent: "sql".into(),
        endpoint: server.uri(),
        skill_id: "text-to-sql".into(),
        task_id,
    };
    let outcome = http_client()
        .await_result(&handle, Duration::from_secs(5))
        .await
        .unwrap();
    assert!(matches!(outcome, TaskOutcome::Completed(_)));
}

#[tokio::test]
async fn persistent_503_is_unreachable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tasks"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let card = AgentCard::new("flaky", "1.0.0").with_url(server.uri());
    let err = http_client()
        .dispatch(&card, "text-to-sql", Params::new())
        .await
        .unwrap_err();
    match err {
        ConductorError::Unreachable { attempts, .. } => assert_eq!(attempts, 4),
        other => panic!("expected Unreachable, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_body_is_protocol_error_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tasks"))
        .respond_with(ResponseTemplate::new(202).set_body_string("not json"))
        .expect(1)
        .mount(&server)
        .await;

    let card = AgentCard::new("broken", "1.0.0").with_url(server.uri());
    let err = http_client()
        .dispatch(&card, "text-to-sql", Params::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::Protocol(_)));
}

#[tokio::test]
async fn refused_connection_is_unreachable() {
    let card = AgentCard::new("gone", "1.0.0").with_url("http://127.0.0.1:1");
    let err = http_client()
        .dispatch(&card, "text-to-sql", Params::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::Unreachable { .. }));
}

// ---------------------------------------------------------------------------
// 4. Lost responses: calls that create or advance a task are sent once
// ---------------------------------------------------------------------------

/// Gives up on each call after 100ms, with three retries available.
fn impatient_client() -> ProtocolClient {
    ProtocolClient::new(
        Arc::new(HttpTransport::with_timeout(Duration::from_millis(100)).unwrap()),
        fast_client_config(),
    )
}

fn posts_to(requests: &[wiremock::Request], route: &str) -> usize {
    requests
        .iter()
        .filter(|r| r.method.as_str() == "POST" && r.url.path() == route)
        .count()
}

#[tokio::test]
async fn slow_submission_response_is_not_resubmitted() {
    let server = MockServer::start().await;
    let accepted = SubmitResponse {
        task_id: uuid::Uuid::new_v4(),
        state: TaskState::Working,
    };
    Mock::given(method("POST"))
        .and(path("/tasks"))
        .respond_with(
            ResponseTemplate::new(202)
                .set_body_json(accepted)
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let card = AgentCard::new("slow", "1.0.0").with_url(server.uri());
    let err = impatient_client()
        .dispatch(&card, "text-to-sql", Params::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::NoResponse(_)), "got {err:?}");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(posts_to(&requests, "/tasks"), 1);
}

async fn mount_slow_input(server: &MockServer, task_id: uuid::Uuid, state_after: TaskState) {
    let input_path = format!("/tasks/{task_id}/input");
    Mock::given(method("POST"))
        .and(path(input_path.as_str()))
        .respond_with(
            ResponseTemplate::new(202)
                .set_body_json(SubmitResponse {
                    task_id,
                    state: TaskState::Working,
                })
                .set_delay(Duration::from_millis(300)),
        )
        .up_to_n_times(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(input_path.as_str()))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": {"code": "invalid_transition", "message": "working -> working"}
        })))
        .mount(server)
        .await;

    let snapshot = {
        let mut task = Task::new("text-to-sql", Params::new());
        task.task_id = task_id;
        task.state = state_after;
        task
    };
    Mock::given(method("GET"))
        .and(path(format!("/tasks/{task_id}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(&snapshot))
        .mount(server)
        .await;
}

#[tokio::test]
async fn slow_input_response_is_confirmed_by_reading_the_task() {
    let server = MockServer::start().await;
    let task_id = uuid::Uuid::new_v4();
    mount_slow_input(&server, task_id, TaskState::Working).await;

    let handle = TaskHandle {
        agent: "sql".into(),
        endpoint: server.uri(),
        skill_id: "text-to-sql".into(),
        task_id,
    };
    impatient_client()
        .provide_input(
            &handle,
            into_params(json!({"tables": ["sales_transactions"]})).unwrap(),
        )
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(posts_to(&requests, &format!("/tasks/{task_id}/input")), 1);
}

#[tokio::test]
async fn unconfirmed_input_is_reported_without_resending() {
    let server = MockServer::start().await;
    let task_id = uuid::Uuid::new_v4();
    mount_slow_input(&server, task_id, TaskState::InputRequired).await;

    let handle = TaskHandle {
        agent: "sql".into(),
        endpoint: server.uri(),
        skill_id: "text-to-sql".into(),
        task_id,
    };
    let err = impatient_client()
        .provide_input(&handle, into_params(json!({"tables": []})).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, ConductorError::NoResponse(_)), "got {err:?}");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(posts_to(&requests, &format!("/tasks/{task_id}/input")), 1);
}
