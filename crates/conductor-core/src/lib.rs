//! Core types and error definitions for the Conductor agent-to-agent framework.
//!
//! This crate provides the foundational pieces shared across all Conductor
//! crates: the error taxonomy every subsystem reports through, the typed
//! parameter schemas skills declare, and the tracing bootstrap.
//!
//! # Main types
//!
//! - [`ConductorError`] — Unified error enum for protocol, endpoint and orchestration failures.
//! - [`ConductorResult`] — Convenience alias for `Result<T, ConductorError>`.
//! - [`Schema`] — Declared input/output contract of a skill.
//! - [`Params`] — A JSON object of named parameters exchanged with skills.

/// Typed parameter schemas and validation.
pub mod schema;
/// Tracing subscriber setup.
pub mod telemetry;

pub use schema::{into_params, FieldSpec, ParamType, Params, Schema};
pub use telemetry::{init_tracing, LogFormat};

// --- Error types ---

/// Top-level error type for the Conductor framework.
///
/// The first group of variants is the user-facing taxonomy; the rest is
/// plumbing that callers usually only log or convert.
#[derive(Debug, thiserror::Error)]
pub enum ConductorError {
    /// Malformed input or agent card, rejected before any task exists.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A remote endpoint rejected a submission synchronously.
    #[error("Rejected input: {0}")]
    RejectedInput(String),

    /// Unknown task id, agent, or skill.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A capability provider returned an error while executing a task.
    #[error("Handler failure: {0}")]
    HandlerFailure(String),

    /// The endpoint could not be reached after every retry was spent.
    #[error("Agent at {endpoint} unreachable after {attempts} attempt(s): {last_error}")]
    Unreachable {
        /// Base URL of the endpoint.
        endpoint: String,
        /// Number of attempts made, including the first.
        attempts: u32,
        /// Transport error seen on the last attempt.
        last_error: String,
    },

    /// A task was reachable but did not reach a terminal state in time.
    #[error("Timed out after {waited_ms}ms waiting for task {task_id}")]
    TimedOut {
        /// Id of the remote task.
        task_id: String,
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// The designated final-answer subtask failed or never ran.
    #[error("Orchestration failed at subtask '{subtask}': {}", .chain.join("; "))]
    OrchestrationFailed {
        /// Name of the final-answer subtask.
        subtask: String,
        /// Failure chain, starting at the final-answer subtask and walking
        /// back through the dependencies that blocked it.
        chain: Vec<String>,
    },

    /// Transient transport failure where the request never reached the
    /// endpoint (connection refused, 502/503).
    #[error("Transport error: {0}")]
    Transport(String),

    /// A request went out but no response came back in time. The endpoint
    /// may already have acted on it.
    #[error("No response: {0}")]
    NoResponse(String),

    /// A remote peer answered with something that does not fit the protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A task was asked to move between two states the lifecycle forbids.
    #[error("Invalid task state transition: {from} -> {to}")]
    InvalidTransition {
        /// State the task was in.
        from: &'static str,
        /// State that was requested.
        to: &'static str,
    },

    /// A subtask plan failed validation.
    #[error("Plan error: {0}")]
    Plan(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from the data store collaborator.
    #[error("Store error: {0}")]
    Store(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConductorError {
    /// Whether retrying the same call may succeed.
    ///
    /// Only transport-level failures qualify. Everything else is a fact
    /// about the request or the task and will not change on retry.
    /// Safe for reads; calls that create or advance a task must use
    /// [`ConductorError::is_undelivered`] instead.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConductorError::Transport(_) | ConductorError::NoResponse(_)
        )
    }

    /// Whether the request is known not to have reached the endpoint, so
    /// sending it again cannot run the same work twice.
    pub fn is_undelivered(&self) -> bool {
        matches!(self, ConductorError::Transport(_))
    }

    /// Stable snake_case code for this error, used in wire error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ConductorError::Validation(_) => "validation_error",
            ConductorError::RejectedInput(_) => "rejected_input",
            ConductorError::NotFound(_) => "not_found",
            ConductorError::HandlerFailure(_) => "handler_failure",
            ConductorError::Unreachable { .. } => "unreachable",
            ConductorError::TimedOut { .. } => "timed_out",
            ConductorError::OrchestrationFailed { .. } => "orchestration_failed",
            ConductorError::Transport(_) => "transport_error",
            ConductorError::NoResponse(_) => "no_response",
            ConductorError::Protocol(_) => "protocol_error",
            ConductorError::InvalidTransition { .. } => "invalid_transition",
            ConductorError::Plan(_) => "plan_error",
            ConductorError::Config(_) => "config_error",
            ConductorError::Store(_) => "store_error",
            ConductorError::Json(_) => "json_error",
            ConductorError::Io(_) => "io_error",
        }
    }
}

/// A convenience `Result` alias using [`ConductorError`].
pub type ConductorResult<T> = Result<T, ConductorError>;
