//! Agent-to-agent task protocol for the Conductor framework.
//!
//! Agents publish an [`AgentCard`] listing schema-typed skills and serve tasks
//! through an [`AgentEndpoint`]. Coordinators discover cards into an
//! [`AgentRegistry`] and drive remote tasks with a [`ProtocolClient`].
//!
//! # Main types
//!
//! - [`AgentCard`] / [`SkillDescriptor`] — The discovery document.
//! - [`TaskStore`] — Per-agent task records and the lifecycle state machine.
//! - [`AgentEndpoint`] — Validates submissions and runs handlers in isolation.
//! - [`AgentServer`] — axum router exposing an endpoint over HTTP.
//! - [`ProtocolClient`] — Dispatch, bounded polling, and input resubmission.
//! - [`AgentTransport`] — HTTP or in-process transport seam.

/// Protocol client: dispatch, await, resubmit, discover.
pub mod client;
/// Server side of the protocol.
pub mod endpoint;
/// Skill handler trait.
pub mod handler;
/// HTTP transport (feature `client`).
#[cfg(feature = "client")]
pub mod http;
/// Agent card registry.
pub mod registry;
/// Retry policy and backoff.
pub mod retry;
/// axum HTTP server.
pub mod server;
/// Task store.
pub mod store;
/// Transport trait and in-process transport.
pub mod transport;
/// Protocol data types.
pub mod types;

pub use client::{ClientConfig, ProtocolClient, TaskHandle, TaskOutcome};
pub use endpoint::{AgentEndpoint, AgentEndpointBuilder, EndpointConfig};
pub use handler::{handler_fn, FnHandler, SkillHandler, SkillOutcome};
#[cfg(feature = "client")]
pub use http::HttpTransport;
pub use registry::{AgentRegistry, SharedRegistry};
pub use retry::{compute_backoff, with_retry, with_retry_if, RetryPolicy};
pub use server::{AgentServer, ApiError, WELL_KNOWN_CARD_PATH};
pub use store::TaskStore;
pub use transport::{AgentTransport, LocalTransport};
pub use types::{
    skill_ids, AgentCard, ErrorDetail, HealthStatus, InputRequest, InputSubmission,
    SkillDescriptor, SubmitResponse, Task, TaskRequest, TaskState,
};
