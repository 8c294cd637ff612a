//! Orchestration engine for the Conductor framework.
//!
//! Turns one question into a [`SubtaskPlan`], runs the plan as a DAG against
//! the agents in a registry with bounded concurrency, and merges the subtask
//! results into an [`AggregatedResult`] or a structured
//! `OrchestrationFailed` error.
//!
//! # Main types
//!
//! - [`Orchestrator`] — Executes plans: routing, backpressure, skip propagation, cancellation.
//! - [`SubtaskPlan`] — Serializable DAG of subtasks with arena-style ids.
//! - [`Decomposer`] — Question-to-plan seam, with [`RuleDecomposer`] and [`SkillDecomposer`].
//! - [`AggregatedResult`] — Order-independent merge of every subtask's disposition.
//! - [`AgentMonitor`] — Per-agent dispatch counters.

/// Result aggregation and subtask dispositions.
pub mod aggregate;
/// Question decomposition.
pub mod decompose;
/// Plan execution engine.
pub mod engine;
/// Agent metrics and the in-flight gauge.
pub mod monitor;
/// Subtask plan representation.
pub mod plan;

pub use aggregate::{AggregatedResult, SubtaskDisposition, SubtaskError, SubtaskReport};
pub use decompose::{plan_for_chain, Decomposer, RuleDecomposer, SkillDecomposer};
pub use engine::{
    DeclineInput, InputResolver, Orchestrator, OrchestratorConfig, RunOptions,
    StaticInputResolver,
};
pub use monitor::{AgentMetrics, AgentMonitor, InFlightGauge};
pub use plan::{InputBinding, Subtask, SubtaskId, SubtaskPlan};
