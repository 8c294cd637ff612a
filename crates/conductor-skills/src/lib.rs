//! Reference capability providers for the Conductor framework.
//!
//! Deterministic stand-ins for the skills a retail analytics deployment
//! exposes. None of them understand natural language; they match keywords
//! against a table catalog and fill SQL templates. The [`SqlGenerator`] and
//! [`DataStore`] traits are the seams where a model-backed generator or a
//! warehouse connection plugs in.
//!
//! # Main types
//!
//! - [`TableCatalog`] — Tables, columns, keyword rules and relationships, loaded from TOML.
//! - [`SqliteStore`] — [`DataStore`] over a SQLite file.
//! - [`DiscoverTables`], [`TextToSql`], [`AnalyzeResults`], [`PlanAnalysis`] — Skill handlers.
//! - [`AnswerQuestion`] — The orchestrator exposed as a skill.
//! - [`agents`] — Builders assembling the handlers into agent endpoints.

/// Agent builders.
pub mod agents;
/// Result-set statistics.
pub mod analysis;
/// Table catalog.
pub mod catalog;
/// Coordinator skill.
pub mod coordinator;
/// Table discovery skills.
pub mod discovery;
/// Remote planning skill.
pub mod planner;
/// Deterministic sample dataset.
pub mod sample;
/// SQL generation and validation skills.
pub mod sql;
/// Data store access.
pub mod store;

pub use agents::{build_agent, coordinator_agent, AgentKind, Providers};
pub use analysis::{AnalyzeResults, NumericSummary};
pub use catalog::{Column, KeywordRule, Relationship, TableCatalog, TableInfo};
pub use coordinator::AnswerQuestion;
pub use discovery::{DiscoverTables, GetTableSchema};
pub use planner::PlanAnalysis;
pub use sample::seed_sample_data;
pub use sql::{is_read_only, GeneratedSql, SqlGenerator, TemplateSqlGenerator, TextToSql, ValidateSql};
pub use store::{DataStore, Row, SqliteStore};
