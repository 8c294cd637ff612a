//! Ready-made agents, one per provider set.

use crate::analysis::AnalyzeResults;
use crate::catalog::TableCatalog;
use crate::coordinator::AnswerQuestion;
use crate::discovery::{DiscoverTables, GetTableSchema};
use crate::planner::PlanAnalysis;
use crate::sql::{SqlGenerator, TextToSql, ValidateSql};
use crate::store::DataStore;
use conductor_a2a::{AgentEndpoint, EndpointConfig};
use conductor_core::{ConductorError, ConductorResult};
use conductor_orchestrator::{Decomposer, Orchestrator, RuleDecomposer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The reference agents this crate can assemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// `discover-tables` and `get-table-schema`.
    Discovery,
    /// `text-to-sql` and `validate-sql`.
    Sql,
    /// `analyze-results`.
    Analysis,
    /// `plan-analysis`.
    Planner,
    /// `answer-question`, backed by an orchestrator over the other agents.
    Coordinator,
}

impl AgentKind {
    /// Agents that answer from local providers alone.
    pub const PROVIDERS: [AgentKind; 4] = [
        AgentKind::Discovery,
        AgentKind::Sql,
        AgentKind::Analysis,
        AgentKind::Planner,
    ];

    /// Every kind, the coordinator last.
    pub const ALL: [AgentKind; 5] = [
        AgentKind::Discovery,
        AgentKind::Sql,
        AgentKind::Analysis,
        AgentKind::Planner,
        AgentKind::Coordinator,
    ];

    /// Name used on the command line and in config.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Discovery => "discovery",
            AgentKind::Sql => "sql",
            AgentKind::Analysis => "analysis",
            AgentKind::Planner => "planner",
            AgentKind::Coordinator => "coordinator",
        }
    }

    /// Name advertised on the agent card.
    pub fn agent_name(&self) -> &'static str {
        match self {
            AgentKind::Discovery => "data-discovery",
            AgentKind::Sql => "sql-generation",
            AgentKind::Analysis => "result-analysis",
            AgentKind::Planner => "analysis-planner",
            AgentKind::Coordinator => "coordinator",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown agent '{s}', expected discovery, sql, analysis, planner or coordinator"))
    }
}

/// Collaborators shared by the reference agents.
#[derive(Clone)]
pub struct Providers {
    /// Catalog the discovery and SQL skills search.
    pub catalog: Arc<TableCatalog>,
    /// SQL generation seam.
    pub generator: Arc<dyn SqlGenerator>,
    /// Store queries run against. `None` disables execution.
    pub store: Option<Arc<dyn DataStore>>,
    /// Orchestrator the coordinator agent delegates to.
    pub orchestrator: Option<Arc<Orchestrator>>,
    /// Endpoint settings shared by every built agent.
    pub endpoint: EndpointConfig,
}

/// `discover-tables` and `get-table-schema`.
pub fn discovery_agent(catalog: Arc<TableCatalog>, config: EndpointConfig) -> ConductorResult<AgentEndpoint> {
    AgentEndpoint::builder(AgentKind::Discovery.agent_name(), AGENT_VERSION)
        .description("Discovers relevant tables in the retail data catalog")
        .config(config)
        .skill(DiscoverTables::descriptor(), Arc::new(DiscoverTables::new(Arc::clone(&catalog))))
        .skill(GetTableSchema::descriptor(), Arc::new(GetTableSchema::new(catalog)))
        .build()
}

/// `text-to-sql` and `validate-sql`. Without a store, `execute: true`
/// requests fail and validation skips the `EXPLAIN` check.
pub fn sql_agent(
    catalog: Arc<TableCatalog>,
    generator: Arc<dyn SqlGenerator>,
    store: Option<Arc<dyn DataStore>>,
    config: EndpointConfig,
) -> ConductorResult<AgentEndpoint> {
    let mut text_to_sql = TextToSql::new(catalog, generator);
    if let Some(store) = &store {
        text_to_sql = text_to_sql.with_store(Arc::clone(store));
    }
    AgentEndpoint::builder(AgentKind::Sql.agent_name(), AGENT_VERSION)
        .description("Generates and runs read-only SQL over the retail data store")
        .config(config)
        .skill(TextToSql::descriptor(), Arc::new(text_to_sql))
        .skill(ValidateSql::descriptor(), Arc::new(ValidateSql::new(store)))
        .build()
}

/// `analyze-results`.
pub fn analysis_agent(config: EndpointConfig) -> ConductorResult<AgentEndpoint> {
    AgentEndpoint::builder(AgentKind::Analysis.agent_name(), AGENT_VERSION)
        .description("Summarizes query results")
        .config(config)
        .skill(AnalyzeResults::descriptor(), Arc::new(AnalyzeResults::new()))
        .build()
}

/// `plan-analysis` over the built-in keyword rules.
pub fn planner_agent(config: EndpointConfig) -> ConductorResult<AgentEndpoint> {
    AgentEndpoint::builder(AgentKind::Planner.agent_name(), AGENT_VERSION)
        .description("Plans which skills a question needs")
        .config(config)
        .skill(PlanAnalysis::descriptor(), Arc::new(PlanAnalysis::default()))
        .build()
}

/// `answer-question`: plans with `decomposer` and runs the plan on
/// `orchestrator`, so a coordinator can sit behind another coordinator.
pub fn coordinator_agent(
    orchestrator: Arc<Orchestrator>,
    decomposer: Arc<dyn Decomposer>,
    config: EndpointConfig,
) -> ConductorResult<AgentEndpoint> {
    AgentEndpoint::builder(AgentKind::Coordinator.agent_name(), AGENT_VERSION)
        .description("Answers business questions by coordinating the analytics agents")
        .config(config)
        .skill(
            AnswerQuestion::descriptor(),
            Arc::new(AnswerQuestion::new(orchestrator, decomposer)),
        )
        .build()
}

/// Assemble the agent of `kind` from shared providers.
pub fn build_agent(kind: AgentKind, providers: &Providers) -> ConductorResult<AgentEndpoint> {
    let config = providers.endpoint.clone();
    match kind {
        AgentKind::Discovery => discovery_agent(Arc::clone(&providers.catalog), config),
        AgentKind::Sql => sql_agent(
            Arc::clone(&providers.catalog),
            Arc::clone(&providers.generator),
            providers.store.clone(),
            config,
        ),
        AgentKind::Analysis => analysis_agent(config),
        AgentKind::Planner => planner_agent(config),
        AgentKind::Coordinator => {
            let orchestrator = providers.orchestrator.clone().ok_or_else(|| {
                ConductorError::Config("the coordinator agent needs an orchestrator".to_string())
            })?;
            coordinator_agent(orchestrator, Arc::new(RuleDecomposer::new()), config)
        }
    }
}
