mod config;

use crate::config::ConductorConfig;
use clap::{Parser, Subcommand};
use conductor_a2a::{AgentRegistry, AgentServer, ProtocolClient, SharedRegistry};
use conductor_core::{init_tracing, ConductorError, Params};
use conductor_orchestrator::{
    Decomposer, Orchestrator, RuleDecomposer, RunOptions, SkillDecomposer, StaticInputResolver,
};
use conductor_skills::{
    build_agent, seed_sample_data, AgentKind, DataStore, Providers, SqliteStore, TableCatalog,
    TemplateSqlGenerator,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Exit status when the final-answer subtask did not complete.
const EXIT_ORCHESTRATION_FAILED: i32 = 2;

#[derive(Parser)]
#[command(name = "conductor", version, about = "Conductor — agent-to-agent analytics orchestration")]
struct Cli {
    /// Path to config file [default: conductor.toml if present]
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one reference agent over HTTP
    Serve {
        /// discovery, sql, analysis, planner or coordinator
        #[arg(short, long)]
        agent: AgentKind,
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides the agent's default port)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Discover the configured agents and list their skills
    Agents,
    /// Print the plan for a question without running it
    Plan {
        question: String,
        /// Ask a plan-analysis agent instead of the built-in rules
        #[arg(long)]
        remote: bool,
    },
    /// Answer a question across the configured agents
    Ask {
        question: String,
        /// Route a skill to a named agent, as skill=agent
        #[arg(long, value_parser = parse_pair)]
        prefer: Vec<(String, String)>,
        /// Answer input requests with key=value (value parsed as JSON when possible)
        #[arg(long = "input", value_parser = parse_pair)]
        inputs: Vec<(String, String)>,
        /// Whole-request timeout in milliseconds (overrides config)
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Ask a plan-analysis agent instead of the built-in rules
        #[arg(long)]
        remote: bool,
    },
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected key=value, got '{s}'")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let config = ConductorConfig::load(cli.config.as_deref())?;
    init_tracing(config.logging.format, &config.logging.filter)?;

    match cli.command {
        Commands::Serve { agent, host, port } => serve(&config, agent, host, port).await?,
        Commands::Agents => {
            let (client, registry) = discover_agents(&config).await?;
            let cards = registry.read().list().to_vec();
            if cards.is_empty() {
                println!("No agents reachable.");
                println!("Start some with `conductor serve --agent <kind>` or list them under [[agents]]");
            } else {
                for card in &cards {
                    let health = if client.health_check(&card.url).await { "up" } else { "down" };
                    println!("{} {} at {} [{health}]", card.name, card.version, card.url);
                    for skill in &card.skills {
                        println!("  {} — {}", skill.id, skill.description);
                    }
                }
                println!("\nTotal: {} agent(s)", cards.len());
            }
        }
        Commands::Plan { question, remote } => {
            let plan = if remote {
                let (client, registry) = discover_agents(&config).await?;
                SkillDecomposer::new(client, registry).decompose(&question).await?
            } else {
                RuleDecomposer::new().decompose(&question).await?
            };
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Commands::Ask {
            question,
            prefer,
            inputs,
            timeout_ms,
            remote,
        } => {
            let (client, registry) = discover_agents(&config).await?;
            let plan = if remote {
                SkillDecomposer::new(client.clone(), Arc::clone(&registry))
                    .decompose(&question)
                    .await?
            } else {
                RuleDecomposer::new().decompose(&question).await?
            };

            let mut orchestrator = Orchestrator::new(registry, client, config.orchestrator.clone());
            if !inputs.is_empty() {
                let answers: Params = inputs
                    .into_iter()
                    .map(|(key, raw)| {
                        let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
                        (key, value)
                    })
                    .collect();
                orchestrator = orchestrator.with_resolver(Arc::new(StaticInputResolver::new(answers)));
            }

            let mut options = RunOptions::new();
            for (skill, agent) in prefer {
                options = options.prefer(skill, agent);
            }
            if let Some(ms) = timeout_ms {
                options = options.with_timeout(Duration::from_millis(ms));
            }

            let interrupted = async {
                let _ = tokio::signal::ctrl_c().await;
                warn!("Interrupted, abandoning outstanding subtasks");
            };
            match orchestrator.execute_until(&plan, &options, interrupted).await {
                Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
                Err(ConductorError::OrchestrationFailed { subtask, chain }) => {
                    let report = json!({
                        "error": "orchestration_failed",
                        "subtask": subtask,
                        "chain": chain,
                    });
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    std::process::exit(EXIT_ORCHESTRATION_FAILED);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(())
}

async fn serve(
    config: &ConductorConfig,
    kind: AgentKind,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or_else(|| config.server.port_for(kind));

    let catalog = Arc::new(TableCatalog::retail()?);
    let store: Option<Arc<dyn DataStore>> = match &config.database {
        Some(db) if kind == AgentKind::Sql => {
            let store = SqliteStore::open(&db.path)?;
            if db.seed_sample {
                seed_sample_data(&store, &catalog)?;
            }
            info!(path = %db.path.display(), "Data store opened");
            Some(Arc::new(store))
        }
        _ => None,
    };
    let orchestrator = if kind == AgentKind::Coordinator {
        let (client, registry) = discover_agents(config).await?;
        info!(agents = registry.read().len(), "Coordinator registry ready");
        Some(Arc::new(Orchestrator::new(
            registry,
            client,
            config.orchestrator.clone(),
        )))
    } else {
        None
    };
    let providers = Providers {
        catalog,
        generator: Arc::new(TemplateSqlGenerator::new()),
        store,
        orchestrator,
        endpoint: config.endpoint.clone(),
    };

    let mut agent = build_agent(kind, &providers)?;
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    agent.set_url(format!("http://{addr}"));
    info!(agent = %agent.card().name, skills = agent.card().skills.len(), "Starting agent");

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    };
    AgentServer::serve(listener, Arc::new(agent), shutdown).await?;
    Ok(())
}

/// Discover every configured agent. Unreachable agents are logged and
/// skipped; the coordinator routes around them.
async fn discover_agents(config: &ConductorConfig) -> anyhow::Result<(ProtocolClient, SharedRegistry)> {
    let client = ProtocolClient::http(config.client.clone())?;
    let registry = AgentRegistry::shared();

    for url in config.agent_urls() {
        match client.discover(&url, &registry).await {
            Ok(card) => info!(agent = %card.name, url = %url, skills = card.skills.len(), "Agent discovered"),
            Err(e) => warn!(url = %url, error = %e, "Agent discovery failed"),
        }
    }
    Ok((client, registry))
}
