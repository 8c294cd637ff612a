//! `conductor.toml` loading.

use conductor_a2a::{ClientConfig, EndpointConfig};
use conductor_core::{ConductorError, ConductorResult, LogFormat};
use conductor_orchestrator::OrchestratorConfig;
use conductor_skills::AgentKind;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_PATH: &str = "conductor.toml";

#[derive(Debug, Clone, Default, Deserialize)]
/// Contents of `conductor.toml`.
#[serde(default)]
pub struct ConductorConfig {
    /// Listen address and default ports.
    pub server: ServerConfig,
    /// Log output settings.
    pub logging: LoggingConfig,
    /// Agents the coordinator discovers. Empty means the four reference
    /// agents on their default local ports.
    pub agents: Vec<AgentEntry>,
    /// SQLite file for the SQL agent.
    pub database: Option<DatabaseConfig>,
    /// Protocol client used for discovery and dispatch.
    pub client: ClientConfig,
    /// Coordinator tuning for `ask` and the coordinator agent.
    pub orchestrator: OrchestratorConfig,
    /// Settings for agents started with `serve`.
    pub endpoint: EndpointConfig,
}

#[derive(Debug, Clone, Deserialize)]
/// `[server]`.
#[serde(default)]
pub struct ServerConfig {
    /// Interface agents bind to and the default discovery host.
    pub host: String,
    /// Reference agents listen on `base_port + 1` (discovery) through
    /// `base_port + 4` (planner). The coordinator agent takes `base_port`.
    pub base_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            base_port: 8000,
        }
    }
}

impl ServerConfig {
    /// Default listening port for `kind`.
    pub fn port_for(&self, kind: AgentKind) -> u16 {
        let offset = match kind {
            AgentKind::Coordinator => 0,
            AgentKind::Discovery => 1,
            AgentKind::Sql => 2,
            AgentKind::Analysis => 3,
            AgentKind::Planner => 4,
        };
        self.base_port.saturating_add(offset)
    }
}

#[derive(Debug, Clone, Deserialize)]
/// `[logging]`.
#[serde(default)]
pub struct LoggingConfig {
    /// Human-readable or JSON lines.
    pub format: LogFormat,
    /// Used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: "info".to_string(),
        }
    }
}

/// One `[[agents]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentEntry {
    /// Agent base URL.
    pub url: String,
}

/// `[database]`.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite file.
    pub path: PathBuf,
    /// Create the catalog tables and load the sample dataset at startup.
    #[serde(default)]
    pub seed_sample: bool,
}

impl ConductorConfig {
    /// Load `path`, or `conductor.toml` if present, or built-in defaults.
    ///
    /// An explicitly given file must exist.
    pub fn load(path: Option<&Path>) -> ConductorResult<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Read and parse `path`.
    pub fn from_file(path: &Path) -> ConductorResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConductorError::Config(format!(
                "Failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        Self::parse(&content)
    }

    /// Parse a TOML document.
    pub fn parse(content: &str) -> ConductorResult<Self> {
        toml::from_str(content).map_err(|e| ConductorError::Config(format!("Invalid config: {e}")))
    }

    /// Base URLs of the agents to discover. Without `[[agents]]`, the
    /// provider agents on their default ports; never the coordinator.
    pub fn agent_urls(&self) -> Vec<String> {
        if self.agents.is_empty() {
            AgentKind::PROVIDERS
                .into_iter()
                .map(|kind| {
                    format!(
                        "http://{}:{}",
                        self.server.host,
                        self.server.port_for(kind)
                    )
                })
                .collect()
        } else {
            self.agents.iter().map(|a| a.url.clone()).collect()
        }
    }
}
