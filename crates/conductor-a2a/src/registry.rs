use crate::types::AgentCard;
use conductor_core::{ConductorError, ConductorResult};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

/// A registry shared between the client that discovers agents and the
/// engine that routes to them.
pub type SharedRegistry = Arc<RwLock<AgentRegistry>>;

/// Directory of agent cards, kept in registration order.
///
/// Registration order is the routing tie-break, so re-registering an agent
/// replaces its card in place and keeps its original position.
#[derive(Debug, Default, Clone)]
pub struct AgentRegistry {
    agents: Vec<AgentCard>,
}

impl AgentRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a new registry for sharing.
    pub fn shared() -> SharedRegistry {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Upsert `card` keyed by agent name; last registration wins.
    pub fn register(&mut self, card: AgentCard) -> ConductorResult<()> {
        card.validate()?;

        let skills: Vec<&str> = card.skills.iter().map(|s| s.id.as_str()).collect();
        match self.agents.iter().position(|a| a.name == card.name) {
            Some(idx) => {
                info!(agent = %card.name, version = %card.version, skills = ?skills, "Agent card replaced");
                self.agents[idx] = card;
            }
            None => {
                info!(agent = %card.name, version = %card.version, skills = ?skills, "Agent registered");
                self.agents.push(card);
            }
        }
        Ok(())
    }

    /// Every agent advertising `skill_id`, in registration order.
    ///
    /// An empty result means no capable agent; it is not an error.
    pub fn find_agents(&self, skill_id: &str) -> Vec<&AgentCard> {
        self.agents.iter().filter(|a| a.supports(skill_id)).collect()
    }

    /// Card registered under `name`, or `NotFound`.
    pub fn get(&self, name: &str) -> ConductorResult<&AgentCard> {
        self.agents
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| ConductorError::NotFound(format!("agent '{name}'")))
    }

    /// Remove an agent. Returns its card if it was registered.
    pub fn unregister(&mut self, name: &str) -> Option<AgentCard> {
        let idx = self.agents.iter().position(|a| a.name == name)?;
        info!(agent = %name, "Agent unregistered");
        Some(self.agents.remove(idx))
    }

    /// All cards in registration order.
    pub fn list(&self) -> &[AgentCard] {
        &self.agents
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether no agent is registered.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
