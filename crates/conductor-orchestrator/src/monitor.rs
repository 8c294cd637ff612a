use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per-agent dispatch counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// Subtasks sent to the agent.
    pub dispatched: u64,
    /// Subtasks that finished with a result.
    pub completed: u64,
    /// Subtasks that failed on the agent or in transit.
    pub failed: u64,
    /// Subtasks the coordinator stopped waiting on.
    pub abandoned: u64,
    /// Sent and not yet finished.
    pub in_flight: u64,
    /// Total wall time of finished subtasks.
    pub duration_ms: u64,
}

/// Tracks what the coordinator has sent to each agent.
pub struct AgentMonitor {
    agents: Arc<RwLock<HashMap<String, AgentMetrics>>>,
}

impl AgentMonitor {
    /// A monitor with no agents recorded.
    pub fn new() -> Self {
        Self {
            agents: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// A subtask was handed to `agent`.
    pub async fn start_task(&self, agent: &str) {
        let mut agents = self.agents.write().await;
        let metrics = agents.entry(agent.to_string()).or_default();
        metrics.dispatched += 1;
        metrics.in_flight += 1;
    }

    /// A subtask on `agent` reached a terminal outcome.
    pub async fn finish_task(&self, agent: &str, succeeded: bool, duration_ms: u64) {
        let mut agents = self.agents.write().await;
        let metrics = agents.entry(agent.to_string()).or_default();
        metrics.in_flight = metrics.in_flight.saturating_sub(1);
        metrics.duration_ms += duration_ms;
        if succeeded {
            metrics.completed += 1;
        } else {
            metrics.failed += 1;
        }
    }

    /// The coordinator stopped waiting on a subtask running on `agent`.
    pub async fn abandon_task(&self, agent: &str) {
        let mut agents = self.agents.write().await;
        let metrics = agents.entry(agent.to_string()).or_default();
        metrics.in_flight = metrics.in_flight.saturating_sub(1);
        metrics.abandoned += 1;
    }

    /// Counters for `agent`, if anything was sent to it.
    pub async fn get(&self, agent: &str) -> Option<AgentMetrics> {
        self.agents.read().await.get(agent).cloned()
    }

    /// All agents, sorted by name.
    pub async fn snapshot(&self) -> BTreeMap<String, AgentMetrics> {
        let agents = self.agents.read().await;
        agents
            .iter()
            .map(|(name, m)| (name.clone(), m.clone()))
            .collect()
    }

    /// Sum of every agent's counters.
    pub async fn aggregate_metrics(&self) -> AgentMetrics {
        let agents = self.agents.read().await;
        let mut total = AgentMetrics::default();
        for m in agents.values() {
            total.dispatched += m.dispatched;
            total.completed += m.completed;
            total.failed += m.failed;
            total.abandoned += m.abandoned;
            total.in_flight += m.in_flight;
            total.duration_ms += m.duration_ms;
        }
        total
    }

    /// Every agent's counters keyed by agent name.
    pub async fn to_json(&self) -> serde_json::Value {
        let agents = self.snapshot().await;
        let aggregate = self.aggregate_metrics().await;
        serde_json::json!({
            "agents": agents,
            "aggregate": aggregate,
        })
    }
}

impl Default for AgentMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Coordinator-wide count of subtasks currently dispatched and awaited,
/// with the highest value seen.
#[derive(Debug, Default)]
pub struct InFlightGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlightGauge {
    /// A gauge at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more in-flight subtask until the guard drops.
    pub fn enter(self: &Arc<Self>) -> InFlightGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard {
            gauge: Arc::clone(self),
        }
    }

    /// Subtasks in flight right now.
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Highest in-flight count since the last reset.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Reset the peak to the current value.
    pub fn reset_peak(&self) {
        self.peak.store(self.current(), Ordering::SeqCst);
    }
}

/// Decrements the gauge on drop, including when the awaiting task is aborted.
#[derive(Debug)]
pub struct InFlightGuard {
    gauge: Arc<InFlightGauge>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
    }
}
