use crate::aggregate::{AggregatedResult, ExecutionRecord, SubtaskDisposition, SubtaskError};
use crate::decompose::Decomposer;
use crate::monitor::{AgentMonitor, InFlightGauge};
use crate::plan::{Subtask, SubtaskId, SubtaskPlan};
use async_trait::async_trait;
use chrono::Utc;
use conductor_a2a::{
    AgentCard, InputRequest, ProtocolClient, SharedRegistry, TaskHandle, TaskOutcome,
};
use conductor_core::{ConductorResult, Params};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tokio::time::Instant;
use tracing::{info, warn};

/// Coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Most subtasks dispatched and awaited at once; extra ready subtasks queue.
    pub max_in_flight: usize,
    /// Wait for each remote task to settle.
    pub subtask_timeout_ms: u64,
    /// Budget for a whole plan. In-flight and queued subtasks are abandoned
    /// when it runs out.
    pub request_timeout_ms: Option<u64>,
    /// How many times one subtask may answer `input-required`.
    pub max_input_rounds: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            subtask_timeout_ms: 30_000,
            request_timeout_ms: Some(120_000),
            max_input_rounds: 1,
        }
    }
}

/// Per-request overrides.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Skill id to agent name. Replaces the registration-order tie-break.
    pub prefer: HashMap<String, String>,
    /// Replaces `request_timeout_ms` for this request.
    pub timeout: Option<Duration>,
}

impl RunOptions {
    /// No preferences and the configured request timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `skill_id` to `agent` unless a subtask names its own agent.
    pub fn prefer(mut self, skill_id: impl Into<String>, agent: impl Into<String>) -> Self {
        self.prefer.insert(skill_id.into(), agent.into());
        self
    }

    /// Whole-request deadline, overriding `request_timeout_ms`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Answers `input-required` signals on behalf of the caller.
#[async_trait]
pub trait InputResolver: Send + Sync {
    /// Extra parameters for `subtask`, or `None` to give up on it.
    async fn resolve(&self, subtask: &Subtask, request: &InputRequest) -> Option<Params>;
}

/// Never answers; a subtask that asks for input fails with kind `input_required`.
pub struct DeclineInput;

#[async_trait]
impl InputResolver for DeclineInput {
    async fn resolve(&self, _subtask: &Subtask, _request: &InputRequest) -> Option<Params> {
        None
    }
}

/// Answers from a fixed map of parameter values.
///
/// Only the fields the agent asked for are sent. If it named none, the whole
/// map is sent.
pub struct StaticInputResolver {
    answers: Params,
}

impl StaticInputResolver {
    /// Resolver that answers every request from `answers`.
    pub fn new(answers: Params) -> Self {
        Self { answers }
    }
}

#[async_trait]
impl InputResolver for StaticInputResolver {
    async fn resolve(&self, _subtask: &Subtask, request: &InputRequest) -> Option<Params> {
        let answer: Params = if request.fields.is_empty() {
            self.answers.clone()
        } else {
            request
                .fields
                .iter()
                .filter_map(|f| self.answers.get(f).map(|v| (f.clone(), v.clone())))
                .collect()
        };
        (!answer.is_empty()).then_some(answer)
    }
}

/// What a finished subtask unit of work reports back to the coordinator.
struct SubtaskRun {
    id: SubtaskId,
    outcome: Result<Params, SubtaskError>,
}

/// Executes subtask plans against the agents in a registry.
///
/// Ready subtasks run concurrently, each as its own tokio task, gated by a
/// semaphore of `max_in_flight` permits. A subtask is dispatched only after
/// all its dependencies completed; dependents of anything that did not
/// complete are marked skipped and never dispatched.
pub struct Orchestrator {
    registry: SharedRegistry,
    client: ProtocolClient,
    config: OrchestratorConfig,
    resolver: Arc<dyn InputResolver>,
    monitor: Arc<AgentMonitor>,
    gauge: Arc<InFlightGauge>,
}

impl Orchestrator {
    /// Coordinator over the agents in `registry`.
    pub fn new(registry: SharedRegistry, client: ProtocolClient, config: OrchestratorConfig) -> Self {
        Self {
            registry,
            client,
            config,
            resolver: Arc::new(DeclineInput),
            monitor: Arc::new(AgentMonitor::new()),
            gauge: Arc::new(InFlightGauge::new()),
        }
    }

    /// Replace the default resolver, which declines every input request.
    pub fn with_resolver(mut self, resolver: Arc<dyn InputResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Tuning the coordinator runs with.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Per-agent counters.
    pub fn monitor(&self) -> &Arc<AgentMonitor> {
        &self.monitor
    }

    /// Coordinator-side in-flight count and its peak.
    pub fn gauge(&self) -> &Arc<InFlightGauge> {
        &self.gauge
    }

    /// Decompose `question` and execute the resulting plan.
    pub async fn run(
        &self,
        decomposer: &dyn Decomposer,
        question: &str,
        options: &RunOptions,
    ) -> ConductorResult<AggregatedResult> {
        let plan = decomposer.decompose(question).await?;
        info!(
            question = %question,
            subtasks = plan.len(),
            final_subtask = %plan.final_answer(),
            "Plan created"
        );
        self.execute(&plan, options).await
    }

    /// Execute `plan` without an external shutdown signal.
    pub async fn execute(
        &self,
        plan: &SubtaskPlan,
        options: &RunOptions,
    ) -> ConductorResult<AggregatedResult> {
        self.execute_until(plan, options, std::future::pending()).await
    }

    /// Execute `plan`, abandoning whatever is still running or queued when
    /// `shutdown` resolves or the request deadline passes.
    ///
    /// Abandoned remote tasks are not aborted; the coordinator only stops
    /// waiting on them.
    pub async fn execute_until(
        &self,
        plan: &SubtaskPlan,
        options: &RunOptions,
        shutdown: impl Future<Output = ()>,
    ) -> ConductorResult<AggregatedResult> {
        plan.validate()?;

        let mut record = ExecutionRecord {
            started_at: Some(Utc::now()),
            ..ExecutionRecord::default()
        };
        let mut remaining: Vec<usize> = plan.subtasks.iter().map(|s| s.depends_on.len()).collect();
        let mut ready: BTreeSet<SubtaskId> = plan
            .subtasks
            .iter()
            .filter(|s| s.depends_on.is_empty())
            .map(|s| s.id)
            .collect();

        let permits = Arc::new(Semaphore::new(self.config.max_in_flight.max(1)));
        let handles: Arc<Mutex<HashMap<SubtaskId, TaskHandle>>> = Arc::default();
        let mut running: JoinSet<SubtaskRun> = JoinSet::new();
        let mut running_ids: HashMap<SubtaskId, (String, Instant)> = HashMap::new();
        let mut spawned: HashMap<task::Id, SubtaskId> = HashMap::new();

        let deadline = options
            .timeout
            .or_else(|| self.config.request_timeout_ms.map(Duration::from_millis))
            .map(|budget| Instant::now() + budget);
        let expired = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expired);
        tokio::pin!(shutdown);

        let mut stopped: Option<&'static str> = None;

        loop {
            // Fill free permits from the ready queue, lowest id first.
            while let Some(&id) = ready.first() {
                let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                    break;
                };
                ready.remove(&id);

                let prepared = self
                    .select_agent(plan, id, options)
                    .and_then(|card| {
                        plan.resolve_inputs(id, &record.outputs)
                            .map(|input| (card, input))
                            .map_err(SubtaskError::from)
                    });
                let (card, input) = match prepared {
                    Ok(prepared) => prepared,
                    Err(error) => {
                        drop(permit);
                        self.settle_failed(plan, id, error, &mut record, &mut ready);
                        continue;
                    }
                };

                let subtask = plan.subtasks[id.0].clone();
                record.agents.insert(id, card.name.clone());
                self.monitor.start_task(&card.name).await;
                info!(subtask = %subtask.name, skill = %subtask.skill_id, agent = %card.name, "Subtask dispatched");

                running_ids.insert(id, (card.name.clone(), Instant::now()));
                let unit = SubtaskUnit {
                    client: self.client.clone(),
                    resolver: Arc::clone(&self.resolver),
                    handles: Arc::clone(&handles),
                    timeout: Duration::from_millis(self.config.subtask_timeout_ms),
                    max_input_rounds: self.config.max_input_rounds,
                };
                let guard = self.gauge.enter();
                let abort = running.spawn(async move {
                    let _permit = permit;
                    let _guard = guard;
                    let outcome = unit.run(&subtask, &card, input).await;
                    SubtaskRun {
                        id: subtask.id,
                        outcome,
                    }
                });
                spawned.insert(abort.id(), id);
            }

            if running.is_empty() {
                break;
            }

            let joined = tokio::select! {
                _ = &mut shutdown => {
                    stopped = Some("cancelled by caller");
                    break;
                }
                _ = &mut expired => {
                    stopped = Some("request timed out");
                    break;
                }
                joined = running.join_next_with_id() => joined,
            };

            let (id, outcome) = match joined {
                Some(Ok((task_id, run))) => {
                    spawned.remove(&task_id);
                    (run.id, run.outcome)
                }
                Some(Err(join_err)) => {
                    let Some(id) = spawned.remove(&join_err.id()) else {
                        warn!(error = %join_err, "Unknown unit of work ended");
                        continue;
                    };
                    warn!(subtask = %plan.subtasks[id.0].name, error = %join_err, "Subtask unit of work died");
                    let message = if join_err.is_panic() {
                        "subtask unit of work panicked"
                    } else {
                        "subtask unit of work was cancelled"
                    };
                    (id, Err(SubtaskError::new("engine_panic", message)))
                }
                None => break,
            };
            let Some((agent, since)) = running_ids.remove(&id) else {
                continue;
            };
            let elapsed_ms = u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX);

            if let Some(handle) = handles.lock().get(&id) {
                record.task_ids.insert(id, handle.task_id);
            }
            self.monitor
                .finish_task(&agent, outcome.is_ok(), elapsed_ms)
                .await;

            match outcome {
                Ok(output) => {
                    info!(subtask = %plan.subtasks[id.0].name, agent = %agent, "Subtask completed");
                    record.outputs.insert(id, output);
                    record
                        .dispositions
                        .insert(id, SubtaskDisposition::Completed);
                    for dependent in plan.dependents(id) {
                        remaining[dependent.0] = remaining[dependent.0].saturating_sub(1);
                        if remaining[dependent.0] == 0
                            && !record.dispositions.contains_key(&dependent)
                        {
                            ready.insert(dependent);
                        }
                    }
                }
                Err(error) => self.settle_failed(plan, id, error, &mut record, &mut ready),
            }
        }

        if let Some(reason) = stopped {
            warn!(reason = %reason, in_flight = running.len(), "Plan execution stopped early");
            running.abort_all();
            for (id, (agent, _)) in running_ids.drain() {
                if let Some(handle) = handles.lock().get(&id) {
                    record.task_ids.insert(id, handle.task_id);
                }
                self.monitor.abandon_task(&agent).await;
                record.dispositions.insert(
                    id,
                    SubtaskDisposition::Abandoned {
                        reason: reason.to_string(),
                    },
                );
            }
            for subtask in &plan.subtasks {
                record
                    .dispositions
                    .entry(subtask.id)
                    .or_insert_with(|| SubtaskDisposition::Abandoned {
                        reason: reason.to_string(),
                    });
            }
            while running.join_next().await.is_some() {}
        }

        let result = AggregatedResult::assemble(plan, record);
        match &result {
            Ok(aggregated) => info!(
                completed = aggregated.contributions.len(),
                failed = aggregated.failed.len(),
                skipped = aggregated.skipped.len(),
                abandoned = aggregated.abandoned.len(),
                partial = aggregated.partial,
                "Plan finished"
            ),
            Err(e) => warn!(error = %e, "Plan failed"),
        }
        result
    }

    /// Pick the agent for subtask `id`: an explicit per-subtask or
    /// per-request choice if given, otherwise the first capable agent in
    /// registration order.
    fn select_agent(
        &self,
        plan: &SubtaskPlan,
        id: SubtaskId,
        options: &RunOptions,
    ) -> Result<AgentCard, SubtaskError> {
        let subtask = &plan.subtasks[id.0];
        let registry = self.registry.read();

        let named = subtask
            .agent
            .as_ref()
            .or_else(|| options.prefer.get(&subtask.skill_id));
        if let Some(name) = named {
            let card = registry.get(name).map_err(SubtaskError::from)?;
            if !card.supports(&subtask.skill_id) {
                return Err(SubtaskError::new(
                    "no_capable_agent",
                    format!("agent '{name}' does not advertise '{}'", subtask.skill_id),
                ));
            }
            return Ok(card.clone());
        }

        registry
            .find_agents(&subtask.skill_id)
            .first()
            .map(|card| (*card).clone())
            .ok_or_else(|| {
                SubtaskError::new(
                    "no_capable_agent",
                    format!("no agent advertises '{}'", subtask.skill_id),
                )
            })
    }

    /// Record `id` as failed and mark everything downstream of it skipped.
    fn settle_failed(
        &self,
        plan: &SubtaskPlan,
        id: SubtaskId,
        error: SubtaskError,
        record: &mut ExecutionRecord,
        ready: &mut BTreeSet<SubtaskId>,
    ) {
        warn!(subtask = %plan.subtasks[id.0].name, kind = %error.kind, error = %error.message, "Subtask failed");
        record
            .dispositions
            .insert(id, SubtaskDisposition::Failed { error });

        let mut frontier = vec![id];
        while let Some(blocked_by) = frontier.pop() {
            for dependent in plan.dependents(blocked_by) {
                if record.dispositions.contains_key(&dependent) {
                    continue;
                }
                ready.remove(&dependent);
                info!(subtask = %plan.subtasks[dependent.0].name, blocked_by = %blocked_by, "Subtask skipped");
                record.dispositions.insert(
                    dependent,
                    SubtaskDisposition::SkippedDependencyFailed { blocked_by },
                );
                frontier.push(dependent);
            }
        }
    }
}

/// Everything one subtask's unit of work needs, detached from the engine.
struct SubtaskUnit {
    client: ProtocolClient,
    resolver: Arc<dyn InputResolver>,
    handles: Arc<Mutex<HashMap<SubtaskId, TaskHandle>>>,
    timeout: Duration,
    max_input_rounds: u32,
}

impl SubtaskUnit {
    /// Dispatch, await, and answer input requests until the task settles.
    async fn run(
        &self,
        subtask: &Subtask,
        card: &AgentCard,
        input: Params,
    ) -> Result<Params, SubtaskError> {
        let handle = self
            .client
            .dispatch(card, &subtask.skill_id, input)
            .await?;
        self.handles.lock().insert(subtask.id, handle.clone());

        let mut rounds = 0;
        loop {
            match self.client.await_result(&handle, self.timeout).await? {
                TaskOutcome::Completed(output) => return Ok(output),
                TaskOutcome::Failed(detail) => return Err(detail.into()),
                TaskOutcome::InputRequired(request) => {
                    if rounds >= self.max_input_rounds {
                        return Err(SubtaskError::new("input_required", request.message));
                    }
                    let Some(extra) = self.resolver.resolve(subtask, &request).await else {
                        return Err(SubtaskError::new("input_required", request.message));
                    };
                    info!(subtask = %subtask.name, fields = ?request.fields, "Answering input request");
                    self.client.provide_input(&handle, extra).await?;
                    rounds += 1;
                }
            }
        }
    }
}
