use crate::assembler::ContextAssembler;
use crate::cancel::CancelToken;
use crate::config::OrchestratorConfig;
use crate::decision::decide;
use crate::monitor::{AgentMonitor, AgentUsage};
use crate::parser::{estimate_cost, infer_capabilities, DecompositionParser};
use crate::progress::{ProgressEvent, ProgressObserver, ProgressTracker};
use crate::prompts::{analysis_prompt, synthesis_prompt, SynthesisSection};
use crate::pruner::Pruner;
use crate::registry::AgentRegistry;
use crate::retry::record_attempt;
use crate::waves::{compute_waves, runs_concurrently};
use conductor_core::{
    summarize::extract_leading, AgentContext, ConductorError, ConductorResult, DelegationMetrics,
    ExtractiveSummarizer, HeuristicTokenCounter, Phase, ProgressSnapshot, Subtask, SubtaskResult,
    Summarizer, SummaryLevel, TaskGraph, TimeBreakdown, TokenCounter,
};
use conductor_session::{Checkpoint, CheckpointStore};
use futures_util::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Id of the single subtask used when a task runs without decomposition.
pub const DIRECT_SUBTASK_ID: &str = "direct";

/// Final outcome of one orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub run_id: Uuid,
    /// True only when every subtask completed.
    pub success: bool,
    pub content: String,
    /// First subtask error, the cancellation reason, or why nothing ran.
    pub error: Option<String>,
    pub cancelled: bool,
    pub delegated: bool,
    /// Completed subtasks in execution order.
    pub subtask_results: Vec<SubtaskResult>,
    /// Terminal failures keyed by subtask id.
    pub failed_subtasks: BTreeMap<String, String>,
    pub metrics: Option<DelegationMetrics>,
    /// Usage per agent id, coordinator included.
    #[serde(default)]
    pub agent_usage: BTreeMap<String, AgentUsage>,
}

/// Multi-agent orchestrator: decide → analyse → decompose → execute → synthesise.
///
/// The orchestrator itself is stateless between runs apart from the last
/// run's metrics and tracker; each call to [`orchestrate`](Self::orchestrate)
/// owns its shared context and progress state.
pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    config: OrchestratorConfig,
    parser: DecompositionParser,
    pruner: Pruner,
    counter: Arc<dyn TokenCounter>,
    summarizer: Arc<dyn Summarizer>,
    assembler: ContextAssembler,
    observers: Vec<Arc<dyn ProgressObserver>>,
    conversation_id: Uuid,
    last_metrics: Mutex<Option<DelegationMetrics>>,
    current: Mutex<Option<Arc<ProgressTracker>>>,
}

impl Orchestrator {
    pub fn new(mut registry: AgentRegistry, config: OrchestratorConfig) -> ConductorResult<Self> {
        config.validate()?;
        if let Some(id) = &config.coordinator_id {
            if registry.get(id).is_none() {
                return Err(ConductorError::Config(format!(
                    "Coordinator '{id}' is not registered"
                )));
            }
            registry.set_coordinator(id.clone());
        }
        let counter: Arc<dyn TokenCounter> = Arc::new(HeuristicTokenCounter);
        let summarizer: Arc<dyn Summarizer> = Arc::new(ExtractiveSummarizer);
        Ok(Self {
            registry: Arc::new(registry),
            pruner: Pruner::new(config.similarity_threshold),
            config,
            parser: DecompositionParser::new(),
            assembler: ContextAssembler::new(counter.clone(), summarizer.clone()),
            counter,
            summarizer,
            observers: Vec::new(),
            conversation_id: Uuid::new_v4(),
            last_metrics: Mutex::new(None),
            current: Mutex::new(None),
        })
    }

    pub fn with_token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.assembler = ContextAssembler::new(counter.clone(), self.summarizer.clone());
        self.counter = counter;
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.assembler = ContextAssembler::new(self.counter.clone(), summarizer.clone());
        self.summarizer = summarizer;
        self
    }

    pub fn with_parser(mut self, parser: DecompositionParser) -> Self {
        self.parser = parser;
        self
    }

    /// Checkpoints written by this orchestrator are filed under `id`.
    pub fn with_conversation_id(mut self, id: Uuid) -> Self {
        self.conversation_id = id;
        self
    }

    /// Attach an observer to every subsequent run.
    pub fn subscribe(&mut self, observer: Arc<dyn ProgressObserver>) {
        self.observers.push(observer);
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Metrics of the most recently finished run.
    pub fn last_metrics(&self) -> Option<DelegationMetrics> {
        self.last_metrics.lock().clone()
    }

    /// Snapshot of the current (or last) run.
    pub fn progress_snapshot(&self) -> Option<ProgressSnapshot> {
        self.current.lock().as_ref().map(|tracker| tracker.snapshot())
    }

    /// Run `task` against the registered agents.
    ///
    /// Subtask failures, parse failures and cancellation are reported in the
    /// returned result; `Err` means the orchestrator could not run at all.
    pub async fn orchestrate(
        &self,
        task: &str,
        context: AgentContext,
        cancel: Option<CancelToken>,
        sink: Option<Arc<dyn CheckpointStore>>,
    ) -> ConductorResult<OrchestrationResult> {
        if self.registry.is_empty() {
            return Err(ConductorError::Orchestrator(
                "No agents registered".to_string(),
            ));
        }
        let run_id = Uuid::new_v4();
        let run = self.start_run(task, context.clone(), ProgressSnapshot::new(run_id), cancel, sink);
        let mut state = RunState::new(context);
        info!(run_id = %run_id, task = %task, agents = self.registry.len(), "Orchestrator: starting run");

        if let Some(reason) = run.cancellation() {
            return Ok(run.cancelled(state, reason).await);
        }

        let decision = decide(task, self.registry.len(), self.config.smart_delegation);
        info!(delegate = decision.delegate, reason = %decision.reason, "Orchestrator Phase 0: Decision");
        run.tracker.record_decision(decision.delegate, decision.reason);
        state.delegated = decision.delegate;
        run.checkpoint().await;

        let planned = if decision.delegate {
            run.plan(&mut state).await?
        } else {
            None
        };
        let graph = planned.unwrap_or_else(|| direct_graph(task));

        if let Some(reason) = run.cancellation() {
            return Ok(run.cancelled(state, reason).await);
        }
        run.tracker.set_graph(&graph);
        run.tracker.set_parallel_groups(compute_waves(&graph));
        run.execute(&graph, state).await
    }

    /// Continue a run from `checkpoint`.
    ///
    /// Completed subtasks keep their results and are not re-run; everything
    /// else goes back to pending. A checkpoint taken before a graph existed
    /// restarts the run from the beginning.
    pub async fn resume(
        &self,
        checkpoint: &Checkpoint,
        cancel: Option<CancelToken>,
        sink: Option<Arc<dyn CheckpointStore>>,
    ) -> ConductorResult<OrchestrationResult> {
        if !checkpoint.resumable {
            return Err(ConductorError::Checkpoint(format!(
                "Checkpoint {} is not resumable (phase {})",
                checkpoint.id, checkpoint.phase
            )));
        }
        if self.registry.is_empty() {
            return Err(ConductorError::Orchestrator(
                "No agents registered".to_string(),
            ));
        }
        let Some(graph) = checkpoint.snapshot.graph.clone() else {
            info!(checkpoint_id = %checkpoint.id, "Checkpoint predates decomposition; restarting run");
            return self
                .orchestrate(&checkpoint.task, checkpoint.context.clone(), cancel, sink)
                .await;
        };

        let run = self.start_run(
            &checkpoint.task,
            checkpoint.context.clone(),
            checkpoint.snapshot.clone(),
            cancel,
            sink,
        );
        let mut state = RunState::new(checkpoint.context.clone());
        state.delegated = checkpoint.snapshot.delegated.unwrap_or(true);
        state.pruned = checkpoint.snapshot.pruned.len();
        state.created = if state.delegated {
            graph.len() + state.pruned
        } else {
            0
        };
        for result in checkpoint.snapshot.completed_results() {
            state.record(SubtaskOutcome::Completed(result.clone()));
        }
        for id in graph.ids() {
            if !state.is_done(&id) {
                run.tracker.reset_subtask(&id);
            }
        }
        info!(
            run_id = %checkpoint.run_id,
            checkpoint_id = %checkpoint.id,
            completed = state.done.len(),
            remaining = graph.len() - state.done.len(),
            "Orchestrator: resuming run"
        );
        run.execute(&graph, state).await
    }

    fn start_run(
        &self,
        task: &str,
        original: AgentContext,
        snapshot: ProgressSnapshot,
        cancel: Option<CancelToken>,
        sink: Option<Arc<dyn CheckpointStore>>,
    ) -> Run<'_> {
        let tracker = Arc::new(ProgressTracker::from_snapshot(snapshot));
        for observer in &self.observers {
            tracker.subscribe(observer.clone());
        }
        *self.current.lock() = Some(tracker.clone());
        Run {
            orchestrator: self,
            task: task.to_string(),
            original,
            tracker,
            cancel: cancel.unwrap_or_default(),
            sink,
            monitor: AgentMonitor::new(),
        }
    }
}

/// Single-subtask graph used when the task is not (or cannot be) decomposed.
fn direct_graph(task: &str) -> TaskGraph {
    TaskGraph::new(vec![Subtask::new(DIRECT_SUBTASK_ID, task)
        .with_capabilities(infer_capabilities(task))
        .with_cost(estimate_cost(task))])
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn context_tokens(counter: &dyn TokenCounter, context: &AgentContext) -> u64 {
    let history = counter.count_messages(&context.conversation_history);
    let files: usize = context
        .file_references
        .iter()
        .map(|f| counter.count(&f.name) + counter.count(&f.path))
        .sum();
    let tools: usize = context
        .tool_results
        .iter()
        .map(|(k, v)| counter.count(k) + counter.count(v))
        .sum();
    let prefs: usize = context
        .user_preferences
        .iter()
        .map(|(k, v)| counter.count(k) + counter.count(v))
        .sum();
    let metadata: usize = context
        .metadata
        .values()
        .map(|v| match v {
            serde_json::Value::String(s) => counter.count(s),
            other => counter.count(&other.to_string()),
        })
        .sum();
    (history + files + tools + prefs + metadata) as u64
}

enum SubtaskOutcome {
    Completed(SubtaskResult),
    Failed { subtask_id: String, error: String },
}

/// Mutable state of one run, owned by the run loop.
struct RunState {
    shared: AgentContext,
    results: Vec<SubtaskResult>,
    done: HashSet<String>,
    failures: BTreeMap<String, String>,
    first_error: Option<String>,
    time: TimeBreakdown,
    created: usize,
    pruned: usize,
    delegated: bool,
}

impl RunState {
    fn new(shared: AgentContext) -> Self {
        Self {
            shared,
            results: Vec::new(),
            done: HashSet::new(),
            failures: BTreeMap::new(),
            first_error: None,
            time: TimeBreakdown::default(),
            created: 0,
            pruned: 0,
            delegated: false,
        }
    }

    fn is_done(&self, id: &str) -> bool {
        self.done.contains(id)
    }

    /// Fold one outcome into the run. The only place the shared context is written.
    fn record(&mut self, outcome: SubtaskOutcome) {
        match outcome {
            SubtaskOutcome::Completed(result) => {
                if let Some(update) = &result.context_update {
                    self.shared.apply_update(update);
                }
                self.shared.tool_results.insert(
                    format!("{}_result_{}", result.agent_id, result.subtask_id),
                    result.content.clone(),
                );
                self.failures.remove(&result.subtask_id);
                self.done.insert(result.subtask_id.clone());
                self.results.push(result);
            }
            SubtaskOutcome::Failed { subtask_id, error } => {
                self.first_error.get_or_insert_with(|| error.clone());
                self.failures.insert(subtask_id, error);
            }
        }
    }
}

/// One orchestration run: the tracker, cancellation and checkpoint sink it reports to.
struct Run<'a> {
    orchestrator: &'a Orchestrator,
    task: String,
    original: AgentContext,
    tracker: Arc<ProgressTracker>,
    cancel: CancelToken,
    sink: Option<Arc<dyn CheckpointStore>>,
    monitor: AgentMonitor,
}

impl Run<'_> {
    fn cancellation(&self) -> Option<String> {
        self.cancel.is_cancelled().then(|| {
            self.cancel
                .reason()
                .unwrap_or_else(|| "no reason given".to_string())
        })
    }

    /// Analysis and decomposition. `None` means fall back to direct execution.
    async fn plan(&self, state: &mut RunState) -> ConductorResult<Option<TaskGraph>> {
        let orch = self.orchestrator;
        let Some(coordinator) = orch.registry.coordinator().cloned() else {
            return Ok(None);
        };

        self.tracker.advance(Phase::Analysis)?;
        info!(coordinator = %coordinator.id(), "Orchestrator Phase 1: Analysis");
        self.tracker.emit(ProgressEvent::AnalysisStarted {
            agent_id: coordinator.id().to_string(),
        });
        let descriptors = orch.registry.descriptors();
        let prompt = analysis_prompt(&self.task, &descriptors);
        let context = orch
            .assembler
            .guard()
            .enforce(state.shared.clone(), orch.config.subtask_token_budget)
            .await;
        let start = Instant::now();
        let response = coordinator.process(&prompt, &context).await;
        let duration_ms = elapsed_ms(start);
        state.time.analysis_ms += duration_ms;
        self.tracker.emit(ProgressEvent::AnalysisCompleted {
            agent_id: coordinator.id().to_string(),
            duration_ms,
        });

        let analysis = match response {
            Ok(response) => {
                self.account(coordinator.id(), &prompt, &context, &response.content, duration_ms);
                if !response.success {
                    let error = response
                        .error
                        .unwrap_or_else(|| "coordinator reported failure".to_string());
                    warn!(error = %error, "Analysis failed; executing the task directly");
                    self.monitor.record_error(coordinator.id());
                    return Ok(None);
                }
                response.content
            }
            Err(e) => {
                warn!(error = %e, "Analysis failed; executing the task directly");
                self.monitor.record_error(coordinator.id());
                return Ok(None);
            }
        };
        self.checkpoint().await;

        self.tracker.advance(Phase::Decomposition)?;
        info!("Orchestrator Phase 2: Decomposition");
        let Some(parsed) = orch.parser.parse_detailed(&analysis, &descriptors) else {
            warn!("Decomposition could not be parsed; executing the task directly");
            self.tracker.emit(ProgressEvent::DecompositionParsed {
                subtask_count: 0,
                strategy: None,
            });
            return Ok(None);
        };
        self.tracker.emit(ProgressEvent::DecompositionParsed {
            subtask_count: parsed.graph.len(),
            strategy: Some(parsed.strategy.to_string()),
        });

        let outcome = orch
            .pruner
            .prune(&parsed.graph, orch.config.pruning_token_budget);
        for (id, reason) in &outcome.removed {
            self.tracker.record_pruned(id, reason);
        }
        state.created = parsed.graph.len();
        state.pruned = outcome.removed.len();
        info!(
            strategy = parsed.strategy,
            created = state.created,
            pruned = state.pruned,
            "Decomposition ready"
        );
        if outcome.graph.is_empty() {
            warn!("Pruning removed every subtask; executing the task directly");
            return Ok(None);
        }
        Ok(Some(outcome.graph))
    }

    /// Execution and synthesis for an installed graph.
    async fn execute(&self, graph: &TaskGraph, mut state: RunState) -> ConductorResult<OrchestrationResult> {
        if self.tracker.phase() != Phase::Synthesis {
            self.tracker.advance(Phase::Execution)?;
            info!(subtasks = graph.len(), "Orchestrator Phase 3: Execution");
            self.checkpoint().await;

            let start = Instant::now();
            let interrupted = self.run_waves(graph, &mut state).await?;
            state.time.specialized_ms += elapsed_ms(start);
            if let Some(reason) = interrupted {
                return Ok(self.cancelled(state, reason).await);
            }
        }
        self.finish(graph, state).await
    }

    /// Run every wave in order. Returns the cancellation reason when the
    /// run was cancelled before the last wave finished.
    async fn run_waves(&self, graph: &TaskGraph, state: &mut RunState) -> ConductorResult<Option<String>> {
        for (index, wave) in compute_waves(graph).iter().enumerate() {
            if let Some(reason) = self.cancellation() {
                info!(wave = index, reason = %reason, "Cancelled before wave");
                return Ok(Some(reason));
            }
            let pending: Vec<&Subtask> = wave
                .iter()
                .filter(|id| !state.is_done(id))
                .filter_map(|id| graph.get(id))
                .collect();
            if pending.is_empty() {
                continue;
            }
            let ids: Vec<String> = pending.iter().map(|s| s.id.clone()).collect();
            let concurrent = runs_concurrently(graph, &ids);
            info!(wave = index, subtasks = ids.len(), concurrent, "Starting wave");
            self.tracker.emit(ProgressEvent::WaveStarted {
                index,
                subtask_ids: ids,
                concurrent,
            });

            if concurrent {
                self.run_concurrent(&pending, state).await?;
            } else {
                self.run_sequential(&pending, state).await?;
            }
            self.checkpoint().await;
        }
        Ok(self.cancellation())
    }

    /// One subtask at a time against the live shared context.
    async fn run_sequential(&self, pending: &[&Subtask], state: &mut RunState) -> ConductorResult<()> {
        for subtask in pending {
            if self.cancel.is_cancelled() {
                debug!(subtask_id = %subtask.id, "Cancelled before dispatch");
                break;
            }
            let outcome = self.run_subtask(subtask, &state.shared, &state.results).await?;
            state.record(outcome);
        }
        Ok(())
    }

    /// All of `pending` at once against a snapshot taken now, bounded by the
    /// concurrency limit. Outcomes are merged one at a time as they finish.
    async fn run_concurrent(&self, pending: &[&Subtask], state: &mut RunState) -> ConductorResult<()> {
        let snapshot = state.shared.clone();
        let prior = state.results.clone();
        let semaphore = Semaphore::new(self.orchestrator.config.max_concurrency.max(1));

        let mut in_flight: FuturesUnordered<_> = pending
            .iter()
            .map(|subtask| {
                let (snapshot, prior, semaphore) = (&snapshot, &prior, &semaphore);
                async move {
                    let _permit = match semaphore.acquire().await {
                        Ok(permit) => permit,
                        Err(e) => {
                            return Err(ConductorError::Orchestrator(format!(
                                "Concurrency limiter closed: {e}"
                            )))
                        }
                    };
                    if self.cancel.is_cancelled() {
                        debug!(subtask_id = %subtask.id, "Cancelled before dispatch");
                        return Ok(None);
                    }
                    self.run_subtask(subtask, snapshot, prior).await.map(Some)
                }
            })
            .collect();

        let mut failure = None;
        while let Some(outcome) = in_flight.next().await {
            match outcome {
                Ok(Some(outcome)) => state.record(outcome),
                Ok(None) => {}
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }
        failure.map_or(Ok(()), Err)
    }

    /// Resolve, dispatch and retry one subtask until it completes, fails for
    /// good, or the run is cancelled during a retry delay.
    async fn run_subtask(
        &self,
        subtask: &Subtask,
        base: &AgentContext,
        prior: &[SubtaskResult],
    ) -> ConductorResult<SubtaskOutcome> {
        let orch = self.orchestrator;
        let (agent, kind) = orch.registry.resolve(subtask).ok_or_else(|| {
            ConductorError::Orchestrator(format!("No agent available for subtask '{}'", subtask.id))
        })?;
        let policy = orch.config.retry.select(agent.name(), &subtask.capabilities);
        let context = orch
            .assembler
            .build(subtask, base, prior, orch.config.subtask_token_budget)
            .await;
        debug!(subtask_id = %subtask.id, agent_id = %agent.id(), kind = ?kind, "Dispatching subtask");

        let started = Instant::now();
        let mut attempts = Vec::new();
        let mut waited = Duration::ZERO;
        let mut attempt: u32 = 0;
        loop {
            self.tracker.start_subtask(&subtask.id, agent.id(), attempt)?;
            let call_start = Instant::now();
            let response = agent.process(&subtask.description, &context).await;
            let call_ms = elapsed_ms(call_start);

            let error = match response {
                Ok(response) if response.success => {
                    let tokens = self.account(
                        agent.id(),
                        &subtask.description,
                        &context,
                        &response.content,
                        call_ms,
                    );
                    attempts.push(record_attempt(attempt, waited, None));
                    let result = SubtaskResult {
                        subtask_id: subtask.id.clone(),
                        agent_id: agent.id().to_string(),
                        content: response.content,
                        tool_calls: response.tool_calls,
                        context_update: response.updated_context,
                        attempts,
                        tokens_used: tokens,
                        duration_ms: elapsed_ms(started),
                    };
                    self.tracker.complete_subtask(result.clone())?;
                    info!(
                        subtask_id = %subtask.id,
                        agent_id = %agent.id(),
                        attempts = attempt + 1,
                        duration_ms = result.duration_ms,
                        "Subtask completed"
                    );
                    return Ok(SubtaskOutcome::Completed(result));
                }
                Ok(response) => {
                    self.account(agent.id(), &subtask.description, &context, &response.content, call_ms);
                    response
                        .error
                        .unwrap_or_else(|| "agent reported failure".to_string())
                }
                Err(e) => e.to_string(),
            };
            self.monitor.record_error(agent.id());
            attempts.push(record_attempt(attempt, waited, Some(error.clone())));

            if policy.should_retry(attempt) && !self.cancel.is_cancelled() {
                let delay = policy.delay(attempt);
                warn!(
                    subtask_id = %subtask.id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Subtask failed; retrying"
                );
                self.tracker.fail_subtask(
                    &subtask.id,
                    &error,
                    attempts.clone(),
                    Some(delay.as_millis() as u64),
                )?;
                let interrupted = tokio::select! {
                    () = tokio::time::sleep(delay) => false,
                    () = self.cancel.cancelled() => true,
                };
                if interrupted {
                    warn!(subtask_id = %subtask.id, "Run cancelled during retry delay");
                    self.tracker.set_last_error(error.clone());
                    self.tracker.emit(ProgressEvent::SubtaskFailed {
                        subtask_id: subtask.id.clone(),
                        error: error.clone(),
                    });
                    return Ok(SubtaskOutcome::Failed {
                        subtask_id: subtask.id.clone(),
                        error,
                    });
                }
                waited = delay;
                attempt += 1;
                continue;
            }

            error!(
                subtask_id = %subtask.id,
                agent_id = %agent.id(),
                attempts = attempt + 1,
                error = %error,
                "Subtask failed"
            );
            self.tracker.fail_subtask(&subtask.id, &error, attempts, None)?;
            return Ok(SubtaskOutcome::Failed {
                subtask_id: subtask.id.clone(),
                error,
            });
        }
    }

    /// Record one agent call with the monitor; returns the tokens it cost.
    fn account(
        &self,
        agent_id: &str,
        prompt: &str,
        context: &AgentContext,
        response: &str,
        duration_ms: u64,
    ) -> u64 {
        let counter = self.orchestrator.counter.as_ref();
        let prompt_tokens = counter.count(prompt) as u64 + context_tokens(counter, context);
        let response_tokens = counter.count(response) as u64;
        self.monitor
            .record_call(agent_id, prompt_tokens, response_tokens, duration_ms);
        prompt_tokens + response_tokens
    }

    async fn finish(&self, graph: &TaskGraph, mut state: RunState) -> ConductorResult<OrchestrationResult> {
        let order = graph.execution_order();
        state
            .results
            .sort_by_key(|r| order.iter().position(|id| *id == r.subtask_id));

        if state.results.is_empty() {
            let reason = state
                .first_error
                .clone()
                .unwrap_or_else(|| "No subtask produced a result".to_string());
            error!(reason = %reason, "Orchestrator: every subtask failed");
            let metrics = self.metrics(graph, &state);
            self.tracker.set_metrics(metrics.clone());
            self.tracker.fail(&reason, false);
            self.checkpoint().await;
            *self.orchestrator.last_metrics.lock() = Some(metrics.clone());
            return Ok(self.result(state, String::new(), Some(reason), false, metrics));
        }

        let content = if graph.len() == 1 {
            state.results[0].content.clone()
        } else {
            self.synthesize(graph, &mut state).await?
        };

        let success = state.failures.is_empty();
        let metrics = self.metrics(graph, &state);
        self.tracker.set_metrics(metrics.clone());
        self.tracker.finish(success)?;
        self.checkpoint().await;
        *self.orchestrator.last_metrics.lock() = Some(metrics.clone());
        info!(
            success,
            completed = state.results.len(),
            failed = state.failures.len(),
            total_tokens = metrics.total_tokens,
            savings_percent = metrics.savings_percent,
            "Orchestrator: run complete"
        );
        let error = state.first_error.clone();
        Ok(self.result(state, content, error, false, metrics))
    }

    async fn synthesize(&self, graph: &TaskGraph, state: &mut RunState) -> ConductorResult<String> {
        let orch = self.orchestrator;
        self.tracker.advance(Phase::Synthesis)?;
        info!(results = state.results.len(), "Orchestrator Phase 4: Synthesis");
        self.tracker.emit(ProgressEvent::SynthesisStarted);
        let start = Instant::now();

        let share = orch.config.synthesis_token_budget / state.results.len().max(1);
        let mut sections = Vec::with_capacity(state.results.len());
        for result in &state.results {
            sections.push(SynthesisSection {
                subtask_id: result.subtask_id.clone(),
                description: graph
                    .get(&result.subtask_id)
                    .map(|s| s.description.clone())
                    .unwrap_or_default(),
                agent_id: result.agent_id.clone(),
                content: self.fit(&result.content, share).await,
            });
        }
        let failures: Vec<(String, String)> = state
            .failures
            .iter()
            .map(|(id, e)| (id.clone(), e.clone()))
            .collect();
        let prompt = synthesis_prompt(&self.task, &sections, &failures);

        let content = match orch.registry.coordinator().cloned() {
            Some(coordinator) => {
                let context = orch
                    .assembler
                    .guard()
                    .enforce(state.shared.clone(), orch.config.synthesis_token_budget)
                    .await;
                let call_start = Instant::now();
                match coordinator.process(&prompt, &context).await {
                    Ok(response) => {
                        self.account(
                            coordinator.id(),
                            &prompt,
                            &context,
                            &response.content,
                            elapsed_ms(call_start),
                        );
                        if response.success && !response.content.trim().is_empty() {
                            response.content
                        } else {
                            warn!(error = ?response.error, "Synthesis failed; concatenating results");
                            self.monitor.record_error(coordinator.id());
                            concatenate(&sections)
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Synthesis failed; concatenating results");
                        self.monitor.record_error(coordinator.id());
                        concatenate(&sections)
                    }
                }
            }
            None => concatenate(&sections),
        };

        let duration_ms = elapsed_ms(start);
        state.time.synthesis_ms += duration_ms;
        self.tracker
            .emit(ProgressEvent::SynthesisCompleted { duration_ms });
        Ok(content)
    }

    /// Shrink `text` to roughly `budget` tokens for the synthesis prompt.
    async fn fit(&self, text: &str, budget: usize) -> String {
        let counter = self.orchestrator.counter.as_ref();
        if counter.count(text) <= budget {
            return text.to_string();
        }
        match self
            .orchestrator
            .summarizer
            .summarize(text, SummaryLevel::Light)
            .await
        {
            Ok(summary) if counter.count(&summary) <= budget => summary,
            Ok(_) => extract_leading(text, SummaryLevel::Heavy),
            Err(e) => {
                warn!(error = %e, "Result summarization failed");
                extract_leading(text, SummaryLevel::Heavy)
            }
        }
    }

    async fn cancelled(&self, state: RunState, reason: String) -> OrchestrationResult {
        warn!(reason = %reason, completed = state.results.len(), "Orchestrator: run cancelled");
        let graph = self
            .tracker
            .snapshot()
            .graph
            .unwrap_or_else(|| TaskGraph::new(Vec::new()));
        let metrics = self.metrics(&graph, &state);
        self.tracker.set_metrics(metrics.clone());
        self.tracker.fail(&format!("Cancelled: {reason}"), true);
        self.checkpoint().await;
        *self.orchestrator.last_metrics.lock() = Some(metrics.clone());
        let sections: Vec<SynthesisSection> = state
            .results
            .iter()
            .map(|r| SynthesisSection {
                subtask_id: r.subtask_id.clone(),
                description: String::new(),
                agent_id: r.agent_id.clone(),
                content: r.content.clone(),
            })
            .collect();
        self.result(state, concatenate(&sections), Some(reason), true, metrics)
    }

    fn metrics(&self, graph: &TaskGraph, state: &RunState) -> DelegationMetrics {
        let counter = self.orchestrator.counter.as_ref();
        let usage = self.monitor.aggregate();
        let used = graph.len();
        let full_context =
            counter.count(&self.task) as u64 + context_tokens(counter, &self.original);
        let baseline = full_context * used.max(1) as u64 + usage.response_tokens;
        DelegationMetrics::new(
            state.created,
            state.pruned,
            used,
            usage.total_tokens(),
            baseline,
            state.time,
        )
    }

    fn result(
        &self,
        state: RunState,
        content: String,
        error: Option<String>,
        cancelled: bool,
        metrics: DelegationMetrics,
    ) -> OrchestrationResult {
        OrchestrationResult {
            run_id: self.tracker.snapshot().run_id,
            success: !cancelled && state.failures.is_empty() && !state.results.is_empty(),
            content,
            error,
            cancelled,
            delegated: state.delegated,
            subtask_results: state.results,
            failed_subtasks: state.failures,
            metrics: Some(metrics),
            agent_usage: self.monitor.snapshot(),
        }
    }

    /// Save a checkpoint of the run as it stands. Store errors are logged, not raised.
    async fn checkpoint(&self) {
        let Some(sink) = &self.sink else {
            return;
        };
        let checkpoint = Checkpoint::new(
            self.orchestrator.conversation_id,
            self.tracker.snapshot(),
            self.task.clone(),
            self.original.clone(),
        );
        match sink.save(&checkpoint).await {
            Ok(()) => debug!(
                checkpoint_id = %checkpoint.id,
                phase = %checkpoint.phase,
                "Checkpoint saved"
            ),
            Err(e) => warn!(phase = %checkpoint.phase, error = %e, "Failed to save checkpoint"),
        }
    }
}

/// Fallback synthesis: the results one after another.
fn concatenate(sections: &[SynthesisSection]) -> String {
    sections
        .iter()
        .map(|s| format!("## {}\n{}", s.subtask_id, s.content.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}
