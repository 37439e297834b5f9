use chrono::Utc;
use conductor_core::{
    ConductorError, ConductorResult, DelegationMetrics, Phase, ProgressSnapshot, RetryAttempt,
    SubtaskResult, SubtaskState, TaskGraph,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// A discrete, ordered event emitted while a run progresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    DelegationDecided {
        delegate: bool,
        reason: String,
    },
    PhaseChanged {
        from: Phase,
        to: Phase,
    },
    AnalysisStarted {
        agent_id: String,
    },
    AnalysisCompleted {
        agent_id: String,
        duration_ms: u64,
    },
    DecompositionParsed {
        subtask_count: usize,
        /// Extraction strategy that produced the graph; `None` for the direct fallback.
        strategy: Option<String>,
    },
    SubtaskPruned {
        subtask_id: String,
        reason: String,
    },
    WaveStarted {
        index: usize,
        subtask_ids: Vec<String>,
        concurrent: bool,
    },
    SubtaskStarted {
        subtask_id: String,
        agent_id: String,
    },
    SubtaskRetrying {
        subtask_id: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    SubtaskCompleted {
        subtask_id: String,
        agent_id: String,
        duration_ms: u64,
    },
    SubtaskFailed {
        subtask_id: String,
        error: String,
    },
    SynthesisStarted,
    SynthesisCompleted {
        duration_ms: u64,
    },
    RunCompleted {
        success: bool,
    },
    RunFailed {
        reason: String,
        cancelled: bool,
    },
}

/// Passive consumer of progress events.
///
/// Called synchronously on the orchestrator's task after the state change is
/// applied and the tracker unlocked. Implementations may read the tracker but
/// must return quickly; hand events to a channel for anything slow.
pub trait ProgressObserver: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

/// Logs every event through `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::SubtaskFailed { subtask_id, error } => {
                warn!(subtask_id = %subtask_id, error = %error, "Subtask failed");
            }
            ProgressEvent::RunFailed { reason, cancelled } => {
                warn!(reason = %reason, cancelled, "Run failed");
            }
            other => info!(event = ?other, "progress"),
        }
    }
}

/// Forwards events to an unbounded channel.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressObserver for ChannelObserver {
    fn on_event(&self, event: &ProgressEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.tx.send(event.clone());
    }
}

struct Inner {
    snapshot: ProgressSnapshot,
    observers: Vec<Arc<dyn ProgressObserver>>,
}

/// Phase state machine plus the denormalised snapshot of a run.
///
/// State changes happen under a short lock; their events are delivered after
/// it is released, so an observer can call [`ProgressTracker::snapshot`].
pub struct ProgressTracker {
    inner: Mutex<Inner>,
}

impl ProgressTracker {
    pub fn new(run_id: Uuid) -> Self {
        Self::from_snapshot(ProgressSnapshot::new(run_id))
    }

    /// Start from a previously captured snapshot (used when resuming).
    pub fn from_snapshot(snapshot: ProgressSnapshot) -> Self {
        Self {
            inner: Mutex::new(Inner {
                snapshot,
                observers: Vec::new(),
            }),
        }
    }

    pub fn subscribe(&self, observer: Arc<dyn ProgressObserver>) {
        self.inner.lock().observers.push(observer);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.inner.lock().snapshot.clone()
    }

    pub fn phase(&self) -> Phase {
        self.inner.lock().snapshot.phase
    }

    pub fn subtask_state(&self, id: &str) -> Option<SubtaskState> {
        self.inner.lock().snapshot.subtask_states.get(id).cloned()
    }

    /// Emit an event that carries no state change.
    pub fn emit(&self, event: ProgressEvent) {
        let observers = self.inner.lock().observers.clone();
        notify(&observers, &[event]);
    }

    /// Move the run to `next`. Backward moves are rejected.
    pub fn advance(&self, next: Phase) -> ConductorResult<()> {
        let (observers, event) = {
            let mut inner = self.inner.lock();
            let from = inner.snapshot.phase;
            if from == next {
                return Ok(());
            }
            if !from.can_advance_to(next) {
                return Err(ConductorError::InvalidTransition {
                    subject: "run".to_string(),
                    from: from.to_string(),
                    to: next.to_string(),
                });
            }
            inner.snapshot.phase = next;
            touch(&mut inner.snapshot);
            (inner.observers.clone(), ProgressEvent::PhaseChanged { from, to: next })
        };
        notify(&observers, &[event]);
        Ok(())
    }

    pub fn record_decision(&self, delegate: bool, reason: impl Into<String>) {
        let observers = {
            let mut inner = self.inner.lock();
            inner.snapshot.delegated = Some(delegate);
            touch(&mut inner.snapshot);
            inner.observers.clone()
        };
        let event = ProgressEvent::DelegationDecided {
            delegate,
            reason: reason.into(),
        };
        notify(&observers, &[event]);
    }

    /// Install the graph to execute; every subtask starts out pending.
    pub fn set_graph(&self, graph: &TaskGraph) {
        let mut inner = self.inner.lock();
        inner.snapshot.subtask_states = graph
            .subtasks()
            .iter()
            .map(|s| (s.id.clone(), SubtaskState::Pending))
            .collect();
        inner.snapshot.graph = Some(graph.clone());
        touch(&mut inner.snapshot);
    }

    pub fn record_pruned(&self, subtask_id: &str, reason: &str) {
        let observers = {
            let mut inner = self.inner.lock();
            inner
                .snapshot
                .pruned
                .insert(subtask_id.to_string(), reason.to_string());
            touch(&mut inner.snapshot);
            inner.observers.clone()
        };
        let event = ProgressEvent::SubtaskPruned {
            subtask_id: subtask_id.to_string(),
            reason: reason.to_string(),
        };
        notify(&observers, &[event]);
    }

    pub fn set_parallel_groups(&self, groups: Vec<Vec<String>>) {
        let mut inner = self.inner.lock();
        inner.snapshot.parallel_groups = groups;
        touch(&mut inner.snapshot);
    }

    /// Mark a subtask in progress. Attempt 0 emits `SubtaskStarted`.
    pub fn start_subtask(&self, subtask_id: &str, agent_id: &str, attempt: u32) -> ConductorResult<()> {
        let next = SubtaskState::InProgress {
            agent_id: agent_id.to_string(),
            started_at: Utc::now(),
        };
        let observers = {
            let mut inner = self.inner.lock();
            transition(&mut inner.snapshot, subtask_id, next)?;
            inner.observers.clone()
        };
        if attempt == 0 {
            let event = ProgressEvent::SubtaskStarted {
                subtask_id: subtask_id.to_string(),
                agent_id: agent_id.to_string(),
            };
            notify(&observers, &[event]);
        }
        Ok(())
    }

    pub fn complete_subtask(&self, result: SubtaskResult) -> ConductorResult<()> {
        let event = ProgressEvent::SubtaskCompleted {
            subtask_id: result.subtask_id.clone(),
            agent_id: result.agent_id.clone(),
            duration_ms: result.duration_ms,
        };
        let id = result.subtask_id.clone();
        let observers = {
            let mut inner = self.inner.lock();
            transition(&mut inner.snapshot, &id, SubtaskState::Completed { result })?;
            inner.observers.clone()
        };
        notify(&observers, &[event]);
        Ok(())
    }

    /// Record a failed attempt. With `retry_delay_ms` set the subtask will
    /// be retried and `SubtaskRetrying` is emitted; otherwise the failure is
    /// terminal and `SubtaskFailed` is emitted.
    pub fn fail_subtask(
        &self,
        subtask_id: &str,
        error: &str,
        attempts: Vec<RetryAttempt>,
        retry_delay_ms: Option<u64>,
    ) -> ConductorResult<()> {
        let next_attempt = attempts.len() as u32;
        let next = SubtaskState::Failed {
            error: error.to_string(),
            attempts,
        };
        let observers = {
            let mut inner = self.inner.lock();
            transition(&mut inner.snapshot, subtask_id, next)?;
            if retry_delay_ms.is_none() {
                inner.snapshot.last_error = Some(error.to_string());
            }
            inner.observers.clone()
        };
        let event = match retry_delay_ms {
            Some(delay_ms) => ProgressEvent::SubtaskRetrying {
                subtask_id: subtask_id.to_string(),
                attempt: next_attempt,
                delay_ms,
                error: error.to_string(),
            },
            None => ProgressEvent::SubtaskFailed {
                subtask_id: subtask_id.to_string(),
                error: error.to_string(),
            },
        };
        notify(&observers, &[event]);
        Ok(())
    }

    /// Put a subtask back to pending, discarding any earlier state.
    pub fn reset_subtask(&self, subtask_id: &str) {
        let mut inner = self.inner.lock();
        inner
            .snapshot
            .subtask_states
            .insert(subtask_id.to_string(), SubtaskState::Pending);
        touch(&mut inner.snapshot);
    }

    pub fn set_metrics(&self, metrics: DelegationMetrics) {
        let mut inner = self.inner.lock();
        inner.snapshot.metrics = Some(metrics);
        touch(&mut inner.snapshot);
    }

    pub fn set_last_error(&self, error: impl Into<String>) {
        let mut inner = self.inner.lock();
        inner.snapshot.last_error = Some(error.into());
        touch(&mut inner.snapshot);
    }

    /// Terminal success (or partial success) of the run.
    pub fn finish(&self, success: bool) -> ConductorResult<()> {
        self.advance(Phase::Complete)?;
        self.emit(ProgressEvent::RunCompleted { success });
        Ok(())
    }

    /// Terminal failure of the run. A no-op when the run already ended.
    pub fn fail(&self, reason: &str, cancelled: bool) {
        let (observers, from) = {
            let mut inner = self.inner.lock();
            let from = inner.snapshot.phase;
            if from.is_terminal() {
                return;
            }
            inner.snapshot.phase = Phase::Failed;
            inner.snapshot.last_error = Some(reason.to_string());
            touch(&mut inner.snapshot);
            (inner.observers.clone(), from)
        };
        notify(
            &observers,
            &[
                ProgressEvent::PhaseChanged {
                    from,
                    to: Phase::Failed,
                },
                ProgressEvent::RunFailed {
                    reason: reason.to_string(),
                    cancelled,
                },
            ],
        );
    }
}

/// Deliver events outside the tracker lock, so observers may read the tracker.
fn notify(observers: &[Arc<dyn ProgressObserver>], events: &[ProgressEvent]) {
    for event in events {
        for observer in observers {
            observer.on_event(event);
        }
    }
}

fn touch(snapshot: &mut ProgressSnapshot) {
    snapshot.updated_at = Utc::now();
}

fn transition(
    snapshot: &mut ProgressSnapshot,
    subtask_id: &str,
    next: SubtaskState,
) -> ConductorResult<()> {
    let current = snapshot
        .subtask_states
        .get(subtask_id)
        .ok_or_else(|| ConductorError::Orchestrator(format!("Unknown subtask: {subtask_id}")))?;
    if !current.can_transition_to(&next) {
        return Err(ConductorError::InvalidTransition {
            subject: subtask_id.to_string(),
            from: current.name().to_string(),
            to: next.name().to_string(),
        });
    }
    snapshot.subtask_states.insert(subtask_id.to_string(), next);
    touch(snapshot);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use conductor_core::Subtask;

    fn tracker_with_graph() -> (ProgressTracker, mpsc::UnboundedReceiver<ProgressEvent>) {
        let tracker = ProgressTracker::new(Uuid::new_v4());
        let (observer, rx) = ChannelObserver::new();
        tracker.subscribe(Arc::new(observer));
        tracker.set_graph(&TaskGraph::new(vec![
            Subtask::new("a", "Search for flights"),
            Subtask::new("b", "Book the cheapest hotel").with_dependencies(["a"]),
        ]));
        (tracker, rx)
    }

    fn result(id: &str) -> SubtaskResult {
        SubtaskResult {
            subtask_id: id.into(),
            agent_id: "agent-1".into(),
            content: "ok".into(),
            tool_calls: Vec::new(),
            context_update: None,
            attempts: Vec::new(),
            tokens_used: 0,
            duration_ms: 3,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_phases_advance_forward_only() {
        let tracker = ProgressTracker::new(Uuid::new_v4());
        tracker.advance(Phase::Analysis).unwrap();
        tracker.advance(Phase::Execution).unwrap();
        let err = tracker.advance(Phase::Analysis).unwrap_err();
        assert!(matches!(err, ConductorError::InvalidTransition { .. }));
        assert_eq!(tracker.phase(), Phase::Execution);
    }

    #[test]
    fn test_set_graph_marks_all_pending() {
        let (tracker, _rx) = tracker_with_graph();
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.subtask_states.len(), 2);
        assert!(snapshot
            .subtask_states
            .values()
            .all(|s| *s == SubtaskState::Pending));
    }

    #[test]
    fn test_subtask_lifecycle_events_in_order() {
        let (tracker, mut rx) = tracker_with_graph();
        tracker.start_subtask("a", "agent-1", 0).unwrap();
        tracker.complete_subtask(result("a")).unwrap();

        let events = drain(&mut rx);
        assert!(matches!(events[0], ProgressEvent::SubtaskStarted { .. }));
        assert!(matches!(events[1], ProgressEvent::SubtaskCompleted { .. }));
        assert!(tracker.subtask_state("a").unwrap().is_completed());
    }

    #[test]
    fn test_illegal_subtask_transition_rejected() {
        let (tracker, _rx) = tracker_with_graph();
        let err = tracker.complete_subtask(result("a")).unwrap_err();
        assert!(matches!(err, ConductorError::InvalidTransition { .. }));
        assert!(tracker.start_subtask("missing", "agent-1", 0).is_err());
    }

    #[test]
    fn test_retry_then_terminal_failure() {
        let (tracker, mut rx) = tracker_with_graph();
        tracker.start_subtask("a", "agent-1", 0).unwrap();
        tracker.fail_subtask("a", "503", Vec::new(), Some(100)).unwrap();
        tracker.start_subtask("a", "agent-1", 1).unwrap();
        tracker.fail_subtask("a", "503 again", Vec::new(), None).unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(events[1], ProgressEvent::SubtaskRetrying { .. }));
        assert!(matches!(events[2], ProgressEvent::SubtaskFailed { .. }));
        assert_eq!(tracker.snapshot().last_error.as_deref(), Some("503 again"));
    }

    #[test]
    fn test_fail_is_terminal_and_idempotent() {
        let (tracker, mut rx) = tracker_with_graph();
        tracker.advance(Phase::Execution).unwrap();
        tracker.fail("cancelled by user", true);
        tracker.fail("again", false);

        assert_eq!(tracker.phase(), Phase::Failed);
        let events = drain(&mut rx);
        let failures = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::RunFailed { .. }))
            .count();
        assert_eq!(failures, 1);
        assert!(tracker.finish(true).is_err());
    }

    struct SnapshotReader {
        tracker: Arc<ProgressTracker>,
        seen: Mutex<Vec<Phase>>,
    }

    impl ProgressObserver for SnapshotReader {
        fn on_event(&self, _event: &ProgressEvent) {
            let phase = self.tracker.snapshot().phase;
            self.seen.lock().push(phase);
        }
    }

    #[test]
    fn test_observer_can_read_tracker_from_callback() {
        let tracker = Arc::new(ProgressTracker::new(Uuid::new_v4()));
        let reader = Arc::new(SnapshotReader {
            tracker: Arc::clone(&tracker),
            seen: Mutex::new(Vec::new()),
        });
        tracker.subscribe(reader.clone());
        tracker.set_graph(&TaskGraph::new(vec![Subtask::new("a", "Search for flights")]));

        tracker.advance(Phase::Analysis).unwrap();
        tracker.start_subtask("a", "agent-1", 0).unwrap();
        tracker.fail("stopped", true);

        assert_eq!(
            *reader.seen.lock(),
            vec![Phase::Analysis, Phase::Analysis, Phase::Failed, Phase::Failed]
        );
    }

    #[test]
    fn test_event_serialization_tag() {
        let event = ProgressEvent::SubtaskPruned {
            subtask_id: "x".into(),
            reason: "duplicate".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "subtask_pruned");
    }
}
