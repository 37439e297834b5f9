use crate::context::ContextUpdate;
use crate::graph::TaskGraph;
use crate::tool::ToolCall;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Phase of an orchestration run. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Decision,
    Analysis,
    Decomposition,
    Execution,
    Synthesis,
    Complete,
    Failed,
}

impl Phase {
    fn rank(self) -> u8 {
        match self {
            Phase::Decision => 0,
            Phase::Analysis => 1,
            Phase::Decomposition => 2,
            Phase::Execution => 3,
            Phase::Synthesis => 4,
            Phase::Complete | Phase::Failed => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Complete | Phase::Failed)
    }

    /// Whether a run in `self` may move to `next`.
    ///
    /// Skipping forward is allowed (direct execution skips analysis and
    /// decomposition); going back or leaving a terminal phase is not.
    pub fn can_advance_to(self, next: Phase) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Decision => "decision",
            Phase::Analysis => "analysis",
            Phase::Decomposition => "decomposition",
            Phase::Execution => "execution",
            Phase::Synthesis => "synthesis",
            Phase::Complete => "complete",
            Phase::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Bookkeeping for one attempt at running a subtask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// Zero-based attempt number.
    pub number: u32,
    pub timestamp: DateTime<Utc>,
    /// Delay waited before this attempt started.
    pub delay_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
}

/// What a subtask produced once it finished successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskResult {
    pub subtask_id: String,
    pub agent_id: String,
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub context_update: Option<ContextUpdate>,
    #[serde(default)]
    pub attempts: Vec<RetryAttempt>,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub duration_ms: u64,
}

/// Execution state of a single subtask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubtaskState {
    Pending,
    InProgress {
        agent_id: String,
        started_at: DateTime<Utc>,
    },
    Completed {
        result: SubtaskResult,
    },
    Failed {
        error: String,
        attempts: Vec<RetryAttempt>,
    },
}

impl SubtaskState {
    pub fn name(&self) -> &'static str {
        match self {
            SubtaskState::Pending => "pending",
            SubtaskState::InProgress { .. } => "in_progress",
            SubtaskState::Completed { .. } => "completed",
            SubtaskState::Failed { .. } => "failed",
        }
    }

    /// Legal moves: pending → in-progress → completed | failed, and
    /// failed → in-progress when a retry is permitted.
    pub fn can_transition_to(&self, next: &SubtaskState) -> bool {
        matches!(
            (self, next),
            (SubtaskState::Pending, SubtaskState::InProgress { .. })
                | (SubtaskState::InProgress { .. }, SubtaskState::Completed { .. })
                | (SubtaskState::InProgress { .. }, SubtaskState::Failed { .. })
                | (SubtaskState::Failed { .. }, SubtaskState::InProgress { .. })
        )
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, SubtaskState::Completed { .. })
    }
}

/// Time spent in each part of a run, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBreakdown {
    pub analysis_ms: u64,
    pub synthesis_ms: u64,
    pub specialized_ms: u64,
}

/// Efficiency figures computed once per run, after execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DelegationMetrics {
    pub subtasks_created: usize,
    pub subtasks_pruned: usize,
    pub subtasks_used: usize,
    pub total_tokens: u64,
    /// Tokens a single agent would have spent receiving the full context for every subtask.
    pub baseline_tokens: u64,
    pub savings_percent: f64,
    pub time: TimeBreakdown,
}

impl DelegationMetrics {
    pub fn new(
        subtasks_created: usize,
        subtasks_pruned: usize,
        subtasks_used: usize,
        total_tokens: u64,
        baseline_tokens: u64,
        time: TimeBreakdown,
    ) -> Self {
        let savings_percent = if baseline_tokens == 0 || total_tokens >= baseline_tokens {
            0.0
        } else {
            (baseline_tokens - total_tokens) as f64 / baseline_tokens as f64 * 100.0
        };
        Self {
            subtasks_created,
            subtasks_pruned,
            subtasks_used,
            total_tokens,
            baseline_tokens,
            savings_percent,
            time,
        }
    }
}

/// Denormalised "where are we now" view of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub run_id: Uuid,
    pub phase: Phase,
    #[serde(default)]
    pub delegated: Option<bool>,
    #[serde(default)]
    pub graph: Option<TaskGraph>,
    #[serde(default)]
    pub subtask_states: BTreeMap<String, SubtaskState>,
    #[serde(default)]
    pub parallel_groups: Vec<Vec<String>>,
    /// Removal rationale keyed by the original subtask id.
    #[serde(default)]
    pub pruned: BTreeMap<String, String>,
    #[serde(default)]
    pub metrics: Option<DelegationMetrics>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressSnapshot {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            phase: Phase::Decision,
            delegated: None,
            graph: None,
            subtask_states: BTreeMap::new(),
            parallel_groups: Vec::new(),
            pruned: BTreeMap::new(),
            metrics: None,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// Results of every completed subtask, in graph order when a graph is known.
    pub fn completed_results(&self) -> Vec<&SubtaskResult> {
        let order: Vec<String> = match &self.graph {
            Some(graph) => graph.execution_order().to_vec(),
            None => self.subtask_states.keys().cloned().collect(),
        };
        order
            .iter()
            .filter_map(|id| match self.subtask_states.get(id) {
                Some(SubtaskState::Completed { result }) => Some(result),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::graph::Subtask;

    fn result(id: &str) -> SubtaskResult {
        SubtaskResult {
            subtask_id: id.into(),
            agent_id: "agent".into(),
            content: format!("result of {id}"),
            tool_calls: Vec::new(),
            context_update: None,
            attempts: Vec::new(),
            tokens_used: 10,
            duration_ms: 5,
        }
    }

    #[test]
    fn test_phase_moves_forward_only() {
        assert!(Phase::Decision.can_advance_to(Phase::Analysis));
        assert!(Phase::Decision.can_advance_to(Phase::Execution));
        assert!(Phase::Execution.can_advance_to(Phase::Failed));
        assert!(!Phase::Synthesis.can_advance_to(Phase::Execution));
        assert!(!Phase::Complete.can_advance_to(Phase::Failed));
        assert!(!Phase::Failed.can_advance_to(Phase::Complete));
    }

    #[test]
    fn test_subtask_state_transitions() {
        let in_progress = SubtaskState::InProgress {
            agent_id: "a".into(),
            started_at: Utc::now(),
        };
        let failed = SubtaskState::Failed {
            error: "boom".into(),
            attempts: Vec::new(),
        };
        let completed = SubtaskState::Completed { result: result("1") };

        assert!(SubtaskState::Pending.can_transition_to(&in_progress));
        assert!(in_progress.can_transition_to(&completed));
        assert!(in_progress.can_transition_to(&failed));
        assert!(failed.can_transition_to(&in_progress));
        assert!(!SubtaskState::Pending.can_transition_to(&completed));
        assert!(!completed.can_transition_to(&in_progress));
    }

    #[test]
    fn test_subtask_state_serialization() {
        let state = SubtaskState::Failed {
            error: "timeout".into(),
            attempts: vec![RetryAttempt {
                number: 0,
                timestamp: Utc::now(),
                delay_ms: 0,
                error: Some("timeout".into()),
            }],
        };
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"state\":\"failed\""));
        let parsed: SubtaskState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }

    #[test]
    fn test_metrics_savings() {
        let metrics = DelegationMetrics::new(4, 1, 3, 600, 2000, TimeBreakdown::default());
        assert!((metrics.savings_percent - 70.0).abs() < f64::EPSILON);

        let worse = DelegationMetrics::new(1, 0, 1, 3000, 2000, TimeBreakdown::default());
        assert_eq!(worse.savings_percent, 0.0);

        let empty = DelegationMetrics::new(0, 0, 0, 0, 0, TimeBreakdown::default());
        assert_eq!(empty.savings_percent, 0.0);
    }

    #[test]
    fn test_completed_results_follow_graph_order() {
        let mut snapshot = ProgressSnapshot::new(Uuid::new_v4());
        snapshot.graph = Some(TaskGraph::new(vec![
            Subtask::new("b", "Second").with_dependencies(["a"]),
            Subtask::new("a", "First"),
        ]));
        snapshot
            .subtask_states
            .insert("b".into(), SubtaskState::Completed { result: result("b") });
        snapshot
            .subtask_states
            .insert("a".into(), SubtaskState::Completed { result: result("a") });

        let ids: Vec<&str> = snapshot
            .completed_results()
            .iter()
            .map(|r| r.subtask_id.as_str())
            .collect();
        assert_eq!(ids, ["a", "b"]);
    }
}
