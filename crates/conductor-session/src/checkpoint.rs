use chrono::{DateTime, Utc};
use conductor_core::{AgentContext, Phase, ProgressSnapshot};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable snapshot of an orchestration run, taken at a phase boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    /// Conversation the run belongs to.
    pub conversation_id: Uuid,
    /// The orchestration run (one per user message).
    pub run_id: Uuid,
    pub phase: Phase,
    pub snapshot: ProgressSnapshot,
    /// The task exactly as it was handed to the orchestrator.
    pub task: String,
    /// The shared context as it was when the run started.
    pub context: AgentContext,
    /// False once the phase is terminal.
    pub resumable: bool,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(
        conversation_id: Uuid,
        snapshot: ProgressSnapshot,
        task: impl Into<String>,
        context: AgentContext,
    ) -> Self {
        let phase = snapshot.phase;
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            run_id: snapshot.run_id,
            phase,
            snapshot,
            task: task.into(),
            context,
            resumable: !phase.is_terminal(),
            created_at: Utc::now(),
        }
    }
}
