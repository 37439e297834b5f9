use thiserror::Error;

/// A convenience `Result` alias using [`ConductorError`].
pub type ConductorResult<T> = Result<T, ConductorError>;

/// Top-level error type for the Conductor crates.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Error, Debug)]
pub enum ConductorError {
    /// An agent call failed or returned an unusable response.
    #[error("Agent error: {0}")]
    Agent(String),

    /// A decomposition could not be turned into a task graph.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid or unreadable configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// A checkpoint could not be stored, loaded or resumed.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// An error raised by the orchestration engine itself.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// A subtask or phase was asked to move to a state it cannot reach.
    #[error("Invalid transition for {subject}: {from} -> {to}")]
    InvalidTransition {
        /// Subtask id or `"run"` for phase transitions.
        subject: String,
        /// State being left.
        from: String,
        /// Requested state.
        to: String,
    },

    /// The run was cancelled through its cancellation token.
    #[error("Cancelled: {}", reason.as_deref().unwrap_or("no reason given"))]
    Cancelled {
        /// Optional human-readable reason supplied by the canceller.
        reason: Option<String>,
    },

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConductorError {
    /// Whether this error represents a cancellation rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ConductorError::Cancelled { .. })
    }
}
