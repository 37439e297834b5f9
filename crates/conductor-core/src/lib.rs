//! Core types and error definitions for Conductor.
//!
//! This crate provides the model shared by every Conductor crate: the task
//! graph a decomposition turns into, execution state, the agent trait the
//! host application implements, and the collaborator traits for token
//! counting and summarization.
//!
//! # Main types
//!
//! - [`ConductorError`]: Unified error enum for all Conductor subsystems.
//! - [`Agent`]: An external reasoning agent the orchestrator delegates to.
//! - [`AgentContext`]: Conversation, files, results and preferences passed to agents.
//! - [`Subtask`] / [`TaskGraph`]: A decomposition and its dependency-first order.
//! - [`SubtaskState`]: Per-subtask execution state machine.
//! - [`ProgressSnapshot`]: Denormalised view of a run, also stored in checkpoints.

/// The agent trait and its response type.
pub mod agent;
/// Capability tags shared by agents and subtasks.
pub mod capability;
/// Shared and isolated agent context.
pub mod context;
/// Error types.
pub mod error;
/// Subtasks and task graphs.
pub mod graph;
/// Conversation messages.
pub mod message;
/// Execution state, phases and metrics.
pub mod state;
/// Summarizer collaborator.
pub mod summarize;
/// Token counting collaborator.
pub mod tokens;
/// Tool call records.
pub mod tool;

pub use agent::{Agent, AgentDescriptor, AgentResponse};
pub use capability::Capability;
pub use context::{AgentContext, ContextUpdate, FileReference};
pub use error::{ConductorError, ConductorResult};
pub use graph::{dependency_first_order, Subtask, TaskGraph};
pub use message::{Message, Role};
pub use state::{
    DelegationMetrics, Phase, ProgressSnapshot, RetryAttempt, SubtaskResult, SubtaskState,
    TimeBreakdown,
};
pub use summarize::{ExtractiveSummarizer, Summarizer, SummaryLevel};
pub use tokens::{HeuristicTokenCounter, TokenCounter};
pub use tool::ToolCall;
