//! Task-graph orchestration across specialist agents.
//!
//! Turns a coordinator's free-text decomposition into a task graph, prunes
//! it, schedules it in dependency-respecting waves with bounded concurrency,
//! gives every subtask an isolated, budgeted context, retries failures per
//! policy, and synthesises the results, with checkpoints and cooperative
//! cancellation along the way.
//!
//! # Main types
//!
//! - [`Orchestrator`]: Runs the decide, analyse, decompose, execute and synthesise pipeline.
//! - [`DecompositionParser`]: Prioritised chain of extractors producing a [`TaskGraph`](conductor_core::TaskGraph).
//! - [`Pruner`]: Deduplicates, merges and trims a task graph.
//! - [`ContextAssembler`] / [`BudgetGuard`]: Build and fit per-subtask contexts.
//! - [`ProgressTracker`]: Phase state machine and event source for observers.
//! - [`CancelToken`]: Cooperative cancellation with a reason.

/// Isolated per-subtask context construction.
pub mod assembler;
/// Token budget enforcement for contexts.
pub mod budget;
/// Cooperative cancellation.
pub mod cancel;
/// Orchestrator configuration (TOML).
pub mod config;
/// Whether a task is worth delegating.
pub mod decision;
/// The orchestration pipeline.
pub mod engine;
/// Per-agent token and call accounting.
pub mod monitor;
/// Decomposition text to task graph.
pub mod parser;
/// Run phases, progress events and observers.
pub mod progress;
/// Prompts sent to the coordinator.
pub mod prompts;
/// Task graph deduplication and trimming.
pub mod pruner;
/// Agent registry and resolution.
pub mod registry;
/// Retry policies.
pub mod retry;
/// Execution wave computation.
pub mod waves;

pub use assembler::ContextAssembler;
pub use budget::BudgetGuard;
pub use cancel::CancelToken;
pub use config::OrchestratorConfig;
pub use decision::{decide, DelegationDecision};
pub use engine::{OrchestrationResult, Orchestrator, DIRECT_SUBTASK_ID};
pub use monitor::{AgentMonitor, AgentUsage};
pub use parser::{DecompositionParser, Extractor, ParsedDecomposition};
pub use progress::{ChannelObserver, ProgressEvent, ProgressObserver, ProgressTracker, TracingObserver};
pub use pruner::{PruneOutcome, Pruner};
pub use registry::{AgentRegistry, MatchKind};
pub use retry::{RetryPolicies, RetryPolicy};
pub use waves::compute_waves;
