use serde::{Deserialize, Serialize};

/// A tool invocation reported by an agent alongside its answer.
///
/// The engine never executes these; it only carries them through to the
/// subtask result so observers can inspect what the agent did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier assigned by the agent for this tool call.
    pub id: String,
    /// Name of the tool that was invoked.
    pub name: String,
    /// JSON arguments passed to the tool.
    pub arguments: serde_json::Value,
}
