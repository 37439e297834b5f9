use crate::capability::Capability;
use crate::context::{AgentContext, ContextUpdate};
use crate::error::ConductorResult;
use crate::tool::ToolCall;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Outcome of a single agent call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub content: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Changes the agent wants merged into the shared context.
    #[serde(default)]
    pub updated_context: Option<ContextUpdate>,
}

impl AgentResponse {
    /// A successful response with the given content.
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: true,
            error: None,
            tool_calls: Vec::new(),
            updated_context: None,
        }
    }

    /// A response the agent itself flagged as failed.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            success: false,
            error: Some(error.into()),
            tool_calls: Vec::new(),
            updated_context: None,
        }
    }

    pub fn with_update(mut self, update: ContextUpdate) -> Self {
        self.updated_context = Some(update);
        self
    }

    pub fn with_tool_call(mut self, call: ToolCall) -> Self {
        self.tool_calls.push(call);
        self
    }
}

/// A reasoning agent the orchestrator can delegate work to.
///
/// Implementations are supplied by the host application; the engine only
/// needs identity, capabilities and a way to process a prompt. Calls may
/// take arbitrarily long and the engine imposes no timeout of its own.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable identifier, unique within a registry.
    fn id(&self) -> &str;

    /// Display name used when decompositions mention the agent.
    fn name(&self) -> &str;

    /// Capability tags this agent can serve.
    fn capabilities(&self) -> &BTreeSet<Capability>;

    /// Process a task prompt with the given (already isolated) context.
    async fn process(&self, task: &str, context: &AgentContext)
        -> ConductorResult<AgentResponse>;

    /// Descriptor handed to the decomposition parser.
    fn descriptor(&self) -> AgentDescriptor {
        AgentDescriptor {
            id: self.id().to_string(),
            name: self.name().to_string(),
            capabilities: self.capabilities().clone(),
        }
    }
}

/// Identity and capabilities of an agent, detached from the agent itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
}

impl AgentDescriptor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            capabilities: capabilities.into_iter().collect(),
        }
    }
}
