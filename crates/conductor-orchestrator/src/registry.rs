use conductor_core::{Agent, AgentDescriptor, Capability, Subtask};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// How an agent was chosen for a subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// The subtask named the agent.
    Explicit,
    /// The agent has every capability the subtask requires.
    CapabilitySuperset,
    /// The agent has at least one required capability.
    CapabilityOverlap,
    /// Nothing matched; the coordinator runs it.
    Coordinator,
}

/// Registry of available agents keyed by id, in registration order.
#[derive(Default)]
pub struct AgentRegistry {
    agents: Vec<Arc<dyn Agent>>,
    coordinator_id: Option<String>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent. Re-registering an id replaces it in place.
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        info!(agent_id = %agent.id(), name = %agent.name(), "Registered agent");
        match self.agents.iter().position(|a| a.id() == agent.id()) {
            Some(idx) => self.agents[idx] = agent,
            None => self.agents.push(agent),
        }
    }

    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.register(agent);
        self
    }

    /// Use the given agent id for analysis, synthesis and fallback execution.
    pub fn set_coordinator(&mut self, id: impl Into<String>) {
        self.coordinator_id = Some(id.into());
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Agent>> {
        self.agents.iter().find(|a| a.id() == id)
    }

    /// Case-insensitive lookup by display name or id.
    pub fn by_name(&self, name: &str) -> Option<&Arc<dyn Agent>> {
        let wanted = name.trim();
        self.agents
            .iter()
            .find(|a| a.name().eq_ignore_ascii_case(wanted) || a.id().eq_ignore_ascii_case(wanted))
    }

    pub fn descriptors(&self) -> Vec<AgentDescriptor> {
        self.agents.iter().map(|a| a.descriptor()).collect()
    }

    pub fn agents(&self) -> &[Arc<dyn Agent>] {
        &self.agents
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// The configured coordinator, else the first general reasoner, else the first agent.
    pub fn coordinator(&self) -> Option<&Arc<dyn Agent>> {
        self.coordinator_id
            .as_deref()
            .and_then(|id| self.get(id))
            .or_else(|| {
                self.agents
                    .iter()
                    .find(|a| a.capabilities().contains(&Capability::GeneralReasoning))
            })
            .or_else(|| self.agents.first())
    }

    /// Choose the agent that runs `subtask`.
    ///
    /// Explicit name match, then first capability superset, then first
    /// capability overlap, then the coordinator. Returns `None` only for an
    /// empty registry.
    pub fn resolve(&self, subtask: &Subtask) -> Option<(Arc<dyn Agent>, MatchKind)> {
        if let Some(agent) = subtask.agent.as_deref().and_then(|name| self.by_name(name)) {
            return Some((Arc::clone(agent), MatchKind::Explicit));
        }
        let resolved = self.match_capabilities(&subtask.capabilities);
        if let Some((_, kind)) = &resolved {
            debug!(subtask_id = %subtask.id, kind = ?kind, "Resolved agent by capability");
        }
        resolved
    }

    /// Capability-only resolution, used when no agent name is known.
    pub fn match_capabilities(
        &self,
        required: &BTreeSet<Capability>,
    ) -> Option<(Arc<dyn Agent>, MatchKind)> {
        if !required.is_empty() {
            if let Some(agent) = self
                .agents
                .iter()
                .find(|a| required.is_subset(a.capabilities()))
            {
                return Some((Arc::clone(agent), MatchKind::CapabilitySuperset));
            }
            if let Some(agent) = self
                .agents
                .iter()
                .find(|a| !required.is_disjoint(a.capabilities()))
            {
                return Some((Arc::clone(agent), MatchKind::CapabilityOverlap));
            }
        }
        self.coordinator()
            .map(|agent| (Arc::clone(agent), MatchKind::Coordinator))
    }
}
