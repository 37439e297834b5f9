use async_trait::async_trait;
use conductor_core::{Agent, AgentContext, AgentResponse, Capability, ConductorResult};
use std::collections::BTreeSet;
use std::fmt::Write;
use std::time::Duration;
use tracing::debug;

const CONTENT_MARKER: &str = " handled: ";

/// Offline stand-in for a real agent, used by `conductor simulate`.
///
/// Analysis prompts are answered with a numbered list built from the task's
/// clauses, synthesis prompts with the collected subtask answers, and every
/// other prompt is echoed back after an optional delay.
pub struct EchoAgent {
    id: String,
    name: String,
    capabilities: BTreeSet<Capability>,
    delay: Duration,
}

impl EchoAgent {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        capabilities: BTreeSet<Capability>,
        delay: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            capabilities,
            delay,
        }
    }
}

/// Split a task into clauses on sentence ends and sequencing words.
fn clauses(task: &str) -> Vec<String> {
    let mut normalized = task.replace('\n', ". ");
    for separator in [" and then ", " then ", "; ", ", and "] {
        normalized = normalized.replace(separator, ". ");
    }
    normalized
        .split(". ")
        .map(|c| c.trim().trim_end_matches('.').trim())
        .filter(|c| !c.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn analysis(prompt: &str) -> String {
    let task = prompt
        .split_once("Task:\n")
        .and_then(|(_, rest)| rest.split_once("\n\nReply with JSON only").map(|(t, _)| t))
        .unwrap_or(prompt);
    let mut plan = String::from("Here are the subtasks:\n");
    for (i, clause) in clauses(task).iter().enumerate() {
        let _ = writeln!(plan, "{}. {clause}", i + 1);
    }
    plan
}

fn synthesis(prompt: &str) -> String {
    let answers: Vec<&str> = prompt
        .lines()
        .filter(|line| line.contains(CONTENT_MARKER))
        .collect();
    format!("Combined result:\n{}", answers.join("\n"))
}

#[async_trait]
impl Agent for EchoAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &BTreeSet<Capability> {
        &self.capabilities
    }

    async fn process(&self, task: &str, context: &AgentContext) -> ConductorResult<AgentResponse> {
        if task.contains("Reply with JSON only") {
            return Ok(AgentResponse::success(analysis(task)));
        }
        if task.starts_with("Combine the results") {
            return Ok(AgentResponse::success(synthesis(task)));
        }
        debug!(
            agent_id = %self.id,
            history = context.conversation_history.len(),
            tool_results = context.tool_results.len(),
            "Echo agent processing"
        );
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(AgentResponse::success(format!(
            "{}{CONTENT_MARKER}{task}",
            self.name
        )))
    }
}
