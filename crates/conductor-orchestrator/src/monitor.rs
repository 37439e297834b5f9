use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Usage accumulated for one agent during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentUsage {
    pub calls: u32,
    pub errors: u32,
    pub prompt_tokens: u64,
    pub response_tokens: u64,
    pub duration_ms: u64,
}

impl AgentUsage {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.response_tokens
    }
}

/// Tracks token and call usage per agent id.
///
/// Concurrent subtasks only ever add to the counters, so a single short
/// lock per update is all the coordination needed.
#[derive(Default)]
pub struct AgentMonitor {
    usage: Mutex<BTreeMap<String, AgentUsage>>,
}

impl AgentMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one agent call.
    pub fn record_call(
        &self,
        agent_id: &str,
        prompt_tokens: u64,
        response_tokens: u64,
        duration_ms: u64,
    ) {
        let mut usage = self.usage.lock();
        let entry = usage.entry(agent_id.to_string()).or_default();
        entry.calls += 1;
        entry.prompt_tokens += prompt_tokens;
        entry.response_tokens += response_tokens;
        entry.duration_ms += duration_ms;
    }

    pub fn record_error(&self, agent_id: &str) {
        let mut usage = self.usage.lock();
        usage.entry(agent_id.to_string()).or_default().errors += 1;
    }

    /// Usage per agent id, in id order.
    pub fn snapshot(&self) -> BTreeMap<String, AgentUsage> {
        self.usage.lock().clone()
    }

    /// Aggregate usage across all agents.
    pub fn aggregate(&self) -> AgentUsage {
        let usage = self.usage.lock();
        let mut total = AgentUsage::default();
        for entry in usage.values() {
            total.calls += entry.calls;
            total.errors += entry.errors;
            total.prompt_tokens += entry.prompt_tokens;
            total.response_tokens += entry.response_tokens;
            total.duration_ms += entry.duration_ms;
        }
        total
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_record_calls() {
        let monitor = AgentMonitor::new();
        monitor.record_call("coder", 300, 200, 1000);
        monitor.record_call("coder", 100, 50, 500);

        let usage = monitor.snapshot();
        let coder = &usage["coder"];
        assert_eq!(coder.calls, 2);
        assert_eq!(coder.total_tokens(), 650);
        assert_eq!(coder.duration_ms, 1500);
        assert!(!usage.contains_key("tester"));
    }

    #[test]
    fn test_aggregate_across_agents() {
        let monitor = AgentMonitor::new();
        monitor.record_call("search", 100, 100, 10);
        monitor.record_call("files", 50, 25, 20);
        monitor.record_error("files");

        let total = monitor.aggregate();
        assert_eq!(total.calls, 2);
        assert_eq!(total.errors, 1);
        assert_eq!(total.total_tokens(), 275);
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_additive() {
        let monitor = Arc::new(AgentMonitor::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let monitor = Arc::clone(&monitor);
            handles.push(tokio::spawn(async move {
                monitor.record_call("shared", 10, 5, 1);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(monitor.snapshot()["shared"].total_tokens(), 240);
    }
}
