use chrono::Utc;
use conductor_core::{Capability, RetryAttempt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// How a failed subtask is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RetryPolicy {
    /// Fail on the first error.
    #[default]
    None,
    /// Retry after a constant delay.
    Fixed { max_attempts: u32, delay_ms: u64 },
    /// Retry after `initial_delay_ms * 2^n`.
    Exponential {
        max_attempts: u32,
        initial_delay_ms: u64,
    },
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        RetryPolicy::Fixed {
            max_attempts,
            delay_ms: delay.as_millis() as u64,
        }
    }

    pub fn exponential(max_attempts: u32, initial_delay: Duration) -> Self {
        RetryPolicy::Exponential {
            max_attempts,
            initial_delay_ms: initial_delay.as_millis() as u64,
        }
    }

    /// Delay to wait after attempt `attempt` failed, before the next one.
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            RetryPolicy::None => Duration::ZERO,
            RetryPolicy::Fixed { delay_ms, .. } => Duration::from_millis(delay_ms),
            RetryPolicy::Exponential {
                initial_delay_ms, ..
            } => Duration::from_millis(
                initial_delay_ms.saturating_mul(2u64.saturating_pow(attempt)),
            ),
        }
    }

    /// Whether another attempt may follow the failed attempt `attempt` (zero-based).
    pub fn should_retry(&self, attempt: u32) -> bool {
        match *self {
            RetryPolicy::None => false,
            RetryPolicy::Fixed { max_attempts, .. }
            | RetryPolicy::Exponential { max_attempts, .. } => {
                attempt.saturating_add(1) < max_attempts
            }
        }
    }
}

/// Per-agent and per-capability retry overrides with a global default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicies {
    #[serde(default)]
    pub default: RetryPolicy,
    /// Keyed by agent name.
    #[serde(default)]
    pub by_agent: HashMap<String, RetryPolicy>,
    /// Checked in order; the first capability the subtask requires wins.
    #[serde(default)]
    pub by_capability: Vec<CapabilityRetry>,
}

/// A retry override that applies to subtasks requiring `capability`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRetry {
    pub capability: Capability,
    pub policy: RetryPolicy,
}

impl RetryPolicies {
    pub fn new(default: RetryPolicy) -> Self {
        Self {
            default,
            ..Self::default()
        }
    }

    pub fn with_agent(mut self, agent_name: impl Into<String>, policy: RetryPolicy) -> Self {
        self.by_agent.insert(agent_name.into(), policy);
        self
    }

    pub fn with_capability(mut self, capability: Capability, policy: RetryPolicy) -> Self {
        self.by_capability.push(CapabilityRetry { capability, policy });
        self
    }

    /// Pick the policy for a subtask before its first attempt.
    pub fn select(&self, agent_name: &str, required: &BTreeSet<Capability>) -> RetryPolicy {
        if let Some(policy) = self.by_agent.get(agent_name) {
            return *policy;
        }
        self.by_capability
            .iter()
            .find(|entry| required.contains(&entry.capability))
            .map(|entry| entry.policy)
            .unwrap_or(self.default)
    }
}

/// Record of one attempt, stamped now.
pub fn record_attempt(number: u32, delay: Duration, error: Option<String>) -> RetryAttempt {
    RetryAttempt {
        number,
        timestamp: Utc::now(),
        delay_ms: delay.as_millis() as u64,
        error,
    }
}
