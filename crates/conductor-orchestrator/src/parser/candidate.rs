//! Turning extracted candidates into subtasks.

use super::{hints, metadata};
use conductor_core::{AgentDescriptor, Subtask};
use std::collections::HashMap;
use tracing::{debug, warn};

/// A subtask as an extractor found it, before ids and hints are resolved.
#[derive(Debug, Clone, Default)]
pub struct Candidate {
    /// Key other candidates use to refer to this one ("2", "research").
    pub key: String,
    pub description: String,
    /// Text scanned for agent mentions, capabilities and dependencies.
    pub body: String,
    /// Agent name given explicitly by the source, resolved against the registry.
    pub agent: Option<String>,
    /// Capability labels given explicitly by the source.
    pub capabilities: Option<Vec<String>>,
    /// Dependency keys given explicitly by the source. `None` means scan `body`.
    pub dependencies: Option<Vec<String>>,
    pub priority: Option<i64>,
    pub parallel: Option<bool>,
    pub estimated_cost: Option<u64>,
}

impl Candidate {
    pub fn new(key: impl Into<String>, description: impl Into<String>) -> Self {
        let description = description.into();
        Self {
            key: key.into(),
            body: description.clone(),
            description,
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

fn trailing_digits(s: &str) -> Option<&str> {
    let start = s
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    Some(&s[start..])
}

/// Candidate keys mapped to assigned ids, in first-seen order.
#[derive(Default)]
struct IdMap {
    by_key: HashMap<String, String>,
    order: Vec<String>,
}

impl IdMap {
    fn insert(&mut self, key: String, id: &str) {
        if !self.by_key.contains_key(&key) {
            self.order.push(key.clone());
            self.by_key.insert(key, id.to_string());
        }
    }

    fn get(&self, key: &str) -> Option<&String> {
        self.by_key.get(key)
    }
}

fn lookup<'a>(reference: &str, ids: &'a IdMap) -> Option<&'a String> {
    let reference = reference.trim();
    if let Some(id) = ids.get(reference) {
        return Some(id);
    }
    if let Some(id) = ids.get(&reference.to_lowercase()) {
        return Some(id);
    }
    // "subtask_2" referring to key "2", or "2" referring to key "step-2"
    let digits = trailing_digits(reference)?;
    ids.get(digits).or_else(|| {
        ids.order
            .iter()
            .find(|key| trailing_digits(key) == Some(digits))
            .and_then(|key| ids.get(key))
    })
}

/// Reject metadata, assign ids and resolve agents, capabilities and
/// dependencies. Returns an empty list when no candidate survives.
pub fn assemble(
    candidates: Vec<Candidate>,
    agents: &[AgentDescriptor],
    strategy: &str,
) -> Vec<Subtask> {
    let kept: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| {
            let reject = metadata::is_metadata(&c.description);
            if reject {
                debug!(strategy, candidate = %c.description, "Rejected metadata candidate");
            }
            !reject
        })
        .collect();

    // First pass: ids for every surviving candidate.
    let mut ids = IdMap::default();
    let mut assigned: Vec<String> = Vec::with_capacity(kept.len());
    for (index, candidate) in kept.iter().enumerate() {
        let base = if candidate.key.chars().all(|c| c.is_ascii_digit()) && !candidate.key.is_empty()
        {
            format!("subtask-{}", candidate.key)
        } else if candidate.key.trim().is_empty() {
            format!("subtask-{}", index + 1)
        } else {
            candidate.key.trim().to_string()
        };
        let mut id = base.clone();
        let mut suffix = 2;
        while assigned.contains(&id) {
            id = format!("{base}-{suffix}");
            suffix += 1;
        }
        ids.insert(candidate.key.trim().to_string(), &id);
        ids.insert(candidate.key.trim().to_lowercase(), &id);
        assigned.push(id);
    }

    // Second pass: everything that needs the full id map.
    kept.into_iter()
        .zip(assigned)
        .enumerate()
        .map(|(index, (candidate, id))| {
            let refs = candidate
                .dependencies
                .clone()
                .unwrap_or_else(|| hints::dependency_refs(&candidate.body));
            let mut dependencies: Vec<String> = Vec::new();
            for reference in refs {
                match lookup(&reference, &ids) {
                    Some(dep) if *dep == id => {}
                    Some(dep) => {
                        if !dependencies.contains(dep) {
                            dependencies.push(dep.clone());
                        }
                    }
                    None => {
                        warn!(subtask_id = %id, reference = %reference, "Dropping unresolved dependency");
                    }
                }
            }

            let agent = candidate
                .agent
                .as_deref()
                .and_then(|name| hints::resolve_agent(name, agents))
                .or_else(|| hints::resolve_agent(&candidate.body, agents));

            let capabilities = candidate
                .capabilities
                .as_deref()
                .map(hints::parse_capability_list)
                .filter(|caps| !caps.is_empty())
                .unwrap_or_else(|| hints::infer_capabilities(&candidate.body));

            let mut subtask = Subtask::new(id, candidate.description)
                .with_capabilities(capabilities)
                .with_priority(candidate.priority.unwrap_or(index as i64 + 1))
                .with_dependencies(dependencies)
                .with_parallel(candidate.parallel.unwrap_or(true));
            subtask.agent = agent;
            subtask.estimated_cost = candidate.estimated_cost;
            subtask
        })
        .collect()
}
