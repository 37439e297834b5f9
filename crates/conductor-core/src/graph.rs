use crate::capability::Capability;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// One unit of delegated work inside a [`TaskGraph`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub description: String,
    /// Name of the agent the decomposition asked for, if any.
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
    /// Lower values run first when subtasks are otherwise tied.
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Whether this subtask may run concurrently with its wave siblings.
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    /// Estimated token cost of running the subtask.
    #[serde(default)]
    pub estimated_cost: Option<u64>,
}

fn default_parallel() -> bool {
    true
}

impl Subtask {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            agent: None,
            capabilities: BTreeSet::new(),
            priority: 0,
            dependencies: Vec::new(),
            parallel: true,
            estimated_cost: None,
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_capabilities(mut self, caps: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities = caps.into_iter().collect();
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_cost(mut self, cost: u64) -> Self {
        self.estimated_cost = Some(cost);
        self
    }

    /// True when every dependency is contained in `completed`.
    pub fn is_ready(&self, completed: &HashSet<String>) -> bool {
        self.dependencies.iter().all(|dep| completed.contains(dep))
    }

    pub fn cost(&self) -> u64 {
        self.estimated_cost.unwrap_or(0)
    }
}

/// A decomposition: subtasks plus their derived execution order and cost.
///
/// The derived fields are always recomputed by [`TaskGraph::new`]; callers
/// that change subtasks build a new graph instead of editing this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskGraph {
    subtasks: Vec<Subtask>,
    execution_order: Vec<String>,
    total_cost: u64,
}

impl TaskGraph {
    pub fn new(subtasks: Vec<Subtask>) -> Self {
        let execution_order = dependency_first_order(&subtasks);
        let total_cost = subtasks.iter().map(Subtask::cost).fold(0, u64::saturating_add);
        Self {
            subtasks,
            execution_order,
            total_cost,
        }
    }

    pub fn subtasks(&self) -> &[Subtask] {
        &self.subtasks
    }

    pub fn into_subtasks(self) -> Vec<Subtask> {
        self.subtasks
    }

    /// Ids in a dependency-respecting sequence (ties broken by input order).
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    pub fn total_cost(&self) -> u64 {
        self.total_cost
    }

    pub fn len(&self) -> usize {
        self.subtasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subtasks.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.id == id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.subtasks.iter().map(|s| s.id.clone()).collect()
    }

    /// `(subtask, dependency)` pairs whose dependency is not in the graph.
    pub fn dangling_dependencies(&self) -> Vec<(String, String)> {
        let ids: HashSet<&str> = self.subtasks.iter().map(|s| s.id.as_str()).collect();
        self.subtasks
            .iter()
            .flat_map(|s| {
                s.dependencies
                    .iter()
                    .filter(|dep| !ids.contains(dep.as_str()))
                    .map(move |dep| (s.id.clone(), dep.clone()))
            })
            .collect()
    }

    /// Check for cycles (including self-dependencies) in the dependency graph.
    pub fn has_cycle(&self) -> bool {
        let index: HashMap<&str, &Subtask> =
            self.subtasks.iter().map(|s| (s.id.as_str(), s)).collect();
        let mut visited = HashMap::new();
        for subtask in &self.subtasks {
            if dfs_cycle(subtask.id.as_str(), &index, &mut visited) {
                return true;
            }
        }
        false
    }
}

fn dfs_cycle<'a>(
    id: &'a str,
    index: &HashMap<&'a str, &'a Subtask>,
    visited: &mut HashMap<&'a str, u8>,
) -> bool {
    match visited.get(id) {
        Some(1) => return true,  // back edge
        Some(2) => return false, // already processed
        _ => {}
    }
    visited.insert(id, 1);
    if let Some(subtask) = index.get(id) {
        for dep in &subtask.dependencies {
            if dfs_cycle(dep.as_str(), index, visited) {
                return true;
            }
        }
    }
    visited.insert(id, 2);
    false
}

/// Depth-first "visit dependencies first" walk over all subtasks.
///
/// Unknown dependency ids are ignored and back edges are skipped, so the
/// walk terminates on cyclic input and still lists every id exactly once.
pub fn dependency_first_order(subtasks: &[Subtask]) -> Vec<String> {
    let index: HashMap<&str, &Subtask> = subtasks.iter().map(|s| (s.id.as_str(), s)).collect();
    let mut marks: HashMap<&str, u8> = HashMap::new();
    let mut order = Vec::with_capacity(subtasks.len());

    fn visit<'a>(
        id: &'a str,
        index: &HashMap<&'a str, &'a Subtask>,
        marks: &mut HashMap<&'a str, u8>,
        order: &mut Vec<String>,
    ) {
        if marks.contains_key(id) {
            return;
        }
        let Some(subtask) = index.get(id) else {
            return;
        };
        marks.insert(id, 1);
        for dep in &subtask.dependencies {
            visit(dep.as_str(), index, marks, order);
        }
        marks.insert(id, 2);
        order.push(id.to_string());
    }

    for subtask in subtasks {
        visit(subtask.id.as_str(), &index, &mut marks, &mut order);
    }
    order
}
