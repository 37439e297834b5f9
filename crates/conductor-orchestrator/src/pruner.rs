use conductor_core::{Subtask, TaskGraph};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

/// Subtasks whose trimmed description is shorter than this are dropped.
pub const MIN_VALUE_CHARS: usize = 10;

/// A pruned graph plus why each removed subtask went away, keyed by its original id.
#[derive(Debug, Clone)]
pub struct PruneOutcome {
    pub graph: TaskGraph,
    pub removed: BTreeMap<String, String>,
}

/// Deduplicates, merges near-duplicates, drops low-value subtasks and trims
/// a decomposition to a token budget. Each step feeds the next and the
/// execution order is recomputed from scratch at the end.
#[derive(Debug, Clone, Copy)]
pub struct Pruner {
    similarity_threshold: f64,
}

impl Default for Pruner {
    fn default() -> Self {
        Self::new(0.7)
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn word_set(normalized: &str) -> BTreeSet<&str> {
    normalized
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty())
        .collect()
}

/// Word-set Jaccard similarity of two descriptions.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let (na, nb) = (normalize(a), normalize(b));
    let (wa, wb) = (word_set(&na), word_set(&nb));
    if wa.is_empty() && wb.is_empty() {
        return 1.0;
    }
    let shared = wa.intersection(&wb).count() as f64;
    let union = wa.union(&wb).count() as f64;
    shared / union
}

/// Point every reference to a key of `renamed` at its replacement and drop
/// references to ids that no longer exist.
fn rewire(subtasks: &mut [Subtask], renamed: &HashMap<String, String>) {
    let alive: BTreeSet<String> = subtasks.iter().map(|s| s.id.clone()).collect();
    for subtask in subtasks {
        let mut deps: Vec<String> = Vec::with_capacity(subtask.dependencies.len());
        for dep in &subtask.dependencies {
            let target = renamed.get(dep).unwrap_or(dep);
            if *target != subtask.id && alive.contains(target) && !deps.contains(target) {
                deps.push(target.clone());
            }
        }
        subtask.dependencies = deps;
    }
}

impl Pruner {
    pub fn new(similarity_threshold: f64) -> Self {
        Self {
            similarity_threshold,
        }
    }

    pub fn similarity_threshold(&self) -> f64 {
        self.similarity_threshold
    }

    /// Prune `graph`, trimming to `token_budget` when one is given.
    pub fn prune(&self, graph: &TaskGraph, token_budget: Option<u64>) -> PruneOutcome {
        let mut removed = BTreeMap::new();
        let before = graph.len();

        let subtasks = graph.subtasks().to_vec();
        let subtasks = remove_exact_duplicates(subtasks, &mut removed);
        let subtasks = self.merge_similar(subtasks, &mut removed);
        let subtasks = remove_low_value(subtasks, &mut removed);
        let subtasks = match token_budget {
            Some(budget) => trim_to_budget(subtasks, budget, &mut removed),
            None => subtasks,
        };

        let graph = TaskGraph::new(subtasks);
        if !removed.is_empty() {
            info!(
                before,
                after = graph.len(),
                removed = removed.len(),
                total_cost = graph.total_cost(),
                "Pruned decomposition"
            );
        }
        PruneOutcome { graph, removed }
    }

    fn similar(&self, a: &str, b: &str) -> Option<f64> {
        let (na, nb) = (normalize(a), normalize(b));
        if na.is_empty() || nb.is_empty() {
            return None;
        }
        if na == nb || na.contains(&nb) || nb.contains(&na) {
            return Some(1.0);
        }
        let score = jaccard(&na, &nb);
        (score >= self.similarity_threshold).then_some(score)
    }

    /// Merge groups of similar subtasks until no similar pair remains.
    fn merge_similar(
        &self,
        mut subtasks: Vec<Subtask>,
        removed: &mut BTreeMap<String, String>,
    ) -> Vec<Subtask> {
        loop {
            let mut group: Option<(usize, Vec<(usize, f64)>)> = None;
            for i in 0..subtasks.len() {
                let members: Vec<(usize, f64)> = (i + 1..subtasks.len())
                    .filter_map(|j| {
                        self.similar(&subtasks[i].description, &subtasks[j].description)
                            .map(|score| (j, score))
                    })
                    .collect();
                if !members.is_empty() {
                    group = Some((i, members));
                    break;
                }
            }
            let Some((anchor_idx, members)) = group else {
                return subtasks;
            };

            let member_idx: BTreeSet<usize> = members.iter().map(|(j, _)| *j).collect();
            let group_ids: BTreeSet<String> = std::iter::once(anchor_idx)
                .chain(member_idx.iter().copied())
                .map(|i| subtasks[i].id.clone())
                .collect();

            let mut merged = subtasks[anchor_idx].clone();
            let mut renamed = HashMap::new();
            let mut all_parallel = merged.parallel;
            let mut any_cost = merged.estimated_cost.is_some();
            let mut cost = merged.cost();
            for (j, score) in &members {
                let member = &subtasks[*j];
                merged.description = format!("{}; {}", merged.description, member.description);
                merged.capabilities.extend(member.capabilities.iter().cloned());
                merged.priority = merged.priority.max(member.priority);
                for dep in &member.dependencies {
                    if !merged.dependencies.contains(dep) {
                        merged.dependencies.push(dep.clone());
                    }
                }
                if merged.agent.is_none() {
                    merged.agent.clone_from(&member.agent);
                }
                all_parallel &= member.parallel;
                any_cost |= member.estimated_cost.is_some();
                cost = cost.saturating_add(member.cost());
                debug!(subtask_id = %member.id, into = %merged.id, score, "Merging similar subtask");
                removed.insert(
                    member.id.clone(),
                    format!("merged into {} (similarity {score:.2})", merged.id),
                );
                renamed.insert(member.id.clone(), merged.id.clone());
            }
            merged.dependencies.retain(|dep| !group_ids.contains(dep));
            merged.parallel = all_parallel;
            merged.estimated_cost = any_cost.then_some(cost);

            subtasks[anchor_idx] = merged;
            let mut idx = 0;
            subtasks.retain(|_| {
                let keep = !member_idx.contains(&idx);
                idx += 1;
                keep
            });
            rewire(&mut subtasks, &renamed);
        }
    }
}

fn remove_exact_duplicates(
    subtasks: Vec<Subtask>,
    removed: &mut BTreeMap<String, String>,
) -> Vec<Subtask> {
    let mut seen: HashMap<String, String> = HashMap::new();
    let mut renamed = HashMap::new();
    let mut kept = Vec::with_capacity(subtasks.len());
    for subtask in subtasks {
        let key = normalize(&subtask.description);
        match seen.get(&key) {
            Some(original) => {
                debug!(subtask_id = %subtask.id, duplicate_of = %original, "Removing duplicate subtask");
                removed.insert(subtask.id.clone(), format!("duplicate of {original}"));
                renamed.insert(subtask.id, original.clone());
            }
            None => {
                seen.insert(key, subtask.id.clone());
                kept.push(subtask);
            }
        }
    }
    rewire(&mut kept, &renamed);
    kept
}

fn remove_low_value(
    subtasks: Vec<Subtask>,
    removed: &mut BTreeMap<String, String>,
) -> Vec<Subtask> {
    let (mut kept, dropped): (Vec<Subtask>, Vec<Subtask>) = subtasks
        .into_iter()
        .partition(|s| s.description.trim().chars().count() >= MIN_VALUE_CHARS);
    for subtask in dropped {
        debug!(subtask_id = %subtask.id, "Dropping low-value subtask");
        removed.insert(
            subtask.id,
            format!("description shorter than {MIN_VALUE_CHARS} characters"),
        );
    }
    rewire(&mut kept, &HashMap::new());
    kept
}

/// Keep the cheapest high-priority subtasks that fit in `budget`; original
/// order is preserved among the survivors.
fn trim_to_budget(
    subtasks: Vec<Subtask>,
    budget: u64,
    removed: &mut BTreeMap<String, String>,
) -> Vec<Subtask> {
    let total = subtasks.iter().map(Subtask::cost).fold(0, u64::saturating_add);
    if total <= budget {
        return subtasks;
    }

    let mut ranked: Vec<usize> = (0..subtasks.len()).collect();
    ranked.sort_by_key(|&i| (subtasks[i].priority, subtasks[i].cost()));

    let mut keep = vec![false; subtasks.len()];
    let mut used = 0u64;
    let mut overflowed = false;
    for i in ranked {
        let cost = subtasks[i].cost();
        if !overflowed && used.saturating_add(cost) <= budget {
            used += cost;
            keep[i] = true;
        } else {
            overflowed = true;
            removed.insert(
                subtasks[i].id.clone(),
                format!("over token budget ({used} + {cost} > {budget})"),
            );
        }
    }
    info!(budget, total, kept_cost = used, "Trimmed decomposition to token budget");

    let mut kept: Vec<Subtask> = subtasks
        .into_iter()
        .zip(keep)
        .filter_map(|(s, k)| k.then_some(s))
        .collect();
    rewire(&mut kept, &HashMap::new());
    kept
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use conductor_core::Capability;

    fn ids(graph: &TaskGraph) -> Vec<&str> {
        graph.subtasks().iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn test_case_only_duplicate_collapses() {
        let graph = TaskGraph::new(vec![
            Subtask::new("1", "Fetch weather for Paris"),
            Subtask::new("2", "Fetch weather for paris"),
        ]);
        let outcome = Pruner::default().prune(&graph, None);
        assert_eq!(outcome.graph.len(), 1);
        assert_eq!(ids(&outcome.graph), vec!["1"]);
        assert!(outcome.removed["2"].contains("duplicate"));
    }

    #[test]
    fn test_similar_subtasks_merge() {
        let graph = TaskGraph::new(vec![
            Subtask::new("a", "Search hotels in central Rome")
                .with_capabilities([Capability::WebSearch])
                .with_priority(1)
                .with_cost(40),
            Subtask::new("b", "Search hotels in central Rome cheaply")
                .with_capabilities([Capability::DataAnalysis])
                .with_priority(3)
                .with_parallel(false)
                .with_cost(60),
            Subtask::new("c", "Book a table at a trattoria").with_dependencies(["b"]),
        ]);
        let outcome = Pruner::new(0.7).prune(&graph, None);
        assert_eq!(ids(&outcome.graph), vec!["a", "c"]);
        let merged = outcome.graph.get("a").unwrap();
        assert!(merged.description.contains("cheaply"));
        assert_eq!(merged.priority, 3);
        assert!(!merged.parallel);
        assert_eq!(merged.estimated_cost, Some(100));
        assert_eq!(merged.capabilities.len(), 2);
        // "c" depended on the merged-away subtask
        assert_eq!(outcome.graph.get("c").unwrap().dependencies, vec!["a"]);
        assert!(outcome.removed["b"].starts_with("merged into a"));
    }

    #[test]
    fn test_merge_drops_dependencies_inside_group() {
        let graph = TaskGraph::new(vec![
            Subtask::new("a", "Summarize the quarterly report"),
            Subtask::new("b", "Summarize the quarterly report in detail").with_dependencies(["a"]),
        ]);
        let outcome = Pruner::default().prune(&graph, None);
        assert_eq!(outcome.graph.len(), 1);
        assert!(outcome.graph.get("a").unwrap().dependencies.is_empty());
    }

    #[test]
    fn test_low_value_dropped() {
        let graph = TaskGraph::new(vec![
            Subtask::new("1", "  ok  "),
            Subtask::new("2", "Analyse the customer churn data"),
        ]);
        let outcome = Pruner::default().prune(&graph, None);
        assert_eq!(ids(&outcome.graph), vec!["2"]);
        assert!(outcome.removed.contains_key("1"));
    }

    fn budget_graph() -> TaskGraph {
        TaskGraph::new(vec![
            Subtask::new("big", "Write the full market analysis")
                .with_priority(2)
                .with_cost(100),
            Subtask::new("mid", "Collect competitor price lists")
                .with_priority(1)
                .with_cost(50),
            Subtask::new("small", "Draft an executive summary")
                .with_priority(1)
                .with_cost(30),
        ])
    }

    #[test]
    fn test_budget_boundary_keeps_both_priority_one() {
        let outcome = Pruner::default().prune(&budget_graph(), Some(80));
        assert_eq!(ids(&outcome.graph), vec!["mid", "small"]);
        assert_eq!(outcome.graph.total_cost(), 80);
        assert!(outcome.removed.contains_key("big"));
    }

    #[test]
    fn test_budget_one_below_drops_costlier() {
        let outcome = Pruner::default().prune(&budget_graph(), Some(79));
        assert_eq!(ids(&outcome.graph), vec!["small"]);
        assert!(outcome.removed.contains_key("mid"));
        assert!(outcome.removed.contains_key("big"));
    }

    #[test]
    fn test_budget_not_exceeded_is_noop() {
        let outcome = Pruner::default().prune(&budget_graph(), Some(500));
        assert_eq!(outcome.graph.len(), 3);
        assert!(outcome.removed.is_empty());
    }

    #[test]
    fn test_prune_is_idempotent() {
        let graph = TaskGraph::new(vec![
            Subtask::new("1", "Fetch weather for Paris").with_cost(20),
            Subtask::new("2", "fetch   weather for PARIS").with_cost(20),
            Subtask::new("3", "Fetch weather for Paris and Lyon").with_cost(30),
            Subtask::new("4", "Plan a two day itinerary").with_dependencies(["2", "3"]).with_cost(40),
            Subtask::new("5", "tiny").with_cost(5),
            Subtask::new("6", "Estimate the total trip budget").with_priority(9).with_cost(90),
        ]);
        let pruner = Pruner::default();
        let first = pruner.prune(&graph, Some(120));
        let second = pruner.prune(&first.graph, Some(120));
        assert!(second.removed.is_empty());
        assert_eq!(second.graph, first.graph);
        assert_eq!(first.graph.get("4").unwrap().dependencies, vec!["1"]);
    }

    #[test]
    fn test_execution_order_recomputed() {
        let graph = TaskGraph::new(vec![
            Subtask::new("late", "Write the conclusion section").with_dependencies(["dup"]),
            Subtask::new("early", "Gather all source material"),
            Subtask::new("dup", "gather all source material"),
        ]);
        let outcome = Pruner::default().prune(&graph, None);
        assert_eq!(
            outcome.graph.execution_order(),
            &["early".to_string(), "late".to_string()]
        );
    }

    #[test]
    fn test_jaccard() {
        assert!((jaccard("a b c", "a b c") - 1.0).abs() < f64::EPSILON);
        assert!((jaccard("a b", "c d")).abs() < f64::EPSILON);
        assert!((jaccard("Fetch, weather", "fetch weather now") - 2.0 / 3.0).abs() < 1e-9);
    }
}
