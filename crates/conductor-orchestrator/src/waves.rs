use conductor_core::TaskGraph;
use std::collections::HashSet;
use tracing::warn;

/// Split `graph` into dependency-respecting execution waves.
///
/// Each round collects every unassigned, parallel-eligible subtask whose
/// dependencies all sit in earlier waves. When none qualifies, the first
/// ready subtask that is not parallel-eligible becomes a wave of its own.
/// When nothing is ready at all (a cycle, or a dependency on an id outside
/// the graph) the remaining subtasks form one forced final wave. Waves are
/// ordered by the graph's execution order.
pub fn compute_waves(graph: &TaskGraph) -> Vec<Vec<String>> {
    let order = graph.execution_order();
    let mut assigned: HashSet<String> = HashSet::with_capacity(order.len());
    let mut waves: Vec<Vec<String>> = Vec::new();

    while assigned.len() < order.len() {
        let ready: Vec<&String> = order
            .iter()
            .filter(|id| !assigned.contains(*id))
            .filter(|id| {
                graph
                    .get(id)
                    .is_some_and(|s| s.dependencies.iter().all(|d| assigned.contains(d)))
            })
            .collect();

        let parallel: Vec<String> = ready
            .iter()
            .filter(|id| graph.get(id).is_some_and(|s| s.parallel))
            .map(|id| (*id).clone())
            .collect();

        let wave = if !parallel.is_empty() {
            parallel
        } else if let Some(first) = ready.first() {
            vec![(*first).clone()]
        } else {
            let remaining: Vec<String> = order
                .iter()
                .filter(|id| !assigned.contains(*id))
                .cloned()
                .collect();
            warn!(
                wave = waves.len(),
                subtasks = ?remaining,
                "No subtask is ready; scheduling the rest as a forced final wave"
            );
            remaining
        };

        assigned.extend(wave.iter().cloned());
        waves.push(wave);
    }
    waves
}

/// True when `wave` may run concurrently: more than one member and every
/// member parallel-eligible.
pub fn runs_concurrently(graph: &TaskGraph, wave: &[String]) -> bool {
    wave.len() > 1
        && wave
            .iter()
            .all(|id| graph.get(id).is_some_and(|s| s.parallel))
}
