//! Dependency planning over a decomposed task: cycle resolution,
//! topological execution order, critical path, and a deterministic text
//! rendering of the DAG.

use crate::error::{PlannerError, Result};
use costwise_protocol::{DecomposedTask, Subtask};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, HashMap, HashSet};

/// A dependency edge removed during cycle resolution, recorded as
/// `dependent -> dependency`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokenEdge {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Default)]
pub struct PlanReport {
    pub broken_edges: Vec<BrokenEdge>,
    pub notes: Vec<String>,
}

/// Resolve cycles, compute execution order and critical path, and write
/// both back into the task. The graph is a DAG afterwards.
pub fn plan(task: &mut DecomposedTask) -> Result<PlanReport> {
    task.validate_dependencies()
        .map_err(PlannerError::InvalidGraph)?;

    let mut report = PlanReport::default();
    resolve_cycles(task, &mut report)?;

    task.execution_order = execution_order(&task.subtasks)?;
    task.critical_path = critical_path(&task.subtasks, &task.execution_order);
    Ok(report)
}

/// Tarjan SCC detection; in every component of size > 1 the edge whose
/// dependency endpoint has the lowest complexity is broken (ties by
/// ascending id). Repeats until the graph is acyclic.
fn resolve_cycles(task: &mut DecomposedTask, report: &mut PlanReport) -> Result<()> {
    // Each pass breaks at least one edge, so the edge count bounds the loop.
    let max_passes = task
        .subtasks
        .iter()
        .map(|s| s.dependencies.len())
        .sum::<usize>()
        + 1;

    for _ in 0..max_passes {
        let sccs = strongly_connected(&task.subtasks);
        let cyclic: Vec<&Vec<String>> = sccs.iter().filter(|scc| scc.len() > 1).collect();
        if cyclic.is_empty() {
            return Ok(());
        }

        let mut breaks = Vec::new();
        for scc in cyclic {
            let members: HashSet<&str> = scc.iter().map(String::as_str).collect();
            if let Some(edge) = pick_edge_to_break(&task.subtasks, &members) {
                breaks.push(edge);
            }
        }

        for edge in breaks {
            if let Some(subtask) = task.subtask_mut(&edge.from) {
                subtask.dependencies.remove(&edge.to);
                subtask
                    .notes
                    .push(format!("dropped cyclic dependency on {}", edge.to));
            }
            report
                .notes
                .push(format!("broke cycle edge {} -> {}", edge.from, edge.to));
            report.broken_edges.push(edge);
        }
    }

    Err(PlannerError::CycleResolution)
}

/// SCCs as sorted id lists, via petgraph's Tarjan implementation.
fn strongly_connected(subtasks: &[Subtask]) -> Vec<Vec<String>> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();
    for subtask in subtasks {
        nodes.insert(&subtask.id, graph.add_node(&subtask.id));
    }
    for subtask in subtasks {
        for dep in &subtask.dependencies {
            // Edge from dependency to dependent.
            graph.add_edge(nodes[dep.as_str()], nodes[subtask.id.as_str()], ());
        }
    }

    tarjan_scc(&graph)
        .into_iter()
        .map(|scc| {
            let mut ids: Vec<String> = scc.iter().map(|n| graph[*n].to_string()).collect();
            ids.sort();
            ids
        })
        .collect()
}

/// Among the in-component edges, break the one pointing at the lowest
/// complexity dependency (tie by ascending dependency id, then dependent id).
fn pick_edge_to_break(subtasks: &[Subtask], members: &HashSet<&str>) -> Option<BrokenEdge> {
    let by_id: BTreeMap<&str, &Subtask> = subtasks.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut best: Option<(f64, &str, &str)> = None;
    for subtask in subtasks {
        if !members.contains(subtask.id.as_str()) {
            continue;
        }
        for dep in &subtask.dependencies {
            if !members.contains(dep.as_str()) {
                continue;
            }
            let complexity = by_id[dep.as_str()].complexity;
            let candidate = (complexity, dep.as_str(), subtask.id.as_str());
            let better = match &best {
                None => true,
                Some((c, d, f)) => {
                    (candidate.0, candidate.1, candidate.2) < (*c, *d, *f)
                }
            };
            if better {
                best = Some(candidate);
            }
        }
    }

    best.map(|(_, dep, dependent)| BrokenEdge {
        from: dependent.to_string(),
        to: dep.to_string(),
    })
}

/// Kahn's topological sort. Within one ready set, descending complexity
/// wins, then ascending id; the sort is stable across runs.
fn execution_order(subtasks: &[Subtask]) -> Result<Vec<String>> {
    let mut remaining: BTreeMap<&str, HashSet<&str>> = subtasks
        .iter()
        .map(|s| {
            (
                s.id.as_str(),
                s.dependencies.iter().map(String::as_str).collect(),
            )
        })
        .collect();
    let by_id: BTreeMap<&str, &Subtask> = subtasks.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut order = Vec::with_capacity(subtasks.len());
    while !remaining.is_empty() {
        let mut ready: Vec<&str> = remaining
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(id, _)| *id)
            .collect();
        if ready.is_empty() {
            return Err(PlannerError::InvalidGraph(
                "cycle survived resolution".to_string(),
            ));
        }

        ready.sort_by(|a, b| {
            by_id[b]
                .complexity
                .partial_cmp(&by_id[a].complexity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cmp(b))
        });

        let next = ready[0];
        order.push(next.to_string());
        remaining.remove(next);
        for deps in remaining.values_mut() {
            deps.remove(next);
        }
    }
    Ok(order)
}

/// Longest path through the DAG, weighted by each subtask's estimated time
/// (complexity x token estimate). Ties resolve by ascending id so the path
/// is unique.
fn critical_path(subtasks: &[Subtask], order: &[String]) -> Vec<String> {
    let by_id: BTreeMap<&str, &Subtask> = subtasks.iter().map(|s| (s.id.as_str(), s)).collect();
    let mut dist: BTreeMap<&str, f64> = BTreeMap::new();
    let mut pred: BTreeMap<&str, Option<&str>> = BTreeMap::new();

    for id in order {
        let subtask = by_id[id.as_str()];
        let mut best_dep: Option<(&str, f64)> = None;
        for dep in &subtask.dependencies {
            let dep_dist = dist.get(dep.as_str()).copied().unwrap_or(0.0);
            let better = match best_dep {
                None => true,
                Some((best_id, best_dist)) => {
                    dep_dist > best_dist
                        || (dep_dist == best_dist && dep.as_str() < best_id)
                }
            };
            if better {
                best_dep = Some((dep.as_str(), dep_dist));
            }
        }

        let base = best_dep.map(|(_, d)| d).unwrap_or(0.0);
        dist.insert(&subtask.id, base + subtask.estimated_time_weight());
        pred.insert(&subtask.id, best_dep.map(|(id, _)| id));
    }

    // End of the path: greatest distance, smallest id on ties.
    let mut end: Option<(&str, f64)> = None;
    for (id, d) in &dist {
        let better = match end {
            None => true,
            Some((best_id, best_d)) => *d > best_d || (*d == best_d && *id < best_id),
        };
        if better {
            end = Some((id, *d));
        }
    }

    let mut path = Vec::new();
    let mut cursor = end.map(|(id, _)| id);
    while let Some(id) = cursor {
        path.push(id.to_string());
        cursor = pred.get(id).copied().flatten();
    }
    path.reverse();
    path
}

/// Deterministic text rendering of the DAG: one line per subtask id with
/// its immediate dependencies. Used for debugging and test fixtures.
pub fn visualize(task: &DecomposedTask) -> String {
    let mut ids: Vec<&Subtask> = task.subtasks.iter().collect();
    ids.sort_by(|a, b| a.id.cmp(&b.id));

    let mut out = String::new();
    for subtask in ids {
        let deps = if subtask.dependencies.is_empty() {
            "none".to_string()
        } else {
            subtask
                .dependencies
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        };
        out.push_str(&format!(
            "{} (complexity {:.2}) <- {}\n",
            subtask.id, subtask.complexity, deps
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use costwise_protocol::{CodeType, SizeCategory};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn subtask(id: &str, complexity: f64, deps: &[&str]) -> Subtask {
        Subtask {
            id: id.to_string(),
            description: format!("work item {id}"),
            estimated_tokens: 100,
            complexity,
            recommended_size: SizeCategory::for_complexity(complexity),
            code_type: CodeType::Function,
            dependencies: deps.iter().map(|d| d.to_string()).collect::<BTreeSet<_>>(),
            notes: Vec::new(),
        }
    }

    fn planned(subtasks: Vec<Subtask>) -> (DecomposedTask, PlanReport) {
        let mut task = DecomposedTask::new("test task", subtasks);
        let report = plan(&mut task).unwrap();
        (task, report)
    }

    #[test]
    fn linear_chain_orders_by_dependency() {
        let (task, report) = planned(vec![
            subtask("subtask-1", 0.2, &[]),
            subtask("subtask-2", 0.9, &["subtask-1"]),
            subtask("subtask-3", 0.5, &["subtask-2"]),
        ]);
        assert_eq!(task.execution_order, vec!["subtask-1", "subtask-2", "subtask-3"]);
        assert!(report.broken_edges.is_empty());
    }

    #[test]
    fn ready_set_orders_by_descending_complexity_then_id() {
        let (task, _) = planned(vec![
            subtask("subtask-1", 0.2, &[]),
            subtask("subtask-2", 0.8, &[]),
            subtask("subtask-3", 0.8, &[]),
            subtask("subtask-4", 0.5, &[]),
        ]);
        assert_eq!(
            task.execution_order,
            vec!["subtask-2", "subtask-3", "subtask-4", "subtask-1"]
        );
    }

    #[test]
    fn two_node_cycle_breaks_lowest_complexity_endpoint() {
        let (task, report) = planned(vec![
            subtask("subtask-1", 0.3, &["subtask-2"]),
            subtask("subtask-2", 0.7, &["subtask-1"]),
        ]);

        // subtask-1 has the lower complexity, so the edge pointing at it
        // (subtask-2 -> subtask-1) is the one that breaks.
        assert_eq!(
            report.broken_edges,
            vec![BrokenEdge {
                from: "subtask-2".to_string(),
                to: "subtask-1".to_string(),
            }]
        );
        assert!(task.subtask("subtask-2").unwrap().dependencies.is_empty());
        assert!(task
            .subtask("subtask-2")
            .unwrap()
            .notes
            .iter()
            .any(|n| n.contains("cyclic")));
        // Result is a DAG with a valid order.
        assert_eq!(task.execution_order.len(), 2);
    }

    #[test]
    fn three_node_cycle_resolves_to_dag() {
        let (task, report) = planned(vec![
            subtask("subtask-1", 0.5, &["subtask-3"]),
            subtask("subtask-2", 0.4, &["subtask-1"]),
            subtask("subtask-3", 0.6, &["subtask-2"]),
        ]);
        assert!(!report.broken_edges.is_empty());
        assert_eq!(task.execution_order.len(), 3);
        // No remaining cycle: validate by replanning.
        let mut replay = task.clone();
        let report2 = plan(&mut replay).unwrap();
        assert!(report2.broken_edges.is_empty());
    }

    #[test]
    fn critical_path_follows_heaviest_chain() {
        let (task, _) = planned(vec![
            subtask("subtask-1", 0.8, &[]),
            subtask("subtask-2", 0.7, &["subtask-1"]),
            subtask("subtask-3", 0.1, &["subtask-1"]),
            subtask("subtask-4", 0.6, &["subtask-2", "subtask-3"]),
        ]);
        assert_eq!(
            task.critical_path,
            vec!["subtask-1", "subtask-2", "subtask-4"]
        );
    }

    #[test]
    fn critical_path_tie_breaks_by_id() {
        let (task, _) = planned(vec![
            subtask("subtask-1", 0.5, &[]),
            subtask("subtask-2", 0.5, &[]),
            subtask("subtask-3", 0.5, &["subtask-1", "subtask-2"]),
        ]);
        // Both predecessors carry equal weight; the smaller id wins.
        assert_eq!(task.critical_path, vec!["subtask-1", "subtask-3"]);
    }

    #[test]
    fn visualization_is_stable() {
        let (task, _) = planned(vec![
            subtask("subtask-1", 0.2, &[]),
            subtask("subtask-2", 0.5, &["subtask-1"]),
        ]);
        let rendered = visualize(&task);
        assert_eq!(
            rendered,
            "subtask-1 (complexity 0.20) <- none\nsubtask-2 (complexity 0.50) <- subtask-1\n"
        );
    }

    #[test]
    fn dangling_dependency_is_an_internal_error() {
        let mut task = DecomposedTask::new("t", vec![subtask("subtask-1", 0.2, &["ghost"])]);
        assert!(matches!(
            plan(&mut task),
            Err(PlannerError::InvalidGraph(_))
        ));
    }
}
