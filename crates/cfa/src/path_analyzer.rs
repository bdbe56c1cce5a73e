//! Operates on a single CFG: reachability, dead-code detection, bounded
//! path enumeration to a sink, dominator computation, and coverage. Spec
//! §4.4.3.

use std::collections::{HashMap, HashSet};

use crate::types::{ControlFlowGraph, MitigationInstance, NodeId, PathAnalysisResult, PathStatus};

/// BFS reachable-node set from the CFG's entry.
pub fn reachable_nodes(cfg: &ControlFlowGraph) -> HashSet<NodeId> {
    let mut visited = HashSet::new();
    let mut queue = std::collections::VecDeque::new();
    queue.push_back(cfg.entry.clone());
    visited.insert(cfg.entry.clone());

    while let Some(current) = queue.pop_front() {
        for edge in cfg.successors(&current) {
            if visited.insert(edge.to.clone()) {
                queue.push_back(edge.to.clone());
            }
        }
    }
    visited
}

/// `nodes \ reachable`.
pub fn find_dead_code(cfg: &ControlFlowGraph) -> HashSet<NodeId> {
    let reachable = reachable_nodes(cfg);
    cfg.nodes.keys().filter(|id| !reachable.contains(*id)).cloned().collect()
}

pub struct EnumerationLimits {
    pub max_paths: usize,
    pub max_path_length: usize,
}

impl Default for EnumerationLimits {
    fn default() -> Self {
        Self {
            max_paths: 64,
            max_path_length: 128,
        }
    }
}

/// DFS enumeration of simple paths (cycle-detected via the on-path visited
/// set) from `cfg.entry` to `sink`, bounded by `limits`. When either bound
/// is hit the caller should treat the result as degraded; this function
/// reports that through the `bool` return (`true` = truncated).
pub fn enumerate_paths_to_sink(
    cfg: &ControlFlowGraph,
    sink: &str,
    limits: &EnumerationLimits,
) -> (Vec<Vec<NodeId>>, bool) {
    let mut results = Vec::new();
    let mut truncated = false;
    let mut stack: Vec<NodeId> = vec![cfg.entry.clone()];
    let mut path_stack: HashSet<NodeId> = HashSet::new();
    path_stack.insert(cfg.entry.clone());

    dfs(
        cfg,
        sink,
        &mut stack,
        &mut path_stack,
        limits,
        &mut results,
        &mut truncated,
    );

    (results, truncated)
}

fn dfs(
    cfg: &ControlFlowGraph,
    sink: &str,
    path: &mut Vec<NodeId>,
    on_path: &mut HashSet<NodeId>,
    limits: &EnumerationLimits,
    results: &mut Vec<Vec<NodeId>>,
    truncated: &mut bool,
) {
    if results.len() >= limits.max_paths {
        *truncated = true;
        return;
    }
    if path.len() > limits.max_path_length {
        *truncated = true;
        return;
    }

    let current = path.last().cloned().unwrap();
    if current == sink {
        results.push(path.clone());
        return;
    }

    for edge in cfg.successors(&current) {
        if results.len() >= limits.max_paths {
            *truncated = true;
            return;
        }
        if on_path.contains(&edge.to) {
            continue; // cycle, already visited on this path
        }
        path.push(edge.to.clone());
        on_path.insert(edge.to.clone());
        dfs(cfg, sink, path, on_path, limits, results, truncated);
        on_path.remove(&edge.to);
        path.pop();
    }
}

/// Iteratively computes the dominator sets for every node reachable from
/// `entry`, via intersection of predecessors' dominator sets until a fixed
/// point (the classic Cooper/Harvey/Kennedy-style dataflow formulation).
pub fn compute_dominators(cfg: &ControlFlowGraph) -> HashMap<NodeId, HashSet<NodeId>> {
    let reachable = reachable_nodes(cfg);
    let mut dom: HashMap<NodeId, HashSet<NodeId>> = HashMap::new();

    for id in &reachable {
        if *id == cfg.entry {
            let mut set = HashSet::new();
            set.insert(cfg.entry.clone());
            dom.insert(id.clone(), set);
        } else {
            dom.insert(id.clone(), reachable.clone());
        }
    }

    let mut changed = true;
    while changed {
        changed = false;
        for id in &reachable {
            if *id == cfg.entry {
                continue;
            }
            let preds: Vec<NodeId> = cfg
                .predecessors(id)
                .into_iter()
                .map(|e| e.from.clone())
                .filter(|p| reachable.contains(p))
                .collect();
            if preds.is_empty() {
                continue;
            }

            let mut new_set = dom.get(&preds[0]).cloned().unwrap_or_default();
            for pred in &preds[1..] {
                if let Some(pred_dom) = dom.get(pred) {
                    new_set = new_set.intersection(pred_dom).cloned().collect();
                }
            }
            new_set.insert(id.clone());

            if dom.get(id) != Some(&new_set) {
                dom.insert(id.clone(), new_set);
                changed = true;
            }
        }
    }

    dom
}

/// `true` iff `mitigation_node` is in `dominators(sink)`.
pub fn mitigation_dominates_sink(
    dominators: &HashMap<NodeId, HashSet<NodeId>>,
    mitigation_node: &str,
    sink: &str,
) -> bool {
    dominators
        .get(sink)
        .map(|set| set.contains(mitigation_node))
        .unwrap_or(false)
}

/// A path is "mitigated" iff it contains at least one node carrying a
/// mitigation instance that `covers` approves — the caller decides
/// coverage (typically "this pattern's `mitigates` list contains the
/// target vulnerability tag") since a `MitigationInstance` on its own only
/// carries a `pattern_id`, not the pattern's `mitigates` list.
fn path_is_mitigated(cfg: &ControlFlowGraph, path: &[NodeId], covers: &dyn Fn(&MitigationInstance) -> bool) -> bool {
    path.iter().any(|id| {
        cfg.nodes
            .get(id)
            .map(|n| n.mitigations.iter().any(|m| covers(m)))
            .unwrap_or(false)
    })
}

/// Whether the function containing `cfg` has a call to another function in
/// the same module reachable through one of its await boundaries — the
/// "cross-function async" condition of spec §4.4.3.
pub fn has_cross_function_async(cfg: &ControlFlowGraph, module_function_ids: &HashSet<String>) -> bool {
    if !cfg.is_async {
        return false;
    }
    for await_id in &cfg.await_boundaries {
        for edge in cfg.predecessors(await_id) {
            if let Some(node) = cfg.nodes.get(&edge.from) {
                for call_site in &node.call_sites {
                    if module_function_ids.iter().any(|id| id.ends_with(&format!(":{call_site}"))) {
                        return true;
                    }
                }
            }
        }
    }
    false
}

/// Runs path enumeration and coverage analysis for one sink, applying the
/// cross-function-async downgrade rule (spec §4.4.3, FR-023).
pub fn analyze(
    cfg: &ControlFlowGraph,
    vulnerability_type: &str,
    sink: &str,
    limits: &EnumerationLimits,
    is_cross_function_async: bool,
    covers: &dyn Fn(&MitigationInstance) -> bool,
) -> PathAnalysisResult {
    let (paths, degraded_by_bound) = enumerate_paths_to_sink(cfg, sink, limits);

    let mut mitigated = Vec::new();
    let mut unmitigated = Vec::new();
    for path in &paths {
        if path_is_mitigated(cfg, path, covers) {
            mitigated.push(path.clone());
        } else {
            unmitigated.push(path.clone());
        }
    }

    let coverage_percent = if paths.is_empty() {
        0
    } else {
        ((mitigated.len() as f64 / paths.len() as f64) * 100.0).round() as u32
    };

    let mut status = if coverage_percent == 100 {
        PathStatus::Full
    } else if coverage_percent == 0 {
        PathStatus::None
    } else {
        PathStatus::Partial
    };

    let mut degraded = degraded_by_bound;
    let mut degraded_reason = if degraded_by_bound {
        Some("path or length bound reached during enumeration".to_string())
    } else {
        None
    };

    if is_cross_function_async && status == PathStatus::Full {
        status = PathStatus::Partial;
        degraded = true;
        degraded_reason = Some("Cross-function async; conservative fallback".to_string());
    }

    PathAnalysisResult {
        vulnerability_type: vulnerability_type.to_string(),
        sink_node_id: sink.to_string(),
        paths_to_sink: paths,
        mitigated_paths: mitigated,
        unmitigated_paths: unmitigated,
        status,
        coverage_percent,
        degraded,
        degraded_reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CfgEdge, CfgNode, EdgeType, NodeType};

    fn node(id: &str, node_type: NodeType) -> CfgNode {
        CfgNode {
            id: id.to_string(),
            node_type,
            line_start: 1,
            line_end: 1,
            mitigations: Vec::new(),
            is_async_boundary: false,
            call_sites: Vec::new(),
        }
    }

    fn linear_cfg() -> ControlFlowGraph {
        let mut nodes = HashMap::new();
        nodes.insert("entry".to_string(), node("entry", NodeType::Entry));
        nodes.insert("mid".to_string(), node("mid", NodeType::Basic));
        nodes.insert("sink".to_string(), node("sink", NodeType::Basic));
        nodes.insert("dead".to_string(), node("dead", NodeType::Basic));

        let edges = vec![
            CfgEdge {
                from: "entry".to_string(),
                to: "mid".to_string(),
                edge_type: EdgeType::Flow,
            },
            CfgEdge {
                from: "mid".to_string(),
                to: "sink".to_string(),
                edge_type: EdgeType::Flow,
            },
        ];

        ControlFlowGraph {
            function_id: "f".to_string(),
            nodes,
            edges,
            entry: "entry".to_string(),
            exits: vec!["sink".to_string()],
            is_async: false,
            await_boundaries: Vec::new(),
        }
    }

    #[test]
    fn dead_code_excludes_unreachable_node() {
        let cfg = linear_cfg();
        let dead = find_dead_code(&cfg);
        assert!(dead.contains("dead"));
        assert!(!dead.contains("mid"));
    }

    #[test]
    fn enumerates_the_single_linear_path() {
        let cfg = linear_cfg();
        let (paths, truncated) = enumerate_paths_to_sink(&cfg, "sink", &EnumerationLimits::default());
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0], vec!["entry", "mid", "sink"]);
        assert!(!truncated);
    }

    #[test]
    fn entry_dominates_every_reachable_node() {
        let cfg = linear_cfg();
        let dom = compute_dominators(&cfg);
        assert!(mitigation_dominates_sink(&dom, "entry", "sink"));
        assert!(mitigation_dominates_sink(&dom, "mid", "sink"));
        assert!(!mitigation_dominates_sink(&dom, "dead", "sink"));
    }

    #[test]
    fn analyze_reports_full_status_when_sink_unreachable_yields_zero_paths() {
        let mut cfg = linear_cfg();
        cfg.edges.retain(|e| e.to != "sink");
        let result = analyze(&cfg, "injection", "sink", &EnumerationLimits::default(), false, &|_| true);
        assert_eq!(result.paths_to_sink.len(), 0);
        assert_eq!(result.status, PathStatus::None);
        assert_eq!(result.coverage_percent, 0);
    }

    #[test]
    fn path_bound_marks_result_degraded() {
        let cfg = linear_cfg();
        let limits = EnumerationLimits {
            max_paths: 0,
            max_path_length: 128,
        };
        let result = analyze(&cfg, "injection", "sink", &limits, false, &|_| true);
        assert!(result.degraded);
    }

    #[test]
    fn coverage_bounds_respect_path_count_invariant() {
        let cfg = linear_cfg();
        let result = analyze(&cfg, "injection", "sink", &EnumerationLimits::default(), false, &|_| true);
        assert!(result.mitigated_paths.len() + result.unmitigated_paths.len() <= result.paths_to_sink.len());
        assert!(result.coverage_percent <= 100);
    }
}
