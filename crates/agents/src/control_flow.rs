//! Static control-flow analysis agent: builds CFGs for changed files,
//! detects mitigation patterns, finds candidate sinks, and runs path
//! analysis to produce mitigation-aware findings. Spec §4.4, no LLM
//! involved.

use std::time::Instant;

use async_trait::async_trait;

use revrouter_cfa::{
    analyze, build_control_flow_graphs, detect_mitigations, has_cross_function_async, EnumerationLimits,
    MitigationCatalog, RedosRisk,
};
use revrouter_cfa::{generate_finding, ControlFlowGraph, NodeId, PotentialVulnerability};
use revrouter_core::model::{AgentContext, AgentMetrics, AgentResult, DiffFile, Finding, Provider};
use revrouter_core::router::Agent;

const SUPPORTED_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs"];

fn is_supported(path: &str) -> bool {
    path.rsplit('.')
        .next()
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// Substring match against a call-site's recorded function-text; a rule
/// fires the first time any of its needles appears in a node's call sites.
/// Not part of the distilled contract, a supplement needed to turn a raw
/// CFG into candidate sinks the path analyzer can reason about; see
/// DESIGN.md.
const SINK_RULES: &[(&str, &[&str])] = &[
    ("injection", &["query", "exec(", ".raw(", "execute("]),
    (
        "xss",
        &["document.write", "dangerouslySetInnerHTML", "insertAdjacentHTML", "innerHTML"],
    ),
    (
        "path_traversal",
        &["readFile", "createReadStream", "unlink", "writeFile", "readFileSync"],
    ),
    (
        "ssrf",
        &["fetch(", "axios.get", "axios.post", "http.get", "https.get", "request("],
    ),
    ("prototype_pollution", &["Object.assign", "merge("]),
];

fn find_sinks(cfg: &ControlFlowGraph, path: &str) -> Vec<(PotentialVulnerability, NodeId)> {
    let mut found = Vec::new();
    for node in cfg.nodes.values() {
        for call in &node.call_sites {
            for (vuln_type, needles) in SINK_RULES {
                if needles.iter().any(|needle| call.contains(needle)) {
                    let vuln = PotentialVulnerability {
                        id: format!("{path}:{}:{vuln_type}:{call}", node.line_start),
                        vuln_type: vuln_type.to_string(),
                        sink_location: revrouter_cfa::SourceLocation {
                            file: path.to_string(),
                            line: node.line_start,
                        },
                        affected_variable: call.clone(),
                        required_mitigations: vec![vuln_type.to_string()],
                        description: format!("Call to `{call}` may be vulnerable to {vuln_type}."),
                    };
                    found.push((vuln, node.id.clone()));
                }
            }
        }
    }
    found
}

/// Reports the function ids present in a file's CFGs, used to detect
/// cross-function-async call chains (spec §4.4.3, FR-023).
fn module_function_ids(cfgs: &[ControlFlowGraph]) -> std::collections::HashSet<String> {
    cfgs.iter().map(|cfg| cfg.function_id.clone()).collect()
}

/// Wraps the CFA engine behind the `Agent` trait, running one file at a
/// time under a shared `AnalysisBudget`. No LLM and no subprocess; purely
/// in-process tree-sitter parsing and graph analysis.
pub struct ControlFlowAgent {
    id: String,
    name: String,
    redos_threshold: RedosRisk,
}

impl ControlFlowAgent {
    pub fn new() -> Self {
        Self {
            id: "control_flow".to_string(),
            name: "Control-flow analyzer".to_string(),
            redos_threshold: RedosRisk::Medium,
        }
    }
}

impl Default for ControlFlowAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for ControlFlowAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn uses_llm(&self) -> bool {
        false
    }

    fn supported_providers(&self) -> &[Provider] {
        &[]
    }

    fn supports(&self, file: &DiffFile) -> bool {
        is_supported(&file.path)
    }

    async fn run(&self, context: AgentContext) -> AgentResult {
        let start = Instant::now();
        let catalog = MitigationCatalog::load(&context.config.mitigations, self.redos_threshold);

        let mut files: Vec<&DiffFile> = context.candidate_files().filter(|f| self.supports(f)).collect();
        let ordered_paths = revrouter_cfa::sort_files_by_priority(
            &files.iter().map(|f| f.path.clone()).collect::<Vec<_>>(),
        );
        files.sort_by_key(|f| ordered_paths.iter().position(|p| p == &f.path).unwrap_or(usize::MAX));

        let mut budget = revrouter_cfa::AnalysisBudget::new(context.config.budget.clone());
        let mut findings: Vec<Finding> = Vec::new();
        let mut files_processed = 0u32;

        'files: for file in files {
            if !budget.should_continue() {
                break 'files;
            }
            if !budget.should_analyze_file(&file.path) {
                continue;
            }

            let source = match std::fs::read_to_string(context.repo_path.join(&file.path)) {
                Ok(source) => source,
                Err(_) => continue,
            };
            budget.record_lines(source.lines().count() as u64);
            budget.record_file_analyzed();
            files_processed += 1;

            let cfgs = match build_control_flow_graphs(&file.path, &source) {
                Ok(cfgs) => cfgs,
                Err(_) => continue,
            };
            let mitigation_instances = match detect_mitigations(&catalog, &file.path, &source) {
                Ok(instances) => instances,
                Err(_) => continue,
            };
            let module_ids = module_function_ids(&cfgs);

            let max_depth = budget.effective_max_call_depth();

            for mut cfg in cfgs {
                if !budget.should_continue() {
                    break 'files;
                }
                budget.record_nodes_visited(cfg.nodes.len() as u64);

                attach_mitigations(&mut cfg, &mitigation_instances, &file.path);

                let is_cross_async = has_cross_function_async(&cfg, &module_ids);
                let sinks = find_sinks(&cfg, &file.path);

                for (vuln, sink_id) in sinks {
                    let required = vuln.required_mitigations.clone();
                    let catalog_ref = &catalog;
                    let covers = move |instance: &revrouter_cfa::MitigationInstance| {
                        catalog_ref
                            .get(&instance.pattern_id)
                            .map(|pattern| pattern.mitigates.iter().any(|tag| required.contains(tag)))
                            .unwrap_or(false)
                    };

                    let limits = EnumerationLimits {
                        max_path_length: EnumerationLimits::default().max_path_length.min(max_depth as usize * 16),
                        ..EnumerationLimits::default()
                    };

                    let analysis = analyze(&cfg, &vuln.vuln_type, &sink_id, &limits, is_cross_async, &covers);
                    if let Some(finding) = generate_finding(&vuln, &cfg, &analysis, max_depth) {
                        findings.push(finding);
                    }
                }
            }
        }

        AgentResult::Success {
            agent_id: self.id.clone(),
            findings,
            metrics: AgentMetrics {
                duration_ms: start.elapsed().as_millis() as u64,
                files_processed,
                tokens_used: None,
                estimated_cost_usd: None,
            },
        }
    }
}

/// Attaches detected mitigation instances to whichever CFG node's line
/// range contains them, so path analysis can find them by walking a
/// node's `mitigations`.
fn attach_mitigations(cfg: &mut ControlFlowGraph, instances: &[revrouter_cfa::MitigationInstance], path: &str) {
    for instance in instances {
        if instance.location.file != path {
            continue;
        }
        for node in cfg.nodes.values_mut() {
            if instance.location.line >= node.line_start && instance.location.line <= node.line_end {
                node.mitigations.push(instance.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supports_only_tree_sitter_extensions() {
        assert!(is_supported("src/a.ts"));
        assert!(is_supported("src/a.tsx"));
        assert!(!is_supported("src/a.py"));
        assert!(!is_supported("src/a.rs"));
    }

    #[test]
    fn find_sinks_matches_known_needles() {
        let cfg = ControlFlowGraph {
            function_id: "a.ts:1:f".to_string(),
            nodes: {
                let mut map = std::collections::HashMap::new();
                map.insert(
                    "a.ts:1:f:0".to_string(),
                    revrouter_cfa::CfgNode {
                        id: "a.ts:1:f:0".to_string(),
                        node_type: revrouter_cfa::NodeType::Basic,
                        line_start: 2,
                        line_end: 2,
                        mitigations: Vec::new(),
                        is_async_boundary: false,
                        call_sites: vec!["db.query".to_string()],
                    },
                );
                map
            },
            edges: Vec::new(),
            entry: "a.ts:1:f:0".to_string(),
            exits: vec!["a.ts:1:f:0".to_string()],
            is_async: false,
            await_boundaries: Vec::new(),
        };
        let sinks = find_sinks(&cfg, "a.ts");
        assert_eq!(sinks.len(), 1);
        assert_eq!(sinks[0].0.vuln_type, "injection");
        assert_eq!(sinks[0].1, "a.ts:1:f:0");
    }
}
