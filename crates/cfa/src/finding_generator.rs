//! Combines a `PathAnalysisResult` with the originating `CfgNode`'s
//! mitigations to produce a `Finding` with mitigation-aware severity
//! downgrade. Spec §4.4.4.

use revrouter_core::model::{Finding, Provenance, Severity};

use crate::types::{ControlFlowGraph, PathAnalysisResult, PathStatus, PotentialVulnerability};

const RULE_PREFIX: &str = "cfa/";
pub const SOURCE_AGENT: &str = "control_flow";

fn base_severity(vuln_type: &str) -> Severity {
    match vuln_type {
        "injection" | "auth_bypass" | "xss" | "path_traversal" | "prototype_pollution" | "ssrf" => Severity::Error,
        "null_deref" => Severity::Warning,
        _ => Severity::Info,
    }
}

/// Downgrade levels per spec §4.4.4: `<50%` none, `[50,75)` one level,
/// `>=75%` two levels (clamped at `info`).
fn downgrade_levels(coverage_percent: u32) -> u8 {
    if coverage_percent >= 75 {
        2
    } else if coverage_percent >= 50 {
        1
    } else {
        0
    }
}

fn suggestion_for(vuln_type: &str) -> String {
    match vuln_type {
        "injection" => "Use parameterized queries or a prepared-statement API instead of string concatenation.".to_string(),
        "xss" => "Sanitize untrusted HTML with a DOMPurify-class sanitizer before insertion.".to_string(),
        "path_traversal" => "Reduce the path to its basename and join it with the allowed root before use.".to_string(),
        "ssrf" => "Check the resolved host/IP against an allowlist before issuing the outbound request.".to_string(),
        "prototype_pollution" => "Store untrusted keys in a `Map` or an `Object.create(null)` map, not a plain object.".to_string(),
        "auth_bypass" => "Guard the action with an explicit authentication/authorization check before it runs.".to_string(),
        "null_deref" => "Guard the access with optional chaining or an explicit null check before dereferencing.".to_string(),
        _ => "Review this path for the reported vulnerability class.".to_string(),
    }
}

fn path_signature(cfg: &ControlFlowGraph, path: &[String]) -> String {
    path.iter()
        .map(|id| {
            cfg.nodes
                .get(id)
                .map(|n| format!("{:?}@{}", n.node_type, n.line_start))
                .unwrap_or_else(|| id.clone())
        })
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn fingerprint(rule_id: &str, file: &str, line: u32, affected_variable: &str) -> String {
    use sha2::{Digest, Sha256};
    let input = format!("{rule_id}|{file}|{line}|{affected_variable}");
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..8])
}

/// Produces a `Finding` for one vulnerability, or `None` when the sink is
/// unreachable (zero paths) or the result is fully mitigated (status=full
/// with no cross-function-async downgrade already applied).
pub fn generate_finding(
    vuln: &PotentialVulnerability,
    cfg: &ControlFlowGraph,
    analysis: &PathAnalysisResult,
    analysis_depth: u32,
) -> Option<Finding> {
    if analysis.paths_to_sink.is_empty() {
        return None; // sink unreachable: skipped silently
    }
    if analysis.status == PathStatus::Full {
        return None; // fully mitigated: suppressed
    }

    let base = base_severity(&vuln.vuln_type);
    let levels = downgrade_levels(analysis.coverage_percent);
    let severity = base.downgrade(levels);

    let mut message = vuln.description.clone();
    match analysis.status {
        PathStatus::None => message.push_str(" No mitigations detected."),
        PathStatus::Partial => {
            let covered = analysis.mitigated_paths.len();
            let total = analysis.paths_to_sink.len();
            let remaining = total - covered;
            message.push_str(&format!(
                " Partial mitigation detected ({covered} of {total} paths, {}%). {covered} path(s) protected; {remaining} path(s) remain unprotected.",
                analysis.coverage_percent
            ));
        }
        PathStatus::Full => unreachable!("full status is suppressed above"),
    }

    let suggestion = if analysis.status == PathStatus::Partial {
        let mut signatures: Vec<String> = analysis
            .unmitigated_paths
            .iter()
            .take(3)
            .map(|p| path_signature(cfg, p))
            .collect();
        if analysis.unmitigated_paths.len() > 3 {
            signatures.push("…".to_string());
        }
        signatures.join("; ")
    } else {
        suggestion_for(&vuln.vuln_type)
    };

    let mut metadata = serde_json::Map::new();
    metadata.insert(
        "mitigationStatus".to_string(),
        serde_json::json!(match analysis.status {
            PathStatus::None => "none",
            PathStatus::Partial => "partial",
            PathStatus::Full => "full",
        }),
    );
    metadata.insert("pathsCovered".to_string(), serde_json::json!(analysis.mitigated_paths.len()));
    metadata.insert("pathsTotal".to_string(), serde_json::json!(analysis.paths_to_sink.len()));
    metadata.insert(
        "unprotectedPaths".to_string(),
        serde_json::json!(analysis
            .unmitigated_paths
            .iter()
            .map(|p| path_signature(cfg, p))
            .collect::<Vec<_>>()),
    );

    let mut mitigations_detected: Vec<String> = analysis
        .mitigated_paths
        .iter()
        .flatten()
        .filter_map(|id| cfg.nodes.get(id))
        .flat_map(|n| n.mitigations.iter().map(|m| m.pattern_id.clone()))
        .collect();
    mitigations_detected.sort();
    mitigations_detected.dedup();
    metadata.insert("mitigationsDetected".to_string(), serde_json::json!(mitigations_detected));

    metadata.insert("analysisDepth".to_string(), serde_json::json!(analysis_depth));
    metadata.insert("degraded".to_string(), serde_json::json!(analysis.degraded));
    if let Some(reason) = &analysis.degraded_reason {
        metadata.insert("degradedReason".to_string(), serde_json::json!(reason));
    }
    if levels > 0 {
        metadata.insert("originalSeverity".to_string(), serde_json::json!(format!("{base:?}").to_lowercase()));
    }

    let rule_id = format!("{RULE_PREFIX}{}", vuln.vuln_type);
    let line = vuln.sink_location.line;

    Some(Finding {
        severity,
        file: vuln.sink_location.file.clone(),
        message,
        source_agent: SOURCE_AGENT.to_string(),
        line: Some(line),
        end_line: None,
        suggestion: Some(suggestion),
        rule_id: Some(rule_id.clone()),
        fingerprint: Some(fingerprint(&rule_id, &vuln.sink_location.file, line, &vuln.affected_variable)),
        provenance: Provenance::Complete,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CfgNode, NodeType, SourceLocation};
    use std::collections::HashMap;

    fn vuln() -> PotentialVulnerability {
        PotentialVulnerability {
            id: "v1".to_string(),
            vuln_type: "injection".to_string(),
            sink_location: SourceLocation {
                file: "x.ts".to_string(),
                line: 2,
            },
            affected_variable: "query".to_string(),
            required_mitigations: vec!["injection".to_string()],
            description: "Untrusted input flows into a SQL query.".to_string(),
        }
    }

    fn trivial_cfg() -> ControlFlowGraph {
        let mut nodes = HashMap::new();
        nodes.insert(
            "sink".to_string(),
            CfgNode {
                id: "sink".to_string(),
                node_type: NodeType::Basic,
                line_start: 2,
                line_end: 2,
                mitigations: Vec::new(),
                is_async_boundary: false,
                call_sites: Vec::new(),
            },
        );
        ControlFlowGraph {
            function_id: "x.ts:1:f".to_string(),
            nodes,
            edges: Vec::new(),
            entry: "sink".to_string(),
            exits: vec!["sink".to_string()],
            is_async: false,
            await_boundaries: Vec::new(),
        }
    }

    #[test]
    fn full_mitigation_suppresses_finding() {
        let cfg = trivial_cfg();
        let analysis = PathAnalysisResult {
            vulnerability_type: "injection".to_string(),
            sink_node_id: "sink".to_string(),
            paths_to_sink: vec![vec!["sink".to_string()]],
            mitigated_paths: vec![vec!["sink".to_string()]],
            unmitigated_paths: vec![],
            status: PathStatus::Full,
            coverage_percent: 100,
            degraded: false,
            degraded_reason: None,
        };
        assert!(generate_finding(&vuln(), &cfg, &analysis, 5).is_none());
    }

    #[test]
    fn unreachable_sink_yields_no_finding() {
        let cfg = trivial_cfg();
        let analysis = PathAnalysisResult {
            vulnerability_type: "injection".to_string(),
            sink_node_id: "sink".to_string(),
            paths_to_sink: vec![],
            mitigated_paths: vec![],
            unmitigated_paths: vec![],
            status: PathStatus::None,
            coverage_percent: 0,
            degraded: false,
            degraded_reason: None,
        };
        assert!(generate_finding(&vuln(), &cfg, &analysis, 5).is_none());
    }

    #[test]
    fn seventy_five_percent_coverage_downgrades_two_levels() {
        let cfg = trivial_cfg();
        let analysis = PathAnalysisResult {
            vulnerability_type: "injection".to_string(),
            sink_node_id: "sink".to_string(),
            paths_to_sink: vec![vec![], vec![], vec![], vec![]],
            mitigated_paths: vec![vec![], vec![], vec![]],
            unmitigated_paths: vec![vec![]],
            status: PathStatus::Partial,
            coverage_percent: 75,
            degraded: false,
            degraded_reason: None,
        };
        let finding = generate_finding(&vuln(), &cfg, &analysis, 5).unwrap();
        assert_eq!(finding.severity, Severity::Info);
        assert_eq!(finding.metadata.get("originalSeverity").unwrap(), "error");
        assert!(finding.message.contains("3 of 4"));
        assert!(finding.message.contains("75%"));
    }

    #[test]
    fn forty_nine_percent_coverage_does_not_downgrade() {
        assert_eq!(downgrade_levels(49), 0);
    }

    #[test]
    fn fifty_percent_coverage_downgrades_one_level() {
        assert_eq!(downgrade_levels(50), 1);
    }

    #[test]
    fn ruleid_and_source_agent_are_set() {
        let cfg = trivial_cfg();
        let analysis = PathAnalysisResult {
            vulnerability_type: "injection".to_string(),
            sink_node_id: "sink".to_string(),
            paths_to_sink: vec![vec!["sink".to_string()]],
            mitigated_paths: vec![],
            unmitigated_paths: vec![vec!["sink".to_string()]],
            status: PathStatus::None,
            coverage_percent: 0,
            degraded: false,
            degraded_reason: None,
        };
        let finding = generate_finding(&vuln(), &cfg, &analysis, 5).unwrap();
        assert_eq!(finding.rule_id.as_deref(), Some("cfa/injection"));
        assert_eq!(finding.source_agent, "control_flow");
        assert_eq!(finding.fingerprint.unwrap().len(), 16);
    }
}
