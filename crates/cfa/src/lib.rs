//! Control-flow analysis engine: parses changed files into CFGs, detects
//! mitigation patterns, enumerates paths to candidate sinks, and turns the
//! result into findings under a cooperative time/size budget.

pub mod budget;
pub mod catalog;
pub mod cfg_builder;
pub mod detector;
pub mod finding_generator;
pub mod grammar;
pub mod path_analyzer;
pub mod pattern_validator;
pub mod types;

pub use budget::{classify_file, sort_files_by_priority, AnalysisBudget, BudgetStatus, FilePriority};
pub use catalog::{built_in_patterns, MitigationCatalog};
pub use cfg_builder::build_control_flow_graphs;
pub use detector::{detect_mitigations, with_discovery_chain};
pub use finding_generator::generate_finding;
pub use grammar::{parser_for, SourceLanguage};
pub use path_analyzer::{
    analyze, compute_dominators, enumerate_paths_to_sink, find_dead_code, has_cross_function_async,
    mitigation_dominates_sink, reachable_nodes, EnumerationLimits,
};
pub use pattern_validator::{is_pattern_accepted, score_pattern, validate_batch, RedosRisk, RedosScore, TimeoutRegex};
pub use types::{
    CfgEdge, CfgNode, Confidence, ControlFlowGraph, EdgeType, MatchDescriptor, MatchKind, MitigationInstance,
    MitigationPattern, MitigationScope, NodeId, NodeType, PathAnalysisResult, PathStatus, PotentialVulnerability,
    ReturnConstraint, SourceLocation,
};
