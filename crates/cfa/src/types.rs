//! Shared data model for the control-flow analysis engine: the CFG itself,
//! mitigation catalog entries and instances, and path-analysis results.
//! Spec §3, §4.4.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Entry,
    Exit,
    Basic,
    Branch,
    Merge,
    LoopHeader,
    LoopBody,
    Throw,
    Await,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Flow,
    BranchTrue,
    BranchFalse,
    LoopBack,
    LoopExit,
    Exception,
    Return,
}

pub type NodeId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CfgNode {
    pub id: NodeId,
    pub node_type: NodeType,
    pub line_start: u32,
    pub line_end: u32,
    #[serde(default)]
    pub mitigations: Vec<MitigationInstance>,
    #[serde(default)]
    pub is_async_boundary: bool,
    /// Call sites recorded inside this basic block, used by the async
    /// cross-function check (spec §4.4.3).
    #[serde(default)]
    pub call_sites: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CfgEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub edge_type: EdgeType,
}

/// Per-function control-flow graph. Entry is unique; exits may be multiple
/// (early returns, throws, natural end).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlFlowGraph {
    pub function_id: String,
    pub nodes: HashMap<NodeId, CfgNode>,
    pub edges: Vec<CfgEdge>,
    pub entry: NodeId,
    pub exits: Vec<NodeId>,
    pub is_async: bool,
    pub await_boundaries: Vec<NodeId>,
}

impl ControlFlowGraph {
    pub fn successors(&self, id: &str) -> Vec<&CfgEdge> {
        self.edges.iter().filter(|e| e.from == id).collect()
    }

    pub fn predecessors(&self, id: &str) -> Vec<&CfgEdge> {
        self.edges.iter().filter(|e| e.to == id).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    FunctionCall,
    MethodCall,
    TypeofCheck,
    InstanceofCheck,
    TypeGuard,
    OptionalChaining,
    NullishCoalescing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnConstraint {
    Truthy,
    Falsy,
    Any,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchDescriptor {
    pub kind: MatchKind,
    pub module: Option<String>,
    pub name: Option<String>,
    pub name_pattern: Option<String>,
    pub return_constraint: ReturnConstraint,
    #[serde(default)]
    pub parameters: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MitigationPattern {
    pub id: String,
    pub name: String,
    pub description: String,
    pub mitigates: Vec<String>,
    pub r#match: MatchDescriptor,
    pub confidence: Confidence,
    pub is_built_in: bool,
    pub deprecated: bool,
    pub deprecation_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MitigationScope {
    Function,
    Block,
    Module,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MitigationInstance {
    pub pattern_id: String,
    pub location: SourceLocation,
    #[serde(default)]
    pub protected_variables: Vec<String>,
    pub scope: MitigationScope,
    pub confidence: Confidence,
    #[serde(default)]
    pub call_chain: Vec<String>,
    pub discovery_depth: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathStatus {
    None,
    Partial,
    Full,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathAnalysisResult {
    pub vulnerability_type: String,
    pub sink_node_id: NodeId,
    pub paths_to_sink: Vec<Vec<NodeId>>,
    pub mitigated_paths: Vec<Vec<NodeId>>,
    pub unmitigated_paths: Vec<Vec<NodeId>>,
    pub status: PathStatus,
    pub coverage_percent: u32,
    pub degraded: bool,
    pub degraded_reason: Option<String>,
}

/// A potential vulnerability fed into the finding generator, spec §4.4.4.
#[derive(Debug, Clone)]
pub struct PotentialVulnerability {
    pub id: String,
    pub vuln_type: String,
    pub sink_location: SourceLocation,
    pub affected_variable: String,
    pub required_mitigations: Vec<String>,
    pub description: String,
}
