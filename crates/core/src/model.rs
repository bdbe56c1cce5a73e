use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use revrouter_config::Config;

/// Severity, totally ordered `error < warning < info` for sort precedence
/// (lower variant value sorts first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    /// One-level downgrade, clamped at `info`.
    pub fn downgrade_one(self) -> Severity {
        match self {
            Severity::Error => Severity::Warning,
            Severity::Warning => Severity::Info,
            Severity::Info => Severity::Info,
        }
    }

    pub fn downgrade(self, levels: u8) -> Severity {
        let mut s = self;
        for _ in 0..levels {
            s = s.downgrade_one();
        }
        s
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Complete,
    Partial,
}

impl Default for Provenance {
    fn default() -> Self {
        Provenance::Complete
    }
}

/// The canonical record an agent emits; every higher component produces or
/// transforms these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub severity: Severity,
    pub file: String,
    pub message: String,
    pub source_agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub provenance: Provenance,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Finding {
    /// `endLine >= line` when both present; `file`/`message`/`sourceAgent`
    /// non-empty.
    pub fn is_valid(&self) -> bool {
        if self.file.is_empty() || self.message.is_empty() || self.source_agent.is_empty() {
            return false;
        }
        if let (Some(line), Some(end_line)) = (self.line, self.end_line) {
            if end_line < line {
                return false;
            }
        }
        true
    }

    /// 16-hex stable hash of `file|line|message|ruleId`, used for cross-agent
    /// dedupe. Computed once and stored on the finding.
    pub fn compute_fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        let line_part = self.line.map(|l| l.to_string()).unwrap_or_default();
        let rule_part = self.rule_id.as_deref().unwrap_or("");
        let input = format!("{}|{}|{}|{}", self.file, line_part, self.message, rule_part);
        let digest = Sha256::digest(input.as_bytes());
        hex::encode(&digest[..8])
    }

    pub fn with_fingerprint(mut self) -> Self {
        self.fingerprint = Some(self.compute_fingerprint());
        self
    }
}

/// Runtime metrics for a single agent run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetrics {
    pub duration_ms: u64,
    pub files_processed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cost_usd: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Preflight,
    Exec,
    Postprocess,
}

/// Schema version accompanying `AgentResult`; a bump invalidates cached
/// entries. Open Question (b): a proper tagged enum replaces the source's
/// boolean-`success` shape, schema bumped to v2.
pub const AGENT_RESULT_SCHEMA_VERSION: u32 = 2;

/// Discriminated union of agent outcomes. Variants are mutually exclusive;
/// no other field combination is permitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AgentResult {
    Success {
        agent_id: String,
        findings: Vec<Finding>,
        metrics: AgentMetrics,
    },
    Failure {
        agent_id: String,
        error: String,
        failure_stage: FailureStage,
        #[serde(default)]
        partial_findings: Vec<Finding>,
        metrics: AgentMetrics,
    },
    Skipped {
        agent_id: String,
        reason: String,
        metrics: AgentMetrics,
    },
}

impl AgentResult {
    pub fn agent_id(&self) -> &str {
        match self {
            AgentResult::Success { agent_id, .. } => agent_id,
            AgentResult::Failure { agent_id, .. } => agent_id,
            AgentResult::Skipped { agent_id, .. } => agent_id,
        }
    }

    pub fn metrics(&self) -> &AgentMetrics {
        match self {
            AgentResult::Success { metrics, .. } => metrics,
            AgentResult::Failure { metrics, .. } => metrics,
            AgentResult::Skipped { metrics, .. } => metrics,
        }
    }

    /// Findings this result contributes to the merge step, with
    /// `provenance=partial` stamped on failure-path findings per spec §4.1
    /// step 5 and §7.
    pub fn contributed_findings(&self) -> Vec<Finding> {
        match self {
            AgentResult::Success { findings, .. } => findings.clone(),
            AgentResult::Failure {
                partial_findings, ..
            } => partial_findings
                .iter()
                .cloned()
                .map(|mut f| {
                    f.provenance = Provenance::Partial;
                    f
                })
                .collect(),
            AgentResult::Skipped { .. } => Vec::new(),
        }
    }

    /// A synthesized `failure{failureStage=exec}` result, used by the router
    /// when an agent task panics.
    pub fn synthesized_panic(agent_id: impl Into<String>, message: impl Into<String>) -> Self {
        AgentResult::Failure {
            agent_id: agent_id.into(),
            error: message.into(),
            failure_stage: FailureStage::Exec,
            partial_findings: Vec::new(),
            metrics: AgentMetrics::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffStatus {
    Added,
    Modified,
    Renamed,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffFile {
    pub path: String,
    pub status: DiffStatus,
    pub additions: u32,
    pub deletions: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    Anthropic,
    Openai,
    AzureOpenai,
    Ollama,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::Openai => "openai",
            Provider::AzureOpenai => "azure-openai",
            Provider::Ollama => "ollama",
        }
    }
}

/// Inputs to a single agent run. Agents MUST use `effective_model`/
/// `provider` as resolved by the router; no agent re-resolves providers.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub repo_path: std::path::PathBuf,
    pub files: Vec<DiffFile>,
    pub diff_content: String,
    pub config: Config,
    pub env: HashMap<String, String>,
    pub effective_model: Option<String>,
    pub provider: Option<Provider>,
}

impl AgentContext {
    /// Files this run should consider: deleted files are always excluded,
    /// per spec §3's `DiffFile` invariant, regardless of an agent's own
    /// `supports` predicate.
    pub fn candidate_files(&self) -> impl Iterator<Item = &DiffFile> {
        self.files.iter().filter(|f| f.status != DiffStatus::Deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(file: &str, line: Option<u32>, end_line: Option<u32>) -> Finding {
        Finding {
            severity: Severity::Warning,
            file: file.to_string(),
            message: "msg".to_string(),
            source_agent: "test".to_string(),
            line,
            end_line,
            suggestion: None,
            rule_id: None,
            fingerprint: None,
            provenance: Provenance::Complete,
            metadata: serde_json::Map::new(),
        }
    }

    #[test]
    fn severity_orders_error_first() {
        assert!(Severity::Error < Severity::Warning);
        assert!(Severity::Warning < Severity::Info);
    }

    #[test]
    fn end_line_before_line_is_invalid() {
        let f = finding("a.ts", Some(10), Some(5));
        assert!(!f.is_valid());
    }

    #[test]
    fn empty_required_fields_are_invalid() {
        let f = finding("", None, None);
        assert!(!f.is_valid());
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let f = finding("a.ts", Some(3), None);
        let a = f.clone().with_fingerprint();
        let b = f.with_fingerprint();
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.fingerprint.unwrap().len(), 16);
    }

    #[test]
    fn failure_partial_findings_marked_partial() {
        let result = AgentResult::Failure {
            agent_id: "semgrep".into(),
            error: "boom".into(),
            failure_stage: FailureStage::Exec,
            partial_findings: vec![finding("a.ts", None, None)],
            metrics: AgentMetrics::default(),
        };
        let contributed = result.contributed_findings();
        assert_eq!(contributed.len(), 1);
        assert_eq!(contributed[0].provenance, Provenance::Partial);
    }

    #[test]
    fn skipped_contributes_nothing() {
        let result = AgentResult::Skipped {
            agent_id: "ollama".into(),
            reason: "no key".into(),
            metrics: AgentMetrics::default(),
        };
        assert!(result.contributed_findings().is_empty());
    }
}
