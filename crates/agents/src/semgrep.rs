//! Static-analysis agent wrapping the `semgrep` CLI as a subprocess. No
//! LLM involved; provider-agnostic.

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use revrouter_core::model::{
    AgentContext, AgentMetrics, AgentResult, DiffFile, FailureStage, Finding, Provenance, Provider, Severity,
};
use revrouter_core::router::Agent;

const SUPPORTED_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs", "py", "go", "rb", "java"];

fn is_supported(path: &str) -> bool {
    path.rsplit('.')
        .next()
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

fn severity_from_semgrep(severity: &str) -> Severity {
    match severity.to_ascii_uppercase().as_str() {
        "ERROR" => Severity::Error,
        "WARNING" => Severity::Warning,
        _ => Severity::Info,
    }
}

#[derive(Debug, Deserialize)]
struct SemgrepStart {
    line: u32,
}

#[derive(Debug, Deserialize)]
struct SemgrepEnd {
    line: u32,
}

#[derive(Debug, Deserialize)]
struct SemgrepExtra {
    message: String,
    severity: String,
}

#[derive(Debug, Deserialize)]
struct SemgrepResultItem {
    path: String,
    start: SemgrepStart,
    end: SemgrepEnd,
    #[serde(rename = "check_id")]
    check_id: String,
    extra: SemgrepExtra,
}

#[derive(Debug, Deserialize)]
struct SemgrepOutput {
    #[serde(default)]
    results: Vec<SemgrepResultItem>,
}

pub struct SemgrepAgent {
    id: String,
    name: String,
    binary: String,
    config: String,
}

impl SemgrepAgent {
    pub fn new() -> Self {
        Self {
            id: "semgrep".to_string(),
            name: "Semgrep static analyzer".to_string(),
            binary: "semgrep".to_string(),
            config: "auto".to_string(),
        }
    }

    pub fn with_binary(mut self, binary: String) -> Self {
        self.binary = binary;
        self
    }

    pub fn with_config(mut self, config: String) -> Self {
        self.config = config;
        self
    }
}

impl Default for SemgrepAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for SemgrepAgent {
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
        let files: Vec<&DiffFile> = context.candidate_files().collect();

        let mut command = Command::new(&self.binary);
        command
            .arg("--config")
            .arg(&self.config)
            .arg("--json")
            .arg("--quiet")
            .current_dir(&context.repo_path)
            .env_clear();
        for file in &files {
            command.arg(&file.path);
        }
        for (key, value) in &context.env {
            command.env(key, value);
        }

        let output = match command.output().await {
            Ok(output) => output,
            Err(err) => {
                let stage = if err.kind() == std::io::ErrorKind::NotFound {
                    FailureStage::Preflight
                } else {
                    FailureStage::Exec
                };
                return AgentResult::Failure {
                    agent_id: self.id.clone(),
                    error: format!("failed to launch {}: {err}", self.binary),
                    failure_stage: stage,
                    partial_findings: Vec::new(),
                    metrics: AgentMetrics {
                        duration_ms: start.elapsed().as_millis() as u64,
                        files_processed: files.len() as u32,
                        tokens_used: None,
                        estimated_cost_usd: None,
                    },
                };
            }
        };

        // semgrep exits non-zero when findings are reported; only treat it
        // as a real failure when there's no JSON on stdout to parse.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: SemgrepOutput = match serde_json::from_str(&stdout) {
            Ok(parsed) => parsed,
            Err(err) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return AgentResult::Failure {
                    agent_id: self.id.clone(),
                    error: format!("failed to parse semgrep output: {err}; stderr: {stderr}"),
                    failure_stage: FailureStage::Postprocess,
                    partial_findings: Vec::new(),
                    metrics: AgentMetrics {
                        duration_ms: start.elapsed().as_millis() as u64,
                        files_processed: files.len() as u32,
                        tokens_used: None,
                        estimated_cost_usd: None,
                    },
                };
            }
        };

        let findings: Vec<Finding> = parsed
            .results
            .into_iter()
            .map(|item| {
                Finding {
                    severity: severity_from_semgrep(&item.extra.severity),
                    file: item.path,
                    message: item.extra.message,
                    source_agent: self.id.clone(),
                    line: Some(item.start.line),
                    end_line: Some(item.end.line),
                    suggestion: None,
                    rule_id: Some(item.check_id),
                    fingerprint: None,
                    provenance: Provenance::Complete,
                    metadata: serde_json::Map::new(),
                }
                .with_fingerprint()
            })
            .filter(Finding::is_valid)
            .collect();

        AgentResult::Success {
            agent_id: self.id.clone(),
            findings,
            metrics: AgentMetrics {
                duration_ms: start.elapsed().as_millis() as u64,
                files_processed: files.len() as u32,
                tokens_used: None,
                estimated_cost_usd: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_semgrep_error_severity_to_core_error() {
        assert_eq!(severity_from_semgrep("ERROR"), Severity::Error);
        assert_eq!(severity_from_semgrep("WARNING"), Severity::Warning);
        assert_eq!(severity_from_semgrep("INFO"), Severity::Info);
    }

    #[test]
    fn parses_minimal_semgrep_json_shape() {
        let raw = r#"{"results":[{"path":"a.py","start":{"line":1},"end":{"line":1},"check_id":"python.lang.security.x","extra":{"message":"m","severity":"ERROR"}}]}"#;
        let parsed: SemgrepOutput = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.results.len(), 1);
        assert_eq!(parsed.results[0].check_id, "python.lang.security.x");
    }
}
