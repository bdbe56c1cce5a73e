//! Local LLM agent: a stricter, deterministic, air-gapped alternative to
//! the remote providers. Spec §4.3.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;

use revrouter_core::json::extract_single_json_object;
use revrouter_core::model::{
    AgentContext, AgentMetrics, AgentResult, DiffFile, FailureStage, Finding, Provenance, Provider, Severity,
};
use revrouter_core::redact::{redact_secrets, OLLAMA_ENV_ALLOWLIST};
use revrouter_core::router::Agent;
use revrouter_provider::ollama::{GenerateOptions, OllamaClient, OllamaError};

const MAX_FILES: usize = 50;
const MAX_DIFF_LINES: usize = 2000;
const MAX_TOKENS: u64 = 8192;
const MAX_FINDINGS: usize = 200;
const REPAIR_BUDGET_FLOOR: Duration = Duration::from_secs(30);

const SUPPORTED_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs", "py", "go", "rs"];

const RESPONSE_SCHEMA: &str = r#"{"findings":[{"severity":"critical|high|medium|low","file":"path","line":1,"message":"m","ruleId":"id"}]}"#;

fn is_supported(path: &str) -> bool {
    path.rsplit('.')
        .next()
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

fn severity_from_label(label: &str) -> Severity {
    match label {
        "critical" | "high" => Severity::Error,
        "medium" => Severity::Warning,
        _ => Severity::Info,
    }
}

fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64 / 4).max(1)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFinding {
    severity: String,
    file: String,
    message: String,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    rule_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    findings: Vec<RawFinding>,
}

/// Retains only the diff hunks belonging to `keep_paths`, using `diff --git
/// a/X b/Y` / `+++ b/Y` headers as boundaries (spec §4.3 step 3).
fn filter_diff_to_paths(diff: &str, keep_paths: &[&str]) -> String {
    let mut out = String::new();
    let mut keeping = false;
    for line in diff.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            keeping = keep_paths.iter().any(|p| rest.contains(p));
        }
        if keeping {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

fn truncate_diff_lines(diff: &str) -> String {
    let lines: Vec<&str> = diff.lines().collect();
    if lines.len() <= MAX_DIFF_LINES {
        return diff.to_string();
    }
    let mut truncated = lines[..MAX_DIFF_LINES].join("\n");
    truncated.push_str("\n… diff truncated …\n");
    truncated
}

fn build_prompt(files: &[&DiffFile], diff: &str, omitted_count: usize) -> String {
    let mut prompt = String::from("Review this change set. Files touched:\n\n");
    for file in files {
        prompt.push_str(&format!("- {} (+{} / -{})\n", file.path, file.additions, file.deletions));
    }
    if omitted_count > 0 {
        prompt.push_str(&format!("… {omitted_count} files omitted …\n"));
    }
    prompt.push_str("\nUnified diff:\n```diff\n");
    prompt.push_str(diff);
    prompt.push_str("\n```\n\nRespond with a single JSON object matching exactly this shape:\n");
    prompt.push_str(RESPONSE_SCHEMA);
    prompt
}

fn repair_prompt(raw_text: &str) -> String {
    format!(
        "Your previous response could not be parsed as JSON. Here is what you sent:\n\n{raw_text}\n\n\
Respond again with ONLY a single JSON object, no prose, no code fences, matching exactly this shape:\n{RESPONSE_SCHEMA}"
    )
}

fn sort_and_dedupe(mut findings: Vec<Finding>) -> Vec<Finding> {
    findings.sort_by(|a, b| {
        a.severity
            .cmp(&b.severity)
            .then_with(|| a.file.cmp(&b.file))
            .then_with(|| a.line.cmp(&b.line))
            .then_with(|| a.rule_id.cmp(&b.rule_id))
    });
    let mut seen = std::collections::HashSet::new();
    findings.retain(|f| {
        let key = format!("{}:{}:{}", f.file, f.line.map(|l| l.to_string()).unwrap_or_default(), f.message);
        seen.insert(key)
    });
    findings.truncate(MAX_FINDINGS);
    findings
}

pub struct OllamaAgent {
    id: String,
    name: String,
    client: OllamaClient,
}

impl OllamaAgent {
    pub fn new(base_url: String) -> Self {
        Self {
            id: "ollama".to_string(),
            name: "Local LLM reviewer".to_string(),
            client: OllamaClient::new(base_url),
        }
    }

    fn options(&self, context: &AgentContext, model: &str, budget: Duration) -> GenerateOptions {
        let num_ctx = context
            .env
            .get("LOCAL_LLM_NUM_CTX")
            .and_then(|v| v.parse().ok());
        let num_predict = context
            .env
            .get("LOCAL_LLM_NUM_PREDICT")
            .and_then(|v| v.parse().ok());
        GenerateOptions {
            model: model.to_string(),
            num_ctx,
            num_predict,
            timeout: budget,
        }
    }
}

#[async_trait]
impl Agent for OllamaAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn uses_llm(&self) -> bool {
        true
    }

    fn supported_providers(&self) -> &[Provider] {
        &[Provider::Ollama]
    }

    fn env_allowlist(&self) -> &[&'static str] {
        OLLAMA_ENV_ALLOWLIST
    }

    fn supports(&self, file: &DiffFile) -> bool {
        is_supported(&file.path)
    }

    async fn run(&self, context: AgentContext) -> AgentResult {
        let start = Instant::now();
        let model = context.effective_model.clone().unwrap_or_else(|| "llama3".to_string());
        let total_budget = context
            .env
            .get("LOCAL_LLM_TIMEOUT")
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(10 * 60));
        let local_llm_optional = context
            .env
            .get("LOCAL_LLM_OPTIONAL")
            .map(|v| v == "true")
            .unwrap_or(false);

        if let Err(err) = self.client.warm_up(&model).await {
            match err {
                OllamaError::Connection(reason) => {
                    if local_llm_optional {
                        return AgentResult::Skipped {
                            agent_id: self.id.clone(),
                            reason: format!("local LLM endpoint unavailable: {reason}"),
                            metrics: AgentMetrics {
                                duration_ms: start.elapsed().as_millis() as u64,
                                ..Default::default()
                            },
                        };
                    }
                    return AgentResult::Failure {
                        agent_id: self.id.clone(),
                        error: format!("local LLM endpoint unavailable: {reason}"),
                        failure_stage: FailureStage::Preflight,
                        partial_findings: Vec::new(),
                        metrics: AgentMetrics {
                            duration_ms: start.elapsed().as_millis() as u64,
                            ..Default::default()
                        },
                    };
                }
                other => {
                    tracing::warn!(error = %other, "ollama warm-up failed, proceeding anyway");
                }
            }
        }

        // Step 1: sort files by path.
        let mut files: Vec<&DiffFile> = context.candidate_files().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));

        // Step 2: redact secrets from the diff text.
        let redacted_diff = redact_secrets(&context.diff_content);

        // Step 3: truncate file count, filtering the diff to retained paths.
        let mut diff = redacted_diff;
        let mut omitted_files = 0usize;
        if files.len() > MAX_FILES {
            omitted_files = files.len() - MAX_FILES;
            files.truncate(MAX_FILES);
            let keep_paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
            diff = filter_diff_to_paths(&diff, &keep_paths);
        }

        // Step 4: truncate diff line count.
        diff = truncate_diff_lines(&diff);

        // Step 5: preflight token check.
        let prompt = build_prompt(&files, &diff, omitted_files);
        let token_estimate = estimate_tokens(&prompt);
        if token_estimate > MAX_TOKENS {
            return AgentResult::Failure {
                agent_id: self.id.clone(),
                error: format!("estimated prompt tokens {token_estimate} exceeds preflight cap {MAX_TOKENS}"),
                failure_stage: FailureStage::Preflight,
                partial_findings: Vec::new(),
                metrics: AgentMetrics {
                    duration_ms: start.elapsed().as_millis() as u64,
                    files_processed: files.len() as u32,
                    tokens_used: Some(token_estimate),
                    estimated_cost_usd: None,
                },
            };
        }

        let options = self.options(&context, &model, total_budget);
        let generated = self.client.generate(&prompt, &options).await;

        let raw_text = match generated {
            Ok(text) => text,
            Err(err) => {
                return AgentResult::Failure {
                    agent_id: self.id.clone(),
                    error: err.to_string(),
                    failure_stage: FailureStage::Exec,
                    partial_findings: Vec::new(),
                    metrics: AgentMetrics {
                        duration_ms: start.elapsed().as_millis() as u64,
                        files_processed: files.len() as u32,
                        tokens_used: Some(token_estimate),
                        estimated_cost_usd: None,
                    },
                };
            }
        };

        let parsed = match extract_single_json_object(&raw_text) {
            Ok(value) => value,
            Err(first_err) => {
                let remaining = total_budget.saturating_sub(start.elapsed());
                if remaining < REPAIR_BUDGET_FLOOR {
                    return AgentResult::Failure {
                        agent_id: self.id.clone(),
                        error: first_err.to_string(),
                        failure_stage: FailureStage::Postprocess,
                        partial_findings: Vec::new(),
                        metrics: AgentMetrics {
                            duration_ms: start.elapsed().as_millis() as u64,
                            files_processed: files.len() as u32,
                            tokens_used: Some(token_estimate),
                            estimated_cost_usd: None,
                        },
                    };
                }
                let repair_options = self.options(&context, &model, remaining);
                match self
                    .client
                    .generate(&repair_prompt(&raw_text), &repair_options)
                    .await
                    .map_err(|e| e.to_string())
                    .and_then(|repaired| extract_single_json_object(&repaired).map_err(|e| e.to_string()))
                {
                    Ok(value) => value,
                    Err(repair_err) => {
                        return AgentResult::Failure {
                            agent_id: self.id.clone(),
                            error: format!("repair attempt failed: {repair_err}"),
                            failure_stage: FailureStage::Postprocess,
                            partial_findings: Vec::new(),
                            metrics: AgentMetrics {
                                duration_ms: start.elapsed().as_millis() as u64,
                                files_processed: files.len() as u32,
                                tokens_used: Some(token_estimate),
                                estimated_cost_usd: None,
                            },
                        };
                    }
                }
            }
        };

        let raw: RawResponse = match serde_json::from_value(parsed) {
            Ok(raw) => raw,
            Err(err) => {
                return AgentResult::Failure {
                    agent_id: self.id.clone(),
                    error: format!("response did not match the expected findings schema: {err}"),
                    failure_stage: FailureStage::Postprocess,
                    partial_findings: Vec::new(),
                    metrics: AgentMetrics {
                        duration_ms: start.elapsed().as_millis() as u64,
                        files_processed: files.len() as u32,
                        tokens_used: Some(token_estimate),
                        estimated_cost_usd: None,
                    },
                };
            }
        };

        let findings: Vec<Finding> = raw
            .findings
            .into_iter()
            .map(|f| {
                Finding {
                    severity: severity_from_label(&f.severity),
                    file: f.file,
                    message: f.message,
                    source_agent: self.id.clone(),
                    line: f.line,
                    end_line: None,
                    suggestion: None,
                    rule_id: f.rule_id,
                    fingerprint: None,
                    provenance: Provenance::Complete,
                    metadata: serde_json::Map::new(),
                }
                .with_fingerprint()
            })
            .filter(Finding::is_valid)
            .collect();
        let findings = sort_and_dedupe(findings);

        AgentResult::Success {
            agent_id: self.id.clone(),
            findings,
            metrics: AgentMetrics {
                duration_ms: start.elapsed().as_millis() as u64,
                files_processed: files.len() as u32,
                tokens_used: Some(token_estimate),
                estimated_cost_usd: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_diff_keeps_only_matching_hunks() {
        let diff = "diff --git a/a.ts b/a.ts\n+++ b/a.ts\n+1\ndiff --git a/b.ts b/b.ts\n+++ b/b.ts\n+2\n";
        let filtered = filter_diff_to_paths(diff, &["a.ts"]);
        assert!(filtered.contains("a.ts"));
        assert!(!filtered.contains("b.ts"));
    }

    #[test]
    fn truncate_appends_marker_past_line_cap() {
        let diff = (0..MAX_DIFF_LINES + 10).map(|i| format!("line{i}")).collect::<Vec<_>>().join("\n");
        let truncated = truncate_diff_lines(&diff);
        assert!(truncated.contains("diff truncated"));
        assert!(truncated.lines().count() <= MAX_DIFF_LINES + 1);
    }

    #[test]
    fn sort_and_dedupe_collapses_identical_file_line_message() {
        let f = |sev, file: &str, line, msg: &str| Finding {
            severity: sev,
            file: file.to_string(),
            message: msg.to_string(),
            source_agent: "ollama".to_string(),
            line: Some(line),
            end_line: None,
            suggestion: None,
            rule_id: None,
            fingerprint: None,
            provenance: Provenance::Complete,
            metadata: serde_json::Map::new(),
        };
        let findings = vec![
            f(Severity::Warning, "a.ts", 1, "dup"),
            f(Severity::Warning, "a.ts", 1, "dup"),
            f(Severity::Error, "b.ts", 2, "other"),
        ];
        let result = sort_and_dedupe(findings);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].file, "b.ts");
    }
}
