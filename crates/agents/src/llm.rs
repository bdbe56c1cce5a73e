//! Remote chat-completion agent: one logical agent spanning the three
//! provider transports (Anthropic, OpenAI, Azure OpenAI), picking whichever
//! the router resolved into the context. Spec §4.2.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;

use revrouter_core::json::{extract_single_json_object, parse_fenced_json};
use revrouter_core::model::{
    AgentContext, AgentMetrics, AgentResult, DiffFile, FailureStage, Finding, Provenance, Provider, Severity,
};
use revrouter_core::redact::PROVIDER_ENV_ALLOWLIST;
use revrouter_core::router::Agent;
use revrouter_provider::{ChatClient, ChatRequest};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a meticulous senior code reviewer. Find correctness bugs, security \
vulnerabilities, and maintainability problems in the diff you are given. Only report issues you are reasonably \
confident about; do not invent line numbers.";

const SUPPORTED_EXTENSIONS: &[&str] = &[
    "ts", "tsx", "js", "jsx", "mjs", "cjs", "py", "go", "rs", "java", "rb", "php", "c", "cc", "cpp", "h", "hpp", "cs",
    "kt", "swift",
];

const RESPONSE_SCHEMA: &str = r#"{
  "findings": [
    {
      "severity": "critical|high|medium|low",
      "file": "relative/path.ts",
      "line": 42,
      "endLine": 44,
      "message": "what is wrong",
      "suggestion": "how to fix it",
      "ruleId": "short-identifier"
    }
  ]
}"#;

fn is_supported(path: &str) -> bool {
    path.rsplit('.')
        .next()
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// Coarse token estimate (~4 chars/token) for prompts not yet sent, per
/// spec §4.2's "token estimate ... accompanies metrics".
fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64 / 4).max(1)
}

fn severity_from_label(label: &str) -> Severity {
    match label {
        "critical" | "high" => Severity::Error,
        "medium" => Severity::Warning,
        _ => Severity::Info,
    }
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
    end_line: Option<u32>,
    #[serde(default)]
    suggestion: Option<String>,
    #[serde(default)]
    rule_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    findings: Vec<RawFinding>,
}

fn build_user_prompt(context: &AgentContext) -> String {
    let mut prompt = String::from("Review this change set. Files touched:\n\n");
    for file in context.candidate_files() {
        prompt.push_str(&format!("- {} (+{} / -{})\n", file.path, file.additions, file.deletions));
    }
    prompt.push_str("\nUnified diff:\n```diff\n");
    prompt.push_str(&context.diff_content);
    prompt.push_str("\n```\n\nRespond with a single JSON object matching exactly this shape:\n");
    prompt.push_str(RESPONSE_SCHEMA);
    prompt
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn metrics_for(start: Instant, context: &AgentContext, tokens_used: Option<u64>) -> AgentMetrics {
    AgentMetrics {
        duration_ms: elapsed_ms(start),
        files_processed: context.files.len() as u32,
        tokens_used,
        estimated_cost_usd: None,
    }
}

/// Spans the three remote providers behind one `Agent` id; `supported_providers`
/// reports only the providers a client was actually registered for, so the
/// router's resolution step never picks one this instance can't serve.
pub struct LlmAgent {
    id: String,
    name: String,
    clients: HashMap<Provider, Arc<dyn ChatClient>>,
    providers: Vec<Provider>,
    system_prompt: String,
}

impl LlmAgent {
    pub fn new(clients: HashMap<Provider, Arc<dyn ChatClient>>) -> Self {
        let providers = clients.keys().copied().collect();
        Self {
            id: "llm".to_string(),
            name: "LLM reviewer".to_string(),
            clients,
            providers,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Overrides the built-in system prompt with a project template, per
    /// spec §4.2 ("loaded from a template file if present").
    pub fn with_system_prompt(mut self, system_prompt: String) -> Self {
        self.system_prompt = system_prompt;
        self
    }
}

#[async_trait]
impl Agent for LlmAgent {
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
        &self.providers
    }

    fn env_allowlist(&self) -> &[&'static str] {
        PROVIDER_ENV_ALLOWLIST
    }

    fn supports(&self, file: &DiffFile) -> bool {
        is_supported(&file.path)
    }

    async fn run(&self, context: AgentContext) -> AgentResult {
        let start = Instant::now();

        let Some(provider) = context.provider else {
            return AgentResult::Skipped {
                agent_id: self.id.clone(),
                reason: "no provider resolved".to_string(),
                metrics: metrics_for(start, &context, None),
            };
        };
        let Some(client) = self.clients.get(&provider) else {
            return AgentResult::Skipped {
                agent_id: self.id.clone(),
                reason: format!("no client registered for provider {}", provider.as_str()),
                metrics: metrics_for(start, &context, None),
            };
        };
        let Some(model) = context.effective_model.clone() else {
            return AgentResult::Failure {
                agent_id: self.id.clone(),
                error: "no effective model resolved".to_string(),
                failure_stage: FailureStage::Preflight,
                partial_findings: Vec::new(),
                metrics: metrics_for(start, &context, None),
            };
        };

        let user_prompt = build_user_prompt(&context);
        let token_estimate = estimate_tokens(&format!("{}{}", self.system_prompt, user_prompt));

        let request = ChatRequest {
            system_prompt: Some(self.system_prompt.clone()),
            user_prompt,
            model,
            max_tokens: Some(context.config.limits.max_completion_tokens),
            temperature: context.config.limits.temperature,
            json_response_format: matches!(provider, Provider::Openai | Provider::AzureOpenai),
        };

        let response = match client.chat(&request).await {
            Ok(response) => response,
            Err(err) => {
                return AgentResult::Failure {
                    agent_id: self.id.clone(),
                    error: err.to_string(),
                    failure_stage: FailureStage::Exec,
                    partial_findings: Vec::new(),
                    metrics: metrics_for(start, &context, Some(token_estimate)),
                };
            }
        };

        let tokens_used = response.tokens_used.or(Some(token_estimate));

        // Locating the first text item is transport-specific and already
        // handled in the provider crate; here we only strip fences a model
        // may have wrapped its JSON in, then fall back to the stricter
        // single-object scan.
        let parsed = parse_fenced_json(&response.text).or_else(|_| extract_single_json_object(&response.text));
        let parsed = match parsed {
            Ok(value) => value,
            Err(err) => {
                return AgentResult::Failure {
                    agent_id: self.id.clone(),
                    error: err.to_string(),
                    failure_stage: FailureStage::Postprocess,
                    partial_findings: Vec::new(),
                    metrics: metrics_for(start, &context, tokens_used),
                };
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
                    metrics: metrics_for(start, &context, tokens_used),
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
                    end_line: f.end_line,
                    suggestion: f.suggestion,
                    rule_id: f.rule_id,
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
            metrics: metrics_for(start, &context, tokens_used),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use revrouter_core::model::DiffStatus;
    use revrouter_provider::{ChatResponse, ProviderError};
    use std::collections::HashMap as StdHashMap;

    struct StubClient {
        reply: String,
    }

    #[async_trait]
    impl ChatClient for StubClient {
        async fn chat(&self, _request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                text: self.reply.clone(),
                tokens_used: Some(42),
            })
        }
    }

    fn context(provider: Option<Provider>, model: Option<&str>) -> AgentContext {
        AgentContext {
            repo_path: std::path::PathBuf::from("/repo"),
            files: vec![DiffFile {
                path: "a.ts".to_string(),
                status: DiffStatus::Modified,
                additions: 3,
                deletions: 1,
            }],
            diff_content: "diff --git a/a.ts b/a.ts\n+const x = 1;\n".to_string(),
            config: revrouter_config::Config::default(),
            env: StdHashMap::new(),
            effective_model: model.map(|m| m.to_string()),
            provider,
        }
    }

    fn agent(reply: &str) -> LlmAgent {
        let mut clients: HashMap<Provider, Arc<dyn ChatClient>> = HashMap::new();
        clients.insert(
            Provider::Anthropic,
            Arc::new(StubClient {
                reply: reply.to_string(),
            }),
        );
        LlmAgent::new(clients)
    }

    #[tokio::test]
    async fn successful_response_yields_findings_with_mapped_severity() {
        let reply = r#"{"findings":[{"severity":"critical","file":"a.ts","line":3,"message":"sql injection"}]}"#;
        let result = agent(reply).run(context(Some(Provider::Anthropic), Some("claude-x"))).await;
        match result {
            AgentResult::Success { findings, .. } => {
                assert_eq!(findings.len(), 1);
                assert_eq!(findings[0].severity, Severity::Error);
                assert!(findings[0].fingerprint.is_some());
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fenced_json_is_stripped_before_parsing() {
        let reply = "```json\n{\"findings\":[{\"severity\":\"medium\",\"file\":\"a.ts\",\"message\":\"m\"}]}\n```";
        let result = agent(reply).run(context(Some(Provider::Anthropic), Some("claude-x"))).await;
        match result {
            AgentResult::Success { findings, .. } => {
                assert_eq!(findings[0].severity, Severity::Warning);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unparseable_response_fails_at_postprocess() {
        let result = agent("not json").run(context(Some(Provider::Anthropic), Some("claude-x"))).await;
        match result {
            AgentResult::Failure { failure_stage, .. } => assert_eq!(failure_stage, FailureStage::Postprocess),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_provider_is_skipped_not_failed() {
        let result = agent("{}").run(context(None, Some("claude-x"))).await;
        assert!(matches!(result, AgentResult::Skipped { .. }));
    }

    #[tokio::test]
    async fn unresolved_provider_client_is_skipped() {
        let result = agent("{}").run(context(Some(Provider::Openai), Some("gpt-x"))).await;
        assert!(matches!(result, AgentResult::Skipped { .. }));
    }
}
