//! The orchestrator: resolves provider/model, scopes each agent's
//! environment, runs agents concurrently, and merges/dedupes their
//! findings. Spec §4.1, §5.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use revrouter_config::Config;

use crate::model::{AgentContext, AgentMetrics, AgentResult, DiffFile, Provider};
use crate::redact::build_agent_env;
use crate::summary::{AgentOutcome, AgentSummary, RunSummary};

/// Default global cap on the merged finding set, applied after sort.
pub const DEFAULT_FINDING_CAP: usize = 200;

/// The contract every agent conforms to (spec §6). `run` must never let an
/// exception escape — all failures resolve to `AgentResult::Failure`.
#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn uses_llm(&self) -> bool;

    /// Providers this agent can use, in the priority order the router
    /// should consider them. Empty for agents that are provider-agnostic
    /// (semgrep, control-flow).
    fn supported_providers(&self) -> &[Provider] {
        &[]
    }

    /// Extra environment variable names (beyond the common allowlist) this
    /// agent's environment needs.
    fn env_allowlist(&self) -> &[&'static str] {
        &[]
    }

    fn supports(&self, file: &DiffFile) -> bool;

    async fn run(&self, context: AgentContext) -> AgentResult;
}

const COMMON_ENV_ALLOWLIST: &[&str] = &["PATH", "HOME"];

fn credential_present(provider: Provider, env: &HashMap<String, String>) -> bool {
    match provider {
        Provider::Anthropic => env.contains_key("ANTHROPIC_API_KEY"),
        Provider::Openai => env.contains_key("OPENAI_API_KEY"),
        Provider::AzureOpenai => {
            env.contains_key("AZURE_OPENAI_API_KEY")
                && env.contains_key("AZURE_OPENAI_ENDPOINT")
                && env.contains_key("AZURE_OPENAI_DEPLOYMENT")
        }
        // Ollama is a local endpoint: it needs no API-key credential. Its
        // own preflight warm-up is responsible for failing closed if the
        // server is actually unreachable (spec §4.3).
        Provider::Ollama => true,
    }
}

/// Provider/model resolution, spec §4.1 step 1: explicit `MODEL` env wins
/// over the config default; provider is chosen by key presence with fixed
/// priority Anthropic > OpenAI > Azure OpenAI > Ollama, filtered to
/// providers at least one registered agent declares support for.
pub fn resolve_provider_and_model(
    env: &HashMap<String, String>,
    config: &Config,
    agents: &[Arc<dyn Agent>],
) -> (Option<Provider>, Option<String>) {
    let effective_model = env
        .get("MODEL")
        .cloned()
        .or_else(|| config.provider.default_model.clone());

    let supported: HashSet<Provider> = agents
        .iter()
        .flat_map(|a| a.supported_providers().iter().copied())
        .collect();

    const PRIORITY: [Provider; 4] = [
        Provider::Anthropic,
        Provider::Openai,
        Provider::AzureOpenai,
        Provider::Ollama,
    ];

    let provider = PRIORITY
        .into_iter()
        .find(|p| supported.contains(p) && credential_present(*p, env));

    (provider, effective_model)
}

pub struct Router {
    config: Config,
    process_env: HashMap<String, String>,
    home: String,
    finding_cap: usize,
}

impl Router {
    pub fn new(config: Config, process_env: HashMap<String, String>, home: String) -> Self {
        Self {
            config,
            process_env,
            home,
            finding_cap: DEFAULT_FINDING_CAP,
        }
    }

    pub fn with_finding_cap(mut self, cap: usize) -> Self {
        self.finding_cap = cap;
        self
    }

    fn build_context(
        &self,
        agent: &dyn Agent,
        repo_path: &std::path::Path,
        files: &[DiffFile],
        diff_content: &str,
        provider: Option<Provider>,
        effective_model: Option<String>,
    ) -> AgentContext {
        let env = build_agent_env(
            &self.process_env,
            COMMON_ENV_ALLOWLIST,
            agent.env_allowlist(),
            &self.home,
        );
        AgentContext {
            repo_path: repo_path.to_path_buf(),
            files: files.to_vec(),
            diff_content: diff_content.to_string(),
            config: self.config.clone(),
            env,
            effective_model,
            provider,
        }
    }

    /// Run the full fleet concurrently and return the merged, deduplicated
    /// report plus a per-agent summary.
    pub async fn run(
        &self,
        repo_path: &std::path::Path,
        files: &[DiffFile],
        diff_content: &str,
        agents: Vec<Arc<dyn Agent>>,
    ) -> RunSummary {
        let (provider, effective_model) =
            resolve_provider_and_model(&self.process_env, &self.config, &agents);

        let mut join_set = tokio::task::JoinSet::new();

        for agent in agents {
            let supported_files: Vec<DiffFile> = files
                .iter()
                .filter(|f| f.status != crate::model::DiffStatus::Deleted && agent.supports(f))
                .cloned()
                .collect();

            let agent_id = agent.id().to_string();
            let timeout_ms = self.config.agents.for_agent(&agent_id);

            if supported_files.is_empty() {
                join_set.spawn(async move {
                    AgentResult::Skipped {
                        agent_id,
                        reason: "no supported files".to_string(),
                        metrics: AgentMetrics::default(),
                    }
                });
                continue;
            }

            let context = self.build_context(
                agent.as_ref(),
                repo_path,
                &supported_files,
                diff_content,
                provider,
                effective_model.clone(),
            );

            join_set.spawn(async move {
                match tokio::time::timeout(Duration::from_millis(timeout_ms), agent.run(context))
                    .await
                {
                    Ok(result) => result,
                    Err(_elapsed) => AgentResult::Failure {
                        agent_id,
                        error: "timeout".to_string(),
                        failure_stage: crate::model::FailureStage::Exec,
                        partial_findings: Vec::new(),
                        metrics: AgentMetrics::default(),
                    },
                }
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(join_error) => {
                    warn!(error = %join_error, "agent task failed to join");
                    results.push(AgentResult::synthesized_panic(
                        "unknown",
                        format!("agent task panicked or was cancelled: {join_error}"),
                    ));
                }
            }
        }

        self.merge(results)
    }

    fn merge(&self, results: Vec<AgentResult>) -> RunSummary {
        let mut all_findings = Vec::new();
        let mut agent_summaries = Vec::new();

        for result in &results {
            let outcome = match result {
                AgentResult::Success { findings, .. } => {
                    info!(agent_id = result.agent_id(), count = findings.len(), "agent succeeded");
                    AgentOutcome::Success {
                        finding_count: findings.len(),
                    }
                }
                AgentResult::Failure {
                    error,
                    failure_stage,
                    ..
                } => {
                    warn!(agent_id = result.agent_id(), %error, "agent failed");
                    AgentOutcome::Failure {
                        error: error.clone(),
                        failure_stage: *failure_stage,
                    }
                }
                AgentResult::Skipped { reason, .. } => AgentOutcome::Skipped {
                    reason: reason.clone(),
                },
            };

            agent_summaries.push(AgentSummary {
                agent_id: result.agent_id().to_string(),
                outcome,
                metrics: result.metrics().clone(),
            });

            all_findings.extend(result.contributed_findings());
        }

        let findings = dedupe_and_sort(all_findings, self.finding_cap);

        RunSummary {
            findings,
            agents: agent_summaries,
        }
    }
}

/// Merge step, spec §4.1 step 6 / §5: dedupe by `(fingerprint, file, line)`
/// — fingerprint authoritative, `file+line` breaks ties when fingerprints
/// are absent — then stable-sort by severity ascending, file, line, ruleId,
/// then cap and drop surplus from the tail.
fn dedupe_and_sort(mut findings: Vec<crate::model::Finding>, cap: usize) -> Vec<crate::model::Finding> {
    let mut seen: HashSet<String> = HashSet::new();
    findings.retain(|f| {
        let key = match &f.fingerprint {
            Some(fp) => fp.clone(),
            None => format!(
                "file:{}:{}",
                f.file,
                f.line.map(|l| l.to_string()).unwrap_or_default()
            ),
        };
        seen.insert(key)
    });

    findings.sort_by(|a, b| {
        a.severity
            .cmp(&b.severity)
            .then_with(|| a.file.cmp(&b.file))
            .then_with(|| a.line.cmp(&b.line))
            .then_with(|| a.rule_id.cmp(&b.rule_id))
    });

    findings.truncate(cap);
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AgentMetrics, DiffStatus, Severity};

    struct StubAgent {
        id: &'static str,
        providers: Vec<Provider>,
    }

    #[async_trait]
    impl Agent for StubAgent {
        fn id(&self) -> &str {
            self.id
        }
        fn name(&self) -> &str {
            self.id
        }
        fn uses_llm(&self) -> bool {
            !self.providers.is_empty()
        }
        fn supported_providers(&self) -> &[Provider] {
            &self.providers
        }
        fn supports(&self, file: &DiffFile) -> bool {
            file.path.ends_with(".ts")
        }
        async fn run(&self, _context: AgentContext) -> AgentResult {
            AgentResult::Success {
                agent_id: self.id.to_string(),
                findings: Vec::new(),
                metrics: AgentMetrics::default(),
            }
        }
    }

    fn diff_file(path: &str, status: DiffStatus) -> DiffFile {
        DiffFile {
            path: path.to_string(),
            status,
            additions: 1,
            deletions: 0,
        }
    }

    fn finding(file: &str, line: u32, severity: Severity, rule_id: &str) -> crate::model::Finding {
        crate::model::Finding {
            severity,
            file: file.to_string(),
            message: "msg".to_string(),
            source_agent: "a".to_string(),
            line: Some(line),
            end_line: None,
            suggestion: None,
            rule_id: Some(rule_id.to_string()),
            fingerprint: None,
            provenance: crate::model::Provenance::Complete,
            metadata: serde_json::Map::new(),
        }
    }

    #[test]
    fn resolve_prefers_anthropic_over_openai_when_both_present() {
        let mut env = HashMap::new();
        env.insert("ANTHROPIC_API_KEY".to_string(), "x".to_string());
        env.insert("OPENAI_API_KEY".to_string(), "y".to_string());
        let agents: Vec<Arc<dyn Agent>> = vec![Arc::new(StubAgent {
            id: "llm",
            providers: vec![Provider::Anthropic, Provider::Openai],
        })];
        let (provider, _) = resolve_provider_and_model(&env, &Config::default(), &agents);
        assert_eq!(provider, Some(Provider::Anthropic));
    }

    #[test]
    fn model_env_override_wins_over_config_default() {
        let mut env = HashMap::new();
        env.insert("MODEL".to_string(), "claude-x".to_string());
        let mut config = Config::default();
        config.provider.default_model = Some("gpt-y".to_string());
        let (_, model) = resolve_provider_and_model(&env, &config, &[]);
        assert_eq!(model, Some("claude-x".to_string()));
    }

    #[test]
    fn dedupe_prefers_fingerprint_and_applies_stable_sort() {
        let mut a = finding("b.ts", 2, Severity::Warning, "r1");
        a.fingerprint = Some("fp1".to_string());
        let mut dup = finding("b.ts", 2, Severity::Warning, "r1");
        dup.fingerprint = Some("fp1".to_string());
        let error_finding = finding("a.ts", 1, Severity::Error, "r0");

        let merged = dedupe_and_sort(vec![a, dup, error_finding], 200);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].file, "a.ts");
        assert_eq!(merged[1].file, "b.ts");
    }

    #[test]
    fn dedupe_falls_back_to_file_line_when_fingerprint_absent() {
        let a = finding("b.ts", 2, Severity::Warning, "r1");
        let b = finding("b.ts", 2, Severity::Warning, "r1");
        let merged = dedupe_and_sort(vec![a, b], 200);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn cap_drops_surplus_from_the_tail() {
        let findings: Vec<_> = (0..5)
            .map(|i| finding("a.ts", i, Severity::Info, "r"))
            .collect();
        let merged = dedupe_and_sort(findings, 3);
        assert_eq!(merged.len(), 3);
    }

    #[tokio::test]
    async fn agent_with_no_supported_files_is_skipped() {
        let router = Router::new(Config::default(), HashMap::new(), "/home/runner".to_string());
        let agents: Vec<Arc<dyn Agent>> = vec![Arc::new(StubAgent {
            id: "ts-only",
            providers: vec![],
        })];
        let files = vec![diff_file("main.py", DiffStatus::Modified)];
        let summary = router
            .run(std::path::Path::new("/repo"), &files, "", agents)
            .await;
        assert_eq!(summary.agents.len(), 1);
        assert!(matches!(summary.agents[0].outcome, AgentOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn deleted_files_are_never_offered_to_agents() {
        let router = Router::new(Config::default(), HashMap::new(), "/home/runner".to_string());
        let agents: Vec<Arc<dyn Agent>> = vec![Arc::new(StubAgent {
            id: "ts-only",
            providers: vec![],
        })];
        let files = vec![diff_file("main.ts", DiffStatus::Deleted)];
        let summary = router
            .run(std::path::Path::new("/repo"), &files, "", agents)
            .await;
        assert!(matches!(summary.agents[0].outcome, AgentOutcome::Skipped { .. }));
    }
}
