//! Configuration types consumed by the review-router core.
//!
//! Loading from YAML/forge-specific sources is an external collaborator's
//! job; this crate only defines the shape and an in-process merge of
//! defaults with an optional project file, matching the `toml`/`serde`
//! layering convention used throughout this workspace.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("mitigation pattern override references unknown id {0}")]
    UnknownPatternOverride(String),
}

/// Top-level configuration consumed by the router and the analysis engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub limits: Limits,
    pub provider: ProviderSelection,
    pub mitigations: MitigationConfig,
    pub budget: BudgetConfig,
    pub agents: AgentTimeouts,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            provider: ProviderSelection::default(),
            mitigations: MitigationConfig::default(),
            budget: BudgetConfig::default(),
            agents: AgentTimeouts::default(),
        }
    }
}

impl Config {
    /// Merge a project-level override on top of these defaults. Fields not
    /// present in `other` (serde defaults) do not clobber `self`'s values
    /// that were themselves already explicit; this is a shallow last-wins
    /// merge at the section level, matching the teacher's `Config::merge`.
    pub fn merge(mut self, other: Config) -> Config {
        self.limits = other.limits;
        self.provider = other.provider;
        self.mitigations = other.mitigations;
        self.budget = other.budget;
        self.agents = other.agents;
        self
    }

    pub fn load_str(raw: &str) -> Result<Config, ConfigError> {
        toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: "<string>".to_string(),
            source,
        })
    }

    pub fn load_file(path: &Path) -> Result<Config, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_completion_tokens: u32,
    pub temperature: f32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_completion_tokens: 4096,
            temperature: 0.3,
        }
    }
}

/// Provider selection policy. The router applies the fixed priority
/// Anthropic > OpenAI > Azure OpenAI > Ollama, filtered by which of these
/// the environment actually has credentials for; `default_model` is used
/// when no `MODEL` env override is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSelection {
    pub default_model: Option<String>,
}

impl Default for ProviderSelection {
    fn default() -> Self {
        Self { default_model: None }
    }
}

/// A single mitigation-pattern override: disable, re-grade confidence, or
/// mark deprecated (deprecated patterns are excluded from matching).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MitigationOverride {
    pub id: String,
    #[serde(default)]
    pub disabled: bool,
    pub confidence: Option<String>,
    pub deprecated: Option<bool>,
    pub deprecation_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MitigationConfig {
    pub overrides: Vec<MitigationOverride>,
    pub pattern_timeout_ms: u64,
    pub redos_whitelist: Vec<String>,
    /// Additional user-defined patterns, keyed by id, merged into the
    /// built-in catalog at load time.
    pub extra_patterns: HashMap<String, String>,
}

impl Default for MitigationConfig {
    fn default() -> Self {
        Self {
            overrides: Vec::new(),
            pattern_timeout_ms: 100,
            redos_whitelist: Vec::new(),
            extra_patterns: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub max_duration_ms: u64,
    pub max_lines_changed: u64,
    pub max_call_depth: u32,
    pub max_nodes_visited: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_duration_ms: 5 * 60 * 1000,
            max_lines_changed: 10_000,
            max_call_depth: 5,
            max_nodes_visited: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentTimeouts {
    pub default_timeout_ms: u64,
    pub per_agent: HashMap<String, u64>,
}

impl Default for AgentTimeouts {
    fn default() -> Self {
        Self {
            default_timeout_ms: 60_000,
            per_agent: HashMap::new(),
        }
    }
}

impl AgentTimeouts {
    pub fn for_agent(&self, agent_id: &str) -> u64 {
        self.per_agent
            .get(agent_id)
            .copied()
            .unwrap_or(self.default_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let cfg = Config::default();
        let raw = toml::to_string(&cfg).unwrap();
        let parsed = Config::load_str(&raw).unwrap();
        assert_eq!(parsed.limits.max_completion_tokens, 4096);
        assert_eq!(parsed.budget.max_call_depth, 5);
    }

    #[test]
    fn merge_overrides_sections_wholesale() {
        let base = Config::default();
        let mut override_cfg = Config::default();
        override_cfg.limits.max_completion_tokens = 8192;
        let merged = base.merge(override_cfg);
        assert_eq!(merged.limits.max_completion_tokens, 8192);
    }

    #[test]
    fn agent_timeout_falls_back_to_default() {
        let timeouts = AgentTimeouts::default();
        assert_eq!(timeouts.for_agent("semgrep"), 60_000);
    }
}
