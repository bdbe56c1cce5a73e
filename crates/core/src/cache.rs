//! Optional result cache keyed by `(agent_id, diff_fingerprint)`. Per spec
//! §3/§5: writes are serialized through a single writer, and entries carry
//! the schema version so a version bump discards stale entries rather than
//! attempting to interpret them. This is the only persistence the core
//! performs (spec §1 Non-goals).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::model::{AgentResult, AGENT_RESULT_SCHEMA_VERSION};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    schema_version: u32,
    result: AgentResult,
}

/// An in-memory result cache, optionally backed by a single JSON file on
/// disk. All writes go through `&self` behind an internal mutex, matching
/// the "writes are serialized through a single writer" requirement.
pub struct ResultCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

fn cache_key(agent_id: &str, diff_fingerprint: &str) -> String {
    format!("{agent_id}:{diff_fingerprint}")
}

impl ResultCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let entries: HashMap<String, CacheEntry> = serde_json::from_str(&raw)?;
        Ok(Self {
            entries: Mutex::new(entries),
        })
    }

    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        let entries = self.entries.lock().expect("cache lock poisoned");
        let raw = serde_json::to_string_pretty(&*entries)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Returns `None` on a miss, or a schema-version mismatch — mismatched
    /// entries are treated as absent rather than erroring.
    pub fn get(&self, agent_id: &str, diff_fingerprint: &str) -> Option<AgentResult> {
        let entries = self.entries.lock().expect("cache lock poisoned");
        let entry = entries.get(&cache_key(agent_id, diff_fingerprint))?;
        if entry.schema_version != AGENT_RESULT_SCHEMA_VERSION {
            return None;
        }
        Some(entry.result.clone())
    }

    pub fn put(&self, agent_id: &str, diff_fingerprint: &str, result: AgentResult) {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.insert(
            cache_key(agent_id, diff_fingerprint),
            CacheEntry {
                schema_version: AGENT_RESULT_SCHEMA_VERSION,
                result,
            },
        );
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AgentMetrics;

    fn success(agent_id: &str) -> AgentResult {
        AgentResult::Success {
            agent_id: agent_id.to_string(),
            findings: Vec::new(),
            metrics: AgentMetrics::default(),
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let cache = ResultCache::new();
        cache.put("semgrep", "fp1", success("semgrep"));
        let got = cache.get("semgrep", "fp1");
        assert!(got.is_some());
    }

    #[test]
    fn schema_version_mismatch_is_treated_as_a_miss() {
        let cache = ResultCache::new();
        {
            let mut entries = cache.entries.lock().unwrap();
            entries.insert(
                cache_key("semgrep", "fp1"),
                CacheEntry {
                    schema_version: 1,
                    result: success("semgrep"),
                },
            );
        }
        assert!(cache.get("semgrep", "fp1").is_none());
    }

    #[test]
    fn save_and_load_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let cache = ResultCache::new();
        cache.put("semgrep", "fp1", success("semgrep"));
        cache.save_to_file(&path).unwrap();

        let loaded = ResultCache::load_from_file(&path).unwrap();
        assert!(loaded.get("semgrep", "fp1").is_some());
    }
}
