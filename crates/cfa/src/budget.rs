//! Cooperative governor for time and size budgets, consulted by all
//! analyzer components at natural checkpoints. Spec §4.5.

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::warn;

use revrouter_config::BudgetConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BudgetStatus {
    Ok,
    Warning,
    Exceeded,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilePriority {
    High,
    Medium,
    Low,
}

static LOW_PRIORITY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"__tests__").unwrap(),
        Regex::new(r"\.test\.").unwrap(),
        Regex::new(r"\.spec\.").unwrap(),
        Regex::new(r"(^|/)scripts/").unwrap(),
        Regex::new(r"(^|/)tools/").unwrap(),
        Regex::new(r"(^|/)types/").unwrap(),
        Regex::new(r"(^|/)interfaces/").unwrap(),
        Regex::new(r"(^|/)constants/").unwrap(),
        Regex::new(r"(^|/)config/").unwrap(),
    ]
});

static HIGH_PRIORITY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(^|/)auth/").unwrap(),
        Regex::new(r"(^|/)security/").unwrap(),
        Regex::new(r"(^|/)middleware/").unwrap(),
        Regex::new(r"(^|/)handlers/").unwrap(),
        Regex::new(r"(^|/)controllers/").unwrap(),
        Regex::new(r"(^|/)api/").unwrap(),
        Regex::new(r"(^|/)database/").unwrap(),
        Regex::new(r"(^|/)db/").unwrap(),
        Regex::new(r"(?i)(sanitize|validate|escape)").unwrap(),
    ]
});

/// Classifies a path into `{high, medium, low}`. Low-priority (test-file)
/// patterns are checked first so tests beat every other match — spec
/// §4.5's "Checked first so tests beat all other matches".
pub fn classify_file(path: &str) -> FilePriority {
    if LOW_PRIORITY_PATTERNS.iter().any(|p| p.is_match(path)) {
        FilePriority::Low
    } else if HIGH_PRIORITY_PATTERNS.iter().any(|p| p.is_match(path)) {
        FilePriority::High
    } else {
        FilePriority::Medium
    }
}

/// Stably reorders `high < medium < low` without mutating the input.
pub fn sort_files_by_priority(files: &[String]) -> Vec<String> {
    let mut indexed: Vec<(usize, &String)> = files.iter().enumerate().collect();
    indexed.sort_by_key(|(idx, path)| {
        let rank = match classify_file(path) {
            FilePriority::High => 0,
            FilePriority::Medium => 1,
            FilePriority::Low => 2,
        };
        (rank, *idx)
    });
    indexed.into_iter().map(|(_, path)| path.clone()).collect()
}

pub struct AnalysisBudget {
    config: BudgetConfig,
    started_at: Instant,
    lines_analyzed: u64,
    files_analyzed: u32,
    files_skipped: u32,
    nodes_visited: u64,
    status: BudgetStatus,
}

fn percent_used(used: u64, max: u64) -> f64 {
    if max == 0 {
        100.0
    } else {
        (used as f64 / max as f64) * 100.0
    }
}

impl AnalysisBudget {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            started_at: Instant::now(),
            lines_analyzed: 0,
            files_analyzed: 0,
            files_skipped: 0,
            nodes_visited: 0,
            status: BudgetStatus::Ok,
        }
    }

    fn time_percent(&self) -> f64 {
        percent_used(self.started_at.elapsed().as_millis() as u64, self.config.max_duration_ms)
    }

    fn size_percent(&self) -> f64 {
        let lines_pct = percent_used(self.lines_analyzed, self.config.max_lines_changed);
        let nodes_pct = percent_used(self.nodes_visited, self.config.max_nodes_visited);
        lines_pct.max(nodes_pct)
    }

    /// Re-evaluates status from current counters, logging once on each
    /// forward transition. Absorbing: once `terminated`, never regresses.
    pub fn check_budget(&mut self) -> BudgetStatus {
        if self.status == BudgetStatus::Terminated {
            return self.status;
        }

        let time_pct = self.time_percent();
        let size_pct = self.size_percent();
        let worst = time_pct.max(size_pct);

        let next = if worst >= 100.0 {
            BudgetStatus::Terminated
        } else if worst >= 90.0 {
            BudgetStatus::Exceeded
        } else if worst >= 80.0 {
            BudgetStatus::Warning
        } else {
            BudgetStatus::Ok
        };

        if next > self.status {
            warn!(from = ?self.status, to = ?next, time_pct, size_pct, "analysis budget transition");
            self.status = next;
        }
        self.status
    }

    pub fn status(&self) -> BudgetStatus {
        self.status
    }

    pub fn should_continue(&self) -> bool {
        self.status != BudgetStatus::Terminated
    }

    pub fn record_lines(&mut self, lines: u64) {
        self.lines_analyzed += lines;
        self.check_budget();
    }

    pub fn record_file_analyzed(&mut self) {
        self.files_analyzed += 1;
    }

    pub fn record_nodes_visited(&mut self, nodes: u64) {
        self.nodes_visited += nodes;
        self.check_budget();
    }

    /// In any non-`ok` state, low-priority files are skipped; in
    /// `terminated` no file is analyzed at all.
    pub fn should_analyze_file(&mut self, path: &str) -> bool {
        self.check_budget();
        if self.status == BudgetStatus::Terminated {
            self.files_skipped += 1;
            return false;
        }
        if self.status != BudgetStatus::Ok && classify_file(path) == FilePriority::Low {
            self.files_skipped += 1;
            return false;
        }
        true
    }

    /// The effective call-depth cap in any non-`ok` state is
    /// `min(3, configured)`.
    pub fn effective_max_call_depth(&self) -> u32 {
        if self.status == BudgetStatus::Ok {
            self.config.max_call_depth
        } else {
            self.config.max_call_depth.min(3)
        }
    }

    pub fn files_skipped(&self) -> u32 {
        self.files_skipped
    }

    pub fn files_analyzed(&self) -> u32 {
        self.files_analyzed
    }

    pub fn lines_analyzed(&self) -> u64 {
        self.lines_analyzed
    }

    fn degraded_reason(&self) -> Option<String> {
        if self.status == BudgetStatus::Ok {
            return None;
        }
        let time_pct = self.time_percent();
        let size_pct = self.size_percent();
        let mut causes = Vec::new();
        if time_pct >= 80.0 {
            causes.push("time budget");
        }
        if size_pct >= 80.0 {
            causes.push("size budget");
        }
        if causes.is_empty() {
            None
        } else {
            Some(format!("{} crossed 80%", causes.join(" and ")))
        }
    }

    /// `{analysisDepth, degraded, degradedReason?}` for attaching to a
    /// finding's metadata (spec §4.5 "Emitted metadata").
    pub fn to_finding_metadata(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        map.insert("analysisDepth".to_string(), serde_json::json!(self.effective_max_call_depth()));
        map.insert("degraded".to_string(), serde_json::json!(self.status != BudgetStatus::Ok));
        if let Some(reason) = self.degraded_reason() {
            map.insert("degradedReason".to_string(), serde_json::json!(reason));
        }
        map
    }
}

#[allow(dead_code)]
fn elapsed_since(start: Instant) -> Duration {
    start.elapsed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BudgetConfig {
        BudgetConfig {
            max_duration_ms: 300_000,
            max_lines_changed: 10_000,
            max_call_depth: 5,
            max_nodes_visited: 10_000,
        }
    }

    #[test]
    fn classifier_prefers_test_over_api_match() {
        assert_eq!(classify_file("src/api/__tests__/handler.test.ts"), FilePriority::Low);
    }

    #[test]
    fn classifier_detects_high_priority_auth_path() {
        assert_eq!(classify_file("src/auth/login.ts"), FilePriority::High);
    }

    #[test]
    fn classifier_falls_back_to_medium() {
        assert_eq!(classify_file("src/services/widget.ts"), FilePriority::Medium);
    }

    #[test]
    fn sort_is_stable_within_each_priority_bucket() {
        let files = vec![
            "src/services/b.ts".to_string(),
            "src/auth/login.ts".to_string(),
            "src/services/a.ts".to_string(),
            "src/__tests__/x.test.ts".to_string(),
        ];
        let sorted = sort_files_by_priority(&files);
        assert_eq!(
            sorted,
            vec![
                "src/auth/login.ts".to_string(),
                "src/services/b.ts".to_string(),
                "src/services/a.ts".to_string(),
                "src/__tests__/x.test.ts".to_string(),
            ]
        );
    }

    #[test]
    fn warning_at_eighty_percent_lines() {
        let mut budget = AnalysisBudget::new(config());
        budget.record_lines(8_000);
        assert_eq!(budget.status(), BudgetStatus::Warning);
    }

    #[test]
    fn termination_with_priority_skipping_seed_scenario() {
        let mut budget = AnalysisBudget::new(config());
        budget.record_lines(8_000);
        assert_eq!(budget.status(), BudgetStatus::Warning);

        assert!(!budget.should_analyze_file("src/__tests__/x.test.ts"));
        assert_eq!(budget.files_skipped(), 1);
        assert!(budget.should_analyze_file("src/auth/login.ts"));

        budget.record_lines(2_100);
        assert_eq!(budget.status(), BudgetStatus::Terminated);
        assert!(!budget.should_continue());
    }

    #[test]
    fn status_never_regresses() {
        let mut budget = AnalysisBudget::new(config());
        budget.record_lines(9_500);
        assert_eq!(budget.status(), BudgetStatus::Exceeded);
        budget.record_lines(0);
        assert_eq!(budget.status(), BudgetStatus::Exceeded);
    }

    #[test]
    fn effective_call_depth_clamps_in_degraded_mode() {
        let mut budget = AnalysisBudget::new(config());
        budget.record_lines(8_500);
        assert_eq!(budget.effective_max_call_depth(), 3);
    }

    #[test]
    fn terminated_state_skips_every_file() {
        let mut budget = AnalysisBudget::new(config());
        budget.record_lines(10_000);
        assert!(!budget.should_analyze_file("src/auth/login.ts"));
    }
}
