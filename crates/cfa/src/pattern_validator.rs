//! Timeout regex and static ReDoS pattern validator, spec §4.4.5.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use regex::Regex;
use regex_syntax::ast::{Ast, RepetitionKind};

/// Inputs longer than this are rejected without attempting a match at all —
/// the bounded-input fast path, not a timeout.
const MAX_INPUT_LEN: usize = 10_000;

const MIN_TIMEOUT_MS: u64 = 10;
const MAX_TIMEOUT_MS: u64 = 1000;
const DEFAULT_TIMEOUT_MS: u64 = 100;

fn clamp_timeout(timeout_ms: u64) -> u64 {
    timeout_ms.clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegexEvalResult {
    pub matched: bool,
    pub timed_out: bool,
    pub elapsed_ms: u64,
}

/// A wrapper around the host regex engine with bounded-input rejection and
/// post-hoc timeout detection (true preemption is impossible with a
/// synchronous engine — spec §9 "Post-hoc timeout").
pub struct TimeoutRegex {
    regex: Regex,
    timeout_ms: u64,
}

impl TimeoutRegex {
    pub fn new(pattern: &str, timeout_ms: u64) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
            timeout_ms: clamp_timeout(timeout_ms),
        })
    }

    pub fn with_default_timeout(pattern: &str) -> Result<Self, regex::Error> {
        Self::new(pattern, DEFAULT_TIMEOUT_MS)
    }

    pub fn eval(&self, input: &str) -> RegexEvalResult {
        if input.len() > MAX_INPUT_LEN {
            return RegexEvalResult {
                matched: false,
                timed_out: false,
                elapsed_ms: 0,
            };
        }

        let start = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| self.regex.is_match(input)));
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(matched) => {
                let timed_out = elapsed_ms > self.timeout_ms;
                RegexEvalResult {
                    matched: if timed_out { false } else { matched },
                    timed_out,
                    elapsed_ms,
                }
            }
            Err(_) => RegexEvalResult {
                matched: false,
                timed_out: true,
                elapsed_ms,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RedosRisk {
    None,
    Low,
    Medium,
    High,
}

impl RedosRisk {
    fn from_score(score: u32) -> Self {
        if score >= 70 {
            RedosRisk::High
        } else if score >= 40 {
            RedosRisk::Medium
        } else if score > 0 {
            RedosRisk::Low
        } else {
            RedosRisk::None
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedosScore {
    pub score: u32,
    pub risk: RedosRisk,
    pub has_nested_quantifiers: bool,
    pub has_overlapping_alternation: bool,
    pub has_quantified_overlap: bool,
    pub star_height: u32,
}

fn is_unbounded_or_large_repetition(kind: &RepetitionKind) -> bool {
    matches!(
        kind,
        RepetitionKind::ZeroOrMore | RepetitionKind::OneOrMore
    )
}

fn contains_unbounded_repetition(ast: &Ast) -> bool {
    match ast {
        Ast::Repetition(rep) => {
            is_unbounded_or_large_repetition(&rep.op.kind) || contains_unbounded_repetition(&rep.ast)
        }
        Ast::Group(group) => contains_unbounded_repetition(&group.ast),
        Ast::Alternation(alt) => alt.asts.iter().any(contains_unbounded_repetition),
        Ast::Concat(concat) => concat.asts.iter().any(contains_unbounded_repetition),
        _ => false,
    }
}

fn unwrap_group(ast: &Ast) -> &Ast {
    match ast {
        Ast::Group(group) => unwrap_group(&group.ast),
        other => other,
    }
}

/// `hasNestedQuantifiers`: a group whose body contains `*`/`+` and is
/// itself quantified.
fn has_nested_quantifiers(ast: &Ast) -> bool {
    match ast {
        Ast::Repetition(rep) if is_unbounded_or_large_repetition(&rep.op.kind) => {
            contains_unbounded_repetition(unwrap_group(&rep.ast)) || has_nested_quantifiers(&rep.ast)
        }
        Ast::Repetition(rep) => has_nested_quantifiers(&rep.ast),
        Ast::Group(group) => has_nested_quantifiers(&group.ast),
        Ast::Alternation(alt) => alt.asts.iter().any(has_nested_quantifiers),
        Ast::Concat(concat) => concat.asts.iter().any(has_nested_quantifiers),
        _ => false,
    }
}

/// Leading run of literal characters in a branch, used to detect prefix
/// overlap between alternation branches.
fn literal_prefix(ast: &Ast) -> String {
    match ast {
        Ast::Literal(lit) => lit.c.to_string(),
        Ast::Concat(concat) => {
            let mut prefix = String::new();
            for node in &concat.asts {
                match node {
                    Ast::Literal(lit) => prefix.push(lit.c),
                    _ => break,
                }
            }
            prefix
        }
        _ => String::new(),
    }
}

fn branches_overlap(asts: &[Ast]) -> bool {
    let prefixes: Vec<String> = asts.iter().map(literal_prefix).collect();
    for i in 0..prefixes.len() {
        for j in 0..prefixes.len() {
            if i == j {
                continue;
            }
            let (a, b) = (&prefixes[i], &prefixes[j]);
            if !a.is_empty() && !b.is_empty() && a != b && (a.starts_with(b.as_str()) || b.starts_with(a.as_str()))
            {
                return true;
            }
        }
    }
    false
}

/// `hasOverlappingAlternation`: a quantified alternation group where any
/// branch is a prefix of another.
fn has_overlapping_alternation(ast: &Ast) -> bool {
    match ast {
        Ast::Repetition(rep) => {
            if let Ast::Alternation(alt) = unwrap_group(&rep.ast) {
                if branches_overlap(&alt.asts) {
                    return true;
                }
            }
            has_overlapping_alternation(&rep.ast)
        }
        Ast::Group(group) => has_overlapping_alternation(&group.ast),
        Ast::Alternation(alt) => alt.asts.iter().any(has_overlapping_alternation),
        Ast::Concat(concat) => concat.asts.iter().any(has_overlapping_alternation),
        _ => false,
    }
}

fn is_dot_star(ast: &Ast) -> bool {
    matches!(ast, Ast::Repetition(rep) if is_unbounded_or_large_repetition(&rep.op.kind) && matches!(*rep.ast, Ast::Dot(_)))
}

/// `hasQuantifiedOverlap`: matches `(.*x){…}` / `(x.*){…}` shapes — a
/// quantified group whose body concatenates a `.*`-style run with a
/// literal.
fn has_quantified_overlap(ast: &Ast) -> bool {
    match ast {
        Ast::Repetition(rep) => {
            if let Ast::Concat(concat) = unwrap_group(&rep.ast) {
                let has_dot_star = concat.asts.iter().any(is_dot_star);
                let has_literal = concat
                    .asts
                    .iter()
                    .any(|n| matches!(n, Ast::Literal(_)) || matches!(n, Ast::Concat(_)));
                if has_dot_star && has_literal {
                    return true;
                }
            }
            has_quantified_overlap(&rep.ast)
        }
        Ast::Group(group) => has_quantified_overlap(&group.ast),
        Ast::Alternation(alt) => alt.asts.iter().any(has_quantified_overlap),
        Ast::Concat(concat) => concat.asts.iter().any(has_quantified_overlap),
        _ => false,
    }
}

/// `calculateStarHeight`: maximum nesting of quantified groups.
fn calculate_star_height(ast: &Ast) -> u32 {
    fn walk(ast: &Ast, current_depth: u32) -> u32 {
        match ast {
            Ast::Repetition(rep) => {
                let depth = current_depth + 1;
                depth.max(walk(&rep.ast, depth))
            }
            Ast::Group(group) => walk(&group.ast, current_depth),
            Ast::Alternation(alt) => alt
                .asts
                .iter()
                .map(|a| walk(a, current_depth))
                .max()
                .unwrap_or(current_depth),
            Ast::Concat(concat) => concat
                .asts
                .iter()
                .map(|a| walk(a, current_depth))
                .max()
                .unwrap_or(current_depth),
            _ => current_depth,
        }
    }
    walk(ast, 0)
}

fn count_quantifiers(ast: &Ast) -> u32 {
    match ast {
        Ast::Repetition(rep) => 1 + count_quantifiers(&rep.ast),
        Ast::Group(group) => count_quantifiers(&group.ast),
        Ast::Alternation(alt) => alt.asts.iter().map(count_quantifiers).sum(),
        Ast::Concat(concat) => concat.asts.iter().map(count_quantifiers).sum(),
        _ => 0,
    }
}

/// Statically scores a regex for ReDoS risk before any use. Compilation
/// failures force `high`.
pub fn score_pattern(pattern: &str) -> RedosScore {
    let ast = match regex_syntax::ast::parse::Parser::new().parse(pattern) {
        Ok(ast) => ast,
        Err(_) => {
            return RedosScore {
                score: 100,
                risk: RedosRisk::High,
                has_nested_quantifiers: false,
                has_overlapping_alternation: false,
                has_quantified_overlap: false,
                star_height: 0,
            }
        }
    };

    let nested = has_nested_quantifiers(&ast);
    let overlapping = has_overlapping_alternation(&ast);
    let quantified_overlap = has_quantified_overlap(&ast);
    let star_height = calculate_star_height(&ast);
    let quantifier_count = count_quantifiers(&ast);

    let mut score = 0u32;
    if nested {
        score += 50;
    }
    if overlapping {
        score += 30;
    }
    score += 10 * star_height.min(2);
    score += 2 * quantifier_count.saturating_sub(5);
    let score = score.min(100);

    RedosScore {
        score,
        risk: RedosRisk::from_score(score),
        has_nested_quantifiers: nested,
        has_overlapping_alternation: overlapping,
        has_quantified_overlap: quantified_overlap,
        star_height,
    }
}

/// Reject/accept decision: a configured threshold plus a whitelist of
/// pattern ids. Patterns rejected during catalog load are not activated.
pub fn is_pattern_accepted(pattern: &str, pattern_id: &str, threshold: RedosRisk, whitelist: &[String]) -> bool {
    if whitelist.iter().any(|id| id == pattern_id) {
        return true;
    }
    score_pattern(pattern).risk < threshold
}

/// Batch validation, preserving input order.
pub fn validate_batch<'a>(
    patterns: impl Iterator<Item = (&'a str, &'a str)>,
    threshold: RedosRisk,
    whitelist: &[String],
) -> Vec<(&'a str, bool)> {
    patterns
        .map(|(id, pattern)| (id, is_pattern_accepted(pattern, id, threshold, whitelist)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_at_boundary_is_accepted() {
        let regex = TimeoutRegex::with_default_timeout("a+").unwrap();
        let input = "a".repeat(10_000);
        let result = regex.eval(&input);
        assert!(!result.timed_out);
    }

    #[test]
    fn input_over_boundary_is_rejected_without_timeout() {
        let regex = TimeoutRegex::with_default_timeout("a+").unwrap();
        let input = "a".repeat(10_001);
        let result = regex.eval(&input);
        assert_eq!(
            result,
            RegexEvalResult {
                matched: false,
                timed_out: false,
                elapsed_ms: 0
            }
        );
    }

    #[test]
    fn timeout_below_minimum_clamps_to_ten() {
        let regex = TimeoutRegex::new("a", 1).unwrap();
        assert_eq!(regex.timeout_ms, 10);
    }

    #[test]
    fn timeout_above_maximum_clamps_to_one_thousand() {
        let regex = TimeoutRegex::new("a", 5000).unwrap();
        assert_eq!(regex.timeout_ms, 1000);
    }

    #[test]
    fn nested_quantifier_pattern_scores_high() {
        let score = score_pattern("(a+)+");
        assert!(score.has_nested_quantifiers);
        assert_eq!(score.risk, RedosRisk::High);
    }

    #[test]
    fn simple_pattern_scores_none() {
        let score = score_pattern("^[a-z]+@[a-z]+\\.[a-z]+$");
        assert_eq!(score.risk, RedosRisk::None);
    }

    #[test]
    fn compilation_failure_forces_high_risk() {
        let score = score_pattern("(unclosed");
        assert_eq!(score.risk, RedosRisk::High);
        assert_eq!(score.score, 100);
    }

    #[test]
    fn whitelist_overrides_threshold_rejection() {
        let whitelist = vec!["known-safe".to_string()];
        assert!(is_pattern_accepted("(a+)+", "known-safe", RedosRisk::Medium, &whitelist));
    }

    #[test]
    fn batch_validation_preserves_order() {
        let patterns = vec![("p1", "a+"), ("p2", "(a+)+"), ("p3", "b*")];
        let results = validate_batch(patterns.into_iter(), RedosRisk::Medium, &[]);
        assert_eq!(results.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec!["p1", "p2", "p3"]);
        assert!(!results[1].1);
    }
}
