//! Walks a parsed file's AST and yields `MitigationInstance`s for every
//! active catalog pattern that matches. Spec §4.4.2.
//!
//! `namePattern` regexes are evaluated through the timeout regex, never the
//! raw engine, and were already passed through the pattern validator at
//! catalog load time.

use std::collections::HashMap;

use tree_sitter::Node;

use crate::catalog::MitigationCatalog;
use crate::grammar::{parser_for, SourceLanguage};
use crate::pattern_validator::TimeoutRegex;
use crate::types::{Confidence, MatchKind, MitigationInstance, MitigationScope, SourceLocation};

fn enclosing_function_name(node: Node, source: &[u8]) -> Option<String> {
    let mut current = Some(node);
    while let Some(n) = current {
        if matches!(
            n.kind(),
            "function_declaration" | "function" | "function_expression" | "arrow_function" | "method_definition"
        ) {
            return n
                .child_by_field_name("name")
                .and_then(|nm| nm.utf8_text(source).ok())
                .map(|s| s.to_string());
        }
        current = n.parent();
    }
    None
}

fn enclosing_scope(node: Node) -> MitigationScope {
    let mut current = Some(node);
    while let Some(n) = current {
        match n.kind() {
            "function_declaration" | "function" | "function_expression" | "arrow_function" | "method_definition" => {
                return MitigationScope::Function
            }
            "statement_block" => return MitigationScope::Block,
            _ => {}
        }
        current = n.parent();
    }
    MitigationScope::Module
}

/// The assignee of an assignment or the leading argument of a call — a
/// best-effort stand-in for "name of assignee or argument where
/// identifiable" (spec §4.4.2).
fn protected_variable(node: Node, source: &[u8]) -> Option<String> {
    let mut current = node.parent();
    while let Some(n) = current {
        match n.kind() {
            "variable_declarator" => {
                return n
                    .child_by_field_name("name")
                    .and_then(|nm| nm.utf8_text(source).ok())
                    .map(|s| s.to_string());
            }
            "assignment_expression" => {
                return n
                    .child_by_field_name("left")
                    .and_then(|nm| nm.utf8_text(source).ok())
                    .map(|s| s.to_string());
            }
            "if_statement" | "statement_block" => break,
            _ => {}
        }
        current = n.parent();
    }
    if node.kind() == "call_expression" {
        if let Some(args) = node.child_by_field_name("arguments") {
            if let Some(first) = args.named_child(0) {
                return first.utf8_text(source).ok().map(|s| s.to_string());
            }
        }
    }
    None
}

fn call_target(node: Node, source: &[u8]) -> Option<(Option<String>, String)> {
    if node.kind() != "call_expression" {
        return None;
    }
    let function = node.child_by_field_name("function")?;
    if function.kind() == "member_expression" {
        let object = function.child_by_field_name("object")?.utf8_text(source).ok()?;
        let property = function.child_by_field_name("property")?.utf8_text(source).ok()?;
        Some((Some(object.to_string()), property.to_string()))
    } else {
        let name = function.utf8_text(source).ok()?;
        Some((None, name.to_string()))
    }
}

struct NameMatcher {
    regex: Option<TimeoutRegex>,
}

impl NameMatcher {
    fn matches(&self, name_pattern: &Option<String>, literal_name: &Option<String>, actual: &str) -> bool {
        if let Some(expected) = literal_name {
            if expected != actual {
                return false;
            }
        }
        if let Some(regex) = &self.regex {
            if name_pattern.is_some() {
                return regex.eval(actual).matched;
            }
        }
        literal_name.is_some() || name_pattern.is_none()
    }
}

fn build_matcher(name_pattern: &Option<String>) -> NameMatcher {
    let regex = name_pattern
        .as_ref()
        .and_then(|p| TimeoutRegex::with_default_timeout(p).ok());
    NameMatcher { regex }
}

/// Walk `source` (parsed for the language implied by `path`) and collect
/// every `MitigationInstance` the active catalog's patterns match.
pub fn detect_mitigations(catalog: &MitigationCatalog, path: &str, source: &str) -> anyhow::Result<Vec<MitigationInstance>> {
    let language = SourceLanguage::from_path(path);
    let mut parser = parser_for(language)?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| anyhow::anyhow!("tree-sitter failed to parse {path}"))?;
    let bytes = source.as_bytes();

    let matchers: HashMap<String, NameMatcher> = catalog
        .all()
        .map(|p| (p.id.clone(), build_matcher(&p.r#match.name_pattern)))
        .collect();

    let mut out = Vec::new();
    walk(tree.root_node(), bytes, catalog, &matchers, path, &mut out);
    Ok(out)
}

fn walk(
    node: Node,
    source: &[u8],
    catalog: &MitigationCatalog,
    matchers: &HashMap<String, NameMatcher>,
    path: &str,
    out: &mut Vec<MitigationInstance>,
) {
    for pattern in catalog.all() {
        if let Some(instance) = try_match(node, source, pattern, matchers, path) {
            out.push(instance);
        }
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk(child, source, catalog, matchers, path, out);
    }
}

fn try_match(
    node: Node,
    source: &[u8],
    pattern: &crate::types::MitigationPattern,
    matchers: &HashMap<String, NameMatcher>,
    path: &str,
) -> Option<MitigationInstance> {
    let matcher = matchers.get(&pattern.id)?;
    let matched = match pattern.r#match.kind {
        MatchKind::FunctionCall => {
            let (module, name) = call_target(node, source)?;
            if module.is_some() {
                return None;
            }
            let module_ok = pattern.r#match.module.is_none();
            module_ok && matcher.matches(&pattern.r#match.name_pattern, &pattern.r#match.name, &name)
        }
        MatchKind::MethodCall => {
            let (module, name) = call_target(node, source)?;
            let module = module?;
            let module_ok = pattern
                .r#match
                .module
                .as_ref()
                .map(|expected| expected.eq_ignore_ascii_case(&module))
                .unwrap_or(true);
            module_ok && matcher.matches(&pattern.r#match.name_pattern, &pattern.r#match.name, &name)
        }
        MatchKind::TypeofCheck => node.kind() == "unary_expression" && {
            node.utf8_text(source).map(|t| t.contains("typeof")).unwrap_or(false)
        },
        MatchKind::InstanceofCheck => node.kind() == "binary_expression" && {
            node.utf8_text(source).map(|t| t.contains("instanceof")).unwrap_or(false)
        },
        MatchKind::TypeGuard => {
            let (module, name) = call_target(node, source)?;
            if module.is_some() {
                return None;
            }
            matcher.matches(&pattern.r#match.name_pattern, &pattern.r#match.name, &name)
        }
        MatchKind::OptionalChaining => node.kind() == "member_expression" && {
            node.utf8_text(source).map(|t| t.contains("?.")).unwrap_or(false)
        },
        MatchKind::NullishCoalescing => node.kind() == "binary_expression" && {
            node.utf8_text(source).map(|t| t.contains("??")).unwrap_or(false)
        },
    };

    if !matched {
        return None;
    }

    let line = node.start_position().row as u32 + 1;
    let protected = protected_variable(node, source).into_iter().collect();

    Some(MitigationInstance {
        pattern_id: pattern.id.clone(),
        location: SourceLocation {
            file: path.to_string(),
            line,
        },
        protected_variables: protected,
        scope: enclosing_scope(node),
        confidence: pattern.confidence,
        call_chain: Vec::new(),
        discovery_depth: None,
    })
}

/// Attach a cross-file discovery chain to an instance discovered while
/// following call sites out of the original file (spec §4.4.2:
/// "discoveryDepth equal to |chain| − 1").
pub fn with_discovery_chain(mut instance: MitigationInstance, chain: Vec<String>) -> MitigationInstance {
    let depth = chain.len().saturating_sub(1) as u32;
    instance.call_chain = chain;
    instance.discovery_depth = Some(depth);
    instance
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern_validator::RedosRisk;
    use revrouter_config::MitigationConfig;

    fn load_default_catalog() -> MitigationCatalog {
        MitigationCatalog::load(&MitigationConfig::default(), RedosRisk::Medium)
    }

    #[test]
    fn detects_dompurify_sanitize_call() {
        let catalog = load_default_catalog();
        let src = "function f(input) { const clean = DOMPurify.sanitize(input); el.innerHTML = clean; }";
        let found = detect_mitigations(&catalog, "x.ts", src).unwrap();
        assert!(found.iter().any(|m| m.pattern_id == "xss-dompurify-sanitize"));
    }

    #[test]
    fn detects_optional_chaining() {
        let catalog = load_default_catalog();
        let src = "function f(user) { return user?.profile?.name; }";
        let found = detect_mitigations(&catalog, "x.ts", src).unwrap();
        assert!(found.iter().any(|m| m.pattern_id == "null-optional-chaining"));
    }

    #[test]
    fn detects_path_basename_normalization() {
        let catalog = load_default_catalog();
        let src = "function f(name) { const safe = path.basename(name); return join(root, safe); }";
        let found = detect_mitigations(&catalog, "x.ts", src).unwrap();
        assert!(found.iter().any(|m| m.pattern_id == "path-basename"));
    }

    #[test]
    fn no_false_positive_on_unrelated_code() {
        let catalog = load_default_catalog();
        let src = "function f(x) { return x + 1; }";
        let found = detect_mitigations(&catalog, "x.ts", src).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn discovery_chain_sets_depth() {
        let instance = MitigationInstance {
            pattern_id: "auth-require-login".to_string(),
            location: SourceLocation {
                file: "a.ts".to_string(),
                line: 1,
            },
            protected_variables: vec![],
            scope: MitigationScope::Function,
            confidence: Confidence::High,
            call_chain: vec![],
            discovery_depth: None,
        };
        let chained = with_discovery_chain(instance, vec!["a.ts:f".to_string(), "b.ts:g".to_string()]);
        assert_eq!(chained.discovery_depth, Some(1));
    }
}
