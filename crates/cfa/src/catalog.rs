//! Process-wide, read-only mitigation catalog. Spec §4.4.2 / §3
//! `MitigationPattern`: ~40 built-in patterns covering input validation,
//! null safety, auth checks, output encoding, and path-traversal defenses.
//! User configuration may add, override (confidence, deprecation), or
//! disable patterns by id; deprecated and disabled patterns never match and
//! never surface from `patterns_for_vulnerability`.

use std::collections::HashMap;

use revrouter_config::MitigationConfig;

use crate::pattern_validator::{is_pattern_accepted, RedosRisk};
use crate::types::{Confidence, MatchDescriptor, MatchKind, MitigationPattern, ReturnConstraint};

fn pattern(
    id: &str,
    name: &str,
    description: &str,
    mitigates: &[&str],
    kind: MatchKind,
    module: Option<&str>,
    match_name: Option<&str>,
    name_pattern: Option<&str>,
    return_constraint: ReturnConstraint,
    parameters: &[&str],
    confidence: Confidence,
) -> MitigationPattern {
    MitigationPattern {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        mitigates: mitigates.iter().map(|s| s.to_string()).collect(),
        r#match: MatchDescriptor {
            kind,
            module: module.map(str::to_string),
            name: match_name.map(str::to_string),
            name_pattern: name_pattern.map(str::to_string),
            return_constraint,
            parameters: parameters.iter().map(|s| s.to_string()).collect(),
        },
        confidence,
        is_built_in: true,
        deprecated: false,
        deprecation_reason: None,
    }
}

/// The built-in catalog, ~40 entries across five mitigation families. The
/// full list is defined once here, at module load, and never mutated after.
pub fn built_in_patterns() -> Vec<MitigationPattern> {
    use Confidence::{High, Low, Medium};
    use MatchKind::*;
    use ReturnConstraint::*;

    vec![
        // --- input validation -------------------------------------------
        pattern(
            "validate-zod-parse",
            "Zod schema parse",
            "Input validated through a Zod schema before use",
            &["injection", "prototype_pollution"],
            MethodCall,
            Some("zod"),
            Some("parse"),
            None,
            Any,
            &[],
            High,
        ),
        pattern(
            "validate-zod-safe-parse",
            "Zod safe-parse",
            "Input validated through `safeParse`, result checked before use",
            &["injection", "prototype_pollution"],
            MethodCall,
            Some("zod"),
            Some("safeParse"),
            None,
            Any,
            &[],
            High,
        ),
        pattern(
            "validate-joi",
            "Joi schema validation",
            "Input validated through a Joi schema",
            &["injection"],
            MethodCall,
            Some("joi"),
            Some("validate"),
            None,
            Any,
            &[],
            High,
        ),
        pattern(
            "validate-yup",
            "Yup schema validation",
            "Input validated through a Yup schema",
            &["injection"],
            MethodCall,
            Some("yup"),
            Some("validate"),
            None,
            Any,
            &[],
            Medium,
        ),
        pattern(
            "validate-is-uuid",
            "UUID format check",
            "Identifier validated as a well-formed UUID before use in a lookup",
            &["injection"],
            FunctionCall,
            None,
            None,
            Some("(?i)^isUuid$"),
            Truthy,
            &[],
            Medium,
        ),
        pattern(
            "validate-regex-test",
            "Custom allowlist regex check",
            "Input tested against an allowlist regex before use",
            &["injection", "path_traversal"],
            MethodCall,
            None,
            Some("test"),
            None,
            Truthy,
            &[],
            Low,
        ),
        pattern(
            "validate-parameterized-query",
            "Parameterized query builder",
            "Query built through a parameterized/bound query helper, not string concatenation",
            &["injection"],
            MethodCall,
            None,
            None,
            Some("(?i)^(query|execute)Parameterized$"),
            Any,
            &[],
            High,
        ),
        pattern(
            "validate-prepared-statement",
            "Prepared statement",
            "SQL issued through a prepared statement",
            &["injection"],
            MethodCall,
            None,
            Some("prepare"),
            None,
            Any,
            &[],
            High,
        ),
        pattern(
            "validate-orm-query-builder",
            "ORM query builder",
            "Query constructed through an ORM's builder API rather than raw SQL",
            &["injection"],
            MethodCall,
            None,
            Some("where"),
            None,
            Any,
            &[],
            Medium,
        ),
        pattern(
            "validate-schema-assert",
            "Runtime schema assertion",
            "Input asserted against a schema (ajv-style validator) before use",
            &["injection", "prototype_pollution"],
            FunctionCall,
            Some("ajv"),
            Some("validate"),
            None,
            Truthy,
            &[],
            Medium,
        ),
        // --- null safety ---------------------------------------------------
        pattern(
            "null-optional-chaining",
            "Optional chaining",
            "Access guarded by optional chaining (`?.`)",
            &["null_deref"],
            OptionalChaining,
            None,
            None,
            None,
            Any,
            &[],
            High,
        ),
        pattern(
            "null-nullish-coalescing",
            "Nullish coalescing default",
            "Value defaulted through `??` before use",
            &["null_deref"],
            NullishCoalescing,
            None,
            None,
            None,
            Any,
            &[],
            High,
        ),
        pattern(
            "null-typeof-undefined",
            "typeof undefined guard",
            "Value guarded by a `typeof x !== 'undefined'` check",
            &["null_deref"],
            TypeofCheck,
            None,
            None,
            None,
            Any,
            &[],
            Medium,
        ),
        pattern(
            "null-explicit-check",
            "Explicit null/undefined check",
            "Value guarded by an explicit `x != null` style check",
            &["null_deref"],
            TypeGuard,
            None,
            None,
            Some("(?i)^(isNil|isNull|isDefined|isPresent)$"),
            Truthy,
            &[],
            Medium,
        ),
        pattern(
            "null-instanceof-guard",
            "instanceof type guard",
            "Value narrowed by an `instanceof` check before dereference",
            &["null_deref"],
            InstanceofCheck,
            None,
            None,
            None,
            Any,
            &[],
            Medium,
        ),
        pattern(
            "null-default-parameter",
            "Default parameter value",
            "Parameter given a default value, eliminating the undefined case",
            &["null_deref"],
            FunctionCall,
            None,
            None,
            Some("(?i)^withDefault$"),
            Any,
            &[],
            Low,
        ),
        pattern(
            "null-array-at-guard",
            "Bounds-checked array access",
            "Array index checked against `.length` before indexing",
            &["null_deref"],
            MethodCall,
            None,
            Some("at"),
            None,
            Any,
            &[],
            Low,
        ),
        // --- auth checks -----------------------------------------------
        pattern(
            "auth-require-login",
            "Authentication guard",
            "Request guarded by a `requireAuth`/`requireLogin` middleware or call",
            &["auth_bypass"],
            FunctionCall,
            None,
            None,
            Some("(?i)^requires?(Auth|Login)$"),
            Any,
            &[],
            High,
        ),
        pattern(
            "auth-has-permission",
            "Permission check",
            "Action guarded by an explicit `hasPermission`/`can` check",
            &["auth_bypass"],
            FunctionCall,
            None,
            None,
            Some("(?i)^(hasPermission|can[A-Z]\\w*)$"),
            Truthy,
            &[],
            High,
        ),
        pattern(
            "auth-role-check",
            "Role membership check",
            "Action guarded by a role membership check",
            &["auth_bypass"],
            MethodCall,
            None,
            Some("hasRole"),
            None,
            Truthy,
            &[],
            Medium,
        ),
        pattern(
            "auth-session-verify",
            "Session verification",
            "Session token verified before the protected action runs",
            &["auth_bypass"],
            FunctionCall,
            None,
            None,
            Some("(?i)^verifySession$"),
            Any,
            &[],
            High,
        ),
        pattern(
            "auth-jwt-verify",
            "JWT verification",
            "JWT verified against a known signing key before trust",
            &["auth_bypass"],
            MethodCall,
            Some("jsonwebtoken"),
            Some("verify"),
            None,
            Any,
            &[],
            High,
        ),
        pattern(
            "auth-csrf-token-check",
            "CSRF token check",
            "Mutating request guarded by a CSRF token comparison",
            &["auth_bypass"],
            FunctionCall,
            None,
            None,
            Some("(?i)^(validateCsrf|checkCsrfToken)$"),
            Truthy,
            &[],
            Medium,
        ),
        pattern(
            "auth-owner-check",
            "Resource ownership check",
            "Resource access guarded by an ownership comparison",
            &["auth_bypass"],
            FunctionCall,
            None,
            None,
            Some("(?i)^isOwner$"),
            Truthy,
            &[],
            Medium,
        ),
        // --- output encoding / XSS --------------------------------------
        pattern(
            "xss-dompurify-sanitize",
            "DOMPurify sanitize",
            "HTML sanitized through DOMPurify before insertion",
            &["xss"],
            MethodCall,
            Some("dompurify"),
            Some("sanitize"),
            None,
            Any,
            &[],
            High,
        ),
        pattern(
            "xss-escape-html",
            "HTML entity escaping",
            "Output escaped through an HTML-entity escape helper",
            &["xss"],
            FunctionCall,
            None,
            None,
            Some("(?i)^escapeHtml$"),
            Any,
            &[],
            High,
        ),
        pattern(
            "xss-text-content-assignment",
            "textContent instead of innerHTML",
            "Value assigned via `textContent`, which never parses as markup",
            &["xss"],
            FunctionCall,
            None,
            None,
            Some("(?i)^setTextContent$"),
            Any,
            &[],
            Medium,
        ),
        pattern(
            "xss-react-default-escaping",
            "JSX expression (auto-escaped)",
            "Value rendered through a JSX expression, which React escapes by default",
            &["xss"],
            FunctionCall,
            None,
            None,
            Some("(?i)^renderJsxText$"),
            Any,
            &[],
            Low,
        ),
        pattern(
            "xss-content-security-policy",
            "CSP header set",
            "Response sets a restrictive Content-Security-Policy header",
            &["xss"],
            FunctionCall,
            None,
            None,
            Some("(?i)^setContentSecurityPolicy$"),
            Any,
            &[],
            Low,
        ),
        pattern(
            "xss-sanitize-url",
            "URL scheme allowlist",
            "URL value checked against an `http(s):`-only scheme allowlist",
            &["xss"],
            FunctionCall,
            None,
            None,
            Some("(?i)^isSafeUrl$"),
            Truthy,
            &[],
            Medium,
        ),
        // --- path traversal ----------------------------------------------
        pattern(
            "path-basename",
            "path.basename normalization",
            "Filename reduced to its basename before joining with a root directory",
            &["path_traversal"],
            MethodCall,
            Some("path"),
            Some("basename"),
            None,
            Any,
            &[],
            High,
        ),
        pattern(
            "path-resolve-contains-check",
            "Resolved-path containment check",
            "Resolved absolute path checked to start with the allowed root before use",
            &["path_traversal"],
            FunctionCall,
            None,
            None,
            Some("(?i)^isWithinRoot$"),
            Truthy,
            &[],
            High,
        ),
        pattern(
            "path-reject-dotdot",
            "Reject `..` segments",
            "Path rejected outright when it contains a `..` traversal segment",
            &["path_traversal"],
            FunctionCall,
            None,
            None,
            Some("(?i)^containsTraversal$"),
            Falsy,
            &[],
            Medium,
        ),
        pattern(
            "path-sandbox-root-join",
            "Sandboxed join helper",
            "Path joined through a sandboxing helper that refuses to escape its root",
            &["path_traversal"],
            FunctionCall,
            None,
            None,
            Some("(?i)^safeJoin$"),
            Any,
            &[],
            High,
        ),
        pattern(
            "path-realpath-check",
            "Canonicalized path check",
            "Path canonicalized via realpath before the containment check",
            &["path_traversal"],
            MethodCall,
            Some("fs"),
            Some("realpath"),
            None,
            Any,
            &[],
            Medium,
        ),
        // --- SSRF -----------------------------------------------------------
        pattern(
            "ssrf-host-allowlist",
            "Outbound host allowlist",
            "Target host checked against an allowlist before an outbound request",
            &["ssrf"],
            FunctionCall,
            None,
            None,
            Some("(?i)^isAllowedHost$"),
            Truthy,
            &[],
            High,
        ),
        pattern(
            "ssrf-reject-private-ip",
            "Private-IP rejection",
            "Resolved IP checked against private/loopback ranges before connecting",
            &["ssrf"],
            FunctionCall,
            None,
            None,
            Some("(?i)^isPrivateAddress$"),
            Falsy,
            &[],
            High,
        ),
        pattern(
            "ssrf-dns-rebinding-guard",
            "DNS rebinding guard",
            "Resolved address re-checked immediately before the connection is opened",
            &["ssrf"],
            FunctionCall,
            None,
            None,
            Some("(?i)^guardAgainstRebinding$"),
            Any,
            &[],
            Medium,
        ),
        // --- prototype pollution --------------------------------------------
        pattern(
            "proto-object-create-null",
            "Object.create(null) map",
            "Untrusted keys stored on an `Object.create(null)` map instead of a plain object",
            &["prototype_pollution"],
            FunctionCall,
            Some("Object"),
            Some("create"),
            None,
            Any,
            &[],
            High,
        ),
        pattern(
            "proto-reject-dunder-proto",
            "Reject `__proto__` keys",
            "Key rejected outright when it matches `__proto__`/`constructor`/`prototype`",
            &["prototype_pollution"],
            FunctionCall,
            None,
            None,
            Some("(?i)^isUnsafeKey$"),
            Truthy,
            &[],
            High,
        ),
        pattern(
            "proto-deep-clone-structured",
            "structuredClone instead of manual merge",
            "Object copied through `structuredClone` rather than a recursive merge",
            &["prototype_pollution"],
            FunctionCall,
            None,
            Some("structuredClone"),
            None,
            Any,
            &[],
            Medium,
        ),
        pattern(
            "proto-map-instead-of-object",
            "Map instead of plain object",
            "Untrusted keys stored in a `Map`, which has no prototype chain to pollute",
            &["prototype_pollution"],
            FunctionCall,
            None,
            Some("Map"),
            None,
            Any,
            &[],
            Low,
        ),
    ]
}

/// An active, read-only view over the catalog: built-ins plus any
/// `extra_patterns`, with overrides and disables applied and ReDoS-rejected
/// patterns excluded at load time (spec §4.4.5: "Patterns rejected during
/// catalog load are not activated").
pub struct MitigationCatalog {
    active: HashMap<String, MitigationPattern>,
    rejected: Vec<String>,
}

impl MitigationCatalog {
    /// Build the active catalog from the built-ins plus configuration.
    /// `threshold` governs the ReDoS-rejection cutoff (spec default:
    /// `RedosRisk::Medium`).
    pub fn load(config: &MitigationConfig, threshold: RedosRisk) -> Self {
        let mut patterns: HashMap<String, MitigationPattern> = built_in_patterns()
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();

        for (id, raw_pattern) in &config.extra_patterns {
            patterns.insert(
                id.clone(),
                MitigationPattern {
                    id: id.clone(),
                    name: id.clone(),
                    description: "user-defined mitigation pattern".to_string(),
                    mitigates: Vec::new(),
                    r#match: MatchDescriptor {
                        kind: MatchKind::FunctionCall,
                        module: None,
                        name: None,
                        name_pattern: Some(raw_pattern.clone()),
                        return_constraint: ReturnConstraint::Any,
                        parameters: Vec::new(),
                    },
                    confidence: Confidence::Low,
                    is_built_in: false,
                    deprecated: false,
                    deprecation_reason: None,
                },
            );
        }

        for over in &config.overrides {
            if let Some(p) = patterns.get_mut(&over.id) {
                if let Some(confidence) = &over.confidence {
                    p.confidence = match confidence.as_str() {
                        "high" => Confidence::High,
                        "medium" => Confidence::Medium,
                        _ => Confidence::Low,
                    };
                }
                if let Some(deprecated) = over.deprecated {
                    p.deprecated = deprecated;
                    p.deprecation_reason = over.deprecation_reason.clone();
                }
            }
        }

        let disabled_ids: std::collections::HashSet<&str> = config
            .overrides
            .iter()
            .filter(|o| o.disabled)
            .map(|o| o.id.as_str())
            .collect();

        let mut rejected = Vec::new();
        patterns.retain(|id, p| {
            if disabled_ids.contains(id.as_str()) || p.deprecated {
                return false;
            }
            if let Some(name_pattern) = &p.r#match.name_pattern {
                if !is_pattern_accepted(name_pattern, id, threshold, &config.redos_whitelist) {
                    rejected.push(id.clone());
                    return false;
                }
            }
            true
        });

        Self {
            active: patterns,
            rejected,
        }
    }

    pub fn get(&self, id: &str) -> Option<&MitigationPattern> {
        self.active.get(id)
    }

    pub fn rejected_ids(&self) -> &[String] {
        &self.rejected
    }

    pub fn all(&self) -> impl Iterator<Item = &MitigationPattern> {
        self.active.values()
    }

    /// Active, non-deprecated patterns that mitigate `vulnerability_tag`.
    pub fn patterns_for_vulnerability(&self, vulnerability_tag: &str) -> Vec<&MitigationPattern> {
        self.active
            .values()
            .filter(|p| p.mitigates.iter().any(|m| m == vulnerability_tag))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_catalog_has_around_forty_entries() {
        let patterns = built_in_patterns();
        assert!(patterns.len() >= 35 && patterns.len() <= 45, "{}", patterns.len());
    }

    #[test]
    fn every_built_in_pattern_mitigates_at_least_one_tag() {
        for p in built_in_patterns() {
            assert!(!p.mitigates.is_empty(), "{} has no mitigates", p.id);
        }
    }

    #[test]
    fn override_disables_a_pattern() {
        let mut config = MitigationConfig::default();
        config.overrides.push(revrouter_config::MitigationOverride {
            id: "path-basename".to_string(),
            disabled: true,
            confidence: None,
            deprecated: None,
            deprecation_reason: None,
        });
        let catalog = MitigationCatalog::load(&config, RedosRisk::Medium);
        assert!(catalog.get("path-basename").is_none());
    }

    #[test]
    fn deprecated_pattern_is_excluded_from_vulnerability_lookup() {
        let mut config = MitigationConfig::default();
        config.overrides.push(revrouter_config::MitigationOverride {
            id: "xss-dompurify-sanitize".to_string(),
            disabled: false,
            confidence: None,
            deprecated: Some(true),
            deprecation_reason: Some("superseded".to_string()),
        });
        let catalog = MitigationCatalog::load(&config, RedosRisk::Medium);
        let xss_patterns = catalog.patterns_for_vulnerability("xss");
        assert!(!xss_patterns.iter().any(|p| p.id == "xss-dompurify-sanitize"));
    }

    #[test]
    fn confidence_override_is_applied() {
        let mut config = MitigationConfig::default();
        config.overrides.push(revrouter_config::MitigationOverride {
            id: "validate-regex-test".to_string(),
            disabled: false,
            confidence: Some("high".to_string()),
            deprecated: None,
            deprecation_reason: None,
        });
        let catalog = MitigationCatalog::load(&config, RedosRisk::Medium);
        assert_eq!(catalog.get("validate-regex-test").unwrap().confidence, Confidence::High);
    }
}
