//! JSON response utilities: strip markdown code fences, parse, and surface
//! a bounded preview on failure so callers can decide whether to issue a
//! repair request. Per spec §4.2 and §4.3.

const PREVIEW_LEN: usize = 200;

#[derive(Debug, Clone, thiserror::Error)]
pub enum JsonResponseError {
    #[error("failed to parse JSON response: {message}; preview: {preview}")]
    ParseFailed { message: String, preview: String },
    #[error("response contained non-whitespace content outside the JSON object")]
    TrailingContent,
    #[error("response did not contain a JSON object")]
    NoObjectFound,
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_LEN {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(PREVIEW_LEN).collect();
        format!("{truncated}…")
    }
}

/// Strip a leading ` ```json ` (or bare ` ``` `) fence and a matching
/// trailing ` ``` ` fence from trimmed output. Leaves the text unchanged if
/// no fence is present.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest
        .strip_prefix("json")
        .or_else(|| rest.strip_prefix("JSON"))
        .unwrap_or(rest);
    let rest = rest.trim_start_matches(['\n', '\r']);
    match rest.strip_suffix("```") {
        Some(body) => body.trim(),
        None => trimmed,
    }
}

/// Strip fences, then parse as JSON. On failure the error carries a bounded
/// preview of the (fence-stripped) text for diagnostics.
pub fn parse_fenced_json(raw: &str) -> Result<serde_json::Value, JsonResponseError> {
    let stripped = strip_code_fence(raw);
    serde_json::from_str(stripped).map_err(|e| JsonResponseError::ParseFailed {
        message: e.to_string(),
        preview: preview(stripped),
    })
}

/// Locate a single JSON object between the first `{` and the last `}`,
/// rejecting any non-whitespace content before or after (per the Ollama
/// agent's stricter parsing contract, spec §4.3).
pub fn extract_single_json_object(raw: &str) -> Result<serde_json::Value, JsonResponseError> {
    let start = raw.find('{').ok_or(JsonResponseError::NoObjectFound)?;
    let end = raw.rfind('}').ok_or(JsonResponseError::NoObjectFound)?;
    if end < start {
        return Err(JsonResponseError::NoObjectFound);
    }

    let before = &raw[..start];
    let after = &raw[end + 1..];
    if !before.trim().is_empty() || !after.trim().is_empty() {
        return Err(JsonResponseError::TrailingContent);
    }

    let body = &raw[start..=end];
    serde_json::from_str(body).map_err(|e| JsonResponseError::ParseFailed {
        message: e.to_string(),
        preview: preview(body),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fence() {
        let raw = "```json\n{\"a\":1}\n```";
        assert_eq!(strip_code_fence(raw), "{\"a\":1}");
    }

    #[test]
    fn strips_bare_fence() {
        let raw = "```\n{\"a\":1}\n```";
        assert_eq!(strip_code_fence(raw), "{\"a\":1}");
    }

    #[test]
    fn leaves_unfenced_text_alone() {
        let raw = "{\"a\":1}";
        assert_eq!(strip_code_fence(raw), "{\"a\":1}");
    }

    #[test]
    fn parse_fenced_json_succeeds() {
        let raw = "```json\n{\"a\":1}\n```";
        let value = parse_fenced_json(raw).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn parse_fenced_json_reports_preview_on_failure() {
        let raw = "not json at all";
        let err = parse_fenced_json(raw).unwrap_err();
        match err {
            JsonResponseError::ParseFailed { preview, .. } => {
                assert!(preview.contains("not json"));
            }
            _ => panic!("expected ParseFailed"),
        }
    }

    #[test]
    fn extract_single_json_object_rejects_trailing_content() {
        let raw = "{\"a\":1} and then some trailer";
        let err = extract_single_json_object(raw).unwrap_err();
        assert!(matches!(err, JsonResponseError::TrailingContent));
    }

    #[test]
    fn extract_single_json_object_accepts_surrounding_whitespace() {
        let raw = "  \n{\"a\":1}\n  ";
        let value = extract_single_json_object(raw).unwrap();
        assert_eq!(value["a"], 1);
    }
}
