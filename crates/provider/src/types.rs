use serde::{Deserialize, Serialize};

/// A single chat-completion request, shaped generically enough to cover
/// Anthropic's messages API and the OpenAI-compatible chat-completions API.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: f32,
    /// When set, the OpenAI/Azure transport applies the JSON
    /// response-format constraint (spec §4.2).
    pub json_response_format: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub text: String,
    pub tokens_used: Option<u64>,
}

/// A model family's token-parameter compatibility shim: some chat-completion
/// families take `max_tokens`, newer ones take `max_completion_tokens`
/// (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenParam {
    MaxTokens,
    MaxCompletionTokens,
}

pub fn token_param_for_model(model: &str) -> TokenParam {
    // Reasoning-family models (o1/o3/o4, gpt-5*) reject `max_tokens` and
    // require `max_completion_tokens`.
    let lower = model.to_ascii_lowercase();
    if lower.starts_with("o1")
        || lower.starts_with("o3")
        || lower.starts_with("o4")
        || lower.starts_with("gpt-5")
    {
        TokenParam::MaxCompletionTokens
    } else {
        TokenParam::MaxTokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasoning_models_use_max_completion_tokens() {
        assert_eq!(token_param_for_model("gpt-5.2"), TokenParam::MaxCompletionTokens);
        assert_eq!(token_param_for_model("o3-mini"), TokenParam::MaxCompletionTokens);
    }

    #[test]
    fn legacy_models_use_max_tokens() {
        assert_eq!(token_param_for_model("gpt-4o"), TokenParam::MaxTokens);
    }
}
