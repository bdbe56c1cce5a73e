use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use revrouter_core::retry::{plan_retry, RetryDecision};

use crate::error::ProviderError;
use crate::types::{ChatRequest, ChatResponse};
use crate::ChatClient;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AnthropicClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
        }
    }

    async fn send_once(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut body = json!({
            "model": request.model,
            "messages": [{"role": "user", "content": request.user_prompt}],
            "temperature": request.temperature,
        });
        if let Some(system) = &request.system_prompt {
            body["system"] = json!(system);
        }
        let max_tokens = request.max_tokens.unwrap_or(4096);
        body["max_tokens"] = json!(max_tokens);

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            let body_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_http(
                status.as_u16(),
                body_text,
                retry_after.as_deref(),
            ));
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Deserialization(e.to_string()))?;

        let text = parsed
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|items| items.iter().find(|i| i.get("type").and_then(|t| t.as_str()) == Some("text")))
            .and_then(|i| i.get("text"))
            .and_then(|t| t.as_str())
            .ok_or(ProviderError::EmptyResponse)?
            .to_string();

        let tokens_used = parsed
            .get("usage")
            .and_then(|u| u.get("output_tokens"))
            .and_then(|t| t.as_u64());

        Ok(ChatResponse { text, tokens_used })
    }
}

#[async_trait]
impl ChatClient for AnthropicClient {
    /// Up to `revrouter_core::retry::MAX_ATTEMPTS` attempts, delay rule per
    /// spec §4.2: 429 honors `Retry-After` else `1000*2^(attempt+2)`; 5xx/
    /// transport `1000*2^attempt`; other 4xx non-retryable.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut attempt = 0u32;
        loop {
            match self.send_once(request).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    let failure = err.as_retry_failure();
                    let (decision, delay) = plan_retry(attempt, &failure);
                    if decision == RetryDecision::GiveUp {
                        return Err(err);
                    }
                    warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying anthropic request");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_base_url_is_used_when_none_given() {
        let client = AnthropicClient::new("key".to_string(), None);
        assert_eq!(client.base_url, DEFAULT_BASE_URL);
    }
}
