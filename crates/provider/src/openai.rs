use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use revrouter_core::retry::{plan_retry, RetryDecision};

use crate::error::ProviderError;
use crate::types::{token_param_for_model, ChatRequest, ChatResponse, TokenParam};
use crate::ChatClient;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

fn build_messages(request: &ChatRequest) -> Vec<serde_json::Value> {
    let mut messages = Vec::new();
    if let Some(system) = &request.system_prompt {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": request.user_prompt}));
    messages
}

fn build_body(request: &ChatRequest) -> serde_json::Value {
    let mut body = json!({
        "model": request.model,
        "messages": build_messages(request),
        "temperature": request.temperature,
    });
    if let Some(max_tokens) = request.max_tokens {
        match token_param_for_model(&request.model) {
            TokenParam::MaxTokens => body["max_tokens"] = json!(max_tokens),
            TokenParam::MaxCompletionTokens => body["max_completion_tokens"] = json!(max_tokens),
        }
    }
    if request.json_response_format {
        body["response_format"] = json!({"type": "json_object"});
    }
    body
}

fn extract_text(parsed: &serde_json::Value) -> Option<String> {
    parsed
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
}

fn extract_tokens_used(parsed: &serde_json::Value) -> Option<u64> {
    parsed
        .get("usage")
        .and_then(|u| u.get("completion_tokens"))
        .and_then(|t| t.as_u64())
}

async fn send_request(
    client: &reqwest::Client,
    url: &str,
    headers: &[(&str, &str)],
    request: &ChatRequest,
) -> Result<ChatResponse, ProviderError> {
    let body = build_body(request);
    let mut builder = client.post(url).json(&body);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }

    let response = builder
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

    let text = extract_text(&parsed).ok_or(ProviderError::EmptyResponse)?;
    let tokens_used = extract_tokens_used(&parsed);
    Ok(ChatResponse { text, tokens_used })
}

async fn chat_with_retry<F, Fut>(send_once: F) -> Result<ChatResponse, ProviderError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<ChatResponse, ProviderError>>,
{
    let mut attempt = 0u32;
    loop {
        match send_once().await {
            Ok(response) => return Ok(response),
            Err(err) => {
                let failure = err.as_retry_failure();
                let (decision, delay) = plan_retry(attempt, &failure);
                if decision == RetryDecision::GiveUp {
                    return Err(err);
                }
                warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying chat-completions request");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
        }
    }
}

#[async_trait]
impl ChatClient for OpenAiClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let auth_header = format!("Bearer {}", self.api_key);
        chat_with_retry(|| {
            send_request(
                &self.client,
                &url,
                &[("Authorization", auth_header.as_str())],
                request,
            )
        })
        .await
    }
}

/// Azure OpenAI: a deployment-scoped base URL carrying an API-version query
/// and an `api-key` header instead of a bearer token (spec §4.2).
pub struct AzureOpenAiClient {
    client: reqwest::Client,
    endpoint: String,
    deployment: String,
    api_version: String,
    api_key: String,
}

impl AzureOpenAiClient {
    pub fn new(api_key: String, endpoint: String, deployment: String, api_version: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            deployment,
            api_version: api_version.unwrap_or_else(|| "2024-06-01".to_string()),
            api_key,
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.deployment, self.api_version
        )
    }
}

#[async_trait]
impl ChatClient for AzureOpenAiClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let url = self.url();
        chat_with_retry(|| {
            send_request(&self.client, &url, &[("api-key", self.api_key.as_str())], request)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(model: &str) -> ChatRequest {
        ChatRequest {
            system_prompt: Some("system".to_string()),
            user_prompt: "user".to_string(),
            model: model.to_string(),
            max_tokens: Some(100),
            temperature: 0.3,
            json_response_format: true,
        }
    }

    #[test]
    fn legacy_model_gets_max_tokens_param() {
        let body = build_body(&request("gpt-4o"));
        assert_eq!(body["max_tokens"], 100);
        assert!(body.get("max_completion_tokens").is_none());
    }

    #[test]
    fn reasoning_model_gets_max_completion_tokens_param() {
        let body = build_body(&request("gpt-5.2"));
        assert_eq!(body["max_completion_tokens"], 100);
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn json_response_format_is_set_when_requested() {
        let body = build_body(&request("gpt-4o"));
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[test]
    fn azure_url_is_deployment_scoped_with_api_version() {
        let client = AzureOpenAiClient::new(
            "key".to_string(),
            "https://my-resource.openai.azure.com".to_string(),
            "gpt4-prod".to_string(),
            None,
        );
        let url = client.url();
        assert!(url.contains("/openai/deployments/gpt4-prod/chat/completions"));
        assert!(url.contains("api-version=2024-06-01"));
    }

    #[test]
    fn extract_text_reads_first_choice_message_content() {
        let parsed = json!({
            "choices": [{"message": {"content": "hello"}}]
        });
        assert_eq!(extract_text(&parsed), Some("hello".to_string()));
    }
}
