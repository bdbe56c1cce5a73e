//! Transport for the local Ollama endpoint. Spec §4.3: always stream
//! (Ollama's non-streaming path imposes a silent internal timeout that
//! would truncate long generations), assemble, and return the concatenated
//! result; a warm-up ping distinguishes an unreachable endpoint from a
//! real generation failure.

use futures::StreamExt;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum OllamaError {
    #[error("could not connect to Ollama at {0}")]
    Connection(String),
    #[error("ollama returned an error: {0}")]
    ServerError(String),
    #[error("ollama stream ended without a terminal frame")]
    IncompleteStream,
}

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub model: String,
    pub num_ctx: Option<u32>,
    pub num_predict: Option<u32>,
    pub timeout: Duration,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            model: "llama3".to_string(),
            num_ctx: None,
            num_predict: None,
            timeout: Duration::from_secs(10 * 60),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateFrame {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// A 10-token ping before the real request. Callers classify a
    /// connection error per spec §4.3's fail-closed-unless-opted-out rule;
    /// non-connection warm-up errors should be logged and the real request
    /// attempted anyway.
    pub async fn warm_up(&self, model: &str) -> Result<(), OllamaError> {
        let options = GenerateOptions {
            model: model.to_string(),
            num_ctx: None,
            num_predict: Some(10),
            timeout: Duration::from_secs(30),
        };
        self.generate_raw("ping", &options, 0.0, 42).await.map(|_| ())
    }

    /// Deterministic generation: `temperature=0`, `seed=42`, per spec §4.3.
    pub async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, OllamaError> {
        self.generate_raw(prompt, options, 0.0, 42).await
    }

    async fn generate_raw(
        &self,
        prompt: &str,
        options: &GenerateOptions,
        temperature: f32,
        seed: i64,
    ) -> Result<String, OllamaError> {
        let mut body = serde_json::json!({
            "model": options.model,
            "prompt": prompt,
            "stream": true,
            "options": {
                "temperature": temperature,
                "seed": seed,
            },
        });
        if let Some(num_ctx) = options.num_ctx {
            body["options"]["num_ctx"] = serde_json::json!(num_ctx);
        }
        if let Some(num_predict) = options.num_predict {
            body["options"]["num_predict"] = serde_json::json!(num_predict);
        }

        let response = tokio::time::timeout(
            options.timeout,
            self.client
                .post(format!("{}/api/generate", self.base_url))
                .json(&body)
                .send(),
        )
        .await
        .map_err(|_| OllamaError::Connection("request timed out".to_string()))?
        .map_err(|e| {
            if e.is_connect() {
                OllamaError::Connection(e.to_string())
            } else {
                OllamaError::ServerError(e.to_string())
            }
        })?;

        let mut byte_stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut assembled = String::new();
        let mut saw_done = false;

        loop {
            if let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].to_string();
                buffer = buffer[pos + 1..].to_string();
                if line.trim().is_empty() {
                    continue;
                }
                let frame: GenerateFrame = serde_json::from_str(&line)
                    .map_err(|e| OllamaError::ServerError(format!("malformed stream frame: {e}")))?;
                if let Some(error) = frame.error {
                    return Err(OllamaError::ServerError(error));
                }
                assembled.push_str(&frame.response);
                if frame.done {
                    saw_done = true;
                    break;
                }
                continue;
            }

            match tokio::time::timeout(options.timeout, byte_stream.next()).await {
                Ok(Some(Ok(bytes))) => buffer.push_str(&String::from_utf8_lossy(&bytes)),
                Ok(Some(Err(e))) => return Err(OllamaError::ServerError(e.to_string())),
                Ok(None) => break,
                Err(_) => return Err(OllamaError::Connection("stream read timed out".to_string())),
            }
        }

        if !saw_done {
            return Err(OllamaError::IncompleteStream);
        }

        Ok(assembled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_use_ten_minute_timeout() {
        let options = GenerateOptions::default();
        assert_eq!(options.timeout, Duration::from_secs(600));
    }

    #[test]
    fn base_url_trims_trailing_slash() {
        let client = OllamaClient::new("http://localhost:11434/".to_string());
        assert_eq!(client.base_url, "http://localhost:11434");
    }
}
