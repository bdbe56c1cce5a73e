//! Thin HTTP transport clients for the review router's LLM-backed agents:
//! Anthropic, OpenAI, Azure OpenAI (chat-completion providers) and Ollama
//! (local streaming generation). No prompt construction, parsing, or
//! severity mapping lives here — that's the agents crate's job; this crate
//! only knows how to shape and send a request and hand back raw text.

pub mod anthropic;
pub mod error;
pub mod ollama;
pub mod openai;
pub mod types;

use async_trait::async_trait;

pub use error::ProviderError;
pub use types::{ChatRequest, ChatResponse};

/// A chat-completion transport, implemented by each of the three remote
/// LLM providers. Retry/backoff per spec §4.2 is embedded in each
/// implementation's `chat`.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}
