//! The `ChatBackend` capability and its per-provider implementations.
//!
//! Every variant speaks the same OpenAI-compatible chat-completions body;
//! only the endpoint shape and auth differ, so the string prefix of a
//! model id never leaks past construction.

use crate::client::with_retries;
use crate::error::{BackendError, Result};
use crate::wire::{ChatRequest, ChatResponse};
use async_trait::async_trait;
use costwise_protocol::Provider;
use std::time::Instant;

/// A completed chat call, flattened for the executor and the perf store.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub response_time_ms: u64,
}

/// One backend the executor can drive. Implementations retry transient
/// failures internally; callers see the final classification.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn provider(&self) -> Provider;

    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome>;
}

/// POST an OpenAI-compatible body and flatten the response.
async fn post_chat(
    client: &reqwest::Client,
    url: &str,
    api_key: Option<&str>,
    request: &ChatRequest,
) -> Result<ChatOutcome> {
    let start = Instant::now();

    let mut builder = client.post(url).json(request);
    if let Some(key) = api_key {
        builder = builder.header("Authorization", format!("Bearer {key}"));
    }

    let response = builder.send().await.map_err(BackendError::from)?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BackendError::from_status(status.as_u16(), body));
    }

    let parsed: ChatResponse = response
        .json()
        .await
        .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

    let content = parsed
        .choices
        .first()
        .and_then(|c| c.message.content.clone())
        .ok_or_else(|| BackendError::InvalidResponse("response carried no content".into()))?;

    let usage = parsed.usage.unwrap_or_default();
    Ok(ChatOutcome {
        content,
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        response_time_ms: start.elapsed().as_millis() as u64,
    })
}

/// OpenAI-compatible chat endpoint served on loopback (LM Studio class).
pub struct LmStudioBackend {
    client: reqwest::Client,
    base_url: String,
}

impl LmStudioBackend {
    /// `base_url` includes the `/v1` segment.
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub(crate) fn models_url(&self) -> String {
        format!("{}/models", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ChatBackend for LmStudioBackend {
    fn provider(&self) -> Provider {
        Provider::LocalStudio
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        with_retries("lm-studio chat", || post_chat(&self.client, &url, None, &request)).await
    }
}

/// Plain local chat endpoint (Ollama class). Chat goes through its
/// OpenAI-compatible facade; enumeration uses the native tag listing.
pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaBackend {
    /// `base_url` is the bare host endpoint, without `/v1`.
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub(crate) fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ChatBackend for OllamaBackend {
    fn provider(&self) -> Provider {
        Provider::LocalOllama
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome> {
        let url = format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        with_retries("ollama chat", || post_chat(&self.client, &url, None, &request)).await
    }
}

/// Hosted aggregator (OpenRouter class).
pub struct OpenRouterBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenRouterBackend {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    pub(crate) fn models_url(&self) -> String {
        format!("{}/models", self.base_url.trim_end_matches('/'))
    }

    pub(crate) fn api_key(&self) -> &str {
        &self.api_key
    }
}

#[async_trait]
impl ChatBackend for OpenRouterBackend {
    fn provider(&self) -> Provider {
        Provider::RemoteAggregator
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        with_retries("openrouter chat", || {
            post_chat(&self.client, &url, Some(&self.api_key), &request)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_shapes() {
        let client = reqwest::Client::new();
        let lm = LmStudioBackend::new(client.clone(), "http://127.0.0.1:1234/v1/");
        assert_eq!(lm.models_url(), "http://127.0.0.1:1234/v1/models");

        let ollama = OllamaBackend::new(client.clone(), "http://127.0.0.1:11434");
        assert_eq!(ollama.tags_url(), "http://127.0.0.1:11434/api/tags");

        let or = OpenRouterBackend::new(client, "https://openrouter.ai/api/v1", "key");
        assert_eq!(or.models_url(), "https://openrouter.ai/api/v1/models");
    }
}
