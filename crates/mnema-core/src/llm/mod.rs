//! LLM collaborator
//!
//! A single seam: `complete_json(prompt, timeout) -> Option<Value>`. The
//! HTTP implementation speaks the OpenAI-compatible chat completions
//! shape, which the hosted providers and local runtimes all accept.
//! Unavailability is always non-fatal; callers drop or defer the job.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// LLM completion seam
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Request a JSON object completion for `prompt`. `None` on any
    /// failure: transport, timeout, refusal, or malformed JSON.
    async fn complete_json(&self, prompt: &str, timeout: Duration) -> Option<Value>;

    /// Whether a provider is configured at all
    fn is_available(&self) -> bool;
}

/// No provider configured; every completion is `None`
pub struct DisabledLlm;

#[async_trait]
impl LlmClient for DisabledLlm {
    async fn complete_json(&self, _prompt: &str, _timeout: Duration) -> Option<Value> {
        None
    }

    fn is_available(&self) -> bool {
        false
    }
}

// ============================================================================
// HTTP CLIENT
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat completions client
pub struct HttpLlm {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpLlm {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    /// Build from `MNEMA_LLM_URL`, `MNEMA_LLM_API_KEY` and
    /// `MNEMA_LLM_MODEL`, if configured
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("MNEMA_LLM_URL").ok()?;
        if base_url.is_empty() {
            return None;
        }
        let api_key = std::env::var("MNEMA_LLM_API_KEY").unwrap_or_default();
        let model = std::env::var("MNEMA_LLM_MODEL")
            .unwrap_or_else(|_| "gemini-2.0-flash".to_string());
        Some(Self::new(&base_url, &api_key, &model))
    }
}

/// Pull the first JSON object out of a completion, tolerating markdown
/// code fences around it
pub fn extract_json(content: &str) -> Option<Value> {
    let trimmed = content.trim();
    let inner = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest.trim_end_matches("```").trim()
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.trim_end_matches("```").trim()
    } else {
        trimmed
    };

    if let Ok(value) = serde_json::from_str(inner) {
        return Some(value);
    }

    // Fall back to the outermost brace span
    let start = inner.find('{')?;
    let end = inner.rfind('}')?;
    serde_json::from_str(&inner[start..=end]).ok()
}

#[async_trait]
impl LlmClient for HttpLlm {
    async fn complete_json(&self, prompt: &str, timeout: Duration) -> Option<Value> {
        let body = json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "Respond with a single JSON object and nothing else."
                },
                { "role": "user", "content": prompt }
            ],
            "temperature": 0.2,
        });

        let mut request = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("LLM request failed: {}", e);
                return None;
            }
        };
        if !response.status().is_success() {
            tracing::warn!("LLM request returned status {}", response.status());
            return None;
        }

        let parsed: ChatResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("LLM response malformed: {}", e);
                return None;
            }
        };

        let content = parsed.choices.first()?.message.content.as_deref()?;
        extract_json(content)
    }

    fn is_available(&self) -> bool {
        true
    }
}

// ============================================================================
// TESTS
// ============================================================================
