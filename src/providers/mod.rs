//! Uniform LLM provider facade used by the intent parser, task decomposer,
//! and the task graph executor's direct-completion fallback.
//!
//! Every provider exposes the same two operations — [`ModelProvider::complete`]
//! and [`ModelProvider::complete_json`] — regardless of whether the
//! underlying API has native structured output. Providers that lack one
//! fall back to [`recover_json`], the only place in the control plane that
//! tolerates non-strict model output.

use std::collections::HashMap;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod anthropic;
pub mod gemini;
pub mod groq;
pub mod ollama;
pub mod openai;

/// Conversation participant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instruction.
    System,
    /// Human user turn.
    User,
    /// Assistant turn.
    Assistant,
}

/// One turn of conversation sent to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message author.
    pub role: Role,
    /// Plain-text content.
    pub content: String,
}

impl Message {
    /// Build a user-role message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

/// Token accounting for a single completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsageStats {
    /// Tokens consumed by the prompt.
    pub input_tokens: u64,
    /// Tokens generated in the response.
    pub output_tokens: u64,
}

/// Errors returned by a model provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP transport failure.
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Response body did not match the expected shape.
    #[error("provider response parse error: {0}")]
    Parse(String),
    /// Upstream responded with a non-2xx status.
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Sanitized response body.
        body: String,
    },
    /// The provider is not configured (e.g. missing API key).
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// Core model-provider interface, implemented once per vendor shape.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Request a plain-text completion.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on transport, HTTP, or parse failure.
    async fn complete(
        &self,
        messages: &[Message],
        model: &str,
        system: Option<&str>,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String, ProviderError>;

    /// Request a completion constrained to JSON, optionally against
    /// `schema`. Providers without native structured output fall back to
    /// [`recover_json`] over the raw text.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on transport, HTTP, or parse failure. A
    /// reply that cannot be coerced into JSON by any recovery step yields
    /// `Ok(HashMap::new())`, per the facade's tolerant-output contract.
    async fn complete_json(
        &self,
        messages: &[Message],
        model: &str,
        system: Option<&str>,
        schema: Option<&Value>,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<HashMap<String, Value>, ProviderError>;

    /// The short registry name this instance was constructed under.
    fn name(&self) -> &str;
}

/// Check an HTTP response's status and return its body, sanitizing any
/// leaked credential-shaped substrings from error bodies.
///
/// # Errors
///
/// Returns [`ProviderError::Request`] on transport failure,
/// [`ProviderError::HttpStatus`] on a non-2xx status.
pub async fn check_http_response(response: reqwest::Response) -> Result<String, ProviderError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ProviderError::HttpStatus {
            status: status.as_u16(),
            body: sanitize_http_error_body(&body),
        });
    }
    Ok(body)
}

fn sanitize_http_error_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut sanitized = collapsed;
    for pattern in [
        r"sk-ant-[A-Za-z0-9_\-]{10,}",
        r"sk-[A-Za-z0-9]{32,}",
        r"ghp_[A-Za-z0-9]{20,}",
        r"glpat-[A-Za-z0-9_\-]{16,}",
        r"xoxb-[A-Za-z0-9\-]{20,}",
    ] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    const MAX_ERROR_BODY_CHARS: usize = 256;
    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized.chars().take(MAX_ERROR_BODY_CHARS).collect::<String>();
        return format!("{shortened}...[truncated]");
    }
    sanitized
}

/// Maximum number of characters logged from a raw reply that defeated
/// every recovery step.
pub const JSON_RECOVERY_LOG_CHARS: usize = 500;

/// Attempt to coerce `raw` into a JSON object, trying progressively more
/// permissive extraction strategies. Returns an empty map (and logs the
/// first [`JSON_RECOVERY_LOG_CHARS`] characters of `raw`) if every
/// strategy fails.
#[must_use]
pub fn recover_json(raw: &str) -> HashMap<String, Value> {
    if let Some(map) = try_parse(raw) {
        return map;
    }
    let trimmed = raw.trim();
    if let Some(map) = try_parse(trimmed) {
        return map;
    }
    if let Some(fenced) = extract_fenced_block(trimmed) {
        if let Some(map) = try_parse(&fenced) {
            return map;
        }
    }
    if let Some(object_span) = extract_span(trimmed, '{', '}') {
        if let Some(map) = try_parse(&object_span) {
            return map;
        }
    }
    if let Some(array_span) = extract_span(trimmed, '[', ']') {
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&array_span) {
            return HashMap::from([("items".to_owned(), Value::Array(items))]);
        }
    }

    let truncated: String = raw.chars().take(JSON_RECOVERY_LOG_CHARS).collect();
    tracing::warn!(raw_reply = %truncated, "json recovery exhausted every strategy");
    HashMap::new()
}

fn try_parse(text: &str) -> Option<HashMap<String, Value>> {
    match serde_json::from_str::<Value>(text).ok()? {
        Value::Object(map) => Some(map.into_iter().collect()),
        _ => None,
    }
}

fn extract_fenced_block(text: &str) -> Option<String> {
    let start = text.find("```")?;
    let after_fence = &text[start.saturating_add(3)..];
    let after_fence = after_fence.strip_prefix("json").unwrap_or(after_fence);
    let end = after_fence.find("```")?;
    Some(after_fence[..end].trim().to_owned())
}

fn extract_span(text: &str, open: char, close: char) -> Option<String> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end <= start {
        return None;
    }
    Some(text[start..=end].to_owned())
}

/// Build a provider instance by its short registry name
/// (`"anthropic"`, `"openai"`, `"ollama"`, `"gemini"`, `"groq"`).
#[must_use]
pub fn build(name: &str, api_key: Option<String>, base_url: Option<String>) -> Option<Box<dyn ModelProvider>> {
    match name {
        "anthropic" => Some(Box::new(anthropic::AnthropicProvider::new(api_key?))),
        "openai" => Some(Box::new(openai::OpenAiProvider::new(api_key?, base_url))),
        "ollama" => Some(Box::new(ollama::OllamaProvider::new(base_url))),
        "gemini" => Some(Box::new(gemini::GeminiProvider::new(api_key?))),
        "groq" => Some(Box::new(groq::GroqProvider::new(api_key?))),
        _ => None,
    }
}
