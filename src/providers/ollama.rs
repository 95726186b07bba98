//! Ollama `/api/chat` provider, for local models with no hosted API key.

use std::collections::HashMap;

use serde_json::{json, Value};

use super::{check_http_response, recover_json, Message, ModelProvider, ProviderError, Role};

const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:11434";

/// Local Ollama chat API provider.
pub struct OllamaProvider {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Build a provider pointed at `base_url`, defaulting to the local
    /// Ollama daemon.
    #[must_use]
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_ENDPOINT.to_owned()),
            client: reqwest::Client::new(),
        }
    }

    fn render_messages(messages: &[Message], system: Option<&str>) -> Vec<Value> {
        let mut rendered = Vec::with_capacity(messages.len().saturating_add(1));
        if let Some(system) = system {
            rendered.push(json!({"role": "system", "content": system}));
        }
        for message in messages {
            let role = match message.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            rendered.push(json!({"role": role, "content": message.content}));
        }
        rendered
    }

    async fn request(
        &self,
        messages: &[Message],
        model: &str,
        system: Option<&str>,
        temperature: f64,
        max_tokens: u32,
        format: Option<&Value>,
    ) -> Result<Value, ProviderError> {
        let mut body = json!({
            "model": model,
            "messages": Self::render_messages(messages, system),
            "stream": false,
            "options": {"temperature": temperature, "num_predict": max_tokens},
        });
        if let Some(format) = format {
            body["format"] = format.clone();
        }

        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let response = self.client.post(url).json(&body).send().await?;
        let payload = check_http_response(response).await?;
        serde_json::from_str(&payload).map_err(|e| ProviderError::Parse(e.to_string()))
    }
}

#[async_trait::async_trait]
impl ModelProvider for OllamaProvider {
    async fn complete(
        &self,
        messages: &[Message],
        model: &str,
        system: Option<&str>,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        let parsed = self.request(messages, model, system, temperature, max_tokens, None).await?;
        Ok(extract_content(&parsed))
    }

    async fn complete_json(
        &self,
        messages: &[Message],
        model: &str,
        system: Option<&str>,
        schema: Option<&Value>,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<HashMap<String, Value>, ProviderError> {
        let parsed = self.request(messages, model, system, temperature, max_tokens, schema).await?;
        Ok(recover_json(&extract_content(&parsed)))
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

fn extract_content(parsed: &Value) -> String {
    parsed
        .get("message")
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}
