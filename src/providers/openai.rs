//! OpenAI-compatible chat-completions provider. Also backs the
//! `lmstudio`/self-hosted OpenAI-shaped endpoints via a configurable base URL.

use std::collections::HashMap;

use serde_json::{json, Value};

use super::{check_http_response, recover_json, Message, ModelProvider, ProviderError, Role};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI chat-completions API provider.
pub struct OpenAiProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    /// Build a provider, optionally pointed at a compatible alternate base URL.
    #[must_use]
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_owned()),
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
        json_schema: Option<&Value>,
    ) -> Result<Value, ProviderError> {
        let mut body = json!({
            "model": model,
            "messages": Self::render_messages(messages, system),
            "temperature": temperature,
            "max_tokens": max_tokens,
        });
        if let Some(schema) = json_schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {"name": "result", "schema": schema, "strict": true},
            });
        }

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let payload = check_http_response(response).await?;
        serde_json::from_str(&payload).map_err(|e| ProviderError::Parse(e.to_string()))
    }
}

#[async_trait::async_trait]
impl ModelProvider for OpenAiProvider {
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
        "openai"
    }
}

fn extract_content(parsed: &Value) -> String {
    parsed
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}
