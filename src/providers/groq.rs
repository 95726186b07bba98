//! Groq provider, an OpenAI-compatible chat-completions API served from
//! Groq's LPU inference endpoint.

use std::collections::HashMap;

use serde_json::{json, Value};

use super::{check_http_response, recover_json, Message, ModelProvider, ProviderError, Role};

const API_BASE: &str = "https://api.groq.com/openai/v1/chat/completions";

/// Groq chat-completions API provider.
pub struct GroqProvider {
    api_key: String,
    client: reqwest::Client,
}

impl GroqProvider {
    /// Build a provider bound to `api_key`.
    #[must_use]
    pub fn new(api_key: String) -> Self {
        Self { api_key, client: reqwest::Client::new() }
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
        json_mode: bool,
    ) -> Result<Value, ProviderError> {
        let mut body = json!({
            "model": model,
            "messages": Self::render_messages(messages, system),
            "temperature": temperature,
            "max_tokens": max_tokens,
        });
        if json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }

        let response = self.client.post(API_BASE).bearer_auth(&self.api_key).json(&body).send().await?;
        let payload = check_http_response(response).await?;
        serde_json::from_str(&payload).map_err(|e| ProviderError::Parse(e.to_string()))
    }
}

#[async_trait::async_trait]
impl ModelProvider for GroqProvider {
    async fn complete(
        &self,
        messages: &[Message],
        model: &str,
        system: Option<&str>,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        let parsed = self.request(messages, model, system, temperature, max_tokens, false).await?;
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
        // Groq's json_object mode has no schema parameter; fold the schema
        // into the prompt instead when one was requested.
        let augmented_system = schema.map(|schema| {
            let base = system.unwrap_or_default();
            format!("{base}\nRespond with JSON matching this schema: {schema}")
        });
        let parsed = self
            .request(messages, model, augmented_system.as_deref().or(system), temperature, max_tokens, schema.is_some())
            .await?;
        Ok(recover_json(&extract_content(&parsed)))
    }

    fn name(&self) -> &str {
        "groq"
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
