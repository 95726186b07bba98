//! Google Gemini `generateContent` provider.

use std::collections::HashMap;

use serde_json::{json, Value};

use super::{check_http_response, recover_json, Message, ModelProvider, ProviderError, Role};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Gemini generative-language API provider.
pub struct GeminiProvider {
    api_key: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    /// Build a provider bound to `api_key`.
    #[must_use]
    pub fn new(api_key: String) -> Self {
        Self { api_key, client: reqwest::Client::new() }
    }

    fn render_contents(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|message| {
                let role = if message.role == Role::Assistant { "model" } else { "user" };
                json!({"role": role, "parts": [{"text": message.content}]})
            })
            .collect()
    }

    async fn request(
        &self,
        messages: &[Message],
        model: &str,
        system: Option<&str>,
        temperature: f64,
        max_tokens: u32,
        response_schema: Option<&Value>,
    ) -> Result<Value, ProviderError> {
        let mut generation_config = json!({
            "temperature": temperature,
            "maxOutputTokens": max_tokens,
        });
        if let Some(schema) = response_schema {
            generation_config["responseMimeType"] = json!("application/json");
            generation_config["responseSchema"] = schema.clone();
        }

        let mut body = json!({
            "contents": Self::render_contents(messages),
            "generationConfig": generation_config,
        });
        let system_text = system.map(str::to_owned).or_else(|| {
            messages.iter().find(|m| m.role == Role::System).map(|m| m.content.clone())
        });
        if let Some(system_text) = system_text {
            body["systemInstruction"] = json!({"parts": [{"text": system_text}]});
        }

        let url = format!("{API_BASE}/{model}:generateContent?key={}", self.api_key);
        let response = self.client.post(url).json(&body).send().await?;
        let payload = check_http_response(response).await?;
        serde_json::from_str(&payload).map_err(|e| ProviderError::Parse(e.to_string()))
    }
}

#[async_trait::async_trait]
impl ModelProvider for GeminiProvider {
    async fn complete(
        &self,
        messages: &[Message],
        model: &str,
        system: Option<&str>,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        let parsed = self.request(messages, model, system, temperature, max_tokens, None).await?;
        Ok(extract_text(&parsed))
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
        Ok(recover_json(&extract_text(&parsed)))
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

fn extract_text(parsed: &Value) -> String {
    parsed
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect()
}
