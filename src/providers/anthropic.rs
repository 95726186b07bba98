//! Anthropic `/v1/messages` provider, with native JSON-schema-constrained
//! tool use for structured output.

use std::collections::HashMap;

use serde_json::{json, Value};

use super::{check_http_response, recover_json, Message, ModelProvider, ProviderError, Role};

const API_BASE: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Anthropic messages-API provider.
pub struct AnthropicProvider {
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Build a provider bound to `api_key`.
    #[must_use]
    pub fn new(api_key: String) -> Self {
        Self { api_key, client: reqwest::Client::new() }
    }

    fn render_messages(messages: &[Message]) -> (Option<String>, Vec<Value>) {
        let mut system = None;
        let mut rendered = Vec::with_capacity(messages.len());
        for message in messages {
            match message.role {
                Role::System => system = Some(message.content.clone()),
                Role::User => rendered.push(json!({"role": "user", "content": message.content})),
                Role::Assistant => rendered.push(json!({"role": "assistant", "content": message.content})),
            }
        }
        (system, rendered)
    }

    async fn request(
        &self,
        messages: &[Message],
        model: &str,
        system: Option<&str>,
        temperature: f64,
        max_tokens: u32,
        tool_schema: Option<&Value>,
    ) -> Result<Value, ProviderError> {
        let (inferred_system, rendered) = Self::render_messages(messages);
        let mut body = json!({
            "model": model,
            "messages": rendered,
            "max_tokens": max_tokens,
            "temperature": temperature,
        });
        if let Some(system) = system.map(str::to_owned).or(inferred_system) {
            body["system"] = json!(system);
        }
        if let Some(schema) = tool_schema {
            body["tools"] = json!([{
                "name": "emit_result",
                "description": "Emit the structured result.",
                "input_schema": schema,
            }]);
            body["tool_choice"] = json!({"type": "tool", "name": "emit_result"});
        }

        let response = self
            .client
            .post(API_BASE)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;
        let payload = check_http_response(response).await?;
        serde_json::from_str(&payload).map_err(|e| ProviderError::Parse(e.to_string()))
    }
}

#[async_trait::async_trait]
impl ModelProvider for AnthropicProvider {
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
        if let Some(schema) = schema {
            let parsed = self
                .request(messages, model, system, temperature, max_tokens, Some(schema))
                .await?;
            if let Some(input) = extract_tool_input(&parsed) {
                if let Value::Object(map) = input {
                    return Ok(map.into_iter().collect());
                }
            }
            return Ok(HashMap::new());
        }
        let text = self.complete(messages, model, system, temperature, max_tokens).await?;
        Ok(recover_json(&text))
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

fn extract_text(parsed: &Value) -> String {
    parsed
        .get("content")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|item| item.get("text").and_then(Value::as_str))
        .collect()
}

fn extract_tool_input(parsed: &Value) -> Option<Value> {
    parsed
        .get("content")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .find(|item| item.get("type").and_then(Value::as_str) == Some("tool_use"))
        .and_then(|item| item.get("input").cloned())
}
