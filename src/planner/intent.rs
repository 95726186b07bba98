//! Natural-language intent classification: the first model call in the
//! planning pipeline, turning free text into a [`ParsedIntent`].

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::providers::{Message, ModelProvider};
use crate::types::{IntentType, ParsedIntent};

const SYSTEM_PROMPT: &str = r#"You classify user messages into structured intent for a research and
drafting assistant. Respond with JSON only, matching the given schema.

Rules:
1. If the request references content that was never provided (code to
   review, a document to analyze, data to extract from), set
   needs_clarification to true and ask for the missing content.
2. If the message is empty, malformed, or genuinely unparseable, return
   intent_type "unknown", confidence 0.0, needs_clarification true, and a
   generic clarification question.
3. If the request is vague but a reasonable guess is possible, lower the
   confidence (0.4-0.6) rather than asking for clarification.
4. Requests that describe criteria, preferences, or constraints for finding
   or researching something are "research", never "chitchat" — "romantic
   dinner downtown" and "escape rooms for couples" are research requests.
5. Only classify as "chitchat" for pure greetings, small talk, or off-topic
   conversation. When in doubt, classify as "research".

Examples:

User: "Research my competitors in the EV charging space and draft a one-pager"
{"intent_type": "research", "confidence": 0.9, "subject": "competitors in EV charging market", "deliverable": "one-pager document", "constraints": ["EV charging industry"], "needs_clarification": false, "clarification_question": null}

User: "Hey, how's it going?"
{"intent_type": "chitchat", "confidence": 0.95, "subject": "greeting", "deliverable": null, "constraints": [], "needs_clarification": false, "clarification_question": null}

User: "Review this code for security issues"
{"intent_type": "review", "confidence": 0.85, "subject": "code security review", "deliverable": "security assessment", "constraints": ["security focus"], "needs_clarification": true, "clarification_question": "I can help review code for security issues. Could you share the code you'd like me to review?"}

User: "Best restaurants in Austin for a business dinner"
{"intent_type": "research", "confidence": 0.9, "subject": "business dinner restaurants in Austin", "deliverable": "restaurant recommendations", "constraints": ["Austin", "business appropriate"], "needs_clarification": false, "clarification_question": null}

Respond ONLY with JSON."#;

fn intent_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "intent_type": {
                "type": "string",
                "enum": ["research", "synthesize", "analyze", "draft", "review", "extract", "clarify", "chitchat", "unknown"],
            },
            "confidence": {"type": "number", "minimum": 0, "maximum": 1},
            "subject": {"type": "string"},
            "deliverable": {"type": ["string", "null"]},
            "constraints": {"type": "array", "items": {"type": "string"}},
            "needs_clarification": {"type": "boolean"},
            "clarification_question": {"type": ["string", "null"]},
        },
        "required": ["intent_type", "confidence", "subject", "needs_clarification"],
    })
}

/// Classifies raw user input into a [`ParsedIntent`] via a single
/// structured-JSON model call.
pub struct IntentParser {
    provider: Arc<dyn ModelProvider>,
    model: String,
}

impl IntentParser {
    /// Build a parser bound to `provider`, issuing completions against
    /// `model`.
    #[must_use]
    pub fn new(provider: Arc<dyn ModelProvider>, model: String) -> Self {
        Self { provider, model }
    }

    /// Parse `user_input` into structured intent. Never fails: a model or
    /// transport error yields an [`IntentType::Unknown`] result that asks
    /// the caller to rephrase.
    pub async fn parse(&self, user_input: &str) -> ParsedIntent {
        let messages = [Message::user(user_input)];
        let schema = intent_schema();

        match self
            .provider
            .complete_json(&messages, &self.model, Some(SYSTEM_PROMPT), Some(&schema), 0.1, 1024)
            .await
        {
            Ok(parsed) => from_model_output(&parsed, user_input),
            Err(err) => {
                tracing::warn!(error = %err, "intent parsing failed");
                fallback_intent(user_input)
            }
        }
    }
}

fn from_model_output(parsed: &HashMap<String, Value>, user_input: &str) -> ParsedIntent {
    let intent_type = parsed
        .get("intent_type")
        .and_then(Value::as_str)
        .and_then(|s| serde_json::from_value::<IntentType>(Value::String(s.to_owned())).ok())
        .unwrap_or(IntentType::Unknown);

    let constraints = parsed
        .get("constraints")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_owned).collect())
        .unwrap_or_default();

    ParsedIntent {
        intent_type,
        confidence: parsed.get("confidence").and_then(Value::as_f64).unwrap_or(0.5),
        subject: parsed.get("subject").and_then(Value::as_str).unwrap_or_default().to_owned(),
        deliverable: parsed.get("deliverable").and_then(Value::as_str).map(str::to_owned),
        constraints,
        context: HashMap::new(),
        raw_input: user_input.to_owned(),
        needs_clarification: parsed.get("needs_clarification").and_then(Value::as_bool).unwrap_or(false),
        clarification_question: parsed.get("clarification_question").and_then(Value::as_str).map(str::to_owned),
    }
}

fn fallback_intent(user_input: &str) -> ParsedIntent {
    ParsedIntent {
        intent_type: IntentType::Unknown,
        confidence: 0.0,
        subject: String::new(),
        deliverable: None,
        constraints: Vec::new(),
        context: HashMap::new(),
        raw_input: user_input.to_owned(),
        needs_clarification: true,
        clarification_question: Some("I had trouble understanding that. Could you rephrase?".to_owned()),
    }
}

const GREETING_KEYWORDS: &[&str] =
    &["hey", "hi", "hello", "how are you", "what's up", "good morning", "good evening"];

/// Canned reply for a chitchat-classified intent, matching the greeting
/// against a small keyword table.
#[must_use]
pub fn chitchat_response(intent: &ParsedIntent) -> String {
    let lower = intent.raw_input.to_lowercase();
    if GREETING_KEYWORDS.iter().any(|g| lower.contains(g)) {
        return "Hey! I'm Zulu, your research assistant. What can I help you with today?".to_owned();
    }
    "I'm here to help with research, analysis, and document drafting. What would you like me to work on?".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chitchat_response_recognizes_a_greeting() {
        let intent = ParsedIntent {
            intent_type: IntentType::Chitchat,
            confidence: 0.95,
            subject: "greeting".to_owned(),
            deliverable: None,
            constraints: Vec::new(),
            context: HashMap::new(),
            raw_input: "Hey, how's it going?".to_owned(),
            needs_clarification: false,
            clarification_question: None,
        };
        assert!(chitchat_response(&intent).contains("Zulu"));
    }

    #[test]
    fn chitchat_response_falls_back_for_non_greeting_small_talk() {
        let intent = ParsedIntent {
            intent_type: IntentType::Chitchat,
            confidence: 0.8,
            subject: "off-topic".to_owned(),
            deliverable: None,
            constraints: Vec::new(),
            context: HashMap::new(),
            raw_input: "lol nice".to_owned(),
            needs_clarification: false,
            clarification_question: None,
        };
        assert!(chitchat_response(&intent).contains("research"));
    }

    #[test]
    fn from_model_output_defaults_unknown_intent_type_on_garbage_tag() {
        let mut parsed = HashMap::new();
        parsed.insert("intent_type".to_owned(), Value::from("not-a-real-type"));
        parsed.insert("confidence".to_owned(), Value::from(0.7));
        parsed.insert("subject".to_owned(), Value::from("x"));
        parsed.insert("needs_clarification".to_owned(), Value::from(false));
        let intent = from_model_output(&parsed, "x");
        assert_eq!(intent.intent_type, IntentType::Unknown);
    }

    #[test]
    fn from_model_output_reads_constraints_list() {
        let mut parsed = HashMap::new();
        parsed.insert("intent_type".to_owned(), Value::from("research"));
        parsed.insert("confidence".to_owned(), Value::from(0.9));
        parsed.insert("subject".to_owned(), Value::from("x"));
        parsed.insert("needs_clarification".to_owned(), Value::from(false));
        parsed.insert("constraints".to_owned(), Value::from(vec!["a", "b"]));
        let intent = from_model_output(&parsed, "x");
        assert_eq!(intent.constraints, vec!["a".to_owned(), "b".to_owned()]);
    }
}
