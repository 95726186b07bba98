//! Turns a classified [`ParsedIntent`] into an ordered, validated set of
//! [`PlannedTask`]s via a second structured-JSON model call.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use crate::planner::{DEFAULT_TASK_TIMEOUT_SECONDS, MAX_TASKS_PER_REQUEST};
use crate::providers::{Message, ModelProvider};
use crate::types::{IntentType, ParsedIntent, PlannedTask, PlannedTaskStatus, TaskGraph, TaskType, ToolAllowlist};

const SYSTEM_PROMPT: &str = r#"You are a task decomposer. Given a classified user intent, produce a plan
of concrete tasks for a downstream executor to run.

Available task types: web_research, web_fetch, document_synthesis,
comparative_analysis, transform, summarize, code_exec.

Rules:
1. Break complex requests into 1-5 simple tasks; most requests need only one.
2. Each task has a single clear objective; vague prompts produce vague results.
3. A task may depend on earlier tasks by zero-based index; the first task is index 0.
4. Respond with JSON: {"tasks": [{"task_type": ..., "prompt": ..., "depends_on": [...], "tools_needed": [...], "domains": [...], "timeout_seconds": ...}, ...]}

Example — intent to research competitors and draft a one-pager:
{"tasks": [
  {"task_type": "web_research", "prompt": "Research the top 5 companies in the EV charging market: founding year, business model, differentiators, funding, market position.", "depends_on": [], "tools_needed": ["browse", "fetch", "chat"], "domains": [], "timeout_seconds": 300},
  {"task_type": "document_synthesis", "prompt": "Using the competitor research provided, write a one-page executive summary: market overview, key players, competitive landscape, strategic implications.", "depends_on": [0], "tools_needed": ["chat"], "domains": [], "timeout_seconds": 180}
]}

Respond ONLY with JSON."#;

fn decomposition_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "tasks": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "task_type": {
                            "type": "string",
                            "enum": ["web_research", "web_fetch", "document_synthesis", "comparative_analysis", "transform", "summarize", "code_exec"],
                        },
                        "prompt": {"type": "string"},
                        "depends_on": {"type": "array", "items": {"type": "integer"}},
                        "tools_needed": {"type": "array", "items": {"type": "string"}},
                        "domains": {"type": "array", "items": {"type": "string"}},
                        "timeout_seconds": {"type": "integer"},
                    },
                    "required": ["task_type", "prompt"],
                },
            },
        },
        "required": ["tasks"],
    })
}

/// Decomposes a [`ParsedIntent`] into a validated list of [`PlannedTask`]s.
pub struct TaskDecomposer {
    provider: Arc<dyn ModelProvider>,
    model: String,
}

impl TaskDecomposer {
    /// Build a decomposer bound to `provider`, issuing completions against
    /// `model`.
    #[must_use]
    pub fn new(provider: Arc<dyn ModelProvider>, model: String) -> Self {
        Self { provider, model }
    }

    /// Decompose `intent` into a plan. Never fails outright: a model error,
    /// an empty plan, or an invalid dependency graph all fall back to a
    /// single best-effort task built from the intent itself.
    pub async fn decompose(&self, intent: &ParsedIntent) -> Vec<PlannedTask> {
        if intent.intent_type == IntentType::Chitchat || intent.needs_clarification {
            return Vec::new();
        }

        let messages = [Message::user(build_decomposition_prompt(intent))];
        let schema = decomposition_schema();

        let parsed = match self
            .provider
            .complete_json(&messages, &self.model, Some(SYSTEM_PROMPT), Some(&schema), 0.2, 2048)
            .await
        {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(error = %err, "task decomposition request failed");
                return vec![fallback_task(intent)];
            }
        };

        let raw_tasks = parsed
            .get("tasks")
            .or_else(|| parsed.get("items"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        if raw_tasks.is_empty() {
            return vec![fallback_task(intent)];
        }

        let tasks: Vec<PlannedTask> = raw_tasks
            .into_iter()
            .take(MAX_TASKS_PER_REQUEST)
            .enumerate()
            .map(|(i, raw)| planned_task_from(i, &raw))
            .collect();

        if !validate_plan(&tasks, intent) {
            tracing::warn!("decomposed task graph failed validation, using fallback");
            return vec![fallback_task(intent)];
        }

        tasks
    }
}

fn build_decomposition_prompt(intent: &ParsedIntent) -> String {
    let mut parts = vec![
        format!("Intent type: {}", intent_type_label(intent.intent_type)),
        format!("Subject: {}", intent.subject),
        format!("Deliverable: {}", intent.deliverable.as_deref().unwrap_or("not specified")),
    ];
    if !intent.constraints.is_empty() {
        parts.push(format!("Constraints: {}", intent.constraints.join(", ")));
    }
    parts.push(format!("Original request: {}", intent.raw_input));
    parts.join("\n")
}

fn intent_type_label(intent_type: IntentType) -> &'static str {
    match intent_type {
        IntentType::Research => "research",
        IntentType::Synthesize => "synthesize",
        IntentType::Analyze => "analyze",
        IntentType::Draft => "draft",
        IntentType::Review => "review",
        IntentType::Extract => "extract",
        IntentType::Clarify => "clarify",
        IntentType::Chitchat => "chitchat",
        IntentType::Unknown => "unknown",
    }
}

fn planned_task_from(index: usize, raw: &Value) -> PlannedTask {
    let depends_on = raw
        .get("depends_on")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_u64).map(|n| format!("task-{n}")).collect())
        .unwrap_or_default();

    let tools: Vec<String> = raw
        .get("tools_needed")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_owned).collect())
        .unwrap_or_else(|| vec!["chat".to_owned()]);
    let tool_allowlist = ToolAllowlist::from_names(tools.iter().map(String::as_str));

    let domain_allowlist = raw
        .get("domains")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_owned).collect())
        .unwrap_or_default();

    let task_type = raw
        .get("task_type")
        .and_then(Value::as_str)
        .and_then(|s| serde_json::from_value::<TaskType>(Value::String(s.to_owned())).ok())
        .unwrap_or(TaskType::WebResearch);

    let timeout_seconds = raw
        .get("timeout_seconds")
        .and_then(Value::as_u64)
        .map(|n| u32::try_from(n).unwrap_or(DEFAULT_TASK_TIMEOUT_SECONDS))
        .unwrap_or(DEFAULT_TASK_TIMEOUT_SECONDS)
        .clamp(5, 3600);

    PlannedTask {
        id: format!("task-{index}"),
        task_type,
        prompt: raw.get("prompt").and_then(Value::as_str).unwrap_or_default().to_owned(),
        depends_on,
        tool_allowlist,
        domain_allowlist,
        timeout_seconds,
        context: HashMap::new(),
        status: PlannedTaskStatus::Pending,
        result: None,
        error: None,
    }
}

/// Referential-integrity and cycle check, reusing [`TaskGraph::new`]'s own
/// validation rather than duplicating it.
fn validate_plan(tasks: &[PlannedTask], intent: &ParsedIntent) -> bool {
    TaskGraph::new("validation".to_owned(), tasks.to_vec(), intent.clone(), String::new(), Utc::now()).is_ok()
}

fn fallback_task(intent: &ParsedIntent) -> PlannedTask {
    let task_type = match intent.intent_type {
        IntentType::Research => TaskType::WebResearch,
        IntentType::Synthesize => TaskType::DocumentSynthesis,
        IntentType::Analyze => TaskType::ComparativeAnalysis,
        IntentType::Draft => TaskType::DocumentSynthesis,
        IntentType::Review | IntentType::Extract => TaskType::Transform,
        _ => TaskType::WebResearch,
    };

    PlannedTask {
        id: "task-0".to_owned(),
        task_type,
        prompt: intent.raw_input.clone(),
        depends_on: Vec::new(),
        tool_allowlist: ToolAllowlist::from_names(["browse", "fetch", "chat"]),
        domain_allowlist: Vec::new(),
        timeout_seconds: DEFAULT_TASK_TIMEOUT_SECONDS,
        context: HashMap::new(),
        status: PlannedTaskStatus::Pending,
        result: None,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_intent() -> ParsedIntent {
        ParsedIntent {
            intent_type: IntentType::Research,
            confidence: 0.9,
            subject: "EV charging competitors".to_owned(),
            deliverable: Some("one-pager".to_owned()),
            constraints: vec!["EV charging industry".to_owned()],
            context: HashMap::new(),
            raw_input: "Research my competitors in the EV charging space and draft a one-pager".to_owned(),
            needs_clarification: false,
            clarification_question: None,
        }
    }

    #[test]
    fn planned_task_from_maps_dependency_indices_to_task_ids() {
        let raw = json!({"task_type": "document_synthesis", "prompt": "p", "depends_on": [0]});
        let task = planned_task_from(1, &raw);
        assert_eq!(task.id, "task-1");
        assert_eq!(task.depends_on, vec!["task-0".to_owned()]);
    }

    #[test]
    fn planned_task_from_defaults_unknown_task_type_to_web_research() {
        let raw = json!({"task_type": "not-a-type", "prompt": "p"});
        let task = planned_task_from(0, &raw);
        assert_eq!(task.task_type, TaskType::WebResearch);
    }

    #[test]
    fn validate_plan_rejects_orphaned_dependency() {
        let raw = json!({"task_type": "web_research", "prompt": "p", "depends_on": [7]});
        let tasks = vec![planned_task_from(0, &raw)];
        assert!(!validate_plan(&tasks, &sample_intent()));
    }

    #[test]
    fn validate_plan_accepts_a_well_formed_chain() {
        let t0 = planned_task_from(0, &json!({"task_type": "web_research", "prompt": "p"}));
        let t1 = planned_task_from(1, &json!({"task_type": "document_synthesis", "prompt": "p", "depends_on": [0]}));
        assert!(validate_plan(&[t0, t1], &sample_intent()));
    }

    #[test]
    fn fallback_task_uses_raw_input_as_prompt() {
        let intent = sample_intent();
        let task = fallback_task(&intent);
        assert_eq!(task.prompt, intent.raw_input);
        assert_eq!(task.task_type, TaskType::WebResearch);
    }
}
