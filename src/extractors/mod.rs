//! Deterministic extraction over task results: turning a completed
//! upstream task's output into prose usable as another task's dependency
//! context, or into one line of an aggregate run summary.

use std::collections::HashMap;

use serde_json::Value;

/// Upper bound on a JSON-fallback extract, in characters.
pub const EXTRACT_FALLBACK_CHARS: usize = 300;

/// Extract a human-readable summary from a task result: the `summary` key
/// if present, else `output`, else the first [`EXTRACT_FALLBACK_CHARS`]
/// characters of the result's JSON rendering.
#[must_use]
pub fn extract_summary(result: &HashMap<String, Value>) -> String {
    if let Some(summary) = result.get("summary").and_then(Value::as_str) {
        return summary.to_owned();
    }
    if let Some(output) = result.get("output").and_then(Value::as_str) {
        return output.to_owned();
    }
    let rendered = serde_json::to_string(result).unwrap_or_default();
    rendered.chars().take(EXTRACT_FALLBACK_CHARS).collect()
}

/// Summarize a completed upstream task's result into a headed section
/// suitable for prepending to a downstream task's prompt.
#[must_use]
pub fn summarize_for_dependency(task_id: &str, result: &HashMap<String, Value>) -> String {
    format!("## Result of {task_id}\n{}", extract_summary(result))
}

/// Concatenate per-upstream summaries, in the order given, under a single
/// dependency-context block. Returns an empty string when there are no
/// upstreams, so callers can prepend unconditionally.
#[must_use]
pub fn build_dependency_context(sections: &[String]) -> String {
    if sections.is_empty() {
        return String::new();
    }
    let mut context = sections.join("\n\n");
    context.push_str("\n\n");
    context
}
