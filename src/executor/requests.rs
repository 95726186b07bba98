//! Convenience constructors for common [`TaskRequest`] shapes, sparing
//! callers outside the planner from repeating the full ten-argument
//! constructor for the task types they dispatch most often.

use std::collections::HashMap;

use crate::types::{ScopedCredentials, TaskRequest, TaskType, ToolAllowlist, ValidationError};

/// Step budget applied by every helper in this module; matches
/// [`crate::planner::DEFAULT_MAX_STEPS`].
const DEFAULT_MAX_STEPS: u32 = crate::planner::DEFAULT_MAX_STEPS;

/// Build a `web_research` task with the standard browse/fetch/chat
/// allowlist and no domain restriction.
///
/// # Errors
///
/// Returns a [`ValidationError`] if `task_id` or `prompt` fail the
/// underlying invariants.
pub fn web_research(
    task_id: impl Into<String>,
    prompt: impl Into<String>,
    timeout_seconds: u32,
    credentials: Option<ScopedCredentials>,
) -> Result<TaskRequest, ValidationError> {
    TaskRequest::new(
        task_id.into(),
        TaskType::WebResearch,
        prompt.into(),
        ToolAllowlist::from_names(["browse", "fetch", "chat"]),
        Vec::new(),
        DEFAULT_MAX_STEPS,
        timeout_seconds,
        None,
        credentials,
        HashMap::new(),
    )
}

/// Build a `comparative_analysis` task, chat-only, no browsing.
///
/// # Errors
///
/// Returns a [`ValidationError`] if `task_id` or `prompt` fail the
/// underlying invariants.
pub fn comparative_analysis(
    task_id: impl Into<String>,
    prompt: impl Into<String>,
    timeout_seconds: u32,
    credentials: Option<ScopedCredentials>,
) -> Result<TaskRequest, ValidationError> {
    TaskRequest::new(
        task_id.into(),
        TaskType::ComparativeAnalysis,
        prompt.into(),
        ToolAllowlist::from_names(["chat"]),
        Vec::new(),
        DEFAULT_MAX_STEPS,
        timeout_seconds,
        None,
        credentials,
        HashMap::new(),
    )
}

/// Build a `ping` task: the empty-prompt liveness probe every backend must
/// accept regardless of its allowlist.
///
/// # Errors
///
/// Returns a [`ValidationError`] if `task_id` fails the underlying
/// invariants.
pub fn ping(task_id: impl Into<String>) -> Result<TaskRequest, ValidationError> {
    TaskRequest::new(
        task_id.into(),
        TaskType::Ping,
        String::new(),
        ToolAllowlist::from_names([]),
        Vec::new(),
        1,
        5,
        None,
        None,
        HashMap::new(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn web_research_allows_browse_fetch_chat() {
        let req = web_research("task-0", "research something", 300, None).expect("valid");
        assert!(req.tool_allowlist.allows("browse"));
        assert!(req.tool_allowlist.allows("fetch"));
        assert!(!req.tool_allowlist.allows("write"));
    }

    #[test]
    fn ping_accepts_an_empty_prompt() {
        let req = ping("task-ping").expect("ping is exempt from the empty-prompt rule");
        assert_eq!(req.task_type, TaskType::Ping);
    }

    #[test]
    fn comparative_analysis_rejects_an_invalid_task_id() {
        let err = comparative_analysis("not an id", "compare these", 120, None).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidTaskId(_)));
    }
}
