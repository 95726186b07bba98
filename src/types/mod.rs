//! Core data model shared by every control-plane subsystem: task requests
//! and responses, scoped credentials, parsed intents, planned tasks, and the
//! task graph they assemble into.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reserved keys in [`ScopedCredentials::extra`] that may not be shadowed.
const RESERVED_CREDENTIAL_KEYS: [&str; 3] = ["api_key", "provider", "issued_at"];

/// Upper bound on [`TaskRequest::prompt`] length, in characters.
pub const MAX_PROMPT_CHARS: usize = 100_000;

/// Default credential time-to-live, in seconds.
pub const DEFAULT_CREDENTIAL_TTL_SECS: i64 = 3600;

/// A request-shape or invariant violation caught before any network call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Task identifier did not match `^[A-Za-z0-9_.-]+$`.
    #[error("invalid task id: {0:?}")]
    InvalidTaskId(String),
    /// Prompt was empty for a non-ping task type.
    #[error("prompt must not be empty unless task_type is ping")]
    EmptyPrompt,
    /// Prompt exceeded [`MAX_PROMPT_CHARS`].
    #[error("prompt exceeds {MAX_PROMPT_CHARS} characters ({0} given)")]
    PromptTooLong(usize),
    /// A domain allow-list entry did not match the permitted glob pattern.
    #[error("invalid domain pattern: {0:?}")]
    InvalidDomain(String),
    /// `max_steps` was outside `1..=50`.
    #[error("max_steps must be between 1 and 50, got {0}")]
    InvalidMaxSteps(u32),
    /// `timeout_seconds` was outside `5..=3600`.
    #[error("timeout_seconds must be between 5 and 3600, got {0}")]
    InvalidTimeout(u32),
    /// A reserved key was present in `extra`.
    #[error("extra map may not contain reserved key {0:?}")]
    ReservedExtraKey(String),
}

fn task_id_pattern() -> Regex {
    Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("static pattern is valid")
}

fn domain_pattern() -> Regex {
    Regex::new(r"^[\w.\-*]+$").expect("static pattern is valid")
}

/// The closed set of task types any backend may be asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Open-ended research over the web.
    WebResearch,
    /// Fetch a single URL and return its content.
    WebFetch,
    /// Compose a document from prior task results.
    DocumentSynthesis,
    /// Compare a fixed set of items against stated criteria.
    ComparativeAnalysis,
    /// Reshape structured data from one form to another.
    Transform,
    /// Produce a condensed summary of supplied content.
    Summarize,
    /// Execute code in a constrained runtime. Always rejected by the
    /// subprocess runner; permitted only inside the constrained sandbox.
    CodeExec,
    /// Liveness probe; the only type that may carry an empty prompt.
    Ping,
}

/// Six independent tool permissions an executor may grant a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolAllowlist {
    /// Permission to browse interactively (e.g. a headless browser).
    pub browse: bool,
    /// Permission to fetch a URL directly.
    pub fetch: bool,
    /// Permission to read from the workspace filesystem.
    pub read: bool,
    /// Permission to write to the workspace filesystem.
    pub write: bool,
    /// Permission to make LLM chat completions.
    pub chat: bool,
    /// Permission to run analysis tooling.
    pub analyze: bool,
}

impl ToolAllowlist {
    /// Build an allow-list from the tool-name set the decomposer emitted.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut list = Self::default();
        for name in names {
            match name {
                "browse" => list.browse = true,
                "fetch" => list.fetch = true,
                "read" => list.read = true,
                "write" => list.write = true,
                "chat" => list.chat = true,
                "analyze" => list.analyze = true,
                _ => {}
            }
        }
        list
    }

    /// True if the given flag (by name) is permitted; unknown names are
    /// always denied rather than panicking.
    #[must_use]
    pub fn allows(&self, tool: &str) -> bool {
        match tool {
            "browse" => self.browse,
            "fetch" => self.fetch,
            "read" => self.read,
            "write" => self.write,
            "chat" => self.chat,
            "analyze" => self.analyze,
            _ => false,
        }
    }
}

/// Short-lived authentication material scoped to a single dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopedCredentials {
    /// Bearer credential, if any.
    pub api_key: Option<String>,
    /// Provider name the key belongs to (e.g. `"anthropic"`).
    pub provider: Option<String>,
    /// When this credential bundle was issued.
    pub issued_at: DateTime<Utc>,
    /// Free-form passthrough values, disjoint from the reserved keys.
    pub extra: HashMap<String, String>,
}

impl ScopedCredentials {
    /// Construct a credential bundle, rejecting reserved keys in `extra`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::ReservedExtraKey`] if `extra` shadows one
    /// of `api_key`, `provider`, or `issued_at`.
    pub fn new(
        api_key: Option<String>,
        provider: Option<String>,
        issued_at: DateTime<Utc>,
        extra: HashMap<String, String>,
    ) -> Result<Self, ValidationError> {
        for key in extra.keys() {
            if RESERVED_CREDENTIAL_KEYS.contains(&key.as_str()) {
                return Err(ValidationError::ReservedExtraKey(key.clone()));
            }
        }
        Ok(Self {
            api_key,
            provider,
            issued_at,
            extra,
        })
    }

    /// Refresh `issued_at` to now, extending the credential's effective
    /// lifetime without reissuing the underlying key. Used by the task
    /// graph executor so a long-running graph does not trip the TTL.
    pub fn refresh(&mut self) {
        self.issued_at = Utc::now();
    }

    /// True when `issued_at + ttl_secs < now`.
    #[must_use]
    pub fn is_expired(&self, ttl_secs: i64) -> bool {
        let deadline = self.issued_at + chrono::Duration::seconds(ttl_secs);
        Utc::now() > deadline
    }
}

/// A single dispatchable unit of work sent to an executor backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Caller-assigned identifier, `^[A-Za-z0-9_.-]+$`, non-empty.
    pub task_id: String,
    /// Task-type tag from the closed enumeration.
    pub task_type: TaskType,
    /// Natural-language prompt; empty permitted only when `task_type` is
    /// [`TaskType::Ping`].
    pub prompt: String,
    /// Tool permissions granted to this task.
    pub tool_allowlist: ToolAllowlist,
    /// Glob patterns this task may contact.
    pub domain_allowlist: Vec<String>,
    /// Maximum tool-touch steps, `1..=50`.
    pub max_steps: u32,
    /// Per-task timeout, `5..=3600` seconds.
    pub timeout_seconds: u32,
    /// Optional JSON schema the backend should constrain output to.
    pub output_schema: Option<serde_json::Value>,
    /// Short-lived credentials for this dispatch.
    pub credentials: Option<ScopedCredentials>,
    /// Free-form context passed through to the backend.
    pub context: HashMap<String, serde_json::Value>,
}

impl TaskRequest {
    /// Construct and validate a task request against every invariant in the
    /// data model.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] encountered.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_id: String,
        task_type: TaskType,
        prompt: String,
        tool_allowlist: ToolAllowlist,
        domain_allowlist: Vec<String>,
        max_steps: u32,
        timeout_seconds: u32,
        output_schema: Option<serde_json::Value>,
        credentials: Option<ScopedCredentials>,
        context: HashMap<String, serde_json::Value>,
    ) -> Result<Self, ValidationError> {
        if task_id.is_empty() || !task_id_pattern().is_match(&task_id) {
            return Err(ValidationError::InvalidTaskId(task_id));
        }
        if prompt.is_empty() && task_type != TaskType::Ping {
            return Err(ValidationError::EmptyPrompt);
        }
        if prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(ValidationError::PromptTooLong(prompt.chars().count()));
        }
        let domain_re = domain_pattern();
        for domain in &domain_allowlist {
            if !domain_re.is_match(domain) {
                return Err(ValidationError::InvalidDomain(domain.clone()));
            }
        }
        if !(1..=50).contains(&max_steps) {
            return Err(ValidationError::InvalidMaxSteps(max_steps));
        }
        if !(5..=3600).contains(&timeout_seconds) {
            return Err(ValidationError::InvalidTimeout(timeout_seconds));
        }
        Ok(Self {
            task_id,
            task_type,
            prompt,
            tool_allowlist,
            domain_allowlist,
            max_steps,
            timeout_seconds,
            output_schema,
            credentials,
            context,
        })
    }
}

/// Final disposition of a dispatched task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatusTag {
    /// The backend ran the task to completion.
    Completed,
    /// The per-task timeout elapsed before a response arrived.
    Timeout,
    /// The backend or transport faulted.
    Error,
    /// The backend declined the request outright (not retried).
    Rejected,
}

/// Structured error codes returned across the adapter boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Task-level timeout at the backend.
    Timeout,
    /// Backend declined for rate-limiting reasons.
    RateLimited,
    /// Credentials were rejected.
    AuthFailed,
    /// A requested domain was outside the allow-list.
    DomainBlocked,
    /// A requested tool was outside the allow-list.
    ToolBlocked,
    /// The task exceeded its step budget.
    StepLimit,
    /// The request shape itself was invalid, caught by the backend.
    InvalidTask,
    /// An unspecified backend fault.
    InternalError,
    /// No structured code was available; this is the string-match
    /// fallback categorization.
    Unknown,
}

/// Result of one dispatch, as returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    /// Echoes the originating [`TaskRequest::task_id`].
    pub task_id: String,
    /// Final disposition.
    pub status: TaskStatusTag,
    /// Backend output, when the task completed.
    pub output: Option<HashMap<String, serde_json::Value>>,
    /// Human-readable error message, when not completed.
    pub error: Option<String>,
    /// Structured error code, when not completed.
    pub error_code: Option<ErrorCode>,
    /// Tool-touch steps actually consumed.
    pub step_count: u32,
    /// Wall-clock seconds elapsed.
    pub elapsed_seconds: f64,
    /// When the backend produced this response.
    pub completed_at: DateTime<Utc>,
}

/// Mutable lifecycle state of a task inside a [`TaskGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannedTaskStatus {
    /// Not yet dispatched.
    Pending,
    /// Currently dispatched, awaiting a response.
    Running,
    /// Dispatch succeeded.
    Completed,
    /// Dispatch failed or was blocked by a failed upstream.
    Failed,
}

/// A task as planned by the decomposer, before dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTask {
    /// Internal id, always `task-{N}`.
    pub id: String,
    /// Task-type tag.
    pub task_type: TaskType,
    /// Natural-language prompt, possibly augmented with dependency context
    /// at dispatch time.
    pub prompt: String,
    /// Upstream task ids this task depends on.
    pub depends_on: Vec<String>,
    /// Tool permissions requested for this task.
    pub tool_allowlist: ToolAllowlist,
    /// Domain allow-list for this task.
    pub domain_allowlist: Vec<String>,
    /// Per-task timeout in seconds.
    pub timeout_seconds: u32,
    /// Free-form planning context.
    pub context: HashMap<String, serde_json::Value>,
    /// Current lifecycle status.
    pub status: PlannedTaskStatus,
    /// Result payload once completed.
    pub result: Option<HashMap<String, serde_json::Value>>,
    /// Error message once failed.
    pub error: Option<String>,
}

/// An error raised when a [`TaskGraph`] fails its construction invariants.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    /// A task's `depends_on` referenced an id not present in the graph.
    #[error("task {task} depends on unknown upstream {upstream}")]
    UnknownUpstream {
        /// The task whose dependency list is malformed.
        task: String,
        /// The missing upstream id it referenced.
        upstream: String,
    },
    /// The dependency relation contains a cycle.
    #[error("task graph contains a dependency cycle")]
    Cyclic,
}

/// An acyclic collection of planned tasks produced by the decomposer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGraph {
    /// Identifier for the originating request.
    pub request_id: String,
    /// Planned tasks in creation order.
    pub tasks: Vec<PlannedTask>,
    /// The intent that produced this graph.
    pub intent: ParsedIntent,
    /// The original natural-language input.
    pub original_input: String,
    /// When this graph was constructed.
    pub created_at: DateTime<Utc>,
}

impl TaskGraph {
    /// Construct a task graph, checking referential integrity and
    /// acyclicity before returning it.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownUpstream`] or [`GraphError::Cyclic`].
    pub fn new(
        request_id: String,
        tasks: Vec<PlannedTask>,
        intent: ParsedIntent,
        original_input: String,
        created_at: DateTime<Utc>,
    ) -> Result<Self, GraphError> {
        let ids: std::collections::HashSet<&str> =
            tasks.iter().map(|t| t.id.as_str()).collect();
        for task in &tasks {
            for upstream in &task.depends_on {
                if !ids.contains(upstream.as_str()) {
                    return Err(GraphError::UnknownUpstream {
                        task: task.id.clone(),
                        upstream: upstream.clone(),
                    });
                }
            }
        }
        check_acyclic(&tasks)?;
        Ok(Self {
            request_id,
            tasks,
            intent,
            original_input,
            created_at,
        })
    }

    /// Tasks that are pending and whose every upstream has completed.
    #[must_use]
    pub fn ready_tasks(&self) -> Vec<&PlannedTask> {
        self.tasks
            .iter()
            .filter(|task| task.status == PlannedTaskStatus::Pending)
            .filter(|task| {
                task.depends_on.iter().all(|upstream| {
                    self.tasks
                        .iter()
                        .find(|t| &t.id == upstream)
                        .is_some_and(|t| t.status == PlannedTaskStatus::Completed)
                })
            })
            .collect()
    }

    /// True once every task is completed or failed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.tasks
            .iter()
            .all(|t| matches!(t.status, PlannedTaskStatus::Completed | PlannedTaskStatus::Failed))
    }

    /// True if any task could still transition to ready or is already
    /// running.
    #[must_use]
    pub fn has_runnable_tasks(&self) -> bool {
        !self.ready_tasks().is_empty()
            || self
                .tasks
                .iter()
                .any(|t| t.status == PlannedTaskStatus::Running)
    }

    /// Mutable access to a task by id.
    pub fn task_mut(&mut self, id: &str) -> Option<&mut PlannedTask> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// A task's upstream ids have at least one in `Failed` status.
    #[must_use]
    pub fn is_blocked(&self, task: &PlannedTask) -> bool {
        task.depends_on.iter().any(|upstream| {
            self.tasks
                .iter()
                .find(|t| &t.id == upstream)
                .is_some_and(|t| t.status == PlannedTaskStatus::Failed)
        })
    }
}

/// Depth-first, three-color cycle detection over the dependency relation.
fn check_acyclic(tasks: &[PlannedTask]) -> Result<(), GraphError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut colors: HashMap<&str, Color> =
        tasks.iter().map(|t| (t.id.as_str(), Color::White)).collect();

    fn visit<'a>(
        id: &'a str,
        tasks: &'a [PlannedTask],
        colors: &mut HashMap<&'a str, Color>,
    ) -> Result<(), GraphError> {
        match colors.get(id) {
            Some(Color::Black) => return Ok(()),
            Some(Color::Gray) => return Err(GraphError::Cyclic),
            _ => {}
        }
        colors.insert(id, Color::Gray);
        if let Some(task) = tasks.iter().find(|t| t.id == id) {
            for upstream in &task.depends_on {
                visit(upstream, tasks, colors)?;
            }
        }
        colors.insert(id, Color::Black);
        Ok(())
    }

    for task in tasks {
        visit(&task.id, tasks, &mut colors)?;
    }
    Ok(())
}

/// Nine-value classification of a natural-language request's intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    /// Open-ended research request.
    Research,
    /// Request to combine or compose prior material.
    Synthesize,
    /// Request to evaluate or critique something.
    Analyze,
    /// Request to produce a new draft.
    Draft,
    /// Request to review existing material.
    Review,
    /// Request to pull structured data out of unstructured input.
    Extract,
    /// Ambiguous request that needs a follow-up question.
    Clarify,
    /// A pure greeting or social exchange, no task implied.
    Chitchat,
    /// Classification failed or is not confident.
    Unknown,
}

/// The intent parser's structured output for one natural-language input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedIntent {
    /// Intent-type classification.
    pub intent_type: IntentType,
    /// Classifier confidence, `0.0..=1.0`.
    pub confidence: f64,
    /// The subject of the request.
    pub subject: String,
    /// The deliverable requested, if any.
    pub deliverable: Option<String>,
    /// Constraints mentioned in the request.
    pub constraints: Vec<String>,
    /// Free-form context extracted alongside the classification.
    pub context: HashMap<String, serde_json::Value>,
    /// The raw input that was classified.
    pub raw_input: String,
    /// Whether the parser judged this input needs a clarifying question.
    pub needs_clarification: bool,
    /// The clarifying question to ask, when `needs_clarification` is set.
    pub clarification_question: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task(id: &str, depends_on: Vec<&str>) -> PlannedTask {
        PlannedTask {
            id: id.to_owned(),
            task_type: TaskType::WebResearch,
            prompt: "do the thing".to_owned(),
            depends_on: depends_on.into_iter().map(str::to_owned).collect(),
            tool_allowlist: ToolAllowlist::default(),
            domain_allowlist: Vec::new(),
            timeout_seconds: 60,
            context: HashMap::new(),
            status: PlannedTaskStatus::Pending,
            result: None,
            error: None,
        }
    }

    fn sample_intent() -> ParsedIntent {
        ParsedIntent {
            intent_type: IntentType::Research,
            confidence: 0.9,
            subject: "EV charging".to_owned(),
            deliverable: None,
            constraints: Vec::new(),
            context: HashMap::new(),
            raw_input: "research EV charging".to_owned(),
            needs_clarification: false,
            clarification_question: None,
        }
    }

    #[test]
    fn task_id_pattern_rejects_empty_slash_and_whitespace() {
        let base = |id: &str| {
            TaskRequest::new(
                id.to_owned(),
                TaskType::Ping,
                String::new(),
                ToolAllowlist::default(),
                Vec::new(),
                1,
                5,
                None,
                None,
                HashMap::new(),
            )
        };
        assert!(base("").is_err());
        assert!(base("a/b").is_err());
        assert!(base("a b").is_err());
        assert!(base("task-0").is_ok());
    }

    #[test]
    fn prompt_boundary_at_exactly_100k_is_accepted() {
        let prompt = "a".repeat(MAX_PROMPT_CHARS);
        let ok = TaskRequest::new(
            "task-0".to_owned(),
            TaskType::WebResearch,
            prompt,
            ToolAllowlist::default(),
            Vec::new(),
            1,
            5,
            None,
            None,
            HashMap::new(),
        );
        assert!(ok.is_ok());

        let prompt = "a".repeat(MAX_PROMPT_CHARS + 1);
        let err = TaskRequest::new(
            "task-0".to_owned(),
            TaskType::WebResearch,
            prompt,
            ToolAllowlist::default(),
            Vec::new(),
            1,
            5,
            None,
            None,
            HashMap::new(),
        );
        assert!(matches!(err, Err(ValidationError::PromptTooLong(_))));
    }

    #[test]
    fn ping_permits_empty_prompt() {
        let ok = TaskRequest::new(
            "task-0".to_owned(),
            TaskType::Ping,
            String::new(),
            ToolAllowlist::default(),
            Vec::new(),
            1,
            5,
            None,
            None,
            HashMap::new(),
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn scoped_credentials_reject_reserved_extra_key() {
        let mut extra = HashMap::new();
        extra.insert("provider".to_owned(), "evil".to_owned());
        let err = ScopedCredentials::new(Some("key".to_owned()), None, Utc::now(), extra);
        assert!(matches!(err, Err(ValidationError::ReservedExtraKey(_))));
    }

    #[test]
    fn scoped_credentials_expiry_is_ttl_relative() {
        let creds = ScopedCredentials::new(
            Some("key".to_owned()),
            Some("anthropic".to_owned()),
            Utc::now() - chrono::Duration::seconds(DEFAULT_CREDENTIAL_TTL_SECS + 1),
            HashMap::new(),
        )
        .expect("valid credentials");
        assert!(creds.is_expired(DEFAULT_CREDENTIAL_TTL_SECS));
    }

    #[test]
    fn graph_rejects_unknown_upstream() {
        let tasks = vec![sample_task("task-0", vec!["task-missing"])];
        let err = TaskGraph::new(
            "req-1".to_owned(),
            tasks,
            sample_intent(),
            "input".to_owned(),
            Utc::now(),
        );
        assert!(matches!(err, Err(GraphError::UnknownUpstream { .. })));
    }

    #[test]
    fn graph_rejects_cycle() {
        let tasks = vec![
            sample_task("task-0", vec!["task-1"]),
            sample_task("task-1", vec!["task-0"]),
        ];
        let err = TaskGraph::new(
            "req-1".to_owned(),
            tasks,
            sample_intent(),
            "input".to_owned(),
            Utc::now(),
        );
        assert!(matches!(err, Err(GraphError::Cyclic)));
    }

    #[test]
    fn ready_tasks_respects_dependency_completion() {
        let mut tasks = vec![
            sample_task("task-0", vec![]),
            sample_task("task-1", vec!["task-0"]),
        ];
        tasks[0].status = PlannedTaskStatus::Completed;
        let graph = TaskGraph::new(
            "req-1".to_owned(),
            tasks,
            sample_intent(),
            "input".to_owned(),
            Utc::now(),
        )
        .expect("valid graph");
        let ready = graph.ready_tasks();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, "task-1");
    }
}
