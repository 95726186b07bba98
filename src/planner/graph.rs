//! Drives a constructed [`TaskGraph`] to completion: gathers ready tasks,
//! dispatches the independent set concurrently, folds dependency context
//! between tasks, and falls back to a direct LLM completion when the
//! executor backend is simply unreachable.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::executor::Executor;
use crate::extractors::{build_dependency_context, extract_summary, summarize_for_dependency};
use crate::planner::DEFAULT_MAX_STEPS;
use crate::providers::{Message, ModelProvider};
use crate::types::{PlannedTask, PlannedTaskStatus, ScopedCredentials, TaskGraph, TaskRequest, TaskStatusTag};

/// Aggregate outcome of running a [`TaskGraph`] to completion.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Echoes [`TaskGraph::request_id`].
    pub request_id: String,
    /// True when at least one task completed and none failed.
    pub success: bool,
    /// Count of tasks left in [`PlannedTaskStatus::Completed`].
    pub tasks_completed: usize,
    /// Count of tasks left in [`PlannedTaskStatus::Failed`].
    pub tasks_failed: usize,
    /// Per-task output, keyed by [`PlannedTask::id`].
    pub results: HashMap<String, HashMap<String, Value>>,
    /// Per-task error message, keyed by [`PlannedTask::id`].
    pub errors: HashMap<String, String>,
    /// Human-readable aggregate summary.
    pub summary: String,
    /// Wall-clock seconds the run took.
    pub elapsed_seconds: f64,
}

enum TaskOutcome {
    Completed { id: String, output: HashMap<String, Value> },
    Failed { id: String, message: String },
}

/// Drives a [`TaskGraph`] to completion against an [`Executor`] backend,
/// with a direct-LLM fallback for connection-class failures.
pub struct TaskGraphExecutor {
    executor: Arc<dyn Executor>,
    direct_provider: Arc<dyn ModelProvider>,
    direct_model: String,
}

impl TaskGraphExecutor {
    /// Build an executor bound to `executor` for normal dispatch and
    /// `direct_provider`/`direct_model` for the direct-LLM fallback path.
    #[must_use]
    pub fn new(executor: Arc<dyn Executor>, direct_provider: Arc<dyn ModelProvider>, direct_model: String) -> Self {
        Self { executor, direct_provider, direct_model }
    }

    /// Run `graph` to completion, mutating task statuses in place and
    /// returning the aggregate result.
    pub async fn execute(&self, graph: &mut TaskGraph, credentials: Option<ScopedCredentials>) -> ExecutionResult {
        let start = Utc::now();
        let mut results: HashMap<String, HashMap<String, Value>> = HashMap::new();
        let mut errors: HashMap<String, String> = HashMap::new();

        while !graph.is_complete() {
            let ready_ids: Vec<String> = graph.ready_tasks().into_iter().map(|t| t.id.clone()).collect();

            if ready_ids.is_empty() {
                for task in &mut graph.tasks {
                    if task.status == PlannedTaskStatus::Pending {
                        let message = "Blocked: dependency failed or missing".to_owned();
                        task.status = PlannedTaskStatus::Failed;
                        task.error = Some(message.clone());
                        errors.insert(task.id.clone(), message);
                    }
                }
                break;
            }

            let outcomes = self.run_ready_set(graph, &ready_ids, &results, credentials.as_ref()).await;

            for outcome in outcomes {
                match outcome {
                    TaskOutcome::Completed { id, output } => {
                        if let Some(task) = graph.task_mut(&id) {
                            task.status = PlannedTaskStatus::Completed;
                            task.result = Some(output.clone());
                        }
                        results.insert(id, output);
                    }
                    TaskOutcome::Failed { id, message } => {
                        if let Some(task) = graph.task_mut(&id) {
                            task.status = PlannedTaskStatus::Failed;
                            task.error = Some(message.clone());
                        }
                        errors.insert(id, message);
                    }
                }
            }
        }

        let elapsed_seconds = (Utc::now() - start).num_milliseconds().max(0) as f64 / 1000.0;
        let tasks_completed = graph.tasks.iter().filter(|t| t.status == PlannedTaskStatus::Completed).count();
        let tasks_failed = graph.tasks.iter().filter(|t| t.status == PlannedTaskStatus::Failed).count();
        let summary = generate_summary(graph, &results, &errors);

        ExecutionResult {
            request_id: graph.request_id.clone(),
            success: tasks_failed == 0 && tasks_completed > 0,
            tasks_completed,
            tasks_failed,
            results,
            errors,
            summary,
            elapsed_seconds,
        }
    }

    async fn run_ready_set(
        &self,
        graph: &TaskGraph,
        ready_ids: &[String],
        results: &HashMap<String, HashMap<String, Value>>,
        credentials: Option<&ScopedCredentials>,
    ) -> Vec<TaskOutcome> {
        if ready_ids.len() == 1 {
            let task = graph.tasks.iter().find(|t| t.id == ready_ids[0]).expect("ready id exists in graph").clone();
            let dep_results = collect_dep_results(&task, results);
            return vec![
                run_task(
                    Arc::clone(&self.executor),
                    Arc::clone(&self.direct_provider),
                    self.direct_model.clone(),
                    task,
                    graph.request_id.clone(),
                    dep_results,
                    credentials.cloned(),
                )
                .await,
            ];
        }

        tracing::info!(count = ready_ids.len(), "executing independent tasks in parallel");

        let mut join_set = tokio::task::JoinSet::new();
        for id in ready_ids {
            let task = graph.tasks.iter().find(|t| &t.id == id).expect("ready id exists in graph").clone();
            let dep_results = collect_dep_results(&task, results);
            let executor = Arc::clone(&self.executor);
            let direct_provider = Arc::clone(&self.direct_provider);
            let direct_model = self.direct_model.clone();
            let request_id = graph.request_id.clone();
            let credentials = credentials.cloned();
            join_set.spawn(async move {
                run_task(executor, direct_provider, direct_model, task, request_id, dep_results, credentials).await
            });
        }

        let mut outcomes = Vec::with_capacity(ready_ids.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(join_err) => tracing::error!(error = %join_err, "task execution panicked"),
            }
        }
        outcomes
    }
}

fn collect_dep_results(
    task: &PlannedTask,
    results: &HashMap<String, HashMap<String, Value>>,
) -> Vec<(String, HashMap<String, Value>)> {
    task.depends_on.iter().filter_map(|dep| results.get(dep).map(|result| (dep.clone(), result.clone()))).collect()
}

async fn run_task(
    executor: Arc<dyn Executor>,
    direct_provider: Arc<dyn ModelProvider>,
    direct_model: String,
    task: PlannedTask,
    request_id: String,
    dep_results: Vec<(String, HashMap<String, Value>)>,
    credentials: Option<ScopedCredentials>,
) -> TaskOutcome {
    let sections: Vec<String> =
        dep_results.iter().map(|(dep_id, result)| summarize_for_dependency(dep_id, result)).collect();
    let dep_context = build_dependency_context(&sections);

    let prompt = if dep_context.is_empty() {
        task.prompt.clone()
    } else {
        format!("{}\n\n--- Context from previous tasks ---\n{dep_context}", task.prompt)
    };

    let mut fresh_credentials = credentials;
    if let Some(creds) = fresh_credentials.as_mut() {
        creds.refresh();
    }

    let request = match TaskRequest::new(
        format!("{request_id}-{}", task.id),
        task.task_type,
        prompt.clone(),
        task.tool_allowlist,
        task.domain_allowlist.clone(),
        DEFAULT_MAX_STEPS,
        task.timeout_seconds,
        None,
        fresh_credentials,
        task.context.clone(),
    ) {
        Ok(request) => request,
        Err(err) => return TaskOutcome::Failed { id: task.id, message: err.to_string() },
    };

    match executor.dispatch(request).await {
        Ok(response) if response.status == TaskStatusTag::Completed => {
            TaskOutcome::Completed { id: task.id, output: response.output.unwrap_or_default() }
        }
        Ok(response) => TaskOutcome::Failed {
            id: task.id,
            message: response.error.unwrap_or_else(|| format!("task ended with status {:?}", response.status)),
        },
        Err(err) if err.is_connection_class() => {
            run_direct_llm_fallback(&direct_provider, &direct_model, &task, &prompt).await
        }
        Err(err) => TaskOutcome::Failed { id: task.id, message: err.to_string() },
    }
}

async fn run_direct_llm_fallback(
    provider: &Arc<dyn ModelProvider>,
    model: &str,
    task: &PlannedTask,
    prompt: &str,
) -> TaskOutcome {
    tracing::warn!(task_id = %task.id, "executor unreachable, falling back to direct completion");

    let llm_prompt = format!(
        "You are a research assistant. Complete this task thoroughly.\n\nTASK TYPE: {:?}\n\nREQUEST:\n{prompt}\n\nProvide a comprehensive, well-structured response with specific details and actionable information."
    , task.task_type);

    match provider.complete(&[Message::user(llm_prompt)], model, None, 0.3, 4096).await {
        Ok(text) => {
            let output = HashMap::from([
                ("summary".to_owned(), Value::String(text)),
                ("source".to_owned(), Value::String("direct_llm".to_owned())),
            ]);
            TaskOutcome::Completed { id: task.id.clone(), output }
        }
        Err(err) => TaskOutcome::Failed { id: task.id.clone(), message: format!("direct LLM fallback failed: {err}") },
    }
}

fn generate_summary(
    graph: &TaskGraph,
    results: &HashMap<String, HashMap<String, Value>>,
    errors: &HashMap<String, String>,
) -> String {
    let mut lines = Vec::new();

    if !errors.is_empty() {
        lines.push(format!("{} task(s) encountered issues.", errors.len()));
    }

    if !results.is_empty() {
        lines.push(format!("{} task(s) completed successfully.", results.len()));
        for (task_id, result) in results {
            if let Some(task) = graph.tasks.iter().find(|t| &t.id == task_id) {
                lines.push(format!("\n{:?}: {}", task.task_type, extract_summary(result)));
            }
        }
    }

    if lines.is_empty() {
        "No results.".to_owned()
    } else {
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IntentType, ParsedIntent, ToolAllowlist};

    fn sample_task(id: &str) -> PlannedTask {
        PlannedTask {
            id: id.to_owned(),
            task_type: crate::types::TaskType::WebResearch,
            prompt: "do it".to_owned(),
            depends_on: Vec::new(),
            tool_allowlist: ToolAllowlist::default(),
            domain_allowlist: Vec::new(),
            timeout_seconds: 60,
            context: HashMap::new(),
            status: PlannedTaskStatus::Pending,
            result: None,
            error: None,
        }
    }

    fn sample_graph() -> TaskGraph {
        let intent = ParsedIntent {
            intent_type: IntentType::Research,
            confidence: 0.9,
            subject: "x".to_owned(),
            deliverable: None,
            constraints: Vec::new(),
            context: HashMap::new(),
            raw_input: "x".to_owned(),
            needs_clarification: false,
            clarification_question: None,
        };
        TaskGraph::new("req-1".to_owned(), vec![sample_task("task-0")], intent, "x".to_owned(), Utc::now()).unwrap()
    }

    #[test]
    fn generate_summary_reports_no_results_for_empty_graph() {
        let graph = sample_graph();
        let summary = generate_summary(&graph, &HashMap::new(), &HashMap::new());
        assert_eq!(summary, "No results.");
    }

    #[test]
    fn generate_summary_includes_completed_task_summary() {
        let graph = sample_graph();
        let mut results = HashMap::new();
        results.insert("task-0".to_owned(), HashMap::from([("summary".to_owned(), Value::from("done"))]));
        let summary = generate_summary(&graph, &results, &HashMap::new());
        assert!(summary.contains("done"));
    }

    #[test]
    fn collect_dep_results_skips_upstreams_with_no_recorded_result() {
        let mut task = sample_task("task-1");
        task.depends_on = vec!["task-0".to_owned(), "task-missing".to_owned()];
        let mut results = HashMap::new();
        results.insert("task-0".to_owned(), HashMap::from([("summary".to_owned(), Value::from("r"))]));
        let collected = collect_dep_results(&task, &results);
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].0, "task-0");
    }
}
