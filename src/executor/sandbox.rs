//! Constrained sandbox backend: runs one task at a time inside a hardened
//! Docker container against a closed, task-type-keyed dispatch table.
//!
//! Forbidden by design: spawning further tasks, mutating the received
//! request, carrying state between tasks, or looping autonomously. The
//! writable workspace is wiped after every dispatch.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use crate::types::{ErrorCode, TaskRequest, TaskResponse, TaskStatusTag, TaskType};

use super::docker::{shell_escape, ContainerDriver};
use super::{check_credential_ttl, AdapterAuditEntry, AdapterAuditRing, Executor, ExecutorError, RetryPolicy};

/// Per-dispatch counter of tool touches, enforcing the request's own
/// `max_steps` ceiling and tool/domain allow-lists.
struct StepBudget<'a> {
    request: &'a TaskRequest,
    count: u32,
}

impl<'a> StepBudget<'a> {
    fn new(request: &'a TaskRequest) -> Self {
        Self { request, count: 0 }
    }

    /// Record a tool touch, optionally against a specific domain. Checks
    /// the allow-lists before incrementing, and the step ceiling after.
    fn touch(&mut self, tool: &str, domain: Option<&str>) -> Result<(), ExecutorError> {
        if !self.request.tool_allowlist.allows(tool) {
            return Err(ExecutorError::ToolBlocked(tool.to_owned()));
        }
        if let Some(domain) = domain {
            let allowed = self
                .request
                .domain_allowlist
                .iter()
                .any(|pattern| domain_matches(pattern, domain));
            if !allowed {
                return Err(ExecutorError::DomainBlocked(domain.to_owned()));
            }
        }
        if self.count >= self.request.max_steps {
            return Err(ExecutorError::StepLimit);
        }
        self.count = self.count.saturating_add(1);
        Ok(())
    }
}

/// Glob-style domain match: `*.example.com` matches any subdomain, a bare
/// pattern must match exactly.
fn domain_matches(pattern: &str, domain: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix("*.") {
        domain == suffix || domain.ends_with(&format!(".{suffix}"))
    } else {
        pattern == domain
    }
}

/// Script invoked inside the container for each task type, mounted at
/// `/scripts` in the sandbox image. `Ping` never touches the container.
fn dispatch_script(task_type: TaskType) -> Option<&'static str> {
    match task_type {
        TaskType::WebResearch => Some("web_research.sh"),
        TaskType::WebFetch => Some("web_fetch.sh"),
        TaskType::DocumentSynthesis => Some("document_synthesis.sh"),
        TaskType::ComparativeAnalysis => Some("comparative_analysis.sh"),
        TaskType::Transform => Some("transform.sh"),
        TaskType::Summarize => Some("summarize.sh"),
        TaskType::CodeExec => Some("code_exec.sh"),
        TaskType::Ping => None,
    }
}

fn requested_domain(request: &TaskRequest) -> Option<&str> {
    request.context.get("domain").and_then(serde_json::Value::as_str)
}

/// The constrained sandbox backend.
pub struct SandboxExecutor {
    driver: ContainerDriver,
    retry: RetryPolicy,
    credential_ttl_secs: i64,
    audit: AdapterAuditRing,
}

impl SandboxExecutor {
    /// Wrap an already-provisioned container driver as an [`Executor`].
    #[must_use]
    pub fn new(driver: ContainerDriver, retry: RetryPolicy, credential_ttl_secs: i64) -> Self {
        Self {
            driver,
            retry,
            credential_ttl_secs,
            audit: AdapterAuditRing::new(super::DEFAULT_AUDIT_RING_CAPACITY),
        }
    }

    async fn run_dispatch_table(
        &self,
        request: &TaskRequest,
    ) -> Result<(HashMap<String, serde_json::Value>, u32), ExecutorError> {
        let mut budget = StepBudget::new(request);

        let Some(script) = dispatch_script(request.task_type) else {
            return Ok((
                HashMap::from([("pong".to_owned(), json!(true))]),
                budget.count,
            ));
        };

        match request.task_type {
            TaskType::WebResearch => budget.touch("browse", requested_domain(request))?,
            TaskType::WebFetch => budget.touch("fetch", requested_domain(request))?,
            TaskType::DocumentSynthesis => budget.touch("write", None)?,
            TaskType::ComparativeAnalysis => budget.touch("analyze", None)?,
            TaskType::Transform => budget.touch("read", None)?,
            TaskType::Summarize => budget.touch("chat", None)?,
            TaskType::CodeExec => budget.touch("write", None)?,
            TaskType::Ping => unreachable!("ping has no dispatch script"),
        }

        let command = format!("/scripts/{script} {}", shell_escape(&request.prompt));
        let timeout = Duration::from_secs(u64::from(request.timeout_seconds));
        let raw = self.driver.exec(&command, timeout).await?;

        if raw.timed_out {
            return Err(ExecutorError::Timeout);
        }
        if raw.exit_code != Some(0) {
            return Err(ExecutorError::classify(&raw.stderr));
        }

        let output = HashMap::from([
            ("stdout".to_owned(), json!(raw.stdout)),
            ("stderr".to_owned(), json!(raw.stderr)),
            ("duration_seconds".to_owned(), json!(raw.duration.as_secs_f64())),
        ]);
        Ok((output, budget.count))
    }
}

#[async_trait]
impl Executor for SandboxExecutor {
    async fn dispatch(&self, request: TaskRequest) -> Result<TaskResponse, ExecutorError> {
        let start = Instant::now();

        check_credential_ttl(request.credentials.as_ref(), self.credential_ttl_secs)?;

        self.audit.push(
            "dispatch-start",
            Some(&request.task_id),
            HashMap::from([("task_type".to_owned(), json!(request.task_type))]),
        );

        let mut attempt = 0u32;
        let result = loop {
            match self.run_dispatch_table(&request).await {
                Ok(outcome) => break Ok(outcome),
                Err(err) if attempt.saturating_add(1) < self.retry.max_retries && err.is_connection_class() => {
                    tokio::time::sleep(self.retry.backoff_for(attempt)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(err) => break Err(err),
            }
        };

        // Every dispatch wipes the writable workspace, success or failure.
        let wipe_result = self.driver.wipe_workspace();

        let response = match result {
            Ok((output, step_count)) => {
                self.audit.push(
                    "dispatch-complete",
                    Some(&request.task_id),
                    HashMap::from([("step_count".to_owned(), json!(step_count))]),
                );
                TaskResponse {
                    task_id: request.task_id.clone(),
                    status: TaskStatusTag::Completed,
                    output: Some(output),
                    error: None,
                    error_code: None,
                    step_count,
                    elapsed_seconds: start.elapsed().as_secs_f64(),
                    completed_at: Utc::now(),
                }
            }
            Err(err) => {
                let event = if matches!(err, ExecutorError::Timeout) {
                    "dispatch-timeout"
                } else if err.is_connection_class() {
                    "dispatch-connection-error"
                } else {
                    "dispatch-error"
                };
                self.audit.push(
                    event,
                    Some(&request.task_id),
                    HashMap::from([("error".to_owned(), json!(err.to_string()))]),
                );
                TaskResponse {
                    task_id: request.task_id.clone(),
                    status: if matches!(err, ExecutorError::Timeout) {
                        TaskStatusTag::Timeout
                    } else {
                        TaskStatusTag::Error
                    },
                    output: None,
                    error: Some(err.to_string()),
                    error_code: Some(classify_error_code(&err)),
                    step_count: 0,
                    elapsed_seconds: start.elapsed().as_secs_f64(),
                    completed_at: Utc::now(),
                }
            }
        };

        wipe_result?;
        Ok(response)
    }

    async fn ping(&self) -> Result<TaskResponse, ExecutorError> {
        Ok(TaskResponse {
            task_id: "ping".to_owned(),
            status: TaskStatusTag::Completed,
            output: Some(HashMap::from([("pong".to_owned(), json!(true))])),
            error: None,
            error_code: None,
            step_count: 0,
            elapsed_seconds: 0.0,
            completed_at: Utc::now(),
        })
    }

    async fn close(&self) -> Result<(), ExecutorError> {
        self.driver.stop().await;
        Ok(())
    }

    fn get_audit_log(&self) -> Vec<AdapterAuditEntry> {
        self.audit.snapshot()
    }

    fn flush_audit_log(&self) -> Vec<AdapterAuditEntry> {
        self.audit.drain()
    }
}

fn classify_error_code(err: &ExecutorError) -> ErrorCode {
    match err {
        ExecutorError::Timeout => ErrorCode::Timeout,
        ExecutorError::RateLimited(_) => ErrorCode::RateLimited,
        ExecutorError::AuthFailed(_) => ErrorCode::AuthFailed,
        ExecutorError::DomainBlocked(_) => ErrorCode::DomainBlocked,
        ExecutorError::ToolBlocked(_) => ErrorCode::ToolBlocked,
        ExecutorError::StepLimit => ErrorCode::StepLimit,
        ExecutorError::InvalidTask(_) => ErrorCode::InvalidTask,
        ExecutorError::ConnectionError(_) | ExecutorError::InternalError(_) => ErrorCode::InternalError,
        ExecutorError::Unknown(_) => ErrorCode::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_matches_wildcard_subdomains() {
        assert!(domain_matches("*.example.com", "api.example.com"));
        assert!(domain_matches("*.example.com", "example.com"));
        assert!(!domain_matches("*.example.com", "evil.com"));
    }

    #[test]
    fn domain_matches_exact_pattern() {
        assert!(domain_matches("example.com", "example.com"));
        assert!(!domain_matches("example.com", "sub.example.com"));
    }

    #[test]
    fn dispatch_script_is_closed_over_known_task_types() {
        assert_eq!(dispatch_script(TaskType::Ping), None);
        assert_eq!(dispatch_script(TaskType::WebFetch), Some("web_fetch.sh"));
        assert_eq!(dispatch_script(TaskType::CodeExec), Some("code_exec.sh"));
    }
}
