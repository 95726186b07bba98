//! Simple subprocess runner backend: a closed set of lightweight task
//! types executed as local child processes, with no container isolation.
//! `code_exec` is wired to an explicit rejection rather than ever running.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::process::Command;

use crate::types::{ErrorCode, TaskRequest, TaskResponse, TaskStatusTag, TaskType};

use super::{check_credential_ttl, AdapterAuditEntry, AdapterAuditRing, Executor, ExecutorError};

fn script_for(task_type: TaskType) -> Option<&'static str> {
    match task_type {
        TaskType::WebFetch => Some("web_fetch.py"),
        TaskType::Transform => Some("transform.py"),
        TaskType::Summarize => Some("summarize.py"),
        TaskType::Ping => None,
        _ => None,
    }
}

/// Backend that shells out to small scripts for quick, low-risk task
/// types; everything else is rejected before a process is ever spawned.
pub struct SubprocessAdapter {
    scripts_dir: PathBuf,
    workspace_dir: PathBuf,
    max_duration: Duration,
    audit: AdapterAuditRing,
    credential_ttl_secs: i64,
}

impl SubprocessAdapter {
    /// Build an adapter rooted at `scripts_dir`/`workspace_dir`, capping
    /// every spawned process at `max_duration`.
    #[must_use]
    pub fn new(scripts_dir: PathBuf, workspace_dir: PathBuf, max_duration: Duration, credential_ttl_secs: i64) -> Self {
        Self {
            scripts_dir,
            workspace_dir,
            max_duration,
            audit: AdapterAuditRing::new(super::DEFAULT_AUDIT_RING_CAPACITY),
            credential_ttl_secs,
        }
    }

    fn clear_workspace(&self) -> Result<(), ExecutorError> {
        let entries = std::fs::read_dir(&self.workspace_dir)
            .map_err(|e| ExecutorError::InternalError(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| ExecutorError::InternalError(e.to_string()))?;
            let path = entry.path();
            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            result.map_err(|e| ExecutorError::InternalError(e.to_string()))?;
        }
        Ok(())
    }

    async fn run_script(&self, script: &str, request: &TaskRequest) -> Result<HashMap<String, serde_json::Value>, ExecutorError> {
        let path = self.scripts_dir.join(script);
        let deadline = self.max_duration.min(Duration::from_secs(u64::from(request.timeout_seconds)));

        let mut command = Command::new("python3");
        command
            .arg(&path)
            .arg(&request.prompt)
            .current_dir(&self.workspace_dir)
            .kill_on_drop(true);

        let output = tokio::time::timeout(deadline, command.output())
            .await
            .map_err(|_| ExecutorError::Timeout)?
            .map_err(|e| ExecutorError::InternalError(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(ExecutorError::classify(&stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        Ok(HashMap::from([("stdout".to_owned(), json!(stdout))]))
    }
}

#[async_trait]
impl Executor for SubprocessAdapter {
    async fn dispatch(&self, request: TaskRequest) -> Result<TaskResponse, ExecutorError> {
        let start = Instant::now();
        check_credential_ttl(request.credentials.as_ref(), self.credential_ttl_secs)?;

        self.audit.push(
            "dispatch-start",
            Some(&request.task_id),
            HashMap::from([("task_type".to_owned(), json!(request.task_type))]),
        );

        if request.task_type == TaskType::CodeExec {
            self.audit.push("dispatch-rejected", Some(&request.task_id), HashMap::new());
            return Ok(TaskResponse {
                task_id: request.task_id,
                status: TaskStatusTag::Rejected,
                output: None,
                error: Some("code_exec is not permitted on the subprocess runner".to_owned()),
                error_code: Some(ErrorCode::InvalidTask),
                step_count: 0,
                elapsed_seconds: start.elapsed().as_secs_f64(),
                completed_at: Utc::now(),
            });
        }

        let Some(script) = script_for(request.task_type) else {
            self.audit.push("dispatch-rejected", Some(&request.task_id), HashMap::new());
            return Ok(TaskResponse {
                task_id: request.task_id,
                status: TaskStatusTag::Rejected,
                output: None,
                error: Some("task_type is not supported by the subprocess runner".to_owned()),
                error_code: Some(ErrorCode::InvalidTask),
                step_count: 0,
                elapsed_seconds: start.elapsed().as_secs_f64(),
                completed_at: Utc::now(),
            });
        };

        let result = self.run_script(script, &request).await;
        let clear_result = self.clear_workspace();

        let response = match result {
            Ok(output) => {
                self.audit.push("dispatch-complete", Some(&request.task_id), HashMap::new());
                TaskResponse {
                    task_id: request.task_id,
                    status: TaskStatusTag::Completed,
                    output: Some(output),
                    error: None,
                    error_code: None,
                    step_count: 1,
                    elapsed_seconds: start.elapsed().as_secs_f64(),
                    completed_at: Utc::now(),
                }
            }
            Err(err) => {
                let event = if matches!(err, ExecutorError::Timeout) {
                    "dispatch-timeout"
                } else {
                    "dispatch-error"
                };
                self.audit.push(
                    event,
                    Some(&request.task_id),
                    HashMap::from([("error".to_owned(), json!(err.to_string()))]),
                );
                TaskResponse {
                    task_id: request.task_id,
                    status: if matches!(err, ExecutorError::Timeout) {
                        TaskStatusTag::Timeout
                    } else {
                        TaskStatusTag::Error
                    },
                    output: None,
                    error: Some(err.to_string()),
                    error_code: Some(ErrorCode::InternalError),
                    step_count: 0,
                    elapsed_seconds: start.elapsed().as_secs_f64(),
                    completed_at: Utc::now(),
                }
            }
        };

        clear_result?;
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
        Ok(())
    }

    fn get_audit_log(&self) -> Vec<AdapterAuditEntry> {
        self.audit.snapshot()
    }

    fn flush_audit_log(&self) -> Vec<AdapterAuditEntry> {
        self.audit.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_exec_has_no_script_mapping() {
        assert_eq!(script_for(TaskType::CodeExec), None);
    }

    #[test]
    fn web_fetch_and_summarize_are_supported() {
        assert_eq!(script_for(TaskType::WebFetch), Some("web_fetch.py"));
        assert_eq!(script_for(TaskType::Summarize), Some("summarize.py"));
    }
}
