//! Routing table deciding which executor backend serves which task type.
//!
//! Research-style work goes to the remote gateway; quick I/O goes to the
//! subprocess runner; anything requiring code execution or full tool
//! access goes to the constrained sandbox.

use std::sync::Arc;

use async_trait::async_trait;

use crate::types::{TaskRequest, TaskResponse, TaskType};

use super::{AdapterAuditEntry, Executor, ExecutorError};

/// The three interchangeable executor backends, duck-typed behind the
/// [`crate::executor::Executor`] trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterType {
    /// Hardened container with a closed dispatch table.
    Sandbox,
    /// Remote worker reached over HTTP.
    Gateway,
    /// Local subprocess runner for lightweight task types.
    Subprocess,
}

/// Pick the backend that should serve `task_type`, per the routing policy.
#[must_use]
pub fn route(task_type: TaskType) -> AdapterType {
    match task_type {
        TaskType::WebResearch | TaskType::DocumentSynthesis | TaskType::ComparativeAnalysis => {
            AdapterType::Gateway
        }
        TaskType::WebFetch | TaskType::Transform | TaskType::Summarize | TaskType::Ping => {
            AdapterType::Subprocess
        }
        TaskType::CodeExec => AdapterType::Sandbox,
    }
}

/// Single [`Executor`] facade dispatching each request to the backend
/// [`route`] assigns its task type to.
///
/// `ping`/`close`/audit-log access fan out across every configured backend
/// rather than favoring one, since none of them is inherently primary.
pub struct RoutingExecutor {
    sandbox: Option<Arc<dyn Executor>>,
    gateway: Arc<dyn Executor>,
    subprocess: Arc<dyn Executor>,
}

impl RoutingExecutor {
    /// Build a router over the gateway and subprocess backends, with an
    /// optional sandbox backend for `code_exec` tasks. When `sandbox` is
    /// `None`, `code_exec` dispatches fail with
    /// [`ExecutorError::InternalError`] rather than silently falling back
    /// to an unrelated backend.
    #[must_use]
    pub fn new(sandbox: Option<Arc<dyn Executor>>, gateway: Arc<dyn Executor>, subprocess: Arc<dyn Executor>) -> Self {
        Self { sandbox, gateway, subprocess }
    }

    fn backend_for(&self, task_type: TaskType) -> Result<&Arc<dyn Executor>, ExecutorError> {
        match route(task_type) {
            AdapterType::Gateway => Ok(&self.gateway),
            AdapterType::Subprocess => Ok(&self.subprocess),
            AdapterType::Sandbox => self
                .sandbox
                .as_ref()
                .ok_or_else(|| ExecutorError::InternalError("sandbox backend not configured".to_owned())),
        }
    }

    fn all_backends(&self) -> Vec<&Arc<dyn Executor>> {
        let mut backends = vec![&self.gateway, &self.subprocess];
        if let Some(sandbox) = &self.sandbox {
            backends.push(sandbox);
        }
        backends
    }
}

#[async_trait]
impl Executor for RoutingExecutor {
    async fn dispatch(&self, request: TaskRequest) -> Result<TaskResponse, ExecutorError> {
        self.backend_for(request.task_type)?.dispatch(request).await
    }

    async fn ping(&self) -> Result<TaskResponse, ExecutorError> {
        let mut last_err = None;
        for backend in self.all_backends() {
            match backend.ping().await {
                Ok(resp) => return Ok(resp),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| ExecutorError::InternalError("no backends configured".to_owned())))
    }

    async fn close(&self) -> Result<(), ExecutorError> {
        for backend in self.all_backends() {
            backend.close().await?;
        }
        Ok(())
    }

    fn get_audit_log(&self) -> Vec<AdapterAuditEntry> {
        self.all_backends().into_iter().flat_map(Executor::get_audit_log).collect()
    }

    fn flush_audit_log(&self) -> Vec<AdapterAuditEntry> {
        self.all_backends().into_iter().flat_map(Executor::flush_audit_log).collect()
    }
}
