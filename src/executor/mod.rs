//! The executor adapter contract: a uniform dispatch interface implemented
//! by three interchangeable backends (constrained sandbox, remote gateway,
//! subprocess runner).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bollard::image::{BuildImageOptions, CreateImageOptions};
use bollard::Docker;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use crate::types::{ScopedCredentials, TaskRequest, TaskResponse};

pub mod docker;
pub mod egress;
pub mod gateway;
pub mod redactor;
pub mod requests;
pub mod routing;
pub mod sandbox;
pub mod subprocess;

/// Ensure `image` is present locally, pulling it from its registry first and
/// falling back to a local build from `dockerfile` (packed as a minimal tar
/// stream) when the pull fails.
///
/// # Errors
///
/// Returns [`ExecutorError::ConnectionError`] if neither the pull nor the
/// fallback build succeeds.
pub async fn ensure_image(
    docker: &Docker,
    image: &str,
    dockerfile: Option<&str>,
) -> Result<(), ExecutorError> {
    if docker.inspect_image(image).await.is_ok() {
        return Ok(());
    }

    let pull = docker.create_image(
        Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        }),
        None,
        None,
    );
    tokio::pin!(pull);
    let mut pull_failed = false;
    while let Some(chunk) = pull.next().await {
        if chunk.is_err() {
            pull_failed = true;
            break;
        }
    }
    if !pull_failed && docker.inspect_image(image).await.is_ok() {
        return Ok(());
    }

    let Some(dockerfile) = dockerfile else {
        return Err(ExecutorError::ConnectionError(format!(
            "failed to pull image {image} and no local Dockerfile fallback was supplied"
        )));
    };

    let tar = build_single_file_tar("Dockerfile", dockerfile);
    let build = docker.build_image(
        BuildImageOptions {
            dockerfile: "Dockerfile".to_owned(),
            t: image.to_owned(),
            rm: true,
            ..Default::default()
        },
        None,
        Some(tar.into()),
    );
    tokio::pin!(build);
    while let Some(chunk) = build.next().await {
        chunk.map_err(|e| ExecutorError::ConnectionError(format!("local image build failed: {e}")))?;
    }
    Ok(())
}

/// Pack a single file into an uncompressed POSIX tar archive, as bollard's
/// `build_image` expects for its build context.
fn build_single_file_tar(name: &str, contents: &str) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_path(name).expect("static path is valid");
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, contents.as_bytes())
        .expect("writing to an in-memory buffer cannot fail");
    builder.into_inner().expect("writing to an in-memory buffer cannot fail")
}

/// Default bound on an adapter's in-memory audit ring buffer.
pub const DEFAULT_AUDIT_RING_CAPACITY: usize = 1000;

/// Errors surfaced across the dispatch boundary, matching the taxonomy
/// every backend must translate its own failures into.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutorError {
    /// The task-level timeout elapsed before a response arrived.
    #[error("task timed out")]
    Timeout,
    /// The backend is rate-limiting this caller.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Credentials were rejected or had already expired.
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// A requested domain was outside the task's allow-list.
    #[error("domain blocked: {0}")]
    DomainBlocked(String),
    /// A requested tool was outside the task's allow-list.
    #[error("tool blocked: {0}")]
    ToolBlocked(String),
    /// The task exceeded its step budget.
    #[error("step limit exceeded")]
    StepLimit,
    /// The request itself failed local validation.
    #[error("invalid task: {0}")]
    InvalidTask(String),
    /// Transport-level failure: connection refused, DNS failure, and the
    /// like. Distinct from [`ExecutorError::InternalError`] because this is
    /// the class the caller may treat as "no attempt was made".
    #[error("connection error: {0}")]
    ConnectionError(String),
    /// Backend-side fault unrelated to the request's validity.
    #[error("internal error: {0}")]
    InternalError(String),
    /// A failure whose shape did not match any known category; falls back
    /// to a best-effort string classification of the original message.
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl ExecutorError {
    /// Classify a free-text backend error message using substring
    /// matching, for backends that cannot report a structured code.
    #[must_use]
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("timeout") || lower.contains("timed out") {
            ExecutorError::Timeout
        } else if lower.contains("rate limit") || lower.contains("429") {
            ExecutorError::RateLimited(message.to_owned())
        } else if lower.contains("unauthorized") || lower.contains("auth") || lower.contains("401") {
            ExecutorError::AuthFailed(message.to_owned())
        } else if lower.contains("cannot connect")
            || lower.contains("getaddrinfo")
            || lower.contains("connection refused")
        {
            ExecutorError::ConnectionError(message.to_owned())
        } else {
            ExecutorError::Unknown(message.to_owned())
        }
    }

    /// Whether this error represents a connection-class failure that the
    /// task graph executor should treat as eligible for direct-LLM
    /// fallback, per the substring contract in [`Self::classify`].
    #[must_use]
    pub fn is_connection_class(&self) -> bool {
        matches!(self, ExecutorError::ConnectionError(_))
    }
}

/// One entry in an adapter's bounded audit ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterAuditEntry {
    /// When the entry was recorded.
    pub ts: chrono::DateTime<Utc>,
    /// Event name, e.g. `"dispatch-start"`, `"dispatch-complete"`.
    pub event: String,
    /// Task id this entry concerns, if any.
    pub task_id: Option<String>,
    /// Free-form detail.
    pub detail: HashMap<String, serde_json::Value>,
}

/// Bounded, in-memory audit ring kept by every adapter instance.
///
/// When full and no flush callback is registered, the oldest entry is
/// dropped and an overflow counter is incremented; the overflow itself is
/// recorded as its own entry the next time the ring is flushed.
pub struct AdapterAuditRing {
    capacity: usize,
    entries: Mutex<VecDeque<AdapterAuditEntry>>,
    dropped: Mutex<u64>,
}

impl AdapterAuditRing {
    /// Build a ring with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            dropped: Mutex::new(0),
        }
    }

    /// Push a new entry, dropping the oldest if at capacity.
    pub fn push(&self, event: &str, task_id: Option<&str>, detail: HashMap<String, serde_json::Value>) {
        let mut entries = self.entries.lock().expect("audit ring lock poisoned");
        if entries.len() >= self.capacity {
            entries.pop_front();
            *self.dropped.lock().expect("dropped counter lock poisoned") += 1;
        }
        entries.push_back(AdapterAuditEntry {
            ts: Utc::now(),
            event: event.to_owned(),
            task_id: task_id.map(str::to_owned),
            detail,
        });
    }

    /// Drain all entries, prefixing an overflow entry if any were dropped
    /// since the last flush.
    pub fn drain(&self) -> Vec<AdapterAuditEntry> {
        let mut dropped = self.dropped.lock().expect("dropped counter lock poisoned");
        let mut entries = self.entries.lock().expect("audit ring lock poisoned");
        let mut out = Vec::with_capacity(entries.len() + 1);
        if *dropped > 0 {
            out.push(AdapterAuditEntry {
                ts: Utc::now(),
                event: "audit-ring-overflow".to_owned(),
                task_id: None,
                detail: HashMap::from([("dropped_count".to_owned(), serde_json::json!(*dropped))]),
            });
            *dropped = 0;
        }
        out.extend(entries.drain(..));
        out
    }

    /// Non-destructive snapshot of current entries.
    #[must_use]
    pub fn snapshot(&self) -> Vec<AdapterAuditEntry> {
        self.entries.lock().expect("audit ring lock poisoned").iter().cloned().collect()
    }
}

/// Retry policy shared by every adapter's dispatch pipeline.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_retries: u32,
    /// Base of the exponential backoff, in milliseconds.
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 200,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before attempt number `attempt` (0-indexed).
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_base_ms.saturating_mul(1u64 << attempt.min(16)))
    }
}

/// Validate credentials against their TTL without making any network call.
/// Fails fast per the property that an expired credential must never reach
/// the transport layer.
pub fn check_credential_ttl(
    credentials: Option<&ScopedCredentials>,
    ttl_secs: i64,
) -> Result<(), ExecutorError> {
    if let Some(creds) = credentials {
        if creds.is_expired(ttl_secs) {
            return Err(ExecutorError::AuthFailed("credentials expired".to_owned()));
        }
    }
    Ok(())
}

/// Common contract implemented by every executor backend.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Dispatch a task request, running it through the backend's own
    /// validation, retry, and audit pipeline.
    async fn dispatch(&self, request: TaskRequest) -> Result<TaskResponse, ExecutorError>;

    /// Liveness probe; cheaper than a full dispatch.
    async fn ping(&self) -> Result<TaskResponse, ExecutorError>;

    /// Release any held session resources (HTTP client, container, etc.).
    async fn close(&self) -> Result<(), ExecutorError>;

    /// Snapshot of this adapter's audit ring without draining it.
    fn get_audit_log(&self) -> Vec<AdapterAuditEntry>;

    /// Drain this adapter's audit ring, surfacing any overflow marker.
    fn flush_audit_log(&self) -> Vec<AdapterAuditEntry>;
}
