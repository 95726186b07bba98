//! Remote gateway backend: translates dispatches into HTTP POSTs against a
//! remote worker endpoint, propagating a service-token header.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::{ErrorCode, TaskRequest, TaskResponse, TaskStatusTag};

use super::{check_credential_ttl, AdapterAuditEntry, AdapterAuditRing, Executor, ExecutorError, RetryPolicy};

/// Wire shape the remote worker returns from its dispatch endpoint.
#[derive(Debug, Deserialize)]
struct GatewayResponse {
    status: GatewayStatus,
    output: Option<HashMap<String, serde_json::Value>>,
    error: Option<String>,
    error_code: Option<String>,
    step_count: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum GatewayStatus {
    Completed,
    Timeout,
    Error,
    Rejected,
}

impl From<GatewayStatus> for TaskStatusTag {
    fn from(value: GatewayStatus) -> Self {
        match value {
            GatewayStatus::Completed => TaskStatusTag::Completed,
            GatewayStatus::Timeout => TaskStatusTag::Timeout,
            GatewayStatus::Error => TaskStatusTag::Error,
            GatewayStatus::Rejected => TaskStatusTag::Rejected,
        }
    }
}

fn parse_error_code(code: Option<&str>) -> Option<ErrorCode> {
    match code {
        Some("TIMEOUT") => Some(ErrorCode::Timeout),
        Some("RATE_LIMITED") => Some(ErrorCode::RateLimited),
        Some("AUTH_FAILED") => Some(ErrorCode::AuthFailed),
        Some("DOMAIN_BLOCKED") => Some(ErrorCode::DomainBlocked),
        Some("TOOL_BLOCKED") => Some(ErrorCode::ToolBlocked),
        Some("STEP_LIMIT") => Some(ErrorCode::StepLimit),
        Some("INVALID_TASK") => Some(ErrorCode::InvalidTask),
        Some("INTERNAL_ERROR") => Some(ErrorCode::InternalError),
        _ => Some(ErrorCode::Unknown),
    }
}

/// Adapter that dispatches tasks to a remote worker over HTTP.
pub struct GatewayAdapter {
    client: reqwest::Client,
    base_url: String,
    service_token: String,
    retry: RetryPolicy,
    credential_ttl_secs: i64,
    audit: AdapterAuditRing,
    cf_access: Option<CloudflareAccess>,
}

/// Cloudflare Access service-token headers, added ahead of the gateway's own
/// bearer auth when the gateway sits behind an Access application.
#[derive(Clone)]
struct CloudflareAccess {
    client_id: String,
    client_secret: String,
}

impl GatewayAdapter {
    /// Build an adapter pointed at `base_url`, authenticating with
    /// `service_token` on every request.
    #[must_use]
    pub fn new(base_url: String, service_token: String, retry: RetryPolicy, credential_ttl_secs: i64) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            service_token,
            retry,
            credential_ttl_secs,
            audit: AdapterAuditRing::new(super::DEFAULT_AUDIT_RING_CAPACITY),
            cf_access: None,
        }
    }

    /// Attach Cloudflare Access service-token credentials, sent as
    /// `CF-Access-Client-Id` / `CF-Access-Client-Secret` on every request.
    #[must_use]
    pub fn with_cloudflare_access(mut self, client_id: String, client_secret: String) -> Self {
        self.cf_access = Some(CloudflareAccess { client_id, client_secret });
        self
    }

    fn apply_cf_access_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.cf_access {
            Some(cf) => builder
                .header("CF-Access-Client-Id", &cf.client_id)
                .header("CF-Access-Client-Secret", &cf.client_secret),
            None => builder,
        }
    }

    async fn post_dispatch(&self, request: &TaskRequest) -> Result<GatewayResponse, ExecutorError> {
        let url = format!("{}/dispatch", self.base_url.trim_end_matches('/'));
        let builder = self.apply_cf_access_headers(self.client.post(&url));
        let response = builder
            .bearer_auth(&self.service_token)
            .json(request)
            .timeout(Duration::from_secs(u64::from(request.timeout_seconds)))
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::classify(&format!("gateway returned {status}: {body}")));
        }

        response
            .json::<GatewayResponse>()
            .await
            .map_err(|e| ExecutorError::InternalError(e.to_string()))
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> ExecutorError {
    if err.is_timeout() {
        ExecutorError::Timeout
    } else if err.is_connect() {
        ExecutorError::ConnectionError(err.to_string())
    } else {
        ExecutorError::classify(&err.to_string())
    }
}

#[async_trait]
impl Executor for GatewayAdapter {
    async fn dispatch(&self, request: TaskRequest) -> Result<TaskResponse, ExecutorError> {
        let start = Instant::now();
        check_credential_ttl(request.credentials.as_ref(), self.credential_ttl_secs)?;

        self.audit.push(
            "dispatch-start",
            Some(&request.task_id),
            HashMap::from([("task_type".to_owned(), serde_json::json!(request.task_type))]),
        );

        let mut attempt = 0u32;
        let outcome = loop {
            match self.post_dispatch(&request).await {
                Ok(resp) => break Ok(resp),
                Err(err) if attempt.saturating_add(1) < self.retry.max_retries && err.is_connection_class() => {
                    tokio::time::sleep(self.retry.backoff_for(attempt)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(err) => break Err(err),
            }
        };

        let response = match outcome {
            Ok(resp) => {
                self.audit.push(
                    "dispatch-complete",
                    Some(&request.task_id),
                    HashMap::new(),
                );
                TaskResponse {
                    task_id: request.task_id.clone(),
                    status: resp.status.into(),
                    output: resp.output,
                    error: resp.error,
                    error_code: parse_error_code(resp.error_code.as_deref()),
                    step_count: resp.step_count.unwrap_or(0),
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
                    HashMap::from([("error".to_owned(), serde_json::json!(err.to_string()))]),
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
                    error_code: Some(error_code_for(&err)),
                    step_count: 0,
                    elapsed_seconds: start.elapsed().as_secs_f64(),
                    completed_at: Utc::now(),
                }
            }
        };

        Ok(response)
    }

    async fn ping(&self) -> Result<TaskResponse, ExecutorError> {
        let url = format!("{}/health", self.base_url.trim_end_matches('/'));
        let start = Instant::now();
        let builder = self.apply_cf_access_headers(self.client.get(&url));
        let response = builder
            .bearer_auth(&self.service_token)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = if response.status().is_success() {
            TaskStatusTag::Completed
        } else {
            TaskStatusTag::Error
        };

        Ok(TaskResponse {
            task_id: "ping".to_owned(),
            status,
            output: Some(HashMap::from([("pong".to_owned(), serde_json::json!(true))])),
            error: None,
            error_code: None,
            step_count: 0,
            elapsed_seconds: start.elapsed().as_secs_f64(),
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

/// Map an [`ExecutorError`] raised locally (not by the remote gateway) to
/// its structured code.
pub(crate) fn error_code_for(err: &ExecutorError) -> ErrorCode {
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
    fn gateway_status_maps_onto_task_status_tag() {
        assert_eq!(TaskStatusTag::from(GatewayStatus::Rejected), TaskStatusTag::Rejected);
        assert_eq!(TaskStatusTag::from(GatewayStatus::Completed), TaskStatusTag::Completed);
    }

    #[test]
    fn parse_error_code_falls_back_to_unknown() {
        assert_eq!(parse_error_code(Some("SOMETHING_NEW")), Some(ErrorCode::Unknown));
        assert_eq!(parse_error_code(Some("DOMAIN_BLOCKED")), Some(ErrorCode::DomainBlocked));
    }
}
