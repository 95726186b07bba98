//! One watchdog poll tick: sample every configured container, check it
//! against policy, and react to violations.

use std::collections::HashMap;
use std::sync::Arc;

use bollard::container::{KillContainerOptions, RestartContainerOptions};
use bollard::Docker;
use tracing::{info, warn};
use zulu::audit::AuditChain;
use zulu::policy::{PolicyEngine, Severity};

use crate::config::{WatchdogSettings, HIGH_CPU_THRESHOLD_CHECKS, KILL_GRACE_SECONDS};
use crate::db::{KillEvent, StateDb};
use crate::stats::{self, SampleOutcome};

/// Shared state threaded through every poll tick.
pub struct Watchdog {
    docker: Docker,
    settings: WatchdogSettings,
    policy: PolicyEngine,
    audit: Arc<AuditChain>,
    db: StateDb,
    ticks_since_reload: u64,
}

impl Watchdog {
    /// Build a watchdog over `settings`, connecting to the local Docker
    /// daemon and loading the policy document and state database.
    ///
    /// # Errors
    ///
    /// Returns an error if Docker cannot be reached, the policy file is
    /// invalid YAML, or the state database cannot be opened.
    pub async fn new(settings: WatchdogSettings, audit: Arc<AuditChain>) -> anyhow::Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        let policy = PolicyEngine::load(&settings.policy_path)?;
        let db = StateDb::open(&settings.state_db_path).await?;

        audit.append(
            "watchdog-started",
            HashMap::from([
                ("containers".to_owned(), serde_json::json!(settings.containers)),
                ("policy_fingerprint".to_owned(), serde_json::json!(policy.fingerprint())),
            ]),
        )?;

        Ok(Self { docker, settings, policy, audit, db, ticks_since_reload: 0 })
    }

    /// Run one poll tick: check each configured container, then attempt a
    /// policy reload if the reload interval has elapsed. Returns the number
    /// of kill-severity violations acted on.
    ///
    /// # Errors
    ///
    /// Returns an error if the audit chain or state database cannot be
    /// written to; a single container's sampling failure is logged and does
    /// not abort the rest of the tick.
    pub async fn tick(&mut self) -> anyhow::Result<u32> {
        let mut violation_count = 0;
        for container in self.settings.containers.clone() {
            match self.check_container(&container).await {
                Ok(acted) => violation_count += acted,
                Err(e) => warn!(container = %container, error = %e, "failed to check container"),
            }
        }

        self.ticks_since_reload += 1;
        if self.ticks_since_reload >= self.settings.reload_interval_ticks() {
            self.ticks_since_reload = 0;
            self.maybe_reload_policy().await?;
        }

        Ok(violation_count)
    }

    async fn maybe_reload_policy(&self) -> anyhow::Result<()> {
        match self.policy.reload() {
            Ok(Some(fingerprint)) => {
                self.audit.append(
                    "policy-loaded",
                    HashMap::from([("fingerprint".to_owned(), serde_json::json!(fingerprint))]),
                )?;
                self.db.record_policy_reload(&fingerprint, self.policy.load_count()).await?;
                info!(fingerprint = %fingerprint, "policy reloaded");
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "policy reload failed, keeping previous document"),
        }
        Ok(())
    }

    async fn check_container(&self, container: &str) -> anyhow::Result<u32> {
        let sample = match stats::sample(&self.docker, container).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.audit.append(
                    "container-not-found",
                    HashMap::from([
                        ("container".to_owned(), serde_json::json!(container)),
                        ("error".to_owned(), serde_json::json!(e.to_string())),
                    ]),
                )?;
                return Ok(0);
            }
        };

        let sample = match sample {
            SampleOutcome::NotFound => {
                self.audit.append(
                    "container-not-found",
                    HashMap::from([("container".to_owned(), serde_json::json!(container))]),
                )?;
                return Ok(0);
            }
            SampleOutcome::NotRunning => return Ok(0),
            SampleOutcome::Sampled(sample) => sample,
        };

        let policy_violations = self.policy.check(container, sample.cpu_percent, sample.memory_mb, sample.elapsed_secs);
        let kill_severity = policy_violations.iter().any(|v| v.severity == Severity::Kill);
        for violation in &policy_violations {
            self.audit.append(
                "policy-violation",
                HashMap::from([
                    ("container".to_owned(), serde_json::json!(violation.container)),
                    ("rule".to_owned(), serde_json::json!(violation.rule_name)),
                    ("reason".to_owned(), serde_json::json!(violation.reason)),
                    ("severity".to_owned(), serde_json::json!(violation.severity == Severity::Kill)),
                ]),
            )?;
        }
        if kill_severity {
            self.kill(container, "policy violation").await?;
            return Ok(1);
        }

        // Built-in ceilings apply where the policy itself is silent.
        let rule = self.policy.worker_rule(container);
        let memory_ceiling = rule.as_ref().and_then(|r| r.max_memory_mb).unwrap_or(self.settings.default_memory_ceiling_mb);
        let cpu_ceiling = rule.as_ref().and_then(|r| r.max_cpu_pct).unwrap_or(self.settings.default_cpu_ceiling_percent);

        if sample.memory_mb > memory_ceiling {
            self.kill(
                container,
                &format!("memory {:.1}MB exceeds default ceiling {:.1}MB", sample.memory_mb, memory_ceiling),
            )
            .await?;
            return Ok(1);
        }

        if sample.cpu_percent > cpu_ceiling {
            let strikes = self.db.cpu_strike_count(container).await? + 1;
            self.db.set_cpu_strike_count(container, strikes).await?;
            if strikes >= HIGH_CPU_THRESHOLD_CHECKS {
                self.kill(
                    container,
                    &format!("cpu {:.1}% exceeded default ceiling {cpu_ceiling:.1}% for {strikes} consecutive checks", sample.cpu_percent),
                )
                .await?;
                self.db.set_cpu_strike_count(container, 0).await?;
                return Ok(1);
            }
        } else {
            self.db.set_cpu_strike_count(container, 0).await?;
        }

        Ok(0)
    }

    async fn kill(&self, container: &str, reason: &str) -> anyhow::Result<()> {
        self.audit.append(
            "kill-triggered",
            HashMap::from([
                ("container".to_owned(), serde_json::json!(container)),
                ("reason".to_owned(), serde_json::json!(reason)),
                ("action".to_owned(), serde_json::json!(self.settings.kill_action)),
            ]),
        )?;

        if self.settings.kill_action == "report_only" {
            self.db
                .record_kill_event(&KillEvent {
                    container_name: container.to_owned(),
                    reason: reason.to_owned(),
                    action: self.settings.kill_action.clone(),
                    status: "skipped".to_owned(),
                })
                .await?;
            return Ok(());
        }

        let result = match self.settings.kill_action.as_str() {
            "restart" => {
                self.docker
                    .restart_container(container, Some(RestartContainerOptions { t: isize::try_from(KILL_GRACE_SECONDS).unwrap_or(5) }))
                    .await
            }
            _ => {
                self.docker
                    .kill_container(container, Some(KillContainerOptions { signal: "SIGTERM" }))
                    .await
            }
        };

        let status = if result.is_ok() { "completed" } else { "failed" };
        self.audit.append(
            if result.is_ok() { "kill-completed" } else { "kill-failed" },
            HashMap::from([
                ("container".to_owned(), serde_json::json!(container)),
                ("action".to_owned(), serde_json::json!(self.settings.kill_action)),
            ]),
        )?;
        self.db
            .record_kill_event(&KillEvent {
                container_name: container.to_owned(),
                reason: reason.to_owned(),
                action: self.settings.kill_action.clone(),
                status: status.to_owned(),
            })
            .await?;

        if let Err(e) = result {
            warn!(container = %container, error = %e, "kill action failed, continuing poll loop");
        }
        Ok(())
    }
}
