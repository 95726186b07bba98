//! Watchdog-specific configuration, layered on top of
//! [`zulu::config::Config`]'s shared `watchdog` section.
//!
//! The watchdog reads the same `config.toml`/`$ZULU_CONFIG_PATH` the `zulu`
//! binary reads (via [`zulu::config::Config::load`]) and additionally
//! resolves its own SQLite state path relative to the shared runtime root.

use std::path::PathBuf;

use anyhow::Result;

/// Resolved watchdog runtime settings, combining [`zulu::config::Config`]'s
/// `watchdog` section with filesystem paths shared with the `zulu` binary.
#[derive(Debug, Clone)]
pub struct WatchdogSettings {
    /// Container names to poll each tick.
    pub containers: Vec<String>,
    /// Seconds between stats polls.
    pub poll_interval_secs: u64,
    /// Multiple of `poll_interval_secs` at which the policy file is re-checked.
    pub policy_reload_interval_secs: u64,
    /// CPU-percent ceiling applied when a container has no policy entry.
    pub default_cpu_ceiling_percent: f64,
    /// Memory ceiling (MB) applied when a container has no policy entry.
    pub default_memory_ceiling_mb: f64,
    /// Action taken on a kill-severity violation: `"restart"`, `"stop"`, or
    /// `"report_only"` (audit the violation but take no host action).
    pub kill_action: String,
    /// Path to the policy YAML document.
    pub policy_path: PathBuf,
    /// Path to the audit log shared with the `zulu` binary.
    pub audit_log_path: PathBuf,
    /// Path to the watchdog's own SQLite state database.
    pub state_db_path: PathBuf,
}

/// Number of consecutive over-ceiling CPU samples before a kill is triggered.
/// A single compliant sample resets the counter to zero.
pub const HIGH_CPU_THRESHOLD_CHECKS: u32 = 3;

/// Grace period given to a container between a restart/stop signal and the
/// watchdog considering the kill complete.
pub const KILL_GRACE_SECONDS: u64 = 5;

impl WatchdogSettings {
    /// Build settings from the shared [`zulu::config::Config`].
    ///
    /// # Errors
    ///
    /// Returns an error if `$ZULU_HOME`/the home directory cannot be
    /// resolved when no absolute state-db path is configured.
    pub fn from_config(config: &zulu::config::Config) -> Result<Self> {
        let watchdog = &config.watchdog;
        let state_db_path = PathBuf::from(&watchdog.state_db);

        Ok(Self {
            containers: watchdog.containers.clone(),
            poll_interval_secs: watchdog.poll_interval_seconds,
            policy_reload_interval_secs: watchdog.policy_reload_interval_secs,
            default_cpu_ceiling_percent: watchdog.default_cpu_ceiling_percent,
            default_memory_ceiling_mb: watchdog.default_memory_ceiling_mb,
            kill_action: watchdog.kill_action.clone(),
            policy_path: PathBuf::from(&config.policy.path),
            audit_log_path: PathBuf::from(&config.audit.log_path),
            state_db_path,
        })
    }

    /// Number of poll ticks between policy reload attempts, at least 1.
    #[must_use]
    pub fn reload_interval_ticks(&self) -> u64 {
        (self.policy_reload_interval_secs / self.poll_interval_secs.max(1)).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reload_interval_ticks_is_at_least_one() {
        let settings = WatchdogSettings {
            containers: Vec::new(),
            poll_interval_secs: 30,
            policy_reload_interval_secs: 10,
            default_cpu_ceiling_percent: 90.0,
            default_memory_ceiling_mb: 1024.0,
            kill_action: "report_only".to_owned(),
            policy_path: PathBuf::from("policy.yaml"),
            audit_log_path: PathBuf::from("/tmp/audit.jsonl"),
            state_db_path: PathBuf::from("/tmp/state.db"),
        };
        assert_eq!(settings.reload_interval_ticks(), 1);
    }

    #[test]
    fn reload_interval_ticks_divides_evenly() {
        let settings = WatchdogSettings {
            containers: Vec::new(),
            poll_interval_secs: 10,
            policy_reload_interval_secs: 50,
            default_cpu_ceiling_percent: 90.0,
            default_memory_ceiling_mb: 1024.0,
            kill_action: "report_only".to_owned(),
            policy_path: PathBuf::from("policy.yaml"),
            audit_log_path: PathBuf::from("/tmp/audit.jsonl"),
            state_db_path: PathBuf::from("/tmp/state.db"),
        };
        assert_eq!(settings.reload_interval_ticks(), 5);
    }
}
