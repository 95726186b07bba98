//! Configuration loading and management.
//!
//! Loads Zulu configuration from `./config.toml` (or `$ZULU_CONFIG_PATH`).
//! Environment variables override file values; file values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

// ── Top-level config ────────────────────────────────────────────

/// Top-level Zulu configuration loaded from TOML.
///
/// Path: `./config.toml` or `$ZULU_CONFIG_PATH`.
/// Env vars override file values; file values override defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Audit chain settings.
    pub audit: AuditConfig,
    /// Policy engine settings.
    pub policy: PolicyConfig,
    /// Executor attestation settings.
    pub attestation: AttestationConfig,
    /// Model-provider credentials and defaults.
    pub providers: ProvidersConfig,
    /// Planning-layer tunables.
    pub planner: PlannerConfig,
    /// Watchdog polling settings, read by the `watchdog` binary.
    pub watchdog: WatchdogConfig,
    /// Execution-time provider credentials, distinct from the planning-time
    /// keys in [`ProvidersConfig`].
    pub execution_credentials: Option<ExecutionCredentialsConfig>,
}

impl Config {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Config file path: `$ZULU_CONFIG_PATH` or `./config.toml`.
    /// If the file does not exist, returns defaults.
    pub fn load() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!(error = %e, "no .env file loaded");
        }
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from TOML file only, no env overrides.
    fn load_from_file() -> Result<Self> {
        let path = Self::config_path()?;
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: Config =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(Config::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Resolve config file path.
    ///
    /// Checks `$ZULU_CONFIG_PATH` first, then `./config.toml` in the working directory.
    fn config_path() -> Result<PathBuf> {
        Self::config_path_with(|key| std::env::var(key).ok())
    }

    /// Resolve config path using a custom env resolver (for testing).
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
        if let Some(p) = env("ZULU_CONFIG_PATH") {
            return Ok(PathBuf::from(p));
        }
        Ok(PathBuf::from("config.toml"))
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability (avoids unsafe `set_var` in tests).
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("ZULU_AUDIT_LOG") {
            self.audit.log_path = v;
        }
        if let Some(v) = env("ZULU_POLICY_PATH") {
            self.policy.path = v;
        }
        if let Some(v) = env("ZULU_ATTESTATION_NONCE_TTL_SECS") {
            match v.parse() {
                Ok(n) => self.attestation.nonce_ttl_secs = n,
                Err(_) => tracing::warn!(
                    var = "ZULU_ATTESTATION_NONCE_TTL_SECS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }

        // Providers — Anthropic.
        if let Some(key) = env("ZULU_ANTHROPIC_API_KEY") {
            let model = env("ZULU_ANTHROPIC_MODEL")
                .unwrap_or_else(|| self.providers.anthropic_model.clone());
            self.providers.anthropic_model = model;
            self.providers.anthropic_api_key = Some(key);
        }
        // Providers — OpenAI.
        if let Some(key) = env("ZULU_OPENAI_API_KEY") {
            let model =
                env("ZULU_OPENAI_MODEL").unwrap_or_else(|| self.providers.openai_model.clone());
            self.providers.openai_model = model;
            self.providers.openai_api_key = Some(key);
        }
        // Providers — Gemini.
        if let Some(key) = env("ZULU_GEMINI_API_KEY") {
            self.providers.gemini_api_key = Some(key);
        }
        // Providers — Groq.
        if let Some(key) = env("ZULU_GROQ_API_KEY") {
            self.providers.groq_api_key = Some(key);
        }
        // Providers — Ollama, always available locally.
        if let Some(v) = env("ZULU_OLLAMA_URL") {
            self.providers.ollama_base_url = v;
        }
        if let Some(v) = env("ZULU_DEFAULT_PROVIDER") {
            self.providers.default_provider = v;
        }

        // Execution-time credentials, distinct from planning-time provider
        // credentials above (spec: a single short-lived key handed to
        // executors, separate from the long-lived planning keys).
        if let Some(key) = env("ZULU_EXECUTION_API_KEY") {
            let provider = env("ZULU_EXECUTION_PROVIDER")
                .unwrap_or_else(|| self.providers.default_provider.clone());
            self.execution_credentials = Some(ExecutionCredentialsConfig {
                api_key: key,
                provider,
            });
        }

        if let Some(v) = env("ZULU_AMBIGUITY_THRESHOLD") {
            match v.parse() {
                Ok(n) => self.planner.ambiguity_threshold = n,
                Err(_) => tracing::warn!(
                    var = "ZULU_AMBIGUITY_THRESHOLD",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }

        if let Some(v) = env("ZULU_MAX_TASKS") {
            match v.parse() {
                Ok(n) => self.planner.max_tasks = n,
                Err(_) => tracing::warn!(var = "ZULU_MAX_TASKS", value = %v, "ignoring invalid env override"),
            }
        }

        if let Some(v) = env("ZULU_WATCHDOG_POLL_INTERVAL_SECS") {
            match v.parse() {
                Ok(n) => self.watchdog.poll_interval_seconds = n,
                Err(_) => tracing::warn!(
                    var = "ZULU_WATCHDOG_POLL_INTERVAL_SECS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
    }

    /// Parse a TOML string into config (for testing).
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    /// Build configuration purely from an env resolver, skipping any file
    /// read. Used by tests that want deterministic, isolated config.
    #[must_use]
    pub fn for_test(env: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        config.apply_overrides(env);
        config
    }
}

// ── Execution credentials ───────────────────────────────────────

/// Execution-time model-provider credentials, handed to executors
/// separately from the planning-time keys in [`ProvidersConfig`].
#[derive(Clone, Deserialize)]
pub struct ExecutionCredentialsConfig {
    /// API key scoped to executor use.
    pub api_key: String,
    /// Provider registry name this key is valid for (`"anthropic"`, `"openai"`, ...).
    pub provider: String,
}

impl std::fmt::Debug for ExecutionCredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionCredentialsConfig")
            .field("api_key", &"__REDACTED__")
            .field("provider", &self.provider)
            .finish()
    }
}

// ── Audit config ────────────────────────────────────────────────

/// Audit chain settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Path to the hash-chained JSONL audit log.
    pub log_path: String,
    /// Number of events between Merkle checkpoints.
    pub checkpoint_interval: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_path: "/tmp/zulu-audit.jsonl".to_string(),
            checkpoint_interval: 100,
        }
    }
}

// ── Policy config ───────────────────────────────────────────────

/// Policy engine settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Path to the hot-reloadable YAML policy document.
    pub path: String,
    /// Seconds between the watchdog's own reload checks of the policy file.
    pub reload_interval_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            path: "policy.yaml".to_string(),
            reload_interval_secs: 30,
        }
    }
}

// ── Attestation config ───────────────────────────────────────────

/// Executor attestation settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AttestationConfig {
    /// Seconds a nonce stays valid before it is rejected as expired.
    pub nonce_ttl_secs: i64,
}

impl Default for AttestationConfig {
    fn default() -> Self {
        Self {
            nonce_ttl_secs: crate::attestation::DEFAULT_NONCE_TTL_SECS,
        }
    }
}

// ── Providers config ─────────────────────────────────────────────

/// Model-provider credentials and model selection, keyed by registry name
/// (see [`crate::providers::build`]).
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Registry name of the provider used when none is specified explicitly.
    pub default_provider: String,
    /// Anthropic API key, if configured.
    pub anthropic_api_key: Option<String>,
    /// Anthropic model name.
    pub anthropic_model: String,
    /// OpenAI API key, if configured.
    pub openai_api_key: Option<String>,
    /// OpenAI model name.
    pub openai_model: String,
    /// Gemini API key, if configured.
    pub gemini_api_key: Option<String>,
    /// Groq API key, if configured.
    pub groq_api_key: Option<String>,
    /// Ollama base URL — always available locally, no key required.
    pub ollama_base_url: String,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            default_provider: "ollama".to_string(),
            anthropic_api_key: None,
            anthropic_model: "claude-sonnet-4-20250514".to_string(),
            openai_api_key: None,
            openai_model: "gpt-4o".to_string(),
            gemini_api_key: None,
            groq_api_key: None,
            ollama_base_url: "http://localhost:11434".to_string(),
        }
    }
}

impl std::fmt::Debug for ProvidersConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvidersConfig")
            .field("default_provider", &self.default_provider)
            .field("anthropic_api_key", &self.anthropic_api_key.as_ref().map(|_| "__REDACTED__"))
            .field("anthropic_model", &self.anthropic_model)
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "__REDACTED__"))
            .field("openai_model", &self.openai_model)
            .field("gemini_api_key", &self.gemini_api_key.as_ref().map(|_| "__REDACTED__"))
            .field("groq_api_key", &self.groq_api_key.as_ref().map(|_| "__REDACTED__"))
            .field("ollama_base_url", &self.ollama_base_url)
            .finish()
    }
}

impl ProvidersConfig {
    /// Build the configured default provider via the registry in
    /// [`crate::providers::build`], falling back to Ollama (which needs no
    /// key) if the configured default is missing its credentials.
    #[must_use]
    pub fn build_default(&self) -> Option<Box<dyn crate::providers::ModelProvider>> {
        let (key, base_url) = match self.default_provider.as_str() {
            "anthropic" => (self.anthropic_api_key.clone(), None),
            "openai" => (self.openai_api_key.clone(), None),
            "gemini" => (self.gemini_api_key.clone(), None),
            "groq" => (self.groq_api_key.clone(), None),
            _ => (None, Some(self.ollama_base_url.clone())),
        };
        crate::providers::build(&self.default_provider, key, base_url)
            .or_else(|| crate::providers::build("ollama", None, Some(self.ollama_base_url.clone())))
    }
}

// ── Planner config ───────────────────────────────────────────────

/// Planning-layer tunables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Confidence below which a parsed intent is routed to clarification.
    pub ambiguity_threshold: f64,
    /// Upper bound on tasks a single decomposition may produce.
    pub max_tasks: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            ambiguity_threshold: crate::planner::AMBIGUITY_THRESHOLD,
            max_tasks: crate::planner::MAX_TASKS_PER_REQUEST,
        }
    }
}

// ── Watchdog config ───────────────────────────────────────────────

/// Watchdog polling settings, read by the `watchdog` binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Docker container names to poll for resource stats.
    pub containers: Vec<String>,
    /// Seconds between container-stats polls.
    pub poll_interval_seconds: u64,
    /// Seconds between policy-file reload checks.
    pub policy_reload_interval_secs: u64,
    /// Default CPU-percent ceiling applied to a container with no explicit rule.
    pub default_cpu_ceiling_percent: f64,
    /// Default resident-memory ceiling, in megabytes, applied the same way.
    pub default_memory_ceiling_mb: f64,
    /// Action taken against a container that breaches its ceiling
    /// (`"kill"`, `"restart"`, or `"report_only"`).
    pub kill_action: String,
    /// SQLite state database path.
    pub state_db: String,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            containers: Vec::new(),
            poll_interval_seconds: 30,
            policy_reload_interval_secs: 30,
            default_cpu_ceiling_percent: 90.0,
            default_memory_ceiling_mb: 1024.0,
            kill_action: "report_only".to_string(),
            state_db: "/tmp/zulu-watchdog.db".to_string(),
        }
    }
}

// ── Runtime paths ────────────────────────────────────────────────

/// Resolved filesystem paths for runtime state shared across the `zulu` and
/// `watchdog` binaries.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    /// Root directory for runtime state (`~/.zulu/`, or `$ZULU_HOME` if set).
    pub root: PathBuf,
    /// Path to the `.env` file holding provider credentials.
    pub env_file: PathBuf,
}

/// Resolve [`RuntimePaths`] from `$ZULU_HOME`, falling back to `~/.zulu`.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined and
/// `$ZULU_HOME` is unset.
pub fn runtime_paths() -> Result<RuntimePaths> {
    let root = match std::env::var("ZULU_HOME") {
        Ok(v) => PathBuf::from(v),
        Err(_) => {
            let home = directories::BaseDirs::new()
                .ok_or_else(|| anyhow::anyhow!("cannot determine home directory; set $ZULU_HOME"))?;
            home.home_dir().join(".zulu")
        }
    };
    Ok(RuntimePaths {
        env_file: root.join(".env"),
        root,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_paths() {
        let config = Config::default();
        assert_eq!(config.audit.log_path, "/tmp/zulu-audit.jsonl");
        assert_eq!(config.policy.path, "policy.yaml");
    }

    #[test]
    fn from_toml_parses_a_minimal_document() {
        let toml_str = r#"
            [audit]
            log_path = "/data/audit.jsonl"

            [providers]
            default_provider = "anthropic"
        "#;
        let config = Config::from_toml(toml_str).expect("parse");
        assert_eq!(config.audit.log_path, "/data/audit.jsonl");
        assert_eq!(config.providers.default_provider, "anthropic");
    }

    #[test]
    fn apply_overrides_sets_anthropic_key_and_model() {
        let config = Config::for_test(|key| match key {
            "ZULU_ANTHROPIC_API_KEY" => Some("sk-test".to_string()),
            "ZULU_ANTHROPIC_MODEL" => Some("claude-opus-4".to_string()),
            _ => None,
        });
        assert_eq!(config.providers.anthropic_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.providers.anthropic_model, "claude-opus-4");
    }

    #[test]
    fn apply_overrides_ignores_invalid_numeric_override() {
        let config = Config::for_test(|key| match key {
            "ZULU_AMBIGUITY_THRESHOLD" => Some("not-a-number".to_string()),
            _ => None,
        });
        assert_eq!(config.planner.ambiguity_threshold, crate::planner::AMBIGUITY_THRESHOLD);
    }

    #[test]
    fn apply_overrides_sets_execution_credentials() {
        let config = Config::for_test(|key| match key {
            "ZULU_EXECUTION_API_KEY" => Some("exec-key".to_string()),
            "ZULU_EXECUTION_PROVIDER" => Some("groq".to_string()),
            _ => None,
        });
        let creds = config.execution_credentials.expect("execution credentials set");
        assert_eq!(creds.api_key, "exec-key");
        assert_eq!(creds.provider, "groq");
    }

    #[test]
    fn config_path_with_prefers_env_override() {
        let path = Config::config_path_with(|key| {
            (key == "ZULU_CONFIG_PATH").then(|| "/etc/zulu/config.toml".to_string())
        })
        .expect("resolve path");
        assert_eq!(path, PathBuf::from("/etc/zulu/config.toml"));
    }
}
