//! Hot-reloadable YAML policy document describing per-executor resource
//! ceilings and attestation requirements.
//!
//! The document is fingerprinted by hashing its raw bytes, not its parsed
//! structure, so a reformat that changes whitespace also changes the
//! fingerprint and triggers a reload event — byte stability is part of the
//! contract, not an implementation detail.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors raised while loading or reloading a policy document.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The file could not be read.
    #[error("failed to read policy file {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file's contents were not valid policy YAML.
    #[error("failed to parse policy YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Severity of a rule violation: whether it should trigger a kill or only
/// be recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// The watchdog should kill the offending container.
    Kill,
    /// The violation is recorded but does not trigger a kill.
    Warn,
}

/// Per-executor rule set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerRule {
    /// Maximum wall-clock runtime, in seconds.
    pub max_runtime_sec: Option<u64>,
    /// Maximum CPU utilization, as a percentage of one core times core count.
    pub max_cpu_pct: Option<f64>,
    /// Maximum resident memory, in megabytes.
    pub max_memory_mb: Option<f64>,
    /// Whether this executor must complete an attestation handshake before
    /// it may receive dispatched tasks.
    pub require_attestation: bool,
    /// Filesystem paths this executor may read or write.
    pub allow_filesystem: Vec<String>,
    /// Outbound domains this executor may not contact.
    pub deny_outbound: Vec<String>,
}

impl Default for WorkerRule {
    fn default() -> Self {
        Self {
            max_runtime_sec: None,
            max_cpu_pct: None,
            max_memory_mb: None,
            require_attestation: false,
            allow_filesystem: Vec::new(),
            deny_outbound: Vec::new(),
        }
    }
}

/// Global policy knobs that apply across all executors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalPolicy {
    /// Maximum number of tasks that may be in flight at once.
    pub max_concurrent_tasks: u32,
    /// Kill the container on any rule violation, not just `Severity::Kill`.
    pub kill_on_violation: bool,
    /// Kill containers not named in the `workers` map.
    pub kill_unknown_workers: bool,
    /// Audit every check, not just violations.
    pub audit_all_checks: bool,
    /// Multiple of the poll interval at which the watchdog re-checks this
    /// file for changes.
    pub policy_reload_interval: u32,
}

impl Default for GlobalPolicy {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 10,
            kill_on_violation: true,
            kill_unknown_workers: false,
            audit_all_checks: false,
            policy_reload_interval: 5,
        }
    }
}

/// A complete policy document: per-executor rules plus global knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyDocument {
    /// Document schema version.
    pub version: u32,
    /// Rules keyed by executor/container name.
    pub workers: HashMap<String, WorkerRule>,
    /// Global knobs.
    pub global: GlobalPolicy,
}

impl Default for PolicyDocument {
    fn default() -> Self {
        Self {
            version: 1,
            workers: HashMap::new(),
            global: GlobalPolicy::default(),
        }
    }
}

impl PolicyDocument {
    fn from_yaml(raw: &str) -> Result<Self, PolicyError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    fn fingerprint(raw: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(raw);
        hex::encode(hasher.finalize())
    }
}

/// A single rule violation observed while checking a container's sampled
/// stats against the policy document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    /// Container the violation was observed on.
    pub container: String,
    /// Name of the violated rule (e.g. `"max_memory_mb"`).
    pub rule_name: String,
    /// Human-readable reason, including the observed vs. limit values.
    pub reason: String,
    /// Whether this violation should trigger a kill.
    pub severity: Severity,
    /// Additional structured detail for the audit record.
    pub detail: HashMap<String, serde_json::Value>,
}

struct Loaded {
    document: PolicyDocument,
    fingerprint: String,
    load_count: u64,
}

/// Holds the current policy document and handles fingerprint-gated reloads.
pub struct PolicyEngine {
    path: PathBuf,
    state: RwLock<Loaded>,
}

impl PolicyEngine {
    /// Load the policy document at `path`, or fall back to
    /// [`PolicyDocument::default`] if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Io`] for errors other than "not found", and
    /// [`PolicyError::Parse`] if the file exists but is not valid YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref().to_path_buf();
        let (document, fingerprint) = match std::fs::read(&path) {
            Ok(raw) => (PolicyDocument::from_yaml(&String::from_utf8_lossy(&raw))?, PolicyDocument::fingerprint(&raw)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let default_doc = PolicyDocument::default();
                let raw = serde_yaml::to_string(&default_doc).unwrap_or_default();
                (default_doc, PolicyDocument::fingerprint(raw.as_bytes()))
            }
            Err(source) => return Err(PolicyError::Io { path, source }),
        };
        Ok(Self {
            path,
            state: RwLock::new(Loaded {
                document,
                fingerprint,
                load_count: 1,
            }),
        })
    }

    /// Re-read the file and replace the in-memory document only if its raw
    /// bytes changed. Returns `Some(new_fingerprint)` if a reload happened,
    /// `None` if the file was byte-identical to what is already loaded.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Io`] or [`PolicyError::Parse`] on read/parse
    /// failure; the previously loaded document remains in effect.
    pub fn reload(&self) -> Result<Option<String>, PolicyError> {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PolicyError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let fingerprint = PolicyDocument::fingerprint(&raw);
        let unchanged = self.state.read().expect("policy lock poisoned").fingerprint == fingerprint;
        if unchanged {
            return Ok(None);
        }
        let document = PolicyDocument::from_yaml(&String::from_utf8_lossy(&raw))?;
        let mut state = self.state.write().expect("policy lock poisoned");
        state.document = document;
        state.fingerprint = fingerprint.clone();
        state.load_count += 1;
        Ok(Some(fingerprint))
    }

    /// Current fingerprint of the loaded document.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        self.state.read().expect("policy lock poisoned").fingerprint.clone()
    }

    /// Number of times a document has been loaded (1 at construction, plus
    /// one per successful reload).
    #[must_use]
    pub fn load_count(&self) -> u64 {
        self.state.read().expect("policy lock poisoned").load_count
    }

    /// Rule subdocument for a named executor, if one exists.
    #[must_use]
    pub fn worker_rule(&self, name: &str) -> Option<WorkerRule> {
        self.state
            .read()
            .expect("policy lock poisoned")
            .document
            .workers
            .get(name)
            .cloned()
    }

    /// Whether this executor must attest before receiving tasks.
    #[must_use]
    pub fn requires_attestation(&self, name: &str) -> bool {
        self.worker_rule(name).is_some_and(|r| r.require_attestation)
    }

    /// Global policy knobs.
    #[must_use]
    pub fn global(&self) -> GlobalPolicy {
        self.state.read().expect("policy lock poisoned").document.global.clone()
    }

    /// Check a container's sampled stats against its rule (or the absence
    /// of one, if `kill_unknown_workers` is set), returning every violation
    /// in rule order.
    #[must_use]
    pub fn check(
        &self,
        container: &str,
        cpu_pct: f64,
        memory_mb: f64,
        elapsed_secs: u64,
    ) -> Vec<Violation> {
        let state = self.state.read().expect("policy lock poisoned");
        let global = &state.document.global;
        let rule = state.document.workers.get(container);

        let Some(rule) = rule else {
            if global.kill_unknown_workers {
                return vec![Violation {
                    container: container.to_owned(),
                    rule_name: "kill_unknown_workers".to_owned(),
                    reason: format!("{container} has no policy entry and kill_unknown_workers is set"),
                    severity: Severity::Kill,
                    detail: HashMap::new(),
                }];
            }
            return Vec::new();
        };

        let mut violations = Vec::new();
        if let Some(ceiling) = rule.max_memory_mb {
            if memory_mb > ceiling {
                violations.push(Violation {
                    container: container.to_owned(),
                    rule_name: "max_memory_mb".to_owned(),
                    reason: format!("memory {memory_mb:.1}MB exceeds ceiling {ceiling:.1}MB"),
                    severity: Severity::Kill,
                    detail: HashMap::from([
                        ("observed".to_owned(), serde_json::json!(memory_mb)),
                        ("ceiling".to_owned(), serde_json::json!(ceiling)),
                    ]),
                });
            }
        }
        if let Some(ceiling) = rule.max_cpu_pct {
            if cpu_pct > ceiling {
                violations.push(Violation {
                    container: container.to_owned(),
                    rule_name: "max_cpu_pct".to_owned(),
                    reason: format!("cpu {cpu_pct:.1}% exceeds ceiling {ceiling:.1}%"),
                    severity: Severity::Kill,
                    detail: HashMap::from([
                        ("observed".to_owned(), serde_json::json!(cpu_pct)),
                        ("ceiling".to_owned(), serde_json::json!(ceiling)),
                    ]),
                });
            }
        }
        if let Some(ceiling) = rule.max_runtime_sec {
            if elapsed_secs > ceiling {
                violations.push(Violation {
                    container: container.to_owned(),
                    rule_name: "max_runtime_sec".to_owned(),
                    reason: format!("runtime {elapsed_secs}s exceeds ceiling {ceiling}s"),
                    severity: Severity::Kill,
                    detail: HashMap::from([
                        ("observed".to_owned(), serde_json::json!(elapsed_secs)),
                        ("ceiling".to_owned(), serde_json::json!(ceiling)),
                    ]),
                });
            }
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_policy(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("policy.yaml");
        let mut f = std::fs::File::create(&path).expect("create");
        f.write_all(contents.as_bytes()).expect("write");
        path
    }

    const SAMPLE: &str = r#"
version: 1
workers:
  clawd-runner:
    max_memory_mb: 1024
    max_cpu_pct: 80
    require_attestation: true
global:
  kill_on_violation: true
  kill_unknown_workers: false
  policy_reload_interval: 5
"#;

    #[test]
    fn missing_file_falls_back_to_default_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = PolicyEngine::load(dir.path().join("nope.yaml")).expect("load");
        assert_eq!(engine.load_count(), 1);
        assert!(engine.worker_rule("anything").is_none());
    }

    #[test]
    fn unchanged_bytes_do_not_bump_load_count() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_policy(&dir, SAMPLE);
        let engine = PolicyEngine::load(&path).expect("load");
        let fp_before = engine.fingerprint();
        let reloaded = engine.reload().expect("reload");
        assert!(reloaded.is_none());
        assert_eq!(engine.fingerprint(), fp_before);
        assert_eq!(engine.load_count(), 1);
    }

    #[test]
    fn changed_bytes_bump_load_count_and_fingerprint() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_policy(&dir, SAMPLE);
        let engine = PolicyEngine::load(&path).expect("load");
        let fp_before = engine.fingerprint();

        write_policy(&dir, &SAMPLE.replace("1024", "512"));
        let reloaded = engine.reload().expect("reload");
        assert!(reloaded.is_some());
        assert_ne!(engine.fingerprint(), fp_before);
        assert_eq!(engine.load_count(), 2);

        let rule = engine.worker_rule("clawd-runner").expect("rule exists");
        assert_eq!(rule.max_memory_mb, Some(512.0));
    }

    #[test]
    fn check_flags_memory_violation_mentioning_ceiling() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_policy(&dir, SAMPLE);
        let engine = PolicyEngine::load(&path).expect("load");

        let violations = engine.check("clawd-runner", 10.0, 1500.0, 5);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].rule_name, "max_memory_mb");
        assert!(violations[0].reason.contains("1024"));
    }

    #[test]
    fn unknown_worker_with_kill_flag_produces_kill_violation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let contents = SAMPLE.replace("kill_unknown_workers: false", "kill_unknown_workers: true");
        let path = write_policy(&dir, &contents);
        let engine = PolicyEngine::load(&path).expect("load");

        let violations = engine.check("ghost-container", 0.0, 0.0, 0);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].severity, Severity::Kill);
    }
}
