//! Low-level bollard-backed container lifecycle driver for the constrained
//! sandbox backend, hardened per spec: read-only rootfs, dropped
//! capabilities, no new privileges, workspace wiped between tasks.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, InspectContainerOptions,
    RemoveContainerOptions, StartContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::models::HostConfig;
use bollard::Docker;
use tokio_stream::StreamExt;

use super::egress::EgressProxy;
use super::redactor::Redactor;
use super::{ensure_image, ExecutorError};

const SANDBOX_CONTAINER_NAME: &str = "zulu-sandbox";

/// Embedded sandbox Dockerfile for local build fallback when registry pull fails.
const SANDBOX_DOCKERFILE: &str = include_str!("../../Dockerfile.sandbox");

/// Resource and provisioning knobs for the sandbox container.
#[derive(Debug, Clone)]
pub struct SandboxImageConfig {
    /// Registry image reference, or local build tag if unpullable.
    pub image: String,
    /// Memory ceiling, in megabytes.
    pub memory_mb: u32,
    /// CPU core allotment, may be fractional.
    pub cpu_cores: f64,
    /// Optional alternate container runtime (e.g. `"runsc"` for gVisor).
    pub runtime: Option<String>,
}

/// Output of one `exec` inside the sandbox container, before redaction.
#[derive(Debug, Clone)]
pub struct RawExecResult {
    /// Process exit code (`None` on timeout).
    pub exit_code: Option<i32>,
    /// Raw stdout before redaction.
    pub stdout: String,
    /// Raw stderr before redaction.
    pub stderr: String,
    /// Whether the command exceeded its timeout.
    pub timed_out: bool,
    /// Wall-clock execution duration.
    pub duration: Duration,
}

/// Drives the lifecycle of the sandbox container: provisioning, exec, and
/// per-task workspace resets.
#[derive(Debug, Clone)]
pub struct ContainerDriver {
    docker: Docker,
    container_name: String,
    scripts_dir: PathBuf,
    workspace_dir: PathBuf,
    redactor: Redactor,
    egress_proxy: Option<EgressProxy>,
}

impl ContainerDriver {
    /// Connect to Docker, start the egress proxy, and ensure the sandbox
    /// container is running.
    ///
    /// # Errors
    ///
    /// Returns an error when Docker cannot be reached or provisioning fails.
    pub async fn new(
        sandbox: &SandboxImageConfig,
        scripts_dir: PathBuf,
        workspace_dir: PathBuf,
        allowed_domains: &[String],
        redactor: Redactor,
    ) -> Result<Self, ExecutorError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ExecutorError::ConnectionError(e.to_string()))?;

        std::fs::create_dir_all(&workspace_dir)
            .map_err(|e| ExecutorError::InternalError(e.to_string()))?;
        std::fs::create_dir_all(&scripts_dir)
            .map_err(|e| ExecutorError::InternalError(e.to_string()))?;

        let egress_proxy = Some(EgressProxy::ensure(&docker, allowed_domains).await?);

        let driver = Self {
            docker,
            container_name: SANDBOX_CONTAINER_NAME.to_owned(),
            scripts_dir,
            workspace_dir,
            redactor,
            egress_proxy,
        };
        driver.ensure_container(sandbox).await?;
        Ok(driver)
    }

    /// Build a driver without provisioning, for tests that stub out Docker.
    #[doc(hidden)]
    pub fn new_for_test(
        scripts_dir: PathBuf,
        workspace_dir: PathBuf,
        redactor: Redactor,
    ) -> Result<Self, ExecutorError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ExecutorError::ConnectionError(e.to_string()))?;
        Ok(Self {
            docker,
            container_name: format!("zulu-sandbox-test-{}", uuid::Uuid::new_v4()),
            scripts_dir,
            workspace_dir,
            redactor,
            egress_proxy: None,
        })
    }

    /// Whether the Docker daemon is reachable at all.
    pub async fn docker_available() -> bool {
        match Docker::connect_with_local_defaults() {
            Ok(docker) => docker.ping().await.is_ok(),
            Err(_) => false,
        }
    }

    async fn ensure_container(&self, sandbox: &SandboxImageConfig) -> Result<(), ExecutorError> {
        let inspect = self
            .docker
            .inspect_container(&self.container_name, None::<InspectContainerOptions>)
            .await;

        match inspect {
            Ok(state) => {
                let running = state.state.and_then(|s| s.running).unwrap_or(false);
                if !running {
                    self.docker
                        .start_container(&self.container_name, None::<StartContainerOptions<String>>)
                        .await
                        .map_err(|e| ExecutorError::ConnectionError(e.to_string()))?;
                }
                Ok(())
            }
            Err(BollardError::DockerResponseServerError { status_code: 404, .. }) => {
                self.create_container(sandbox).await?;
                self.docker
                    .start_container(&self.container_name, None::<StartContainerOptions<String>>)
                    .await
                    .map_err(|e| ExecutorError::ConnectionError(e.to_string()))
            }
            Err(err) => Err(ExecutorError::ConnectionError(err.to_string())),
        }
    }

    async fn create_container(&self, sandbox: &SandboxImageConfig) -> Result<(), ExecutorError> {
        ensure_image(&self.docker, &sandbox.image, Some(SANDBOX_DOCKERFILE)).await?;

        let container_config = build_container_config(
            &self.workspace_dir,
            &self.scripts_dir,
            sandbox,
            self.egress_proxy.as_ref().map(EgressProxy::network_name),
            self.egress_proxy.as_ref().map(EgressProxy::proxy_address),
        )?;

        let options = Some(CreateContainerOptions {
            name: self.container_name.clone(),
            platform: None,
        });

        self.docker
            .create_container(options, container_config)
            .await
            .map_err(|e| ExecutorError::ConnectionError(e.to_string()))?;
        Ok(())
    }

    /// Run `command` inside the container under a hard timeout, returning
    /// its raw (unredacted) output.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::ConnectionError`] on Docker API failure.
    pub async fn exec(&self, command: &str, timeout: Duration) -> Result<RawExecResult, ExecutorError> {
        let start = std::time::Instant::now();
        let timeout_secs = timeout.as_secs().max(1);
        let wrapped = format!(
            "timeout --signal=TERM --kill-after=5 {timeout_secs} bash -lc {}",
            shell_escape(command)
        );

        let create_exec = CreateExecOptions {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(vec!["bash".to_owned(), "-lc".to_owned(), wrapped]),
            working_dir: Some("/workspace".to_owned()),
            ..Default::default()
        };

        let created = self
            .docker
            .create_exec(&self.container_name, create_exec)
            .await
            .map_err(|e| ExecutorError::ConnectionError(e.to_string()))?;

        let wait_window = timeout.saturating_add(Duration::from_secs(10));
        let output_result = tokio::time::timeout(wait_window, self.collect_exec_output(&created.id)).await;
        let duration = start.elapsed();

        let (stdout_raw, stderr_raw, timed_out) = match output_result {
            Ok(result) => {
                let (stdout, stderr) = result?;
                (stdout, stderr, false)
            }
            Err(_) => (String::new(), String::new(), true),
        };

        let exit_code = if timed_out {
            None
        } else {
            let inspect = self
                .docker
                .inspect_exec(&created.id)
                .await
                .map_err(|e| ExecutorError::ConnectionError(e.to_string()))?;
            inspect.exit_code.and_then(|c| i32::try_from(c).ok())
        };

        Ok(RawExecResult {
            exit_code,
            stdout: self.redactor.redact(&stdout_raw),
            stderr: self.redactor.redact(&stderr_raw),
            timed_out,
            duration,
        })
    }

    /// Remove every file under the bind-mounted workspace directory,
    /// leaving the directory itself in place.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::InternalError`] if the directory cannot be
    /// read or an entry cannot be removed.
    pub fn wipe_workspace(&self) -> Result<(), ExecutorError> {
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

    /// Stop the sandbox container. Idempotent; errors are swallowed since
    /// this only runs on shutdown.
    pub async fn stop(&self) {
        let options = bollard::container::StopContainerOptions { t: 5 };
        let _ = self.docker.stop_container(&self.container_name, Some(options)).await;
    }

    /// True if the container is present and running.
    pub async fn is_running(&self) -> bool {
        self.docker
            .inspect_container(&self.container_name, None::<InspectContainerOptions>)
            .await
            .ok()
            .and_then(|state| state.state.and_then(|s| s.running))
            .unwrap_or(false)
    }

    async fn collect_exec_output(&self, exec_id: &str) -> Result<(String, String), ExecutorError> {
        let started = self
            .docker
            .start_exec(
                exec_id,
                Some(StartExecOptions {
                    detach: false,
                    tty: false,
                    output_capacity: None,
                }),
            )
            .await
            .map_err(|e| ExecutorError::ConnectionError(e.to_string()))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } = started {
            while let Some(chunk) = output.next().await {
                let log = chunk.map_err(|e| ExecutorError::ConnectionError(e.to_string()))?;
                match log {
                    bollard::container::LogOutput::StdOut { message } => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    bollard::container::LogOutput::StdErr { message } => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    bollard::container::LogOutput::Console { message } => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    _ => {}
                }
            }
        }
        Ok((stdout, stderr))
    }
}

/// Build a hardened container configuration for the sandbox.
#[doc(hidden)]
pub fn build_container_config(
    workspace_dir: &Path,
    scripts_dir: &Path,
    sandbox: &SandboxImageConfig,
    network_name: Option<&str>,
    proxy_address: Option<&str>,
) -> Result<ContainerConfig<String>, ExecutorError> {
    let memory_limit = i64::from(sandbox.memory_mb).saturating_mul(1024).saturating_mul(1024);
    let cpu_limit = f64_to_nano_cpu(sandbox.cpu_cores)?;

    let mut tmpfs: HashMap<String, String> = HashMap::new();
    tmpfs.insert("/tmp".to_owned(), "rw,size=512m".to_owned());

    let network_mode = network_name.map(ToOwned::to_owned).unwrap_or_else(|| "none".to_owned());

    let host_config = HostConfig {
        network_mode: Some(network_mode),
        readonly_rootfs: Some(true),
        cap_drop: Some(vec!["ALL".to_owned()]),
        security_opt: Some(vec!["no-new-privileges:true".to_owned()]),
        pids_limit: Some(256),
        memory: Some(memory_limit),
        nano_cpus: Some(cpu_limit),
        runtime: sandbox.runtime.clone(),
        binds: Some(vec![
            format!("{}:/workspace", workspace_dir.display()),
            format!("{}:/scripts", scripts_dir.display()),
        ]),
        tmpfs: Some(tmpfs),
        ..Default::default()
    };

    let env = match proxy_address {
        Some(addr) => {
            let proxy_url = format!("http://{addr}");
            vec![
                format!("HTTP_PROXY={proxy_url}"),
                format!("HTTPS_PROXY={proxy_url}"),
                format!("http_proxy={proxy_url}"),
                format!("https_proxy={proxy_url}"),
            ]
        }
        None => Vec::new(),
    };

    Ok(ContainerConfig {
        image: Some(sandbox.image.clone()),
        cmd: Some(vec!["sleep".to_owned(), "infinity".to_owned()]),
        user: Some("zulu-sandbox".to_owned()),
        working_dir: Some("/workspace".to_owned()),
        env: Some(env),
        host_config: Some(host_config),
        ..Default::default()
    })
}

/// Shell-escape a string for use in `bash -c`.
#[doc(hidden)]
pub fn shell_escape(raw: &str) -> String {
    let escaped = raw.replace('\'', r"'\''");
    format!("'{escaped}'")
}

fn f64_to_nano_cpu(cpu_cores: f64) -> Result<i64, ExecutorError> {
    if !cpu_cores.is_finite() || cpu_cores <= 0.0 {
        return Err(ExecutorError::InvalidTask(
            "cpu_cores must be a positive finite number".to_owned(),
        ));
    }

    let rendered = format!("{cpu_cores:.9}");
    let mut parts = rendered.split('.');
    let whole_part_raw = parts.next().unwrap_or("0");
    let fraction_part_raw = parts.next().unwrap_or("0");

    let whole_part = whole_part_raw
        .parse::<i64>()
        .map_err(|e| ExecutorError::InvalidTask(e.to_string()))?;
    let mut fraction = fraction_part_raw.to_owned();
    while fraction.len() < 9 {
        fraction.push('0');
    }
    fraction.truncate(9);
    let fractional_part = fraction
        .parse::<i64>()
        .map_err(|e| ExecutorError::InvalidTask(e.to_string()))?;

    let nanos = whole_part
        .checked_mul(1_000_000_000)
        .and_then(|value| value.checked_add(fractional_part))
        .ok_or_else(|| ExecutorError::InvalidTask("cpu_cores exceed supported range".to_owned()))?;

    if nanos <= 0 {
        return Err(ExecutorError::InvalidTask(
            "cpu_cores converted to non-positive nano CPU value".to_owned(),
        ));
    }
    Ok(nanos)
}
