//! Container resource sampling via bollard's stats stream.
//!
//! CPU percent is derived the standard Docker way: the delta in total CPU
//! jiffies consumed by the container over the delta in total system
//! jiffies, scaled by the number of cores. A single non-streaming stats
//! read gives both the current and previous sample in one response.

use bollard::container::{InspectContainerOptions, StatsOptions};
use bollard::errors::Error as BollardError;
use bollard::Docker;
use tokio_stream::StreamExt;

/// Outcome of sampling one container for one watchdog tick.
#[derive(Debug, Clone, Copy)]
pub enum SampleOutcome {
    /// Stats were sampled successfully.
    Sampled(ContainerSample),
    /// No container by this name exists.
    NotFound,
    /// The container exists but is not currently running.
    NotRunning,
}

/// Resource usage observed for one container at one point in time.
#[derive(Debug, Clone, Copy)]
pub struct ContainerSample {
    /// CPU utilization, as a percentage of one core times core count.
    pub cpu_percent: f64,
    /// Resident memory usage, in megabytes.
    pub memory_mb: f64,
    /// Seconds since the container started.
    pub elapsed_secs: u64,
}

/// Sample `container_name`'s current CPU/memory usage and uptime.
///
/// # Errors
///
/// Returns a [`BollardError`] for failures other than "container not
/// found", which is represented as `Ok(SampleOutcome::NotFound)` instead.
pub async fn sample(docker: &Docker, container_name: &str) -> Result<SampleOutcome, BollardError> {
    let inspect = match docker.inspect_container(container_name, None::<InspectContainerOptions>).await {
        Ok(inspect) => inspect,
        Err(BollardError::DockerResponseServerError { status_code: 404, .. }) => {
            return Ok(SampleOutcome::NotFound)
        }
        Err(e) => return Err(e),
    };

    let running = inspect.state.as_ref().and_then(|s| s.running).unwrap_or(false);
    if !running {
        return Ok(SampleOutcome::NotRunning);
    }

    let started_at = inspect
        .state
        .as_ref()
        .and_then(|s| s.started_at.as_deref())
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc));
    let elapsed_secs = started_at
        .map(|dt| (chrono::Utc::now() - dt).num_seconds().max(0))
        .unwrap_or(0)
        .unsigned_abs();

    let options = Some(StatsOptions { stream: false, one_shot: false });
    let mut stream = docker.stats(container_name, options);
    let Some(stats) = stream.next().await else {
        return Ok(SampleOutcome::NotRunning);
    };
    let stats = stats?;

    let cpu_delta = stats
        .cpu_stats
        .cpu_usage
        .total_usage
        .saturating_sub(stats.precpu_stats.cpu_usage.total_usage);
    let system_delta = stats
        .cpu_stats
        .system_cpu_usage
        .unwrap_or(0)
        .saturating_sub(stats.precpu_stats.system_cpu_usage.unwrap_or(0));
    let online_cpus = stats
        .cpu_stats
        .online_cpus
        .or_else(|| stats.cpu_stats.cpu_usage.percpu_usage.as_ref().map(|v| u64::try_from(v.len()).unwrap_or(1)))
        .unwrap_or(1)
        .max(1);

    #[allow(clippy::cast_precision_loss)]
    let cpu_percent = if system_delta > 0 {
        (cpu_delta as f64 / system_delta as f64) * (online_cpus as f64) * 100.0
    } else {
        0.0
    };

    let memory_usage = stats.memory_stats.usage.unwrap_or(0);
    let memory_cache = stats
        .memory_stats
        .stats
        .as_ref()
        .and_then(|s| s.cache)
        .unwrap_or(0);
    #[allow(clippy::cast_precision_loss)]
    let memory_mb = memory_usage.saturating_sub(memory_cache) as f64 / (1024.0 * 1024.0);

    Ok(SampleOutcome::Sampled(ContainerSample { cpu_percent, memory_mb, elapsed_secs }))
}
