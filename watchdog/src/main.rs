//! `zulu-watchdog` CLI entry point.
//!
//! Provides `start` and `check` subcommands for running the poll loop or
//! performing a single tick.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use zulu::audit::{AuditChain, HashAlgo};
use zulu::config::Config;

use watchdog::config::WatchdogSettings;
use watchdog::poll::Watchdog;

/// Container watchdog for the Zulu control plane.
#[derive(Parser)]
#[command(name = "zulu-watchdog", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the poll loop until interrupted.
    Start,
    /// Run a single tick, print any violations acted on, and exit.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let runtime_paths = zulu::config::runtime_paths().ok();
    let logs_dir = runtime_paths.as_ref().map(|p| p.root.join("logs"));
    let _logging_guard = match logs_dir {
        Some(dir) => Some(zulu::logging::init_production(&dir)?),
        None => {
            zulu::logging::init_cli();
            None
        }
    };

    let config = Config::load().context("failed to load configuration")?;
    let settings = WatchdogSettings::from_config(&config)?;
    let audit = Arc::new(AuditChain::open(&settings.audit_log_path, HashAlgo::Blake3).context("failed to open audit log")?);

    let cli = Cli::parse();
    match cli.command {
        Command::Start => handle_start(settings, audit).await,
        Command::Check => handle_check(settings, audit).await,
    }
}

/// Run the poll loop, ticking at `settings.poll_interval_secs` until
/// interrupted.
async fn handle_start(settings: WatchdogSettings, audit: Arc<AuditChain>) -> anyhow::Result<()> {
    let poll_interval = settings.poll_interval_secs;
    let mut watchdog = Watchdog::new(settings, audit).await?;
    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(poll_interval));

    info!("watchdog poll loop starting");
    loop {
        interval.tick().await;
        match watchdog.tick().await {
            Ok(violations) if violations > 0 => info!(violations, "tick complete with violations"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "poll tick failed, continuing"),
        }
    }
}

/// Run a single tick and report.
async fn handle_check(settings: WatchdogSettings, audit: Arc<AuditChain>) -> anyhow::Result<()> {
    let mut watchdog = Watchdog::new(settings, audit).await?;
    let violations = watchdog.tick().await?;
    println!("checked {violations} kill-severity violation(s)");
    Ok(())
}
