#![allow(missing_docs)]

//! Zulu control-plane CLI: classify a request into intent, decompose it
//! into a task graph, and dispatch that graph through the policy-governed
//! executor layer. Also exposes the audit chain's verification and
//! checkpoint operations directly, independent of any particular run.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use zulu::audit::{AuditChain, HashAlgo};
use zulu::config::Config;
use zulu::executor::docker::{ContainerDriver, SandboxImageConfig};
use zulu::executor::gateway::GatewayAdapter;
use zulu::executor::redactor::Redactor;
use zulu::executor::routing::RoutingExecutor;
use zulu::executor::sandbox::SandboxExecutor;
use zulu::executor::subprocess::SubprocessAdapter;
use zulu::executor::{Executor, RetryPolicy};
use zulu::planner::{graph::TaskGraphExecutor, PlanAndExecuteOutcome, PlanOutcome, Planner};
use zulu::providers::ModelProvider;

#[derive(Parser)]
#[command(name = "zulu", about = "Task-planning and dispatch control plane")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify and decompose `input` into a task graph; print it without
    /// dispatching anything.
    Plan { input: String },
    /// Plan `input` and execute the resulting graph, printing per-task
    /// results and errors.
    Run { input: String },
    /// Walk the audit log at `path` from sequence 0 and report the first
    /// broken link, if any.
    VerifyAudit { path: PathBuf },
    /// Force a Merkle checkpoint flush over the audit log at `path`.
    Checkpoint { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    zulu::logging::init_cli();

    let cli = Cli::parse();
    match cli.command {
        Command::Plan { input } => run_plan(input).await,
        Command::Run { input } => run_execute(input).await,
        Command::VerifyAudit { path } => run_verify_audit(path),
        Command::Checkpoint { path } => run_checkpoint(path),
    }
}

async fn run_plan(input: String) -> Result<()> {
    let config = Config::load()?;
    let planner = build_planner(&config)?;
    let request_id = uuid::Uuid::new_v4().to_string();

    match planner.plan(request_id, &input).await {
        PlanOutcome::Graph(graph) => {
            println!("{}", serde_json::to_string_pretty(&graph.tasks)?);
        }
        PlanOutcome::Chitchat(reply) => println!("{reply}"),
        PlanOutcome::NeedsClarification(question) => println!("Clarification needed: {question}"),
        PlanOutcome::Failed(reason) => {
            error!(reason, "planning failed");
            println!("Planning failed: {reason}");
        }
    }
    Ok(())
}

async fn run_execute(input: String) -> Result<()> {
    let config = Config::load()?;
    let planner = build_planner(&config)?;
    let graph_executor = build_graph_executor(&config).await?;
    let request_id = uuid::Uuid::new_v4().to_string();

    let audit = open_audit_chain(&config).ok();
    if let Some(chain) = &audit {
        let _ = chain.append(
            "dispatch-attempt",
            HashMap::from([("request_id".to_owned(), serde_json::json!(request_id))]),
        );
    }

    match planner.plan_and_execute(request_id.clone(), &input, &graph_executor, None).await {
        PlanAndExecuteOutcome::Executed(result) => {
            if let Some(chain) = &audit {
                let _ = chain.append(
                    "dispatch-complete",
                    HashMap::from([
                        ("request_id".to_owned(), serde_json::json!(request_id)),
                        ("success".to_owned(), serde_json::json!(result.success)),
                    ]),
                );
            }
            println!("{}", result.summary);
            for (task_id, output) in &result.results {
                println!("-- {task_id} --\n{}", serde_json::to_string_pretty(output)?);
            }
            for (task_id, err) in &result.errors {
                println!("-- {task_id} failed: {err} --");
            }
        }
        PlanAndExecuteOutcome::Planned(PlanOutcome::Chitchat(reply)) => println!("{reply}"),
        PlanAndExecuteOutcome::Planned(PlanOutcome::NeedsClarification(question)) => {
            println!("Clarification needed: {question}");
        }
        PlanAndExecuteOutcome::Planned(PlanOutcome::Failed(reason)) => {
            println!("Planning failed: {reason}");
        }
        PlanAndExecuteOutcome::Planned(PlanOutcome::Graph(_)) => unreachable!("plan_and_execute always executes a graph outcome"),
    }
    Ok(())
}

fn run_verify_audit(path: PathBuf) -> Result<()> {
    let chain = AuditChain::open(&path, HashAlgo::Blake3).context("failed to open audit log")?;
    match chain.verify()? {
        (true, _) => {
            println!("audit log intact: {}", path.display());
            Ok(())
        }
        (false, Some(seq)) => {
            println!("audit log broken at sequence {seq}: {}", path.display());
            anyhow::bail!("audit chain verification failed at sequence {seq}")
        }
        (false, None) => anyhow::bail!("audit chain verification failed with no identifiable sequence"),
    }
}

fn run_checkpoint(path: PathBuf) -> Result<()> {
    let chain = AuditChain::open(&path, HashAlgo::Blake3).context("failed to open audit log")?;
    match chain.flush_checkpoint()? {
        Some(checkpoint) => {
            println!(
                "checkpointed {} events (seq {}-{}): root {}",
                checkpoint.event_count, checkpoint.first_seq, checkpoint.last_seq, checkpoint.merkle_root
            );
        }
        None => println!("nothing to checkpoint: no events since the last window"),
    }
    Ok(())
}

fn open_audit_chain(config: &Config) -> Result<AuditChain> {
    AuditChain::open(&config.audit.log_path, HashAlgo::Blake3).context("failed to open audit log")
}

fn build_planner(config: &Config) -> Result<Planner> {
    let provider: Arc<dyn ModelProvider> = config
        .providers
        .build_default()
        .context("no model provider could be constructed from configuration")?
        .into();
    let model = default_model_for(config);
    Ok(Planner::new(provider, model))
}

fn default_model_for(config: &Config) -> String {
    match config.providers.default_provider.as_str() {
        "anthropic" => config.providers.anthropic_model.clone(),
        "openai" => config.providers.openai_model.clone(),
        "gemini" | "groq" => "default".to_owned(),
        _ => "llama3".to_owned(),
    }
}

/// Build the graph executor backing `run`/`plan_and_execute`.
///
/// The sandbox backend is provisioned best-effort: if the local Docker
/// daemon can't be reached or the sandbox image can't be prepared, the
/// router falls back to dispatching `code_exec` tasks through the gateway
/// or subprocess backends instead of failing the whole executor.
async fn build_graph_executor(config: &Config) -> Result<TaskGraphExecutor> {
    let retry = RetryPolicy::default();

    let gateway_url = std::env::var("ZULU_GATEWAY_URL").unwrap_or_else(|_| "http://localhost:8080".to_owned());
    let gateway_token = std::env::var("ZULU_GATEWAY_TOKEN").unwrap_or_default();
    let gateway: Arc<dyn Executor> = Arc::new(GatewayAdapter::new(gateway_url, gateway_token, retry, 3600));

    let runtime_paths = zulu::config::runtime_paths().unwrap_or_else(|e| {
        warn!(error = %e, "falling back to /tmp for subprocess scripts/workspace");
        zulu::config::RuntimePaths { root: PathBuf::from("/tmp/zulu"), env_file: PathBuf::from("/tmp/zulu/.env") }
    });
    let subprocess: Arc<dyn Executor> = Arc::new(SubprocessAdapter::new(
        runtime_paths.root.join("scripts"),
        runtime_paths.root.join("workspace"),
        Duration::from_secs(u64::from(zulu::planner::DEFAULT_TASK_TIMEOUT_SECONDS)),
        3600,
    ));

    let sandbox = build_sandbox(&runtime_paths.root, retry).await;
    let router = Arc::new(RoutingExecutor::new(sandbox, gateway, subprocess));

    let direct_provider: Arc<dyn ModelProvider> = config
        .providers
        .build_default()
        .context("no model provider could be constructed for the direct-LLM fallback")?
        .into();
    let direct_model = default_model_for(config);

    let _ = info!(provider = %direct_provider.name(), "graph executor ready");
    Ok(TaskGraphExecutor::new(router, direct_provider, direct_model))
}

/// Attempt to provision the sandbox container driver. Returns `None`
/// (rather than an error) when Docker isn't reachable, so a developer
/// laptop without Docker can still exercise the gateway/subprocess paths.
async fn build_sandbox(runtime_root: &std::path::Path, retry: RetryPolicy) -> Option<Arc<dyn Executor>> {
    let image = std::env::var("ZULU_SANDBOX_IMAGE").unwrap_or_else(|_| "zulu-sandbox:latest".to_owned());
    let memory_mb: u32 = std::env::var("ZULU_SANDBOX_MEMORY_MB").ok().and_then(|v| v.parse().ok()).unwrap_or(512);
    let cpu_cores: f64 = std::env::var("ZULU_SANDBOX_CPU_CORES").ok().and_then(|v| v.parse().ok()).unwrap_or(1.0);
    let allowed_domains: Vec<String> = std::env::var("ZULU_SANDBOX_ALLOWED_DOMAINS")
        .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned).collect())
        .unwrap_or_default();

    let sandbox_config = SandboxImageConfig { image, memory_mb, cpu_cores, runtime: std::env::var("ZULU_SANDBOX_RUNTIME").ok() };
    let redactor = Redactor::new(Vec::new());

    match ContainerDriver::new(&sandbox_config, runtime_root.join("scripts"), runtime_root.join("sandbox-workspace"), &allowed_domains, redactor).await {
        Ok(driver) => {
            info!("sandbox container driver provisioned");
            Some(Arc::new(SandboxExecutor::new(driver, retry, 3600)))
        }
        Err(e) => {
            warn!(error = %e.to_string(), "sandbox backend unavailable, code_exec tasks will route elsewhere");
            None
        }
    }
}
