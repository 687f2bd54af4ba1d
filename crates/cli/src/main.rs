//! Conductor CLI entry point.
//!
//! This binary is the composition root for the workspace. Responsibilities:
//!
//! 1. **Parse arguments** — subcommands for running and validating workflow
//!    definition files.
//! 2. **Wire observability** — configure `tracing-subscriber` with an
//!    env-filter and an optional JSON layer. All `tracing` events emitted by
//!    every crate in the workspace flow through this layer.
//! 3. **Construct infrastructure** — build the worker registry (in-process
//!    demo workers resolving every binding in the definition) and inject it
//!    into the engine.
//! 4. **Drive the run** — wire Ctrl-C to the run-level cancellation token,
//!    await the report, print it as JSON, and exit non-zero if the run
//!    aborted.

mod demo;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use engine::WorkflowEngine;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use workflow::ContextKey;

#[derive(Parser)]
#[command(
    name = "conductor",
    about = "Sequential workflow orchestration with shared context and quality gates"
)]
struct Cli {
    /// Emit logs as JSON instead of human-readable text.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a workflow definition with in-process demo workers.
    Run {
        /// Path to the workflow definition file.
        definition: PathBuf,

        /// Initial argument as KEY=VALUE; the value is parsed as JSON,
        /// falling back to a plain string. Repeatable.
        #[arg(long = "arg", value_name = "KEY=VALUE")]
        args: Vec<String>,

        /// Artificial delay per demo worker invocation, in milliseconds.
        #[arg(long, default_value_t = 0)]
        worker_delay_ms: u64,
    },
    /// Load and validate a workflow definition without running it.
    Validate {
        /// Path to the workflow definition file.
        definition: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::Run {
            definition,
            args,
            worker_delay_ms,
        } => run(definition, args, worker_delay_ms).await,
        Command::Validate { definition } => validate(definition),
    }
}

fn init_tracing(json_logs: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn validate(path: PathBuf) -> anyhow::Result<()> {
    let definition = config::load_definition(&path)?;
    println!(
        "workflow '{}' is valid: {} stages, {} fallback stages, {} gates",
        definition.name(),
        definition.stages().len(),
        definition.fallbacks().len(),
        definition.gates().len(),
    );
    Ok(())
}

async fn run(path: PathBuf, args: Vec<String>, worker_delay_ms: u64) -> anyhow::Result<()> {
    let definition = Arc::new(config::load_definition(&path)?);
    let initial_arguments = parse_arguments(&args)?;

    let registry = demo::registry_for(&definition, Duration::from_millis(worker_delay_ms));
    let engine = WorkflowEngine::new(Arc::new(registry));

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling run");
            signal_token.cancel();
        }
    });

    let report = engine
        .run_workflow_with_cancel(&definition, initial_arguments, token)
        .await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.is_completed() {
        std::process::exit(1);
    }
    Ok(())
}

/// Parses repeated `--arg KEY=VALUE` pairs into initial context arguments.
fn parse_arguments(args: &[String]) -> anyhow::Result<BTreeMap<ContextKey, Value>> {
    args.iter()
        .map(|raw| {
            let (key, value) = raw
                .split_once('=')
                .with_context(|| format!("'--arg {raw}' is not of the form KEY=VALUE"))?;
            let key = ContextKey::new(key).context("argument key must not be empty")?;
            let value =
                serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_owned()));
            Ok((key, value))
        })
        .collect()
}
