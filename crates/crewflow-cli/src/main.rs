//! crewflow - run a crew of agents from a TOML manifest
//!
//! ## Commands
//!
//! - `run`: execute a crew and write its markdown report
//! - `validate`: check a manifest and print the planned task graph

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use crewflow_core::fakes::EchoCapability;
use crewflow_core::{
    render_markdown, write_outcome_json, write_report, CancelHandle, CapabilityHandle,
    CrewManifest, FailureMode, PipelineStatus, ProcessModel, RunOutcome,
};
use crewflow_openai::{OpenAiCapability, OpenAiConfig};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "crewflow")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run crews of cooperating AI agents", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a crew and save its report
    Run(RunArgs),

    /// Check a crew manifest without running it
    Validate {
        /// Path to the crew manifest (TOML)
        #[arg(short, long)]
        crew: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Path to the crew manifest (TOML)
    #[arg(short, long, env = "CREWFLOW_CREW")]
    crew: PathBuf,

    /// Directory the markdown report is written to
    #[arg(short, long, default_value = "output")]
    output_dir: PathBuf,

    /// Set a manifest input: `name=value`, or `name=@file` to read it from a file
    #[arg(short, long = "input", value_name = "NAME=VALUE")]
    inputs: Vec<String>,

    /// Override the process model (sequential, parallel, hierarchical)
    #[arg(long)]
    process: Option<ProcessModel>,

    /// Override the failure mode (fail-fast, best-effort)
    #[arg(long)]
    failure_mode: Option<FailureMode>,

    /// Override the token budget ceiling
    #[arg(long)]
    budget: Option<u64>,

    /// Also write the full run outcome as JSON
    #[arg(long)]
    outcome_json: Option<PathBuf>,

    /// Answer every task locally instead of calling the model API
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    crewflow_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run(args) => {
            let capability = select_capability(args.dry_run, |key| std::env::var(key).ok())?;
            let outcome = cmd_run(&args, capability).await?;
            match outcome.status {
                PipelineStatus::Failed { .. } | PipelineStatus::Cancelled => {
                    bail!("crew finished with status {}", outcome.status)
                }
                _ => Ok(()),
            }
        }
        Commands::Validate { crew } => cmd_validate(&crew, cli.json),
    }
}

/// The backend every agent reasons through. A real run needs
/// `OPENAI_API_KEY`; a dry run never touches the network.
fn select_capability(
    dry_run: bool,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<CapabilityHandle> {
    if dry_run {
        info!("dry run: answering tasks locally");
        return Ok(Arc::new(EchoCapability));
    }
    let config = OpenAiConfig::from_lookup(lookup)
        .context("Set OPENAI_API_KEY in the environment or a .env file")?;
    let capability = OpenAiCapability::new(config).context("Failed to build model client")?;
    Ok(Arc::new(capability))
}

/// Split `name=value`; a value starting with `@` names a file to read.
fn parse_input(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once('=')
        .with_context(|| format!("input {raw:?} is not of the form name=value"))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("input {raw:?} has an empty name");
    }
    let value = match value.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file: {path}"))?,
        None => value.to_string(),
    };
    Ok((name.to_string(), value))
}

fn load_manifest(path: &Path) -> Result<CrewManifest> {
    CrewManifest::load(path).with_context(|| format!("Failed to load crew manifest: {:?}", path))
}

/// Run a crew and write `<output_dir>/<output_file>`.
async fn cmd_run(args: &RunArgs, capability: CapabilityHandle) -> Result<RunOutcome> {
    let mut manifest = load_manifest(&args.crew)?;
    for raw in &args.inputs {
        let (name, value) = parse_input(raw)?;
        manifest = manifest.with_input(name, value);
    }

    let mut settings = manifest
        .settings
        .clone()
        .with_env_overrides()
        .context("Invalid CREWFLOW_* environment override")?;
    if let Some(process) = args.process {
        settings.process = process;
    }
    if let Some(mode) = args.failure_mode {
        settings.failure_mode = mode;
    }
    if let Some(budget) = args.budget {
        settings.budget_ceiling = budget;
    }
    settings.validate().context("Invalid crew settings")?;
    manifest.settings = settings;

    let title = manifest.title().to_string();
    let file_name = manifest.output_file();
    let cancel = CancelHandle::new();
    let pipeline = manifest
        .into_builder(capability)
        .context("Failed to prepare crew")?
        .cancel_handle(cancel.clone())
        .build()
        .context("Invalid crew definition")?;

    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; letting in-flight tasks finish");
            cancel.cancel();
        }
    });

    println!(
        "Running crew '{}' ({} tasks, {})",
        pipeline.name(),
        pipeline.tasks().count(),
        pipeline.process()
    );
    let outcome = pipeline.run().await;
    ctrl_c.abort();

    match &outcome.final_output {
        Some(text) => println!("\n{text}\n"),
        None => println!("\nNo final output was produced.\n"),
    }
    println!("Status: {}", outcome.status);
    println!(
        "Tokens: {} consumed, {} remaining",
        outcome.tokens_consumed, outcome.remaining_budget
    );

    let markdown = render_markdown(&title, &outcome);
    let path = write_report(&args.output_dir, &file_name, &markdown)?;
    println!("Results saved to: {}", path.display());

    if let Some(json_path) = &args.outcome_json {
        write_outcome_json(json_path, &outcome)?;
        println!("Outcome written to: {}", json_path.display());
    }
    Ok(outcome)
}

/// Build the pipeline without running it and print what would run.
fn cmd_validate(crew: &Path, json: bool) -> Result<()> {
    let manifest = load_manifest(crew)?;
    let title = manifest.title().to_string();
    let pipeline = manifest
        .into_builder(Arc::new(EchoCapability))
        .context("Failed to prepare crew")?
        .build()
        .context("Invalid crew definition")?;

    if json {
        let tasks: Vec<_> = pipeline
            .tasks()
            .map(|t| {
                serde_json::json!({
                    "id": t.id.as_str(),
                    "agent": t.assigned_agent.as_str(),
                    "depends_on": t.depends_on.iter().map(|d| d.as_str()).collect::<Vec<_>>(),
                })
            })
            .collect();
        let summary = serde_json::json!({
            "name": pipeline.name(),
            "title": title,
            "process": pipeline.process().to_string(),
            "agents": pipeline.registry().len(),
            "tasks": tasks,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Crew '{}' is valid", pipeline.name());
    println!("  title:   {title}");
    println!("  process: {}", pipeline.process());
    println!("  agents:  {}", pipeline.registry().len());
    for task in pipeline.tasks() {
        println!("  - {} -> {}", task.id, task.assigned_agent);
    }
    Ok(())
}
