//! shipcat - GitOps deploy orchestrator
//!
//! Usage:
//!   shipcat watch                      # Poll auto-deploy phases until Ctrl-C
//!   shipcat deploy <project> <phase>   # Deploy once
//!   shipcat check <project> <phase>    # Show current and desired tags
//!   shipcat ls                         # List projects and phases

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shipcat_core::context::PhaseReport;
use shipcat_core::prelude::*;

#[derive(Parser)]
#[command(name = "shipcat")]
#[command(about = "GitOps deploy orchestrator", long_about = None)]
struct Cli {
    /// Path to shipcat.toml (defaults to ~/.config/shipcat/shipcat.toml)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch auto-deploy phases and deploy new tags as they appear
    Watch,

    /// Deploy a project to one phase
    Deploy {
        /// Project id or alias
        project: String,
        /// Phase name or alias (stg, pro, prd)
        phase: String,
        /// Source branch the tag is looked up for (defaults to the project's default branch)
        #[arg(long, short, default_value = "")]
        branch: String,
        /// Deploy this tag instead of looking one up
        #[arg(long, short)]
        tag: Option<String>,
        /// Merge the pull request instead of leaving it open
        #[arg(long, short)]
        wait: bool,
        /// Name recorded as the requester
        #[arg(long, default_value = "cli")]
        requester: String,
        /// Hosting-service login the pull request is assigned to
        #[arg(long)]
        assignee: Option<String>,
        /// Hosting-service node id of the assignee, passed to the apply tool
        #[arg(long)]
        assignee_id: Option<String>,
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Compare the deployed tag of a phase with the newest available one
    Check {
        project: String,
        phase: String,
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// List configured projects
    #[command(alias = "list")]
    Ls {
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shipcat=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let store = match cli.config {
        Some(path) => ConfigStore::from_path(path),
        None => ConfigStore::from_default_location()?,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_cli(store, cli.command))
}

async fn run_cli(store: ConfigStore, command: Commands) -> Result<()> {
    if let Commands::Ls { format } = command {
        let catalog = ProjectCatalog::from_store(store);
        let snapshot = catalog.reload()?;
        return match format {
            OutputFormat::Table => {
                print_projects(&snapshot.projects);
                Ok(())
            }
            OutputFormat::Json => print_projects_json(&snapshot.projects),
        };
    }

    let context = tokio::task::spawn_blocking(move || AppContext::from_store(store)).await??;

    match command {
        Commands::Watch => run_watch(&context).await,
        Commands::Deploy {
            project,
            phase,
            branch,
            tag,
            wait,
            requester,
            assignee,
            assignee_id,
            format,
        } => {
            let mut options = DeployOptions::for_branch(branch);
            options.wait = wait;
            options.tag = tag;
            options.requester = Requester::new(requester);
            options.requester.github_login = assignee;
            options.requester.github_node_id = assignee_id;
            run_deploy(&context, &project, &phase, options, format).await
        }
        Commands::Check {
            project,
            phase,
            format,
        } => {
            let report = context.inspect(&project, &phase).await?;
            match format {
                OutputFormat::Table => print_report(&project, &phase, &report),
                OutputFormat::Json => print_report_json(&project, &phase, &report)?,
            }
            Ok(())
        }
        Commands::Ls { .. } => Ok(()),
    }
}

async fn run_watch(context: &AppContext) -> Result<()> {
    let watcher = Arc::new(context.watcher());

    let stopper = Arc::clone(&watcher);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Interrupt received, stopping watcher"),
            Err(err) => tracing::error!(error = %err, "Failed to listen for interrupt"),
        }
        stopper.shutdown();
    });

    watcher.run(context.config().watch.reload_interval()).await;
    Ok(())
}

async fn run_deploy(
    context: &AppContext,
    project: &str,
    phase: &str,
    options: DeployOptions,
    format: OutputFormat,
) -> Result<()> {
    let result = context.deploy(project, phase, options).await;
    let status = PullRequestOutcome::status_of(&result);

    match format {
        OutputFormat::Table => match &result {
            Ok(outcome) => print_outcome(project, phase, outcome),
            Err(err) => println!("{} -> {}: failed: {}", project, phase, err),
        },
        OutputFormat::Json => {
            let output = match &result {
                Ok(outcome) => serde_json::json!({
                    "project": project,
                    "phase": phase,
                    "status": status_label(outcome.status),
                    "branch": outcome.branch,
                    "pull_request": outcome.pull_request.as_ref().map(|pr| serde_json::json!({
                        "number": pr.number,
                        "url": pr.url,
                    })),
                }),
                Err(err) => serde_json::json!({
                    "project": project,
                    "phase": phase,
                    "status": status_label(status),
                    "error": err.to_string(),
                }),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    if status == DeployStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}

fn print_outcome(project: &str, phase: &str, outcome: &PullRequestOutcome) {
    println!("{} -> {}: {}", project, phase, status_label(outcome.status));
    if let Some(ref branch) = outcome.branch {
        println!("  Branch: {}", branch);
    }
    if let Some(ref pr) = outcome.pull_request {
        println!("  Pull request: #{} {}", pr.number, pr.url);
    }
}

fn print_report(project: &str, phase: &str, report: &PhaseReport) {
    println!("{} -> {}", project, phase);
    println!("  Current: {}", tag_or_error(&report.current));
    println!("  Desired: {}", tag_or_error(&report.desired));
    if let (Ok(current), Ok(desired)) = (&report.current, &report.desired) {
        if current == desired {
            println!("  Up to date");
        } else {
            println!("  Deploy pending");
        }
    }
}

fn print_report_json(project: &str, phase: &str, report: &PhaseReport) -> Result<()> {
    let output = serde_json::json!({
        "project": project,
        "phase": phase,
        "current": report.current.as_ref().ok(),
        "current_error": report.current.as_ref().err(),
        "desired": report.desired.as_ref().ok(),
        "desired_error": report.desired.as_ref().err(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn print_projects(projects: &[Project]) {
    if projects.is_empty() {
        println!("No projects configured.");
        return;
    }

    println!(
        "  {:<15} {:<12} {:<10} {:<6} {:<12} Path",
        "Project", "Phase", "Kind", "Auto", "Channel"
    );
    println!("  {}", "-".repeat(80));

    for project in projects {
        for phase in &project.phases {
            println!(
                "  {:<15} {:<12} {:<10} {:<6} {:<12} {}",
                truncate(&project.id, 15),
                phase.name,
                truncate(&phase.kind, 10),
                if phase.auto_deploy { "yes" } else { "no" },
                truncate(phase.notify_channel.as_deref().unwrap_or("-"), 12),
                phase.path
            );
        }
    }
}

fn print_projects_json(projects: &[Project]) -> Result<()> {
    let output = serde_json::json!({
        "schema_version": 1,
        "projects": projects.iter().map(|project| serde_json::json!({
            "id": project.id,
            "alias": project.alias,
            "default_branch": project.default_branch,
            "phases": project.phases.iter().map(|phase| serde_json::json!({
                "name": phase.name.as_str(),
                "kind": phase.kind,
                "path": phase.path,
                "auto_deploy": phase.auto_deploy,
            })).collect::<Vec<_>>(),
        })).collect::<Vec<_>>(),
    });

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

fn status_label(status: DeployStatus) -> &'static str {
    match status {
        DeployStatus::Success => "success",
        DeployStatus::AlreadyDeployed => "already deployed",
        DeployStatus::Failed => "failed",
    }
}

fn tag_or_error(value: &std::result::Result<String, String>) -> String {
    match value {
        Ok(tag) => tag.clone(),
        Err(err) => format!("unknown ({})", err),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    }
}
