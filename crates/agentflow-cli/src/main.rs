//! `agentflow` command-line driver.

mod config;
mod logs;

use agentflow_agent::{ClaudeCliExecutor, RoleRegistry};
use agentflow_core::{RunStatus, TaskStatus, WorkerRole, WorkflowRun};
use agentflow_orchestrator::{LoggingSink, RunReport, TemplateCatalogue, WorkflowEngine};
use agentflow_store::{SqliteStore, WorkflowStore};
use clap::{Parser, Subcommand};
use config::{AppConfig, LogFormat};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "agentflow", about = "agentflow: multi-stage agent workflow orchestrator")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "agentflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List workflow templates
    Workflows,
    /// List worker roles
    Roles,
    /// Create a run and execute it
    Start {
        /// Workflow type, e.g. full_project
        workflow_type: String,
        /// What the run should achieve
        description: String,
    },
    /// List recent runs
    Runs {
        /// Only runs in this status
        #[arg(long)]
        status: Option<RunStatus>,
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Show a run's stages and totals (latest run by default)
    Status { run: Option<Uuid> },
    /// Show a run's tasks
    Tasks { run: Uuid },
    /// Show a run's token ledger
    Usage { run: Uuid },
    /// Show one task's detail and attempt history
    Logs {
        task: Uuid,
        /// Include the context document the worker received
        #[arg(short, long)]
        context: bool,
        /// Include the worker's summary, decisions and raw output
        #[arg(short, long)]
        output: bool,
    },
    /// Stop dispatching new tasks for a run
    Pause { run: Uuid },
    /// Resume a paused or failed run
    Resume { run: Uuid },
    /// Cancel a run
    Cancel { run: Uuid },
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut config = AppConfig::load(&cli.config).await?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    init_logging(config.log_format);

    let mut roles = RoleRegistry::builtin();
    if let Some(dir) = &config.executor.prompts_dir {
        roles = roles.with_prompts_dir(dir);
    }
    let roles = Arc::new(roles);

    match cli.command {
        Commands::Workflows => {
            print_workflows(&TemplateCatalogue::builtin());
            return Ok(());
        }
        Commands::Roles => {
            println!("Worker roles:");
            for profile in roles.list() {
                println!(
                    "  {:<16} {:<28} {:<7} {}",
                    profile.role.as_str(),
                    profile.name,
                    profile.tier.alias(),
                    profile.description
                );
            }
            return Ok(());
        }
        _ => {}
    }

    let db_path = config.database_path();
    let store: Arc<dyn WorkflowStore> = Arc::new(SqliteStore::open(&db_path).await?);
    info!(db = %db_path.display(), "Store opened");

    let executor = Arc::new(ClaudeCliExecutor::new(config.executor.clone(), roles.clone()));
    let engine = WorkflowEngine::new(
        store.clone(),
        executor,
        roles,
        TemplateCatalogue::builtin(),
        config.costs,
        config.orchestrator.clone(),
    );
    engine.on_event(Arc::new(LoggingSink));

    match cli.command {
        Commands::Workflows | Commands::Roles => {}
        Commands::Start {
            workflow_type,
            description,
        } => {
            let run = engine.create_run(&workflow_type, &description).await?;
            println!("Run {} created ({workflow_type})", run.id);
            let run = engine.execute(run.id).await?;
            print_report(&engine.report(run.id).await?);
        }
        Commands::Logs {
            task,
            context,
            output,
        } => {
            let options = logs::LogOptions { context, output };
            print!("{}", logs::task_log(store.as_ref(), task, options).await?);
        }
        Commands::Runs { status, limit } => {
            let runs = store.list_runs(status, limit).await?;
            if runs.is_empty() {
                println!("No runs.");
            }
            for run in &runs {
                print_run_line(run);
            }
        }
        Commands::Status { run } => {
            let run_id = match run {
                Some(id) => id,
                None => match engine.latest_run().await? {
                    Some(run) => run.id,
                    None => {
                        println!("No runs yet. Start one with `agentflow start <type> <description>`.");
                        return Ok(());
                    }
                },
            };
            print_report(&engine.report(run_id).await?);
        }
        Commands::Tasks { run } => {
            let report = engine.report(run).await?;
            for task in &report.tasks {
                let stage = report
                    .stages
                    .iter()
                    .find(|s| Some(s.id) == task.stage_id)
                    .map_or("-", |s| s.name.as_str());
                println!(
                    "{}  {:<10} {:<14} {:<16} {:>8} tok  {}",
                    task.id,
                    task.status.as_str(),
                    stage,
                    task.role.as_str(),
                    task.tokens_used,
                    task.title
                );
                if let Some(error) = &task.error_message {
                    println!("    error: {error}");
                }
            }
        }
        Commands::Usage { run } => {
            for record in store.list_usage(run).await? {
                println!(
                    "{}  {:<16} {:<24} in {:>8}  out {:>8}  ${:.4}",
                    record.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                    record.role.as_str(),
                    record.model,
                    record.input_tokens,
                    record.output_tokens,
                    record.cost_usd
                );
            }
            let totals = engine.budget().usage(run).await?;
            println!(
                "Total: {} tokens (in {}, out {}), ${:.4}",
                totals.total_tokens(),
                totals.input_tokens,
                totals.output_tokens,
                totals.cost_usd
            );
        }
        Commands::Pause { run } => {
            engine.pause(run).await?;
            println!("Run {run} paused");
        }
        Commands::Resume { run } => {
            let run = engine.resume(run).await?;
            print_report(&engine.report(run.id).await?);
        }
        Commands::Cancel { run } => {
            engine.cancel(run).await?;
            println!("Run {run} cancelled");
        }
    }

    Ok(())
}

fn print_workflows(templates: &TemplateCatalogue) {
    println!("Workflows:");
    for template in templates.list() {
        println!("  {:<16} {}", template.id, template.description);
        for stage in &template.stages {
            let roles: Vec<&str> = stage.roles.iter().map(WorkerRole::as_str).collect();
            let mode = if stage.parallel { " (parallel)" } else { "" };
            println!("    {}: {}{mode}", stage.name, roles.join(", "));
        }
    }
}

fn print_run_line(run: &WorkflowRun) {
    println!(
        "{}  {:<10} {:<15} {:>8} tok  ${:.4}  {}",
        run.id,
        run.status.as_str(),
        run.workflow_type,
        run.total_tokens,
        run.estimated_cost_usd,
        run.created_at.format("%Y-%m-%d %H:%M")
    );
}

fn print_report(report: &RunReport) {
    let run = &report.run;
    println!("Run:         {}", run.id);
    println!("Workflow:    {}", run.workflow_type);
    println!("Description: {}", run.description);
    println!("Status:      {}", run.status);
    if let Some(error) = &run.error_message {
        println!("Error:       {error}");
    }
    println!("Stages:");
    for stage in &report.stages {
        let tasks: Vec<_> = report
            .tasks
            .iter()
            .filter(|t| t.stage_id == Some(stage.id))
            .collect();
        let done = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        println!(
            "  {:>2}. {:<16} {:<10} {done}/{} tasks",
            stage.order + 1,
            stage.name,
            stage.status.as_str(),
            tasks.len()
        );
    }
    println!(
        "Tokens:      {} (in {}, out {})",
        report.usage.total_tokens(),
        report.usage.input_tokens,
        report.usage.output_tokens
    );
    println!("Cost:        ${:.4}", report.usage.cost_usd);
}
