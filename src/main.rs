use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod cli;

use cli::commands::Commands;
use cli::Cli;

use trellis::config::Config;
use trellis::dataflow::DataFlow;
use trellis::domain::{Job, JobFilter, JobStatus};
use trellis::engine::WorkflowEngine;
use trellis::feedback::RuleBasedPolicy;
use trellis::jobs::JobRegistry;
use trellis::monitor::PerformanceMonitor;
use trellis::provider::{HttpProvider, HttpProviderConfig, ProviderRegistry};
use trellis::realtime::UpdateHub;
use trellis::storage::JsonlStorage;

struct App {
    registry: Arc<JobRegistry<JsonlStorage>>,
    engine: WorkflowEngine<JsonlStorage, RuleBasedPolicy<JsonlStorage>>,
}

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("trellis")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("trellis.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn build_app(config: &Config) -> Result<App> {
    let storage = Arc::new(JsonlStorage::new(&config.storage.data_dir)?);
    let hub = Arc::new(UpdateHub::new(config.realtime.realtime_config()));

    let registry = Arc::new(JobRegistry::new(
        Arc::clone(&storage),
        hub,
        config.topology.plan(),
        config.jobs.registry_config(),
    ));

    let mut providers = ProviderRegistry::new();
    for (name, endpoint) in &config.providers {
        let provider = HttpProvider::new(HttpProviderConfig {
            endpoint: endpoint.endpoint.clone(),
            timeout: Duration::from_millis(endpoint.timeout_ms),
        })
        .map_err(|e| eyre::eyre!("Failed to build provider '{}': {}", name, e))?;
        providers.register(name.clone(), Arc::new(provider));
    }

    let dataflow = Arc::new(DataFlow::with_mappings(config.mappings.clone()));
    let monitor = Arc::new(PerformanceMonitor::with_storage(
        config.monitor.monitor_config(),
        storage,
    ));
    let policy = Arc::new(RuleBasedPolicy::new(
        config.feedback.rules.clone(),
        Arc::clone(&monitor),
    ));

    let engine = WorkflowEngine::new(
        Arc::clone(&registry),
        Arc::new(providers),
        dataflow,
        policy,
        monitor,
        config.engine.engine_config(),
    );

    Ok(App { registry, engine })
}

fn status_str(status: JobStatus) -> String {
    serde_json::to_value(status)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn print_job_line(job: &Job) {
    let status = status_str(job.status);
    let colored_status = match job.status {
        JobStatus::Succeeded => status.green(),
        JobStatus::Failed => status.red(),
        JobStatus::Cancelled => status.yellow(),
        _ => status.cyan(),
    };
    println!(
        "{}  {}  stage {}/{}",
        job.id, colored_status, job.current_stage, job.plan.len()
    );
}

async fn handle_run(app: &App, input: &str, follow: bool) -> Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(input).context("Input must be a JSON object")?;

    let job = app.registry.create_job(payload)?;
    info!("Submitted job {}", job.id);
    println!("{} {}", "Submitted:".green(), job.id);

    let printer = if follow {
        let (handle, mut receiver) = app.registry.hub().subscribe(&job.id);
        Some((
            handle,
            tokio::spawn(async move {
                while let Some(event) = receiver.recv().await {
                    let detail = event.summary.as_deref().unwrap_or(&event.status).to_string();
                    match event.stage_index {
                        Some(stage) => {
                            println!("  {} stage {}: {}", event.kind.as_str().cyan(), stage, detail)
                        }
                        None => println!("  {} {}", event.kind.as_str().cyan(), detail),
                    }
                    if event.is_terminal() {
                        break;
                    }
                }
            }),
        ))
    } else {
        None
    };

    let driven = app.engine.drive(&job.id).await?;

    if let Some((handle, printer)) = printer {
        let _ = printer.await;
        app.registry.hub().unsubscribe(&handle);
    }

    match driven.status {
        JobStatus::Succeeded => {
            println!("{} {}", "Succeeded:".green(), driven.id);
            if let Some(result) = &driven.result {
                println!("{}", serde_json::to_string_pretty(result)?);
            }
        }
        JobStatus::Cancelled => {
            println!("{} {}", "Cancelled:".yellow(), driven.id);
        }
        _ => {
            println!("{} {}", "Failed:".red(), driven.id);
            if let Some(error) = &driven.last_error {
                println!("  {}: {}", error.code, error.reason);
            }
        }
    }

    Ok(())
}

fn handle_status(app: &App, id: &str, detailed: bool) -> Result<()> {
    let job = app.registry.get_job(id)?;
    print_job_line(&job);

    if let Some(error) = &job.last_error {
        println!("  error: {}: {}", error.code, error.reason);
    }
    println!("  budget left: {}", job.iteration_budget);

    if detailed {
        for record in &job.stages {
            let outcome = match record.error.as_ref() {
                Some(error) => format!("{}: {}", error.code, error.reason),
                None => "ok".to_string(),
            };
            println!(
                "  [{}] {} attempt {} via {} - {}",
                record.stage_index, record.layer, record.attempt, record.provider_ref, outcome
            );
        }
    } else if let Some(result) = &job.result {
        println!("{}", serde_json::to_string_pretty(result)?);
    }

    Ok(())
}

fn handle_list(app: &App, status: Option<&str>) -> Result<()> {
    let status = status
        .map(|s| {
            serde_json::from_value::<JobStatus>(serde_json::Value::String(s.to_string()))
                .map_err(|_| eyre::eyre!("Unknown status: {}", s))
        })
        .transpose()?;

    let jobs = app.registry.list_jobs(&JobFilter {
        status,
        ..Default::default()
    })?;

    if jobs.is_empty() {
        println!("{}", "No jobs found".yellow());
        return Ok(());
    }
    for job in &jobs {
        print_job_line(job);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    let app = build_app(&config).context("Failed to wire application")?;

    match &cli.command {
        Commands::Run { input, follow } => handle_run(&app, input, *follow).await?,
        Commands::Status { id, detailed } => handle_status(&app, id, *detailed)?,
        Commands::List { status } => handle_list(&app, status.as_deref())?,
        Commands::Cancel { id } => {
            app.registry.cancel_job(id)?;
            println!("{} {}", "Cancellation requested:".yellow(), id);
        }
        Commands::Gc => {
            let evicted = app.registry.collect_garbage()?;
            println!("Evicted {} job(s)", evicted);
        }
    }

    Ok(())
}
