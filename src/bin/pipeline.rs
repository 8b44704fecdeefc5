//! # Pipeline CLI
//!
//! Runs the long-lived pipeline processes (tracker, stage workers, workflow
//! advancer) and offers one-shot commands for publishing events and
//! querying task status.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::info;

use pipeline_core::config::{ConfigLoader, PipelineConfig};
use pipeline_core::constants::EVENT_CATALOG;
use pipeline_core::database::DatabaseConnection;
use pipeline_core::logging::init_structured_logging;
use pipeline_core::messaging::{task_data, ConnectionManager, EventPublisher};
use pipeline_core::orchestration::{build_status_report, PipelineSystem};
use pipeline_core::stages::{PassthroughProcessor, StageWorker, WorkflowAdvancer};
use pipeline_core::store::{PgTaskStore, TaskStateStore};
use pipeline_core::workflow::WorkflowStep;

#[derive(Parser, Debug)]
#[command(name = "pipeline")]
#[command(about = "Media pipeline orchestration processes and tools")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file (default: PIPELINE_CONFIG_PATH or config/pipeline.toml)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the task tracker until Ctrl-C
    Tracker,

    /// Run a passthrough stage worker for one step
    Stage {
        /// Step name, e.g. video_download
        #[arg(value_name = "STEP")]
        step: WorkflowStep,
    },

    /// Run the workflow chain worker
    Advancer,

    /// Publish one event
    Publish {
        /// Event type, used as routing key
        #[arg(value_name = "EVENT_TYPE")]
        event_type: String,
        #[arg(long)]
        task_id: String,
        #[arg(long)]
        user_id: String,
        /// Extra payload fields as a JSON object
        #[arg(long)]
        data: Option<String>,
    },

    /// Print a task's status as JSON
    Status {
        #[arg(value_name = "TASK_ID")]
        task_id: String,
    },

    /// List the event catalog
    Events,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Events = cli.command {
        for (event_type, description) in EVENT_CATALOG {
            println!("{event_type:<40} {description}");
        }
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Tracker => {
            init_structured_logging("task-tracker");
            run_tracker(config).await
        }
        Commands::Stage { step } => {
            init_structured_logging(&format!("{}-worker", step.as_str()));
            run_stage(config, step).await
        }
        Commands::Advancer => {
            init_structured_logging("workflow-advancer");
            run_advancer(config).await
        }
        Commands::Publish {
            event_type,
            task_id,
            user_id,
            data,
        } => {
            init_structured_logging("pipeline-cli");
            publish(config, &event_type, &task_id, &user_id, data.as_deref()).await
        }
        Commands::Status { task_id } => {
            init_structured_logging("pipeline-cli");
            print_status(config, &task_id).await
        }
        Commands::Events => Ok(()),
    }
}

fn load_config(path: Option<&str>) -> Result<PipelineConfig> {
    let loader = match path {
        Some(path) => ConfigLoader::from_env().with_file(path),
        None => ConfigLoader::from_env(),
    };
    loader.build().context("failed to load configuration")
}

async fn run_tracker(config: PipelineConfig) -> Result<()> {
    let system = PipelineSystem::bootstrap(config)
        .await
        .context("failed to bootstrap pipeline system")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!(status = ?system.status(), "Ctrl-C received");
    system.shutdown().await;
    Ok(())
}

/// Run a worker loop until Ctrl-C; a lost connection ends the process
async fn run_until_ctrl_c<F, Fut>(run: F) -> Result<()>
where
    F: FnOnce(broadcast::Receiver<()>) -> Fut,
    Fut: std::future::Future<Output = Result<(), pipeline_core::MessagingError>>,
{
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut worker = std::pin::pin!(run(shutdown_rx));

    let finished = tokio::select! {
        result = &mut worker => Some(result),
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            None
        }
    };
    match finished {
        Some(result) => result.context("consumer loop failed"),
        None => {
            info!("Ctrl-C received, stopping consumer");
            let _ = shutdown_tx.send(());
            worker.await.context("consumer loop failed during shutdown")
        }
    }
}

async fn run_stage(config: PipelineConfig, step: WorkflowStep) -> Result<()> {
    config.validate()?;
    let registry = config.workflow.registry()?;
    let connections = Arc::new(ConnectionManager::from_config(&config.broker));
    let worker = StageWorker::new(step, PassthroughProcessor, &registry, connections, &config)?;
    run_until_ctrl_c(|shutdown| worker.run(shutdown)).await
}

async fn run_advancer(config: PipelineConfig) -> Result<()> {
    config.validate()?;
    let registry = Arc::new(config.workflow.registry()?);
    let connections = Arc::new(ConnectionManager::from_config(&config.broker));
    let advancer = WorkflowAdvancer::new(registry, connections, &config)?;
    run_until_ctrl_c(|shutdown| advancer.run(shutdown)).await
}

async fn publish(
    config: PipelineConfig,
    event_type: &str,
    task_id: &str,
    user_id: &str,
    extra: Option<&str>,
) -> Result<()> {
    let mut data = task_data(task_id, user_id);
    if let Some(extra) = extra {
        let Value::Object(fields) = serde_json::from_str::<Value>(extra)
            .context("--data is not valid JSON")?
        else {
            anyhow::bail!("--data must be a JSON object");
        };
        for (key, value) in fields {
            data.entry(key).or_insert(value);
        }
    }

    let connections = Arc::new(ConnectionManager::from_config(&config.broker));
    let publisher = EventPublisher::new(connections, &config.broker.exchange);
    let envelope = publisher.publish(event_type, data).await?;
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}

async fn print_status(config: PipelineConfig, task_id: &str) -> Result<()> {
    let registry = config.workflow.registry()?;
    let database = DatabaseConnection::connect(&config.database).await?;
    let store = PgTaskStore::new(database.pool().clone());

    let task = store.find_task(task_id).await?;
    let result = match task {
        Some(task) => {
            let steps = store.task_steps(task_id).await?;
            let report = build_status_report(&registry, &task, &steps);
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        None => Err(anyhow::anyhow!("task {task_id} not found")),
    };
    database.close().await;
    result
}
