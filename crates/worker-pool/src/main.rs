//! Mediaflow Worker binary.
//!
//! Loads workflow definitions and runs workflows against artifact files.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mediaflow_engine::definition::parse_definition_file;
use mediaflow_engine::model::WorkflowState;
use mediaflow_worker::{load_artifact, parse_config_pair, Worker, WorkerConfig, WorkflowRequest};

#[derive(Parser)]
#[command(name = "mediaflow-worker")]
#[command(version, about = "Mediaflow workflow worker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Definitions directory (overrides WORKER_DEFINITIONS_DIR)
    #[arg(short, long, global = true)]
    definitions: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow for each artifact file and wait for them to settle
    ///
    /// Examples:
    ///     mediaflow-worker run publish recording.json
    ///     mediaflow-worker run publish a.json b.json -c publishToEngage=true
    Run {
        /// Workflow definition id
        workflow: String,

        /// Artifact JSON files
        #[arg(required = true)]
        artifacts: Vec<PathBuf>,

        /// Workflow configuration as key=value (repeatable)
        #[arg(short = 'c', long = "config")]
        config: Vec<String>,
    },

    /// List loaded workflow definitions
    ListDefinitions,

    /// Parse and validate definition files
    Validate {
        /// Definition YAML files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,mediaflow_engine=debug,mediaflow_worker=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mut config = WorkerConfig::from_env()?;
    if let Some(dir) = cli.definitions {
        config.definitions_dir = dir;
    }

    init_tracing(config.log_json);

    match cli.command {
        Commands::Validate { files } => validate(&files),
        Commands::ListDefinitions => {
            let worker = Worker::new(config)?;
            for definition in worker.definitions().list() {
                println!(
                    "{:<24} {:>3} operations  {}",
                    definition.id,
                    definition.operations.len(),
                    definition.title.as_deref().unwrap_or("")
                );
            }
            Ok(())
        }
        Commands::Run {
            workflow,
            artifacts,
            config: pairs,
        } => {
            let configuration = pairs
                .iter()
                .map(String::as_str)
                .map(parse_config_pair)
                .collect::<Result<BTreeMap<_, _>, _>>()?;
            let requests = artifacts
                .iter()
                .map(|path| -> Result<WorkflowRequest> {
                    Ok(WorkflowRequest::new(workflow.clone(), load_artifact(path)?)
                        .with_configuration(configuration.clone()))
                })
                .collect::<Result<Vec<_>>>()?;

            tracing::info!(
                worker_id = %config.worker_id,
                max_concurrent = config.max_concurrent_workflows,
                "Starting Mediaflow worker"
            );
            let worker = Worker::new(config)?;
            run(&worker, requests).await
        }
    }
}

async fn run(worker: &Worker, requests: Vec<WorkflowRequest>) -> Result<()> {
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown signal received");
    };

    let results = tokio::select! {
        results = worker.run_all(requests) => results,
        _ = shutdown => {
            worker.shutdown().await;
            tracing::info!("Worker stopped");
            return Ok(());
        }
    };

    let mut failed = 0;
    for result in results {
        match result {
            Ok(instance) => {
                println!("{}\t{}\t{}", instance.id, instance.artifact.id, instance.state());
                for message in instance.error_messages() {
                    println!("\t{}", message);
                }
                if matches!(instance.state(), WorkflowState::Failed | WorkflowState::Stopped) {
                    failed += 1;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Workflow did not run");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} workflow(s) did not succeed", failed);
    }
    Ok(())
}

fn validate(files: &[PathBuf]) -> Result<()> {
    for file in files {
        let definition = parse_definition_file(file)
            .with_context(|| format!("Invalid definition {}", file.display()))?;
        println!(
            "{}: ok ({}, {} operations)",
            file.display(),
            definition.id,
            definition.operations.len()
        );
    }
    Ok(())
}
