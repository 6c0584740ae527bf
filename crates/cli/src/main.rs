//! stepkit CLI - validate and run task definitions.

mod run;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use stepkit_navigation::{CohortTrackingRule, TrackingRule};
use tracing::info;
use tracing_subscriber::EnvFilter;

use run::{load_task, run, RunConfig};

#[derive(Parser)]
#[command(name = "stepkit")]
#[command(about = "Research task navigation and archiving", long_about = None)]
struct Cli {
    /// Log navigation decisions
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a task definition
    Validate {
        /// Task definition file
        definition: PathBuf,
    },
    /// Run a task with scripted answers and archive the result
    Run {
        /// Run file
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    match cli.command {
        Commands::Validate { definition } => {
            let tracking_rules: Vec<Arc<dyn TrackingRule>> = vec![Arc::new(CohortTrackingRule::new(Vec::<String>::new()))];
            let task = load_task(&definition, &tracking_rules).await?;
            task.validate()?;

            println!("Task: {}", task.identifier);
            if let Some(schema) = &task.schema_info {
                println!(
                    "  Schema: {} v{}",
                    schema.schema_identifier.as_deref().unwrap_or("-"),
                    schema.schema_version
                );
            }
            println!("  Steps: {}", task.navigator.steps.len());
            for step in &task.navigator.steps {
                println!("    {} ({:?})", step.identifier, step.step_type);
            }
            for action in &task.async_actions {
                println!(
                    "  Recorder: {} [{} -> {}]",
                    action.identifier,
                    action.start_step_identifier.as_deref().unwrap_or("start"),
                    action.stop_step_identifier.as_deref().unwrap_or("end"),
                );
            }
            println!("OK");
        }
        Commands::Run { config } => {
            let config = RunConfig::load(&config).await?;
            let summary = run(&config).await?;

            println!("Task: {}", summary.result.identifier);
            println!("  Run: {}", summary.result.task_run_id);
            for step in &summary.steps {
                println!("    {step}");
            }
            match summary.reason {
                Some(reason) => println!("  Finished: {reason:?}"),
                None => println!("  Finished: no"),
            }
            info!(archives = summary.archives, output = %config.output.display(), "Run complete");
        }
    }

    Ok(())
}
