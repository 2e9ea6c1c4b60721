//! databatch - Command line runner
//!
//! Runs one configured node over slots read from a JSON file.
//!
//! Usage:
//!   databatch run --config engine.toml --node NAME --input slots.json
//!   databatch validate --config engine.toml
//!
//! The input file holds a JSON array of slots, each with string payloads:
//! `[{"name": "Data", "rows": [{"data": "p1", "annotations": {"Sample": "A"}}]}]`

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use databatch::{
    config::{EngineConfig, FailurePolicy},
    engine::{ExecutionOutcome, NodeExecutor},
    scripting::{ExpressionEvaluator, RhaiEvaluator},
    slot::{DataSlot, SlotDocument},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "databatch")]
#[command(about = "Annotation-driven data batching for analysis nodes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one node over JSON-encoded input slots
    Run {
        /// Engine configuration (TOML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Name of the node to run
        #[arg(short, long)]
        node: String,

        /// JSON file with the input slots
        #[arg(short, long)]
        input: PathBuf,

        /// Write output slots here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip failing batches instead of stopping
        #[arg(long)]
        skip_failed: bool,
    },

    /// Check every node in a configuration
    Validate {
        /// Engine configuration (TOML or JSON)
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,databatch=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let evaluator: Arc<dyn ExpressionEvaluator> = Arc::new(RhaiEvaluator::new());

    match cli.command {
        Commands::Run {
            config,
            node,
            input,
            output,
            skip_failed,
        } => run(&config, &node, &input, output.as_deref(), skip_failed, evaluator),
        Commands::Validate { config } => {
            let engine_config = EngineConfig::load(&config)?;
            engine_config.validate(evaluator)?;
            println!("{}: {} nodes OK", config.display(), engine_config.nodes.len());
            Ok(())
        }
    }
}

fn run(
    config_path: &Path,
    node_name: &str,
    input: &Path,
    output: Option<&Path>,
    skip_failed: bool,
    evaluator: Arc<dyn ExpressionEvaluator>,
) -> Result<()> {
    let mut config = EngineConfig::load(config_path)?;
    if skip_failed {
        config.execution.failure_policy = FailurePolicy::SkipBatch;
    }
    let node = config.build_node(node_name, evaluator)?;

    let inputs = read_slots(input)?;
    tracing::info!("Running node '{}' over {} input slots", node_name, inputs.len());

    let report = NodeExecutor::new(config.execution.clone()).execute(&node, &inputs);
    for skipped in &report.skipped {
        tracing::warn!("Skipped batch {} {}: {}", skipped.index, skipped.key, skipped.error);
    }
    tracing::info!(
        "{} of {} batches completed, {} groups dropped",
        report.batches_completed,
        report.batches_total,
        report.dropped_groups
    );

    if let ExecutionOutcome::Errored(e) = &report.outcome {
        bail!("node '{}' failed: {}", node_name, e);
    }

    let documents: Vec<SlotDocument> = report.outputs.iter().map(SlotDocument::from_slot).collect();
    let json = serde_json::to_string_pretty(&documents).context("Failed to serialize output slots")?;
    match output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("Failed to write output: {}", path.display()))?,
        None => println!("{}", json),
    }
    Ok(())
}

fn read_slots(path: &Path) -> Result<Vec<DataSlot>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read input: {}", path.display()))?;
    let documents: Vec<SlotDocument> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse input: {}", path.display()))?;
    documents
        .into_iter()
        .map(|doc| doc.into_slot().map_err(anyhow::Error::from))
        .collect()
}
