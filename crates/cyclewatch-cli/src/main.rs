//! cyclewatch CLI tool.
//!
//! Trains the cycle classifier on a ledger snapshot, ranks and explains
//! high-risk accounts, and inspects the evidence behind a single account.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use cyclewatch_compliance::narrative::OllamaClient;
use cyclewatch_compliance::pipeline::{CycleWatchPipeline, DetectionReport};
use cyclewatch_core::config::CycleWatchConfig;
use cyclewatch_core::context::PipelineContext;
use cyclewatch_core::observability::LogLevel;
use cyclewatch_graph::source::LedgerStore;
use cyclewatch_graph::subgraph::SubgraphExtractor;
use cyclewatch_ml::artifact::ModelArtifact;
use cyclewatch_ml::trainer::TrainingReport;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "cyclewatch")]
#[command(version, about = "Circular money-flow detection", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory for the model artifact and explanations
    #[arg(long, global = true)]
    artifact_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct LedgerArgs {
    /// Ledger snapshot (JSON)
    #[arg(short, long)]
    ledger: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the classifier and save the model artifact
    Train {
        #[command(flatten)]
        ledger: LedgerArgs,

        /// Number of training epochs
        #[arg(short, long)]
        epochs: Option<usize>,
    },

    /// Rank accounts with the saved model and write explanations
    Detect {
        #[command(flatten)]
        ledger: LedgerArgs,

        /// Number of accounts to explain
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// Train, then detect
    Run {
        #[command(flatten)]
        ledger: LedgerArgs,

        /// Number of training epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Number of accounts to explain
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// Show the evidence and attention around one account
    Inspect {
        #[command(flatten)]
        ledger: LedgerArgs,

        /// Account id
        #[arg(short, long)]
        account: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => CycleWatchConfig::from_file(path)?,
        None => CycleWatchConfig::default(),
    };
    config.apply_env()?;
    if let Some(dir) = &cli.artifact_dir {
        config.artifacts.dir = dir.clone();
    }
    match &cli.command {
        Commands::Train { epochs, .. } => apply_overrides(&mut config, *epochs, None),
        Commands::Detect { top_k, .. } => apply_overrides(&mut config, None, *top_k),
        Commands::Run { epochs, top_k, .. } => apply_overrides(&mut config, *epochs, *top_k),
        Commands::Inspect { .. } => {}
    }
    if cli.verbose {
        config.logging.level = LogLevel::Debug;
    }
    config.validate()?;
    config.logging.init()?;

    let ctx = PipelineContext::new(config);
    tracing::debug!(run_id = %ctx.run_id(), "configuration loaded");
    let narrator = Arc::new(OllamaClient::new(ctx.config().narrative.clone())?);
    let pipeline = CycleWatchPipeline::new(ctx, narrator);

    match cli.command {
        Commands::Train { ledger, .. } => {
            let store = load_ledger(&ledger)?;
            cmd_train(&pipeline, &store)?;
        }

        Commands::Detect { ledger, .. } => {
            let store = Arc::new(load_ledger(&ledger)?);
            cmd_detect(&pipeline, store).await?;
        }

        Commands::Run { ledger, .. } => {
            let store = Arc::new(load_ledger(&ledger)?);
            cmd_train(&pipeline, &*store)?;
            cmd_detect(&pipeline, store).await?;
        }

        Commands::Inspect { ledger, account } => {
            let store = load_ledger(&ledger)?;
            cmd_inspect(&pipeline, &store, &account)?;
        }
    }

    Ok(())
}

fn apply_overrides(config: &mut CycleWatchConfig, epochs: Option<usize>, top_k: Option<usize>) {
    if let Some(epochs) = epochs {
        config.training.epochs = epochs;
    }
    if let Some(top_k) = top_k {
        config.explain.top_k = top_k;
    }
}

fn load_ledger(args: &LedgerArgs) -> anyhow::Result<LedgerStore> {
    LedgerStore::from_json_file(&args.ledger)
        .with_context(|| format!("loading ledger {}", args.ledger.display()))
}

fn load_artifact(pipeline: &CycleWatchPipeline) -> anyhow::Result<ModelArtifact> {
    let path = pipeline.context().config().artifacts.model_path();
    ModelArtifact::load(&path)
        .with_context(|| format!("no usable model at {}; run `cyclewatch train` first", path.display()))
}

fn cmd_train(pipeline: &CycleWatchPipeline, store: &LedgerStore) -> anyhow::Result<()> {
    let (trained, _) = pipeline.train_and_save(store).context("training failed")?;

    print_report(&trained.report);
    println!(
        "\nModel saved to {} ({} accounts, {} parameters)",
        pipeline.context().config().artifacts.model_path().display(),
        trained.node_ids.len(),
        trained.classifier.num_parameters()
    );
    Ok(())
}

async fn cmd_detect(pipeline: &CycleWatchPipeline, store: Arc<LedgerStore>) -> anyhow::Result<()> {
    let artifact = load_artifact(pipeline)?;
    let report = pipeline
        .detect(store, &artifact)
        .await
        .context("detection failed")?;

    print_detection(&report);
    println!(
        "\nExplanations written to {}",
        pipeline.context().config().artifacts.explanations_path().display()
    );
    Ok(())
}

fn cmd_inspect(pipeline: &CycleWatchPipeline, store: &LedgerStore, account: &str) -> anyhow::Result<()> {
    let config = pipeline.context().config();
    let subgraph = SubgraphExtractor::from_config(&config.explain)
        .extract(store, account)
        .context("evidence extraction failed")?;

    match &subgraph {
        Some(subgraph) => {
            println!(
                "Evidence for {}: {} paths, {} nodes, {} relations\n",
                account,
                subgraph.paths().len(),
                subgraph.nodes().len(),
                subgraph.edges().len()
            );
            println!("{}", serde_json::to_string_pretty(&subgraph.to_tree())?);
        }
        None => println!("No relations found for {account}"),
    }

    // Attention needs a trained model; skip when none has been saved.
    let Some(artifact) = pipeline.load_model().context("loading model for attention")? else {
        return Ok(());
    };
    let Some(attention) = pipeline.attention(store, &artifact, account)? else {
        return Ok(());
    };

    println!("\nCycle probability: {:.4}", attention.probability);
    println!("Output-layer attention:");
    for n in &attention.neighbors {
        println!("  head {}  {:<20} {:.4}", n.head, n.neighbor_id, n.weight);
    }
    Ok(())
}

fn print_report(report: &TrainingReport) {
    println!("Epoch      Loss   Accuracy");
    println!("──────────────────────────");
    for m in &report.epochs {
        println!("{:>5} {:>9.4} {:>10.3}", m.epoch, m.loss, m.accuracy);
    }
}

fn print_detection(report: &DetectionReport) {
    println!("Rank  {:<20} {:>8}  Narrative", "Account", "Risk");
    println!("──────────────────────────────────────────────────────────────────");
    for (rank, record) in report.records.iter().enumerate() {
        let narrative: String = record.narrative.chars().take(60).collect();
        println!(
            "{:>4}  {:<20} {:>8.4}  {}",
            rank + 1,
            record.account_id,
            record.risk,
            narrative.replace('\n', " ")
        );
    }
    if report.fallbacks > 0 {
        println!("\n{} account(s) used the fallback narrative", report.fallbacks);
    }
}
