mod review;

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use codemend_core::bootstrap::{self, Embedder};
use codemend_core::config::{Config, IndexBackend, resolve_config_path};
use codemend_core::pipeline::{QueryOutcome, QueryProcessor};
use codemend_index::indexer::{index_dir, index_exists};
use codemend_index::{AnyChunkStore, IndexReport};
use codemend_llm::any::AnyProvider;
use codemend_patch::{LlmGenerator, PatchState};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::review::TerminalReview;

type Processor = QueryProcessor<AnyChunkStore, Embedder, LlmGenerator<AnyProvider>>;

/// Modify a codebase with natural-language requests.
///
/// Source files are split into AST chunks and indexed by embedding; a query
/// retrieves the closest chunks, asks the model for line-range edits and
/// applies them after review.
#[derive(Parser)]
#[command(name = "codemend", version)]
struct Cli {
    /// Configuration file (TOML). Falls back to `CODEMEND_CONFIG`, then
    /// `config/default.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Project root to index and modify.
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Index the project, skipping chunks that are already stored.
    Index {
        /// Delete the existing index first.
        #[arg(long)]
        force: bool,
    },
    /// Run a single modification request.
    Query {
        text: String,
        /// Apply proposals without asking.
        #[arg(long)]
        yes: bool,
    },
    /// Interactive loop (default).
    Repl {
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let cli = Cli::parse();
    let config = Config::load(&resolve_config_path(cli.config.as_deref()))?;
    let root = cli
        .project
        .canonicalize()
        .with_context(|| format!("project directory {} not found", cli.project.display()))?;

    match cli.command.unwrap_or(Command::Repl { yes: false }) {
        Command::Index { force } => run_index(&config, &root, force).await,
        Command::Query { text, yes } => {
            let mut processor = prepare(&config, &root).await?;
            let review = TerminalReview::new(yes || config.patch.auto_approve);
            let outcome = processor.process(&text, &review).await?;
            print_outcome(&outcome);
            Ok(())
        }
        Command::Repl { yes } => {
            let mut processor = prepare(&config, &root).await?;
            let review = TerminalReview::new(yes || config.patch.auto_approve);
            repl(&mut processor, &review).await
        }
    }
}

fn init_subscriber() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_index(config: &Config, root: &Path, force: bool) -> anyhow::Result<()> {
    if force && index_exists(root) {
        tokio::fs::remove_dir_all(index_dir(root))
            .await
            .context("failed to remove existing index")?;
        tracing::info!("existing index removed");
    }

    bootstrap::health_check(config).await;
    let indexer = bootstrap::build_indexer(config, root).await?;
    let report = indexer.index_project(root).await?;
    print_index_report(&report);
    Ok(())
}

/// Open the index, building it first when there is none, and wire the
/// query pipeline.
async fn prepare(config: &Config, root: &Path) -> anyhow::Result<Processor> {
    let provider = bootstrap::create_provider(config)?;
    bootstrap::health_check(config).await;

    let needs_index = config.index.backend == IndexBackend::Memory || !index_exists(root);
    let indexer = bootstrap::build_indexer(config, root).await?;
    if needs_index {
        println!("No index found, indexing {} ...", root.display());
        let report = indexer.index_project(root).await?;
        print_index_report(&report);
    }

    let generator = LlmGenerator::new(Arc::new(provider));
    Ok(QueryProcessor::new(
        root,
        Arc::new(indexer),
        generator,
        config.index.top_k,
    ))
}

async fn repl(processor: &mut Processor, review: &TerminalReview) -> anyhow::Result<()> {
    println!("codemend ready in {}", processor.root().display());
    println!("Describe a change, or type 'quit' to leave.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\nQuery: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if matches!(query.to_lowercase().as_str(), "quit" | "exit" | "q") {
            break;
        }
        if query.is_empty() {
            continue;
        }

        match processor.process(query, review).await {
            Ok(outcome) => print_outcome(&outcome),
            Err(e) => eprintln!("Error: {e:#}"),
        }
    }
    Ok(())
}

fn print_index_report(report: &IndexReport) {
    println!(
        "Indexed {} of {} files: {} new chunks, {} unchanged, {} removed ({} ms)",
        report.files_indexed,
        report.files_scanned,
        report.chunks_created,
        report.chunks_skipped,
        report.chunks_removed,
        report.duration_ms,
    );
    if report.files_skipped > 0 {
        println!("Skipped {} non-text files", report.files_skipped);
    }
    for error in &report.errors {
        println!("  error: {error}");
    }
}

fn print_outcome(outcome: &QueryOutcome) {
    match outcome {
        QueryOutcome::NothingRelevant => println!("No relevant code found."),
        QueryOutcome::GenerationFailed(e) => println!("Failed to generate changes: {e}"),
        QueryOutcome::NoChanges => println!("No changes suggested."),
        QueryOutcome::Cancelled => println!("Changes cancelled."),
        QueryOutcome::Applied(report) => {
            for o in &report.outcomes {
                let p = &o.proposal;
                let status = match o.state {
                    PatchState::Reindexed => "applied",
                    PatchState::Applied => "applied, index stale",
                    _ => "failed",
                };
                match (&o.applied_range, &o.error) {
                    (Some((start, end)), None) => {
                        println!("  {status}: {} lines {start}-{end}", p.file_path);
                    }
                    (_, Some(e)) => println!("  {status}: {}: {e}", p.file_path),
                    (None, None) => println!("  {status}: {}", p.file_path),
                }
            }
            println!(
                "{} of {} changes applied",
                report.applied(),
                report.outcomes.len()
            );
        }
    }
}
