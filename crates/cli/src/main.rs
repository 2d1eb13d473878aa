//! CLI tool for extracting therapy-session transcripts into a fine-tuning dataset.
//!
//! `extract` parses raw documents into per-session collections, `build` turns
//! persisted collections into train/validation/test JSONL, and `run` does both.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use therapy_transcripts_core::{
    build_dataset, extract_all, persist_collections,
    pipeline::{COLLECTIONS_DIR, DATASET_DIR, RUN_REPORT_FILE},
    storage, Collection, Dataset, PipelineConfig, RunReport, Split, WhitespaceTokenizer,
};

/// Extract therapy transcripts and build a session-split instruction dataset.
#[derive(Parser, Debug)]
#[command(name = "therapy-transcripts")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML configuration file; flags below override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse raw documents into per-session collection files
    Extract(Overrides),
    /// Build split JSONL files from previously extracted collections
    Build(Overrides),
    /// Extract and build in one pass
    Run(Overrides),
}

#[derive(Args, Debug)]
struct Overrides {
    /// Directory containing raw transcript documents
    #[arg(long)]
    input_dir: Option<PathBuf>,

    /// Directory for collections, dataset and run report
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Sessions longer than this are split into overlapping chunks
    #[arg(long)]
    max_session_exchanges: Option<usize>,

    /// Fraction of each chunk shared with the next, in [0, 1)
    #[arg(long)]
    overlap_percentage: Option<f64>,

    /// Minimum words in an example's output
    #[arg(long)]
    min_exchange_length: Option<usize>,

    /// Maximum words in an example's output
    #[arg(long)]
    max_exchange_length: Option<usize>,

    /// Maximum approximate tokens per example
    #[arg(long)]
    max_length: Option<usize>,

    /// Context exchanges preceding each target
    #[arg(long)]
    context_exchanges: Option<usize>,

    /// Seed for the session split permutation
    #[arg(long)]
    seed: Option<u64>,

    /// Only emit examples whose target is a therapist turn
    #[arg(long)]
    therapist_targets_only: bool,
}

impl Overrides {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(dir) = &self.input_dir {
            config.input_data_dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(v) = self.max_session_exchanges {
            config.max_session_exchanges = v;
        }
        if let Some(v) = self.overlap_percentage {
            config.overlap_percentage = v;
        }
        if let Some(v) = self.min_exchange_length {
            config.min_exchange_length = v;
        }
        if let Some(v) = self.max_exchange_length {
            config.max_exchange_length = v;
        }
        if let Some(v) = self.max_length {
            config.max_length = v;
        }
        if let Some(v) = self.context_exchanges {
            config.context_exchanges = v;
        }
        if let Some(v) = self.seed {
            config.split.seed = v;
        }
        if self.therapist_targets_only {
            config.therapist_targets_only = true;
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>, overrides: &Overrides) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    let mut config = match path {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    overrides.apply(&mut config);
    config.validate()?;
    tracing::debug!(?config, "resolved configuration");
    Ok(config)
}

fn print_extraction_summary(report: &RunReport) {
    println!("\n[summary]");
    println!("  Documents processed: {}", report.documents_processed);
    println!("  Documents failed: {}", report.documents_failed);
    println!("  Sessions detected: {}", report.sessions_detected);
    println!("  Sessions extracted: {}", report.sessions_extracted);
    println!("  Sessions dropped (empty): {}", report.sessions_dropped_empty);
    println!("  Exchanges extracted: {}", report.exchanges_extracted);
    println!("  Blocks dropped (unattributed): {}", report.blocks_dropped_unattributed);
    for failure in &report.failures {
        match failure.offset {
            Some(offset) => println!("  Failed: {} at byte {}: {}", failure.path, offset, failure.reason),
            None => println!("  Failed: {}: {}", failure.path, failure.reason),
        }
    }
}

fn print_dataset_summary(dataset: &Dataset, dir: &Path) {
    let summary = dataset.summary();
    let stats = &dataset.manifest.example_stats;
    println!("\n[dataset]");
    println!("  Sessions: {}", summary.total_sessions);
    println!("  Exchanges: {}", summary.total_exchanges);
    println!("  Examples: {}", summary.total_examples);
    for split in Split::ALL {
        if let Some(s) = summary.splits.get(&split) {
            println!(
                "  {}: {} sessions, {} examples, {} tokens",
                split, s.total_sessions, s.total_examples, s.total_tokens
            );
        }
    }
    println!("  Windows dropped: {} of {}", stats.dropped(), stats.windows);
    println!("  Output: {:?}/{{train,validation,test}}.jsonl", dir);
    println!("  Manifest: {:?}", dir.join(storage::DATASET_MANIFEST_FILE));
}

fn extract(config: &PipelineConfig) -> Result<(Vec<Collection>, RunReport), Box<dyn std::error::Error>> {
    println!("Extracting transcripts from {:?}...", config.input_data_dir);
    let extraction = extract_all(config)?;
    let collections_dir = config.output_dir.join(COLLECTIONS_DIR);
    let catalog = persist_collections(&collections_dir, &extraction.collections)?;
    println!("Wrote {} collections, catalog at {:?}", extraction.collections.len(), catalog);
    Ok((extraction.collections, extraction.report))
}

fn build(
    config: &PipelineConfig,
    collections: &[Collection],
    report: &mut RunReport,
) -> Result<(), Box<dyn std::error::Error>> {
    let dataset_dir = config.output_dir.join(DATASET_DIR);
    println!("Building dataset into {:?}...", dataset_dir);
    let dataset = build_dataset(collections, config, &WhitespaceTokenizer, &dataset_dir)?;
    report.examples = Some(dataset.manifest.example_stats.clone());
    print_dataset_summary(&dataset, &dataset_dir);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let overrides = match &cli.command {
        Command::Extract(o) | Command::Build(o) | Command::Run(o) => o,
    };
    let config = load_config(cli.config.as_deref(), overrides)?;

    let report_path = config.output_dir.join(RUN_REPORT_FILE);
    let report = match cli.command {
        Command::Extract(_) => extract(&config)?.1,
        Command::Build(_) => {
            let collections = storage::load_collections(&config.output_dir.join(COLLECTIONS_DIR))?;
            // Keep the counts from the extract run that produced these collections.
            let mut report = RunReport::read_json(&report_path)?.unwrap_or_default();
            build(&config, &collections, &mut report)?;
            report
        }
        Command::Run(_) => {
            let (collections, mut report) = extract(&config)?;
            build(&config, &collections, &mut report)?;
            report
        }
    };

    if !matches!(cli.command, Command::Build(_)) {
        print_extraction_summary(&report);
    }
    report.write_json(&report_path)?;
    println!("  Report: {:?}", report_path);

    Ok(())
}
