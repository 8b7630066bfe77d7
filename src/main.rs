use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use ransomware_kb::{
    BundleMode, Config, CsvDirectorySource, FileSystemStore, LocationFetcher, ObjectStore,
    RunOrchestrator, RunOutput, SqliteStore, TableSource,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// One JSON file per record version under the store directory
    Fs,
    /// A single SQLite database file inside the store directory
    Sqlite,
}

/// Build the ransomware knowledge base from a directory of CSV exports
#[derive(Debug, Parser)]
#[command(name = "ransomware-kb", version)]
struct Args {
    /// Directory holding one `<table>.csv` per sheet
    #[arg(long, default_value = "data")]
    dataset: PathBuf,

    /// Where records and the output bundle are kept
    #[arg(long, default_value = "stix2_objects")]
    store: PathBuf,

    #[arg(long, value_enum, default_value_t = Backend::Fs)]
    backend: Backend,

    /// JSON file overriding any part of the default configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// `delta` emits touched records only; `full` also emits unchanged ones
    #[arg(long)]
    bundle_mode: Option<BundleMode>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(mode) = args.bundle_mode {
        config = config.with_bundle_mode(mode);
    }

    println!("🧬 Ransomware KB v{}", ransomware_kb::VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let source = CsvDirectorySource::new(&args.dataset);
    let fetcher = LocationFetcher::new().context("Failed to build HTTP client")?;

    let output = match args.backend {
        Backend::Fs => {
            let mut store = FileSystemStore::open(&args.store)?;
            run(&config, &source, &fetcher, &mut store)?
        }
        Backend::Sqlite => {
            std::fs::create_dir_all(&args.store)
                .with_context(|| format!("Failed to create {:?}", args.store))?;
            let mut store = SqliteStore::open(args.store.join("ransomware-kb.db"))?;
            run(&config, &source, &fetcher, &mut store)?
        }
    };

    print_summary(&output);
    Ok(())
}

fn run(
    config: &Config,
    source: &CsvDirectorySource,
    fetcher: &LocationFetcher,
    store: &mut dyn ObjectStore,
) -> Result<RunOutput> {
    println!("\n📂 Reading {}", source.describe());
    println!("🗄️  Writing to {}", store.describe());

    RunOrchestrator::new(config, source, fetcher)
        .run(store)
        .context("Run aborted")
}

fn print_summary(output: &RunOutput) {
    let report = &output.report;

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for table in &report.tables {
        println!("✓ {}: {} rows ({} skipped)", table.table, table.rows, table.failed);
    }
    println!("✓ Inserted:      {}", report.inserted);
    println!("✓ Updated:       {}", report.updated);
    println!("✓ Unchanged:     {}", report.unchanged);
    println!("✓ Relationships: {}", report.relationships);

    if !report.diagnostics.is_empty() {
        println!("\n⚠️  {} diagnostics:", report.diagnostics.len());
        for diagnostic in &report.diagnostics {
            println!("   {}", diagnostic);
        }
    }

    println!(
        "\n🎉 Bundle with {} objects → {}",
        report.bundle_objects,
        report.bundle_location.as_deref().unwrap_or("-")
    );
}
