use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use pgn_position_store::{ingest_path, IngestConfig, Store};

/// Append the positions of PGN files to a position store.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// PGN file, or a directory whose files are all ingested
    #[arg(short, long)]
    input: PathBuf,

    /// Store directory; created when it does not exist
    #[arg(short, long)]
    output: PathBuf,

    /// Ingest files that are already listed in the store manifest
    #[arg(long, aliases = ["ignore-non-unique", "ignore_non_unique"])]
    allow_duplicates: bool,

    /// Keep games whose termination is "Abandoned"
    #[arg(long)]
    keep_abandoned: bool,

    /// Games encoded per batch
    #[arg(long, default_value_t = IngestConfig::default().batch_size)]
    batch_size: usize,

    /// Worker threads (0 = one per CPU)
    #[arg(long, default_value_t = IngestConfig::default().num_threads)]
    threads: usize,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = IngestConfig {
        batch_size: cli.batch_size,
        num_threads: cli.threads,
        ignore_abandoned: !cli.keep_abandoned,
        allow_duplicates: cli.allow_duplicates,
    };

    let mut store = Store::open_or_create(&cli.output)
        .with_context(|| format!("failed to open store {}", cli.output.display()))?;
    let reports = ingest_path(&cli.input, &mut store, &config)
        .with_context(|| format!("failed to ingest {}", cli.input.display()))?;

    let skipped = reports.iter().filter(|r| r.result.is_err()).count();
    info!(
        "done: {} file(s) ingested, {} skipped, {} holds {} positions",
        reports.len() - skipped,
        skipped,
        store.path().display(),
        store.len()
    );
    store.close().context("failed to close store")?;
    Ok(())
}
