//! Builds a randomly indexable training dataset from PGN game collections.
//!
//! Every position reached on the main line of every game becomes one row of
//! a [`Store`]: a 15x8x8 board tensor, ten auxiliary features and a
//! win/draw/loss label, all expressed from the side to move.

use log::{info, warn};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod array_store;
pub mod board_serialization;
mod comment_parsing;
pub mod config;
pub mod extract;
pub mod features;
pub mod game;
pub mod segmenter;
pub mod store;

pub use board_serialization::{serialize_board, BoardTensor};
pub use config::IngestConfig;
pub use extract::{process_record, Extractor, IngestStats};
pub use features::{encode, encode_game, EncodedRecord, PlyNode};
pub use game::{parse_game, GameHeaders, GameOutcome, ParsedGame, PositionSnapshot};
pub use segmenter::RecordSplitter;
pub use store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Outcome of ingesting one file of a directory run.
#[derive(Debug)]
pub struct FileReport {
    pub path: PathBuf,
    pub result: Result<IngestStats, IngestError>,
}

/// Append every game of the PGN file at `path` to `store`.
///
/// The file is identified in the manifest by its path as given. It is
/// registered before any data is written; with `allow_duplicates` unset a
/// second ingestion fails with [`StoreError::DuplicateSource`] and writes
/// nothing.
pub fn ingest_file(
    path: &Path,
    store: &mut Store,
    extractor: &Extractor,
    config: &IngestConfig,
) -> Result<IngestStats, IngestError> {
    let source_id = path.display().to_string();
    let file = File::open(path)?;
    store.register_source(&source_id, config.allow_duplicates)?;

    let records = RecordSplitter::new(BufReader::new(file), config.ignore_abandoned);
    let stats = extractor.run(records, |batch| store.append_batch(batch))?;
    store.flush()?;

    info!(
        "ingested {}: {} games, {} positions (store size {})",
        source_id,
        stats.games,
        stats.positions,
        store.len()
    );
    Ok(stats)
}

/// Ingest a single file, or every regular file of a directory in name order.
///
/// A duplicate source only skips that file. Any other error ends the run.
pub fn ingest_path(
    input: &Path,
    store: &mut Store,
    config: &IngestConfig,
) -> Result<Vec<FileReport>, IngestError> {
    let extractor = Extractor::new(config)?;

    let paths = if input.is_dir() {
        let mut paths = Vec::new();
        for entry in fs::read_dir(input)? {
            let path = entry?.path();
            if path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        paths
    } else {
        vec![input.to_path_buf()]
    };

    let mut reports = Vec::with_capacity(paths.len());
    for path in paths {
        match ingest_file(&path, store, &extractor, config) {
            Err(IngestError::Store(StoreError::DuplicateSource(id))) => {
                warn!("skipping {}: already ingested", id);
                reports.push(FileReport {
                    path,
                    result: Err(IngestError::Store(StoreError::DuplicateSource(id))),
                });
            }
            Err(err) => return Err(err),
            Ok(stats) => reports.push(FileReport {
                path,
                result: Ok(stats),
            }),
        }
    }
    Ok(reports)
}
