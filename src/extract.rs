//! Batched, parallel encoding of game records.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::config::IngestConfig;
use crate::features::{encode_game, EncodedRecord};
use crate::game::parse_game;
use crate::IngestError;

/// Counters of one ingestion run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub games: u64,
    pub positions: u64,
}

/// Encode every main-line position of one record. Records without a game
/// produce nothing.
pub fn process_record(pgn: &str) -> Vec<EncodedRecord> {
    parse_game(pgn)
        .map(|game| encode_game(&game))
        .unwrap_or_default()
}

/// Fans record batches out over a dedicated worker pool.
pub struct Extractor {
    pool: ThreadPool,
    batch_size: usize,
}

impl Extractor {
    pub fn new(config: &IngestConfig) -> Result<Self, IngestError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.threads())
            .build()?;
        Ok(Extractor {
            pool,
            batch_size: config.batch_size.max(1),
        })
    }

    /// Encode a batch in parallel. Each game's positions stay in ply order.
    pub fn encode_batch(&self, batch: &[String]) -> Vec<EncodedRecord> {
        let per_game: Vec<Vec<EncodedRecord>> = self.pool.install(|| {
            batch
                .par_iter()
                .map(|pgn| process_record(pgn))
                .collect()
        });
        per_game.into_iter().flatten().collect()
    }

    /// Drain `records` batch by batch, handing every encoded batch to `sink`
    /// before reading the next one.
    pub fn run<I, F, E>(&self, records: I, mut sink: F) -> Result<IngestStats, IngestError>
    where
        I: IntoIterator<Item = std::io::Result<String>>,
        F: FnMut(&[EncodedRecord]) -> Result<(), E>,
        IngestError: From<E>,
    {
        let mut stats = IngestStats::default();
        let mut batch = Vec::with_capacity(self.batch_size);

        for record in records {
            batch.push(record?);
            if batch.len() >= self.batch_size {
                stats.positions += self.drain(&batch, &mut sink)?;
                stats.games += batch.len() as u64;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            stats.positions += self.drain(&batch, &mut sink)?;
            stats.games += batch.len() as u64;
        }
        Ok(stats)
    }

    fn drain<F, E>(&self, batch: &[String], sink: &mut F) -> Result<u64, IngestError>
    where
        F: FnMut(&[EncodedRecord]) -> Result<(), E>,
        IngestError: From<E>,
    {
        let encoded = self.encode_batch(batch);
        sink(&encoded)?;
        Ok(encoded.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    fn config(batch_size: usize, num_threads: usize) -> IngestConfig {
        IngestConfig {
            batch_size,
            num_threads,
            ..IngestConfig::default()
        }
    }

    #[test]
    fn test_process_record_counts_positions() {
        assert_eq!(process_record("1. e4 e5 2. Nf3 1-0").len(), 4);
        assert!(process_record("").is_empty());
    }

    #[test]
    fn test_encode_batch_keeps_ply_order() {
        let extractor = Extractor::new(&config(8, 4)).unwrap();
        let batch: Vec<String> = (0..16).map(|_| "1. e4 e5 2. Nf3 Nc6 1-0".to_string()).collect();
        let encoded = extractor.encode_batch(&batch);
        assert_eq!(encoded.len(), 16 * 5);
        for game in encoded.chunks(5) {
            assert_eq!(game, process_record(&batch[0]).as_slice());
        }
    }

    #[test]
    fn test_run_drains_full_and_partial_batches() {
        let extractor = Extractor::new(&config(2, 2)).unwrap();
        let records = vec![
            Ok("1. e4 1-0".to_string()),
            Ok("1. d4 d5 0-1".to_string()),
            Ok("1. c4 *".to_string()),
        ];

        let mut sizes = Vec::new();
        let stats = extractor
            .run(records, |batch| {
                sizes.push(batch.len());
                Ok::<(), StoreError>(())
            })
            .unwrap();

        assert_eq!(sizes, vec![2 + 3, 2]);
        assert_eq!(stats, IngestStats { games: 3, positions: 7 });
    }

    #[test]
    fn test_run_stops_on_sink_error() {
        let extractor = Extractor::new(&config(1, 1)).unwrap();
        let records = vec![Ok("1. e4 1-0".to_string()), Ok("1. d4 0-1".to_string())];

        let mut calls = 0;
        let result = extractor.run(records, |_| {
            calls += 1;
            Err(StoreError::UnknownArray("x".into()))
        });
        assert!(matches!(result, Err(IngestError::Store(_))));
        assert_eq!(calls, 1);
    }
}
