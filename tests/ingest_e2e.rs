use std::fs;
use std::path::Path;

use pgn_position_store::{
    ingest_file, ingest_path, Extractor, IngestConfig, IngestError, Store, StoreError,
};

const WIN: [u16; 3] = [1, 0, 0];
const DRAW: [u16; 3] = [0, 1, 0];
const LOSS: [u16; 3] = [0, 0, 1];

const TWO_GAMES: &str = r#"[Event "Game A"]
[White "a"]
[Black "b"]
[Result "1-0"]
[WhiteElo "1500"]
[BlackElo "1400"]
[TimeControl "60+0"]

1. e4 { [%clk 0:01:00] } 1... e5 { [%clk 0:01:00] } 1-0

[Event "Game B"]
[White "c"]
[Black "d"]
[Result "1/2-1/2"]
[TimeControl "180+2"]

1. d4 { [%clk 0:03:00] } 1/2-1/2

"#;

fn config() -> IngestConfig {
    IngestConfig {
        num_threads: 2,
        ..IngestConfig::default()
    }
}

fn write_pgn(path: &Path, text: &str) {
    fs::write(path, text).unwrap();
}

#[test]
fn two_game_file_yields_one_record_per_position() {
    let dir = tempfile::tempdir().unwrap();
    let pgn = dir.path().join("two.pgn");
    write_pgn(&pgn, TWO_GAMES);

    let mut store = Store::open_or_create(&dir.path().join("db")).unwrap();
    let config = config();
    let extractor = Extractor::new(&config).unwrap();
    let stats = ingest_file(&pgn, &mut store, &extractor, &config).unwrap();

    assert_eq!(stats.games, 2);
    assert_eq!(stats.positions, 5);
    assert_eq!(store.len(), 5);

    let records = store.read_range(0, 5).unwrap();
    let labels: Vec<_> = records.iter().map(|r| r.label).collect();
    assert_eq!(labels, vec![WIN, LOSS, WIN, DRAW, DRAW]);

    // Game A, black to move after 1. e4: ratings swap, clocks come from the
    // move just played and the reply.
    let aux = records[1].aux;
    assert_eq!(aux[0], 1400.0 / 3000.0);
    assert_eq!(aux[1], 1500.0 / 3000.0);
    assert_eq!(aux[2], 60.0 / 600.0);
    assert_eq!(aux[3], 60.0 / 600.0);
    assert_eq!(records[2].aux[3], 15.0);

    // Game B has no ratings and a 2 second increment.
    assert_eq!(records[3].aux[0], -100.0 / 3000.0);
    assert_eq!(records[3].aux[9], 0.4);

    // Both games start from the initial position.
    assert_eq!(records[0].board, records[3].board);
}

#[test]
fn abandoned_games_are_not_ingested() {
    let dir = tempfile::tempdir().unwrap();
    let pgn = dir.path().join("abandoned.pgn");
    let abandoned = "[Event \"X\"]\n[Termination \"Abandoned\"]\n\n1. e4 e5 2. Nf3 *\n\n";
    write_pgn(&pgn, &format!("{abandoned}{TWO_GAMES}"));

    let mut store = Store::open_or_create(&dir.path().join("db")).unwrap();
    let config = config();
    let extractor = Extractor::new(&config).unwrap();
    let stats = ingest_file(&pgn, &mut store, &extractor, &config).unwrap();
    assert_eq!(stats.games, 2);
    assert_eq!(store.len(), 5);
}

#[test]
fn duplicate_ingestion_fails_and_leaves_size_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let pgn = dir.path().join("two.pgn");
    write_pgn(&pgn, TWO_GAMES);
    let db = dir.path().join("db");
    let config = config();
    let extractor = Extractor::new(&config).unwrap();

    let mut store = Store::open_or_create(&db).unwrap();
    ingest_file(&pgn, &mut store, &extractor, &config).unwrap();
    store.close().unwrap();

    let mut store = Store::open_or_create(&db).unwrap();
    let second = ingest_file(&pgn, &mut store, &extractor, &config);
    assert!(matches!(
        second,
        Err(IngestError::Store(StoreError::DuplicateSource(_)))
    ));
    assert_eq!(store.len(), 5);

    let forced = IngestConfig {
        allow_duplicates: true,
        ..config
    };
    ingest_file(&pgn, &mut store, &extractor, &forced).unwrap();
    assert_eq!(store.len(), 10);
    assert_eq!(store.read_range(0, 5).unwrap(), store.read_range(5, 5).unwrap());
}

#[test]
fn directory_run_skips_duplicates_and_continues() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("pgns");
    fs::create_dir(&input).unwrap();
    write_pgn(&input.join("a.pgn"), TWO_GAMES);
    // A movetext-only record still needs two blank lines to end.
    write_pgn(&input.join("b.pgn"), "1. e4 e5 2. Nf3 1-0\n\n\n");

    let db = dir.path().join("db");
    let config = config();

    let mut store = Store::open_or_create(&db).unwrap();
    let extractor = Extractor::new(&config).unwrap();
    ingest_file(&input.join("a.pgn"), &mut store, &extractor, &config).unwrap();
    assert_eq!(store.len(), 5);

    let reports = ingest_path(&input, &mut store, &config).unwrap();
    assert_eq!(reports.len(), 2);
    assert!(matches!(
        reports[0].result,
        Err(IngestError::Store(StoreError::DuplicateSource(_)))
    ));
    assert_eq!(reports[1].result.as_ref().unwrap().positions, 4);
    assert_eq!(store.len(), 9);
    assert_eq!(store.manifest().count(), 2);
}

#[test]
fn invalid_store_is_rejected_without_writes() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("db");
    fs::create_dir(&db).unwrap();
    fs::write(db.join("unrelated.txt"), "keep me").unwrap();

    assert!(matches!(
        Store::open_or_create(&db),
        Err(StoreError::InvalidStore(_))
    ));
    let entries: Vec<_> = fs::read_dir(&db).unwrap().collect();
    assert_eq!(entries.len(), 1);
}

#[test]
fn large_input_spans_several_batches_and_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let pgn = dir.path().join("many.pgn");
    let game = "[Result \"0-1\"]\n\n1. f3 e5 2. g4 Qh4# 0-1\n\n";
    write_pgn(&pgn, &game.repeat(300));

    let config = IngestConfig {
        batch_size: 64,
        num_threads: 4,
        ..IngestConfig::default()
    };
    let extractor = Extractor::new(&config).unwrap();
    let mut store = Store::open_or_create_with_chunk_rows(&dir.path().join("db"), 100).unwrap();
    let stats = ingest_file(&pgn, &mut store, &extractor, &config).unwrap();

    assert_eq!(stats.games, 300);
    assert_eq!(stats.positions, 1500);
    assert_eq!(store.len(), 1500);
    assert_eq!(store.capacity(), 1500);

    let records = store.read_range(0, 1500).unwrap();
    for game in records.chunks(5) {
        let labels: Vec<_> = game.iter().map(|r| r.label).collect();
        assert_eq!(labels, vec![LOSS, WIN, LOSS, WIN, LOSS]);
    }
}
