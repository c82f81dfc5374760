//! Position store: three parallel arrays plus a size counter and a manifest of
//! ingested sources.
//!
//! | array     | dtype | columns | content                     |
//! |-----------|-------|---------|-----------------------------|
//! | `x_board` | bool  | 960     | [`BoardTensor`] cells       |
//! | `x_misc`  | f32   | 10      | [`AuxFeatures`]             |
//! | `y`       | u16   | 3       | [`Label`]                   |
//!
//! The logical length lives in the `size` attribute of `x_board` and is the
//! only source of truth for how many rows are valid; allocated capacity grows
//! in blocks of `chunk_rows`. Rows are always written to all three arrays
//! before `size` advances, so a crash can at worst leave written but uncounted
//! rows behind, which the next append overwrites.

use std::path::{Path, PathBuf};

use log::info;
use thiserror::Error;

use crate::array_store::{ArrayStore, AttrValue, Dtype};
use crate::board_serialization::{BoardTensor, BOARD_CELLS};
use crate::features::{AuxFeatures, EncodedRecord, Label, AUX_LEN, LABEL_LEN};

pub const BOARD_ARRAY: &str = "x_board";
pub const AUX_ARRAY: &str = "x_misc";
pub const LABEL_ARRAY: &str = "y";

pub const SIZE_ATTR: &str = "size";
pub const MANIFEST_ATTR: &str = "included_files";

/// Rows added to every array each time the store runs out of capacity.
pub const DEFAULT_CHUNK_ROWS: u64 = 16384;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{} is not a valid position store; use another path or delete it", .0.display())]
    InvalidStore(PathBuf),
    #[error("{0} has already been added to this store; allow duplicates to ingest it again")]
    DuplicateSource(String),
    #[error("unknown array: {0}")]
    UnknownArray(String),
    #[error("array {name} holds {expected:?}, not {got:?}")]
    DtypeMismatch {
        name: String,
        expected: Dtype,
        got: Dtype,
    },
    #[error("rows {start}..{end} out of bounds for array {name} with {rows} rows")]
    OutOfBounds {
        name: String,
        start: u64,
        end: u64,
        rows: u64,
    },
    #[error("record {index} out of range for store of size {size}")]
    IndexOutOfRange { index: u64, size: u64 },
}

/// Handle owning all durable state of a position store.
pub struct Store {
    arrays: ArrayStore,
    size: u64,
    capacity: u64,
    chunk_rows: u64,
    manifest: String,
}

impl Store {
    /// Open the store at `path`, creating it when nothing exists there.
    pub fn open_or_create(path: &Path) -> Result<Self, StoreError> {
        Self::open_or_create_with_chunk_rows(path, DEFAULT_CHUNK_ROWS)
    }

    /// Like [`Store::open_or_create`]; `chunk_rows` only applies to new stores.
    pub fn open_or_create_with_chunk_rows(path: &Path, chunk_rows: u64) -> Result<Self, StoreError> {
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path, chunk_rows.max(1))
        }
    }

    fn create(path: &Path, chunk_rows: u64) -> Result<Self, StoreError> {
        info!("store {} does not exist, creating one", path.display());
        let mut arrays = ArrayStore::create(path)?;
        arrays.create_array(BOARD_ARRAY, Dtype::Bool, BOARD_CELLS, 0, chunk_rows)?;
        arrays.create_array(AUX_ARRAY, Dtype::F32, AUX_LEN, 0, chunk_rows)?;
        arrays.create_array(LABEL_ARRAY, Dtype::U16, LABEL_LEN, 0, chunk_rows)?;
        arrays.set_attr(BOARD_ARRAY, SIZE_ATTR, AttrValue::Int(0))?;
        arrays.set_attr(BOARD_ARRAY, MANIFEST_ATTR, AttrValue::Str(String::new()))?;
        arrays.flush()?;

        Ok(Store {
            arrays,
            size: 0,
            capacity: 0,
            chunk_rows,
            manifest: String::new(),
        })
    }

    fn open(path: &Path) -> Result<Self, StoreError> {
        let invalid = || StoreError::InvalidStore(path.to_path_buf());
        let arrays = ArrayStore::open(path)?;

        let board = arrays.array(BOARD_ARRAY).ok_or_else(invalid)?;
        let size = arrays
            .attr(BOARD_ARRAY, SIZE_ATTR)
            .and_then(AttrValue::as_int)
            .ok_or_else(invalid)?;
        let schema_ok = board.dtype == Dtype::Bool
            && board.row_width == BOARD_CELLS
            && matches!(arrays.array(AUX_ARRAY),
                Some(a) if a.dtype == Dtype::F32 && a.row_width == AUX_LEN && a.rows == board.rows)
            && matches!(arrays.array(LABEL_ARRAY),
                Some(a) if a.dtype == Dtype::U16 && a.row_width == LABEL_LEN && a.rows == board.rows);
        if !schema_ok || size > board.rows {
            return Err(invalid());
        }

        let capacity = board.rows;
        let chunk_rows = board.chunk_rows.max(1);
        let manifest = arrays
            .attr(BOARD_ARRAY, MANIFEST_ATTR)
            .and_then(AttrValue::as_str)
            .unwrap_or_default()
            .to_string();

        info!("opened store {} with {} positions", path.display(), size);
        Ok(Store {
            arrays,
            size,
            capacity,
            chunk_rows,
            manifest,
        })
    }

    /// Number of records in the store.
    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Allocated rows per array.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn path(&self) -> &Path {
        self.arrays.root()
    }

    /// Identifiers of every source ingested so far, oldest first.
    pub fn manifest(&self) -> impl Iterator<Item = &str> {
        self.manifest.lines().filter(|l| !l.is_empty())
    }

    pub fn contains_source(&self, id: &str) -> bool {
        self.manifest().any(|entry| entry == id)
    }

    /// Record `id` as ingested before any of its data is appended.
    ///
    /// The manifest is flushed right away, so a source that fails halfway
    /// through stays marked as ingested.
    pub fn register_source(&mut self, id: &str, allow_duplicate: bool) -> Result<(), StoreError> {
        if !allow_duplicate && self.contains_source(id) {
            return Err(StoreError::DuplicateSource(id.to_string()));
        }
        self.manifest.push_str(id);
        self.manifest.push('\n');
        self.arrays.set_attr(
            BOARD_ARRAY,
            MANIFEST_ATTR,
            AttrValue::Str(self.manifest.clone()),
        )?;
        self.arrays.flush()
    }

    fn grow(&mut self) -> Result<(), StoreError> {
        let rows = self.capacity + self.chunk_rows;
        for name in [BOARD_ARRAY, AUX_ARRAY, LABEL_ARRAY] {
            self.arrays.resize(name, rows)?;
        }
        self.capacity = rows;
        self.arrays.flush()?;
        info!("Total positions processed={}", self.size);
        Ok(())
    }

    /// Append `records` after the current last row.
    pub fn append_batch(&mut self, records: &[EncodedRecord]) -> Result<(), StoreError> {
        let mut rest = records;
        while !rest.is_empty() {
            if self.size >= self.capacity {
                self.grow()?;
            }
            let room = (self.capacity - self.size) as usize;
            let (now, later) = rest.split_at(room.min(rest.len()));
            self.write_segment(now)?;
            rest = later;
        }
        Ok(())
    }

    /// Write rows `size..size + records.len()` of all three arrays, then
    /// advance the counter.
    fn write_segment(&mut self, records: &[EncodedRecord]) -> Result<(), StoreError> {
        let n = records.len();
        let mut boards = vec![0u8; n * BOARD_CELLS];
        let mut aux = Vec::with_capacity(n * AUX_LEN);
        let mut labels = Vec::with_capacity(n * LABEL_LEN);
        for (record, cells) in records.iter().zip(boards.chunks_exact_mut(BOARD_CELLS)) {
            record.board.write_cells(cells);
            aux.extend_from_slice(&record.aux);
            labels.extend_from_slice(&record.label);
        }

        self.arrays.write_rows(BOARD_ARRAY, self.size, &boards)?;
        self.arrays.write_rows(AUX_ARRAY, self.size, &aux)?;
        self.arrays.write_rows(LABEL_ARRAY, self.size, &labels)?;

        self.size += n as u64;
        self.arrays
            .set_attr(BOARD_ARRAY, SIZE_ATTR, AttrValue::Int(self.size))
    }

    /// Read back the record at `index`.
    pub fn read_record(&self, index: u64) -> Result<EncodedRecord, StoreError> {
        let mut records = self.read_range(index, 1)?;
        records.pop().ok_or(StoreError::IndexOutOfRange {
            index,
            size: self.size,
        })
    }

    /// Read `count` consecutive records starting at `start`.
    pub fn read_range(&self, start: u64, count: u64) -> Result<Vec<EncodedRecord>, StoreError> {
        if start.checked_add(count).map_or(true, |end| end > self.size) {
            return Err(StoreError::IndexOutOfRange {
                index: start.saturating_add(count.saturating_sub(1)),
                size: self.size,
            });
        }
        let boards = self.arrays.read_rows::<u8>(BOARD_ARRAY, start, count)?;
        let aux = self.arrays.read_rows::<f32>(AUX_ARRAY, start, count)?;
        let labels = self.arrays.read_rows::<u16>(LABEL_ARRAY, start, count)?;

        let records = boards
            .chunks_exact(BOARD_CELLS)
            .zip(aux.chunks_exact(AUX_LEN))
            .zip(labels.chunks_exact(LABEL_LEN))
            .map(|((cells, aux), label)| {
                let mut a: AuxFeatures = [0.0; AUX_LEN];
                a.copy_from_slice(aux);
                let mut l: Label = [0; LABEL_LEN];
                l.copy_from_slice(label);
                EncodedRecord {
                    board: BoardTensor::from_cells(cells),
                    aux: a,
                    label: l,
                }
            })
            .collect();
        Ok(records)
    }

    /// Persist the size counter and all written rows.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.arrays.flush()
    }

    pub fn close(mut self) -> Result<(), StoreError> {
        self.flush()
    }
}
