//! Directory-backed store of chunked, resizable, typed 2-D arrays.
//!
//! Layout of a store directory:
//!
//! ```text
//! <root>/store.json    array metadata and attributes
//! <root>/<name>.bin    row-major little-endian rows of one array
//! ```
//!
//! Data files are written in place; `store.json` is replaced atomically on
//! [`ArrayStore::flush`], so attributes on disk only ever describe rows that
//! were written before the flush.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

pub const METADATA_FILE: &str = "store.json";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    Bool,
    F32,
    U16,
}

impl Dtype {
    pub fn size(self) -> usize {
        match self {
            Dtype::Bool => 1,
            Dtype::F32 => 4,
            Dtype::U16 => 2,
        }
    }
}

/// Element types that can be stored in an array.
pub trait Element: Copy + Default {
    const DTYPE: Dtype;

    fn encode(src: &[Self], dst: &mut [u8]);
    fn decode(src: &[u8], dst: &mut [Self]);
}

/// Booleans are stored as 0/1 bytes.
impl Element for u8 {
    const DTYPE: Dtype = Dtype::Bool;

    fn encode(src: &[Self], dst: &mut [u8]) {
        for (d, s) in dst.iter_mut().zip(src) {
            *d = (*s != 0) as u8;
        }
    }

    fn decode(src: &[u8], dst: &mut [Self]) {
        dst.copy_from_slice(src);
    }
}

impl Element for f32 {
    const DTYPE: Dtype = Dtype::F32;

    fn encode(src: &[Self], dst: &mut [u8]) {
        LittleEndian::write_f32_into(src, dst);
    }

    fn decode(src: &[u8], dst: &mut [Self]) {
        LittleEndian::read_f32_into(src, dst);
    }
}

impl Element for u16 {
    const DTYPE: Dtype = Dtype::U16;

    fn encode(src: &[Self], dst: &mut [u8]) {
        LittleEndian::write_u16_into(src, dst);
    }

    fn decode(src: &[u8], dst: &mut [Self]) {
        LittleEndian::read_u16_into(src, dst);
    }
}

/// Scalar or string attribute attached to an array.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Int(u64),
    Str(String),
}

impl AttrValue {
    pub fn as_int(&self) -> Option<u64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            AttrValue::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            AttrValue::Int(_) => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArrayMeta {
    pub dtype: Dtype,
    /// Elements per row.
    pub row_width: usize,
    /// Growth unit, in rows.
    pub chunk_rows: u64,
    /// Allocated rows.
    pub rows: u64,
    #[serde(default)]
    pub attrs: BTreeMap<String, AttrValue>,
}

impl ArrayMeta {
    fn row_bytes(&self) -> u64 {
        (self.row_width * self.dtype.size()) as u64
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreMeta {
    format_version: u32,
    arrays: BTreeMap<String, ArrayMeta>,
}

pub struct ArrayStore {
    root: PathBuf,
    meta: StoreMeta,
    files: HashMap<String, File>,
}

impl ArrayStore {
    /// Create an empty store in `root`, creating the directory if needed.
    pub fn create(root: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(root)?;
        let mut store = ArrayStore {
            root: root.to_path_buf(),
            meta: StoreMeta {
                format_version: FORMAT_VERSION,
                arrays: BTreeMap::new(),
            },
            files: HashMap::new(),
        };
        store.flush()?;
        Ok(store)
    }

    /// Open an existing store.
    ///
    /// Fails with [`StoreError::InvalidStore`] when `root` is not a directory
    /// holding readable store metadata and one data file per array.
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        let invalid = || StoreError::InvalidStore(root.to_path_buf());

        if !root.is_dir() {
            return Err(invalid());
        }
        let bytes = fs::read(root.join(METADATA_FILE)).map_err(|_| invalid())?;
        let meta: StoreMeta = serde_json::from_slice(&bytes).map_err(|_| invalid())?;
        if meta.format_version != FORMAT_VERSION {
            return Err(invalid());
        }

        let mut files = HashMap::with_capacity(meta.arrays.len());
        for name in meta.arrays.keys() {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(data_path(root, name))
                .map_err(|_| invalid())?;
            files.insert(name.clone(), file);
        }

        Ok(ArrayStore {
            root: root.to_path_buf(),
            meta,
            files,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a 2-D array of `rows` x `row_width` elements of type `dtype`.
    /// Replaces any array of the same name.
    pub fn create_array(
        &mut self,
        name: &str,
        dtype: Dtype,
        row_width: usize,
        rows: u64,
        chunk_rows: u64,
    ) -> Result<(), StoreError> {
        let meta = ArrayMeta {
            dtype,
            row_width,
            chunk_rows,
            rows,
            attrs: BTreeMap::new(),
        };
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(data_path(&self.root, name))?;
        file.set_len(rows * meta.row_bytes())?;
        self.files.insert(name.to_string(), file);
        self.meta.arrays.insert(name.to_string(), meta);
        Ok(())
    }

    pub fn array(&self, name: &str) -> Option<&ArrayMeta> {
        self.meta.arrays.get(name)
    }

    fn array_checked(&self, name: &str, dtype: Dtype) -> Result<&ArrayMeta, StoreError> {
        let meta = self
            .meta
            .arrays
            .get(name)
            .ok_or_else(|| StoreError::UnknownArray(name.to_string()))?;
        if meta.dtype != dtype {
            return Err(StoreError::DtypeMismatch {
                name: name.to_string(),
                expected: meta.dtype,
                got: dtype,
            });
        }
        Ok(meta)
    }

    fn file(&self, name: &str) -> Result<&File, StoreError> {
        self.files
            .get(name)
            .ok_or_else(|| StoreError::UnknownArray(name.to_string()))
    }

    /// Set the allocated row count of an array.
    pub fn resize(&mut self, name: &str, rows: u64) -> Result<(), StoreError> {
        let meta = self
            .meta
            .arrays
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownArray(name.to_string()))?;
        let file = self
            .files
            .get(name)
            .ok_or_else(|| StoreError::UnknownArray(name.to_string()))?;
        file.set_len(rows * meta.row_bytes())?;
        meta.rows = rows;
        Ok(())
    }

    /// Write whole rows starting at `start_row`. `data.len()` must be a
    /// multiple of the row width and the rows must be allocated.
    pub fn write_rows<T: Element>(
        &mut self,
        name: &str,
        start_row: u64,
        data: &[T],
    ) -> Result<(), StoreError> {
        let meta = self.array_checked(name, T::DTYPE)?;
        debug_assert_eq!(data.len() % meta.row_width, 0);
        let count = (data.len() / meta.row_width) as u64;
        check_bounds(name, meta, start_row, count)?;

        let mut bytes = vec![0u8; data.len() * T::DTYPE.size()];
        T::encode(data, &mut bytes);

        let mut file = self.file(name)?;
        file.seek(SeekFrom::Start(start_row * meta.row_bytes()))?;
        file.write_all(&bytes)?;
        Ok(())
    }

    /// Read `count` rows starting at `start_row`, flattened.
    pub fn read_rows<T: Element>(
        &self,
        name: &str,
        start_row: u64,
        count: u64,
    ) -> Result<Vec<T>, StoreError> {
        let meta = self.array_checked(name, T::DTYPE)?;
        check_bounds(name, meta, start_row, count)?;

        let mut bytes = vec![0u8; (count * meta.row_bytes()) as usize];
        let mut file = self.file(name)?;
        file.seek(SeekFrom::Start(start_row * meta.row_bytes()))?;
        file.read_exact(&mut bytes)?;

        let mut out = vec![T::default(); count as usize * meta.row_width];
        T::decode(&bytes, &mut out);
        Ok(out)
    }

    pub fn attr(&self, name: &str, key: &str) -> Option<&AttrValue> {
        self.meta.arrays.get(name)?.attrs.get(key)
    }

    /// Set an attribute. It becomes durable on the next [`ArrayStore::flush`].
    pub fn set_attr(&mut self, name: &str, key: &str, value: AttrValue) -> Result<(), StoreError> {
        let meta = self
            .meta
            .arrays
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownArray(name.to_string()))?;
        meta.attrs.insert(key.to_string(), value);
        Ok(())
    }

    /// Sync data files, then atomically replace the metadata file.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        for file in self.files.values() {
            file.sync_data()?;
        }

        let final_path = self.root.join(METADATA_FILE);
        let tmp_path = final_path.with_extension("json.tmp");
        fs::write(&tmp_path, serde_json::to_vec_pretty(&self.meta)?)?;
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }
}

fn data_path(root: &Path, name: &str) -> PathBuf {
    root.join(format!("{name}.bin"))
}

fn check_bounds(name: &str, meta: &ArrayMeta, start: u64, count: u64) -> Result<(), StoreError> {
    match start.checked_add(count) {
        Some(end) if end <= meta.rows => Ok(()),
        end => Err(StoreError::OutOfBounds {
            name: name.to_string(),
            start,
            end: end.unwrap_or(u64::MAX),
            rows: meta.rows,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_write_read_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("store");

        let mut store = ArrayStore::create(&root).unwrap();
        store.create_array("a", Dtype::F32, 2, 4, 4).unwrap();
        store.create_array("b", Dtype::U16, 3, 4, 4).unwrap();
        store.write_rows("a", 1, &[1.5f32, -2.0, 3.25, 4.0]).unwrap();
        store.write_rows("b", 3, &[1u16, 2, 65535]).unwrap();
        store
            .set_attr("a", "note", AttrValue::Str("hello".into()))
            .unwrap();
        store.flush().unwrap();
        drop(store);

        let store = ArrayStore::open(&root).unwrap();
        assert_eq!(store.array("a").unwrap().rows, 4);
        assert_eq!(
            store.read_rows::<f32>("a", 0, 3).unwrap(),
            vec![0.0, 0.0, 1.5, -2.0, 3.25, 4.0]
        );
        assert_eq!(store.read_rows::<u16>("b", 3, 1).unwrap(), vec![1, 2, 65535]);
        assert_eq!(store.attr("a", "note").and_then(AttrValue::as_str), Some("hello"));
    }

    #[test]
    fn test_resize_grows_and_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ArrayStore::create(dir.path()).unwrap();
        store.create_array("x", Dtype::Bool, 4, 0, 2).unwrap();
        assert!(store.write_rows("x", 0, &[1u8, 0, 1, 0]).is_err());

        store.resize("x", 2).unwrap();
        store.write_rows("x", 0, &[1u8, 0, 1, 0]).unwrap();
        store.resize("x", 4).unwrap();
        assert_eq!(
            store.read_rows::<u8>("x", 0, 2).unwrap(),
            vec![1, 0, 1, 0, 0, 0, 0, 0]
        );
        assert!(store.read_rows::<u8>("x", 3, 2).is_err());
        assert!(matches!(
            store.read_rows::<u8>("x", 1, u64::MAX),
            Err(StoreError::OutOfBounds { end: u64::MAX, .. })
        ));
    }

    #[test]
    fn test_dtype_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ArrayStore::create(dir.path()).unwrap();
        store.create_array("x", Dtype::U16, 1, 1, 1).unwrap();
        assert!(matches!(
            store.write_rows("x", 0, &[1.0f32]),
            Err(StoreError::DtypeMismatch { .. })
        ));
        assert!(matches!(
            store.read_rows::<u8>("missing", 0, 1),
            Err(StoreError::UnknownArray(_))
        ));
    }

    #[test]
    fn test_open_rejects_foreign_directories() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ArrayStore::open(dir.path()),
            Err(StoreError::InvalidStore(_))
        ));

        fs::write(dir.path().join(METADATA_FILE), b"not json").unwrap();
        assert!(matches!(
            ArrayStore::open(dir.path()),
            Err(StoreError::InvalidStore(_))
        ));

        let file = dir.path().join("plain.txt");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            ArrayStore::open(&file),
            Err(StoreError::InvalidStore(_))
        ));
    }
}
