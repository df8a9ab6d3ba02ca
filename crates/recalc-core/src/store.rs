//! Cell store boundary.
//!
//! The persistent cell store is external; the engine only ever asks it for
//! the sparse records of one sheet, and only when a sheet is loaded.
//! Two implementations ship with the crate:
//!
//! - [`MemoryStore`] - in-process records, mutable by the embedder
//! - [`JsonDirStore`] - one `<sheet_id>.json` array of records per sheet

use std::future::Future;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::value::{CellContent, CellValue};

/// A non-empty cell as the store reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub sheet_id: String,
    pub row: u32,
    pub col: u32,
    /// Raw value; ignored when a formula is present.
    #[serde(default)]
    pub value: CellValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    /// Store-owned version. The engine never relies on it.
    #[serde(default)]
    pub version: u64,
}

impl CellRecord {
    pub fn value(
        sheet_id: impl Into<String>,
        row: u32,
        col: u32,
        value: impl Into<CellValue>,
    ) -> Self {
        Self {
            sheet_id: sheet_id.into(),
            row,
            col,
            value: value.into(),
            formula: None,
            version: 0,
        }
    }

    pub fn formula(
        sheet_id: impl Into<String>,
        row: u32,
        col: u32,
        formula: impl Into<String>,
    ) -> Self {
        Self {
            sheet_id: sheet_id.into(),
            row,
            col,
            value: CellValue::Empty,
            formula: Some(formula.into()),
            version: 0,
        }
    }

    /// Grid contents for this record: formula text if present, else the value.
    pub fn contents(&self) -> CellContent {
        CellContent::from_parts(&self.value, self.formula.as_deref())
    }
}

/// Read-only access to the external cell store.
pub trait CellStore: Send + Sync {
    /// Fetch every non-empty cell of a sheet.
    fn get_cells_for_sheet(
        &self,
        sheet_id: &str,
    ) -> impl Future<Output = Result<Vec<CellRecord>>> + Send;
}

/// In-memory store. Unknown sheets are empty.
#[derive(Default)]
pub struct MemoryStore {
    sheets: RwLock<FxHashMap<String, FxHashMap<(u32, u32), CellRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from records, grouping them by sheet.
    pub fn with_records(records: impl IntoIterator<Item = CellRecord>) -> Self {
        let mut sheets: FxHashMap<String, FxHashMap<(u32, u32), CellRecord>> = FxHashMap::default();
        for record in records {
            sheets
                .entry(record.sheet_id.clone())
                .or_default()
                .insert((record.row, record.col), record);
        }
        Self {
            sheets: RwLock::new(sheets),
        }
    }

    /// Insert or replace a record, bumping its store version.
    pub async fn put(&self, mut record: CellRecord) {
        let mut sheets = self.sheets.write().await;
        let sheet = sheets.entry(record.sheet_id.clone()).or_default();
        let key = (record.row, record.col);
        record.version = sheet.get(&key).map_or(1, |old| old.version + 1);
        sheet.insert(key, record);
    }

    /// Remove a record. Returns whether it existed.
    pub async fn remove(&self, sheet_id: &str, row: u32, col: u32) -> bool {
        let mut sheets = self.sheets.write().await;
        sheets
            .get_mut(sheet_id)
            .is_some_and(|sheet| sheet.remove(&(row, col)).is_some())
    }
}

impl CellStore for MemoryStore {
    async fn get_cells_for_sheet(&self, sheet_id: &str) -> Result<Vec<CellRecord>> {
        let sheets = self.sheets.read().await;
        let mut records: Vec<CellRecord> = sheets
            .get(sheet_id)
            .map(|sheet| sheet.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by_key(|r| (r.row, r.col));
        Ok(records)
    }
}

/// Directory-backed store: `<dir>/<sheet_id>.json` holds a JSON array of
/// [`CellRecord`]s. A missing file is a store failure.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    dir: PathBuf,
}

impl JsonDirStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn sheet_path(&self, sheet_id: &str) -> Result<PathBuf> {
        if sheet_id.is_empty()
            || sheet_id.contains(['/', '\\'])
            || sheet_id == "."
            || sheet_id == ".."
        {
            return Err(Error::store(sheet_id, "sheet id is not a valid file name"));
        }
        Ok(self.dir.join(format!("{}.json", sheet_id)))
    }
}

impl CellStore for JsonDirStore {
    async fn get_cells_for_sheet(&self, sheet_id: &str) -> Result<Vec<CellRecord>> {
        let path = self.sheet_path(sheet_id)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::store(sheet_id, format!("{}: {}", path.display(), e)))?;
        let mut records: Vec<CellRecord> = serde_json::from_slice(&bytes)
            .map_err(|e| Error::store(sheet_id, format!("{}: {}", path.display(), e)))?;
        // Records are keyed by the file, not by their own sheet_id field.
        for record in &mut records {
            if record.sheet_id != sheet_id {
                record.sheet_id = sheet_id.to_string();
            }
        }
        Ok(records)
    }
}
