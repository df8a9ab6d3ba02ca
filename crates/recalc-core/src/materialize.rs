//! Sheet materialization.
//!
//! Turns the store's sparse records into the dense grid the evaluator
//! works on and registers it, once per sheet. The sheet id -> handle map
//! lives for the lifetime of the materializer.
//!
//! Loading suspends on store I/O, so two overlapping requests can both
//! find a sheet unloaded. Each sheet therefore gets a
//! [`tokio::sync::OnceCell`]: the first caller runs the load, later
//! callers wait for it and receive the same handle. A failed load leaves
//! the cell empty and the next caller retries.

use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use tokio::sync::OnceCell;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::eval::{DenseGrid, Evaluator, SheetHandle};
use crate::lock;
use crate::store::{CellRecord, CellStore};
use crate::value::CellContent;

/// Build the dense grid for a sheet's records.
///
/// Bounds are `max(max_row + 1, min_rows) x max(max_col + 1, min_cols)`,
/// capped at `max_rows x max_cols` unless the minimum is larger. Records
/// past the cap go to the grid's sparse overlay. Slots hold formula text
/// where a record has one, else the raw value.
pub fn materialize(records: &[CellRecord], config: &EngineConfig) -> DenseGrid {
    let rows = records
        .iter()
        .map(|r| r.row.saturating_add(1))
        .max()
        .unwrap_or(0)
        .min(config.max_rows)
        .max(config.min_rows);
    let cols = records
        .iter()
        .map(|r| r.col.saturating_add(1))
        .max()
        .unwrap_or(0)
        .min(config.max_cols)
        .max(config.min_cols);

    let mut grid = DenseGrid::new(rows, cols);
    for record in records {
        let contents = record.contents();
        if contents != CellContent::Empty {
            grid.set(record.row, record.col, contents);
        }
    }
    grid
}

/// Load-once registry of materialized sheets.
pub struct SheetMaterializer {
    config: EngineConfig,
    slots: Mutex<FxHashMap<String, Arc<OnceCell<SheetHandle>>>>,
}

impl SheetMaterializer {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            slots: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Handle of an already loaded sheet. Never triggers a load.
    pub fn handle_for(&self, sheet_id: &str) -> Option<SheetHandle> {
        lock(&self.slots)
            .get(sheet_id)
            .and_then(|slot| slot.get().copied())
    }

    /// Number of sheets that finished loading.
    pub fn loaded_count(&self) -> usize {
        lock(&self.slots)
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    /// Return the sheet's handle, loading and registering it on first use.
    pub async fn ensure_loaded<S, E>(
        &self,
        sheet_id: &str,
        store: &S,
        evaluator: &Mutex<E>,
    ) -> Result<SheetHandle>
    where
        S: CellStore,
        E: Evaluator,
    {
        let slot = {
            let mut slots = lock(&self.slots);
            Arc::clone(slots.entry(sheet_id.to_string()).or_default())
        };

        let handle = slot
            .get_or_try_init(|| async {
                let records = store.get_cells_for_sheet(sheet_id).await?;
                let grid = materialize(&records, &self.config);
                let (rows, cols) = (grid.rows(), grid.cols());
                let handle = lock(evaluator).register_sheet(sheet_id, grid);
                tracing::info!(
                    "Registered sheet '{}' as {} ({}x{} grid, {} records)",
                    sheet_id,
                    handle,
                    rows,
                    cols,
                    records.len()
                );
                Ok::<_, crate::Error>(handle)
            })
            .await?;

        Ok(*handle)
    }
}
