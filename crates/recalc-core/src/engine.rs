//! The recalculation engine.
//!
//! [`Engine`] ties the store, the evaluator, the materializer and the
//! calculation cache together. All methods take `&self` so that the futures
//! of a batch can share one engine; state sits behind short
//! `std::sync::Mutex` critical sections that never span an `.await`.
//! Whenever both are needed, the evaluator is locked before the cache.

use std::sync::Mutex;

use futures::future::join_all;

use crate::cache::{CacheEntry, CacheStats, CalcCache, InvalidationReport};
use crate::cell_ref::{CellAddress, CellRef};
use crate::circular::{self, CircularReport};
use crate::config::EngineConfig;
use crate::deps::{CellDependencies, DependencyTracker};
use crate::error::Result;
use crate::eval::{Evaluator, SheetHandle};
use crate::lock;
use crate::materialize::SheetMaterializer;
use crate::store::CellStore;
use crate::value::{CellContent, CellError, CellValue};

/// Incremental recalculation engine over a cell store and an evaluator.
pub struct Engine<S, E> {
    store: S,
    evaluator: Mutex<E>,
    materializer: SheetMaterializer,
    cache: Mutex<CalcCache>,
}

impl<S: CellStore, E: Evaluator> Engine<S, E> {
    pub fn new(store: S, evaluator: E, config: EngineConfig) -> Self {
        Self {
            store,
            evaluator: Mutex::new(evaluator),
            materializer: SheetMaterializer::new(config),
            cache: Mutex::new(CalcCache::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        self.materializer.config()
    }

    /// Ensure a sheet is loaded and return its handle.
    pub async fn load_sheet(&self, sheet_id: &str) -> Result<SheetHandle> {
        self.materializer
            .ensure_loaded(sheet_id, &self.store, &self.evaluator)
            .await
    }

    /// Handle of a sheet that is already loaded.
    pub fn handle_for(&self, sheet_id: &str) -> Option<SheetHandle> {
        self.materializer.handle_for(sheet_id)
    }

    /// Return the value of `formula` at `cell_ref`, reusing a valid cache
    /// entry when one exists.
    ///
    /// On a miss the formula is written into the evaluator at that address,
    /// computed, and stored with a version snapshot of its precedents.
    /// Evaluator faults become `#ERROR!`; only a failed sheet load is an
    /// error.
    pub async fn get_or_compute(
        &self,
        sheet_id: &str,
        cell_ref: CellRef,
        formula: &str,
    ) -> Result<CellValue> {
        let handle = self.load_sheet(sheet_id).await?;
        let formula = formula.trim();

        if let Some(result) = lock(&self.cache).lookup(handle, cell_ref, formula) {
            tracing::debug!("Cache hit for {}!{}", sheet_id, cell_ref);
            return Ok(result);
        }
        tracing::debug!("Cache miss for {}!{}, computing", sheet_id, cell_ref);

        let address = cell_ref.in_sheet(sheet_id);
        let (row, col) = (cell_ref.row, cell_ref.col);

        let mut evaluator = lock(&self.evaluator);
        let contents = CellContent::from_input(formula);
        let changed = match evaluator.set_contents(handle, row, col, contents) {
            Ok(changed) => changed,
            Err(e) => {
                tracing::warn!("Failed to write {}: {}", address, e);
                false
            }
        };

        let tracker = DependencyTracker::new(&*evaluator, handle, sheet_id);
        let mut cache = lock(&self.cache);
        if changed {
            let report = cache.invalidate(address.clone(), Some(handle), |a| {
                tracker.dependents(a.row, a.col)
            });
            tracing::debug!(
                "Contents of {} changed, invalidated {} cells",
                address,
                report.invalidated.len()
            );
        }

        let result = evaluator.compute_at(handle, row, col).unwrap_or_else(|e| {
            tracing::warn!("Evaluation of {} failed: {}", address, e);
            CellValue::Error(CellError::Error)
        });

        let dependencies = cache.snapshot(tracker.precedents(row, col));
        cache.insert(
            handle,
            &address,
            CacheEntry {
                result: result.clone(),
                formula: formula.to_string(),
                dependencies,
            },
        );

        Ok(result)
    }

    /// Like [`get_or_compute`](Self::get_or_compute) but never fails: a
    /// store failure is reported as `#ERROR!`.
    pub async fn calculate(&self, sheet_id: &str, cell_ref: CellRef, formula: &str) -> CellValue {
        match self.get_or_compute(sheet_id, cell_ref, formula).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Calculation of {}!{} failed: {}", sheet_id, cell_ref, e);
                CellValue::Error(CellError::Error)
            }
        }
    }

    /// Calculate every item concurrently. Results keep the input order.
    pub async fn batch_calculate<F>(
        &self,
        sheet_id: &str,
        items: &[(CellRef, F)],
    ) -> Vec<(CellRef, CellValue)>
    where
        F: AsRef<str>,
    {
        join_all(items.iter().map(|(cell_ref, formula)| async move {
            let value = self.calculate(sheet_id, *cell_ref, formula.as_ref()).await;
            (*cell_ref, value)
        }))
        .await
    }

    /// Invalidate a cell and everything that transitively depends on it.
    pub fn invalidate(&self, sheet_id: &str, row: u32, col: u32) -> InvalidationReport {
        let handle = self.handle_for(sheet_id);
        let evaluator = lock(&self.evaluator);
        let tracker = handle.map(|h| DependencyTracker::new(&*evaluator, h, sheet_id));

        let root = CellAddress::new(sheet_id, row, col);
        let report = lock(&self.cache).invalidate(root, handle, |a| {
            tracker
                .as_ref()
                .map(|t| t.dependents(a.row, a.col))
                .unwrap_or_default()
        });

        tracing::debug!(
            "Invalidated {} cells from {}!{} ({} entries evicted)",
            report.invalidated.len(),
            sheet_id,
            CellRef::new(row, col),
            report.evicted
        );
        report
    }

    /// Apply new contents to a cell, then invalidate it.
    ///
    /// An unloaded sheet only gets the invalidation; its next load reads the
    /// store.
    pub fn update_cell(
        &self,
        sheet_id: &str,
        row: u32,
        col: u32,
        contents: CellContent,
    ) -> InvalidationReport {
        if let Some(handle) = self.handle_for(sheet_id) {
            if let Err(e) = lock(&self.evaluator).set_contents(handle, row, col, contents) {
                tracing::warn!("Failed to update {}!{}: {}", sheet_id, CellRef::new(row, col), e);
            }
        }
        self.invalidate(sheet_id, row, col)
    }

    /// Precedents and dependents of a cell. Empty if the sheet is not loaded.
    pub fn dependencies(&self, sheet_id: &str, cell_ref: CellRef) -> CellDependencies {
        let Some(handle) = self.handle_for(sheet_id) else {
            return CellDependencies::default();
        };
        let evaluator = lock(&self.evaluator);
        DependencyTracker::new(&*evaluator, handle, sheet_id).both(cell_ref.row, cell_ref.col)
    }

    /// Scan a loaded sheet for circular references.
    pub fn check_circular(&self, sheet_id: &str) -> CircularReport {
        let Some(handle) = self.handle_for(sheet_id) else {
            return CircularReport::default();
        };
        circular::detect(&*lock(&self.evaluator), handle, sheet_id)
    }

    pub fn stats(&self) -> CacheStats {
        lock(&self.cache).stats(self.materializer.loaded_count())
    }

    /// Drop all cache entries and counters. Versions are kept.
    pub fn clear_cache(&self) {
        let mut cache = lock(&self.cache);
        let dropped = cache.len();
        cache.clear();
        tracing::info!("Cleared {} cache entries", dropped);
    }

    /// Whether a cell currently has a cache entry.
    pub fn is_cached(&self, sheet_id: &str, cell_ref: CellRef) -> bool {
        self.handle_for(sheet_id)
            .is_some_and(|handle| lock(&self.cache).contains(handle, cell_ref))
    }

    /// Engine-owned version of an address.
    pub fn version(&self, address: &CellAddress) -> u64 {
        lock(&self.cache).version(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::GridEvaluator;
    use crate::store::{CellRecord, MemoryStore};

    fn engine(records: Vec<CellRecord>) -> Engine<MemoryStore, GridEvaluator> {
        Engine::new(
            MemoryStore::with_records(records),
            GridEvaluator::new(),
            EngineConfig::default(),
        )
    }

    fn r(text: &str) -> CellRef {
        text.parse().unwrap()
    }

    #[tokio::test]
    async fn test_calculate_and_hit() {
        let engine = engine(vec![
            CellRecord::value("S1", 0, 0, 4.0),
            CellRecord::value("S1", 1, 0, 6.0),
        ]);

        let value = engine.calculate("S1", r("C1"), "=A1*A2").await;
        assert_eq!(value, CellValue::Number(24.0));
        assert!(engine.is_cached("S1", r("C1")));
        assert_eq!(engine.config().min_rows, 100);

        let again = engine.calculate("S1", r("C1"), "=A1*A2").await;
        assert_eq!(again, CellValue::Number(24.0));

        let stats = engine.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert_eq!(stats.cache_size, 1);
        assert_eq!(stats.loaded_sheets, 1);
    }

    #[tokio::test]
    async fn test_new_formula_at_same_cell_recomputes() {
        let engine = engine(vec![CellRecord::value("S1", 0, 0, 3.0)]);

        assert_eq!(engine.calculate("S1", r("B1"), "=A1+1").await, CellValue::Number(4.0));
        assert_eq!(engine.calculate("S1", r("B1"), "=A1+2").await, CellValue::Number(5.0));
        assert_eq!(engine.stats().misses, 2);
    }

    #[tokio::test]
    async fn test_rewriting_a_cell_evicts_its_dependents() {
        let engine = engine(vec![CellRecord::value("S1", 0, 0, 3.0)]);

        engine.calculate("S1", r("B1"), "=A1*2").await;
        engine.calculate("S1", r("C1"), "=B1+1").await;
        assert!(engine.is_cached("S1", r("C1")));

        assert_eq!(engine.calculate("S1", r("B1"), "=A1*10").await, CellValue::Number(30.0));
        assert!(!engine.is_cached("S1", r("C1")));
        assert_eq!(engine.calculate("S1", r("C1"), "=B1+1").await, CellValue::Number(31.0));
    }

    #[tokio::test]
    async fn test_update_cell_changes_later_results() {
        let engine = engine(vec![CellRecord::value("S1", 0, 0, 1.0)]);

        assert_eq!(engine.calculate("S1", r("B1"), "=A1+1").await, CellValue::Number(2.0));
        let report = engine.update_cell("S1", 0, 0, CellContent::from_input("41"));
        assert_eq!(report.evicted, 1);
        assert_eq!(engine.calculate("S1", r("B1"), "=A1+1").await, CellValue::Number(42.0));
    }

    #[tokio::test]
    async fn test_unloaded_sheet_queries_are_empty() {
        let engine = engine(vec![]);

        assert_eq!(engine.dependencies("S9", r("A1")), CellDependencies::default());
        assert_eq!(engine.check_circular("S9"), CircularReport::default());

        let report = engine.invalidate("S9", 0, 0);
        assert_eq!(report.invalidated, vec![CellAddress::new("S9", 0, 0)]);
        assert_eq!(engine.version(&CellAddress::new("S9", 0, 0)), 1);
        assert_eq!(engine.stats().loaded_sheets, 0);
    }

    #[tokio::test]
    async fn test_clear_cache_keeps_versions() {
        let engine = engine(vec![CellRecord::value("S1", 0, 0, 1.0)]);
        engine.calculate("S1", r("B1"), "=A1").await;
        engine.invalidate("S1", 0, 0);

        engine.clear_cache();
        let stats = engine.stats();
        assert_eq!(stats.cache_size, 0);
        assert_eq!(stats.dirty_cells_count, 0);
        assert_eq!((stats.hits, stats.misses), (0, 0));
        assert_eq!(engine.version(&CellAddress::new("S1", 0, 0)), 1);
    }
}
