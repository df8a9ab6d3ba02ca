//! Core of the recalc incremental formula recalculation engine.
//!
//! This crate provides:
//! - A1 cell reference codec and cell value types
//! - The cell store boundary, with in-memory and JSON directory stores
//! - The evaluator boundary, with a bundled grid evaluator
//! - Sheet materialization, dependency tracking and circular reference detection
//! - The version-checked calculation cache and invalidation propagation

pub mod cache;
pub mod cell_ref;
pub mod circular;
pub mod config;
pub mod deps;
pub mod engine;
pub mod error;
pub mod eval;
pub mod materialize;
pub mod store;
pub mod value;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use cache::{CacheEntry, CacheStats, CalcCache, InvalidationReport, VersionTable};
pub use cell_ref::{CellAddress, CellRef, col_to_letters, letters_to_col};
pub use circular::CircularReport;
pub use config::EngineConfig;
pub use deps::{CellDependencies, DependencyTracker};
pub use engine::Engine;
pub use error::{Error, Result};
pub use eval::{DenseGrid, EvalError, Evaluator, GridEvaluator, SheetHandle};
pub use materialize::{SheetMaterializer, materialize};
pub use store::{CellRecord, CellStore, JsonDirStore, MemoryStore};
pub use value::{CellContent, CellError, CellValue};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
