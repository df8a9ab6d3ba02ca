//! Evaluation engine boundary.
//!
//! The formula language is a black box to the rest of the crate: every
//! computation, precedent query and dependent query goes through the
//! [`Evaluator`] trait. [`GridEvaluator`] is the bundled implementation.
//!
//! - [`parser`] - formula tokenizer and expression tree
//! - [`functions`] - built-in function library
//! - [`grid`] - the [`GridEvaluator`] itself

mod functions;
mod grid;
pub mod parser;

use std::fmt;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::{CellContent, CellValue};

pub use grid::GridEvaluator;

/// Evaluator-assigned identifier of a registered sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SheetHandle(pub(crate) u32);

impl SheetHandle {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SheetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sheet_{}", self.0)
    }
}

/// Faults raised by an evaluator instead of an in-band value.
///
/// The engine maps every one of these to `#ERROR!`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("unknown sheet handle {0}")]
    UnknownSheet(SheetHandle),

    #[error("division by zero")]
    DivisionByZero,

    #[error("arithmetic overflow")]
    Overflow,

    #[error("formula nesting too deep")]
    DepthExceeded,
}

/// Dense, bounded, row-major grid of cell contents.
///
/// The dense bounds are fixed at construction. Writes outside them land in
/// a sparse overlay, so a far-away address costs one map entry rather than
/// a resize.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseGrid {
    rows: u32,
    cols: u32,
    cells: Vec<CellContent>,
    overflow: FxHashMap<(u32, u32), CellContent>,
}

impl DenseGrid {
    /// An all-empty grid.
    pub fn new(rows: u32, cols: u32) -> Self {
        Self {
            rows,
            cols,
            cells: vec![CellContent::Empty; rows as usize * cols as usize],
            overflow: FxHashMap::default(),
        }
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    /// Number of filled slots held outside the dense bounds.
    pub fn overflow_len(&self) -> usize {
        self.overflow.len()
    }

    fn index(&self, row: u32, col: u32) -> Option<usize> {
        (row < self.rows && col < self.cols)
            .then(|| row as usize * self.cols as usize + col as usize)
    }

    /// Contents of a slot. `None` outside the dense bounds unless the
    /// overlay holds something there.
    pub fn get(&self, row: u32, col: u32) -> Option<&CellContent> {
        match self.index(row, col) {
            Some(i) => Some(&self.cells[i]),
            None => self.overflow.get(&(row, col)),
        }
    }

    pub fn set(&mut self, row: u32, col: u32, content: CellContent) {
        match self.index(row, col) {
            Some(i) => self.cells[i] = content,
            None if content == CellContent::Empty => {
                self.overflow.remove(&(row, col));
            }
            None => {
                self.overflow.insert((row, col), content);
            }
        }
    }

    /// Iterate `(row, col, content)` over non-empty slots, dense slots
    /// first in row-major order.
    pub fn iter_filled(&self) -> impl Iterator<Item = (u32, u32, &CellContent)> {
        let cols = self.cols.max(1) as usize;
        let dense = self
            .cells
            .iter()
            .enumerate()
            .filter(|(_, c)| !matches!(c, CellContent::Empty))
            .map(move |(i, c)| ((i / cols) as u32, (i % cols) as u32, c));
        let mut sparse: Vec<_> = self.overflow.iter().map(|(&(r, c), v)| (r, c, v)).collect();
        sparse.sort_unstable_by_key(|&(r, c, _)| (r, c));
        dense.chain(sparse)
    }
}

/// Capabilities the engine needs from a formula evaluator.
///
/// Addresses are `(row, col)` within a registered sheet.
pub trait Evaluator: Send {
    /// Register a materialized sheet and return its handle.
    fn register_sheet(&mut self, name: &str, grid: DenseGrid) -> SheetHandle;

    /// Replace a cell's contents. Returns whether they changed.
    fn set_contents(
        &mut self,
        handle: SheetHandle,
        row: u32,
        col: u32,
        contents: CellContent,
    ) -> Result<bool, EvalError>;

    /// Compute the value at an address.
    fn compute_at(&self, handle: SheetHandle, row: u32, col: u32) -> Result<CellValue, EvalError>;

    /// Cells the formula at this address reads from.
    fn precedents_of(&self, handle: SheetHandle, row: u32, col: u32) -> Vec<(u32, u32)>;

    /// Cells whose formulas read from this address.
    fn dependents_of(&self, handle: SheetHandle, row: u32, col: u32) -> Vec<(u32, u32)>;

    /// Computed value of every cell in the sheet, row-major.
    fn serialized_state(&self, handle: SheetHandle) -> Option<Vec<Vec<CellValue>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_grid_writes_outside_bounds_stay_sparse() {
        let mut grid = DenseGrid::new(2, 2);
        grid.set(0, 1, CellContent::from_input("7"));
        grid.set(3, 4, CellContent::from_input("=B1"));
        grid.set(1_048_575, 16_383, CellContent::from_input("far"));

        assert_eq!((grid.rows(), grid.cols()), (2, 2));
        assert_eq!(grid.overflow_len(), 2);
        assert_eq!(grid.get(0, 1), Some(&CellContent::from_input("7")));
        assert_eq!(grid.get(3, 4), Some(&CellContent::Formula("=B1".to_string())));
        assert_eq!(grid.get(4, 0), None);

        let filled: Vec<_> = grid.iter_filled().map(|(r, c, _)| (r, c)).collect();
        assert_eq!(filled, vec![(0, 1), (3, 4), (1_048_575, 16_383)]);

        grid.set(3, 4, CellContent::Empty);
        assert_eq!(grid.overflow_len(), 1);
        assert_eq!(grid.get(3, 4), None);
    }
}
