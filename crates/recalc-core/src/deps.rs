//! Dependency tracking.
//!
//! The evaluator owns the reference graph; this module only translates its
//! `(row, col)` answers into sheet-qualified [`CellAddress`]es.

use crate::cell_ref::CellAddress;
use crate::eval::{Evaluator, SheetHandle};

/// Precedents and dependents of one cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellDependencies {
    pub precedents: Vec<CellAddress>,
    pub dependents: Vec<CellAddress>,
}

/// Stateless view over an evaluator's dependency queries.
pub struct DependencyTracker<'a, E: Evaluator> {
    evaluator: &'a E,
    handle: SheetHandle,
    sheet_id: &'a str,
}

impl<'a, E: Evaluator> DependencyTracker<'a, E> {
    pub fn new(evaluator: &'a E, handle: SheetHandle, sheet_id: &'a str) -> Self {
        Self {
            evaluator,
            handle,
            sheet_id,
        }
    }

    /// Cells the formula at `(row, col)` reads from.
    pub fn precedents(&self, row: u32, col: u32) -> Vec<CellAddress> {
        self.qualify(self.evaluator.precedents_of(self.handle, row, col))
    }

    /// Cells whose formulas read from `(row, col)`.
    pub fn dependents(&self, row: u32, col: u32) -> Vec<CellAddress> {
        self.qualify(self.evaluator.dependents_of(self.handle, row, col))
    }

    pub fn both(&self, row: u32, col: u32) -> CellDependencies {
        CellDependencies {
            precedents: self.precedents(row, col),
            dependents: self.dependents(row, col),
        }
    }

    fn qualify(&self, positions: Vec<(u32, u32)>) -> Vec<CellAddress> {
        positions
            .into_iter()
            .map(|(row, col)| CellAddress::new(self.sheet_id, row, col))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{DenseGrid, GridEvaluator};
    use crate::value::CellContent;

    #[test]
    fn test_translates_to_addresses() {
        let mut grid = DenseGrid::new(5, 5);
        grid.set(0, 0, CellContent::from_input("1"));
        grid.set(0, 1, CellContent::from_input("=A1*2"));
        grid.set(0, 2, CellContent::from_input("=B1+A1"));
        let mut evaluator = GridEvaluator::new();
        let handle = evaluator.register_sheet("S1", grid);

        let tracker = DependencyTracker::new(&evaluator, handle, "S1");
        let deps = tracker.both(0, 1);
        assert_eq!(deps.precedents, vec![CellAddress::new("S1", 0, 0)]);
        assert_eq!(deps.dependents, vec![CellAddress::new("S1", 0, 2)]);
        assert_eq!(
            tracker.dependents(0, 0),
            vec![CellAddress::new("S1", 0, 1), CellAddress::new("S1", 0, 2)]
        );
        assert_eq!(tracker.both(4, 4), CellDependencies::default());
    }
}
