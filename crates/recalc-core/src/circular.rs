//! Circular reference detection.

use serde::{Deserialize, Serialize};

use crate::cell_ref::CellAddress;
use crate::eval::{Evaluator, SheetHandle};
use crate::value::{CellError, CellValue};

/// Result of a circular reference scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircularReport {
    pub has_circular_refs: bool,
    /// Cells carrying the cycle marker, row-major.
    pub circular_cells: Vec<CellAddress>,
}

/// Scan a sheet's computed state for `#CYCLE!` markers.
///
/// An unknown handle yields an empty report.
pub fn detect<E: Evaluator>(evaluator: &E, handle: SheetHandle, sheet_id: &str) -> CircularReport {
    let Some(state) = evaluator.serialized_state(handle) else {
        return CircularReport::default();
    };

    let circular_cells: Vec<CellAddress> = state
        .iter()
        .enumerate()
        .flat_map(|(row, values)| {
            values.iter().enumerate().filter_map(move |(col, value)| {
                matches!(value, CellValue::Error(CellError::Cycle))
                    .then(|| CellAddress::new(sheet_id, row as u32, col as u32))
            })
        })
        .collect();

    CircularReport {
        has_circular_refs: !circular_cells.is_empty(),
        circular_cells,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{DenseGrid, GridEvaluator};
    use crate::value::CellContent;

    #[test]
    fn test_detects_two_cell_cycle() {
        let mut grid = DenseGrid::new(3, 3);
        grid.set(0, 0, CellContent::from_input("=B1"));
        grid.set(0, 1, CellContent::from_input("=A1"));
        grid.set(1, 0, CellContent::from_input("=1+1"));
        let mut evaluator = GridEvaluator::new();
        let handle = evaluator.register_sheet("S2", grid);

        let report = detect(&evaluator, handle, "S2");
        assert!(report.has_circular_refs);
        assert_eq!(
            report.circular_cells,
            vec![CellAddress::new("S2", 0, 0), CellAddress::new("S2", 0, 1)]
        );
    }

    #[test]
    fn test_unknown_handle_is_clean() {
        let evaluator = GridEvaluator::new();
        assert_eq!(
            detect(&evaluator, SheetHandle::new(3), "S9"),
            CircularReport::default()
        );
    }
}
