//! Request/response messages for the recalc worker.
//!
//! Every request travels in a [`RequestEnvelope`] carrying a caller-chosen
//! id; the matching [`ResponseEnvelope`] echoes it. Responses may arrive in
//! any order.

use recalc_core::{CacheStats, CellRef, CellValue, SheetHandle};
use serde::{Deserialize, Serialize};

/// A request together with its correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Caller-chosen id, echoed in the response.
    pub id: String,
    /// The request itself.
    pub request: Request,
}

impl RequestEnvelope {
    pub fn new(id: impl Into<String>, request: Request) -> Self {
        Self {
            id: id.into(),
            request,
        }
    }
}

/// Requests accepted by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Evaluate a formula at a cell.
    Calculate {
        /// Sheet to evaluate in.
        sheet_id: String,
        /// Formula text, usually starting with `=`.
        formula: String,
        /// Target cell in A1 notation.
        cell_ref: String,
    },

    /// Evaluate several formulas in one sheet.
    BatchCalculate {
        /// Sheet to evaluate in.
        sheet_id: String,
        /// Cells and formulas to evaluate.
        items: Vec<BatchItem>,
    },

    /// Load a sheet without evaluating anything.
    LoadSheet {
        /// Sheet to load.
        sheet_id: String,
    },

    /// Precedents and dependents of a cell.
    GetDependencies {
        /// Sheet containing the cell.
        sheet_id: String,
        /// Cell in A1 notation.
        cell_ref: String,
    },

    /// A cell changed outside the worker.
    Invalidate {
        /// Sheet containing the cell.
        sheet_id: String,
        /// Zero-based row.
        row: u32,
        /// Zero-based column.
        col: u32,
    },

    /// Apply new contents to a cell and invalidate it.
    UpdateCell {
        /// Sheet containing the cell.
        sheet_id: String,
        /// Zero-based row.
        row: u32,
        /// Zero-based column.
        col: u32,
        /// Raw value, used when there is no formula.
        #[serde(default)]
        value: CellValue,
        /// Formula text.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        formula: Option<String>,
    },

    /// Scan a loaded sheet for circular references.
    CheckCircularRefs {
        /// Sheet to scan.
        sheet_id: String,
    },

    /// Report cache statistics.
    CacheStats,

    /// Drop every cache entry.
    ClearCache,

    /// Any request type this worker does not know.
    #[serde(other)]
    Unknown,
}

impl Request {
    /// Snake-case name of the request type.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Calculate { .. } => "calculate",
            Request::BatchCalculate { .. } => "batch_calculate",
            Request::LoadSheet { .. } => "load_sheet",
            Request::GetDependencies { .. } => "get_dependencies",
            Request::Invalidate { .. } => "invalidate",
            Request::UpdateCell { .. } => "update_cell",
            Request::CheckCircularRefs { .. } => "check_circular_refs",
            Request::CacheStats => "cache_stats",
            Request::ClearCache => "clear_cache",
            Request::Unknown => "unknown",
        }
    }
}

/// One cell of a batch calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub cell_ref: String,
    pub formula: String,
}

/// A response together with the id of the request it answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Id of the answered request.
    pub id: String,
    /// The response itself.
    pub response: Response,
}

/// Responses sent by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Result of a calculation.
    Calculated {
        /// Computed value or error code.
        result: CellValue,
        /// Wall-clock time spent, in milliseconds.
        duration_ms: f64,
    },

    /// Results of a batch, in request order.
    BatchCalculated {
        results: Vec<BatchResult>,
    },

    /// Sheet is loaded.
    SheetLoaded {
        /// Evaluator handle of the sheet.
        handle: SheetHandle,
    },

    /// Dependencies of a cell.
    Dependencies {
        /// Cells the formula reads from.
        precedents: Vec<CellRef>,
        /// Cells whose formulas read from this cell.
        dependents: Vec<CellRef>,
    },

    /// Invalidation applied.
    Invalidated {
        /// Number of cells invalidated.
        count: usize,
    },

    /// Cell update applied.
    CellUpdated {
        /// Number of cells invalidated.
        count: usize,
    },

    /// Result of a circular reference scan.
    CircularRefs {
        has_circular_refs: bool,
        circular_cells: Vec<CellRef>,
    },

    /// Cache statistics.
    CacheStats(CacheStats),

    /// Cache cleared.
    CacheCleared,

    /// The request failed.
    Error {
        /// Error message.
        message: String,
    },
}

/// One cell of a batch result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub cell_ref: String,
    pub result: CellValue,
}
