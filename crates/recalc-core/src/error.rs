//! Error types for recalc-core.

use thiserror::Error;

/// Result type for recalc-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in recalc-core.
///
/// Formula problems never show up here: they are reported in-band as
/// [`CellError`](crate::value::CellError) values. Only infrastructure
/// failures (store access, malformed addresses, I/O) are errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The cell store could not produce the records for a sheet.
    #[error("failed to fetch cells for sheet '{sheet_id}': {message}")]
    Store { sheet_id: String, message: String },

    /// A textual cell reference could not be parsed.
    #[error("invalid cell reference: {0}")]
    InvalidCellRef(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build a store error for the given sheet.
    pub fn store(sheet_id: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Store {
            sheet_id: sheet_id.into(),
            message: message.to_string(),
        }
    }
}
