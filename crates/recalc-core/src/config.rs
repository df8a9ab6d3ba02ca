//! Engine configuration.

/// Default minimum number of rows in a materialized sheet.
pub const DEFAULT_MIN_ROWS: u32 = 100;

/// Default minimum number of columns in a materialized sheet.
pub const DEFAULT_MIN_COLS: u32 = 50;

/// Default ceiling on the dense rows of a materialized sheet.
pub const DEFAULT_MAX_ROWS: u32 = 10_000;

/// Default ceiling on the dense columns of a materialized sheet.
pub const DEFAULT_MAX_COLS: u32 = 256;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Minimum rows of a materialized grid, so small sheets still have
    /// addressing room in the evaluator.
    pub min_rows: u32,
    /// Minimum columns of a materialized grid.
    pub min_cols: u32,
    /// Dense rows are never sized past this; records further down are kept
    /// sparsely. The minimum wins if it is larger.
    pub max_rows: u32,
    /// Column counterpart of `max_rows`.
    pub max_cols: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_rows: DEFAULT_MIN_ROWS,
            min_cols: DEFAULT_MIN_COLS,
            max_rows: DEFAULT_MAX_ROWS,
            max_cols: DEFAULT_MAX_COLS,
        }
    }
}
