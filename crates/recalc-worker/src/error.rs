//! Error types for the recalc worker.

/// Worker error type.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Engine error.
    #[error("Core error: {0}")]
    Core(#[from] recalc_core::Error),

    /// The worker thread has stopped.
    #[error("Worker channel closed")]
    ChannelClosed,

    /// The request kind gets no response, so it cannot be awaited.
    #[error("Request has no response")]
    NoResponse,

    /// The worker thread panicked.
    #[error("Worker thread panicked")]
    Panicked,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;
