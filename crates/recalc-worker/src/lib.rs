//! Background worker for the recalc engine.
//!
//! Hosts an [`Engine`](recalc_core::Engine) on a dedicated thread and speaks
//! a JSON request/response protocol with it.
//!
//! # Architecture
//!
//! - **Protocol**: request and response message types
//! - **Handler**: dispatches each request onto the engine
//! - **Worker**: the thread, its runtime and its channels
//!
//! The `recalc-worker` binary wires a [`WorkerHandle`] to stdin/stdout,
//! one JSON message per line.

pub mod error;
pub mod handler;
pub mod protocol;
pub mod worker;

use recalc_core::EngineConfig;

pub use error::{WorkerError, WorkerResult};
pub use handler::handle_request;
pub use protocol::{BatchItem, BatchResult, Request, RequestEnvelope, Response, ResponseEnvelope};
pub use worker::WorkerHandle;

/// Default capacity of the request queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Capacity of the bounded request queue.
    pub queue_capacity: usize,
    /// Configuration of the hosted engine.
    pub engine: EngineConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            engine: EngineConfig::default(),
        }
    }
}
