//! The background worker thread.
//!
//! The engine runs on a dedicated OS thread with its own current-thread
//! tokio runtime, so evaluation never blocks the caller. Requests arrive on a
//! bounded queue and are handled one at a time, in arrival order; responses
//! leave on an unbounded channel.

use std::collections::VecDeque;
use std::thread::JoinHandle;

use recalc_core::{CellStore, Engine, Evaluator};
use tokio::sync::mpsc;

use crate::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::handler::handle_request;
use crate::protocol::{Request, RequestEnvelope, Response, ResponseEnvelope};

/// Stack size of the worker thread. Formula evaluation can recurse.
const WORKER_STACK_SIZE: usize = 8 * 1024 * 1024;

/// Handle to a running worker thread.
pub struct WorkerHandle {
    /// `None` once the queue has been closed.
    requests: Option<mpsc::Sender<RequestEnvelope>>,
    responses: mpsc::UnboundedReceiver<ResponseEnvelope>,
    /// Responses read by [`request`](Self::request) while waiting for another id.
    pending: VecDeque<ResponseEnvelope>,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    /// Start a worker thread owning a new engine.
    pub fn spawn<S, E>(store: S, evaluator: E, config: WorkerConfig) -> WorkerResult<Self>
    where
        S: CellStore + 'static,
        E: Evaluator + 'static,
    {
        let (request_tx, request_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (response_tx, response_rx) = mpsc::unbounded_channel();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let engine = Engine::new(store, evaluator, config.engine);
        let thread = std::thread::Builder::new()
            .name("recalc-worker".to_string())
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || runtime.block_on(run(engine, request_rx, response_tx)))?;

        tracing::debug!("Worker thread started (queue capacity {})", config.queue_capacity);

        Ok(Self {
            requests: Some(request_tx),
            responses: response_rx,
            pending: VecDeque::new(),
            thread,
        })
    }

    /// Queue a request. Waits while the queue is full.
    pub async fn send(&self, envelope: RequestEnvelope) -> WorkerResult<()> {
        let requests = self.requests.as_ref().ok_or(WorkerError::ChannelClosed)?;
        requests
            .send(envelope)
            .await
            .map_err(|_| WorkerError::ChannelClosed)
    }

    /// Stop accepting requests. Queued requests are still answered, after
    /// which [`recv`](Self::recv) returns `None`.
    pub fn close(&mut self) {
        self.requests = None;
    }

    /// Next response, in completion order. `None` once the worker stopped.
    pub async fn recv(&mut self) -> Option<ResponseEnvelope> {
        match self.pending.pop_front() {
            Some(envelope) => Some(envelope),
            None => self.responses.recv().await,
        }
    }

    /// Send a request and wait for the response with the same id.
    ///
    /// Responses to other ids received meanwhile stay available to
    /// [`recv`](Self::recv).
    pub async fn request(
        &mut self,
        id: impl Into<String>,
        request: Request,
    ) -> WorkerResult<Response> {
        if matches!(request, Request::Unknown) {
            return Err(WorkerError::NoResponse);
        }
        let id = id.into();
        self.send(RequestEnvelope::new(id.clone(), request)).await?;

        if let Some(index) = self.pending.iter().position(|e| e.id == id) {
            if let Some(envelope) = self.pending.remove(index) {
                return Ok(envelope.response);
            }
        }
        loop {
            let envelope = self.responses.recv().await.ok_or(WorkerError::ChannelClosed)?;
            if envelope.id == id {
                return Ok(envelope.response);
            }
            self.pending.push_back(envelope);
        }
    }

    /// Close the queue, let the worker drain it, and wait for the thread to
    /// exit.
    pub fn shutdown(mut self) -> WorkerResult<()> {
        self.close();
        self.thread.join().map_err(|_| WorkerError::Panicked)
    }
}

async fn run<S, E>(
    engine: Engine<S, E>,
    mut requests: mpsc::Receiver<RequestEnvelope>,
    responses: mpsc::UnboundedSender<ResponseEnvelope>,
) where
    S: CellStore,
    E: Evaluator,
{
    while let Some(RequestEnvelope { id, request }) = requests.recv().await {
        let kind = request.kind();
        tracing::debug!("Handling {} request {}", kind, id);

        let Some(response) = handle_request(&engine, request).await else {
            tracing::debug!("No response for {} request {}", kind, id);
            continue;
        };
        if responses.send(ResponseEnvelope { id, response }).is_err() {
            tracing::debug!("Response receiver dropped, stopping worker");
            break;
        }
    }
    tracing::debug!("Worker thread exiting");
}
