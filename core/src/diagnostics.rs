//! Structured diagnostics emitted by the client and the executor.
//!
//! # Design
//! The executor never prints. Everything worth telling an operator goes
//! through a `DiagnosticSink`, so callers choose between `tracing` output
//! (`TracingSink`, the default) and an in-memory log (`MemorySink`).

use std::sync::{Arc, Mutex};

/// A single diagnostic event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    BatchStarted { total: usize, window: usize },
    Admitted { index: usize, url: String },
    /// The server answered with a status >= 400; no result record exists.
    HttpError { index: Option<usize>, url: String, status: u16 },
    TransportFailed { index: usize, url: String, reason: String },
    /// A non-204 success arrived without a body.
    EmptyBody { url: String, status: u16 },
    DecodeFailed { url: String, reason: String },
    /// Polling the transport itself failed; the batch stops early.
    PollFailed { reason: String },
    Cancelled { stopped: usize, skipped: usize },
    BatchFinished { results: usize, retired: usize },
}

/// Receiver for diagnostics.
pub trait DiagnosticSink {
    fn record(&self, event: &Diagnostic);
}

impl<S: DiagnosticSink + ?Sized> DiagnosticSink for Arc<S> {
    fn record(&self, event: &Diagnostic) {
        (**self).record(event);
    }
}

/// Forwards diagnostics to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, event: &Diagnostic) {
        match event {
            Diagnostic::BatchStarted { total, window } => {
                tracing::debug!(total, window, "batch started");
            }
            Diagnostic::Admitted { index, url } => {
                tracing::debug!(index, %url, "request admitted");
            }
            Diagnostic::HttpError { index, url, status } => {
                tracing::warn!(?index, %url, status, "{url} returned an error code: {status}");
            }
            Diagnostic::TransportFailed { index, url, reason } => {
                tracing::warn!(index, %url, %reason, "request failed in transport");
            }
            Diagnostic::EmptyBody { url, status } => {
                tracing::warn!(%url, status, "response has no body");
            }
            Diagnostic::DecodeFailed { url, reason } => {
                tracing::warn!(%url, %reason, "response body is not valid json");
            }
            Diagnostic::PollFailed { reason } => {
                tracing::error!(%reason, "transport poll failed, aborting batch");
            }
            Diagnostic::Cancelled { stopped, skipped } => {
                tracing::info!(stopped, skipped, "batch cancelled");
            }
            Diagnostic::BatchFinished { results, retired } => {
                tracing::debug!(results, retired, "batch finished");
            }
        }
    }
}

/// Keeps every diagnostic in memory. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<Diagnostic>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events recorded so far.
    pub fn events(&self) -> Vec<Diagnostic> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Count events matching `pred`.
    pub fn count(&self, pred: impl Fn(&Diagnostic) -> bool) -> usize {
        self.lock().iter().filter(|e| pred(e)).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Diagnostic>> {
        // A panic while holding the lock cannot leave the Vec half-written.
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DiagnosticSink for MemorySink {
    fn record(&self, event: &Diagnostic) {
        self.lock().push(event.clone());
    }
}
