//! The seam between the executor and whatever moves bytes.
//!
//! # Design
//! A transport multiplexes many operations behind a non-blocking interface:
//! `start` begins one, `poll_all` advances them all without blocking,
//! `drain_completed` hands back whatever finished, `stop` abandons one.
//! Operations are identified by the `OperationId` the executor assigns, so
//! the transport never holds a reference into the executor's state.

use std::fmt;

use crate::error::TransportError;
use crate::http::{HttpRequest, HttpResponse};

/// Opaque key of one in-flight operation. Unique among live operations;
/// reused only after the previous holder was retired or stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(usize);

impl OperationId {
    pub(crate) fn new(key: usize) -> Self {
        Self(key)
    }

    pub(crate) fn key(self) -> usize {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// Result of one `poll_all` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    /// The transport has more work it can do right now; poll again after
    /// the poll interval.
    CallAgain,
    Ready { still_running: bool },
    /// The polling mechanism itself broke. Not a per-request failure.
    Failed(String),
}

/// One finished operation. `Err` is a per-request transport failure
/// (connection refused, timeout), never an HTTP error status.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub id: OperationId,
    pub result: Result<HttpResponse, TransportError>,
}

impl Completion {
    pub fn ok(id: OperationId, response: HttpResponse) -> Self {
        Self {
            id,
            result: Ok(response),
        }
    }

    pub fn failed(id: OperationId, error: TransportError) -> Self {
        Self { id, result: Err(error) }
    }
}

pub trait Transport {
    /// Begin executing `request` as operation `id`.
    fn start(&mut self, id: OperationId, request: &HttpRequest) -> Result<(), TransportError>;

    /// Advance every operation without blocking.
    fn poll_all(&mut self) -> PollStatus;

    /// Take every operation that finished since the last drain.
    fn drain_completed(&mut self) -> Vec<Completion>;

    /// Abandon `id`. Its completion, if any arrives later, is never drained.
    fn stop(&mut self, id: OperationId);

    /// Called once per batch with the most operations that will ever be in
    /// flight together. Transports that pool resources size the pool by it.
    fn reserve(&mut self, _concurrency: usize) {}
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn start(&mut self, id: OperationId, request: &HttpRequest) -> Result<(), TransportError> {
        (**self).start(id, request)
    }

    fn poll_all(&mut self) -> PollStatus {
        (**self).poll_all()
    }

    fn drain_completed(&mut self) -> Vec<Completion> {
        (**self).drain_completed()
    }

    fn stop(&mut self, id: OperationId) {
        (**self).stop(id)
    }

    fn reserve(&mut self, concurrency: usize) {
        (**self).reserve(concurrency)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn start(&mut self, id: OperationId, request: &HttpRequest) -> Result<(), TransportError> {
        (**self).start(id, request)
    }

    fn poll_all(&mut self) -> PollStatus {
        (**self).poll_all()
    }

    fn drain_completed(&mut self) -> Vec<Completion> {
        (**self).drain_completed()
    }

    fn stop(&mut self, id: OperationId) {
        (**self).stop(id)
    }

    fn reserve(&mut self, concurrency: usize) {
        (**self).reserve(concurrency)
    }
}
