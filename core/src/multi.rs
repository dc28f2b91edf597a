//! Admission-controlled execution of many requests over one transport.
//!
//! # Design
//! `MultiExecutor` owns a FIFO backlog of `HttpRequest`s. `execute*` admits
//! an initial window of them into the transport, then loops on a single
//! thread: poll the transport without blocking, drain whatever completed,
//! retire each completion into the report and admit one replacement from the
//! backlog per retirement. The only place the thread waits is the poll
//! interval between polls that produced nothing.
//!
//! In-flight operations live in a `Slab` arena; the slab key doubles as the
//! `OperationId` given to the transport, and an operation is always removed
//! from the arena before its replacement is inserted.
//!
//! Failures are asymmetric:
//! - a status >= 400 is logged and left out of the results;
//! - a failed poll ends the batch early with whatever was collected.
//! Neither is returned as an error. `BatchReport::outcomes` tells the cases
//! apart per descriptor.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use slab::Slab;

use crate::aggregate::{aggregate, Aggregated};
use crate::config::{AdmissionPolicy, ExecutorConfig};
use crate::diagnostics::{Diagnostic, DiagnosticSink, TracingSink};
use crate::error::{ApiError, TransportError};
use crate::http::{HttpRequest, HttpResponse};
use crate::transport::{OperationId, PollStatus, Transport};
use crate::types::{interpret, Interpreted, Outcome, ResultRecord};

/// Cooperative cancellation flag, checked once per poll iteration.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that is not cancelled. Clones share the same flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every executor holding a clone of this token to stop. Takes
    /// effect at the next poll iteration; there is no way to reset it.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether `cancel` was called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Everything a batch produced.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    /// Records of successful exchanges, in completion order.
    pub results: Vec<ResultRecord>,
    /// One entry per enqueued descriptor, in submission order.
    pub outcomes: Vec<Outcome>,
    /// Set when a failed poll cut the batch short.
    pub aborted: Option<String>,
    pub cancelled: bool,
    /// Largest in-flight set observed.
    pub peak_in_flight: usize,
}

impl BatchReport {
    fn new(total: usize) -> Self {
        Self {
            results: Vec::new(),
            outcomes: vec![Outcome::Pending; total],
            aborted: None,
            cancelled: false,
            peak_in_flight: 0,
        }
    }

    /// Descriptors that reached a final state.
    pub fn retired(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| !matches!(o, Outcome::Pending | Outcome::Cancelled))
            .count()
    }

    pub fn is_complete(&self) -> bool {
        self.aborted.is_none() && !self.cancelled
    }

    pub fn into_results(self) -> Vec<ResultRecord> {
        self.results
    }

    pub fn merge<T>(self, merge: impl FnOnce(Vec<ResultRecord>) -> T) -> T {
        merge(self.results)
    }
}

struct InFlight {
    index: usize,
    request: HttpRequest,
    started: Instant,
}

/// Runs a queue of `HttpRequest`s through a `Transport` with at most
/// `limit` of them in flight at once.
///
/// Requests are queued with `enqueue`/`enqueue_all` and run by one of the
/// `execute*` methods, which block the calling thread until the batch is
/// done and leave the executor empty and reusable. Outcomes are reported to
/// the sink `S` (`TracingSink` unless replaced with `with_sink`).
///
/// ```no_run
/// use rest_multi::{MultiExecutor, RequestBody, RestClient, UreqTransport};
///
/// let client = RestClient::new();
/// let mut multi = MultiExecutor::new(UreqTransport::new());
/// multi.limit(4);
/// for id in 0..16 {
///     let url = format!("http://localhost:8080/items/{id}");
///     multi.enqueue(client.get(&url, RequestBody::None)).unwrap();
/// }
/// let report = multi.execute_report();
/// assert_eq!(report.outcomes.len(), 16);
/// ```
pub struct MultiExecutor<T, S = TracingSink> {
    transport: T,
    sink: S,
    config: ExecutorConfig,
    backlog: Vec<HttpRequest>,
    cancel: CancelToken,
}

impl<T: Transport> MultiExecutor<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, ExecutorConfig::default())
    }

    pub fn with_config(transport: T, config: ExecutorConfig) -> Self {
        Self {
            transport,
            sink: TracingSink,
            config,
            backlog: Vec::new(),
            cancel: CancelToken::new(),
        }
    }
}

impl<T: Transport, S: DiagnosticSink> MultiExecutor<T, S> {
    /// Send diagnostics to `sink` instead.
    pub fn with_sink<S2: DiagnosticSink>(self, sink: S2) -> MultiExecutor<T, S2> {
        MultiExecutor {
            transport: self.transport,
            sink,
            config: self.config,
            backlog: self.backlog,
            cancel: self.cancel,
        }
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// A handle that cancels the running batch from another thread. It stays
    /// cancelled; install a fresh token before reusing the executor.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Append one descriptor to the backlog.
    pub fn enqueue(&mut self, request: HttpRequest) -> Result<&mut Self, ApiError> {
        request.validate()?;
        self.backlog.push(request);
        Ok(self)
    }

    /// Append descriptors in order. Nothing is appended if any is invalid.
    pub fn enqueue_all<I>(&mut self, requests: I) -> Result<&mut Self, ApiError>
    where
        I: IntoIterator<Item = HttpRequest>,
    {
        let requests: Vec<HttpRequest> = requests.into_iter().collect();
        for request in &requests {
            request.validate()?;
        }
        self.backlog.extend(requests);
        Ok(self)
    }

    /// Maximum concurrent requests; 0 means unbounded.
    pub fn limit(&mut self, limit: usize) -> &mut Self {
        self.config.limit = limit;
        self
    }

    /// Wait between polls that completed nothing. Zero yields instead.
    pub fn poll_interval(&mut self, interval: Duration) -> &mut Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn admission(&mut self, policy: AdmissionPolicy) -> &mut Self {
        self.config.admission = policy;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Descriptors waiting for the next `execute`.
    pub fn pending(&self) -> usize {
        self.backlog.len()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Run the batch and return the successful records.
    pub fn execute(&mut self) -> Vec<ResultRecord> {
        self.execute_report().into_results()
    }

    /// Run the batch and pass the records through `merge` when given.
    pub fn execute_with<R, F>(&mut self, merge: Option<F>) -> Aggregated<R>
    where
        F: FnOnce(Vec<ResultRecord>) -> R,
    {
        aggregate(self.execute(), merge)
    }

    pub fn execute_merged<R>(&mut self, merge: impl FnOnce(Vec<ResultRecord>) -> R) -> R {
        self.execute_report().merge(merge)
    }

    /// Run every queued descriptor to completion, blocking until the backlog
    /// and the in-flight set are both empty, the transport fails, or the
    /// batch is cancelled.
    pub fn execute_report(&mut self) -> BatchReport {
        let total = self.backlog.len();
        let mut report = BatchReport::new(total);
        if total == 0 {
            return report;
        }

        let window = self.config.admission.initial_window(self.config.limit, total);
        self.sink.record(&Diagnostic::BatchStarted { total, window });
        self.transport.reserve(window.max(1));

        let mut backlog: VecDeque<(usize, HttpRequest)> =
            std::mem::take(&mut self.backlog).into_iter().enumerate().collect();
        let mut in_flight: Slab<InFlight> = Slab::with_capacity(window.max(1));

        while in_flight.len() < window && !backlog.is_empty() {
            self.admit(&mut backlog, &mut in_flight, &mut report);
        }

        loop {
            if in_flight.is_empty() {
                if backlog.is_empty() {
                    break;
                }
                // A zero window (one descriptor, legacy admission) still
                // has to make progress.
                self.admit(&mut backlog, &mut in_flight, &mut report);
                continue;
            }

            if self.cancel.is_cancelled() {
                self.cancel_batch(&mut backlog, &mut in_flight, &mut report);
                break;
            }

            let still_running = match self.poll() {
                Ok(still_running) => still_running,
                Err(reason) => {
                    self.abort(reason, &mut in_flight, &mut report);
                    break;
                }
            };

            let completions = self.transport.drain_completed();
            let drained = completions.len();
            for completion in completions {
                let Some(op) = in_flight.try_remove(completion.id.key()) else {
                    tracing::debug!(id = %completion.id, "completion for unknown operation ignored");
                    continue;
                };
                self.retire(op, completion.result, &mut report);
                if !backlog.is_empty() {
                    self.admit(&mut backlog, &mut in_flight, &mut report);
                }
            }

            if drained == 0 {
                if !still_running {
                    let reason = format!(
                        "transport idle with {} operations outstanding",
                        in_flight.len()
                    );
                    self.abort(reason, &mut in_flight, &mut report);
                    break;
                }
                self.pause();
            }
        }

        self.sink.record(&Diagnostic::BatchFinished {
            results: report.results.len(),
            retired: report.retired(),
        });
        report
    }

    /// Start the next backlog entry. An entry the transport refuses to start
    /// is retired as a transport failure and the following one is tried.
    fn admit(
        &mut self,
        backlog: &mut VecDeque<(usize, HttpRequest)>,
        in_flight: &mut Slab<InFlight>,
        report: &mut BatchReport,
    ) {
        while let Some((index, request)) = backlog.pop_front() {
            let entry = in_flight.vacant_entry();
            let id = OperationId::new(entry.key());
            match self.transport.start(id, &request) {
                Ok(()) => {
                    self.sink.record(&Diagnostic::Admitted {
                        index,
                        url: request.url.clone(),
                    });
                    entry.insert(InFlight {
                        index,
                        request,
                        started: Instant::now(),
                    });
                    report.peak_in_flight = report.peak_in_flight.max(in_flight.len());
                    return;
                }
                Err(error) => self.fail(index, &request, error, report),
            }
        }
    }

    fn retire(
        &mut self,
        op: InFlight,
        result: Result<HttpResponse, TransportError>,
        report: &mut BatchReport,
    ) {
        let response = match result {
            Ok(response) => response,
            Err(error) => {
                self.fail(op.index, &op.request, error, report);
                return;
            }
        };
        match interpret(
            Some(op.index),
            &op.request,
            response,
            op.started.elapsed(),
            &self.sink,
        ) {
            Interpreted::Record(record) => {
                report.outcomes[op.index] = Outcome::Success(record.status);
                report.results.push(record);
            }
            Interpreted::Rejected(info) => {
                report.outcomes[op.index] = Outcome::HttpError(info.status);
            }
        }
    }

    fn fail(&self, index: usize, request: &HttpRequest, error: TransportError, report: &mut BatchReport) {
        self.sink.record(&Diagnostic::TransportFailed {
            index,
            url: request.url.clone(),
            reason: error.to_string(),
        });
        report.outcomes[index] = Outcome::TransportError(error.to_string());
    }

    /// Poll until the transport stops asking to be called again.
    fn poll(&mut self) -> Result<bool, String> {
        loop {
            match self.transport.poll_all() {
                PollStatus::CallAgain => {
                    if self.cancel.is_cancelled() {
                        return Ok(true);
                    }
                    self.pause();
                }
                PollStatus::Ready { still_running } => return Ok(still_running),
                PollStatus::Failed(reason) => return Err(reason),
            }
        }
    }

    fn pause(&self) {
        if self.config.poll_interval.is_zero() {
            thread::yield_now();
        } else {
            thread::sleep(self.config.poll_interval);
        }
    }

    fn abort(&mut self, reason: String, in_flight: &mut Slab<InFlight>, report: &mut BatchReport) {
        self.sink.record(&Diagnostic::PollFailed {
            reason: reason.clone(),
        });
        self.stop_all(in_flight);
        report.aborted = Some(reason);
    }

    fn cancel_batch(
        &mut self,
        backlog: &mut VecDeque<(usize, HttpRequest)>,
        in_flight: &mut Slab<InFlight>,
        report: &mut BatchReport,
    ) {
        let stopped = in_flight.len();
        for (_, op) in in_flight.iter() {
            report.outcomes[op.index] = Outcome::Cancelled;
        }
        self.stop_all(in_flight);

        let skipped = backlog.len();
        for (index, _) in backlog.drain(..) {
            report.outcomes[index] = Outcome::Cancelled;
        }
        report.cancelled = true;
        self.sink.record(&Diagnostic::Cancelled { stopped, skipped });
    }

    fn stop_all(&mut self, in_flight: &mut Slab<InFlight>) {
        for (key, _) in in_flight.iter() {
            self.transport.stop(OperationId::new(key));
        }
        in_flight.clear();
    }
}
