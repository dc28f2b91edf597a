//! Blocking `ureq` calls multiplexed behind the `Transport` interface.
//!
//! # Design
//! One `ureq::Agent` is shared by every call, so keep-alive connections are
//! pooled across the whole batch. Started operations are queued as jobs for
//! a small pool of worker threads; each worker runs one blocking call at a
//! time and reports back over an mpsc channel. `poll_all` only ever
//! `try_recv`s, so the executor's thread blocks nowhere but its poll
//! interval.
//!
//! The pool grows lazily, one worker per concurrently outstanding operation,
//! up to the concurrency passed to `reserve` and never past `max_workers`.
//! Operations beyond that wait in the job queue.
//!
//! Status codes are returned as data (`http_status_as_error` is off); only
//! connection-level failures become `TransportError`.
//!
//! # Stopping
//! `stop` flags the operation's job. A job still in the queue is dropped
//! without touching the network. A call already on the wire cannot be
//! interrupted: it runs to completion (or to its timeout) on its worker and
//! the reply is discarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use ureq::{Agent, RequestBuilder};

use crate::error::TransportError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::transport::{Completion, OperationId, PollStatus, Transport};

/// Upper bound on worker threads unless overridden with `max_workers`.
pub const DEFAULT_MAX_WORKERS: usize = 32;

type Reply = (OperationId, u64, Result<HttpResponse, TransportError>);

struct Job {
    id: OperationId,
    generation: u64,
    request: HttpRequest,
    stopped: Arc<AtomicBool>,
}

struct Outstanding {
    /// Distinguishes this operation's reply from a stopped predecessor's
    /// that used the same id.
    generation: u64,
    stopped: Arc<AtomicBool>,
}

pub struct UreqTransport {
    agent: Agent,
    jobs: Sender<Job>,
    queue: Arc<Mutex<Receiver<Job>>>,
    replies_tx: Sender<Reply>,
    replies: Receiver<Reply>,
    workers: Vec<JoinHandle<()>>,
    max_workers: usize,
    reserved: Option<usize>,
    outstanding: HashMap<OperationId, Outstanding>,
    next_generation: u64,
    completed: Vec<Completion>,
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UreqTransport {
    pub fn new() -> Self {
        Self::with_agent(
            Agent::config_builder()
                .http_status_as_error(false)
                .build()
                .new_agent(),
        )
    }

    /// Use a caller-configured agent (proxy, TLS, agent-wide timeouts).
    /// It must have `http_status_as_error(false)`, otherwise error statuses
    /// arrive as `TransportError::Request` instead of responses.
    pub fn with_agent(agent: Agent) -> Self {
        let (jobs, queue) = mpsc::channel();
        let (replies_tx, replies) = mpsc::channel();
        Self {
            agent,
            jobs,
            queue: Arc::new(Mutex::new(queue)),
            replies_tx,
            replies,
            workers: Vec::new(),
            max_workers: DEFAULT_MAX_WORKERS,
            reserved: None,
            outstanding: HashMap::new(),
            next_generation: 0,
            completed: Vec::new(),
        }
    }

    /// Cap the worker pool. Zero is treated as one.
    pub fn max_workers(mut self, max: usize) -> Self {
        self.max_workers = max.max(1);
        self
    }

    /// Operations started and neither completed nor stopped.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Worker threads spawned so far. Workers live as long as the transport.
    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Execute one request on the calling thread, through the shared agent.
    pub fn call(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        call_with(&self.agent, request)
    }

    fn pool_size(&self) -> usize {
        let cap = match self.reserved {
            Some(reserved) => reserved.clamp(1, self.max_workers),
            None => self.max_workers,
        };
        self.outstanding.len().min(cap)
    }

    fn grow_pool(&mut self) -> Result<(), TransportError> {
        while self.workers.len() < self.pool_size() {
            let agent = self.agent.clone();
            let queue = Arc::clone(&self.queue);
            let replies = self.replies_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("rest-multi-worker-{}", self.workers.len()))
                .spawn(move || worker(agent, queue, replies));
            match spawned {
                Ok(handle) => self.workers.push(handle),
                // Queued jobs still drain through the workers we have.
                Err(e) if !self.workers.is_empty() => {
                    tracing::warn!(error = %e, workers = self.workers.len(), "worker pool not grown");
                    break;
                }
                Err(e) => return Err(TransportError::Spawn(e.to_string())),
            }
        }
        Ok(())
    }
}

impl Transport for UreqTransport {
    fn start(&mut self, id: OperationId, request: &HttpRequest) -> Result<(), TransportError> {
        let generation = self.next_generation;
        self.next_generation += 1;
        let stopped = Arc::new(AtomicBool::new(false));

        self.outstanding.insert(
            id,
            Outstanding {
                generation,
                stopped: Arc::clone(&stopped),
            },
        );
        if let Err(e) = self.grow_pool() {
            self.outstanding.remove(&id);
            return Err(e);
        }

        let job = Job {
            id,
            generation,
            request: request.clone(),
            stopped,
        };
        if self.jobs.send(job).is_err() {
            self.outstanding.remove(&id);
            return Err(TransportError::Disconnected);
        }
        tracing::trace!(%id, url = %request.url, workers = self.workers.len(), "operation queued");
        Ok(())
    }

    fn poll_all(&mut self) -> PollStatus {
        loop {
            match self.replies.try_recv() {
                Ok((id, generation, result)) => {
                    let current = self
                        .outstanding
                        .get(&id)
                        .is_some_and(|op| op.generation == generation);
                    if current {
                        self.outstanding.remove(&id);
                        self.completed.push(Completion { id, result });
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    return PollStatus::Failed(TransportError::Disconnected.to_string());
                }
            }
        }
        PollStatus::Ready {
            still_running: !self.outstanding.is_empty(),
        }
    }

    fn drain_completed(&mut self) -> Vec<Completion> {
        std::mem::take(&mut self.completed)
    }

    fn stop(&mut self, id: OperationId) {
        if let Some(op) = self.outstanding.remove(&id) {
            op.stopped.store(true, Ordering::Release);
        }
        self.completed.retain(|c| c.id != id);
    }

    fn reserve(&mut self, concurrency: usize) {
        self.reserved = Some(concurrency);
    }
}

fn worker(agent: Agent, queue: Arc<Mutex<Receiver<Job>>>, replies: Sender<Reply>) {
    loop {
        let next = match queue.lock() {
            Ok(queue) => queue.recv(),
            Err(poisoned) => poisoned.into_inner().recv(),
        };
        // The transport was dropped.
        let Ok(job) = next else { return };

        if job.stopped.load(Ordering::Acquire) {
            tracing::trace!(id = %job.id, "stopped before it was sent");
            continue;
        }
        let result = call_with(&agent, &job.request);
        if replies.send((job.id, job.generation, result)).is_err() {
            return;
        }
    }
}

fn call_with(agent: &Agent, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
    let sent = match request.method {
        HttpMethod::Get => prepare(agent.get(&request.url), request).call(),
        HttpMethod::Delete => prepare(agent.delete(&request.url), request).call(),
        HttpMethod::Post => {
            let builder = prepare(agent.post(&request.url), request);
            match &request.body {
                Some(body) => builder.send(&body[..]),
                None => builder.send_empty(),
            }
        }
        HttpMethod::Put => {
            let builder = prepare(agent.put(&request.url), request);
            match &request.body {
                Some(body) => builder.send(&body[..]),
                None => builder.send_empty(),
            }
        }
    };
    let mut response = sent.map_err(map_error)?;

    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    let body = response.body_mut().read_to_vec().map_err(map_error)?;

    Ok(HttpResponse { status, headers, body })
}

fn prepare<B>(mut builder: RequestBuilder<B>, request: &HttpRequest) -> RequestBuilder<B> {
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(timeout) = request.timeout {
        builder = builder.config().timeout_global(Some(timeout)).build();
    }
    builder
}

fn map_error(error: ureq::Error) -> TransportError {
    match error {
        ureq::Error::Timeout(_) => TransportError::Timeout,
        other => TransportError::Request(other.to_string()),
    }
}
