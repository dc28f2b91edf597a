//! REST client with an admission-controlled multi-request executor.
//!
//! # Overview
//! `RestClient` turns connection settings (headers, cookies, timeout, basic
//! auth) plus a call into an `HttpRequest`. `MultiExecutor` runs many such
//! requests through a `Transport`, keeping at most `limit` of them in flight
//! and topping the in-flight set up from its backlog as requests finish.
//!
//! # Design
//! - Requests and responses are plain data (`http`); the client never does
//!   I/O itself.
//! - The executor is a single-threaded poll loop over the `Transport`
//!   trait. `UreqTransport` is the real implementation; tests plug in
//!   scripted ones.
//! - HTTP error statuses are logged through a `DiagnosticSink`, never
//!   raised. `BatchReport` carries a per-descriptor `Outcome` for callers
//!   that need to tell failures apart.
//!
//! ```no_run
//! use rest_multi::{MultiExecutor, RequestBody, RestClient, UreqTransport};
//!
//! let client = RestClient::new();
//! let mut multi = MultiExecutor::new(UreqTransport::new());
//! for sub in ["rust", "books"] {
//!     let req = client.get(&format!("https://www.reddit.com/r/{sub}/.json"), RequestBody::None);
//!     multi.enqueue(req).unwrap();
//! }
//! let count = multi.limit(2).execute_merged(|results| results.len());
//! println!("{count} responses");
//! ```

pub mod aggregate;
pub mod client;
pub mod config;
pub mod diagnostics;
pub mod encoding;
pub mod error;
pub mod http;
pub mod multi;
pub mod multipart;
pub mod transport;
pub mod types;
pub mod ureq_transport;

pub use aggregate::{aggregate, Aggregated};
pub use client::{Exchange, RequestBody, RestClient};
pub use config::{AdmissionPolicy, ExecutorConfig};
pub use diagnostics::{Diagnostic, DiagnosticSink, MemorySink, TracingSink};
pub use error::{ApiError, TransportError};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use multi::{BatchReport, CancelToken, MultiExecutor};
pub use multipart::{encode_file, encode_file_from_path, FileBody};
pub use transport::{Completion, OperationId, PollStatus, Transport};
pub use types::{Outcome, ResponseBody, ResponseInfo, ResultRecord};
pub use ureq_transport::{UreqTransport, DEFAULT_MAX_WORKERS};
