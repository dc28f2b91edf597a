//! Result records and per-descriptor outcomes.
//!
//! # Design
//! A `ResultRecord` is what a successful (< 400) exchange leaves behind.
//! `Outcome` is the per-descriptor tag that lets a caller tell "ran and
//! failed" apart from "never ran", which the plain record list cannot.

use std::time::Duration;

use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// Body of a successful response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// 204 No Content.
    Empty,
    Raw(Vec<u8>),
    /// The request asked for decoding and the body was valid JSON.
    Json(serde_json::Value),
}

impl ResponseBody {
    /// Raw bytes as UTF-8 text; `Empty` is the empty string, `Json` is
    /// re-serialized.
    pub fn to_text(&self) -> String {
        match self {
            ResponseBody::Empty => String::new(),
            ResponseBody::Raw(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            ResponseBody::Json(value) => value.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ResponseBody::Empty => true,
            ResponseBody::Raw(bytes) => bytes.is_empty(),
            ResponseBody::Json(_) => false,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Diagnostic metadata kept alongside every exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseInfo {
    pub url: String,
    pub method: HttpMethod,
    pub status: u16,
    pub elapsed: Duration,
    /// Echo of the request body, helpful when debugging a failed call.
    pub request_body: Option<Vec<u8>>,
    pub headers: Vec<(String, String)>,
}

/// One successful exchange retired by the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub status: u16,
    pub body: ResponseBody,
    pub info: ResponseInfo,
}

/// What happened to one enqueued descriptor, by submission index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Never admitted: the batch aborted before reaching it.
    Pending,
    Success(u16),
    HttpError(u16),
    TransportError(String),
    Cancelled,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }
}

/// Interpretation of one response.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Interpreted {
    Record(ResultRecord),
    Rejected(ResponseInfo),
}

/// Classify a response the way both the single client and the executor do:
/// `< 400` becomes a record (204 is always empty, otherwise raw or decoded),
/// `>= 400` is logged and rejected.
pub(crate) fn interpret<S>(
    index: Option<usize>,
    request: &HttpRequest,
    response: HttpResponse,
    elapsed: Duration,
    sink: &S,
) -> Interpreted
where
    S: DiagnosticSink + ?Sized,
{
    let info = ResponseInfo {
        url: request.url.clone(),
        method: request.method,
        status: response.status,
        elapsed,
        request_body: request.body.clone(),
        headers: response.headers,
    };

    if response.status >= 400 {
        sink.record(&Diagnostic::HttpError {
            index,
            url: request.url.clone(),
            status: response.status,
        });
        return Interpreted::Rejected(info);
    }

    let body = if response.status == 204 {
        ResponseBody::Empty
    } else if request.decode && !response.body.is_empty() {
        match serde_json::from_slice(&response.body) {
            Ok(value) => ResponseBody::Json(value),
            Err(e) => {
                sink.record(&Diagnostic::DecodeFailed {
                    url: request.url.clone(),
                    reason: e.to_string(),
                });
                ResponseBody::Raw(response.body)
            }
        }
    } else {
        ResponseBody::Raw(response.body)
    };

    Interpreted::Record(ResultRecord {
        status: info.status,
        body,
        info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;

    fn run(request: &HttpRequest, response: HttpResponse, sink: &MemorySink) -> Interpreted {
        interpret(Some(0), request, response, Duration::from_millis(5), sink)
    }

    #[test]
    fn ok_response_keeps_raw_body() {
        let sink = MemorySink::new();
        let req = HttpRequest::get("http://h/a");
        let Interpreted::Record(record) = run(&req, HttpResponse::new(200, "hello"), &sink) else {
            panic!("expected a record");
        };
        assert_eq!(record.status, 200);
        assert_eq!(record.body, ResponseBody::Raw(b"hello".to_vec()));
        assert_eq!(record.info.url, "http://h/a");
        assert!(sink.is_empty());
    }

    #[test]
    fn no_content_is_empty_even_with_a_body() {
        let sink = MemorySink::new();
        let req = HttpRequest::get("http://h/a").with_decode(true);
        let Interpreted::Record(record) = run(&req, HttpResponse::new(204, "ignored"), &sink) else {
            panic!("expected a record");
        };
        assert_eq!(record.body, ResponseBody::Empty);
    }

    #[test]
    fn decode_flag_parses_json() {
        let sink = MemorySink::new();
        let req = HttpRequest::get("http://h/a").with_decode(true);
        let Interpreted::Record(record) = run(&req, HttpResponse::new(200, r#"{"n":1}"#), &sink) else {
            panic!("expected a record");
        };
        assert_eq!(record.body.as_json().unwrap()["n"], 1);
    }

    #[test]
    fn undecodable_json_falls_back_to_raw() {
        let sink = MemorySink::new();
        let req = HttpRequest::get("http://h/a").with_decode(true);
        let Interpreted::Record(record) = run(&req, HttpResponse::new(200, "not json"), &sink) else {
            panic!("expected a record");
        };
        assert_eq!(record.body, ResponseBody::Raw(b"not json".to_vec()));
        assert!(matches!(sink.events()[0], Diagnostic::DecodeFailed { .. }));
    }

    #[test]
    fn error_status_is_rejected_and_logged() {
        let sink = MemorySink::new();
        let req = HttpRequest::get("http://h/missing").with_body("q=1");
        let Interpreted::Rejected(info) = run(&req, HttpResponse::new(404, "nope"), &sink) else {
            panic!("expected a rejection");
        };
        assert_eq!(info.status, 404);
        assert_eq!(info.request_body.as_deref(), Some(&b"q=1"[..]));
        assert_eq!(
            sink.events(),
            vec![Diagnostic::HttpError {
                index: Some(0),
                url: "http://h/missing".to_string(),
                status: 404
            }]
        );
    }
}
