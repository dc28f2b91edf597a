//! Single-request REST client.
//!
//! # Design
//! `RestClient` holds connection settings shared by every call it builds:
//! header lines, a cookie jar, a timeout, basic-auth credentials and the
//! default decode flag. `get`/`post`/`put`/`delete` freeze those settings
//! into an `HttpRequest`. The caller executes it (directly through a
//! transport, or in bulk through `MultiExecutor`) and hands the response to
//! `exec` for interpretation.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::diagnostics::{Diagnostic, DiagnosticSink, TracingSink};
use crate::encoding;
use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::multipart::FileBody;
use crate::types::{interpret, Interpreted, ResponseBody, ResponseInfo};

/// Parameters for a call.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    None,
    /// Key/value pairs, sent as a query string (GET, DELETE) or as an
    /// `application/x-www-form-urlencoded` body (POST, PUT).
    Form(Vec<(String, String)>),
    Raw(Vec<u8>),
}

impl RequestBody {
    pub fn form<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        RequestBody::Form(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    fn is_empty(&self) -> bool {
        match self {
            RequestBody::None => true,
            RequestBody::Form(pairs) => pairs.is_empty(),
            RequestBody::Raw(bytes) => bytes.is_empty(),
        }
    }
}

impl From<&str> for RequestBody {
    fn from(s: &str) -> Self {
        RequestBody::Raw(s.as_bytes().to_vec())
    }
}

impl From<String> for RequestBody {
    fn from(s: String) -> Self {
        RequestBody::Raw(s.into_bytes())
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        RequestBody::Raw(bytes)
    }
}

impl From<Option<RequestBody>> for RequestBody {
    fn from(body: Option<RequestBody>) -> Self {
        body.unwrap_or_default()
    }
}

/// Result of interpreting one response with [`RestClient::exec`].
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub info: ResponseInfo,
    /// `None` when the status was >= 400.
    pub response: Option<ResponseBody>,
}

impl Exchange {
    pub fn is_success(&self) -> bool {
        self.response.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RestClient {
    headers: Vec<String>,
    cookies: BTreeMap<String, String>,
    timeout: Option<Duration>,
    credentials: Option<(String, String)>,
    decode: bool,
}

impl RestClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Send `Authorization: Basic` credentials with every call.
    pub fn basic_auth(&mut self, user: &str, pass: &str) -> &mut Self {
        self.credentials = Some((user.to_string(), pass.to_string()));
        self
    }

    /// Default decode flag for calls built by this client.
    pub fn decode(&mut self, decode: bool) -> &mut Self {
        self.decode = decode;
        self
    }

    /// Replace the header list, or add each line to it when `overwrite` is
    /// false. Lines must look like `Name: value`.
    pub fn set_headers<I, S>(&mut self, headers: I, overwrite: bool) -> Result<(), ApiError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if overwrite {
            let lines = headers
                .into_iter()
                .map(|h| parse_header_line(h.as_ref()).map(|_| h.as_ref().to_string()))
                .collect::<Result<Vec<_>, _>>()?;
            self.headers = lines;
            return Ok(());
        }
        for header in headers {
            self.add_header(header.as_ref())?;
        }
        Ok(())
    }

    /// Add one header line. Adding a line already present is a no-op.
    pub fn add_header(&mut self, header: &str) -> Result<(), ApiError> {
        parse_header_line(header)?;
        if !self.headers.iter().any(|h| h == header) {
            self.headers.push(header.to_string());
        }
        Ok(())
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn cookies(&self) -> &BTreeMap<String, String> {
        &self.cookies
    }

    /// Add or replace a cookie.
    pub fn set_cookie(&mut self, name: &str, value: &str) -> &mut Self {
        self.cookies.insert(name.to_string(), value.to_string());
        self
    }

    /// Returns false if no such cookie existed.
    pub fn delete_cookie(&mut self, name: &str) -> bool {
        self.cookies.remove(name).is_some()
    }

    /// The `Cookie` header value for the current jar, empty when the jar is.
    pub fn encode_cookies(&self) -> String {
        encoding::encode_cookies(&self.cookies)
    }

    pub fn get(&self, url: &str, params: impl Into<RequestBody>) -> HttpRequest {
        self.request(HttpMethod::Get, url, params)
    }

    pub fn post(&self, url: &str, body: impl Into<RequestBody>) -> HttpRequest {
        self.request(HttpMethod::Post, url, body)
    }

    pub fn put(&self, url: &str, body: impl Into<RequestBody>) -> HttpRequest {
        self.request(HttpMethod::Put, url, body)
    }

    pub fn delete(&self, url: &str, params: impl Into<RequestBody>) -> HttpRequest {
        self.request(HttpMethod::Delete, url, params)
    }

    /// Build a request carrying a multipart file envelope.
    pub fn file_request(&self, method: HttpMethod, url: &str, file: FileBody) -> HttpRequest {
        let mut req = self.request(method, url, RequestBody::Raw(file.body));
        req.headers.retain(|(n, _)| !n.eq_ignore_ascii_case("content-type"));
        req.headers.push(("Content-Type".to_string(), file.content_type));
        req
    }

    /// Freeze the client settings and `body` into a request.
    pub fn request(&self, method: HttpMethod, url: &str, body: impl Into<RequestBody>) -> HttpRequest {
        let body: RequestBody = body.into();
        let mut req = HttpRequest::new(method, url);
        req.decode = self.decode;
        req.timeout = self.timeout;
        req.headers = self
            .headers
            .iter()
            .filter_map(|line| parse_header_line(line).ok())
            .collect();

        let cookies = self.encode_cookies();
        if !cookies.is_empty() {
            req.headers.push(("Cookie".to_string(), cookies));
        }
        if let Some((user, pass)) = &self.credentials {
            let token = STANDARD.encode(format!("{user}:{pass}"));
            req.headers.push(("Authorization".to_string(), format!("Basic {token}")));
        }

        if body.is_empty() {
            return req;
        }
        if method.carries_body() {
            let bytes = match body {
                RequestBody::Form(pairs) => {
                    if req.header("content-type").is_none() {
                        req.headers.push((
                            "Content-Type".to_string(),
                            "application/x-www-form-urlencoded".to_string(),
                        ));
                    }
                    encoding::build_query(&pairs).into_bytes()
                }
                RequestBody::Raw(bytes) => bytes,
                RequestBody::None => Vec::new(),
            };
            req.body = Some(bytes);
        } else {
            let query = match &body {
                RequestBody::Form(pairs) => encoding::build_query(pairs),
                RequestBody::Raw(bytes) => String::from_utf8_lossy(bytes).into_owned(),
                RequestBody::None => String::new(),
            };
            req.url = encoding::append_query(&req.url, &query);
        }
        req
    }

    /// Interpret the response to `request`, logging through `tracing`.
    pub fn exec(&self, request: &HttpRequest, response: HttpResponse, elapsed: Duration) -> Exchange {
        self.exec_with_sink(request, response, elapsed, &TracingSink)
    }

    pub fn exec_with_sink<S>(
        &self,
        request: &HttpRequest,
        response: HttpResponse,
        elapsed: Duration,
        sink: &S,
    ) -> Exchange
    where
        S: DiagnosticSink + ?Sized,
    {
        match interpret(None, request, response, elapsed, sink) {
            Interpreted::Record(record) => {
                if record.status != 204 && record.body.is_empty() {
                    sink.record(&Diagnostic::EmptyBody {
                        url: record.info.url.clone(),
                        status: record.status,
                    });
                }
                Exchange {
                    info: record.info,
                    response: Some(record.body),
                }
            }
            Interpreted::Rejected(info) => Exchange { info, response: None },
        }
    }
}

/// Split a `Name: value` line.
fn parse_header_line(line: &str) -> Result<(String, String), ApiError> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| ApiError::InvalidHeader(line.to_string()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::InvalidHeader(line.to_string()));
    }
    Ok((name.to_string(), value.trim().to_string()))
}
