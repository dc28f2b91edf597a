//! HTTP server used to exercise the client end to end.
//!
//! Routes:
//! - `ANY /status/{code}`: answers with `code` and body `status-{code}`
//!   (no body for 204 and 304).
//! - `ANY /echo`: describes the request it received as JSON.
//! - `GET /delay/{ms}/{tag}`: sleeps `ms` milliseconds, then answers `tag`.
//! - `GET /json/{tag}`: answers `{"tag": tag}`.

use std::collections::BTreeMap;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::Path,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

/// What `/echo` saw.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Echo {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    /// Header names lowercased; repeated headers keep the last value.
    pub headers: BTreeMap<String, String>,
    /// The `Cookie` header split and percent-decoded.
    pub cookies: BTreeMap<String, String>,
    pub body: String,
}

pub fn app() -> Router {
    Router::new()
        .route("/status/{code}", any(status))
        .route("/echo", any(echo))
        .route("/delay/{ms}/{tag}", get(delay))
        .route("/json/{tag}", get(json_tag))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "mock server listening");
    }
    axum::serve(listener, app()).await
}

async fn status(Path(code): Path<u16>) -> Response {
    let Ok(status) = StatusCode::from_u16(code) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
        return status.into_response();
    }
    (status, format!("status-{code}")).into_response()
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<Echo> {
    let headers: BTreeMap<String, String> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    let cookies = headers
        .get("cookie")
        .map(|raw| parse_cookies(raw))
        .unwrap_or_default();

    Json(Echo {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers,
        cookies,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

async fn delay(Path((ms, tag)): Path<(u64, String)>) -> String {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    tag
}

async fn json_tag(Path(tag): Path<String>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "tag": tag }))
}

fn parse_cookies(raw: &str) -> BTreeMap<String, String> {
    raw.split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            Some((decode(name), decode(value)))
        })
        .collect()
}

fn decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}
