//! HTTP fixture server for exercising the reference engine end to end.
//!
//! Every route is deterministic so tests can assert exact bodies, headers
//! and timings.

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::Path,
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Redirect},
    routing::{any, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::debug;

/// Longest delay `/delay/{ms}` will honour.
pub const MAX_DELAY_MS: u64 = 10_000;
/// Largest body `/bytes/{n}` will produce.
pub const MAX_BYTES: usize = 1 << 20;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Delayed {
    pub delayed_ms: u64,
}

pub fn app() -> Router {
    Router::new()
        .route("/echo", any(echo))
        .route("/headers", any(headers))
        .route("/status/{code}", any(status))
        .route("/delay/{ms}", get(delay))
        .route("/bytes/{n}", get(bytes))
        .route("/redirect/{n}", get(redirect))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

/// Body back verbatim, with the method in `x-echo-method`.
async fn echo(method: Method, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    debug!(%method, len = body.len(), "echo");
    (
        [("content-type", content_type), ("x-echo-method", method.to_string())],
        body,
    )
}

/// Received headers as `[name, value]` pairs, in arrival order.
async fn headers(headers: HeaderMap) -> Json<Vec<(String, String)>> {
    Json(
        headers
            .iter()
            .map(|(name, value)| (name.to_string(), String::from_utf8_lossy(value.as_bytes()).into_owned()))
            .collect(),
    )
}

async fn status(Path(code): Path<u16>) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

async fn delay(Path(ms): Path<u64>) -> Json<Delayed> {
    let ms = ms.min(MAX_DELAY_MS);
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Json(Delayed { delayed_ms: ms })
}

/// `n` bytes counting up from zero and wrapping, so every byte value appears.
async fn bytes(Path(n): Path<usize>) -> impl IntoResponse {
    let body: Vec<u8> = (0..n.min(MAX_BYTES)).map(|i| i as u8).collect();
    ([("content-type", "application/octet-stream")], body)
}

/// Redirect chain of length `n` ending at `/echo`.
async fn redirect(Path(n): Path<u32>) -> Redirect {
    if n == 0 {
        Redirect::temporary("/echo")
    } else {
        Redirect::temporary(&format!("/redirect/{}", n - 1))
    }
}
