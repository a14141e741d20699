use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::{app, Delayed};
use tower::ServiceExt;

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn get(uri: &str) -> Request<String> {
    Request::builder().uri(uri).body(String::new()).unwrap()
}

// --- echo ---

#[tokio::test]
async fn echo_returns_body_and_method() {
    let resp = app()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/echo")
                .header("content-type", "text/plain")
                .body("hello".to_string())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["x-echo-method"], "PUT");
    assert_eq!(resp.headers()["content-type"], "text/plain");
    assert_eq!(body_bytes(resp).await, "hello");
}

#[tokio::test]
async fn echo_defaults_to_octet_stream() {
    let resp = app().oneshot(get("/echo")).await.unwrap();
    assert_eq!(resp.headers()["content-type"], "application/octet-stream");
    assert!(body_bytes(resp).await.is_empty());
}

// --- headers ---

#[tokio::test]
async fn headers_lists_received_pairs() {
    let resp = app()
        .oneshot(
            Request::builder()
                .uri("/headers")
                .header("x-one", "1")
                .header("x-two", "2")
                .body(String::new())
                .unwrap(),
        )
        .await
        .unwrap();

    let pairs: Vec<(String, String)> = body_json(resp).await;
    assert!(pairs.contains(&("x-one".to_string(), "1".to_string())));
    assert!(pairs.contains(&("x-two".to_string(), "2".to_string())));
}

// --- status ---

#[tokio::test]
async fn status_returns_requested_code() {
    let resp = app().oneshot(get("/status/404")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app().oneshot(get("/status/503")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn status_rejects_non_numeric_code() {
    let resp = app().oneshot(get("/status/abc")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// --- delay ---

#[tokio::test]
async fn delay_reports_the_wait() {
    let resp = app().oneshot(get("/delay/5")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let d: Delayed = body_json(resp).await;
    assert_eq!(d.delayed_ms, 5);
}

// --- bytes ---

#[tokio::test]
async fn bytes_counts_up_and_wraps() {
    let resp = app().oneshot(get("/bytes/300")).await.unwrap();
    assert_eq!(resp.headers()["content-type"], "application/octet-stream");
    let body = body_bytes(resp).await;
    assert_eq!(body.len(), 300);
    assert_eq!(body[0], 0);
    assert_eq!(body[255], 255);
    assert_eq!(body[256], 0);
}

// --- redirect ---

#[tokio::test]
async fn redirect_steps_down_the_chain() {
    let resp = app().oneshot(get("/redirect/2")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(resp.headers()["location"], "/redirect/1");

    let resp = app().oneshot(get("/redirect/0")).await.unwrap();
    assert_eq!(resp.headers()["location"], "/echo");
}

// --- unknown ---

#[tokio::test]
async fn unknown_route_is_404() {
    let resp = app().oneshot(get("/nowhere")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
