//! End-to-end scenarios E1-E8: a real upstream mock server per test, a real
//! template file on disk, and the full router driven via `tower::oneshot`.

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::body::Body;
use axum::http::Request;
use axum::routing::get;
use axum::Router;
use tower::ServiceExt;

use weave_server::config::ComposerConfig;
use weave_server::{build_router, ServerState};

async fn spawn_upstream(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn template_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("weave-golden-{}-{:?}", std::process::id(), std::thread::current().id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

async fn compose_with_template(html: &str, cfg_overrides: impl FnOnce(&mut ComposerConfig)) -> (u16, Vec<(String, String)>, String) {
    let dir = template_dir();
    std::fs::write(dir.join("index.html"), html).unwrap();

    let mut config = ComposerConfig::default();
    config.amd_loader_url = None;
    cfg_overrides(&mut config);

    let state = ServerState::new(config, dir.clone()).unwrap();
    let app = build_router(state);

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status().as_u16();
    let headers: Vec<(String, String)> = response
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
        .collect();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = String::from_utf8(body_bytes.to_vec()).unwrap();

    std::fs::remove_dir_all(&dir).ok();
    (status, headers, body)
}

#[tokio::test]
async fn e1_simple_sync_pair() {
    let a = spawn_upstream(Router::new().route("/1", get(|| async { "hello" }))).await;
    let b = spawn_upstream(Router::new().route("/2", get(|| async { "world" }))).await;

    let html = format!(
        r#"<fragment src="http://{a}/1"/><fragment src="http://{b}/2"/>"#,
        a = a,
        b = b
    );

    let (status, _headers, body) = compose_with_template(&html, |_| {}).await;
    assert_eq!(status, 200);
    assert_eq!(
        body,
        "<html><head></head><body>\
<script data-pipe>p.start(0)</script>hello<script data-pipe>p.end(0)</script>\
<script data-pipe>p.start(1)</script>world<script data-pipe>p.end(1)</script>\
</body></html>"
    );
}

#[tokio::test]
async fn e2_async_fragment_drains_after_body() {
    let a = spawn_upstream(Router::new().route("/1", get(|| async { "hello" }))).await;
    let html = format!(r#"<fragment async src="http://{a}/1"/>"#, a = a);

    let (status, _headers, body) = compose_with_template(&html, |_| {}).await;
    assert_eq!(status, 200);
    assert!(body.contains("<script data-pipe>p.placeholder(0)</script>"));
    let placeholder_pos = body.find("p.placeholder(0)").unwrap();
    let start_pos = body.find("p.start(0)").unwrap();
    assert!(start_pos > placeholder_pos, "fragment body must drain after the inline placeholder");
    assert!(body.contains("hello"));
    assert!(body.trim_end().ends_with("</body></html>"));
}

#[tokio::test]
async fn e3_primary_redirect_propagates_status_and_location() {
    let a = spawn_upstream(Router::new().route("/1", get(|| async { "a" }))).await;
    let mid = spawn_upstream(Router::new().route("/2", get(|| async {
        axum::http::Response::builder()
            .status(300)
            .header("location", "https://redirect")
            .body(Body::from("redir"))
            .unwrap()
    })))
    .await;
    let c = spawn_upstream(Router::new().route("/3", get(|| async { "c" }))).await;

    let html = format!(
        r#"<fragment src="http://{a}/1"/><fragment primary src="http://{mid}/2"/><fragment primary src="http://{c}/3"/>"#,
        a = a,
        mid = mid,
        c = c
    );

    let (status, headers, _body) = compose_with_template(&html, |_| {}).await;
    assert_eq!(status, 300);
    assert!(headers.iter().any(|(k, v)| k == "location" && v == "https://redirect"));
}

#[tokio::test]
async fn e4_primary_timeout_yields_500() {
    let slow = spawn_upstream(Router::new().route(
        "/1",
        get(|| async {
            tokio::time::sleep(std::time::Duration::from_millis(150)).await;
            "too late"
        }),
    ))
    .await;

    let html = format!(r#"<fragment primary timeout="50" src="http://{slow}/1"/>"#, slow = slow);
    let (status, _headers, _body) = compose_with_template(&html, |_| {}).await;
    assert_eq!(status, 500);
}

#[tokio::test]
async fn e5_fallback_success() {
    let failing = spawn_upstream(Router::new().route(
        "/1",
        get(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    ))
    .await;
    let fallback = spawn_upstream(Router::new().route("/1", get(|| async { "Fallback" }))).await;

    let html = format!(
        r#"<fragment src="http://{failing}/1" fallback-src="http://{fallback}/1"/>"#,
        failing = failing,
        fallback = fallback
    );
    let (status, _headers, body) = compose_with_template(&html, |_| {}).await;
    assert_eq!(status, 200);
    assert!(body.contains("Fallback"));
}

#[tokio::test]
async fn e7_gzip_body_is_transparently_decoded() {
    use async_compression::tokio::write::GzipEncoder;
    use tokio::io::AsyncWriteExt;

    let mut encoder = GzipEncoder::new(Vec::new());
    encoder.write_all(b"GZIPPED").await.unwrap();
    encoder.shutdown().await.unwrap();
    let gzipped = encoder.into_inner();

    let upstream = spawn_upstream(Router::new().route(
        "/1",
        get(move || {
            let gzipped = gzipped.clone();
            async move {
                axum::http::Response::builder()
                    .header("content-encoding", "gzip")
                    .body(Body::from(gzipped))
                    .unwrap()
            }
        }),
    ))
    .await;

    let html = format!(r#"<fragment src="http://{upstream}/1"/>"#, upstream = upstream);
    let (status, _headers, body) = compose_with_template(&html, |_| {}).await;
    assert_eq!(status, 200);
    assert!(body.contains("GZIPPED"));
}

#[tokio::test]
async fn e8_slot_composition() {
    let dir = template_dir();
    std::fs::write(
        dir.join("index.html"),
        r#"<html><head><script type="slot" name="head"></script></head><body>base</body></html>"#,
    )
    .unwrap();
    std::fs::write(dir.join("index.child.html"), r#"<meta slot="head" charset="utf-8">"#).unwrap();

    let config = ComposerConfig::default();
    let state = ServerState::new(config, dir.clone()).unwrap();
    let app = build_router(state);

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = String::from_utf8(body_bytes.to_vec()).unwrap();

    assert!(body.contains("<meta charset=\"utf-8\">") || body.contains("<meta slot=\"head\" charset=\"utf-8\">"));
    let head_end = body.find("</head>").unwrap();
    let body_start = body.find("<body>").unwrap();
    assert!(body.find("charset").unwrap() < head_end, "slotted content must land in head");
    let _ = body_start;

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn e9_public_flag_gates_cookie_forwarding() {
    let pub_upstream = spawn_upstream(Router::new().route(
        "/pub",
        get(|headers: axum::http::HeaderMap| async move {
            headers.get("cookie").and_then(|v| v.to_str().ok()).unwrap_or("none").to_string()
        }),
    ))
    .await;
    let priv_upstream = spawn_upstream(Router::new().route(
        "/priv",
        get(|headers: axum::http::HeaderMap| async move {
            headers.get("cookie").and_then(|v| v.to_str().ok()).unwrap_or("none").to_string()
        }),
    ))
    .await;

    let html = format!(
        r#"<fragment public src="http://{pub_upstream}/pub"/><fragment src="http://{priv_upstream}/priv"/>"#,
        pub_upstream = pub_upstream,
        priv_upstream = priv_upstream
    );

    let dir = template_dir();
    std::fs::write(dir.join("index.html"), &html).unwrap();
    let state = ServerState::new(ComposerConfig::default(), dir.clone()).unwrap();
    let app = build_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/")
                .header("cookie", "session=secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = String::from_utf8(body_bytes.to_vec()).unwrap();

    assert!(body.contains("session=secret"), "public fragment must receive the client's cookie");
    assert!(body.contains("none"), "non-public fragment must not receive the client's cookie");

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn health_check_returns_ok() {
    let state = ServerState::new(ComposerConfig::default(), template_dir()).unwrap();
    let app = build_router(state);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);
}
