//! Fetcher contract tests against an in-process fixture upstream.
//!
//! The fixture binds 127.0.0.1:0; nothing here leaves the machine. Redirect
//! targets use https + routable-looking hosts so the validator gates, not
//! the network, decide the outcome.

use axum::Router;
use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use pictor_core::{HostAllowlist, PictorError};
use pictor_pipeline::fetch::Fetcher;
use std::net::SocketAddr;
use std::time::Duration;

const MAX_BYTES: u64 = 1024 * 1024;
const TIMEOUT: Duration = Duration::from_secs(5);

fn allowlist() -> HostAllowlist {
    HostAllowlist::new(["upstream.example.com"])
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn fetch(addr: SocketAddr, path: &str) -> Result<pictor_pipeline::FetchedImage, PictorError> {
    fetch_with(addr, path, TIMEOUT, MAX_BYTES).await
}

async fn fetch_with(
    addr: SocketAddr,
    path: &str,
    timeout: Duration,
    max_bytes: u64,
) -> Result<pictor_pipeline::FetchedImage, PictorError> {
    let fetcher = Fetcher::new().unwrap();
    fetcher
        .fetch(&format!("http://{addr}{path}"), timeout, max_bytes, &allowlist())
        .await
}

fn png_response(len: usize) -> Response {
    (
        [(header::CONTENT_TYPE, "image/png")],
        vec![0x89u8; len],
    )
        .into_response()
}

#[tokio::test]
async fn successful_fetch_returns_bytes_and_normalized_content_type() {
    let app = Router::new().route(
        "/img",
        get(|| async { ([(header::CONTENT_TYPE, "IMAGE/PNG; charset=binary")], b"pngbytes".to_vec()) }),
    );
    let addr = serve(app).await;

    let fetched = fetch(addr, "/img").await.unwrap();
    assert_eq!(fetched.bytes.as_ref(), b"pngbytes");
    assert_eq!(fetched.content_type, "image/png");
    assert_eq!(fetched.original_size, 8);
}

#[tokio::test]
async fn non_image_content_type_is_rejected() {
    let app = Router::new().route("/page", get(|| async { "<html>not an image</html>" }));
    let addr = serve(app).await;

    let err = fetch(addr, "/page").await.unwrap_err();
    assert_eq!(err.code(), "INVALID_CONTENT_TYPE");
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn upstream_403_is_remapped_to_502() {
    let app = Router::new().route("/denied", get(|| async { StatusCode::FORBIDDEN }));
    let addr = serve(app).await;

    let err = fetch(addr, "/denied").await.unwrap_err();
    assert_eq!(err, PictorError::Upstream { status: 502 });
}

#[tokio::test]
async fn upstream_404_and_500_are_relayed() {
    let app = Router::new()
        .route("/gone", get(|| async { StatusCode::NOT_FOUND }))
        .route("/boom", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
    let addr = serve(app).await;

    assert_eq!(
        fetch(addr, "/gone").await.unwrap_err(),
        PictorError::Upstream { status: 404 }
    );
    assert_eq!(
        fetch(addr, "/boom").await.unwrap_err(),
        PictorError::Upstream { status: 500 }
    );
}

#[tokio::test]
async fn empty_body_is_an_error() {
    let app = Router::new().route(
        "/empty",
        get(|| async { ([(header::CONTENT_TYPE, "image/png")], Vec::<u8>::new()) }),
    );
    let addr = serve(app).await;

    assert_eq!(fetch(addr, "/empty").await.unwrap_err(), PictorError::EmptyBody);
}

#[tokio::test]
async fn declared_oversize_fails_fast() {
    let app = Router::new().route("/big", get(|| async { png_response(256 * 1024) }));
    let addr = serve(app).await;

    let err = fetch_with(addr, "/big", TIMEOUT, 1024).await.unwrap_err();
    assert_eq!(err, PictorError::ImageTooLarge);
    assert_eq!(err.status_code(), 413);
}

#[tokio::test]
async fn lying_content_length_is_caught_mid_stream() {
    // Chunked response: no Content-Length to fail fast on, so the streamed
    // byte meter has to do the cutoff.
    let app = Router::new().route(
        "/chunked",
        get(|| async {
            let chunks = (0..64).map(|_| Ok::<_, std::io::Error>(bytes::Bytes::from(vec![0u8; 1024])));
            (
                [(header::CONTENT_TYPE, "image/png")],
                Body::from_stream(futures_util::stream::iter(chunks)),
            )
        }),
    );
    let addr = serve(app).await;

    let err = fetch_with(addr, "/chunked", TIMEOUT, 4 * 1024).await.unwrap_err();
    assert_eq!(err, PictorError::ImageTooLarge);
}

#[tokio::test]
async fn deadline_covers_the_whole_call() {
    let app = Router::new().route(
        "/slow",
        get(|| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            png_response(8)
        }),
    );
    let addr = serve(app).await;

    let err = fetch_with(addr, "/slow", Duration::from_millis(100), MAX_BYTES).await.unwrap_err();
    assert_eq!(err, PictorError::UpstreamTimeout);
    assert_eq!(err.status_code(), 504);
}

#[tokio::test]
async fn redirect_without_location_is_invalid() {
    let app = Router::new().route("/hop", get(|| async { StatusCode::FOUND }));
    let addr = serve(app).await;

    let err = fetch(addr, "/hop").await.unwrap_err();
    assert_eq!(err, PictorError::InvalidRedirect);
    assert_eq!(err.status_code(), 502);
}

#[tokio::test]
async fn redirect_to_loopback_is_blocked() {
    let app = Router::new().route(
        "/hop",
        get(|| async {
            (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, "https://127.0.0.1/steal")]).into_response()
        }),
    );
    let addr = serve(app).await;

    let err = fetch(addr, "/hop").await.unwrap_err();
    assert_eq!(err.code(), "REDIRECT_BLOCKED");
    assert_eq!(err.status_code(), 403);
}

#[tokio::test]
async fn redirect_to_private_range_is_blocked() {
    let app = Router::new().route(
        "/hop",
        get(|| async {
            (StatusCode::TEMPORARY_REDIRECT, [(header::LOCATION, "https://169.254.169.254/latest/meta-data")])
                .into_response()
        }),
    );
    let addr = serve(app).await;

    assert_eq!(fetch(addr, "/hop").await.unwrap_err().code(), "REDIRECT_BLOCKED");
}

#[tokio::test]
async fn redirect_to_unlisted_domain_is_blocked() {
    let app = Router::new().route(
        "/hop",
        get(|| async {
            (StatusCode::FOUND, [(header::LOCATION, "https://evil.example/img.png")]).into_response()
        }),
    );
    let addr = serve(app).await;

    assert_eq!(fetch(addr, "/hop").await.unwrap_err().code(), "REDIRECT_BLOCKED");
}

#[tokio::test]
async fn connection_refused_is_a_fetch_failure() {
    // Bind a port, then free it so the connect is refused.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let fetcher = Fetcher::new().unwrap();
    let err = fetcher
        .fetch(&format!("http://{addr}/x"), TIMEOUT, MAX_BYTES, &allowlist())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FETCH_FAILED");
    assert_eq!(err.status_code(), 502);
}
