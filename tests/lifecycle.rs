//! Listener lifecycle tests against a real socket.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::get;
use axum::Router;

use service_bootstrap::http::{routes, HttpServer, ServerError};
use service_bootstrap::lifecycle::DrainOutcome;

mod common;

use common::Capture;

async fn slow(delay: Duration) -> &'static str {
    tokio::time::sleep(delay).await;
    "done"
}

async fn peer_reset() -> &'static str {
    std::panic::panic_any(io::Error::from(io::ErrorKind::ConnectionReset))
}

async fn handler_bug() -> &'static str {
    panic!("handler bug")
}

fn slow_routes(delay: Duration) -> Router {
    routes::router().route("/slow", get(move || slow(delay)))
}

#[tokio::test]
async fn serves_requests_through_the_pipeline() {
    let capture = Capture::default();
    let _guard = capture.install();
    let server = common::start_server(routes::router(), Duration::from_secs(5)).await;
    let client = common::client();

    let res = client.get(server.url("/healthz")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), r#"{"status":"ok"}"#);

    let res = client
        .post(server.url("/echo"))
        .body("plain text")
        .send()
        .await
        .unwrap();
    assert_eq!(res.text().await.unwrap(), "plain text");

    let report = server.stop().await;
    assert_eq!(report.outcome, DrainOutcome::Drained);

    let records = capture.records("access_log");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].field("ip"), Some("127.0.0.1"));
    assert_eq!(records[1].field("data"), Some("plain text"));
}

#[tokio::test]
async fn in_flight_request_completes_during_drain() {
    let capture = Capture::default();
    let _guard = capture.install();
    let server =
        common::start_server(slow_routes(Duration::from_millis(300)), Duration::from_secs(5)).await;
    let client = common::client();

    let url = server.url("/slow");
    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.get(url).send().await?.text().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let addr = server.addr;
    let report = server.stop().await;
    assert_eq!(report.outcome, DrainOutcome::Drained);
    assert_eq!(pending.await.unwrap().unwrap(), "done");

    // the listener is closed once shutdown starts
    let refused = client.get(format!("http://{addr}/healthz")).send().await;
    assert!(refused.is_err());

    let messages: Vec<_> = capture
        .records("service_bootstrap::http::server")
        .into_iter()
        .filter_map(|r| r.field("message").map(str::to_string))
        .collect();
    assert!(messages.iter().any(|m| m == "Shutting down..."));
}

#[tokio::test]
async fn drain_deadline_closes_remaining_connections() {
    let server =
        common::start_server(slow_routes(Duration::from_secs(30)), Duration::from_millis(200)).await;
    let client = common::client();

    let url = server.url("/slow");
    let pending = tokio::spawn(async move { client.get(url).send().await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let report = server.stop().await;
    assert_eq!(report.outcome, DrainOutcome::TimedOut { forced: 1 });
    assert!(started.elapsed() < Duration::from_secs(5));

    let result = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .expect("client should observe the closed connection")
        .unwrap();
    assert!(result.is_err());
}

#[tokio::test]
async fn transport_fault_drops_the_connection() {
    let capture = Capture::default();
    let _guard = capture.install();
    let routes = routes::router()
        .route("/gone", get(peer_reset))
        .route("/panic", get(handler_bug));
    let server = common::start_server(routes, Duration::from_secs(5)).await;
    let client = common::client();

    let dropped = client.get(server.url("/gone")).send().await;
    assert!(dropped.is_err());

    let res = client.get(server.url("/panic")).send().await.unwrap();
    assert_eq!(res.status(), 500);

    let res = client.get(server.url("/healthz")).send().await.unwrap();
    assert_eq!(res.status(), 200);

    server.stop().await;

    let recovered = capture.records("panic_recovery");
    assert_eq!(recovered.len(), 2);
    assert_eq!(recovered[0].level, tracing::Level::INFO);
    assert_eq!(recovered[1].level, tracing::Level::ERROR);
    assert_eq!(capture.records("access_log").len(), 1);
}

#[tokio::test]
async fn occupied_port_fails_to_bind() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = common::local_config();
    config.port = taken.local_addr().unwrap().port();

    let err = HttpServer::new(Arc::new(config), routes::router())
        .bind()
        .await
        .err()
        .expect("bind should fail");
    assert!(matches!(err, ServerError::Bind { .. }));
}
