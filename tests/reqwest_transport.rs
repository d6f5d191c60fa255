//! The default reqwest transport against a local mock server.

use std::sync::Arc;
use std::time::Duration;

use http::HeaderValue;
use http::header::USER_AGENT;
use resilient_fetch::{
    FetchOrchestrator, ReqwestTransport, Transport, TransportError, TransportRequest,
};
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(url: &str) -> TransportRequest {
    TransportRequest::get(Url::parse(url).unwrap(), Duration::from_secs(5))
}

#[tokio::test]
async fn sends_headers_and_params_and_reads_cookies() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs"))
        .and(query_param("q", "rust"))
        .and(header("user-agent", "resilient-test"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html>jobs</html>")
                .insert_header("set-cookie", "sid=abc; Path=/"),
        )
        .mount(&server)
        .await;

    let transport = ReqwestTransport::new().unwrap();
    let mut req = request(&format!("{}/jobs", server.uri()))
        .with_params(vec![("q".into(), "rust".into())]);
    req.headers.insert(USER_AGENT, HeaderValue::from_static("resilient-test"));

    let response = transport.get(&req).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body, "<html>jobs</html>");
    assert_eq!(response.cookies.get("sid").map(String::as_str), Some("abc"));
    assert_eq!(response.url.path(), "/jobs");
}

#[tokio::test]
async fn reports_error_statuses_as_responses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let transport = ReqwestTransport::new().unwrap();
    let response = transport.get(&request(&server.uri())).await.unwrap();
    assert_eq!(response.status, 429);
    assert!(!response.is_ok());
}

#[tokio::test]
async fn slow_responses_time_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let transport = ReqwestTransport::new().unwrap();
    let req = TransportRequest::get(Url::parse(&server.uri()).unwrap(), Duration::from_millis(200));
    let err = transport.get(&req).await.unwrap_err();
    assert!(matches!(err, TransportError::Timeout(timeout) if timeout == Duration::from_millis(200)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn refused_connections_are_retryable() {
    let transport = ReqwestTransport::new().unwrap();
    let err = transport.get(&request("http://127.0.0.1:1/")).await.unwrap_err();
    assert!(err.is_retryable(), "unexpected error {err:?}");
}

#[tokio::test]
async fn orchestrator_retries_a_flaky_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/listing"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/listing"))
        .respond_with(ResponseTemplate::new(200).set_body_string("listing"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let fetcher = FetchOrchestrator::builder()
        .with_transport(Arc::new(ReqwestTransport::new().unwrap()))
        .with_session_dir(dir.path())
        .with_base_delay(Duration::from_millis(10))
        .with_delay_range(Duration::from_millis(5), Duration::from_millis(10))
        .disable_session_warmup()
        .build()
        .unwrap();

    let body = fetcher.fetch(&format!("{}/listing", server.uri())).await.unwrap();
    assert_eq!(body, "listing");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}
