//! `HttpFetcher` against a local mock server.

use std::sync::Arc;
use std::time::Duration;

use http::Method;
use hypercat_net::{
    Fetcher, HttpFetcher, LoaderConfig, NetError, Request, RequestInterceptor, ResponseSource,
};
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(LoaderConfig {
        default_timeout: Duration::from_millis(500),
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
async fn fetch_streams_body_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/poses/cat.webp"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/webp")
                .set_body_bytes(vec![1u8, 2, 3, 4]),
        )
        .mount(&server)
        .await;

    let url = format!("{}/poses/cat.webp", server.uri());
    let response = fetcher().fetch(&Request::get(url)).await.unwrap();

    assert!(response.ok());
    assert_eq!(response.content_type(), Some("image/webp"));
    assert_eq!(response.bytes().await.unwrap().as_ref(), &[1, 2, 3, 4]);
}

#[tokio::test]
async fn fetch_forwards_request_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .and(header("accept", "text/html"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .expect(1)
        .mount(&server)
        .await;

    let request = Request::get(format!("{}/", server.uri())).accept("text/html");
    let response = fetcher().fetch(&request).await.unwrap();

    assert_eq!(response.text().await.unwrap(), "<html></html>");
}

#[tokio::test]
async fn passthrough_forwards_request_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/likes"))
        .and(body_string("pose=42"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let interceptor = RequestInterceptor::new(Arc::new(fetcher()));
    let request = Request::new(Method::POST, format!("{}/api/likes", server.uri())).body("pose=42");
    let result = interceptor.dispatch(request).await.unwrap();

    assert_eq!(result.source, ResponseSource::Network);
    assert_eq!(result.response.status, 201);
}

#[tokio::test]
async fn error_status_is_a_successful_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let response = fetcher()
        .fetch(&Request::get(format!("{}/missing.css", server.uri())))
        .await
        .unwrap();

    assert_eq!(response.status, 404);
    assert_eq!(response.status_text, "Not Found");
    assert!(!response.ok());
}

#[tokio::test]
async fn slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let result = fetcher()
        .fetch(&Request::get(format!("{}/slow.js", server.uri())))
        .await;

    match result {
        Err(NetError::Timeout(after)) => assert_eq!(after, Duration::from_millis(500)),
        other => panic!("expected a timeout, got {:?}", other),
    }
}
