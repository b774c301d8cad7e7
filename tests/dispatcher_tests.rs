//! Dispatcher behaviour against a local HTTP server

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use axum::{
    Router,
    extract::Path,
    http::{StatusCode, header},
    response::{IntoResponse, Redirect},
    routing::get,
};
use url::Url;

use indexer_pipeline::IndexerError;
use indexer_pipeline::http::{HttpDispatcher, HttpRequest};

async fn dispatcher_for(router: Router) -> (HttpDispatcher, Url) {
    let addr = common::spawn(router).await;
    let dispatcher = HttpDispatcher::new(&common::http_config()).unwrap();
    (dispatcher, Url::parse(&format!("http://{}/", addr)).unwrap())
}

#[tokio::test]
async fn test_429_with_retry_after_is_rate_limited() {
    let router = Router::new().route(
        "/api",
        get(|| async { (StatusCode::TOO_MANY_REQUESTS, [(header::RETRY_AFTER, "120")], "slow down") }),
    );
    let (dispatcher, base) = dispatcher_for(router).await;

    let err = dispatcher
        .execute(&HttpRequest::get(base.join("api").unwrap()))
        .await
        .unwrap_err();

    assert_matches!(err, IndexerError::RateLimited { retry_after, .. } if retry_after == Duration::from_secs(120));
}

async fn hop(Path(n): Path<u32>) -> impl IntoResponse {
    if n >= 100 {
        return "landed".into_response();
    }
    Redirect::temporary(&format!("/hop/{}", n + 1)).into_response()
}

#[tokio::test]
async fn test_redirect_chain_is_bounded() {
    let (dispatcher, base) = dispatcher_for(Router::new().route("/hop/{n}", get(hop))).await;

    let err = dispatcher
        .execute(&HttpRequest::get(base.join("hop/0").unwrap()))
        .await
        .unwrap_err();

    assert_matches!(err, IndexerError::TooManyRedirects { ref chain } if chain.len() == 6);
}

#[tokio::test]
async fn test_five_redirects_are_followed() {
    let (dispatcher, base) = dispatcher_for(Router::new().route("/hop/{n}", get(hop))).await;

    let response = dispatcher
        .execute(&HttpRequest::get(base.join("hop/95").unwrap()))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.content(), "landed");
    assert_eq!(response.redirects.len(), 5);
    assert!(response.url.path().ends_with("/hop/100"));
}

#[tokio::test]
async fn test_http_error_carries_status() {
    let router = Router::new().route("/missing", get(|| async { (StatusCode::NOT_FOUND, "nope") }));
    let (dispatcher, base) = dispatcher_for(router).await;

    let url = base.join("missing").unwrap();
    let err = dispatcher.execute(&HttpRequest::get(url.clone())).await.unwrap_err();
    assert_eq!(err.status(), Some(404));

    let response = dispatcher
        .execute(&HttpRequest::get(url).suppress_status(404))
        .await
        .unwrap();
    assert_eq!(response.status, 404);
}

#[tokio::test]
async fn test_rate_limit_spaces_requests_to_one_host() {
    let router = Router::new().route("/ping", get(|| async { "pong" }));
    let (dispatcher, base) = dispatcher_for(router).await;
    let request = HttpRequest::get(base.join("ping").unwrap())
        .with_rate_limit(Some(Duration::from_millis(300)));

    let started = tokio::time::Instant::now();
    for _ in 0..3 {
        dispatcher.execute(&request).await.unwrap();
    }

    assert!(started.elapsed() >= Duration::from_millis(600));
}
