//! Fan-out isolation and the re-exposed Torznab surface

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, extract::Query, routing::get};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{CAPS, definition, feed, xml};
use indexer_pipeline::indexer::torznab::{self, TorznabState};
use indexer_pipeline::indexer::{EventType, IndexerManager, PipelineConfig, SearchCriteria};

const AUTH_ERROR: &str = r#"<?xml version="1.0" encoding="UTF-8"?><error code="100" description="Incorrect user credentials"/>"#;

/// One healthy indexer at `/good/api` and one rejecting its key at `/bad/api`
async fn two_indexers() -> Arc<IndexerManager> {
    let api = |items: usize| {
        get(move |Query(q): Query<HashMap<String, String>>| async move {
            match q.get("t").map(String::as_str) {
                Some("caps") => xml(CAPS.to_string()),
                _ => xml(feed(0, items)),
            }
        })
    };
    let router = Router::new()
        .route("/good/api", api(3))
        .route("/bad/api", get(|| async { xml(AUTH_ERROR.to_string()) }));
    let addr = common::spawn(router).await;

    let (pipeline, _) = common::pipeline();
    let manager = Arc::new(IndexerManager::new(pipeline));
    let failures = manager.load(vec![
        definition("good", "torznab", json!({"base_url": format!("http://{}/good", addr), "api_key": "k"})),
        definition("bad", "torznab", json!({"base_url": format!("http://{}/bad", addr), "api_key": "k"})),
    ]);
    assert!(failures.is_empty());
    manager
}

#[tokio::test]
async fn test_failing_indexer_does_not_affect_others() {
    let manager = two_indexers().await;
    let cancel = CancellationToken::new();

    let mut results = manager.search(&SearchCriteria::search("release"), None, &cancel).await;
    results.sort_by(|a, b| a.indexer_id.cmp(&b.indexer_id));

    assert_eq!(results.len(), 2);
    let (bad, good) = (&results[0], &results[1]);
    assert_eq!(good.indexer_id, "good");
    assert!(good.is_success());
    assert_eq!(good.releases.len(), 3);
    assert_eq!(bad.error_kind.as_deref(), Some("auth"));
    assert!(bad.releases.is_empty());

    let status = manager.status("bad").unwrap();
    assert_eq!(status.escalation_level, 1);
    assert!(status.disabled_until.is_some());
    assert!(manager.status("good").is_none_or(|s| s.escalation_level == 0));

    // the failed indexer sits out its back-off
    let results = manager.search(&SearchCriteria::search("release"), None, &cancel).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].indexer_id, "good");
}

#[tokio::test]
async fn test_timed_out_search_emits_failed_event() {
    let router = Router::new().route(
        "/slow/api",
        get(|Query(q): Query<HashMap<String, String>>| async move {
            if q.get("t").map(String::as_str) != Some("caps") {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            xml(CAPS.to_string())
        }),
    );
    let addr = common::spawn(router).await;

    let (pipeline, events) = common::pipeline_with(PipelineConfig {
        search_timeout: Duration::from_millis(300),
        ..Default::default()
    });
    let mut rx = events.subscribe();
    let manager = IndexerManager::new(pipeline);
    manager.load(vec![definition(
        "slow",
        "torznab",
        json!({"base_url": format!("http://{}/slow", addr), "api_key": "k"}),
    )]);

    let results = manager
        .search(&SearchCriteria::search("release"), None, &CancellationToken::new())
        .await;
    assert_eq!(results[0].error_kind.as_deref(), Some("timeout"));

    let queries: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
        .filter(|e| e.event_type == EventType::Query)
        .collect();
    assert_eq!(queries.len(), 1);
    assert!(!queries[0].success);
    assert_eq!(queries[0].indexer_id, "slow");
    assert_eq!(queries[0].release_count, 0);
    assert!(queries[0].elapsed_ms >= 300);
}

async fn serve_torznab(manager: Arc<IndexerManager>) -> String {
    let router = torznab::router(TorznabState {
        indexer_manager: manager,
        api_key: Some("secret".to_string()),
    });
    let addr = common::spawn(router).await;
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_torznab_caps_and_search() {
    let base = serve_torznab(two_indexers().await).await;
    let client = reqwest::Client::new();

    let caps = client
        .get(format!("{}/api/v1/indexer/good/newznab?t=caps&apikey=secret", base))
        .send()
        .await
        .unwrap();
    assert_eq!(caps.status(), 200);
    let body = caps.text().await.unwrap();
    assert!(body.contains(r#"<limits default="100" max="100"/>"#));
    assert!(body.contains(r#"<movie-search available="yes" supportedParams="q,imdbid"/>"#));

    let search = client
        .get(format!("{}/api/v1/indexer/good/api?t=search&q=release&apikey=secret", base))
        .send()
        .await
        .unwrap();
    assert_eq!(search.status(), 200);
    let body = search.text().await.unwrap();
    assert_eq!(body.matches("<item>").count(), 3);
    assert!(body.contains(r#"<torznab:attr name="seeders" value="12"/>"#));
}

#[tokio::test]
async fn test_torznab_errors() {
    let base = serve_torznab(two_indexers().await).await;
    let client = reqwest::Client::new();
    let get = |path: String| {
        let client = client.clone();
        let base = base.clone();
        async move {
            let response = client.get(format!("{}{}", base, path)).send().await.unwrap();
            (response.status().as_u16(), response.text().await.unwrap())
        }
    };

    let (status, body) = get("/api/v1/indexer/good/newznab?t=caps&apikey=wrong".to_string()).await;
    assert_eq!(status, 401);
    assert!(body.contains(r#"code="100""#));

    let (status, body) = get("/api/v1/indexer/nope/newznab?t=caps&apikey=secret".to_string()).await;
    assert_eq!(status, 404);
    assert!(body.contains(r#"code="201""#));

    let (status, body) = get("/api/v1/indexer/good/newznab?t=book&apikey=secret".to_string()).await;
    assert_eq!(status, 400);
    assert!(body.contains(r#"code="203""#));

    let (status, body) = get("/api/v1/indexer/bad/newznab?t=caps&apikey=secret".to_string()).await;
    assert_eq!(status, 500);
    assert!(body.contains(r#"code="900""#));
}
