//! Shared helpers for the integration tests: local mock indexers and a
//! ready-to-use pipeline.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use parking_lot::Mutex;

use indexer_pipeline::http::{HttpConfig, HttpDispatcher, RetryConfig};
use indexer_pipeline::indexer::{
    BroadcastEventSink, IndexerDefinition, IndexerPipeline, MemorySettingsStore, PipelineConfig,
};

/// Serve `router` on an ephemeral local port
pub async fn spawn(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Query strings seen by a mock, in arrival order
#[derive(Clone, Default)]
pub struct RequestLog(Arc<Mutex<Vec<String>>>);

impl RequestLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.0.lock().iter().filter(|e| e.contains(needle)).count()
    }
}

pub fn http_config() -> HttpConfig {
    HttpConfig {
        retry: RetryConfig::none(),
        ..Default::default()
    }
}

pub fn pipeline() -> (Arc<IndexerPipeline>, Arc<BroadcastEventSink>) {
    pipeline_with(PipelineConfig::default())
}

pub fn pipeline_with(config: PipelineConfig) -> (Arc<IndexerPipeline>, Arc<BroadcastEventSink>) {
    let dispatcher = Arc::new(HttpDispatcher::new(&http_config()).unwrap());
    let events = Arc::new(BroadcastEventSink::new(64));
    let pipeline = Arc::new(IndexerPipeline::new(
        dispatcher,
        Arc::new(MemorySettingsStore::new()),
        events.clone(),
        config,
    ));
    (pipeline, events)
}

pub fn definition(id: &str, implementation: &str, settings: serde_json::Value) -> IndexerDefinition {
    IndexerDefinition {
        id: id.to_string(),
        name: id.to_uppercase(),
        implementation: implementation.to_string(),
        protocol: None,
        enabled: true,
        tags: vec![],
        settings,
    }
}

pub const CAPS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<caps>
  <server title="Mock"/>
  <limits max="100" default="100"/>
  <searching>
    <search available="yes" supportedParams="q"/>
    <tv-search available="yes" supportedParams="q,tvdbid,season,ep"/>
    <movie-search available="yes" supportedParams="q,imdbid"/>
  </searching>
  <categories>
    <category id="2000" name="Movies">
      <subcat id="2040" name="HD"/>
    </category>
    <category id="5000" name="TV">
      <subcat id="5030" name="SD"/>
    </category>
  </categories>
</caps>"#;

/// A Torznab feed with `count` items numbered from `start`
pub fn feed(start: usize, count: usize) -> String {
    let items: String = (start..start + count)
        .map(|i| {
            format!(
                r#"<item>
  <title>Release.{i}</title>
  <guid>https://mock.example/details/{i}</guid>
  <link>https://mock.example/dl/{i}.torrent</link>
  <pubDate>Mon, 06 Jan 2025 08:00:00 +0000</pubDate>
  <torznab:attr name="category" value="5030"/>
  <torznab:attr name="seeders" value="12"/>
  <torznab:attr name="peers" value="15"/>
  <torznab:attr name="size" value="1000"/>
</item>"#
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:torznab="http://torznab.com/schemas/2015/feed"><channel><title>Mock</title>{items}</channel></rss>"#
    )
}

pub fn xml(body: String) -> ([(axum::http::HeaderName, &'static str); 1], String) {
    ([(axum::http::header::CONTENT_TYPE, "application/rss+xml")], body)
}
