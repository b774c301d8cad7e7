//! Service wiring and HTTP router construction.
//!
//! Used by `main` and by integration tests to assemble the pipeline from a
//! [`Config`].

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tracing::{info, warn};

use crate::config::Config;
use crate::http::HttpDispatcher;
use crate::indexer::torznab::{self, TorznabState};
use crate::indexer::{
    BroadcastEventSink, FileSettingsStore, IndexerDefinition, IndexerManager, IndexerPipeline,
};

/// Shared services behind the HTTP surface and the CLI
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub manager: Arc<IndexerManager>,
    pub events: Arc<BroadcastEventSink>,
}

impl AppState {
    /// Build the dispatcher, pipeline and manager, then load the definitions file
    pub async fn build(config: Config) -> Result<Self> {
        let dispatcher =
            Arc::new(HttpDispatcher::new(&config.http).context("Failed to build HTTP client")?);
        let store = Arc::new(FileSettingsStore::new(&config.session_store_path));
        let events = Arc::new(BroadcastEventSink::default());
        let pipeline = Arc::new(IndexerPipeline::new(
            dispatcher,
            store,
            events.clone(),
            config.pipeline.clone(),
        ));
        let manager = Arc::new(IndexerManager::new(pipeline));

        let definitions = load_definitions(&config.definitions_path).await?;
        let total = definitions.len();
        for (id, e) in manager.load(definitions) {
            warn!(indexer_id = %id, error = %e, "Skipping indexer with invalid definition");
        }
        info!(loaded = manager.list().len(), total, "Indexers loaded");

        Ok(Self {
            config: Arc::new(config),
            manager,
            events,
        })
    }
}

/// Read indexer definitions from a JSON array. A missing file yields none.
pub async fn load_definitions(path: &Path) -> Result<Vec<IndexerDefinition>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse indexer definitions {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "Indexer definitions file not found");
            Ok(vec![])
        }
        Err(e) => {
            Err(e).with_context(|| format!("Failed to read indexer definitions {}", path.display()))
        }
    }
}

/// Build the full Axum router (Torznab surface with tracing)
pub fn build_app(state: &AppState) -> Router {
    torznab::router(TorznabState {
        indexer_manager: state.manager.clone(),
        api_key: state.config.api_key.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_definitions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("indexers.json");
        tokio::fs::write(
            &path,
            r#"[{"id":"nzb","name":"Nzb","implementation":"newznab","protocol":"usenet",
                "settings":{"base_url":"https://nzb.example","api_key":"k"}}]"#,
        )
        .await
        .unwrap();

        let defs = load_definitions(&path).await.unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].implementation, "newznab");

        let missing = load_definitions(&dir.path().join("none.json")).await.unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_load_definitions_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("indexers.json");
        tokio::fs::write(&path, "not json").await.unwrap();
        assert!(load_definitions(&path).await.is_err());
    }
}
