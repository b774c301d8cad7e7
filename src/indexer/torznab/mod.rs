//! Newznab/Torznab REST surface
//!
//! Re-exposes every configured indexer as a Newznab/Torznab endpoint so
//! that download automation tools can query it directly.
//!
//! # Endpoints
//!
//! - `GET /api/v1/indexer/{id}/newznab?t=caps` - Indexer capabilities
//! - `GET /api/v1/indexer/{id}/newznab?t=search&q=...` - General search
//! - `GET /api/v1/indexer/{id}/newznab?t=tvsearch&q=...` - TV search
//! - `GET /api/v1/indexer/{id}/newznab?t=movie&imdbid=...` - Movie search
//! - `GET /api/v1/indexer/{id}/api` - Alias of the above
//!
//! Every request must carry the configured `apikey`.

pub mod request;
pub mod response;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::get,
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::indexer::definitions::get_indexer_info;
use crate::indexer::manager::IndexerManager;
use request::TorznabRequest;
use response::{FeedInfo, TorznabError, TorznabResponse};

/// Application state for Torznab routes
#[derive(Clone)]
pub struct TorznabState {
    pub indexer_manager: Arc<IndexerManager>,
    /// `None` disables the key check
    pub api_key: Option<String>,
}

/// Create the Torznab router
pub fn router(state: TorznabState) -> Router {
    Router::new()
        .route("/api/v1/indexer/{id}/newznab", get(torznab_handler))
        .route("/api/v1/indexer/{id}/api", get(torznab_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn torznab_handler(
    State(state): State<TorznabState>,
    Path(indexer_id): Path<String>,
    Query(params): Query<TorznabRequest>,
) -> Response {
    if let Some(ref expected) = state.api_key {
        if params.apikey.as_deref() != Some(expected.as_str()) {
            return TorznabError::unauthorized("Invalid API Key").into_response();
        }
    }

    let manager = &state.indexer_manager;
    let Some(indexer) = manager.get(&indexer_id) else {
        return TorznabError::not_found("Indexer not found").into_response();
    };

    let caps = match manager.capabilities(&indexer_id).await {
        Ok(caps) => caps,
        Err(e) => {
            error!(indexer_id = %indexer_id, error = %e, "Failed to load capabilities");
            return TorznabError::from(&e).into_response();
        }
    };

    if params.is_caps() {
        return TorznabResponse::capabilities(indexer.name(), &caps).into_response();
    }

    let criteria = match params.to_criteria() {
        Ok(criteria) => criteria,
        Err(msg) => return TorznabError::bad_request(&msg).into_response(),
    };

    let search_type = criteria.search_type();
    if !caps.supports(search_type) {
        return TorznabError::function_not_available(&format!(
            "{} is not supported by this indexer",
            search_type
        ))
        .into_response();
    }

    debug!(
        indexer_id = %indexer_id,
        search_type = %search_type,
        query = %criteria.query_string(),
        "Torznab search"
    );

    // Dropping the handler (client went away) cancels the search
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let ids = [indexer_id.clone()];
    let mut results = manager.search(&criteria, Some(&ids[..]), &cancel).await;
    let Some(result) = results.pop() else {
        let until = manager
            .status(&indexer_id)
            .and_then(|s| s.disabled_until)
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        return TorznabError::indexer_error(&format!(
            "Indexer is disabled until {} due to recent failures",
            until
        ))
        .into_response();
    };

    if let Some(err) = result.error {
        error!(indexer_id = %indexer_id, error = %err, "Torznab search failed");
        return TorznabError::indexer_error(&err).into_response();
    }

    let description = get_indexer_info(&indexer.definition.implementation)
        .map(|info| info.description)
        .unwrap_or_default();
    let feed = FeedInfo {
        title: indexer.name(),
        description,
        link: &indexer.settings.base_url,
        protocol: indexer.protocol,
    };
    TorznabResponse::search_results(&feed, &result.releases).into_response()
}
