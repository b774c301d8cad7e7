//! Indexer capabilities and the capability cache
//!
//! Capabilities describe what an indexer can search for, how large its pages
//! are and which categories it knows. Fetching them costs a request against a
//! rate-limited endpoint, so they are cached per indexer and fetched at most
//! once at a time.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::categories::{CategoryMap, TORZNAB_CATEGORIES, TorznabCategory, cats, get_category};
use super::definitions::IndexerSettings;
use super::parser::check_xml_error;
use super::session::{AuthStrategy, SessionState};
use super::types::{BookSearchParam, MovieSearchParam, MusicSearchParam, SearchType, TvSearchParam};
use crate::error::{IndexerError, Result};
use crate::http::HttpDispatcher;

/// Page size assumed when an indexer does not advertise one
pub const DEFAULT_LIMIT: u32 = 100;

/// How long fetched capabilities stay valid
pub const FETCHED_CAPABILITIES_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// What an indexer supports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerCapabilities {
    /// Default results per page
    pub limits_default: u32,
    /// Maximum results per page
    pub limits_max: u32,

    /// Whether basic search is available
    pub search_available: bool,
    /// Whether raw search is supported
    pub supports_raw_search: bool,

    pub tv_search_params: Vec<TvSearchParam>,
    pub movie_search_params: Vec<MovieSearchParam>,
    pub music_search_params: Vec<MusicSearchParam>,
    pub book_search_params: Vec<BookSearchParam>,

    /// Several id parameters may be combined in one request
    pub supports_aggregate_id_search: bool,

    pub categories: CategoryMap,
}

impl Default for IndexerCapabilities {
    fn default() -> Self {
        Self {
            limits_default: DEFAULT_LIMIT,
            limits_max: DEFAULT_LIMIT,
            search_available: true,
            supports_raw_search: false,
            tv_search_params: vec![],
            movie_search_params: vec![],
            music_search_params: vec![],
            book_search_params: vec![],
            supports_aggregate_id_search: false,
            categories: CategoryMap::new(),
        }
    }
}

impl IndexerCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Results per page: the default, clamped to the maximum
    pub fn page_size(&self) -> u32 {
        self.limits_default.min(self.limits_max).max(1)
    }

    /// Whether TV search is available
    pub fn tv_search_available(&self) -> bool {
        !self.tv_search_params.is_empty()
    }

    /// Whether movie search is available
    pub fn movie_search_available(&self) -> bool {
        !self.movie_search_params.is_empty()
    }

    /// Whether music search is available
    pub fn music_search_available(&self) -> bool {
        !self.music_search_params.is_empty()
    }

    /// Whether book search is available
    pub fn book_search_available(&self) -> bool {
        !self.book_search_params.is_empty()
    }

    pub fn supports(&self, search_type: SearchType) -> bool {
        match search_type {
            SearchType::Search => self.search_available,
            SearchType::TvSearch => self.tv_search_available(),
            SearchType::MovieSearch => self.movie_search_available(),
            SearchType::MusicSearch => self.music_search_available(),
            SearchType::BookSearch => self.book_search_available(),
        }
    }

    /// Check if a specific TV search param is supported
    pub fn has_tv_param(&self, param: TvSearchParam) -> bool {
        self.tv_search_params.contains(&param)
    }

    /// Check if a specific movie search param is supported
    pub fn has_movie_param(&self, param: MovieSearchParam) -> bool {
        self.movie_search_params.contains(&param)
    }

    pub fn has_music_param(&self, param: MusicSearchParam) -> bool {
        self.music_search_params.contains(&param)
    }

    pub fn has_book_param(&self, param: BookSearchParam) -> bool {
        self.book_search_params.contains(&param)
    }
}

/// Everything a capability fetch may need
pub struct FetchContext<'a> {
    pub dispatcher: &'a HttpDispatcher,
    pub settings: &'a IndexerSettings,
    pub session: &'a SessionState,
    pub auth: &'a dyn AuthStrategy,
    pub rate_limit: Option<Duration>,
}

/// Where an indexer's capabilities come from
#[async_trait]
pub trait CapabilitiesSource: Send + Sync {
    async fn fetch(&self, ctx: &FetchContext<'_>) -> Result<IndexerCapabilities>;

    /// How long a fetched value stays valid; `None` keeps it until cleared
    fn ttl(&self) -> Option<Duration> {
        None
    }
}

/// Capabilities declared by the indexer definition itself
pub struct StaticCapabilities(pub IndexerCapabilities);

#[async_trait]
impl CapabilitiesSource for StaticCapabilities {
    async fn fetch(&self, _ctx: &FetchContext<'_>) -> Result<IndexerCapabilities> {
        Ok(self.0.clone())
    }
}

struct CacheEntry {
    cell: OnceCell<(Arc<IndexerCapabilities>, Instant)>,
    ttl: Option<Duration>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        match (self.cell.get(), self.ttl) {
            (Some((_, fetched_at)), Some(ttl)) => fetched_at.elapsed() >= ttl,
            _ => false,
        }
    }
}

/// Per-indexer capability cache with single-flight fetching
#[derive(Default)]
pub struct CapabilityCache {
    entries: Mutex<HashMap<String, Arc<CacheEntry>>>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return cached capabilities or run `fetch` once. Concurrent callers on a
    /// cold entry wait for the same fetch and get the same `Arc`. Errors are not
    /// cached.
    pub async fn get_capabilities<F, Fut>(
        &self,
        indexer_id: &str,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<Arc<IndexerCapabilities>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<IndexerCapabilities>>,
    {
        let entry = {
            let mut entries = self.entries.lock();
            if entries.get(indexer_id).is_some_and(|e| e.is_expired()) {
                debug!(indexer_id = %indexer_id, "Cached capabilities expired");
                entries.remove(indexer_id);
            }
            entries
                .entry(indexer_id.to_string())
                .or_insert_with(|| {
                    Arc::new(CacheEntry {
                        cell: OnceCell::new(),
                        ttl,
                    })
                })
                .clone()
        };

        let (caps, _) = entry
            .cell
            .get_or_try_init(|| async move {
                debug!(indexer_id = %indexer_id, "Fetching capabilities");
                let caps = fetch().await?;
                info!(
                    indexer_id = %indexer_id,
                    categories = caps.categories.mappings().len(),
                    limits_default = caps.limits_default,
                    limits_max = caps.limits_max,
                    "Capabilities loaded"
                );
                Ok::<_, IndexerError>((Arc::new(caps), Instant::now()))
            })
            .await?;

        Ok(caps.clone())
    }

    /// Cached value without fetching
    pub fn peek(&self, indexer_id: &str) -> Option<Arc<IndexerCapabilities>> {
        let entries = self.entries.lock();
        let entry = entries.get(indexer_id)?;
        if entry.is_expired() {
            return None;
        }
        entry.cell.get().map(|(caps, _)| caps.clone())
    }

    pub fn invalidate(&self, indexer_id: &str) {
        if self.entries.lock().remove(indexer_id).is_some() {
            debug!(indexer_id = %indexer_id, "Capabilities invalidated");
        }
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

fn attributes(e: &BytesStart<'_>) -> HashMap<String, String> {
    e.attributes()
        .flatten()
        .map(|attr| {
            let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
            let val = attr
                .unescape_value()
                .map(|v| v.to_string())
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).to_string());
            (key, val)
        })
        .collect()
}

fn param_list<T>(attrs: &HashMap<String, String>, parse: fn(&str) -> Option<T>, default: T) -> Vec<T>
where
    T: PartialEq,
{
    if attrs.get("available").map(String::as_str) != Some("yes") {
        return vec![];
    }

    let Some(supported) = attrs.get("supportedParams") else {
        return vec![default];
    };

    let mut params = vec![];
    for param in supported.split(',').filter_map(parse) {
        if !params.contains(&param) {
            params.push(param);
        }
    }
    params
}

/// Standard parent for a Newznab `<category>`: by name, then id, then Other
fn map_parent_category(id: i32, name: &str) -> &'static TorznabCategory {
    let lower = name.to_lowercase();
    let parents = || TORZNAB_CATEGORIES.iter().filter(|c| c.is_parent());

    parents()
        .find(|c| lower.contains(&c.name.to_lowercase()))
        .or_else(|| {
            TORZNAB_CATEGORIES
                .iter()
                .find(|c| c.id == id && c.name.to_lowercase().contains(&lower))
        })
        .or_else(|| parents().find(|c| c.id == id))
        .or_else(|| get_category(cats::OTHER))
        .unwrap_or(&TORZNAB_CATEGORIES[0])
}

/// Standard category for a `<subcat>`: by "Parent/Name", then id, then Parent/Other
fn map_subcategory(parent: &TorznabCategory, id: i32, name: &str) -> &'static TorznabCategory {
    let full_name = format!("{}/{}", parent.name, name).to_lowercase();
    let other_name = format!("{}/other", parent.name).to_lowercase();

    TORZNAB_CATEGORIES
        .iter()
        .find(|c| c.name.to_lowercase() == full_name)
        .or_else(|| get_category(id))
        .or_else(|| {
            if parent.id == cats::OTHER {
                return None;
            }
            TORZNAB_CATEGORIES
                .iter()
                .find(|c| c.name.to_lowercase() == other_name)
        })
        .or_else(|| get_category(cats::OTHER_MISC))
        .unwrap_or(&TORZNAB_CATEGORIES[0])
}

/// Parse a Newznab/Torznab `t=caps` document
pub fn parse_caps_xml(xml: &str, request_url: &str) -> Result<IndexerCapabilities> {
    check_xml_error(xml, request_url)?;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut caps = IndexerCapabilities::new();
    let mut saw_root = false;
    // (native id, native name, mapped parent) of the open <category>
    let mut current_parent: Option<(i32, String, &'static TorznabCategory)> = None;

    loop {
        let (e, is_empty) = match reader.read_event() {
            Ok(Event::Start(e)) => (e, false),
            Ok(Event::Empty(e)) => (e, true),
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"category" {
                    if let Some((id, name, mapped)) = current_parent.take() {
                        caps.categories.add_mapping(id.to_string(), mapped.id, Some(&name));
                    }
                }
                continue;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(IndexerError::protocol(
                    format!("malformed capabilities document: {}", e),
                    xml,
                ));
            }
            _ => continue,
        };

        let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
        let attrs = attributes(&e);

        match tag.as_str() {
            "caps" => saw_root = true,
            "limits" => {
                if let Some(default) = attrs.get("default").and_then(|v| v.trim().parse().ok()) {
                    caps.limits_default = default;
                }
                if let Some(max) = attrs.get("max").and_then(|v| v.trim().parse().ok()) {
                    caps.limits_max = max;
                }
            }
            "search" => {
                caps.search_available = attrs.get("available").map(String::as_str) == Some("yes");
                caps.supports_raw_search = attrs.get("searchEngine").map(String::as_str) == Some("raw");
            }
            "tv-search" => {
                caps.tv_search_params = param_list(&attrs, TvSearchParam::parse, TvSearchParam::Q);
            }
            "movie-search" => {
                caps.movie_search_params = param_list(&attrs, MovieSearchParam::parse, MovieSearchParam::Q);
            }
            "audio-search" | "music-search" => {
                caps.music_search_params = param_list(&attrs, MusicSearchParam::parse, MusicSearchParam::Q);
            }
            "book-search" => {
                caps.book_search_params = param_list(&attrs, BookSearchParam::parse, BookSearchParam::Q);
            }
            "category" => {
                let Some(id) = attrs.get("id").and_then(|v| v.trim().parse::<i32>().ok()) else {
                    continue;
                };
                let name = attrs.get("name").cloned().unwrap_or_default();
                let mapped = map_parent_category(id, &name);

                if is_empty {
                    caps.categories.add_mapping(id.to_string(), mapped.id, Some(&name));
                } else {
                    current_parent = Some((id, name, mapped));
                }
            }
            "subcat" => {
                let Some((_, parent_name, parent)) = &current_parent else {
                    continue;
                };
                let Some(id) = attrs.get("id").and_then(|v| v.trim().parse::<i32>().ok()) else {
                    continue;
                };
                let name = attrs.get("name").cloned().unwrap_or_default();
                let mapped = map_subcategory(parent, id, &name);
                caps.categories.add_mapping(
                    id.to_string(),
                    mapped.id,
                    Some(&format!("{}/{}", parent_name, name)),
                );
            }
            _ => {}
        }
    }

    if !saw_root {
        return Err(IndexerError::protocol("capabilities document has no <caps> root", xml));
    }

    Ok(caps)
}
