//! Newznab indexer implementation
//!
//! Newznab is the standard API for Usenet indexers (NZBGeek, DrunkenSlug, etc.).
//! Torznab is the same API for torrents, so the generator, parser and
//! capability source here serve both; only the protocol differs.
//!
//! # Request tiers
//!
//! Structured searches (ids, season/episode, artist, author...) go out as a
//! typed request (`t=movie`, `t=tvsearch`, ...). Some indexers return
//! garbage for typed searches they only half support, so a plain
//! `t=search&q=...` tier follows as the fallback whenever a term exists.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::{debug, warn};
use url::Url;

use super::{Indexer, IndexerDefinition, IndexerParts, IndexerSettings};
use crate::error::{IndexerError, Result};
use crate::http::{ContentExpectation, HttpRequest};
use crate::indexer::capabilities::{
    CapabilitiesSource, FETCHED_CAPABILITIES_TTL, FetchContext, IndexerCapabilities, parse_caps_xml,
};
use crate::indexer::categories::CUSTOM_CATEGORY_OFFSET;
use crate::indexer::parser::{
    IndexerResponse, ResponseParser, check_enclosure_types, check_xml_error, clamp_count, parse_date,
    parse_float, parse_imdb_id, parse_int, peer_count,
};
use crate::indexer::request::{PageWindow, RequestChain, RequestContext, RequestGenerator, RequestTier};
use crate::indexer::session::ApiKeyQuery;
use crate::indexer::types::{
    BookSearchParam, DownloadProtocol, IndexerFlag, MovieSearchParam, MusicSearchParam, ReleaseInfo,
    SearchCriteria, SearchType, TvSearchParam, imdb_id_short,
};

/// Pages fetched per tier unless the definition overrides it
pub const DEFAULT_MAX_PAGES: u32 = 30;

pub fn build(definition: IndexerDefinition, settings: IndexerSettings) -> Result<Indexer> {
    settings.api_url()?;

    Ok(IndexerParts {
        protocol: DownloadProtocol::Usenet,
        capabilities: std::sync::Arc::new(NewznabCapabilities),
        generator: std::sync::Arc::new(NewznabRequestGenerator),
        parser: std::sync::Arc::new(NewznabParser::new(DownloadProtocol::Usenet)),
        auth: std::sync::Arc::new(ApiKeyQuery { param: "apikey" }),
        rate_limit: None,
        max_pages: DEFAULT_MAX_PAGES,
    }
    .into_indexer(definition, settings))
}

/// Fetches `t=caps` from the indexer
pub struct NewznabCapabilities;

#[async_trait]
impl CapabilitiesSource for NewznabCapabilities {
    async fn fetch(&self, ctx: &FetchContext<'_>) -> Result<IndexerCapabilities> {
        let mut url = ctx.settings.api_url()?;
        url.query_pairs_mut().append_pair("t", "caps");

        let mut request = HttpRequest::get(url)
            .with_rate_limit(ctx.rate_limit)
            .expecting(ContentExpectation::Xml);
        ctx.auth.apply(&mut request, ctx.session, ctx.settings);

        debug!(url = %request.url.path(), "Fetching Newznab capabilities");
        let response = ctx.dispatcher.execute(&request).await?;

        let mut caps = parse_caps_xml(&response.content(), request.url.as_str())?;
        caps.supports_aggregate_id_search = true;
        Ok(caps)
    }

    fn ttl(&self) -> Option<Duration> {
        Some(FETCHED_CAPABILITIES_TTL)
    }
}

/// Builds `t=...` API requests
pub struct NewznabRequestGenerator;

type Params = Vec<(&'static str, String)>;

impl RequestGenerator for NewznabRequestGenerator {
    fn search_requests(&self, criteria: &SearchCriteria, ctx: &RequestContext<'_>) -> Result<RequestChain> {
        let caps = ctx.capabilities;
        let common = criteria.common();
        let term = common.term().map(newznabify);
        let window = PageWindow::for_criteria(common, caps, ctx.max_pages);
        let base = base_url(ctx.settings, caps, &common.categories)?;

        let mut chain = RequestChain::new();

        let typed = typed_parameters(criteria, caps);
        let has_typed = typed.is_some();
        if let Some((search_type, mut params)) = typed {
            if let Some(term) = &term {
                if supports_q(caps, search_type) {
                    params.push(("q", term.clone()));
                }
            }
            let label = format!(
                "{}:{}",
                search_type,
                params.iter().map(|(k, _)| *k).collect::<Vec<_>>().join(",")
            );
            chain.add_tier(paged_tier(label, base.clone(), search_type, params, window));
        }

        if term.is_some() || !has_typed {
            let mut params = vec![];
            if let Some(term) = &term {
                if caps.search_available {
                    params.push(("q", term.clone()));
                }
            }
            let label = if params.is_empty() { "search:feed" } else { "search:q" };
            chain.add_tier(paged_tier(label, base, SearchType::Search, params, window));
        }

        Ok(chain)
    }
}

fn newznabify(term: &str) -> String {
    term.replace('+', " ")
}

fn supports_q(caps: &IndexerCapabilities, search_type: SearchType) -> bool {
    match search_type {
        SearchType::Search => caps.search_available,
        SearchType::TvSearch => caps.has_tv_param(TvSearchParam::Q),
        SearchType::MovieSearch => caps.has_movie_param(MovieSearchParam::Q),
        SearchType::MusicSearch => caps.has_music_param(MusicSearchParam::Q),
        SearchType::BookSearch => caps.has_book_param(BookSearchParam::Q),
    }
}

/// API URL with everything but `t`, `q` and paging
fn base_url(settings: &IndexerSettings, caps: &IndexerCapabilities, categories: &[i32]) -> Result<Url> {
    let mut url = settings.api_url()?;

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("extended", "1");

        let mut cats: Vec<String> = vec![];
        for id in categories {
            // custom categories only exist on our side; send the indexer's own id
            let natives = if *id >= CUSTOM_CATEGORY_OFFSET {
                caps.categories.map_standard_to_native(&[*id])
            } else {
                vec![id.to_string()]
            };
            for native in natives {
                if !cats.contains(&native) {
                    cats.push(native);
                }
            }
        }
        if !cats.is_empty() {
            query.append_pair("cat", &cats.join(","));
        }

        if let Some(extra) = settings.additional_parameters.as_deref() {
            let extra = extra.trim().trim_start_matches(['&', '?']);
            for (k, v) in url::form_urlencoded::parse(extra.as_bytes()) {
                query.append_pair(&k, &v);
            }
        }
    }

    Ok(url)
}

fn paged_tier(
    label: impl Into<String>,
    base: Url,
    search_type: SearchType,
    params: Params,
    window: PageWindow,
) -> RequestTier {
    RequestTier::new(
        label,
        window.requests(move |offset, limit| {
            let mut url = base.clone();
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("t", search_type.as_param());
                for (k, v) in &params {
                    query.append_pair(k, v);
                }
                query.append_pair("limit", &limit.to_string());
                query.append_pair("offset", &offset.to_string());
            }
            Some(HttpRequest::get(url).expecting(ContentExpectation::Xml))
        }),
    )
}

/// Pick one id, or all of them when the indexer combines ids
fn pick_ids(ids: Params, aggregate: bool) -> Params {
    if aggregate {
        ids
    } else {
        ids.into_iter().take(1).collect()
    }
}

/// Structured parameters the indexer supports and the criteria supplies,
/// `None` when the search has to fall back to plain `t=search`
fn typed_parameters(criteria: &SearchCriteria, caps: &IndexerCapabilities) -> Option<(SearchType, Params)> {
    let aggregate = caps.supports_aggregate_id_search;

    let (search_type, params) = match criteria {
        SearchCriteria::Basic(_) => return None,
        SearchCriteria::Movie(m) => {
            // precedence: tmdb, imdb, trakt
            let mut ids: Params = vec![];
            if let Some(id) = m.tmdb_id.filter(|_| caps.has_movie_param(MovieSearchParam::TmdbId)) {
                ids.push(("tmdbid", id.to_string()));
            }
            if let Some(id) = m.imdb_id.as_deref().filter(|_| caps.has_movie_param(MovieSearchParam::ImdbId)) {
                ids.push(("imdbid", imdb_id_short(id)));
            }
            if let Some(id) = m.trakt_id.filter(|_| caps.has_movie_param(MovieSearchParam::TraktId)) {
                ids.push(("traktid", id.to_string()));
            }

            let mut params = pick_ids(ids, aggregate);
            if params.is_empty() {
                return None;
            }
            if let Some(year) = m.year.filter(|_| caps.has_movie_param(MovieSearchParam::Year)) {
                params.push(("year", year.to_string()));
            }
            if let Some(genre) = m.genre.as_deref().filter(|_| caps.has_movie_param(MovieSearchParam::Genre)) {
                params.push(("genre", genre.to_string()));
            }
            (SearchType::MovieSearch, params)
        }
        SearchCriteria::Tv(t) => {
            // precedence: tvdb, imdb, tvmaze, tvrage, tmdb, trakt
            let mut ids: Params = vec![];
            if let Some(id) = t.tvdb_id.filter(|_| caps.has_tv_param(TvSearchParam::TvdbId)) {
                ids.push(("tvdbid", id.to_string()));
            }
            if let Some(id) = t.imdb_id.as_deref().filter(|_| caps.has_tv_param(TvSearchParam::ImdbId)) {
                ids.push(("imdbid", imdb_id_short(id)));
            }
            if let Some(id) = t.tvmaze_id.filter(|_| caps.has_tv_param(TvSearchParam::TvmazeId)) {
                ids.push(("tvmazeid", id.to_string()));
            }
            if let Some(id) = t.tvrage_id.filter(|_| caps.has_tv_param(TvSearchParam::RId)) {
                ids.push(("rid", id.to_string()));
            }
            if let Some(id) = t.tmdb_id.filter(|_| caps.has_tv_param(TvSearchParam::TmdbId)) {
                ids.push(("tmdbid", id.to_string()));
            }
            if let Some(id) = t.trakt_id.filter(|_| caps.has_tv_param(TvSearchParam::TraktId)) {
                ids.push(("traktid", id.to_string()));
            }

            let mut params = pick_ids(ids, aggregate);
            if let Some(season) = t.season.filter(|_| caps.has_tv_param(TvSearchParam::Season)) {
                // NNTmux mishandles an unpadded season 0
                params.push(("season", format!("{:02}", season)));
            }
            if let Some(ep) = t
                .episode
                .as_deref()
                .filter(|e| !e.trim().is_empty() && caps.has_tv_param(TvSearchParam::Ep))
            {
                params.push(("ep", ep.trim().to_string()));
            }
            if params.is_empty() {
                return None;
            }
            (SearchType::TvSearch, params)
        }
        SearchCriteria::Music(m) => {
            let mut params: Params = vec![];
            let fields = [
                ("artist", m.artist.as_deref(), MusicSearchParam::Artist),
                ("album", m.album.as_deref(), MusicSearchParam::Album),
                ("label", m.label.as_deref(), MusicSearchParam::Label),
                ("track", m.track.as_deref(), MusicSearchParam::Track),
            ];
            for (key, value, param) in fields {
                if let Some(value) = value.filter(|v| !v.trim().is_empty() && caps.has_music_param(param)) {
                    params.push((key, value.trim().to_string()));
                }
            }
            if params.is_empty() {
                return None;
            }
            if let Some(year) = m.year.filter(|_| caps.has_music_param(MusicSearchParam::Year)) {
                params.push(("year", year.to_string()));
            }
            (SearchType::MusicSearch, params)
        }
        SearchCriteria::Book(b) => {
            let mut params: Params = vec![];
            let fields = [
                ("author", b.author.as_deref(), BookSearchParam::Author),
                ("title", b.title.as_deref(), BookSearchParam::Title),
            ];
            for (key, value, param) in fields {
                if let Some(value) = value.filter(|v| !v.trim().is_empty() && caps.has_book_param(param)) {
                    params.push((key, value.trim().to_string()));
                }
            }
            if params.is_empty() {
                return None;
            }
            if let Some(publisher) = b
                .publisher
                .as_deref()
                .filter(|_| caps.has_book_param(BookSearchParam::Publisher))
            {
                params.push(("publisher", publisher.to_string()));
            }
            (SearchType::BookSearch, params)
        }
    };

    Some((search_type, params))
}

/// Parses Newznab and Torznab RSS feeds
pub struct NewznabParser {
    protocol: DownloadProtocol,
}

impl NewznabParser {
    pub fn new(protocol: DownloadProtocol) -> Self {
        Self { protocol }
    }
}

impl ResponseParser for NewznabParser {
    fn parse(&self, response: &IndexerResponse<'_>) -> Result<Vec<ReleaseInfo>> {
        let xml = response.content();
        check_xml_error(&xml, response.request_url())?;

        let items = parse_items(&xml)?;

        let mut enclosure_types: Vec<&str> = vec![];
        for item in &items {
            if let Some(t) = item.enclosure_type.as_deref() {
                if !enclosure_types.contains(&t) {
                    enclosure_types.push(t);
                }
            }
        }
        check_enclosure_types(
            &enclosure_types,
            self.protocol,
            response.request.http.url.host_str().unwrap_or_default(),
        );

        let releases: Vec<ReleaseInfo> = items
            .into_iter()
            .filter_map(|item| item.build(response))
            .collect();

        debug!(releases = releases.len(), url = %response.http.url.path(), "Parsed feed");
        Ok(releases)
    }
}

/// Fields gathered from one `<item>`
#[derive(Default)]
struct FeedItem {
    title: Option<String>,
    guid: Option<String>,
    link: Option<String>,
    comments: Option<String>,
    pub_date: Option<String>,
    description: Option<String>,
    size_element: Option<String>,
    category_elements: Vec<String>,
    enclosure_url: Option<String>,
    enclosure_length: Option<String>,
    enclosure_type: Option<String>,
    /// attr name (lowercase) -> values in document order
    attrs: HashMap<String, Vec<String>>,
}

impl FeedItem {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .get(name)
            .and_then(|v| v.first())
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    fn first_attr(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|n| self.attr(n))
    }

    fn attr_int(&self, names: &[&str]) -> Option<i64> {
        names.iter().find_map(|n| self.attr(n).and_then(parse_int))
    }

    fn attr_float(&self, name: &str) -> Option<f64> {
        self.attr(name).and_then(parse_float)
    }

    fn build(self, response: &IndexerResponse<'_>) -> Option<ReleaseInfo> {
        let Some(title) = self.title.clone().filter(|t| !t.trim().is_empty()) else {
            warn!("Skipping feed item without a title");
            return None;
        };

        let publish_date = self
            .attr("usenetdate")
            .and_then(parse_date)
            .or_else(|| self.pub_date.as_deref().and_then(parse_date))
            .unwrap_or_else(chrono::Utc::now);

        let guid = self
            .guid
            .clone()
            .or_else(|| self.link.clone())
            .unwrap_or_else(|| title.clone());

        let mut release = ReleaseInfo::new(title, guid, publish_date);

        let download = self
            .enclosure_url
            .clone()
            .filter(|u| is_absolute(u))
            .or_else(|| self.link.clone());
        match download {
            Some(url) if url.starts_with("magnet:") => release.magnet_uri = Some(url),
            other => release.download_url = other,
        }
        if release.magnet_uri.is_none() {
            release.magnet_uri = self.attr("magneturl").map(str::to_string);
        }

        release.info_url = self
            .comments
            .as_deref()
            .map(|c| c.trim_end_matches("#comments").to_string())
            .filter(|c| !c.is_empty());
        release.description = self.description.clone();

        release.size = self
            .attr_int(&["size"])
            .or_else(|| self.enclosure_length.as_deref().and_then(parse_int))
            .or_else(|| self.size_element.as_deref().and_then(parse_int))
            .filter(|s| *s > 0);

        let native_categories: Vec<&str> = match self.attrs.get("category") {
            Some(values) if !values.is_empty() => values.iter().map(String::as_str).collect(),
            _ => self.category_elements.iter().map(String::as_str).collect(),
        };
        for native in native_categories {
            for id in response.capabilities.categories.map_native_to_standard(native.trim()) {
                if !release.categories.contains(&id) {
                    release.categories.push(id);
                }
            }
        }

        let seeders = self.attr_int(&["seeders"]);
        release.seeders = seeders.map(clamp_count);
        release.peers = self
            .attr_int(&["peers"])
            .map(clamp_count)
            .or_else(|| peer_count(seeders, Some(self.attr_int(&["leechers"])?)));
        release.grabs = self.attr_int(&["grabs"]).map(clamp_count);
        release.files = self.attr_int(&["files"]).map(clamp_count);

        release.imdb_id = self.first_attr(&["imdb", "imdbid"]).and_then(parse_imdb_id);
        release.tmdb_id = self.attr_int(&["tmdbid", "tmdb"]).filter(|id| *id > 0);
        release.tvdb_id = self.attr_int(&["tvdbid", "tvdb"]).filter(|id| *id > 0);
        release.tvmaze_id = self.attr_int(&["tvmazeid", "tvmaze"]).filter(|id| *id > 0);
        release.trakt_id = self.attr_int(&["traktid", "trakt"]).filter(|id| *id > 0);
        release.tvrage_id = self.attr_int(&["rageid", "tvrageid"]).filter(|id| *id > 0);

        release.info_hash = self.attr("infohash").map(str::to_string);
        release.poster = self.first_attr(&["coverurl", "poster"]).map(str::to_string);

        if let Some(genres) = self.attr("genre") {
            release.genres = genres
                .split(',')
                .map(|g| g.trim().to_string())
                .filter(|g| !g.is_empty())
                .collect();
        }

        release.download_volume_factor = self.attr_float("downloadvolumefactor").unwrap_or(1.0);
        release.upload_volume_factor = self.attr_float("uploadvolumefactor").unwrap_or(1.0);
        release.minimum_ratio = self.attr_float("minimumratio");
        release.minimum_seed_time = self.attr_int(&["minimumseedtime"]);
        release.apply_volume_flags();

        for tag in self.attrs.get("tag").into_iter().flatten() {
            match tag.trim().to_lowercase().as_str() {
                "internal" => release.add_flag(IndexerFlag::Internal),
                "scene" => release.add_flag(IndexerFlag::Scene),
                "freeleech" => release.add_flag(IndexerFlag::FreeLeech),
                _ => {}
            }
        }

        Some(release)
    }
}

fn is_absolute(url: &str) -> bool {
    url.starts_with("magnet:") || Url::parse(url).is_ok()
}

fn attribute_map(e: &BytesStart<'_>) -> HashMap<String, String> {
    e.attributes()
        .flatten()
        .map(|attr| {
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).to_string();
            let val = attr
                .unescape_value()
                .map(|v| v.to_string())
                .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).to_string());
            (key, val)
        })
        .collect()
}

fn handle_element(item: &mut FeedItem, e: &BytesStart<'_>) {
    let local = e.local_name();
    let attrs = attribute_map(e);
    match local.as_ref() {
        // <newznab:attr name=".." value=".."/> and <torznab:attr .../>
        b"attr" => {
            if let (Some(name), Some(value)) = (attrs.get("name"), attrs.get("value")) {
                item.attrs
                    .entry(name.to_lowercase())
                    .or_default()
                    .push(value.clone());
            }
        }
        b"enclosure" => {
            item.enclosure_url = attrs.get("url").cloned();
            item.enclosure_length = attrs.get("length").cloned();
            item.enclosure_type = attrs.get("type").cloned();
        }
        _ => {}
    }
}

fn set_text(item: &mut FeedItem, tag: &str, text: String) {
    match tag {
        "title" => item.title = Some(text),
        "guid" => item.guid = Some(text),
        "link" => item.link = Some(text),
        "comments" => item.comments = Some(text),
        "pubDate" => item.pub_date = Some(text),
        "description" => item.description = Some(text),
        "size" => item.size_element = Some(text),
        "category" => item.category_elements.push(text),
        _ => {}
    }
}

fn parse_items(xml: &str) -> Result<Vec<FeedItem>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut items = vec![];
    let mut current: Option<FeedItem> = None;
    let mut current_tag = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "item" {
                    current = Some(FeedItem::default());
                } else if let Some(item) = current.as_mut() {
                    handle_element(item, &e);
                }
                current_tag = tag;
            }
            Ok(Event::Empty(e)) => {
                if let Some(item) = current.as_mut() {
                    handle_element(item, &e);
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(item) = current.as_mut() {
                    let text = e.unescape().map(|t| t.to_string()).unwrap_or_default();
                    if !text.is_empty() {
                        set_text(item, &current_tag, text);
                    }
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(item) = current.as_mut() {
                    let text = String::from_utf8_lossy(&e.into_inner()).trim().to_string();
                    if !text.is_empty() {
                        set_text(item, &current_tag, text);
                    }
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"item" {
                    if let Some(item) = current.take() {
                        items.push(item);
                    }
                }
                current_tag.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(IndexerError::protocol(format!("malformed feed: {}", e), xml));
            }
            _ => {}
        }
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::categories::cats;
    use crate::indexer::parser::test_support::parse_body;
    use crate::indexer::request::MAX_PAGES;
    use crate::indexer::types::{MovieSearchCriteria, SearchCommon, TvSearchCriteria};
    use pretty_assertions::assert_eq;

    fn settings() -> IndexerSettings {
        IndexerSettings {
            base_url: "https://nzb.example".to_string(),
            api_key: Some("key".to_string()),
            ..Default::default()
        }
    }

    fn caps() -> IndexerCapabilities {
        let mut caps = IndexerCapabilities::new();
        caps.movie_search_params = vec![MovieSearchParam::Q, MovieSearchParam::ImdbId, MovieSearchParam::TmdbId];
        caps.tv_search_params = vec![
            TvSearchParam::Q,
            TvSearchParam::Season,
            TvSearchParam::Ep,
            TvSearchParam::TvdbId,
            TvSearchParam::ImdbId,
        ];
        caps
    }

    fn urls(chain: RequestChain) -> Vec<Vec<String>> {
        chain
            .into_tiers()
            .into_iter()
            .map(|tier| tier.pages.map(|r| r.url().to_string()).collect())
            .collect()
    }

    fn generate(criteria: &SearchCriteria, caps: &IndexerCapabilities) -> RequestChain {
        let settings = settings();
        let ctx = RequestContext {
            settings: &settings,
            capabilities: caps,
            max_pages: MAX_PAGES,
        };
        NewznabRequestGenerator.search_requests(criteria, &ctx).unwrap()
    }

    fn movie(term: &str) -> SearchCriteria {
        SearchCriteria::Movie(MovieSearchCriteria {
            common: SearchCommon {
                search_term: Some(term.to_string()),
                ..Default::default()
            },
            imdb_id: Some("tt0133093".to_string()),
            tmdb_id: Some(603),
            ..Default::default()
        })
    }

    #[test]
    fn test_id_tier_then_search_fallback() {
        let chain = generate(&movie("The Matrix"), &caps());
        assert_eq!(chain.labels(), vec!["movie:tmdbid,q", "search:q"]);

        let urls = urls(chain);
        assert_eq!(
            urls[0],
            vec!["https://nzb.example/api?extended=1&t=movie&tmdbid=603&q=The+Matrix&limit=100&offset=0"]
        );
        assert_eq!(
            urls[1],
            vec!["https://nzb.example/api?extended=1&t=search&q=The+Matrix&limit=100&offset=0"]
        );
    }

    #[test]
    fn test_aggregate_ids_share_one_tier() {
        let mut caps = caps();
        caps.supports_aggregate_id_search = true;
        let urls = urls(generate(&movie("The Matrix"), &caps));
        assert!(urls[0][0].contains("tmdbid=603&imdbid=0133093"));
    }

    #[test]
    fn test_unsupported_ids_fall_back_to_search_only() {
        let mut caps = caps();
        caps.movie_search_params = vec![MovieSearchParam::Q];
        let chain = generate(&movie("The Matrix"), &caps);
        assert_eq!(chain.labels(), vec!["search:q"]);
    }

    #[test]
    fn test_tv_season_is_padded_and_no_term_means_no_fallback() {
        let criteria = SearchCriteria::Tv(TvSearchCriteria {
            tvdb_id: Some(81189),
            imdb_id: Some("tt0903747".to_string()),
            season: Some(1),
            episode: Some("3".to_string()),
            ..Default::default()
        });
        let chain = generate(&criteria, &caps());
        assert_eq!(chain.len(), 1);
        let urls = urls(chain);
        assert_eq!(
            urls[0],
            vec!["https://nzb.example/api?extended=1&t=tvsearch&tvdbid=81189&season=01&ep=3&limit=100&offset=0"]
        );
    }

    #[test]
    fn test_rss_feed_browse() {
        let chain = generate(&SearchCriteria::rss(), &caps());
        assert_eq!(chain.labels(), vec!["search:feed"]);
    }

    #[test]
    fn test_paging_offsets_and_categories() {
        let criteria = SearchCriteria::search("ubuntu")
            .with_categories(vec![cats::PC, cats::PC, cats::PC_ISO])
            .with_paging(Some(300), Some(0));
        let urls = urls(generate(&criteria, &caps()));
        let offsets: Vec<&str> = urls[0]
            .iter()
            .take(3)
            .map(|u| u.rsplit("offset=").next().unwrap())
            .collect();
        assert_eq!(offsets, vec!["0", "100", "200"]);
        assert!(urls[0][0].contains("cat=4000%2C4020"));
    }

    #[test]
    fn test_additional_parameters_are_appended() {
        let mut settings = settings();
        settings.additional_parameters = Some("&attrs=poster&dl=1".to_string());
        let caps = caps();
        let ctx = RequestContext {
            settings: &settings,
            capabilities: &caps,
            max_pages: 1,
        };
        let chain = NewznabRequestGenerator
            .search_requests(&SearchCriteria::search("x"), &ctx)
            .unwrap();
        let url = urls(chain).remove(0).remove(0);
        assert!(url.contains("extended=1&attrs=poster&dl=1&t=search"));
    }

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:newznab="http://www.newznab.com/DTD/2010/feeds/attributes/">
<channel>
  <title>example</title>
  <item>
    <title>Ubuntu.22.04.Desktop</title>
    <guid isPermaLink="true">https://nzb.example/details/abc</guid>
    <link>https://nzb.example/getnzb/abc.nzb&amp;i=1</link>
    <comments>https://nzb.example/details/abc#comments</comments>
    <pubDate>Sat, 18 Jan 2025 14:30:00 +0000</pubDate>
    <category>PC &gt; ISO</category>
    <description><![CDATA[Ubuntu <b>desktop</b>]]></description>
    <enclosure url="https://nzb.example/getnzb/abc.nzb" length="123456" type="application/x-nzb"/>
    <newznab:attr name="category" value="4000"/>
    <newznab:attr name="category" value="4020"/>
    <newznab:attr name="size" value="3654957056"/>
    <newznab:attr name="grabs" value="12"/>
    <newznab:attr name="usenetdate" value="Fri, 17 Jan 2025 10:00:00 +0000"/>
    <newznab:attr name="imdb" value="0133093"/>
  </item>
  <item>
    <guid>no-title</guid>
  </item>
</channel>
</rss>"#;

    #[test]
    fn test_parse_feed() {
        let mut caps = caps();
        caps.categories.add_mapping("4000", cats::PC, None);
        caps.categories.add_mapping("4020", cats::PC_ISO, None);

        let releases = parse_body(
            &NewznabParser::new(DownloadProtocol::Usenet),
            &caps,
            &settings(),
            "https://nzb.example/api?t=search&apikey=key",
            "application/rss+xml",
            FEED,
        )
        .unwrap();

        assert_eq!(releases.len(), 1);
        let r = &releases[0];
        assert_eq!(r.title, "Ubuntu.22.04.Desktop");
        assert_eq!(r.guid, "https://nzb.example/details/abc");
        assert_eq!(r.download_url.as_deref(), Some("https://nzb.example/getnzb/abc.nzb"));
        assert_eq!(r.info_url.as_deref(), Some("https://nzb.example/details/abc"));
        assert_eq!(r.size, Some(3654957056));
        assert_eq!(r.grabs, Some(12));
        assert_eq!(r.imdb_id, Some(133093));
        assert_eq!(r.categories, vec![cats::PC, cats::PC_ISO]);
        assert_eq!(r.publish_date.to_rfc3339(), "2025-01-17T10:00:00+00:00");
        assert_eq!(r.description.as_deref(), Some("Ubuntu <b>desktop</b>"));
    }

    #[test]
    fn test_size_falls_back_to_enclosure_length() {
        let feed = FEED.replace(r#"<newznab:attr name="size" value="3654957056"/>"#, "");
        let releases = parse_body(
            &NewznabParser::new(DownloadProtocol::Usenet),
            &caps(),
            &settings(),
            "https://nzb.example/api?t=search&apikey=key",
            "application/rss+xml",
            &feed,
        )
        .unwrap();
        assert_eq!(releases[0].size, Some(123456));
    }

    #[test]
    fn test_error_envelope_in_feed() {
        let err = parse_body(
            &NewznabParser::new(DownloadProtocol::Usenet),
            &caps(),
            &settings(),
            "https://nzb.example/api?t=search",
            "application/xml",
            r#"<error code="200" description="Missing parameter"/>"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "auth");
    }

    #[test]
    fn test_malformed_feed_is_protocol_error() {
        let err = parse_body(
            &NewznabParser::new(DownloadProtocol::Usenet),
            &caps(),
            &settings(),
            "https://nzb.example/api?t=search&apikey=key",
            "application/rss+xml",
            "<rss><channel><item><title>x</title></channel></rss>",
        )
        .unwrap_err();
        match err {
            IndexerError::Protocol { excerpt, .. } => assert!(excerpt.starts_with("<rss>")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_out_of_range_counts_saturate() {
        let feed = FEED.replace(
            r#"<newznab:attr name="grabs" value="12"/>"#,
            r#"<newznab:attr name="seeders" value="12"/>
    <newznab:attr name="leechers" value="9223372036854775807"/>
    <newznab:attr name="grabs" value="1e30"/>
    <newznab:attr name="files" value="-99999999999"/>"#,
        );
        let releases = parse_body(
            &NewznabParser::new(DownloadProtocol::Torrent),
            &caps(),
            &settings(),
            "https://nzb.example/api?t=search&apikey=key",
            "application/rss+xml",
            &feed,
        )
        .unwrap();

        let r = &releases[0];
        assert_eq!(r.seeders, Some(12));
        assert_eq!(r.peers, Some(i32::MAX));
        assert_eq!(r.grabs, Some(i32::MAX));
        assert_eq!(r.files, Some(0));
    }
}
