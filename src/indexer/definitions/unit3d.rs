//! UNIT3D indexer implementation
//!
//! UNIT3D trackers (Aither, Blutopia, ...) expose a JSON filter endpoint at
//! `api/torrents/filter` authenticated by an `api_token` query parameter.
//! Results come back in one page, newest first after sorting.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use super::{Indexer, IndexerDefinition, IndexerParts, IndexerSettings};
use crate::error::{IndexerError, Result};
use crate::http::{ContentExpectation, HttpRequest};
use crate::indexer::capabilities::{IndexerCapabilities, StaticCapabilities};
use crate::indexer::categories::cats;
use crate::indexer::parser::{
    IndexerResponse, ResponseParser, clamp_count, decode_rows, lenient, parse_date, parse_imdb_id,
    peer_count,
};
use crate::indexer::request::{IndexerRequest, RequestChain, RequestContext, RequestGenerator, RequestTier};
use crate::indexer::session::ApiKeyQuery;
use crate::indexer::types::{
    BookSearchParam, DownloadProtocol, MovieSearchParam, MusicSearchParam, ReleaseInfo, SearchCriteria,
    TvSearchParam, imdb_id_short,
};

const MINIMUM_SEED_TIME: i64 = 172800; // 48 hours

pub fn build(definition: IndexerDefinition, settings: IndexerSettings) -> Result<Indexer> {
    settings.base_url()?;

    Ok(IndexerParts {
        protocol: DownloadProtocol::Torrent,
        capabilities: Arc::new(StaticCapabilities(capabilities())),
        generator: Arc::new(Unit3dRequestGenerator),
        parser: Arc::new(Unit3dParser),
        auth: Arc::new(ApiKeyQuery { param: "api_token" }),
        rate_limit: None,
        max_pages: 1,
    }
    .into_indexer(definition, settings))
}

/// Build the capabilities common to UNIT3D sites
pub fn capabilities() -> IndexerCapabilities {
    let mut caps = IndexerCapabilities {
        tv_search_params: vec![
            TvSearchParam::Q,
            TvSearchParam::Season,
            TvSearchParam::Ep,
            TvSearchParam::ImdbId,
            TvSearchParam::TvdbId,
        ],
        movie_search_params: vec![MovieSearchParam::Q, MovieSearchParam::ImdbId, MovieSearchParam::TmdbId],
        music_search_params: vec![MusicSearchParam::Q],
        book_search_params: vec![BookSearchParam::Q],
        ..IndexerCapabilities::new()
    };

    let mappings = [
        ("1", cats::MOVIES, "Movie"),
        ("2", cats::TV, "TV"),
        ("3", cats::AUDIO, "Music"),
        ("4", cats::PC_GAMES, "Games"),
        ("6", cats::XXX, "XXX"),
        ("9", cats::TV_SPORT, "Sport"),
        ("10", cats::PC, "Software/Apps"),
        ("11", cats::BOOKS_EBOOK, "Ebooks/Magazines"),
        ("14", cats::AUDIO_AUDIOBOOK, "AudioBooks"),
        ("15", cats::OTHER, "Education"),
    ];
    for (id, cat, desc) in mappings {
        caps.categories.add_mapping(id, cat, Some(desc));
    }

    caps
}

pub struct Unit3dRequestGenerator;

impl RequestGenerator for Unit3dRequestGenerator {
    fn search_requests(&self, criteria: &SearchCriteria, ctx: &RequestContext<'_>) -> Result<RequestChain> {
        let mut url = ctx.settings.url_for("api/torrents/filter")?;

        {
            let mut query = url.query_pairs_mut();

            let term = match criteria {
                SearchCriteria::Tv(_) => Some(criteria.query_string()).filter(|q| !q.is_empty()),
                _ => criteria.common().term().map(str::to_string),
            };
            if let Some(term) = term {
                query.append_pair("name", &term);
            }

            for native in ctx
                .capabilities
                .categories
                .map_standard_to_native(&criteria.common().categories)
            {
                query.append_pair("categories[]", &native);
            }

            match criteria {
                SearchCriteria::Movie(m) => {
                    if let Some(imdb) = m.imdb_id.as_deref() {
                        query.append_pair("imdb", &imdb_id_short(imdb));
                        query.append_pair("imdbId", &imdb_id_short(imdb));
                    }
                    if let Some(tmdb) = m.tmdb_id.filter(|id| *id > 0) {
                        query.append_pair("tmdb", &tmdb.to_string());
                        query.append_pair("tmdbId", &tmdb.to_string());
                    }
                }
                SearchCriteria::Tv(t) => {
                    if let Some(imdb) = t.imdb_id.as_deref() {
                        query.append_pair("imdb", &imdb_id_short(imdb));
                        query.append_pair("imdbId", &imdb_id_short(imdb));
                    }
                    if let Some(tvdb) = t.tvdb_id.filter(|id| *id > 0) {
                        query.append_pair("tvdb", &tvdb.to_string());
                        query.append_pair("tvdbId", &tvdb.to_string());
                    }
                }
                _ => {}
            }
        }

        let request = HttpRequest::get(url).expecting(ContentExpectation::Json);
        let page_size = ctx.capabilities.page_size();

        let mut chain = RequestChain::new();
        chain.add_tier(RequestTier::single(
            "filter",
            IndexerRequest::new(request, 0, page_size),
        ));
        Ok(chain)
    }
}

#[derive(Debug, Deserialize)]
struct Unit3dResponse {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Unit3dTorrent {
    #[serde(default, deserialize_with = "lenient::string")]
    id: Option<String>,
    attributes: Unit3dAttributes,
}

#[derive(Debug, Deserialize)]
struct Unit3dAttributes {
    #[serde(default, deserialize_with = "lenient::string")]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    category: Option<String>,
    #[serde(default, deserialize_with = "lenient::int")]
    size: Option<i64>,
    #[serde(default, deserialize_with = "lenient::int")]
    num_file: Option<i64>,
    #[serde(default, deserialize_with = "lenient::int")]
    times_completed: Option<i64>,
    #[serde(default, deserialize_with = "lenient::int")]
    seeders: Option<i64>,
    #[serde(default, deserialize_with = "lenient::int")]
    leechers: Option<i64>,
    #[serde(default, deserialize_with = "lenient::string")]
    created_at: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    download_link: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    details_link: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    imdb_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::int")]
    tmdb_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient::int")]
    tvdb_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient::flag")]
    double_upload: bool,
    #[serde(default, deserialize_with = "lenient::flag")]
    freeleech: bool,
}

pub struct Unit3dParser;

impl ResponseParser for Unit3dParser {
    fn parse(&self, response: &IndexerResponse<'_>) -> Result<Vec<ReleaseInfo>> {
        if response.http.status != 200 {
            return Err(IndexerError::protocol(
                format!("Unexpected response status {} from indexer request", response.http.status),
                &response.content(),
            ));
        }

        let content_type = response.http.content_type().unwrap_or_default();
        if !content_type.contains("application/json") {
            return Err(IndexerError::protocol(
                format!(
                    "Unexpected response header {} from indexer request, expected application/json",
                    content_type
                ),
                &response.content(),
            ));
        }

        let parsed: Unit3dResponse = response.json()?;
        let categories = &response.capabilities.categories;

        let mut releases: Vec<ReleaseInfo> = decode_rows::<Unit3dTorrent>(parsed.data)
            .into_iter()
            .filter_map(|row| {
                let a = row.attributes;
                let Some(name) = a.name else {
                    warn!(id = ?row.id, "Skipping UNIT3D torrent without a name");
                    return None;
                };
                let details = a.details_link.clone().unwrap_or_default();
                let date = a
                    .created_at
                    .as_deref()
                    .and_then(parse_date)
                    .unwrap_or_else(chrono::Utc::now);

                let mut release = ReleaseInfo::new(name, details.clone(), date);
                release.download_url = a.download_link;
                release.info_url = Some(details).filter(|d| !d.is_empty());
                release.info_hash = row.id;

                let mut cats_found = a
                    .category
                    .as_deref()
                    .map(|c| categories.map_native_desc_to_standard(c))
                    .unwrap_or_default();
                if cats_found.is_empty() {
                    cats_found.push(cats::OTHER);
                }
                release.categories = cats_found;

                release.size = a.size;
                release.files = a.num_file.map(clamp_count);
                release.grabs = a.times_completed.map(clamp_count);
                release.seeders = a.seeders.map(clamp_count);
                release.peers = peer_count(a.seeders, a.leechers);
                release.imdb_id = a.imdb_id.as_deref().and_then(parse_imdb_id);
                release.tmdb_id = a.tmdb_id.filter(|id| *id > 0);
                release.tvdb_id = a.tvdb_id.filter(|id| *id > 0);

                release.download_volume_factor = if a.freeleech { 0.0 } else { 1.0 };
                release.upload_volume_factor = if a.double_upload { 2.0 } else { 1.0 };
                release.minimum_ratio = Some(1.0);
                release.minimum_seed_time = Some(MINIMUM_SEED_TIME);
                release.apply_volume_flags();
                Some(release)
            })
            .collect();

        releases.sort_by(|a, b| b.publish_date.cmp(&a.publish_date));
        debug!(releases = releases.len(), "Parsed UNIT3D response");
        Ok(releases)
    }
}
