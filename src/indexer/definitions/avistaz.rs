//! AvistaZ indexer implementation
//!
//! AvistaZ (aka AsiaTorrents) exposes a JSON search API shared across the
//! AvistaZ network. Searching requires a bearer token obtained by posting
//! username, password and PID to `api/v1/jackett/auth`; a 401 or 412 means
//! the token has expired.
//!
//! The API does not page and returns server local time (UTC+1) without a zone.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use super::{Indexer, IndexerDefinition, IndexerParts, IndexerSettings};
use crate::error::{IndexerError, Result};
use crate::http::dispatcher::DEFAULT_RETRY_AFTER;
use crate::http::{ContentExpectation, HttpRequest};
use crate::indexer::capabilities::{IndexerCapabilities, StaticCapabilities};
use crate::indexer::categories::cats;
use crate::indexer::parser::{
    IndexerResponse, ResponseParser, clamp_count, decode_rows, lenient, parse_date,
    parse_date_with_offset, parse_imdb_id, peer_count,
};
use crate::indexer::request::{IndexerRequest, RequestChain, RequestContext, RequestGenerator, RequestTier};
use crate::indexer::session::TokenLogin;
use crate::indexer::types::{
    DownloadProtocol, MovieSearchParam, ReleaseInfo, SearchCriteria, TvSearchCriteria, TvSearchParam,
    full_imdb_id,
};

pub const BASE_URL: &str = "https://avistaz.to/";

const PAGE_SIZE: u32 = 50;
const RATE_LIMIT: Duration = Duration::from_secs(6);
const TIMEZONE_OFFSET_HOURS: i32 = 1;
const MINIMUM_SEED_TIME: i64 = 172800; // 48 hours

const HD_RESOLUTIONS: [&str; 3] = ["1080p", "1080i", "720p"];

pub fn build(definition: IndexerDefinition, settings: IndexerSettings) -> Result<Indexer> {
    settings.base_url()?;

    Ok(IndexerParts {
        protocol: DownloadProtocol::Torrent,
        capabilities: Arc::new(StaticCapabilities(capabilities())),
        generator: Arc::new(AvistazRequestGenerator),
        parser: Arc::new(AvistazParser),
        auth: Arc::new(TokenLogin {
            login_path: "api/v1/jackett/auth".to_string(),
            fields: login_fields,
            token_field: "token",
        }),
        rate_limit: Some(RATE_LIMIT),
        max_pages: 1,
    }
    .into_indexer(definition, settings))
}

fn login_fields(settings: &IndexerSettings) -> Vec<(String, String)> {
    vec![
        ("username".to_string(), settings.username.clone().unwrap_or_default()),
        ("password".to_string(), settings.password.clone().unwrap_or_default()),
        (
            "pid".to_string(),
            settings.pid.as_deref().unwrap_or_default().trim().to_string(),
        ),
    ]
}

pub fn capabilities() -> IndexerCapabilities {
    let mut caps = IndexerCapabilities {
        limits_default: PAGE_SIZE,
        limits_max: PAGE_SIZE,
        tv_search_params: vec![
            TvSearchParam::Q,
            TvSearchParam::Season,
            TvSearchParam::Ep,
            TvSearchParam::ImdbId,
            TvSearchParam::TvdbId,
            TvSearchParam::Genre,
        ],
        movie_search_params: vec![
            MovieSearchParam::Q,
            MovieSearchParam::ImdbId,
            MovieSearchParam::TmdbId,
            MovieSearchParam::Genre,
        ],
        ..IndexerCapabilities::new()
    };

    for cat in [cats::MOVIES, cats::MOVIES_UHD, cats::MOVIES_HD, cats::MOVIES_SD] {
        caps.categories.add_mapping("1", cat, None);
    }
    for cat in [cats::TV, cats::TV_UHD, cats::TV_HD, cats::TV_SD] {
        caps.categories.add_mapping("2", cat, None);
    }

    caps
}

pub struct AvistazRequestGenerator;

type Params = Vec<(&'static str, String)>;

impl AvistazRequestGenerator {
    fn basic_parameters(&self, ctx: &RequestContext<'_>, categories: &[i32], genre: Option<&str>) -> Params {
        let natives = ctx.capabilities.categories.map_standard_to_native(categories);
        let mut params: Params = vec![
            ("in", "1".to_string()),
            ("type", natives.first().cloned().unwrap_or_else(|| "0".to_string())),
        ];

        if ctx.settings.freeleech_only {
            params.push(("discount[]", "1".to_string()));
        }

        if let Some(genre) = genre.map(str::trim).filter(|g| !g.is_empty()) {
            params.push(("tags", genre.to_string()));
        }

        // resolution filter, only when no whole parent was requested
        let has = |id: i32| categories.contains(&id);
        if !has(cats::MOVIES) && !has(cats::TV) && !has(cats::AUDIO) {
            if has(cats::MOVIES_UHD) || has(cats::TV_UHD) {
                params.push(("video_quality[]", "6".to_string())); // 2160p
            }
            if has(cats::MOVIES_HD) || has(cats::TV_HD) {
                params.push(("video_quality[]", "2".to_string())); // 720p
                params.push(("video_quality[]", "7".to_string())); // 1080i
                params.push(("video_quality[]", "3".to_string())); // 1080p
            }
            if has(cats::MOVIES_SD) || has(cats::TV_SD) {
                params.push(("video_quality[]", "1".to_string())); // SD
            }
        }

        params
    }

    fn request(&self, ctx: &RequestContext<'_>, params: Params) -> Result<RequestChain> {
        let mut url = ctx.settings.url_for("api/v1/jackett/torrents")?;
        {
            let mut query = url.query_pairs_mut();
            for (k, v) in &params {
                query.append_pair(k, v);
            }
        }

        // the API omits content headers on some errors, so HTML is not rejected up front
        let http = HttpRequest::get(url)
            .expecting(ContentExpectation::Any)
            .suppress_status(401)
            .suppress_status(404)
            .suppress_status(412);

        let mut chain = RequestChain::new();
        chain.add_tier(RequestTier::single(
            "torrents",
            IndexerRequest::new(http, 0, ctx.capabilities.page_size()),
        ));
        Ok(chain)
    }
}

/// Episode part of a TV search; AvistaZ lists some shows by episode only
/// (e.g. "Running Man E323")
fn episode_search_term(tv: &TvSearchCriteria) -> String {
    let episode = tv.episode.as_deref().map(str::trim).filter(|e| !e.is_empty());
    match (tv.season.filter(|s| *s > 0), episode) {
        (None, Some(ep)) => format!("E{}", ep),
        _ => tv.episode_string().unwrap_or_default(),
    }
}

impl RequestGenerator for AvistazRequestGenerator {
    fn search_requests(&self, criteria: &SearchCriteria, ctx: &RequestContext<'_>) -> Result<RequestChain> {
        let common = criteria.common();
        let term = common.term().unwrap_or_default().to_string();

        let params = match criteria {
            SearchCriteria::Basic(_) | SearchCriteria::Music(_) => {
                let mut params = self.basic_parameters(ctx, &common.categories, None);
                params.push(("search", term));
                params
            }
            SearchCriteria::Movie(m) => {
                let mut params = self.basic_parameters(ctx, &common.categories, m.genre.as_deref());
                if let Some(imdb) = m.imdb_id.as_deref().and_then(full_imdb_id) {
                    params.push(("imdb", imdb));
                } else if let Some(tmdb) = m.tmdb_id {
                    params.push(("tmdb", tmdb.to_string()));
                } else {
                    params.push(("search", term));
                }
                params
            }
            SearchCriteria::Tv(tv) => {
                let mut params = self.basic_parameters(ctx, &common.categories, None);
                if let Some(imdb) = tv.imdb_id.as_deref().and_then(full_imdb_id) {
                    params.push(("imdb", imdb));
                    params.push(("search", episode_search_term(tv).trim().to_string()));
                } else if let Some(tvdb) = tv.tvdb_id {
                    params.push(("tvdb", tvdb.to_string()));
                    params.push(("search", episode_search_term(tv).trim().to_string()));
                } else {
                    let search = format!("{} {}", term, episode_search_term(tv));
                    params.push(("search", search.trim().to_string()));
                }
                params
            }
            SearchCriteria::Book(_) => {
                debug!("AvistaZ has no book search");
                return Ok(RequestChain::new());
            }
        };

        self.request(ctx, params)
    }
}

#[derive(Debug, Deserialize)]
struct AvistazResponse {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct AvistazRelease {
    #[serde(default, deserialize_with = "lenient::string")]
    url: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    download: Option<String>,
    #[serde(default)]
    movie_tv: Option<AvistazIdInfo>,
    #[serde(default, deserialize_with = "lenient::string")]
    created_at: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    file_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    info_hash: Option<String>,
    #[serde(default, deserialize_with = "lenient::int")]
    leech: Option<i64>,
    #[serde(default, deserialize_with = "lenient::int")]
    completed: Option<i64>,
    #[serde(default, deserialize_with = "lenient::int")]
    seed: Option<i64>,
    #[serde(default, deserialize_with = "lenient::int")]
    file_size: Option<i64>,
    #[serde(default, deserialize_with = "lenient::int")]
    file_count: Option<i64>,
    #[serde(default, deserialize_with = "lenient::float")]
    download_multiply: Option<f64>,
    #[serde(default, deserialize_with = "lenient::float")]
    upload_multiply: Option<f64>,
    #[serde(default)]
    video_quality: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    audio: Option<Vec<AvistazLanguage>>,
    #[serde(default)]
    subtitle: Option<Vec<AvistazLanguage>>,
}

#[derive(Debug, Deserialize)]
struct AvistazLanguage {
    #[serde(default)]
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AvistazIdInfo {
    #[serde(default, deserialize_with = "lenient::string")]
    imdb: Option<String>,
    #[serde(default, deserialize_with = "lenient::int")]
    tmdb: Option<i64>,
    #[serde(default, deserialize_with = "lenient::int")]
    tvdb: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct AvistazErrorResponse {
    message: Option<String>,
}

fn parse_categories(row: &AvistazRelease) -> Vec<i32> {
    let resolution = row.video_quality.as_deref().unwrap_or_default();
    let hd = HD_RESOLUTIONS.contains(&resolution);
    let uhd = resolution == "2160p";

    let cat = match row.kind.as_deref() {
        Some("Movie") if hd => cats::MOVIES_HD,
        Some("Movie") if uhd => cats::MOVIES_UHD,
        Some("Movie") => cats::MOVIES_SD,
        Some("TV-Show") if hd => cats::TV_HD,
        Some("TV-Show") if uhd => cats::TV_UHD,
        Some("TV-Show") => cats::TV_SD,
        Some("Music") => cats::AUDIO,
        other => {
            warn!(kind = ?other, title = ?row.file_name, "Unknown AvistaZ category type");
            cats::OTHER
        }
    };
    vec![cat]
}

fn languages(list: Option<Vec<AvistazLanguage>>) -> Vec<String> {
    list.unwrap_or_default()
        .into_iter()
        .filter_map(|l| l.language)
        .collect()
}

pub struct AvistazParser;

impl ResponseParser for AvistazParser {
    fn parse(&self, response: &IndexerResponse<'_>) -> Result<Vec<ReleaseInfo>> {
        let content = response.content();

        match response.http.status {
            200 => {}
            404 => return Ok(vec![]),
            429 => return Err(IndexerError::rate_limited(DEFAULT_RETRY_AFTER, "API Request Limit Reached")),
            401 | 412 => {
                let message = serde_json::from_str::<AvistazErrorResponse>(&content)
                    .ok()
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| "Unauthorized request to indexer".to_string());
                return Err(IndexerError::Auth(message));
            }
            status => {
                return Err(IndexerError::protocol(
                    format!("Unexpected response status {} code from indexer request", status),
                    &content,
                ));
            }
        }

        let content_type = response.http.content_type().unwrap_or_default();
        if !content_type.contains("application/json") {
            return Err(IndexerError::protocol(
                format!(
                    "Unexpected response header {} from indexer request, expected application/json",
                    content_type
                ),
                &content,
            ));
        }

        let parsed: AvistazResponse = response.json()?;

        let mut releases: Vec<ReleaseInfo> = decode_rows::<AvistazRelease>(parsed.data)
            .into_iter()
            .filter_map(|row| {
                let Some(title) = row.file_name.clone() else {
                    warn!(url = ?row.url, "Skipping AvistaZ release without a file name");
                    return None;
                };
                let details = row.url.clone().unwrap_or_default();
                let categories = parse_categories(&row);
                let date = row
                    .created_at
                    .as_deref()
                    .and_then(|d| {
                        parse_date_with_offset(d, "%Y-%m-%d %H:%M:%S", TIMEZONE_OFFSET_HOURS)
                            .or_else(|| parse_date(d))
                    })
                    .unwrap_or_else(chrono::Utc::now);

                let mut release = ReleaseInfo::new(title, details.clone(), date);
                release.download_url = row.download;
                release.info_url = Some(details).filter(|d| !d.is_empty());
                release.info_hash = row.info_hash;
                release.categories = categories;
                release.size = row.file_size;
                release.files = row.file_count.map(clamp_count);
                release.grabs = row.completed.map(clamp_count);
                release.seeders = row.seed.map(clamp_count);
                release.peers = peer_count(row.seed, row.leech);
                release.download_volume_factor = row.download_multiply.unwrap_or(1.0);
                release.upload_volume_factor = row.upload_multiply.unwrap_or(1.0);
                release.minimum_ratio = Some(1.0);
                release.minimum_seed_time = Some(MINIMUM_SEED_TIME);
                release.languages = languages(row.audio);
                release.subs = languages(row.subtitle);
                release.apply_volume_flags();

                if let Some(ids) = row.movie_tv {
                    release.imdb_id = ids.imdb.as_deref().and_then(parse_imdb_id);
                    release.tmdb_id = ids.tmdb.filter(|id| *id > 0);
                    release.tvdb_id = ids.tvdb.filter(|id| *id > 0);
                }

                Some(release)
            })
            .collect();

        releases.sort_by(|a, b| b.publish_date.cmp(&a.publish_date));
        Ok(releases)
    }
}
