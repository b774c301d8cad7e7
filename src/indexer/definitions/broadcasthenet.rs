//! BroadcasTheNet indexer implementation
//!
//! BTN is TV only and speaks JSON-RPC 2.0: every search is a `getTorrents`
//! call carrying the API key, a query object, a result count and an offset.
//! The API answers errors with plain status codes or text bodies, so error
//! statuses are suppressed at the dispatcher and classified here.
//!
//! The API allows 150 calls per hour.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Indexer, IndexerDefinition, IndexerParts, IndexerSettings};
use crate::error::{IndexerError, Result};
use crate::http::dispatcher::DEFAULT_RETRY_AFTER;
use crate::http::{ContentExpectation, HttpRequest};
use crate::indexer::capabilities::{IndexerCapabilities, StaticCapabilities};
use crate::indexer::categories::cats;
use crate::indexer::parser::{
    IndexerResponse, ResponseParser, clamp_count, lenient, parse_imdb_id, peer_count,
};
use crate::indexer::request::{IndexerRequest, RequestChain, RequestContext, RequestGenerator, RequestTier};
use crate::indexer::session::NoAuth;
use crate::indexer::types::{DownloadProtocol, IndexerFlag, ReleaseInfo, SearchCriteria, TvSearchParam};

pub const BASE_URL: &str = "https://api.broadcasthe.net/";

const RATE_LIMIT_MESSAGE: &str = "Cannot do more than 150 API requests per hour.";

static SCHEME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^https?:").unwrap());

pub fn build(definition: IndexerDefinition, settings: IndexerSettings) -> Result<Indexer> {
    settings.base_url()?;
    if settings.api_key().is_none() {
        return Err(IndexerError::Config("BroadcasTheNet requires an API key".to_string()));
    }

    Ok(IndexerParts {
        protocol: DownloadProtocol::Torrent,
        capabilities: Arc::new(StaticCapabilities(capabilities())),
        generator: Arc::new(BroadcastheNetRequestGenerator),
        parser: Arc::new(BroadcastheNetParser),
        auth: Arc::new(NoAuth),
        rate_limit: None,
        max_pages: 1,
    }
    .into_indexer(definition, settings))
}

pub fn capabilities() -> IndexerCapabilities {
    let mut caps = IndexerCapabilities {
        limits_default: 100,
        limits_max: 1000,
        tv_search_params: vec![TvSearchParam::Q, TvSearchParam::Season, TvSearchParam::Ep],
        ..IndexerCapabilities::new()
    };

    caps.categories.add_mapping("SD", cats::TV_SD, Some("SD"));
    caps.categories.add_mapping("720p", cats::TV_HD, Some("720p"));
    caps.categories.add_mapping("1080p", cats::TV_HD, Some("1080p"));
    caps.categories.add_mapping("1080i", cats::TV_HD, Some("1080i"));
    caps.categories.add_mapping("2160p", cats::TV_HD, Some("2160p"));
    caps.categories.add_mapping("Portable Device", cats::TV_SD, Some("Portable Device"));

    caps
}

/// The `getTorrents` query object; absent fields are left out
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
struct TorrentQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    tvdb: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tvrage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    category: Option<String>,
    search: String,
}

pub struct BroadcastheNetRequestGenerator;

impl BroadcastheNetRequestGenerator {
    fn request(
        &self,
        ctx: &RequestContext<'_>,
        query: TorrentQuery,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<RequestChain> {
        let results = limit.filter(|l| *l > 0).unwrap_or(ctx.capabilities.limits_default);
        let offset = offset.unwrap_or(0);
        let api_key = ctx.settings.api_key().unwrap_or_default();

        let body = json!({
            "jsonrpc": "2.0",
            "method": "getTorrents",
            "params": [api_key, query, results, offset],
            "id": Uuid::new_v4().to_string(),
        });

        let http = HttpRequest::post(ctx.settings.base_url()?)
            .with_json(body)
            .expecting(ContentExpectation::Any)
            .suppress_errors();

        let mut chain = RequestChain::new();
        chain.add_tier(RequestTier::single(
            "getTorrents",
            IndexerRequest::new(http, offset, results),
        ));
        Ok(chain)
    }
}

impl RequestGenerator for BroadcastheNetRequestGenerator {
    fn search_requests(&self, criteria: &SearchCriteria, ctx: &RequestContext<'_>) -> Result<RequestChain> {
        let common = criteria.common();
        let search = common.search_term.as_deref().unwrap_or_default().replace(' ', "%");

        let query = match criteria {
            SearchCriteria::Basic(_) => TorrentQuery {
                search,
                ..Default::default()
            },
            SearchCriteria::Tv(tv) => {
                let mut query = TorrentQuery {
                    search,
                    tvdb: tv.tvdb_id.filter(|id| *id > 0).map(|id| id.to_string()),
                    tvrage: tv.tvrage_id.filter(|id| *id > 0).map(|id| id.to_string()),
                    ..Default::default()
                };

                let episode = tv.episode.as_deref().map(str::trim).filter(|e| !e.is_empty());
                match (tv.season.filter(|s| *s > 0), episode) {
                    (Some(season), None) => {
                        query.name = Some(format!("Season {}%", season));
                        query.category = Some("Season".to_string());
                    }
                    (Some(season), Some(ep)) => {
                        if let Some(ep) = ep.parse::<i32>().ok().filter(|e| *e > 0) {
                            query.name = Some(format!("S{:02}E{:02}", season, ep));
                            query.category = Some("Episode".to_string());
                        }
                    }
                    _ => {}
                }
                query
            }
            // TV only
            _ => return Ok(RequestChain::new()),
        };

        self.request(ctx, query, common.limit, common.offset)
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<TorrentsResult>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TorrentsResult {
    #[serde(default, deserialize_with = "lenient::int")]
    results: Option<i64>,
    /// Object keyed by torrent id, or an empty array when nothing matched
    #[serde(default)]
    torrents: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BtnTorrent {
    #[serde(rename = "TorrentID", default, deserialize_with = "lenient::string")]
    torrent_id: Option<String>,
    #[serde(rename = "GroupID", default, deserialize_with = "lenient::string")]
    group_id: Option<String>,
    #[serde(rename = "DownloadURL", default, deserialize_with = "lenient::string")]
    download_url: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    release_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    resolution: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    info_hash: Option<String>,
    #[serde(default, deserialize_with = "lenient::int")]
    size: Option<i64>,
    #[serde(default, deserialize_with = "lenient::int")]
    snatched: Option<i64>,
    #[serde(default, deserialize_with = "lenient::int")]
    seeders: Option<i64>,
    #[serde(default, deserialize_with = "lenient::int")]
    leechers: Option<i64>,
    #[serde(default, deserialize_with = "lenient::int")]
    time: Option<i64>,
    #[serde(default, deserialize_with = "lenient::string")]
    origin: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    category: Option<String>,
    #[serde(rename = "TvdbID", default, deserialize_with = "lenient::int")]
    tvdb_id: Option<i64>,
    #[serde(rename = "TvrageID", default, deserialize_with = "lenient::int")]
    tvrage_id: Option<i64>,
    #[serde(rename = "ImdbID", default, deserialize_with = "lenient::string")]
    imdb_id: Option<String>,
}

pub struct BroadcastheNetParser;

impl BroadcastheNetParser {
    fn check_status(response: &IndexerResponse<'_>) -> Result<()> {
        let content = response.content();
        match response.http.status {
            200 => {}
            401 => return Err(IndexerError::Auth("API Key invalid or not authorized".to_string())),
            404 => {
                return Err(IndexerError::protocol(
                    "Indexer API call returned NotFound, the Indexer API may have changed.",
                    &content,
                ));
            }
            503 => return Err(IndexerError::rate_limited(DEFAULT_RETRY_AFTER, RATE_LIMIT_MESSAGE)),
            status => {
                return Err(IndexerError::protocol(
                    format!("Indexer API call returned an unexpected StatusCode [{}]", status),
                    &content,
                ));
            }
        }

        if response
            .http
            .content_type()
            .is_some_and(|ct| ct.contains("text/html"))
        {
            return Err(IndexerError::protocol(
                "Indexer responded with html content. Site is likely blocked or unavailable.",
                &content,
            ));
        }

        if content.to_lowercase().contains("call limit exceeded") {
            return Err(IndexerError::rate_limited(DEFAULT_RETRY_AFTER, RATE_LIMIT_MESSAGE));
        }

        if content.trim() == "Query execution was interrupted" {
            return Err(IndexerError::protocol(
                "Indexer API returned an internal server error",
                &content,
            ));
        }

        Ok(())
    }
}

impl ResponseParser for BroadcastheNetParser {
    fn parse(&self, response: &IndexerResponse<'_>) -> Result<Vec<ReleaseInfo>> {
        Self::check_status(response)?;

        let rpc: JsonRpcResponse = response.json()?;
        let result = match (rpc.error, rpc.result) {
            (None, Some(result)) => result,
            (error, _) => {
                let error = error.map(|e| e.to_string()).unwrap_or_default();
                return Err(IndexerError::protocol(
                    format!("Indexer API call returned an error [{}]", error),
                    &response.content(),
                ));
            }
        };

        let torrents = match result.torrents {
            serde_json::Value::Object(map) if result.results.unwrap_or(0) > 0 => map,
            _ => return Ok(vec![]),
        };

        let scheme = format!("{}:", response.request.http.url.scheme());
        let categories = &response.capabilities.categories;

        let mut releases = Vec::with_capacity(torrents.len());
        for (key, value) in torrents {
            let torrent: BtnTorrent = match serde_json::from_value(value) {
                Ok(torrent) => torrent,
                Err(e) => {
                    warn!(torrent_id = %key, error = %e, "Skipping malformed BTN torrent");
                    continue;
                }
            };
            let Some(release_name) = torrent.release_name.clone() else {
                warn!(torrent_id = %key, "Skipping BTN torrent without a release name");
                continue;
            };

            let torrent_id = torrent.torrent_id.unwrap_or(key);
            let group_id = torrent.group_id.unwrap_or_default();
            let date = torrent
                .time
                .and_then(|t| chrono::DateTime::from_timestamp(t, 0))
                .unwrap_or_else(chrono::Utc::now);

            let mut release = ReleaseInfo::new(
                release_name.replace('\\', ""),
                format!("BTN-{}", torrent_id),
                date,
            );
            release.info_url = Some(format!(
                "{}//broadcasthe.net/torrents.php?id={}&torrentid={}",
                scheme, group_id, torrent_id
            ));
            release.download_url = torrent
                .download_url
                .as_deref()
                .map(|url| SCHEME.replace(url, scheme.as_str()).into_owned());

            release.categories = torrent
                .resolution
                .as_deref()
                .map(|r| categories.lookup_native(r))
                .unwrap_or_default();
            if release.categories.is_empty() {
                release.categories = vec![cats::TV];
            }

            release.info_hash = torrent.info_hash;
            release.size = torrent.size;
            release.grabs = torrent.snatched.map(clamp_count);
            release.seeders = torrent.seeders.map(clamp_count);
            release.peers = peer_count(torrent.seeders, torrent.leechers);

            match torrent.origin.as_deref().map(str::to_uppercase).as_deref() {
                Some("INTERNAL") => release.add_flag(IndexerFlag::Internal),
                Some("SCENE") => release.add_flag(IndexerFlag::Scene),
                _ => {}
            }

            release.download_volume_factor = 0.0;
            release.upload_volume_factor = 1.0;
            release.minimum_ratio = Some(1.0);
            // 120 hours for season packs, 24 for episodes
            release.minimum_seed_time = Some(
                if torrent.category.as_deref().is_some_and(|c| c.eq_ignore_ascii_case("season")) {
                    432000
                } else {
                    86400
                },
            );
            release.apply_volume_flags();

            release.tvdb_id = torrent.tvdb_id.filter(|id| *id > 0);
            release.tvrage_id = torrent.tvrage_id.filter(|id| *id > 0);
            release.imdb_id = torrent.imdb_id.as_deref().and_then(parse_imdb_id);

            releases.push(release);
        }

        debug!(releases = releases.len(), "Parsed BroadcasTheNet response");
        Ok(releases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RequestBody;
    use crate::indexer::parser::test_support::{http_response, parse_body};
    use crate::indexer::request::MAX_PAGES;
    use crate::indexer::types::{MovieSearchCriteria, SearchCommon, TvSearchCriteria};
    use pretty_assertions::assert_eq;

    fn settings() -> IndexerSettings {
        IndexerSettings {
            base_url: BASE_URL.to_string(),
            api_key: Some("btnkey".to_string()),
            ..Default::default()
        }
    }

    fn body_for(criteria: &SearchCriteria) -> Option<serde_json::Value> {
        let settings = settings();
        let caps = capabilities();
        let ctx = RequestContext {
            settings: &settings,
            capabilities: &caps,
            max_pages: MAX_PAGES,
        };
        let chain = BroadcastheNetRequestGenerator
            .search_requests(criteria, &ctx)
            .unwrap();
        let tier = chain.into_tiers().into_iter().next()?;
        let request = tier.pages.into_iter().next()?;
        match request.http.body {
            Some(RequestBody::Json(value)) => Some(value),
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn test_episode_query() {
        let criteria = SearchCriteria::Tv(TvSearchCriteria {
            common: SearchCommon {
                search_term: Some("The Wire".to_string()),
                ..Default::default()
            },
            tvdb_id: Some(79126),
            season: Some(1),
            episode: Some("2".to_string()),
            ..Default::default()
        });
        let body = body_for(&criteria).unwrap();

        assert_eq!(body["method"], "getTorrents");
        assert_eq!(body["jsonrpc"], "2.0");
        let params = body["params"].as_array().unwrap();
        assert_eq!(params[0], "btnkey");
        assert_eq!(
            params[1],
            json!({"Tvdb": "79126", "Name": "S01E02", "Category": "Episode", "Search": "The%Wire"})
        );
        assert_eq!(params[2], 100);
        assert_eq!(params[3], 0);
    }

    #[test]
    fn test_season_query() {
        let criteria = SearchCriteria::Tv(TvSearchCriteria {
            season: Some(3),
            ..Default::default()
        })
        .with_paging(Some(250), Some(50));
        let body = body_for(&criteria).unwrap();
        let params = body["params"].as_array().unwrap();
        assert_eq!(params[1]["Name"], "Season 3%");
        assert_eq!(params[1]["Category"], "Season");
        assert_eq!(params[2], 250);
        assert_eq!(params[3], 50);
    }

    #[test]
    fn test_movie_search_is_unsupported() {
        let criteria = SearchCriteria::Movie(MovieSearchCriteria::default());
        assert!(body_for(&criteria).is_none());
    }

    fn parse(status: u16, content_type: &str, body: &str) -> Result<Vec<ReleaseInfo>> {
        let request = IndexerRequest::new(
            HttpRequest::post(url::Url::parse(BASE_URL).unwrap()),
            0,
            100,
        );
        let http = http_response(BASE_URL, status, content_type, body);
        BroadcastheNetParser.parse(&IndexerResponse {
            request: &request,
            http: &http,
            capabilities: &capabilities(),
            settings: &settings(),
        })
    }

    const BODY: &str = r#"{
      "id": "1",
      "result": {
        "results": "1",
        "torrents": {
          "1234": {
            "GroupName": "S01E02",
            "GroupID": "99",
            "TorrentID": "1234",
            "SeriesID": "5",
            "Series": "The Wire",
            "Category": "Episode",
            "Snatched": "40",
            "Seeders": "20",
            "Leechers": "2",
            "Source": "HDTV",
            "Container": "MKV",
            "Codec": "x264",
            "Resolution": "720p",
            "Origin": "Scene",
            "ReleaseName": "The.Wire.S01E02.720p.HDTV.x264\\-GRP",
            "Size": "1500000000",
            "Time": "1700000000",
            "TvdbID": "79126",
            "TvrageID": "0",
            "ImdbID": "0306414",
            "InfoHash": "0123456789ABCDEF",
            "DownloadURL": "https://broadcasthe.net/torrents.php?action=download&id=1234"
          }
        }
      }
    }"#;

    #[test]
    fn test_parse_torrents() {
        let releases = parse_body(
            &BroadcastheNetParser,
            &capabilities(),
            &settings(),
            BASE_URL,
            "application/json",
            BODY,
        )
        .unwrap();

        assert_eq!(releases.len(), 1);
        let r = &releases[0];
        assert_eq!(r.guid, "BTN-1234");
        assert_eq!(r.title, "The.Wire.S01E02.720p.HDTV.x264-GRP");
        assert_eq!(
            r.info_url.as_deref(),
            Some("https://broadcasthe.net/torrents.php?id=99&torrentid=1234")
        );
        assert_eq!(r.categories, vec![cats::TV_HD]);
        assert_eq!(r.peers, Some(22));
        assert_eq!(r.minimum_seed_time, Some(86400));
        assert_eq!(r.tvdb_id, Some(79126));
        assert_eq!(r.tvrage_id, None);
        assert_eq!(r.imdb_id, Some(306414));
        assert_eq!(r.publish_date.timestamp(), 1700000000);
        assert!(r.flags.contains(&IndexerFlag::Scene));
        assert!(r.is_freeleech());
    }

    #[test]
    fn test_malformed_torrents_are_skipped() {
        let body = BODY.replacen(
            r#""torrents": {"#,
            r#""torrents": {
          "1": {"TorrentID": "1", "ReleaseName": null},
          "2": {"TorrentID": "2", "ReleaseName": "Bad.Time", "Time": [1]},
          "3": {"TorrentID": "3", "ReleaseName": "Huge.Peers", "Seeders": "5",
                "Leechers": "9223372036854775807"},"#,
            1,
        );
        let releases = parse_body(
            &BroadcastheNetParser,
            &capabilities(),
            &settings(),
            BASE_URL,
            "application/json",
            &body,
        )
        .unwrap();

        let mut titles: Vec<&str> = releases.iter().map(|r| r.title.as_str()).collect();
        titles.sort();
        assert_eq!(titles, vec!["Huge.Peers", "The.Wire.S01E02.720p.HDTV.x264-GRP"]);
        let huge = releases.iter().find(|r| r.title == "Huge.Peers").unwrap();
        assert_eq!(huge.peers, Some(i32::MAX));
    }

    #[test]
    fn test_no_results() {
        let body = r#"{"id":"1","result":{"results":"0","torrents":[]}}"#;
        let releases = parse(200, "application/json", body).unwrap();
        assert!(releases.is_empty());
    }

    #[test]
    fn test_error_statuses() {
        assert_eq!(parse(401, "text/plain", "").unwrap_err().kind(), "auth");
        assert_eq!(parse(404, "text/plain", "").unwrap_err().kind(), "protocol");

        let limited = parse(503, "text/plain", "").unwrap_err();
        assert_eq!(limited.retry_after(), Some(DEFAULT_RETRY_AFTER));

        let limited = parse(200, "application/json", "Call Limit Exceeded").unwrap_err();
        assert_eq!(limited.kind(), "rate_limited");

        let interrupted = parse(200, "text/plain", "Query execution was interrupted").unwrap_err();
        assert_eq!(interrupted.kind(), "protocol");

        let rpc_error = parse(
            200,
            "application/json",
            r#"{"id":"1","error":{"code":-32002,"message":"Invalid API Key"}}"#,
        )
        .unwrap_err();
        assert_eq!(rpc_error.kind(), "protocol");
    }
}
