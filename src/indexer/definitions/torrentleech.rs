//! TorrentLeech indexer implementation
//!
//! TorrentLeech has no API. The browse page serves JSON when asked through
//! `torrents/browse/list/`, with filters encoded as path segments. Access
//! needs the session cookie from the login form (or one pasted into the
//! settings); an expired session redirects to `/user/account/login`.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::warn;
use url::form_urlencoded;

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
use crate::indexer::session::{CookieLogin, username_password_fields};
use crate::indexer::types::{
    BookSearchParam, DownloadProtocol, MovieSearchParam, MusicSearchParam, ReleaseInfo, SearchCriteria,
    TvSearchParam, full_imdb_id,
};

pub const BASE_URL: &str = "https://www.torrentleech.org/";

const MINIMUM_SEED_TIME: i64 = 864000; // 10 days for registered users

/// Leading dashes would be read as exclusions
static EXCLUSION_DASH: Lazy<Regex> = Lazy::new(|| Regex::new(r"(^|\s)-").unwrap());

pub fn build(definition: IndexerDefinition, settings: IndexerSettings) -> Result<Indexer> {
    settings.base_url()?;

    Ok(IndexerParts {
        protocol: DownloadProtocol::Torrent,
        capabilities: Arc::new(StaticCapabilities(capabilities())),
        generator: Arc::new(TorrentLeechRequestGenerator),
        parser: Arc::new(TorrentLeechParser),
        auth: Arc::new(CookieLogin {
            login_path: "user/account/login/".to_string(),
            fields: username_password_fields,
            login_marker: "/user/account/login".to_string(),
            success_marker: None,
        }),
        rate_limit: None,
        max_pages: 1,
    }
    .into_indexer(definition, settings))
}

pub fn capabilities() -> IndexerCapabilities {
    let mut caps = IndexerCapabilities {
        tv_search_params: vec![
            TvSearchParam::Q,
            TvSearchParam::Season,
            TvSearchParam::Ep,
            TvSearchParam::ImdbId,
        ],
        movie_search_params: vec![MovieSearchParam::Q, MovieSearchParam::ImdbId],
        music_search_params: vec![MusicSearchParam::Q],
        book_search_params: vec![BookSearchParam::Q],
        ..IndexerCapabilities::new()
    };

    let mappings: &[(&str, i32, &str)] = &[
        ("1", cats::MOVIES, "Movies"),
        ("8", cats::MOVIES_SD, "Movies Cam"),
        ("9", cats::MOVIES_SD, "Movies TS/TC"),
        ("11", cats::MOVIES_SD, "Movies DVDRip/DVDScreener"),
        ("12", cats::MOVIES_DVD, "Movies DVD-R"),
        ("13", cats::MOVIES_BLURAY, "Movies Bluray"),
        ("14", cats::MOVIES_HD, "Movies BlurayRip"),
        ("15", cats::MOVIES, "Movies Boxsets"),
        ("29", cats::TV_DOCUMENTARY, "Documentaries"),
        ("47", cats::MOVIES_UHD, "Movies 4K"),
        ("36", cats::MOVIES_FOREIGN, "Movies Foreign"),
        ("37", cats::MOVIES_WEBDL, "Movies WEBRip"),
        ("43", cats::MOVIES_HD, "Movies HDRip"),
        ("2", cats::TV, "TV"),
        ("26", cats::TV_SD, "TV Episodes"),
        ("27", cats::TV, "TV Boxsets"),
        ("32", cats::TV_HD, "TV Episodes HD"),
        ("44", cats::TV_FOREIGN, "TV Foreign"),
        ("3", cats::PC_GAMES, "Games"),
        ("17", cats::PC_GAMES, "Games PC"),
        ("18", cats::CONSOLE_XBOX, "Games XBOX"),
        ("19", cats::CONSOLE_XBOX360, "Games XBOX360"),
        ("40", cats::CONSOLE_XBOX_ONE, "Games XBOXONE"),
        ("20", cats::CONSOLE_PS3, "Games PS2"),
        ("21", cats::CONSOLE_PS3, "Games Mac"),
        ("22", cats::CONSOLE_PSP, "Games PSP"),
        ("28", cats::CONSOLE_WII, "Games Wii"),
        ("30", cats::CONSOLE_NDS, "Games Nintendo DS"),
        ("39", cats::CONSOLE_PS4, "Games PS4"),
        ("42", cats::PC_MAC, "Games Mac"),
        ("48", cats::CONSOLE_OTHER, "Games Nintendo Switch"),
        ("4", cats::AUDIO, "Music"),
        ("16", cats::AUDIO_VIDEO, "Music videos"),
        ("31", cats::AUDIO, "Audio"),
        ("7", cats::TV, "Animation"),
        ("34", cats::TV_ANIME, "TV Anime"),
        ("35", cats::TV, "TV Cartoons"),
        ("5", cats::BOOKS, "Books"),
        ("45", cats::BOOKS_EBOOK, "Books EBooks"),
        ("46", cats::BOOKS_COMICS, "Books Comics"),
        ("6", cats::PC, "Apps"),
        ("23", cats::PC_ISO, "PC ISO"),
        ("24", cats::PC_MAC, "PC Mac"),
        ("25", cats::PC_MOBILE_OTHER, "PC Mobile"),
        ("33", cats::PC_0DAY, "PC 0-day"),
        ("38", cats::OTHER, "Education"),
    ];
    for (id, cat, desc) in mappings {
        caps.categories.add_mapping(*id, *cat, Some(desc));
    }

    caps
}

pub struct TorrentLeechRequestGenerator;

impl TorrentLeechRequestGenerator {
    fn list_path(&self, term: &str, imdb_id: Option<String>, natives: &[String], freeleech_only: bool) -> String {
        let mut path = String::from("torrents/browse/list/");

        if freeleech_only {
            path.push_str("facets/tags%3AFREELEECH/");
        }

        let term = EXCLUSION_DASH.replace_all(term, " ");
        let term = term.trim();

        if let Some(imdb) = imdb_id {
            path.push_str(&format!("imdbID/{}/", imdb));
        } else if !term.is_empty() {
            let encoded: String = form_urlencoded::byte_serialize(term.as_bytes()).collect();
            path.push_str(&format!("exact/1/query/{}/", encoded));
        }

        if natives.is_empty() {
            // include 0day and music
            path.push_str("newfilter/2");
        } else {
            path.push_str(&format!("categories/{}", natives.join(",")));
        }

        path
    }
}

impl RequestGenerator for TorrentLeechRequestGenerator {
    fn search_requests(&self, criteria: &SearchCriteria, ctx: &RequestContext<'_>) -> Result<RequestChain> {
        let term = match criteria {
            SearchCriteria::Tv(_) => criteria.query_string(),
            _ => criteria.common().term().unwrap_or_default().to_string(),
        };
        let imdb_id = criteria.imdb_id().and_then(full_imdb_id);
        let natives = ctx
            .capabilities
            .categories
            .map_standard_to_native(&criteria.common().categories);

        let path = self.list_path(&term, imdb_id, &natives, ctx.settings.freeleech_only);
        let http = HttpRequest::get(ctx.settings.url_for(&path)?).expecting(ContentExpectation::Json);

        let mut chain = RequestChain::new();
        chain.add_tier(RequestTier::single(
            "browse",
            IndexerRequest::new(http, 0, ctx.capabilities.page_size()),
        ));
        Ok(chain)
    }
}

#[derive(Debug, Deserialize)]
struct TorrentList {
    #[serde(rename = "torrentList", default)]
    torrent_list: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TorrentRow {
    #[serde(default, deserialize_with = "lenient::string")]
    name: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    fid: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    filename: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    added_timestamp: Option<String>,
    #[serde(default, deserialize_with = "lenient::int")]
    seeders: Option<i64>,
    #[serde(default, deserialize_with = "lenient::int")]
    leechers: Option<i64>,
    #[serde(default, deserialize_with = "lenient::int")]
    completed: Option<i64>,
    #[serde(default, deserialize_with = "lenient::int")]
    size: Option<i64>,
    #[serde(rename = "categoryID", default, deserialize_with = "lenient::string")]
    category_id: Option<String>,
    #[serde(rename = "imdbID", default, deserialize_with = "lenient::string")]
    imdb_id: Option<String>,
    #[serde(rename = "download_multiplier", default, deserialize_with = "lenient::int")]
    download_multiplier: Option<i64>,
}

pub struct TorrentLeechParser;

impl ResponseParser for TorrentLeechParser {
    fn parse(&self, response: &IndexerResponse<'_>) -> Result<Vec<ReleaseInfo>> {
        if response.http.status != 200 {
            return Err(IndexerError::protocol(
                format!("Unexpected response status {} code from indexer request", response.http.status),
                &response.content(),
            ));
        }

        let base = response.settings.base_url()?;
        let list: TorrentList = response.json()?;

        let mut releases = vec![];
        for row in decode_rows::<TorrentRow>(list.torrent_list.unwrap_or_default()) {
            let (Some(id), Some(name)) = (row.fid, row.name) else {
                warn!("Skipping TorrentLeech row without an id or name");
                continue;
            };

            let filename = row.filename.unwrap_or_default();
            let (Ok(details), Ok(download)) = (
                base.join(&format!("torrent/{}", id)),
                base.join(&format!("download/{}/{}", id, filename)),
            ) else {
                warn!(torrent_id = %id, filename = %filename, "Skipping TorrentLeech row with unusable links");
                continue;
            };

            let date = row
                .added_timestamp
                .as_deref()
                .and_then(parse_date)
                .unwrap_or_else(chrono::Utc::now);

            let mut release = ReleaseInfo::new(name, details.to_string(), date);
            release.info_url = Some(details.to_string());
            release.download_url = Some(download.to_string());
            release.categories = response
                .capabilities
                .categories
                .map_native_to_standard(row.category_id.as_deref().unwrap_or_default());
            release.size = row.size;
            release.grabs = row.completed.map(clamp_count);
            release.seeders = row.seeders.map(clamp_count);
            release.peers = peer_count(row.seeders, row.leechers);
            release.imdb_id = row.imdb_id.as_deref().and_then(parse_imdb_id);
            release.download_volume_factor = row.download_multiplier.unwrap_or(1) as f64;
            release.upload_volume_factor = 1.0;
            release.minimum_ratio = Some(1.0);
            release.minimum_seed_time = Some(MINIMUM_SEED_TIME);
            release.apply_volume_flags();

            releases.push(release);
        }

        Ok(releases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::parser::test_support::parse_body;
    use crate::indexer::request::MAX_PAGES;
    use crate::indexer::types::{MovieSearchCriteria, SearchCommon, TvSearchCriteria};
    use pretty_assertions::assert_eq;

    fn settings() -> IndexerSettings {
        IndexerSettings {
            base_url: BASE_URL.to_string(),
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
            ..Default::default()
        }
    }

    fn url(criteria: &SearchCriteria, settings: &IndexerSettings) -> String {
        let caps = capabilities();
        let ctx = RequestContext {
            settings,
            capabilities: &caps,
            max_pages: MAX_PAGES,
        };
        let mut tiers = TorrentLeechRequestGenerator
            .search_requests(criteria, &ctx)
            .unwrap()
            .into_tiers();
        assert_eq!(tiers.len(), 1);
        tiers[0].pages.next().unwrap().url().to_string()
    }

    #[test]
    fn test_rss_url_uses_default_filter() {
        assert_eq!(
            url(&SearchCriteria::rss(), &settings()),
            "https://www.torrentleech.org/torrents/browse/list/newfilter/2"
        );
    }

    #[test]
    fn test_query_strips_exclusion_dashes() {
        let criteria = SearchCriteria::search("-foo bar -baz").with_categories(vec![cats::TV_HD]);
        let mut settings = settings();
        settings.freeleech_only = true;
        assert_eq!(
            url(&criteria, &settings),
            "https://www.torrentleech.org/torrents/browse/list/facets/tags%3AFREELEECH/\
             exact/1/query/foo+bar++baz/categories/32"
        );
    }

    #[test]
    fn test_imdb_replaces_query() {
        let criteria = SearchCriteria::Movie(MovieSearchCriteria {
            common: SearchCommon {
                search_term: Some("The Matrix".to_string()),
                categories: vec![cats::MOVIES],
                ..Default::default()
            },
            imdb_id: Some("133093".to_string()),
            ..Default::default()
        });
        assert_eq!(
            url(&criteria, &settings()),
            "https://www.torrentleech.org/torrents/browse/list/imdbID/tt0133093/categories/1,8,9,11,12,13,14,15,47,36,37,43"
        );
    }

    #[test]
    fn test_tv_query_includes_episode() {
        let criteria = SearchCriteria::Tv(TvSearchCriteria {
            common: SearchCommon {
                search_term: Some("Dark".to_string()),
                ..Default::default()
            },
            season: Some(1),
            episode: Some("02".to_string()),
            ..Default::default()
        });
        assert_eq!(
            url(&criteria, &settings()),
            "https://www.torrentleech.org/torrents/browse/list/exact/1/query/Dark+S01E02/newfilter/2"
        );
    }

    const BODY: &str = r#"{
      "numFound": 2,
      "torrentList": [
        {
          "fid": "240001",
          "filename": "Dark.S01E02.720p.torrent",
          "name": "Dark.S01E02.720p",
          "addedTimestamp": "2024-05-10 18:30:00",
          "categoryID": 32,
          "size": 1500000000,
          "completed": 44,
          "seeders": 20,
          "leechers": 2,
          "imdbID": "tt5753856",
          "download_multiplier": 0
        },
        {
          "fid": 240002,
          "filename": "Other.torrent",
          "name": "Other",
          "addedTimestamp": "2024-05-09 10:00:00",
          "categoryID": 99,
          "size": "1000",
          "seeders": 1,
          "leechers": 0,
          "imdbID": "",
          "download_multiplier": ""
        }
      ]
    }"#;

    #[test]
    fn test_parse_torrent_list() {
        let releases = parse_body(
            &TorrentLeechParser,
            &capabilities(),
            &settings(),
            "https://www.torrentleech.org/torrents/browse/list/newfilter/2",
            "application/json",
            BODY,
        )
        .unwrap();

        assert_eq!(releases.len(), 2);
        let r = &releases[0];
        assert_eq!(r.guid, "https://www.torrentleech.org/torrent/240001");
        assert_eq!(
            r.download_url.as_deref(),
            Some("https://www.torrentleech.org/download/240001/Dark.S01E02.720p.torrent")
        );
        assert_eq!(r.categories, vec![cats::TV_HD, crate::indexer::categories::custom_category_id("32")]);
        assert_eq!(r.peers, Some(22));
        assert_eq!(r.imdb_id, Some(5753856));
        assert!(r.is_freeleech());
        assert_eq!(r.minimum_seed_time, Some(MINIMUM_SEED_TIME));

        let other = &releases[1];
        assert_eq!(other.categories, vec![cats::OTHER]);
        assert_eq!(other.size, Some(1000));
        assert_eq!(other.imdb_id, None);
        assert_eq!(other.download_volume_factor, 1.0);
    }

    #[test]
    fn test_incomplete_rows_are_skipped() {
        let body = BODY.replacen(
            r#""torrentList": ["#,
            r#""torrentList": [
        {"fid": "1", "name": null},
        {"fid": "2", "name": "Bad.Seeders", "seeders": {"n": 1}},
        {"name": "No.Id"},"#,
            1,
        );
        let releases = parse_body(
            &TorrentLeechParser,
            &capabilities(),
            &settings(),
            "https://www.torrentleech.org/torrents/browse/list/newfilter/2",
            "application/json",
            &body,
        )
        .unwrap();

        let titles: Vec<&str> = releases.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Dark.S01E02.720p", "Other"]);
    }

    #[test]
    fn test_missing_list_is_empty() {
        let releases = parse_body(
            &TorrentLeechParser,
            &capabilities(),
            &settings(),
            "https://www.torrentleech.org/torrents/browse/list/newfilter/2",
            "application/json",
            r#"{"numFound":0}"#,
        )
        .unwrap();
        assert!(releases.is_empty());
    }
}
