//! Torznab XML response generation
//!
//! Generates RSS 2.0 XML with Torznab/Newznab extensions.

use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use quick_xml::{
    Writer,
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};
use std::io::Cursor;

use crate::error::IndexerError;
use crate::indexer::capabilities::IndexerCapabilities;
use crate::indexer::categories::IndexerCategory;
use crate::indexer::types::{DownloadProtocol, ReleaseInfo};

type XmlWriter = Writer<Cursor<Vec<u8>>>;

/// Torznab response wrapper
pub enum TorznabResponse {
    Xml(String),
    Error(TorznabError),
}

/// Channel metadata of a feed
pub struct FeedInfo<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub link: &'a str,
    pub protocol: DownloadProtocol,
}

impl TorznabResponse {
    /// Create a capabilities response
    pub fn capabilities(title: &str, caps: &IndexerCapabilities) -> Self {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        write_decl(&mut writer);

        start(&mut writer, "caps");

        let mut server = BytesStart::new("server");
        server.push_attribute(("title", title));
        writer.write_event(Event::Empty(server)).ok();

        let mut limits = BytesStart::new("limits");
        limits.push_attribute(("default", caps.limits_default.to_string().as_str()));
        limits.push_attribute(("max", caps.limits_max.to_string().as_str()));
        writer.write_event(Event::Empty(limits)).ok();

        start(&mut writer, "searching");

        let mut search = BytesStart::new("search");
        search.push_attribute(("available", if caps.search_available { "yes" } else { "no" }));
        search.push_attribute(("supportedParams", "q"));
        if caps.supports_raw_search {
            search.push_attribute(("searchEngine", "raw"));
        }
        writer.write_event(Event::Empty(search)).ok();
        write_search_element(
            &mut writer,
            "tv-search",
            caps.tv_search_available(),
            &join_params(caps.tv_search_params.iter().map(|p| p.as_str())),
        );
        write_search_element(
            &mut writer,
            "movie-search",
            caps.movie_search_available(),
            &join_params(caps.movie_search_params.iter().map(|p| p.as_str())),
        );
        write_search_element(
            &mut writer,
            "music-search",
            caps.music_search_available(),
            &join_params(caps.music_search_params.iter().map(|p| p.as_str())),
        );
        write_search_element(
            &mut writer,
            "audio-search",
            caps.music_search_available(),
            &join_params(caps.music_search_params.iter().map(|p| p.as_str())),
        );
        write_search_element(
            &mut writer,
            "book-search",
            caps.book_search_available(),
            &join_params(caps.book_search_params.iter().map(|p| p.as_str())),
        );

        end(&mut writer, "searching");

        start(&mut writer, "categories");
        for category in caps.categories.tree() {
            write_category(&mut writer, category);
        }
        end(&mut writer, "categories");

        end(&mut writer, "caps");

        TorznabResponse::Xml(finish(writer))
    }

    /// Create a search results response
    pub fn search_results(feed: &FeedInfo<'_>, releases: &[ReleaseInfo]) -> Self {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        write_decl(&mut writer);

        let mut rss = BytesStart::new("rss");
        rss.push_attribute(("version", "2.0"));
        rss.push_attribute(("xmlns:atom", "http://www.w3.org/2005/Atom"));
        match feed.protocol {
            DownloadProtocol::Torrent => {
                rss.push_attribute(("xmlns:torznab", "http://torznab.com/schemas/2015/feed"))
            }
            DownloadProtocol::Usenet => {
                rss.push_attribute(("xmlns:newznab", "http://www.newznab.com/DTD/2010/feeds/attributes/"))
            }
        }
        writer.write_event(Event::Start(rss)).ok();

        start(&mut writer, "channel");
        write_text_element(&mut writer, "title", feed.title);
        write_text_element(&mut writer, "description", feed.description);
        write_text_element(&mut writer, "link", feed.link);
        write_text_element(&mut writer, "language", "en-us");

        for release in releases {
            write_release_item(&mut writer, release, feed.protocol);
        }

        end(&mut writer, "channel");
        end(&mut writer, "rss");

        TorznabResponse::Xml(finish(writer))
    }
}

impl IntoResponse for TorznabResponse {
    fn into_response(self) -> Response {
        match self {
            TorznabResponse::Xml(xml) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/rss+xml; charset=utf-8")],
                xml,
            )
                .into_response(),
            TorznabResponse::Error(err) => err.into_response(),
        }
    }
}

/// Torznab error response
#[derive(Debug)]
pub struct TorznabError {
    code: i32,
    description: String,
    status: StatusCode,
}

impl TorznabError {
    pub fn new(code: i32, description: impl Into<String>, status: StatusCode) -> Self {
        Self {
            code,
            description: description.into(),
            status,
        }
    }

    pub fn unauthorized(msg: &str) -> Self {
        Self::new(100, msg, StatusCode::UNAUTHORIZED)
    }

    pub fn not_found(msg: &str) -> Self {
        Self::new(201, msg, StatusCode::NOT_FOUND)
    }

    pub fn bad_request(msg: &str) -> Self {
        Self::new(201, msg, StatusCode::BAD_REQUEST)
    }

    pub fn function_not_available(msg: &str) -> Self {
        Self::new(203, msg, StatusCode::BAD_REQUEST)
    }

    pub fn indexer_error(msg: &str) -> Self {
        Self::new(900, msg, StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    fn to_xml(&self) -> String {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        write_decl(&mut writer);

        let mut error = BytesStart::new("error");
        error.push_attribute(("code", self.code.to_string().as_str()));
        error.push_attribute(("description", self.description.as_str()));
        writer.write_event(Event::Empty(error)).ok();

        finish(writer)
    }
}

impl From<&IndexerError> for TorznabError {
    fn from(err: &IndexerError) -> Self {
        match err {
            IndexerError::NotSupported(msg) => Self::function_not_available(msg),
            IndexerError::RateLimited { retry_after, .. } => Self::new(
                900,
                format!("Indexer is rate limited, retry after {}s", retry_after.as_secs()),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            other => Self::indexer_error(&other.to_string()),
        }
    }
}

impl IntoResponse for TorznabError {
    fn into_response(self) -> Response {
        let xml = self.to_xml();
        (
            self.status,
            [(header::CONTENT_TYPE, "application/xml; charset=utf-8")],
            xml,
        )
            .into_response()
    }
}

fn write_decl(writer: &mut XmlWriter) {
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .ok();
}

fn start(writer: &mut XmlWriter, name: &str) {
    writer.write_event(Event::Start(BytesStart::new(name))).ok();
}

fn end(writer: &mut XmlWriter, name: &str) {
    writer.write_event(Event::End(BytesEnd::new(name))).ok();
}

fn finish(writer: XmlWriter) -> String {
    String::from_utf8(writer.into_inner().into_inner()).unwrap_or_default()
}

fn write_text_element(writer: &mut XmlWriter, name: &str, text: &str) {
    start(writer, name);
    writer.write_event(Event::Text(BytesText::new(text))).ok();
    end(writer, name);
}

fn write_search_element(writer: &mut XmlWriter, name: &str, available: bool, params: &str) {
    let mut elem = BytesStart::new(name);
    elem.push_attribute(("available", if available { "yes" } else { "no" }));
    elem.push_attribute(("supportedParams", params));
    writer.write_event(Event::Empty(elem)).ok();
}

fn write_category(writer: &mut XmlWriter, category: &IndexerCategory) {
    let mut elem = BytesStart::new("category");
    elem.push_attribute(("id", category.id.to_string().as_str()));
    elem.push_attribute(("name", category.name.as_str()));

    if category.subcategories.is_empty() {
        writer.write_event(Event::Empty(elem)).ok();
        return;
    }

    writer.write_event(Event::Start(elem)).ok();
    for sub in &category.subcategories {
        let mut subcat = BytesStart::new("subcat");
        subcat.push_attribute(("id", sub.id.to_string().as_str()));
        subcat.push_attribute(("name", sub.name.as_str()));
        writer.write_event(Event::Empty(subcat)).ok();
    }
    end(writer, "category");
}

/// `q` first, then the declared params in order
fn join_params<'a>(params: impl Iterator<Item = &'a str>) -> String {
    let mut out = vec!["q"];
    out.extend(params.filter(|p| *p != "q"));
    out.join(",")
}

fn write_attr(writer: &mut XmlWriter, prefix: &str, name: &str, value: &str) {
    let tag = format!("{}:attr", prefix);
    let mut attr = BytesStart::new(tag.as_str());
    attr.push_attribute(("name", name));
    attr.push_attribute(("value", value));
    writer.write_event(Event::Empty(attr)).ok();
}

fn write_release_item(writer: &mut XmlWriter, release: &ReleaseInfo, protocol: DownloadProtocol) {
    let prefix = match protocol {
        DownloadProtocol::Torrent => "torznab",
        DownloadProtocol::Usenet => "newznab",
    };

    start(writer, "item");

    write_text_element(writer, "title", &release.title);
    write_text_element(writer, "guid", &release.guid);

    if let Some(ref details) = release.info_url {
        write_text_element(writer, "comments", details);
    }

    write_text_element(writer, "pubDate", &format_rfc2822(&release.publish_date));

    if let Some(size) = release.size {
        write_text_element(writer, "size", &size.to_string());
    }

    if let Some(ref desc) = release.description {
        write_text_element(writer, "description", desc);
    }

    let link = release
        .download_url
        .as_deref()
        .or(release.magnet_uri.as_deref())
        .unwrap_or("");
    write_text_element(writer, "link", link);

    for cat in &release.categories {
        write_text_element(writer, "category", &cat.to_string());
    }

    if !link.is_empty() {
        let mut enclosure = BytesStart::new("enclosure");
        enclosure.push_attribute(("url", link));
        enclosure.push_attribute(("length", release.size.unwrap_or(0).to_string().as_str()));
        let mime = match protocol {
            DownloadProtocol::Torrent => "application/x-bittorrent",
            DownloadProtocol::Usenet => "application/x-nzb",
        };
        enclosure.push_attribute(("type", mime));
        writer.write_event(Event::Empty(enclosure)).ok();
    }

    for cat in &release.categories {
        write_attr(writer, prefix, "category", &cat.to_string());
    }

    if let Some(size) = release.size {
        write_attr(writer, prefix, "size", &size.to_string());
    }
    if let Some(files) = release.files {
        write_attr(writer, prefix, "files", &files.to_string());
    }
    if let Some(grabs) = release.grabs {
        write_attr(writer, prefix, "grabs", &grabs.to_string());
    }

    if let Some(imdb) = release.imdb_id {
        write_attr(writer, prefix, "imdbid", &format!("tt{:07}", imdb));
    }
    if let Some(tvdb) = release.tvdb_id {
        write_attr(writer, prefix, "tvdbid", &tvdb.to_string());
    }
    if let Some(tmdb) = release.tmdb_id {
        write_attr(writer, prefix, "tmdbid", &tmdb.to_string());
    }
    if let Some(rid) = release.tvrage_id {
        write_attr(writer, prefix, "rageid", &rid.to_string());
    }
    if let Some(tvmaze) = release.tvmaze_id {
        write_attr(writer, prefix, "tvmazeid", &tvmaze.to_string());
    }
    if let Some(trakt) = release.trakt_id {
        write_attr(writer, prefix, "traktid", &trakt.to_string());
    }
    if let Some(ref poster) = release.poster {
        write_attr(writer, prefix, "coverurl", poster);
    }
    for genre in &release.genres {
        write_attr(writer, prefix, "genre", genre);
    }

    if protocol == DownloadProtocol::Torrent {
        if let Some(seeders) = release.seeders {
            write_attr(writer, prefix, "seeders", &seeders.to_string());
        }
        if let Some(peers) = release.peers {
            write_attr(writer, prefix, "peers", &peers.to_string());
        }
        if let Some(ref info_hash) = release.info_hash {
            write_attr(writer, prefix, "infohash", info_hash);
        }
        if let Some(ref magnet) = release.magnet_uri {
            write_attr(writer, prefix, "magneturl", magnet);
        }
        write_attr(
            writer,
            prefix,
            "downloadvolumefactor",
            &release.download_volume_factor.to_string(),
        );
        write_attr(
            writer,
            prefix,
            "uploadvolumefactor",
            &release.upload_volume_factor.to_string(),
        );
        if let Some(ratio) = release.minimum_ratio {
            write_attr(writer, prefix, "minimumratio", &ratio.to_string());
        }
        if let Some(seed_time) = release.minimum_seed_time {
            write_attr(writer, prefix, "minimumseedtime", &seed_time.to_string());
        }
    }

    end(writer, "item");
}

fn format_rfc2822(dt: &DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S %z").to_string()
}
