//! Core types for the indexer pipeline
//!
//! Field names and category ids follow the Newznab/Torznab protocols.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// Transfer protocol of an indexer's releases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DownloadProtocol {
    Usenet,
    #[default]
    Torrent,
}

impl fmt::Display for DownloadProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadProtocol::Usenet => write!(f, "usenet"),
            DownloadProtocol::Torrent => write!(f, "torrent"),
        }
    }
}

/// Special terms attached to a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexerFlag {
    FreeLeech,
    HalfLeech,
    DoubleUpload,
    Internal,
    Scene,
}

/// Type of search query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    /// General text search
    #[default]
    Search,
    /// TV show search (supports season/episode)
    TvSearch,
    /// Movie search
    MovieSearch,
    /// Music search
    MusicSearch,
    /// Book search
    BookSearch,
}

impl SearchType {
    /// Value of the `t=` parameter
    pub fn as_param(&self) -> &'static str {
        match self {
            SearchType::Search => "search",
            SearchType::TvSearch => "tvsearch",
            SearchType::MovieSearch => "movie",
            SearchType::MusicSearch => "music",
            SearchType::BookSearch => "book",
        }
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_param())
    }
}

impl std::str::FromStr for SearchType {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "search" | "q" => Ok(SearchType::Search),
            "tvsearch" | "tv-search" | "tv" => Ok(SearchType::TvSearch),
            "movie" | "movie-search" | "moviesearch" => Ok(SearchType::MovieSearch),
            "music" | "music-search" | "musicsearch" | "audio" => Ok(SearchType::MusicSearch),
            "book" | "book-search" | "booksearch" => Ok(SearchType::BookSearch),
            _ => Err(IndexerError::NotSupported(format!("unknown search type: {}", s))),
        }
    }
}

/// TV search parameters supported by an indexer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TvSearchParam {
    Q,
    Season,
    Ep,
    ImdbId,
    TvdbId,
    RId,
    TmdbId,
    TvmazeId,
    TraktId,
    Year,
    Genre,
}

impl TvSearchParam {
    pub fn as_str(&self) -> &'static str {
        match self {
            TvSearchParam::Q => "q",
            TvSearchParam::Season => "season",
            TvSearchParam::Ep => "ep",
            TvSearchParam::ImdbId => "imdbid",
            TvSearchParam::TvdbId => "tvdbid",
            TvSearchParam::RId => "rid",
            TvSearchParam::TmdbId => "tmdbid",
            TvSearchParam::TvmazeId => "tvmazeid",
            TvSearchParam::TraktId => "traktid",
            TvSearchParam::Year => "year",
            TvSearchParam::Genre => "genre",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "q" => Some(TvSearchParam::Q),
            "season" => Some(TvSearchParam::Season),
            "ep" => Some(TvSearchParam::Ep),
            "imdbid" => Some(TvSearchParam::ImdbId),
            "tvdbid" => Some(TvSearchParam::TvdbId),
            "rid" | "tvrageid" => Some(TvSearchParam::RId),
            "tmdbid" => Some(TvSearchParam::TmdbId),
            "tvmazeid" => Some(TvSearchParam::TvmazeId),
            "traktid" => Some(TvSearchParam::TraktId),
            "year" => Some(TvSearchParam::Year),
            "genre" => Some(TvSearchParam::Genre),
            _ => None,
        }
    }
}

/// Movie search parameters supported by an indexer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovieSearchParam {
    Q,
    ImdbId,
    TmdbId,
    TraktId,
    Year,
    Genre,
}

impl MovieSearchParam {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovieSearchParam::Q => "q",
            MovieSearchParam::ImdbId => "imdbid",
            MovieSearchParam::TmdbId => "tmdbid",
            MovieSearchParam::TraktId => "traktid",
            MovieSearchParam::Year => "year",
            MovieSearchParam::Genre => "genre",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "q" => Some(MovieSearchParam::Q),
            "imdbid" => Some(MovieSearchParam::ImdbId),
            "tmdbid" => Some(MovieSearchParam::TmdbId),
            "traktid" => Some(MovieSearchParam::TraktId),
            "year" => Some(MovieSearchParam::Year),
            "genre" => Some(MovieSearchParam::Genre),
            _ => None,
        }
    }
}

/// Music search parameters supported by an indexer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MusicSearchParam {
    Q,
    Album,
    Artist,
    Label,
    Track,
    Year,
    Genre,
}

impl MusicSearchParam {
    pub fn as_str(&self) -> &'static str {
        match self {
            MusicSearchParam::Q => "q",
            MusicSearchParam::Album => "album",
            MusicSearchParam::Artist => "artist",
            MusicSearchParam::Label => "label",
            MusicSearchParam::Track => "track",
            MusicSearchParam::Year => "year",
            MusicSearchParam::Genre => "genre",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "q" => Some(MusicSearchParam::Q),
            "album" => Some(MusicSearchParam::Album),
            "artist" => Some(MusicSearchParam::Artist),
            "label" => Some(MusicSearchParam::Label),
            "track" => Some(MusicSearchParam::Track),
            "year" => Some(MusicSearchParam::Year),
            "genre" => Some(MusicSearchParam::Genre),
            _ => None,
        }
    }
}

/// Book search parameters supported by an indexer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookSearchParam {
    Q,
    Title,
    Author,
    Publisher,
    Year,
    Genre,
}

impl BookSearchParam {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookSearchParam::Q => "q",
            BookSearchParam::Title => "title",
            BookSearchParam::Author => "author",
            BookSearchParam::Publisher => "publisher",
            BookSearchParam::Year => "year",
            BookSearchParam::Genre => "genre",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "q" => Some(BookSearchParam::Q),
            "title" => Some(BookSearchParam::Title),
            "author" => Some(BookSearchParam::Author),
            "publisher" => Some(BookSearchParam::Publisher),
            "year" => Some(BookSearchParam::Year),
            "genre" => Some(BookSearchParam::Genre),
            _ => None,
        }
    }
}

/// Fields shared by every kind of search
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchCommon {
    /// Free-text search term
    pub search_term: Option<String>,
    /// Categories to search in (standard category IDs)
    pub categories: Vec<i32>,
    /// Maximum number of results
    pub limit: Option<u32>,
    /// Offset for pagination
    pub offset: Option<u32>,
    /// Feed browse: latest releases, first page only
    pub is_rss_search: bool,
}

impl SearchCommon {
    /// Search term with surrounding whitespace removed; `None` when blank
    pub fn term(&self) -> Option<&str> {
        self.search_term
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicSearchCriteria {
    #[serde(flatten)]
    pub common: SearchCommon,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MovieSearchCriteria {
    #[serde(flatten)]
    pub common: SearchCommon,
    /// IMDB ID (e.g., "tt1234567")
    pub imdb_id: Option<String>,
    pub tmdb_id: Option<i32>,
    pub trakt_id: Option<i32>,
    pub year: Option<i32>,
    pub genre: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TvSearchCriteria {
    #[serde(flatten)]
    pub common: SearchCommon,
    pub imdb_id: Option<String>,
    pub tvdb_id: Option<i32>,
    pub tmdb_id: Option<i32>,
    pub tvrage_id: Option<i32>,
    pub tvmaze_id: Option<i32>,
    pub trakt_id: Option<i32>,
    pub season: Option<i32>,
    /// Episode number/identifier (may be a date for daily shows)
    pub episode: Option<String>,
}

impl TvSearchCriteria {
    /// Get the episode search string (e.g., "S01E05")
    pub fn episode_string(&self) -> Option<String> {
        self.season.map(|s| match &self.episode {
            Some(ep) => format!("S{:02}E{}", s, ep),
            None => format!("S{:02}", s),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MusicSearchCriteria {
    #[serde(flatten)]
    pub common: SearchCommon,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub label: Option<String>,
    pub track: Option<String>,
    pub year: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookSearchCriteria {
    #[serde(flatten)]
    pub common: SearchCommon,
    pub author: Option<String>,
    pub title: Option<String>,
    pub publisher: Option<String>,
}

/// A normalized search request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SearchCriteria {
    Basic(BasicSearchCriteria),
    Movie(MovieSearchCriteria),
    Tv(TvSearchCriteria),
    Music(MusicSearchCriteria),
    Book(BookSearchCriteria),
}

impl Default for SearchCriteria {
    fn default() -> Self {
        SearchCriteria::Basic(BasicSearchCriteria::default())
    }
}

impl SearchCriteria {
    /// Create a basic text search
    pub fn search(term: &str) -> Self {
        SearchCriteria::Basic(BasicSearchCriteria {
            common: SearchCommon {
                search_term: Some(term.to_string()),
                ..Default::default()
            },
        })
    }

    /// Latest releases, no term
    pub fn rss() -> Self {
        SearchCriteria::Basic(BasicSearchCriteria {
            common: SearchCommon {
                is_rss_search: true,
                ..Default::default()
            },
        })
    }

    pub fn common(&self) -> &SearchCommon {
        match self {
            SearchCriteria::Basic(c) => &c.common,
            SearchCriteria::Movie(c) => &c.common,
            SearchCriteria::Tv(c) => &c.common,
            SearchCriteria::Music(c) => &c.common,
            SearchCriteria::Book(c) => &c.common,
        }
    }

    pub fn common_mut(&mut self) -> &mut SearchCommon {
        match self {
            SearchCriteria::Basic(c) => &mut c.common,
            SearchCriteria::Movie(c) => &mut c.common,
            SearchCriteria::Tv(c) => &mut c.common,
            SearchCriteria::Music(c) => &mut c.common,
            SearchCriteria::Book(c) => &mut c.common,
        }
    }

    pub fn search_type(&self) -> SearchType {
        match self {
            SearchCriteria::Basic(_) => SearchType::Search,
            SearchCriteria::Movie(_) => SearchType::MovieSearch,
            SearchCriteria::Tv(_) => SearchType::TvSearch,
            SearchCriteria::Music(_) => SearchType::MusicSearch,
            SearchCriteria::Book(_) => SearchType::BookSearch,
        }
    }

    pub fn is_rss(&self) -> bool {
        self.common().is_rss_search
    }

    /// Add categories to the query
    pub fn with_categories(mut self, cats: Vec<i32>) -> Self {
        self.common_mut().categories = cats;
        self
    }

    pub fn with_paging(mut self, limit: Option<u32>, offset: Option<u32>) -> Self {
        let common = self.common_mut();
        common.limit = limit;
        common.offset = offset;
        self
    }

    /// Get the query string for display/logging
    pub fn query_string(&self) -> String {
        let mut parts = vec![];

        if let Some(term) = self.common().term() {
            parts.push(term.to_string());
        }

        if let SearchCriteria::Tv(tv) = self {
            if let Some(ep) = tv.episode_string() {
                parts.push(ep);
            }
        }

        parts.join(" ")
    }

    /// Check if this is an ID-based search (IMDB, TVDB, etc.)
    pub fn is_id_search(&self) -> bool {
        match self {
            SearchCriteria::Movie(m) => {
                m.imdb_id.is_some() || m.tmdb_id.is_some() || m.trakt_id.is_some()
            }
            SearchCriteria::Tv(t) => {
                t.imdb_id.is_some()
                    || t.tvdb_id.is_some()
                    || t.tmdb_id.is_some()
                    || t.tvrage_id.is_some()
                    || t.tvmaze_id.is_some()
                    || t.trakt_id.is_some()
            }
            _ => false,
        }
    }

    pub fn imdb_id(&self) -> Option<&str> {
        match self {
            SearchCriteria::Movie(m) => m.imdb_id.as_deref(),
            SearchCriteria::Tv(t) => t.imdb_id.as_deref(),
            _ => None,
        }
    }
}

/// IMDB id without the "tt" prefix
pub fn imdb_id_short(imdb_id: &str) -> String {
    imdb_id.trim().trim_start_matches("tt").to_string()
}

/// IMDB id with the "tt" prefix, zero padded to at least 7 digits
pub fn full_imdb_id(imdb_id: &str) -> Option<String> {
    let numeric: u64 = imdb_id_short(imdb_id).parse().ok()?;
    if numeric == 0 {
        return None;
    }
    Some(format!("tt{:07}", numeric))
}

/// A release found on an indexer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    /// Unique identifier (usually the details URL)
    pub guid: String,

    /// Release title
    pub title: String,

    /// Download link (torrent or nzb file)
    pub download_url: Option<String>,

    /// Details page URL
    pub info_url: Option<String>,

    /// Magnet URI
    pub magnet_uri: Option<String>,

    /// InfoHash
    pub info_hash: Option<String>,

    /// File size in bytes
    pub size: Option<i64>,

    /// Number of files in the release
    pub files: Option<i32>,

    /// Number of times snatched/downloaded
    pub grabs: Option<i32>,

    /// Publication date
    pub publish_date: DateTime<Utc>,

    /// Standard category IDs
    pub categories: Vec<i32>,

    pub flags: Vec<IndexerFlag>,

    // Peer info
    /// Number of seeders
    pub seeders: Option<i32>,
    /// Number of peers (seeders + leechers)
    pub peers: Option<i32>,

    // Download factors
    /// Download volume factor (0 = freeleech, 1 = normal)
    pub download_volume_factor: f64,
    /// Upload volume factor (usually 1, can be 2 for double upload)
    pub upload_volume_factor: f64,

    /// Minimum ratio required
    pub minimum_ratio: Option<f64>,
    /// Minimum seed time in seconds
    pub minimum_seed_time: Option<i64>,

    // Metadata IDs
    /// IMDB ID (numeric part)
    pub imdb_id: Option<i64>,
    pub tmdb_id: Option<i64>,
    pub tvdb_id: Option<i64>,
    pub tvrage_id: Option<i64>,
    pub tvmaze_id: Option<i64>,
    pub trakt_id: Option<i64>,

    /// Poster/cover image URL
    pub poster: Option<String>,
    pub description: Option<String>,

    pub genres: Vec<String>,
    pub languages: Vec<String>,
    /// Subtitle languages
    pub subs: Vec<String>,

    /// The indexer that found this release
    pub indexer_id: String,
    pub indexer_name: String,
    pub protocol: DownloadProtocol,
}

impl ReleaseInfo {
    /// Create a new release with minimal info
    pub fn new(title: String, guid: String, publish_date: DateTime<Utc>) -> Self {
        Self {
            guid,
            title,
            download_url: None,
            info_url: None,
            magnet_uri: None,
            info_hash: None,
            size: None,
            files: None,
            grabs: None,
            publish_date,
            categories: vec![],
            flags: vec![],
            seeders: None,
            peers: None,
            download_volume_factor: 1.0,
            upload_volume_factor: 1.0,
            minimum_ratio: None,
            minimum_seed_time: None,
            imdb_id: None,
            tmdb_id: None,
            tvdb_id: None,
            tvrage_id: None,
            tvmaze_id: None,
            trakt_id: None,
            poster: None,
            description: None,
            genres: vec![],
            languages: vec![],
            subs: vec![],
            indexer_id: String::new(),
            indexer_name: String::new(),
            protocol: DownloadProtocol::default(),
        }
    }

    /// Check if this is a freeleech release
    pub fn is_freeleech(&self) -> bool {
        self.download_volume_factor == 0.0
    }

    /// Get the number of leechers
    pub fn leechers(&self) -> Option<i32> {
        match (self.peers, self.seeders) {
            (Some(peers), Some(seeders)) => Some(peers - seeders),
            _ => None,
        }
    }

    pub fn add_flag(&mut self, flag: IndexerFlag) {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
    }

    /// Add the flags implied by the volume factors
    pub fn apply_volume_flags(&mut self) {
        if self.upload_volume_factor == 2.0 {
            self.add_flag(IndexerFlag::DoubleUpload);
        }
        if self.download_volume_factor == 0.5 {
            self.add_flag(IndexerFlag::HalfLeech);
        }
        if self.download_volume_factor == 0.0 {
            self.add_flag(IndexerFlag::FreeLeech);
        }
    }
}

impl Default for ReleaseInfo {
    fn default() -> Self {
        Self::new(String::new(), String::new(), Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_type_round_trip() {
        for t in [
            SearchType::Search,
            SearchType::TvSearch,
            SearchType::MovieSearch,
            SearchType::MusicSearch,
            SearchType::BookSearch,
        ] {
            assert_eq!(t.as_param().parse::<SearchType>().unwrap(), t);
        }
        assert!("caps".parse::<SearchType>().is_err());
    }

    #[test]
    fn test_imdb_helpers() {
        assert_eq!(imdb_id_short("tt0133093"), "0133093");
        assert_eq!(full_imdb_id("133093").as_deref(), Some("tt0133093"));
        assert_eq!(full_imdb_id("tt0"), None);
        assert_eq!(full_imdb_id("abc"), None);
    }

    #[test]
    fn test_volume_flags() {
        let mut release = ReleaseInfo::default();
        release.download_volume_factor = 0.0;
        release.upload_volume_factor = 2.0;
        release.apply_volume_flags();
        assert!(release.flags.contains(&IndexerFlag::FreeLeech));
        assert!(release.flags.contains(&IndexerFlag::DoubleUpload));
        assert!(!release.flags.contains(&IndexerFlag::HalfLeech));
        assert!(release.is_freeleech());
    }

    #[test]
    fn test_query_string_includes_episode() {
        let criteria = SearchCriteria::Tv(TvSearchCriteria {
            common: SearchCommon {
                search_term: Some(" The Show ".to_string()),
                ..Default::default()
            },
            season: Some(2),
            episode: Some("05".to_string()),
            ..Default::default()
        });
        assert_eq!(criteria.query_string(), "The Show S02E05");
        assert_eq!(criteria.search_type(), SearchType::TvSearch);
    }

    #[test]
    fn test_criteria_serde_is_tagged() {
        let json = serde_json::to_value(SearchCriteria::search("dune")).unwrap();
        assert_eq!(json["type"], "basic");
        assert_eq!(json["search_term"], "dune");
    }
}
