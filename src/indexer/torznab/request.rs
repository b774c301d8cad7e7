//! Torznab request parsing
//!
//! Turns the `?t=...` query string into [`SearchCriteria`].

use serde::Deserialize;

use crate::indexer::types::{
    BasicSearchCriteria, BookSearchCriteria, MovieSearchCriteria, MusicSearchCriteria, SearchCommon,
    SearchCriteria, SearchType, TvSearchCriteria, full_imdb_id,
};

/// Torznab API request parameters
#[derive(Debug, Deserialize, Default)]
pub struct TorznabRequest {
    /// Function: caps, search, tvsearch, movie, music, book
    pub t: Option<String>,
    pub q: Option<String>,
    pub apikey: Option<String>,
    /// Categories (comma-separated)
    pub cat: Option<String>,
    pub extended: Option<String>,
    pub limit: Option<String>,
    pub offset: Option<String>,

    // TV-specific
    pub season: Option<String>,
    pub ep: Option<String>,
    pub imdbid: Option<String>,
    pub tvdbid: Option<String>,
    /// TVRage ID
    pub rid: Option<String>,
    pub tmdbid: Option<String>,
    pub tvmazeid: Option<String>,
    pub traktid: Option<String>,

    // Music-specific
    pub album: Option<String>,
    pub artist: Option<String>,
    pub label: Option<String>,
    pub track: Option<String>,

    // Book-specific
    pub title: Option<String>,
    pub author: Option<String>,
    pub publisher: Option<String>,

    pub year: Option<String>,
    pub genre: Option<String>,
}

impl TorznabRequest {
    /// Requested function, defaulting to `search`
    pub fn function(&self) -> &str {
        self.t.as_deref().map(str::trim).filter(|t| !t.is_empty()).unwrap_or("search")
    }

    pub fn is_caps(&self) -> bool {
        self.function().eq_ignore_ascii_case("caps")
    }

    /// Convert to search criteria. Errors carry the message for a 201 reply.
    pub fn to_criteria(&self) -> Result<SearchCriteria, String> {
        let search_type: SearchType = self
            .function()
            .parse()
            .map_err(|_| format!("Unknown function: {}", self.function()))?;

        let mut common = SearchCommon {
            search_term: non_empty(&self.q),
            categories: self.categories()?,
            limit: parse_opt("limit", &self.limit)?,
            offset: parse_opt("offset", &self.offset)?,
            is_rss_search: false,
        };

        let criteria = match search_type {
            SearchType::Search => {
                common.is_rss_search = common.search_term.is_none();
                SearchCriteria::Basic(BasicSearchCriteria { common })
            }
            SearchType::MovieSearch => {
                let movie = MovieSearchCriteria {
                    imdb_id: self.imdb_id()?,
                    tmdb_id: parse_opt("tmdbid", &self.tmdbid)?,
                    trakt_id: parse_opt("traktid", &self.traktid)?,
                    year: parse_opt("year", &self.year)?,
                    genre: non_empty(&self.genre),
                    common,
                };
                let mut criteria = SearchCriteria::Movie(movie);
                mark_rss(&mut criteria);
                criteria
            }
            SearchType::TvSearch => {
                let tv = TvSearchCriteria {
                    imdb_id: self.imdb_id()?,
                    tvdb_id: parse_opt("tvdbid", &self.tvdbid)?,
                    tmdb_id: parse_opt("tmdbid", &self.tmdbid)?,
                    tvrage_id: parse_opt("rid", &self.rid)?,
                    tvmaze_id: parse_opt("tvmazeid", &self.tvmazeid)?,
                    trakt_id: parse_opt("traktid", &self.traktid)?,
                    season: parse_opt("season", &self.season)?,
                    episode: non_empty(&self.ep),
                    common,
                };
                let mut criteria = SearchCriteria::Tv(tv);
                mark_rss(&mut criteria);
                criteria
            }
            SearchType::MusicSearch => {
                let music = MusicSearchCriteria {
                    artist: non_empty(&self.artist),
                    album: non_empty(&self.album),
                    label: non_empty(&self.label),
                    track: non_empty(&self.track),
                    year: parse_opt("year", &self.year)?,
                    common,
                };
                let mut criteria = SearchCriteria::Music(music);
                mark_rss(&mut criteria);
                criteria
            }
            SearchType::BookSearch => {
                let book = BookSearchCriteria {
                    author: non_empty(&self.author),
                    title: non_empty(&self.title),
                    publisher: non_empty(&self.publisher),
                    common,
                };
                let mut criteria = SearchCriteria::Book(book);
                mark_rss(&mut criteria);
                criteria
            }
        };

        Ok(criteria)
    }

    fn categories(&self) -> Result<Vec<i32>, String> {
        let Some(cat) = self.cat.as_deref() else {
            return Ok(vec![]);
        };
        cat.split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(|c| c.parse().map_err(|_| format!("Invalid category: {}", c)))
            .collect()
    }

    fn imdb_id(&self) -> Result<Option<String>, String> {
        match non_empty(&self.imdbid) {
            None => Ok(None),
            Some(raw) => full_imdb_id(&raw)
                .map(Some)
                .ok_or_else(|| format!("Invalid imdbid: {}", raw)),
        }
    }
}

/// A typed search with neither term nor any id/field is a feed browse
fn mark_rss(criteria: &mut SearchCriteria) {
    let has_fields = match &*criteria {
        SearchCriteria::Music(m) => {
            m.artist.is_some() || m.album.is_some() || m.label.is_some() || m.track.is_some()
        }
        SearchCriteria::Book(b) => b.author.is_some() || b.title.is_some() || b.publisher.is_some(),
        SearchCriteria::Tv(t) => t.season.is_some() || t.episode.is_some(),
        _ => false,
    };
    let browse = criteria.common().term().is_none() && !criteria.is_id_search() && !has_fields;
    criteria.common_mut().is_rss_search = browse;
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_opt<T: std::str::FromStr>(name: &str, value: &Option<String>) -> Result<Option<T>, String> {
    match non_empty(value) {
        None => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| format!("Invalid {}: {}", name, v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request(pairs: &[(&str, &str)]) -> TorznabRequest {
        let query = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        serde_json::from_value(serde_json::Value::Object(
            url::form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), serde_json::Value::String(v.into_owned())))
                .collect(),
        ))
        .unwrap()
    }

    #[test]
    fn test_plain_search() {
        let criteria = request(&[("t", "search"), ("q", "ubuntu"), ("cat", "2000, 5000")])
            .to_criteria()
            .unwrap();

        assert_eq!(criteria.search_type(), SearchType::Search);
        assert_eq!(criteria.common().term(), Some("ubuntu"));
        assert_eq!(criteria.common().categories, vec![2000, 5000]);
        assert!(!criteria.is_rss());
    }

    #[test]
    fn test_missing_function_and_term_is_rss() {
        let criteria = request(&[]).to_criteria().unwrap();
        assert!(criteria.is_rss());
    }

    #[test]
    fn test_tv_search_fields() {
        let criteria = request(&[
            ("t", "tvsearch"),
            ("tvdbid", "81189"),
            ("season", "2"),
            ("ep", "5"),
            ("imdbid", "903747"),
        ])
        .to_criteria()
        .unwrap();

        let SearchCriteria::Tv(tv) = &criteria else {
            panic!("expected tv criteria");
        };
        assert_eq!(tv.tvdb_id, Some(81189));
        assert_eq!(tv.season, Some(2));
        assert_eq!(tv.episode.as_deref(), Some("5"));
        assert_eq!(tv.imdb_id.as_deref(), Some("tt0903747"));
        assert!(!criteria.is_rss());
    }

    #[test]
    fn test_movie_without_anything_is_rss() {
        let criteria = request(&[("t", "movie"), ("limit", "50"), ("offset", "100")])
            .to_criteria()
            .unwrap();
        assert_eq!(criteria.search_type(), SearchType::MovieSearch);
        assert!(criteria.is_rss());
        assert_eq!(criteria.common().limit, Some(50));
        assert_eq!(criteria.common().offset, Some(100));
    }

    #[test]
    fn test_book_title_is_not_rss() {
        let criteria = request(&[("t", "book"), ("author", "Herbert")])
            .to_criteria()
            .unwrap();
        assert!(!criteria.is_rss());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(request(&[("t", "bogus")]).to_criteria().is_err());
        assert!(request(&[("cat", "abc")]).to_criteria().is_err());
        assert!(request(&[("t", "tvsearch"), ("season", "x")]).to_criteria().is_err());
    }

    #[test]
    fn test_caps_detection() {
        assert!(request(&[("t", "CAPS")]).is_caps());
        assert!(!request(&[("t", "search")]).is_caps());
    }
}
