//! Response parsing shared by all protocol dialects

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use quick_xml::Reader;
use quick_xml::events::Event;
use serde::de::DeserializeOwned;
use tracing::warn;

use super::capabilities::IndexerCapabilities;
use super::definitions::IndexerSettings;
use super::request::IndexerRequest;
use super::types::{DownloadProtocol, ReleaseInfo};
use crate::error::{IndexerError, Result};
use crate::http::HttpResponse;
use crate::http::dispatcher::DEFAULT_RETRY_AFTER;

/// A response together with what produced it
pub struct IndexerResponse<'a> {
    pub request: &'a IndexerRequest,
    pub http: &'a HttpResponse,
    pub capabilities: &'a IndexerCapabilities,
    pub settings: &'a IndexerSettings,
}

impl IndexerResponse<'_> {
    pub fn content(&self) -> std::borrow::Cow<'_, str> {
        self.http.content()
    }

    pub fn request_url(&self) -> &str {
        self.request.url()
    }

    /// Deserialize a JSON body, mapping failures to protocol errors
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let content = self.content();
        serde_json::from_str(&content)
            .map_err(|e| IndexerError::protocol(format!("invalid JSON response: {}", e), &content))
    }
}

/// Decode JSON rows one at a time; a row that does not fit `T` is logged and skipped
pub fn decode_rows<T: DeserializeOwned>(rows: Vec<serde_json::Value>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value(row) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(error = %e, "Skipping malformed release row");
                None
            }
        })
        .collect()
}

/// Turns one page of indexer output into releases
pub trait ResponseParser: Send + Sync {
    fn parse(&self, response: &IndexerResponse<'_>) -> Result<Vec<ReleaseInfo>>;
}

/// Classify a Newznab/Torznab `<error code=".." description=".."/>`
pub fn api_error(code: i32, description: &str, request_url: &str) -> IndexerError {
    if (100..=199).contains(&code) {
        return IndexerError::Auth(format!("Invalid API key: {}", description));
    }

    if description.contains("Request limit reached") {
        return IndexerError::rate_limited(DEFAULT_RETRY_AFTER, "API limit reached");
    }

    if (description == "Missing parameter" || description.to_lowercase().contains("apikey"))
        && !request_url.contains("apikey=")
    {
        return IndexerError::Auth("Indexer requires an API key".to_string());
    }

    IndexerError::Protocol {
        message: format!("Indexer API error: {}", description),
        excerpt: String::new(),
    }
}

/// Fail when the document root is an error envelope
pub fn check_xml_error(xml: &str, request_url: &str) -> Result<()> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.name().as_ref() != b"error" {
                    return Ok(());
                }

                let mut code = 0;
                let mut description = String::new();
                for attr in e.attributes().flatten() {
                    let value = attr
                        .unescape_value()
                        .map(|v| v.to_string())
                        .unwrap_or_default();
                    match attr.key.as_ref() {
                        b"code" => code = value.trim().parse().unwrap_or(0),
                        b"description" => description = value,
                        _ => {}
                    }
                }
                return Err(api_error(code, &description, request_url));
            }
            Ok(Event::Eof) => return Ok(()),
            Err(e) => {
                return Err(IndexerError::protocol(format!("malformed XML: {}", e), xml));
            }
            _ => {}
        }
    }
}

const NZB_MIME: &str = "application/x-nzb";
const TORRENT_MIME: &str = "application/x-bittorrent";

/// Warning for a feed whose enclosures carry none of the protocol's mime type
pub fn enclosure_mismatch(enclosure_types: &[&str], protocol: DownloadProtocol) -> Option<String> {
    let (preferred, foreign, intended) = match protocol {
        DownloadProtocol::Usenet => (NZB_MIME, TORRENT_MIME, "Torznab"),
        DownloadProtocol::Torrent => (TORRENT_MIME, NZB_MIME, "Newznab"),
    };

    let first = enclosure_types.first()?;
    if enclosure_types.contains(&preferred) {
        return None;
    }

    Some(if enclosure_types.contains(&foreign) {
        format!(
            "Feed does not contain {}, found {}, did you intend to add a {} indexer?",
            preferred, first, intended
        )
    } else {
        format!("Feed does not contain {}, found {}.", preferred, first)
    })
}

/// Warn once per page when no enclosure matches the indexer's protocol
pub fn check_enclosure_types(enclosure_types: &[&str], protocol: DownloadProtocol, indexer_name: &str) {
    if let Some(message) = enclosure_mismatch(enclosure_types, protocol) {
        warn!(indexer_name = %indexer_name, "{}", message);
    }
}

/// Parse the date formats seen in feeds and JSON APIs
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    // Try multiple formats
    let formats = [
        "%a, %d %b %Y %H:%M:%S %z", // RFC 822
        "%a, %d %b %Y %H:%M:%S GMT", // GMT variant
        "%Y-%m-%dT%H:%M:%S%z",      // ISO 8601
        "%Y-%m-%d %H:%M:%S%z",
    ];
    for format in &formats {
        if let Ok(dt) = DateTime::parse_from_str(s, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    let naive_formats = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"];
    for format in &naive_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }

    if let Ok(secs) = s.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0);
    }

    warn!(date_string = s, "Failed to parse date");
    None
}

/// Parse a naive local time in a fixed offset (trackers that report local time)
pub fn parse_date_with_offset(s: &str, format: &str, offset_hours: i32) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s.trim(), format).ok()?;
    let offset = FixedOffset::east_opt(offset_hours * 3600)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Lenient integer parsing: "1,024" and "12.0" are accepted, junk is `None`
pub fn parse_int(s: &str) -> Option<i64> {
    let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
    cleaned
        .parse::<i64>()
        .ok()
        .or_else(|| cleaned.parse::<f64>().ok().map(|f| f as i64))
}

/// Narrow an untrusted count to `0..=i32::MAX`
pub fn clamp_count(v: i64) -> i32 {
    v.clamp(0, i32::MAX as i64) as i32
}

/// Peers as seeders plus leechers; `None` without a seeder count
pub fn peer_count(seeders: Option<i64>, leechers: Option<i64>) -> Option<i32> {
    let seeders = seeders?;
    Some(clamp_count(seeders.saturating_add(leechers.unwrap_or(0))))
}

pub fn parse_float(s: &str) -> Option<f64> {
    s.trim().replace(',', ".").parse::<f64>().ok()
}

/// Numeric part of an IMDB id ("tt0133093" -> 133093)
pub fn parse_imdb_id(s: &str) -> Option<i64> {
    s.trim()
        .trim_start_matches("tt")
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
}

/// Keep only the releases the response filters ask for
pub fn retain_freeleech(releases: &mut Vec<ReleaseInfo>, freeleech_only: bool) {
    if freeleech_only {
        releases.retain(|r| r.is_freeleech());
    }
}

/// Serde adapters for JSON APIs that send numbers as strings, or null
pub mod lenient {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose {
        Bool(bool),
        Int(i64),
        Float(f64),
        Str(String),
    }

    pub fn int<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<Loose>::deserialize(deserializer)? {
            Some(Loose::Int(i)) => Some(i),
            Some(Loose::Float(f)) => Some(f as i64),
            Some(Loose::Str(s)) => super::parse_int(&s),
            Some(Loose::Bool(_)) | None => None,
        })
    }

    pub fn float<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<Loose>::deserialize(deserializer)? {
            Some(Loose::Int(i)) => Some(i as f64),
            Some(Loose::Float(f)) => Some(f),
            Some(Loose::Str(s)) => super::parse_float(&s),
            Some(Loose::Bool(_)) | None => None,
        })
    }

    /// Strings stay strings, numbers are stringified
    pub fn string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<Loose>::deserialize(deserializer)? {
            Some(Loose::Str(s)) => Some(s).filter(|s| !s.trim().is_empty()),
            Some(Loose::Int(i)) => Some(i.to_string()),
            Some(Loose::Float(f)) => Some(f.to_string()),
            Some(Loose::Bool(_)) | None => None,
        })
    }

    /// `true`, `1`, `"1"`, `"yes"` and `"true"` are true
    pub fn flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<Loose>::deserialize(deserializer)? {
            Some(Loose::Bool(b)) => b,
            Some(Loose::Int(i)) => i != 0,
            Some(Loose::Float(f)) => f != 0.0,
            Some(Loose::Str(s)) => matches!(s.trim().to_lowercase().as_str(), "1" | "yes" | "true"),
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[derive(serde::Deserialize)]
    struct Loose {
        #[serde(default, deserialize_with = "lenient::int")]
        size: Option<i64>,
        #[serde(default, deserialize_with = "lenient::string")]
        id: Option<String>,
        #[serde(default, deserialize_with = "lenient::flag")]
        free: bool,
    }

    #[test]
    fn test_lenient_fields() {
        let v: Loose = serde_json::from_str(r#"{"size":"1,024","id":42,"free":"1"}"#).unwrap();
        assert_eq!(v.size, Some(1024));
        assert_eq!(v.id.as_deref(), Some("42"));
        assert!(v.free);

        let v: Loose = serde_json::from_str(r#"{"size":null}"#).unwrap();
        assert_eq!(v.size, None);
        assert_eq!(v.id, None);
        assert!(!v.free);
    }

    #[test]
    fn test_parse_rfc822_date() {
        let date = parse_date("Sat, 18 Jan 2025 14:30:00 +0000");
        assert!(date.is_some());

        let date = parse_date("2025-01-18T14:30:00Z");
        assert!(date.is_some());

        let date = parse_date("2025-01-18 14:30:00").unwrap();
        assert_eq!(date.hour(), 14);

        assert!(parse_date("yesterday").is_none());
    }

    #[test]
    fn test_parse_with_offset() {
        let date = parse_date_with_offset("2024-03-01 20:00:00", "%Y-%m-%d %H:%M:%S", -4).unwrap();
        assert_eq!(date.day(), 2);
        assert_eq!(date.hour(), 0);
    }

    #[test]
    fn test_lenient_numbers() {
        assert_eq!(parse_int("1,024"), Some(1024));
        assert_eq!(parse_int("12.0"), Some(12));
        assert_eq!(parse_int("n/a"), None);
        assert_eq!(parse_float("0,5"), Some(0.5));
        assert_eq!(parse_imdb_id("tt0133093"), Some(133093));
        assert_eq!(parse_imdb_id("0"), None);
    }

    #[test]
    fn test_counts_saturate() {
        assert_eq!(clamp_count(12), 12);
        assert_eq!(clamp_count(i64::MAX), i32::MAX);
        assert_eq!(clamp_count(-5), 0);
        assert_eq!(peer_count(Some(12), Some(i64::MAX)), Some(i32::MAX));
        assert_eq!(peer_count(Some(12), None), Some(12));
        assert_eq!(peer_count(None, Some(3)), None);
        assert_eq!(parse_int("1e30").map(clamp_count), Some(i32::MAX));
    }

    #[test]
    fn test_enclosure_mismatch() {
        let torrent = DownloadProtocol::Torrent;
        assert_eq!(enclosure_mismatch(&[], torrent), None);
        assert_eq!(
            enclosure_mismatch(&["application/x-nzb", "application/x-bittorrent"], torrent),
            None
        );

        let foreign = enclosure_mismatch(&["application/x-nzb"], torrent).unwrap();
        assert!(foreign.contains("did you intend to add a Newznab indexer?"));

        let unknown = enclosure_mismatch(&["text/html"], DownloadProtocol::Usenet).unwrap();
        assert_eq!(unknown, "Feed does not contain application/x-nzb, found text/html.");
    }

    #[test]
    fn test_error_envelope_classification() {
        let auth = check_xml_error(
            r#"<error code="101" description="Account suspended"/>"#,
            "https://x/api?apikey=1",
        );
        assert_eq!(auth.unwrap_err().kind(), "auth");

        let limit = check_xml_error(
            r#"<?xml version="1.0"?><error code="500" description="Request limit reached"/>"#,
            "https://x/api?apikey=1",
        );
        assert_eq!(limit.unwrap_err().retry_after(), Some(DEFAULT_RETRY_AFTER));

        let missing = check_xml_error(
            r#"<error code="200" description="Missing parameter"/>"#,
            "https://x/api?t=search",
        );
        match missing.unwrap_err() {
            IndexerError::Auth(message) => assert!(message.contains("requires an API key")),
            other => panic!("unexpected {other:?}"),
        }

        let other = check_xml_error(
            r#"<error code="300" description="No such function"/>"#,
            "https://x/api?apikey=1",
        );
        assert_eq!(other.unwrap_err().kind(), "protocol");

        assert!(check_xml_error("<rss><channel/></rss>", "https://x/api").is_ok());
    }
}
