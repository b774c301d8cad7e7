//! Torznab indexer implementation
//!
//! Torznab is Newznab with torrent attributes (seeders, peers, infohash,
//! volume factors). Requests, capabilities and feed parsing are shared with
//! [`super::newznab`]; this module only changes the protocol.

use std::sync::Arc;

use super::newznab::{DEFAULT_MAX_PAGES, NewznabCapabilities, NewznabParser, NewznabRequestGenerator};
use super::{Indexer, IndexerDefinition, IndexerParts, IndexerSettings};
use crate::error::Result;
use crate::indexer::session::ApiKeyQuery;
use crate::indexer::types::DownloadProtocol;

pub fn build(definition: IndexerDefinition, settings: IndexerSettings) -> Result<Indexer> {
    settings.api_url()?;

    Ok(IndexerParts {
        protocol: DownloadProtocol::Torrent,
        capabilities: Arc::new(NewznabCapabilities),
        generator: Arc::new(NewznabRequestGenerator),
        parser: Arc::new(NewznabParser::new(DownloadProtocol::Torrent)),
        auth: Arc::new(ApiKeyQuery { param: "apikey" }),
        rate_limit: None,
        max_pages: DEFAULT_MAX_PAGES,
    }
    .into_indexer(definition, settings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::capabilities::IndexerCapabilities;
    use crate::indexer::categories::cats;
    use crate::indexer::parser::test_support::parse_body;
    use crate::indexer::types::IndexerFlag;
    use pretty_assertions::assert_eq;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:torznab="http://torznab.com/schemas/2015/feed">
  <channel>
    <item>
      <title>Show.S01E01.480p</title>
      <guid>https://tracker.example/details/1</guid>
      <link>https://tracker.example/dl/1.torrent</link>
      <pubDate>Mon, 06 Jan 2025 08:00:00 +0000</pubDate>
      <enclosure url="https://tracker.example/dl/1.torrent" length="700000000" type="application/x-bittorrent"/>
      <torznab:attr name="category" value="5030"/>
      <torznab:attr name="seeders" value="12"/>
      <torznab:attr name="leechers" value="3"/>
      <torznab:attr name="infohash" value="ABCDEF0123456789ABCDEF0123456789ABCDEF01"/>
      <torznab:attr name="magneturl" value="magnet:?xt=urn:btih:ABCDEF"/>
      <torznab:attr name="downloadvolumefactor" value="0"/>
      <torznab:attr name="uploadvolumefactor" value="2"/>
      <torznab:attr name="minimumratio" value="1.0"/>
      <torznab:attr name="minimumseedtime" value="172800"/>
      <torznab:attr name="tvdbid" value="81189"/>
      <torznab:attr name="tag" value="internal"/>
    </item>
  </channel>
</rss>"#;

    fn settings() -> IndexerSettings {
        IndexerSettings {
            base_url: "https://tracker.example".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_torznab_item() {
        let mut caps = IndexerCapabilities::new();
        caps.categories.add_mapping("5030", cats::TV_SD, None);

        let releases = parse_body(
            &NewznabParser::new(DownloadProtocol::Torrent),
            &caps,
            &settings(),
            "https://tracker.example/api?t=tvsearch",
            "application/rss+xml",
            FEED,
        )
        .unwrap();

        assert_eq!(releases.len(), 1);
        let r = &releases[0];
        assert_eq!(r.seeders, Some(12));
        assert_eq!(r.peers, Some(15));
        assert_eq!(r.leechers(), Some(3));
        assert_eq!(r.categories, vec![cats::TV_SD]);
        assert_eq!(r.size, Some(700000000));
        assert_eq!(r.info_hash.as_deref(), Some("ABCDEF0123456789ABCDEF0123456789ABCDEF01"));
        assert_eq!(r.magnet_uri.as_deref(), Some("magnet:?xt=urn:btih:ABCDEF"));
        assert_eq!(r.minimum_seed_time, Some(172800));
        assert_eq!(r.tvdb_id, Some(81189));
        assert!(r.flags.contains(&IndexerFlag::FreeLeech));
        assert!(r.flags.contains(&IndexerFlag::DoubleUpload));
        assert!(r.flags.contains(&IndexerFlag::Internal));
    }

    #[test]
    fn test_unmapped_category_lands_in_other() {
        let releases = parse_body(
            &NewznabParser::new(DownloadProtocol::Torrent),
            &IndexerCapabilities::new(),
            &settings(),
            "https://tracker.example/api?t=search",
            "application/rss+xml",
            FEED,
        )
        .unwrap();
        assert_eq!(releases[0].categories, vec![cats::OTHER]);
    }

    #[test]
    fn test_build_uses_torrent_protocol() {
        let definition = IndexerDefinition {
            id: "tz".to_string(),
            name: "Torznab".to_string(),
            implementation: "torznab".to_string(),
            protocol: None,
            enabled: true,
            tags: vec![],
            settings: serde_json::Value::Null,
        };
        let indexer = build(definition, settings()).unwrap();
        assert_eq!(indexer.protocol, DownloadProtocol::Torrent);
        assert_eq!(indexer.max_pages, DEFAULT_MAX_PAGES);
    }
}
