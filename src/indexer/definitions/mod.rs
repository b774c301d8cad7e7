//! Indexer definitions and implementations
//!
//! An [`Indexer`] is a plain record of strategies: where capabilities come
//! from, how requests are generated, how responses are parsed and how the
//! indexer authenticates. Each protocol family lives in its own file and
//! exposes a `build` function registered in [`AVAILABLE_INDEXERS`].
//!
//! # Adding a new indexer
//!
//! 1. Create a new file in this directory (e.g., `myindexer.rs`)
//! 2. Implement a request generator and a response parser for it
//! 3. Add a `build` function and register it in `AVAILABLE_INDEXERS`

pub mod avistaz;
pub mod broadcasthenet;
pub mod newznab;
pub mod torrentleech;
pub mod torznab;
pub mod unit3d;

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use url::Url;

use super::capabilities::CapabilitiesSource;
use super::request::{MAX_PAGES, RequestGenerator};
use super::parser::ResponseParser;
use super::session::AuthStrategy;
use super::types::DownloadProtocol;
use crate::error::{IndexerError, Result};

/// A configured indexer as stored by the host application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexerDefinition {
    pub id: String,
    pub name: String,
    /// Registry id of the implementation (e.g. "newznab")
    pub implementation: String,
    #[serde(default)]
    pub protocol: Option<DownloadProtocol>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub settings: serde_json::Value,
}

fn default_enabled() -> bool {
    true
}

impl IndexerDefinition {
    /// Decode the settings blob
    pub fn settings(&self) -> Result<IndexerSettings> {
        if self.settings.is_null() {
            return Ok(IndexerSettings::default());
        }
        serde_json::from_value(self.settings.clone()).map_err(|e| {
            IndexerError::Config(format!("invalid settings for indexer {}: {}", self.id, e))
        })
    }
}

/// Typed settings shared by all implementations; each reads what it needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerSettings {
    pub base_url: String,
    /// Path of the Newznab/Torznab API below the base URL
    pub api_path: String,
    pub api_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Personal id (AvistaZ family)
    pub pid: Option<String>,
    /// Manually supplied session cookie ("uid=1; pass=abc")
    pub cookie: Option<String>,
    /// Raw query string appended to every Newznab/Torznab request ("&attrs=...")
    pub additional_parameters: Option<String>,
    /// Minimum seconds between requests to this indexer
    pub rate_limit_secs: Option<u64>,
    pub max_pages: Option<u32>,
    pub freeleech_only: bool,
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_path: "/api".to_string(),
            api_key: None,
            username: None,
            password: None,
            pid: None,
            cookie: None,
            additional_parameters: None,
            rate_limit_secs: None,
            max_pages: None,
            freeleech_only: false,
        }
    }
}

impl IndexerSettings {
    /// The API key, when one is configured
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    pub fn base_url(&self) -> Result<Url> {
        let base = self.base_url.trim();
        if base.is_empty() {
            return Err(IndexerError::Config("base_url is required".to_string()));
        }

        let with_slash = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{}/", base)
        };
        Url::parse(&with_slash)
            .map_err(|e| IndexerError::Config(format!("invalid base_url {}: {}", base, e)))
    }

    /// Resolve a site-relative path against the base URL
    pub fn url_for(&self, path: &str) -> Result<Url> {
        let base = self.base_url()?;
        base.join(path.trim_start_matches('/'))
            .map_err(|e| IndexerError::Config(format!("invalid path {}: {}", path, e)))
    }

    /// Base URL plus the API path, as Newznab servers expect it
    pub fn api_url(&self) -> Result<Url> {
        let base = self.base_url()?;
        let api_path = self.api_path.trim().trim_end_matches('/');
        let url = format!("{}{}", base.as_str().trim_end_matches('/'), api_path);
        Url::parse(&url).map_err(|e| IndexerError::Config(format!("invalid api_path {}: {}", api_path, e)))
    }

    pub fn rate_limit(&self) -> Option<Duration> {
        self.rate_limit_secs.map(Duration::from_secs)
    }
}

/// A ready-to-query indexer
#[derive(Clone)]
pub struct Indexer {
    pub definition: IndexerDefinition,
    pub settings: IndexerSettings,
    pub protocol: DownloadProtocol,
    pub capabilities: Arc<dyn CapabilitiesSource>,
    pub generator: Arc<dyn RequestGenerator>,
    pub parser: Arc<dyn ResponseParser>,
    pub auth: Arc<dyn AuthStrategy>,
    pub rate_limit: Option<Duration>,
    pub max_pages: u32,
}

impl Indexer {
    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("id", &self.definition.id)
            .field("implementation", &self.definition.implementation)
            .field("protocol", &self.protocol)
            .field("auth", &self.auth.name())
            .field("rate_limit", &self.rate_limit)
            .field("max_pages", &self.max_pages)
            .finish()
    }
}

/// Parts every implementation supplies; the builder fills in the rest
pub(crate) struct IndexerParts {
    pub protocol: DownloadProtocol,
    pub capabilities: Arc<dyn CapabilitiesSource>,
    pub generator: Arc<dyn RequestGenerator>,
    pub parser: Arc<dyn ResponseParser>,
    pub auth: Arc<dyn AuthStrategy>,
    pub rate_limit: Option<Duration>,
    pub max_pages: u32,
}

impl IndexerParts {
    pub(crate) fn into_indexer(self, definition: IndexerDefinition, settings: IndexerSettings) -> Indexer {
        let rate_limit = settings.rate_limit().or(self.rate_limit);
        let max_pages = settings.max_pages.unwrap_or(self.max_pages).clamp(1, MAX_PAGES);
        let protocol = definition.protocol.unwrap_or(self.protocol);

        Indexer {
            definition,
            settings,
            protocol,
            capabilities: self.capabilities,
            generator: self.generator,
            parser: self.parser,
            auth: self.auth,
            rate_limit,
            max_pages,
        }
    }
}

/// Information about an available indexer type
#[derive(Debug, Clone)]
pub struct IndexerTypeInfo {
    /// Unique identifier for this indexer type (e.g., "newznab")
    pub id: &'static str,
    /// Display name
    pub name: &'static str,
    /// Description
    pub description: &'static str,
    /// Type: "private", "public", "semi-private"
    pub tracker_type: &'static str,
    /// Language code
    pub language: &'static str,
    /// Primary site URL
    pub site_link: &'static str,
    pub protocol: DownloadProtocol,
    /// Required credential types
    pub required_credentials: &'static [CredentialType],
    /// Optional settings
    pub optional_settings: &'static [SettingDefinition],
    pub build: fn(IndexerDefinition, IndexerSettings) -> Result<Indexer>,
}

/// Definition of a configurable setting
#[derive(Debug, Clone)]
pub struct SettingDefinition {
    pub key: &'static str,
    pub label: &'static str,
    pub setting_type: SettingType,
    pub default_value: Option<&'static str>,
}

#[derive(Debug, Clone, Copy)]
pub enum SettingType {
    Text,
    Password,
    Checkbox,
    Number,
}

const FREELEECH_SETTING: SettingDefinition = SettingDefinition {
    key: "freeleech_only",
    label: "Search freeleech only",
    setting_type: SettingType::Checkbox,
    default_value: Some("false"),
};

const RATE_LIMIT_SETTING: SettingDefinition = SettingDefinition {
    key: "rate_limit_secs",
    label: "Seconds between requests",
    setting_type: SettingType::Number,
    default_value: None,
};

/// List of all available indexer types
pub static AVAILABLE_INDEXERS: Lazy<Vec<IndexerTypeInfo>> = Lazy::new(|| {
    vec![
        IndexerTypeInfo {
            id: "newznab",
            name: "Newznab",
            description: "Generic Newznab-compatible Usenet indexer",
            tracker_type: "private",
            language: "en-US",
            site_link: "",
            protocol: DownloadProtocol::Usenet,
            required_credentials: &[CredentialType::ApiKey],
            optional_settings: &[
                SettingDefinition {
                    key: "api_path",
                    label: "API path",
                    setting_type: SettingType::Text,
                    default_value: Some("/api"),
                },
                SettingDefinition {
                    key: "additional_parameters",
                    label: "Additional parameters",
                    setting_type: SettingType::Text,
                    default_value: None,
                },
                RATE_LIMIT_SETTING,
            ],
            build: newznab::build,
        },
        IndexerTypeInfo {
            id: "torznab",
            name: "Torznab",
            description: "Generic Torznab-compatible torrent indexer",
            tracker_type: "private",
            language: "en-US",
            site_link: "",
            protocol: DownloadProtocol::Torrent,
            required_credentials: &[],
            optional_settings: &[
                SettingDefinition {
                    key: "api_key",
                    label: "API key",
                    setting_type: SettingType::Password,
                    default_value: None,
                },
                SettingDefinition {
                    key: "api_path",
                    label: "API path",
                    setting_type: SettingType::Text,
                    default_value: Some("/api"),
                },
                RATE_LIMIT_SETTING,
            ],
            build: torznab::build,
        },
        IndexerTypeInfo {
            id: "unit3d",
            name: "UNIT3D",
            description: "Trackers running the UNIT3D codebase",
            tracker_type: "private",
            language: "en-US",
            site_link: "",
            protocol: DownloadProtocol::Torrent,
            required_credentials: &[CredentialType::ApiKey],
            optional_settings: &[RATE_LIMIT_SETTING],
            build: unit3d::build,
        },
        IndexerTypeInfo {
            id: "broadcasthenet",
            name: "BroadcasTheNet",
            description: "BroadcasTheNet (BTN) is an invite-only torrent tracker focused on TV shows",
            tracker_type: "private",
            language: "en-US",
            site_link: broadcasthenet::BASE_URL,
            protocol: DownloadProtocol::Torrent,
            required_credentials: &[CredentialType::ApiKey],
            optional_settings: &[],
            build: broadcasthenet::build,
        },
        IndexerTypeInfo {
            id: "avistaz",
            name: "AvistaZ",
            description: "Aka AsiaTorrents",
            tracker_type: "private",
            language: "en-US",
            site_link: avistaz::BASE_URL,
            protocol: DownloadProtocol::Torrent,
            required_credentials: &[
                CredentialType::Username,
                CredentialType::Password,
                CredentialType::Pid,
            ],
            optional_settings: &[FREELEECH_SETTING],
            build: avistaz::build,
        },
        IndexerTypeInfo {
            id: "torrentleech",
            name: "TorrentLeech",
            description: "This is what happens when you seed",
            tracker_type: "private",
            language: "en-US",
            site_link: torrentleech::BASE_URL,
            protocol: DownloadProtocol::Torrent,
            required_credentials: &[CredentialType::Username, CredentialType::Password],
            optional_settings: &[
                FREELEECH_SETTING,
                SettingDefinition {
                    key: "cookie",
                    label: "Session cookie (skips the login form)",
                    setting_type: SettingType::Password,
                    default_value: None,
                },
            ],
            build: torrentleech::build,
        },
    ]
});

/// Get information about all available indexer types
pub fn get_available_indexers() -> &'static [IndexerTypeInfo] {
    &AVAILABLE_INDEXERS
}

/// Get information about a specific indexer type
pub fn get_indexer_info(id: &str) -> Option<&'static IndexerTypeInfo> {
    AVAILABLE_INDEXERS
        .iter()
        .find(|i| i.id.eq_ignore_ascii_case(id))
}

/// Build an indexer from its stored definition
pub fn build_indexer(definition: IndexerDefinition) -> Result<Indexer> {
    let info = get_indexer_info(&definition.implementation).ok_or_else(|| {
        IndexerError::Config(format!("unknown indexer implementation: {}", definition.implementation))
    })?;

    let mut settings = definition.settings()?;
    if settings.base_url.trim().is_empty() && !info.site_link.is_empty() {
        settings.base_url = info.site_link.to_string();
    }

    let missing: Vec<String> = info
        .required_credentials
        .iter()
        .filter(|c| !c.is_present(&settings))
        .map(|c| c.to_string())
        .collect();

    // A manual cookie stands in for a form login
    let cookie_login = settings.cookie.as_deref().is_some_and(|c| !c.trim().is_empty());
    if !missing.is_empty() && !(cookie_login && info.id == "torrentleech") {
        return Err(IndexerError::Config(format!(
            "indexer {} is missing required settings: {}",
            definition.id,
            missing.join(", ")
        )));
    }

    (info.build)(definition, settings)
}

/// Credential types used by indexers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialType {
    /// API key
    ApiKey,
    /// Username
    Username,
    /// Password
    Password,
    /// Personal id
    Pid,
    /// Session cookie
    Cookie,
}

impl CredentialType {
    pub fn is_present(&self, settings: &IndexerSettings) -> bool {
        let value = match self {
            CredentialType::ApiKey => settings.api_key.as_deref(),
            CredentialType::Username => settings.username.as_deref(),
            CredentialType::Password => settings.password.as_deref(),
            CredentialType::Pid => settings.pid.as_deref(),
            CredentialType::Cookie => settings.cookie.as_deref(),
        };
        value.is_some_and(|v| !v.trim().is_empty())
    }
}

impl std::fmt::Display for CredentialType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialType::ApiKey => write!(f, "api_key"),
            CredentialType::Username => write!(f, "username"),
            CredentialType::Password => write!(f, "password"),
            CredentialType::Pid => write!(f, "pid"),
            CredentialType::Cookie => write!(f, "cookie"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition(implementation: &str, settings: serde_json::Value) -> IndexerDefinition {
        IndexerDefinition {
            id: "1".to_string(),
            name: "Test".to_string(),
            implementation: implementation.to_string(),
            protocol: None,
            enabled: true,
            tags: vec![],
            settings,
        }
    }

    #[test]
    fn test_settings_defaults() {
        let settings = definition("newznab", json!({"base_url": "https://nzb.example"}))
            .settings()
            .unwrap();
        assert_eq!(settings.api_path, "/api");
        assert_eq!(settings.api_key(), None);
        assert_eq!(settings.api_url().unwrap().as_str(), "https://nzb.example/api");
        assert_eq!(
            settings.url_for("/api/v1/jackett/auth").unwrap().as_str(),
            "https://nzb.example/api/v1/jackett/auth"
        );
    }

    #[test]
    fn test_base_url_with_path_keeps_path() {
        let settings = IndexerSettings {
            base_url: "https://host.example/prowlarr/1".to_string(),
            ..Default::default()
        };
        assert_eq!(
            settings.url_for("api").unwrap().as_str(),
            "https://host.example/prowlarr/1/api"
        );
        assert_eq!(settings.api_url().unwrap().as_str(), "https://host.example/prowlarr/1/api");
    }

    #[test]
    fn test_build_requires_credentials() {
        let err = build_indexer(definition("newznab", json!({"base_url": "https://nzb.example"})))
            .unwrap_err();
        assert!(err.to_string().contains("api_key"));

        let indexer = build_indexer(definition(
            "newznab",
            json!({"base_url": "https://nzb.example", "api_key": "k", "max_pages": 5000}),
        ))
        .unwrap();
        assert_eq!(indexer.protocol, DownloadProtocol::Usenet);
        assert_eq!(indexer.max_pages, MAX_PAGES);
        assert_eq!(indexer.auth.name(), "api_key");
    }

    #[test]
    fn test_unknown_implementation() {
        let err = build_indexer(definition("gazelle", json!({}))).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_site_link_is_default_base_url() {
        let indexer = build_indexer(definition(
            "torrentleech",
            json!({"cookie": "tluid=1; tlpass=2"}),
        ))
        .unwrap();
        assert_eq!(indexer.settings.base_url, torrentleech::BASE_URL);
        assert_eq!(indexer.auth.name(), "cookie_login");
    }
}
