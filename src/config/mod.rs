//! Application configuration management

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::http::{HttpConfig, RetryConfig};
use crate::indexer::PipelineConfig;

/// Output format of the log layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => anyhow::bail!("Unknown LOG_FORMAT: {}", other),
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the Torznab surface listens on
    pub listen_addr: SocketAddr,

    /// Key clients must pass as `apikey`; unset disables the check
    pub api_key: Option<String>,

    /// JSON file holding the indexer definitions
    pub definitions_path: PathBuf,

    /// JSON file sessions are persisted to
    pub session_store_path: PathBuf,

    pub http: HttpConfig,

    pub pipeline: PipelineConfig,

    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = HttpConfig::default();
        let retry_defaults = RetryConfig::default();
        let pipeline_defaults = PipelineConfig::default();

        let retry = RetryConfig {
            max_retries: parse_var("HTTP_MAX_RETRIES", retry_defaults.max_retries)?,
            initial_interval: Duration::from_millis(parse_var(
                "HTTP_RETRY_INITIAL_MS",
                retry_defaults.initial_interval.as_millis() as u64,
            )?),
            max_interval: Duration::from_secs(parse_var(
                "HTTP_RETRY_MAX_SECS",
                retry_defaults.max_interval.as_secs(),
            )?),
            max_inline_retry_after: Duration::from_secs(parse_var(
                "HTTP_MAX_INLINE_RETRY_AFTER_SECS",
                retry_defaults.max_inline_retry_after.as_secs(),
            )?),
            ..retry_defaults
        };

        let http = HttpConfig {
            user_agent: env::var("USER_AGENT").unwrap_or(defaults.user_agent),
            timeout: Duration::from_secs(parse_var("HTTP_TIMEOUT_SECS", defaults.timeout.as_secs())?),
            retry,
        };

        let pipeline = PipelineConfig {
            capabilities_ttl: Duration::from_secs(
                parse_var(
                    "CAPABILITIES_TTL_HOURS",
                    pipeline_defaults.capabilities_ttl.as_secs() / 3600,
                )? * 3600,
            ),
            search_timeout: Duration::from_secs(parse_var(
                "SEARCH_TIMEOUT_SECS",
                pipeline_defaults.search_timeout.as_secs(),
            )?),
            ..pipeline_defaults
        };

        Ok(Self {
            listen_addr: env::var("LISTEN_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:9696".to_string())
                .parse()
                .context("Invalid LISTEN_ADDR")?,

            api_key: env::var("API_KEY").ok().filter(|k| !k.trim().is_empty()),

            definitions_path: env::var("DEFINITIONS_PATH")
                .unwrap_or_else(|_| "./data/indexers.json".to_string())
                .into(),

            session_store_path: env::var("SESSION_STORE_PATH")
                .unwrap_or_else(|_| "./data/sessions.json".to_string())
                .into(),

            http,
            pipeline,

            log_format: match env::var("LOG_FORMAT") {
                Ok(v) => v.parse()?,
                Err(_) => LogFormat::default(),
            },
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}", name)),
        Err(_) => Ok(default),
    }
}
