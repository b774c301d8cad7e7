//! Error taxonomy shared by the dispatcher, the session layer and the parsers

use std::time::Duration;

use thiserror::Error;

use crate::http::HttpResponse;
use crate::http::cloudflare::CaptchaChallenge;

/// Longest body excerpt carried inside an error
const EXCERPT_LEN: usize = 512;

pub type Result<T> = std::result::Result<T, IndexerError>;

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited, retry after {}s: {message}", .retry_after.as_secs())]
    RateLimited {
        retry_after: Duration,
        message: String,
    },

    #[error("protocol error: {message}")]
    Protocol { message: String, excerpt: String },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("too many redirects ({} hops)", .chain.len())]
    TooManyRedirects { chain: Vec<String> },

    #[error("HTTP {status} from {url}")]
    Http {
        status: u16,
        url: String,
        excerpt: String,
    },

    #[error("unexpected HTML response from {}", .response.url)]
    UnexpectedHtml { response: Box<HttpResponse> },

    #[error("captcha required for {}", .0.response_url)]
    CaptchaRequired(Box<CaptchaChallenge>),

    #[error("{url} is protected by Cloudflare")]
    CloudflareProtected { url: String },

    #[error("request cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("not supported: {0}")]
    NotSupported(String),
}

impl IndexerError {
    /// Build a protocol error carrying a bounded excerpt of the offending body
    pub fn protocol(message: impl Into<String>, body: &str) -> Self {
        Self::Protocol {
            message: message.into(),
            excerpt: excerpt(body),
        }
    }

    pub fn rate_limited(retry_after: Duration, message: impl Into<String>) -> Self {
        Self::RateLimited {
            retry_after,
            message: message.into(),
        }
    }

    /// Short machine-readable name used in search results and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::RateLimited { .. } => "rate_limited",
            Self::Protocol { .. } => "protocol",
            Self::Transport { .. } => "transport",
            Self::TooManyRedirects { .. } => "too_many_redirects",
            Self::Http { .. } => "http",
            Self::UnexpectedHtml { .. } => "unexpected_html",
            Self::CaptchaRequired(_) => "captcha_required",
            Self::CloudflareProtected { .. } => "cloudflare_protected",
            Self::Cancelled => "cancelled",
            Self::Config(_) => "config",
            Self::NotSupported(_) => "not_supported",
        }
    }

    /// HTTP status attached to the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::UnexpectedHtml { response } => Some(response.status),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// The response that caused the error, when it was kept
    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            Self::UnexpectedHtml { response } => Some(response),
            _ => None,
        }
    }
}

/// Truncate a body to something safe to log
pub fn excerpt(body: &str) -> String {
    let body = body.trim();
    if body.len() <= EXCERPT_LEN {
        return body.to_string();
    }

    let mut end = EXCERPT_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        let body = "é".repeat(600);
        let short = excerpt(&body);
        assert!(short.ends_with("..."));
        assert!(short.len() <= EXCERPT_LEN + 3);
    }

    #[test]
    fn test_kind_and_retry_after() {
        let err = IndexerError::rate_limited(Duration::from_secs(120), "slow down");
        assert_eq!(err.kind(), "rate_limited");
        assert_eq!(err.retry_after(), Some(Duration::from_secs(120)));
        assert_eq!(err.status(), Some(429));
        assert!(err.to_string().contains("120s"));
    }
}
