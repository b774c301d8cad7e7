//! HTTP plumbing shared by every indexer
//!
//! Requests are plain data built by the request generators and decorated by
//! the auth strategies. The [`dispatcher::HttpDispatcher`] turns them into
//! [`HttpResponse`]s or typed errors.

pub mod cloudflare;
pub mod cookies;
pub mod dispatcher;
pub mod rate_limiter;

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap};
use url::Url;

pub use cookies::CookieStore;
pub use dispatcher::{HttpConfig, HttpDispatcher};
pub use cloudflare::{CaptchaChallenge, CaptchaSolution};
pub use rate_limiter::{HostRateLimiter, RetryConfig};

/// Maximum number of automatic redirects before giving up
pub const MAX_REDIRECTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Head,
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Head => reqwest::Method::HEAD,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    /// application/x-www-form-urlencoded
    Form(Vec<(String, String)>),
    Json(serde_json::Value),
    Raw {
        content_type: String,
        bytes: Vec<u8>,
    },
}

/// What the caller expects to get back. Anything but `Any` turns a
/// successful HTML page into [`crate::error::IndexerError::UnexpectedHtml`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentExpectation {
    #[default]
    Any,
    Xml,
    Json,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: Url,
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    /// Ad hoc cookies sent with this request only
    pub cookies: BTreeMap<String, String>,
    /// Persist the ad hoc cookies into the cookie store
    pub store_request_cookie: bool,
    /// Merge `Set-Cookie` results into the cookie store
    pub store_response_cookie: bool,
    pub allow_auto_redirect: bool,
    /// Return error statuses as responses instead of errors
    pub suppress_http_error: bool,
    pub suppressed_status_codes: Vec<u16>,
    /// Minimum spacing between requests to the same host
    pub rate_limit: Option<Duration>,
    pub timeout: Option<Duration>,
    pub expect: ContentExpectation,
}

impl HttpRequest {
    pub fn get(url: Url) -> Self {
        Self::new(url, HttpMethod::Get)
    }

    pub fn post(url: Url) -> Self {
        Self::new(url, HttpMethod::Post)
    }

    pub fn new(url: Url, method: HttpMethod) -> Self {
        Self {
            url,
            method,
            headers: vec![],
            body: None,
            cookies: BTreeMap::new(),
            store_request_cookie: false,
            store_response_cookie: false,
            allow_auto_redirect: true,
            suppress_http_error: false,
            suppressed_status_codes: vec![],
            rate_limit: None,
            timeout: None,
            expect: ContentExpectation::Any,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Replace a header, matching the name case-insensitively
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn with_form<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.body = Some(RequestBody::Form(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ));
        self
    }

    pub fn with_json(mut self, value: serde_json::Value) -> Self {
        self.body = Some(RequestBody::Json(value));
        self
    }

    pub fn with_rate_limit(mut self, interval: Option<Duration>) -> Self {
        self.rate_limit = interval;
        self
    }

    pub fn expecting(mut self, expect: ContentExpectation) -> Self {
        self.expect = expect;
        self
    }

    pub fn suppress_status(mut self, status: u16) -> Self {
        if !self.suppressed_status_codes.contains(&status) {
            self.suppressed_status_codes.push(status);
        }
        self
    }

    pub fn suppress_errors(mut self) -> Self {
        self.suppress_http_error = true;
        self
    }

    pub fn without_redirects(mut self) -> Self {
        self.allow_auto_redirect = false;
        self
    }

    pub fn append_query(&mut self, key: &str, value: &str) {
        self.url.query_pairs_mut().append_pair(key, value);
    }

    /// Whether an error status should be handed back as a response
    pub fn is_suppressed(&self, status: u16) -> bool {
        self.suppress_http_error || self.suppressed_status_codes.contains(&status)
    }

    /// Host used to key cookies and rate limits
    pub fn host_key(&self) -> String {
        host_key(&self.url)
    }
}

pub fn host_key(url: &Url) -> String {
    url.host_str().unwrap_or_default().to_ascii_lowercase()
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// URL of the original request
    pub request_url: Url,
    /// URL the response was finally served from
    pub url: Url,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    /// Cookies set by the server across all hops
    pub cookies: BTreeMap<String, String>,
    /// URLs that answered with a redirect, in order
    pub redirects: Vec<String>,
    pub elapsed: Duration,
}

impl HttpResponse {
    pub fn content(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    pub fn has_http_error(&self) -> bool {
        self.status >= 400
    }

    /// Resolved `Location` of a redirect response
    pub fn redirect_location(&self) -> Option<Url> {
        let location = self.header("location")?;
        self.url.join(location).ok()
    }

    pub fn has_html_content(&self) -> bool {
        if self
            .content_type()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"))
        {
            return true;
        }

        let start: String = self
            .content()
            .trim_start()
            .chars()
            .take(15)
            .collect::<String>()
            .to_ascii_lowercase();
        start.starts_with("<!doctype html") || start.starts_with("<html")
    }
}
