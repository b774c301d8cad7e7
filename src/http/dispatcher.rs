//! HTTP dispatcher
//!
//! Sends [`HttpRequest`]s with per-host rate limiting, a persistent cookie
//! store, manual redirect following and bounded retries, and classifies the
//! outcome into [`HttpResponse`] or a typed [`IndexerError`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::header::{COOKIE, HeaderValue, RETRY_AFTER};
use reqwest::{Client, redirect};
use tracing::{debug, warn};
use url::Url;

use super::cloudflare;
use super::cookies::{CookieStore, cookie_header};
use super::rate_limiter::{HostRateLimiter, RetryConfig, retry_async};
use super::{ContentExpectation, HttpMethod, HttpRequest, HttpResponse, MAX_REDIRECTS, RequestBody, host_key};
use crate::error::{IndexerError, Result, excerpt};

/// Wait imposed by a 429 that carries no usable `Retry-After`
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60 * 60);

/// Settings for the shared HTTP client
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }
}

pub struct HttpDispatcher {
    client: Client,
    cookies: Arc<CookieStore>,
    limiter: Arc<HostRateLimiter>,
    retry: RetryConfig,
}

impl HttpDispatcher {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .redirect(redirect::Policy::none())
            .gzip(true)
            .build()
            .map_err(|e| IndexerError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            cookies: Arc::new(CookieStore::new()),
            limiter: Arc::new(HostRateLimiter::new()),
            retry: config.retry.clone(),
        })
    }

    pub fn cookies(&self) -> &Arc<CookieStore> {
        &self.cookies
    }

    pub fn rate_limiter(&self) -> &Arc<HostRateLimiter> {
        &self.limiter
    }

    /// Execute a request, retrying transient failures
    pub async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let name = format!("{} {}", request.method_name(), request.url.path());
        retry_async(|| self.execute_once(request), &self.retry, &name).await
    }

    /// A single attempt, following redirects
    pub async fn execute_once(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let started = Instant::now();
        let mut url = request.url.clone();
        let mut method = request.method;
        let mut body = request.body.clone();
        let mut redirects: Vec<String> = vec![];
        let mut received: BTreeMap<String, String> = BTreeMap::new();

        if request.store_request_cookie && !request.cookies.is_empty() {
            self.cookies.merge(
                &request.host_key(),
                request
                    .cookies
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone(), None)),
            );
        }

        loop {
            let host = host_key(&url);
            if let Some(interval) = request.rate_limit {
                self.limiter.wait(&host, interval).await;
            }

            let mut jar = self.cookies.cookies_for(&host);
            jar.extend(received.iter().map(|(k, v)| (k.clone(), v.clone())));
            jar.extend(request.cookies.iter().map(|(k, v)| (k.clone(), v.clone())));

            debug!(method = request.method_name(), url = %url, "Dispatching request");

            let mut builder = self.client.request(method.into(), url.clone());
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(header) = cookie_header(&jar) {
                if let Ok(value) = HeaderValue::from_str(&header) {
                    builder = builder.header(COOKIE, value);
                }
            }
            if let Some(timeout) = request.timeout {
                builder = builder.timeout(timeout);
            }
            builder = match &body {
                Some(RequestBody::Form(fields)) => builder.form(fields),
                Some(RequestBody::Json(value)) => builder.json(value),
                Some(RequestBody::Raw {
                    content_type,
                    bytes,
                }) => builder
                    .header("content-type", content_type.as_str())
                    .body(bytes.clone()),
                None => builder,
            };

            let response = builder
                .send()
                .await
                .map_err(|source| IndexerError::Transport {
                    url: url.to_string(),
                    source,
                })?;

            let status = response.status().as_u16();
            let headers = response.headers().clone();
            let set_cookies: Vec<(String, String, Option<DateTime<Utc>>)> = response
                .cookies()
                .map(|c| {
                    let expires = c
                        .max_age()
                        .and_then(|age| chrono::Duration::from_std(age).ok())
                        .map(|age| Utc::now() + age)
                        .or_else(|| c.expires().map(DateTime::<Utc>::from));
                    (c.name().to_string(), c.value().to_string(), expires)
                })
                .collect();
            let bytes = response
                .bytes()
                .await
                .map_err(|source| IndexerError::Transport {
                    url: url.to_string(),
                    source,
                })?;

            for (name, value, _) in &set_cookies {
                received.insert(name.clone(), value.clone());
            }
            if request.store_response_cookie && !set_cookies.is_empty() {
                self.cookies.merge(&host, set_cookies);
            }

            let mut http_response = HttpResponse {
                request_url: request.url.clone(),
                url: url.clone(),
                status,
                headers,
                body: bytes.to_vec(),
                cookies: received.clone(),
                redirects: redirects.clone(),
                elapsed: started.elapsed(),
            };

            if request.allow_auto_redirect && http_response.is_redirect() {
                if let Some(next) = http_response.redirect_location() {
                    redirects.push(url.to_string());
                    if redirects.len() > MAX_REDIRECTS {
                        warn!(url = %request.url, hops = redirects.len(), "Redirect limit exceeded");
                        return Err(IndexerError::TooManyRedirects { chain: redirects });
                    }

                    if matches!(status, 302 | 303) && method != HttpMethod::Head {
                        method = HttpMethod::Get;
                        body = None;
                    }

                    debug!(from = %url, to = %next, status, "Following redirect");
                    url = next;
                    continue;
                }
            }

            http_response.redirects = redirects;
            return classify(request, http_response);
        }
    }
}

impl HttpRequest {
    fn method_name(&self) -> &'static str {
        match self.method {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Head => "HEAD",
        }
    }
}

/// Turn a final response into success or a typed error
fn classify(request: &HttpRequest, response: HttpResponse) -> Result<HttpResponse> {
    if let Some(err) = cloudflare::detect(&response) {
        return Err(err);
    }

    let status = response.status;
    if response.has_http_error() && !request.is_suppressed(status) {
        if status == 429 {
            let retry_after = response
                .header(RETRY_AFTER.as_str())
                .and_then(|v| parse_retry_after(v, Utc::now()))
                .unwrap_or(DEFAULT_RETRY_AFTER);
            return Err(IndexerError::rate_limited(
                retry_after,
                format!("{} answered 429 Too Many Requests", response.url),
            ));
        }

        return Err(IndexerError::Http {
            status,
            url: response.url.to_string(),
            excerpt: excerpt(&response.content()),
        });
    }

    if response.is_success()
        && request.expect != ContentExpectation::Any
        && response.has_html_content()
    {
        return Err(IndexerError::UnexpectedHtml {
            response: Box::new(response),
        });
    }

    Ok(response)
}

/// `Retry-After` as delta-seconds or an HTTP-date
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

/// Resolve a possibly relative link against a base URL
pub fn resolve_url(base: &Url, link: &str) -> Option<Url> {
    base.join(link.trim()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_retry_after_seconds() {
        assert_eq!(parse_retry_after("120", Utc::now()), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(" 0 ", Utc::now()), Some(Duration::ZERO));
    }

    #[test]
    fn test_retry_after_http_date() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 26, 0).unwrap();
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", now),
            Some(Duration::from_secs(120))
        );
        // dates in the past mean "now"
        let later = Utc.with_ymd_and_hms(2015, 10, 22, 0, 0, 0).unwrap();
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", later), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[test]
    fn test_resolve_relative_location() {
        let base = Url::parse("https://tracker.example/api/v1/search?q=a").unwrap();
        assert_eq!(
            resolve_url(&base, "../login").unwrap().as_str(),
            "https://tracker.example/api/login"
        );
        assert_eq!(
            resolve_url(&base, "https://cdn.example/x").unwrap().as_str(),
            "https://cdn.example/x"
        );
    }
}
