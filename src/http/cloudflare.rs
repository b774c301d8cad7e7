//! Cloudflare challenge detection

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::HttpResponse;
use crate::error::IndexerError;

static CHALLENGE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)data-ray="(?P<ray>[\w-]+)".*?data-sitekey="(?P<site_key>[\w-]+)".*?data-stoken="(?P<secret_token>[\w-]+)""#,
    )
    .unwrap()
});

const CHALLENGE_SCRIPT: &str = "cdn-cgi/scripts/cf.challenge.js";

/// A reCAPTCHA challenge served in place of the indexer's content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptchaChallenge {
    pub site_key: String,
    pub ray: String,
    pub secret_token: String,
    /// Where the solved captcha must be submitted
    pub response_url: String,
}

/// The user-supplied answer to a [`CaptchaChallenge`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaSolution {
    pub response_url: String,
    pub ray: String,
    pub captcha_response: String,
}

pub fn is_challenge_page(response: &HttpResponse) -> bool {
    response.status == 403 && response.content().contains(CHALLENGE_SCRIPT)
}

pub fn is_cloudflare_protected(response: &HttpResponse) -> bool {
    response.status == 503
        && response
            .header("server")
            .is_some_and(|s| s.eq_ignore_ascii_case("cloudflare") || s.eq_ignore_ascii_case("cloudflare-nginx"))
}

/// Extract the challenge parameters from a challenge page
pub fn parse_challenge(response: &HttpResponse) -> Option<CaptchaChallenge> {
    let body = response.content();
    let captures = CHALLENGE_REGEX.captures(&body)?;

    let mut response_url = response.request_url.clone();
    response_url.set_query(None);
    response_url.set_fragment(None);
    response_url.set_path("/cdn-cgi/l/chk_captcha");

    Some(CaptchaChallenge {
        site_key: captures["site_key"].to_string(),
        ray: captures["ray"].to_string(),
        secret_token: captures["secret_token"].to_string(),
        response_url: response_url.to_string(),
    })
}

/// Map a Cloudflare interstitial to its error, if the response is one
pub fn detect(response: &HttpResponse) -> Option<IndexerError> {
    if is_challenge_page(response) {
        return Some(match parse_challenge(response) {
            Some(challenge) => IndexerError::CaptchaRequired(Box::new(challenge)),
            None => IndexerError::CloudflareProtected {
                url: response.request_url.to_string(),
            },
        });
    }

    if is_cloudflare_protected(response) {
        return Some(IndexerError::CloudflareProtected {
            url: response.request_url.to_string(),
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderMap;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use url::Url;

    fn response(status: u16, server: Option<&str>, body: &str) -> HttpResponse {
        let url = Url::parse("https://tracker.example/browse.php?q=x").unwrap();
        let mut headers = HeaderMap::new();
        if let Some(server) = server {
            headers.insert("server", server.parse().unwrap());
        }
        HttpResponse {
            request_url: url.clone(),
            url,
            status,
            headers,
            body: body.as_bytes().to_vec(),
            cookies: BTreeMap::new(),
            redirects: vec![],
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn test_challenge_page_is_parsed() {
        let body = r#"<script src="/cdn-cgi/scripts/cf.challenge.js"></script>
            <div class="g-recaptcha" data-ray="3b1a2c_9f-AMS"
              data-sitekey="6LfBixYUAAAAABhdHynFUIMA_sa4s-XsJvnjtgB0"
              data-stoken="tok-123_abc"></div>"#;
        let err = detect(&response(403, Some("cloudflare"), body)).unwrap();
        match err {
            IndexerError::CaptchaRequired(challenge) => {
                assert_eq!(challenge.ray, "3b1a2c_9f-AMS");
                assert_eq!(challenge.site_key, "6LfBixYUAAAAABhdHynFUIMA_sa4s-XsJvnjtgB0");
                assert_eq!(challenge.secret_token, "tok-123_abc");
                assert_eq!(challenge.response_url, "https://tracker.example/cdn-cgi/l/chk_captcha");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_cloudflare_503() {
        assert!(matches!(
            detect(&response(503, Some("cloudflare-nginx"), "")),
            Some(IndexerError::CloudflareProtected { .. })
        ));
        assert!(detect(&response(503, Some("nginx"), "")).is_none());
        assert!(detect(&response(403, None, "forbidden")).is_none());
    }
}
