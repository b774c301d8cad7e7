//! Per-indexer query pipeline
//!
//! Criteria go through the indexer's request generator, each page request is
//! authenticated through the session manager, dispatched, and parsed into
//! releases. Tiers are fallbacks: the first tier that yields anything wins.
//!
//! Auth failures get exactly one re-login and retry. Everything else escalates
//! to the caller; retries only happen inside the dispatcher.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::capabilities::{CapabilityCache, FETCHED_CAPABILITIES_TTL, FetchContext, IndexerCapabilities};
use super::categories::expand_categories;
use super::definitions::Indexer;
use super::events::{EventSink, EventType, IndexerEvent};
use super::parser::{IndexerResponse, retain_freeleech};
use super::request::{IndexerRequest, RequestContext, RequestTier};
use super::session::{AuthStrategy, LoginContext, SessionManager, SessionRegistry, SettingsStore};
use super::types::{ReleaseInfo, SearchCriteria};
use crate::error::{IndexerError, Result};
use crate::http::{CaptchaChallenge, CaptchaSolution, HttpDispatcher, HttpRequest, HttpResponse};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Lifetime of capabilities fetched from the indexer
    pub capabilities_ttl: Duration,
    /// Upper bound for one indexer's search at the fan-out
    pub search_timeout: Duration,
    /// Indexers searched at the same time
    pub max_concurrent_searches: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capabilities_ttl: FETCHED_CAPABILITIES_TTL,
            search_timeout: Duration::from_secs(60),
            max_concurrent_searches: 8,
        }
    }
}

/// Shared services every indexer query runs through
pub struct IndexerPipeline {
    dispatcher: Arc<HttpDispatcher>,
    capabilities: CapabilityCache,
    sessions: SessionRegistry,
    events: Arc<dyn EventSink>,
    config: PipelineConfig,
}

impl IndexerPipeline {
    pub fn new(
        dispatcher: Arc<HttpDispatcher>,
        store: Arc<dyn SettingsStore>,
        events: Arc<dyn EventSink>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            dispatcher,
            capabilities: CapabilityCache::new(),
            sessions: SessionRegistry::new(store),
            events,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<HttpDispatcher> {
        &self.dispatcher
    }

    /// Capabilities of `indexer`, fetched at most once at a time
    pub async fn capabilities(&self, indexer: &Indexer) -> Result<Arc<IndexerCapabilities>> {
        let session = self.sessions.get(indexer.id());
        let ttl = indexer.capabilities.ttl().map(|_| self.config.capabilities_ttl);

        self.capabilities
            .get_capabilities(indexer.id(), ttl, || async {
                let (state, _) = session.session().await;
                indexer
                    .capabilities
                    .fetch(&FetchContext {
                        dispatcher: &self.dispatcher,
                        settings: &indexer.settings,
                        session: &state,
                        auth: indexer.auth.as_ref(),
                        rate_limit: indexer.rate_limit,
                    })
                    .await
            })
            .await
    }

    /// Forget cached capabilities and the in-memory session after the
    /// definition changed or was removed
    pub fn invalidate(&self, indexer_id: &str) {
        self.capabilities.invalidate(indexer_id);
        self.sessions.remove(indexer_id);
    }

    /// Run a search against one indexer
    pub async fn search(
        &self,
        indexer: &Indexer,
        criteria: &SearchCriteria,
        cancel: &CancellationToken,
    ) -> Result<Vec<ReleaseInfo>> {
        let started = Instant::now();
        let event_type = search_event_type(criteria);

        let result = self.fetch_releases(indexer, criteria, cancel).await;

        let (success, count, url) = match &result {
            Ok((releases, url)) => (true, releases.len(), url.clone()),
            Err(_) => (false, 0, None),
        };
        let mut event = IndexerEvent::new(indexer.id(), event_type, success)
            .with_elapsed(started.elapsed())
            .with_releases(count);
        event.url = url;
        self.events.emit(event);

        match result {
            Ok((releases, _)) => {
                info!(
                    indexer_id = %indexer.id(),
                    query = %criteria.query_string(),
                    releases = releases.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Search completed"
                );
                Ok(releases)
            }
            Err(IndexerError::Cancelled) => Err(IndexerError::Cancelled),
            Err(e) => {
                warn!(indexer_id = %indexer.id(), error = %e, "Search failed");
                Err(e)
            }
        }
    }

    /// Record a failed query for a search abandoned before it returned,
    /// e.g. on the fan-out deadline
    pub fn record_abandoned_search(&self, indexer: &Indexer, criteria: &SearchCriteria, elapsed: Duration) {
        self.events.emit(
            IndexerEvent::new(indexer.id(), search_event_type(criteria), false).with_elapsed(elapsed),
        );
    }

    /// Check that the indexer answers: capabilities plus one feed page
    pub async fn test(&self, indexer: &Indexer) -> Result<usize> {
        let caps = self.capabilities(indexer).await?;
        let criteria = SearchCriteria::rss().with_paging(Some(caps.page_size()), None);
        let releases = self.search(indexer, &criteria, &CancellationToken::new()).await?;
        Ok(releases.len())
    }

    /// Fetch a release file through the indexer's session
    pub async fn download(&self, indexer: &Indexer, link: &str, cancel: &CancellationToken) -> Result<Vec<u8>> {
        if link.trim_start().starts_with("magnet:") {
            return Err(IndexerError::NotSupported(
                "magnet links are passed to the download client as is".to_string(),
            ));
        }

        let url = Url::parse(link.trim())
            .map_err(|e| IndexerError::Config(format!("invalid download link {}: {}", link, e)))?;
        let request = HttpRequest::get(url).with_rate_limit(indexer.rate_limit);

        let started = Instant::now();
        let result = self
            .with_session(indexer, &request, cancel, |response| {
                if response.body.is_empty() {
                    return Err(IndexerError::protocol("downloaded file is empty", ""));
                }
                if response.has_html_content() {
                    return Err(IndexerError::protocol(
                        "download returned an HTML page instead of a file",
                        &response.content(),
                    ));
                }
                Ok(response.body.clone())
            })
            .await;

        self.events.emit(
            IndexerEvent::new(indexer.id(), EventType::Grab, result.is_ok())
                .with_elapsed(started.elapsed())
                .with_url(link),
        );

        if let Err(e) = &result {
            warn!(indexer_id = %indexer.id(), error = %e, "Download failed");
        }
        result
    }

    /// Probe the indexer for a Cloudflare captcha
    pub async fn captcha_challenge(&self, indexer: &Indexer) -> Result<Option<CaptchaChallenge>> {
        self.sessions
            .get(indexer.id())
            .captcha_challenge(&self.dispatcher, &indexer.settings)
            .await
    }

    /// Hand a solved captcha back; the clearance cookie joins the session
    pub async fn submit_captcha(&self, indexer: &Indexer, solution: &CaptchaSolution) -> Result<()> {
        self.sessions
            .get(indexer.id())
            .submit_captcha(&self.dispatcher, solution)
            .await?;
        Ok(())
    }

    /// Drop the stored session so the next request logs in again
    pub async fn clear_session(&self, indexer_id: &str) {
        self.sessions.get(indexer_id).clear().await;
    }

    async fn fetch_releases(
        &self,
        indexer: &Indexer,
        criteria: &SearchCriteria,
        cancel: &CancellationToken,
    ) -> Result<(Vec<ReleaseInfo>, Option<String>)> {
        if cancel.is_cancelled() {
            return Err(IndexerError::Cancelled);
        }

        let caps = self.capabilities(indexer).await?;

        if !caps.supports(criteria.search_type()) {
            debug!(
                indexer_id = %indexer.id(),
                search_type = %criteria.search_type().as_param(),
                "Search type not supported"
            );
            return Ok((vec![], None));
        }

        let requested = &criteria.common().categories;
        if !requested.is_empty()
            && !caps.categories.is_empty()
            && caps.categories.supported_categories(requested).is_empty()
        {
            debug!(indexer_id = %indexer.id(), categories = ?requested, "No requested category is supported");
            return Ok((vec![], None));
        }

        let ctx = RequestContext {
            settings: &indexer.settings,
            capabilities: &caps,
            max_pages: indexer.max_pages,
        };
        let chain = indexer.generator.search_requests(criteria, &ctx)?;
        if chain.is_empty() {
            debug!(indexer_id = %indexer.id(), "Generator produced no requests");
            return Ok((vec![], None));
        }

        let limit = criteria.common().limit.filter(|l| *l > 0).map(|l| l as usize);
        let mut first_url = None;

        for tier in chain.into_tiers() {
            if cancel.is_cancelled() {
                return Err(IndexerError::Cancelled);
            }

            let label = tier.label.clone();
            let (releases, url) = self.fetch_tier(indexer, &caps, tier, limit, cancel).await?;
            first_url = first_url.or(url);

            if releases.is_empty() {
                debug!(indexer_id = %indexer.id(), tier = %label, "Tier returned nothing, falling back");
                continue;
            }

            debug!(indexer_id = %indexer.id(), tier = %label, releases = releases.len(), "Tier answered");
            return Ok((self.finish(indexer, criteria, releases, limit), first_url));
        }

        Ok((vec![], first_url))
    }

    async fn fetch_tier(
        &self,
        indexer: &Indexer,
        caps: &IndexerCapabilities,
        tier: RequestTier,
        limit: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<(Vec<ReleaseInfo>, Option<String>)> {
        let mut releases: Vec<ReleaseInfo> = vec![];
        let mut first_url = None;

        for page in tier.pages {
            if cancel.is_cancelled() {
                return Err(IndexerError::Cancelled);
            }

            first_url.get_or_insert_with(|| page.url().to_string());
            debug!(indexer_id = %indexer.id(), tier = %tier.label, url = %page.url(), "Fetching page");

            let parsed = self.fetch_page(indexer, caps, &page, cancel).await?;
            let count = parsed.len();
            releases.extend(parsed);

            if count < page.page_size as usize {
                break;
            }
            if limit.is_some_and(|limit| releases.len() >= limit) {
                break;
            }
        }

        Ok((releases, first_url))
    }

    async fn fetch_page(
        &self,
        indexer: &Indexer,
        caps: &IndexerCapabilities,
        page: &IndexerRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<ReleaseInfo>> {
        let mut http = page.http.clone();
        if http.rate_limit.is_none() {
            http.rate_limit = indexer.rate_limit;
        }

        self.with_session(indexer, &http, cancel, |response| {
            indexer.parser.parse(&IndexerResponse {
                request: page,
                http: response,
                capabilities: caps,
                settings: &indexer.settings,
            })
        })
        .await
    }

    /// Dispatch `request` with the indexer's credentials and hand the response
    /// to `handle`. A rejected session is refreshed once and the request
    /// repeated.
    async fn with_session<T, F>(
        &self,
        indexer: &Indexer,
        request: &HttpRequest,
        cancel: &CancellationToken,
        handle: F,
    ) -> Result<T>
    where
        F: Fn(&HttpResponse) -> Result<T>,
    {
        let manager = self.sessions.get(indexer.id());
        let auth = indexer.auth.as_ref();
        let login_ctx = LoginContext {
            dispatcher: &self.dispatcher,
            settings: &indexer.settings,
            rate_limit: indexer.rate_limit,
        };

        let (mut session, mut generation) = self.ensure_session(indexer, &manager, &login_ctx).await?;
        let mut relogged = false;

        loop {
            let mut http = request.clone();
            auth.apply(&mut http, &session, &indexer.settings);

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(IndexerError::Cancelled),
                outcome = self.dispatcher.execute(&http) => outcome,
            };

            let result = match outcome {
                Ok(response) if auth.needs_login(&response) => Err(IndexerError::Auth(format!(
                    "session rejected by {}",
                    response.url
                ))),
                Ok(response) => handle(&response),
                Err(e) => Err(e),
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if relogged || !is_login_trigger(&err, auth) {
                return Err(escalate(err, auth));
            }
            relogged = true;

            debug!(indexer_id = %indexer.id(), error = %err, "Session rejected, logging in again");
            let started = Instant::now();
            match manager.refresh(generation, auth, &login_ctx).await {
                Ok((fresh, fresh_generation)) => {
                    self.events.emit(
                        IndexerEvent::new(indexer.id(), EventType::Auth, true).with_elapsed(started.elapsed()),
                    );
                    session = fresh;
                    generation = fresh_generation;
                }
                Err(IndexerError::NotSupported(_)) => return Err(escalate(err, auth)),
                Err(login_err) => {
                    self.events.emit(
                        IndexerEvent::new(indexer.id(), EventType::Auth, false).with_elapsed(started.elapsed()),
                    );
                    warn!(indexer_id = %indexer.id(), error = %login_err, "Login failed");
                    return Err(login_err);
                }
            }
        }
    }

    async fn ensure_session(
        &self,
        indexer: &Indexer,
        manager: &SessionManager,
        ctx: &LoginContext<'_>,
    ) -> Result<(super::session::SessionState, u64)> {
        let before = manager.generation();
        let started = Instant::now();

        match manager.ensure(indexer.auth.as_ref(), ctx).await {
            Ok((session, generation)) => {
                if generation != before {
                    self.events.emit(
                        IndexerEvent::new(indexer.id(), EventType::Auth, true).with_elapsed(started.elapsed()),
                    );
                }
                Ok((session, generation))
            }
            Err(e) => {
                self.events.emit(
                    IndexerEvent::new(indexer.id(), EventType::Auth, false).with_elapsed(started.elapsed()),
                );
                warn!(indexer_id = %indexer.id(), error = %e, "Login failed");
                Err(e)
            }
        }
    }

    /// Stamp, dedupe and filter the winning tier's releases
    fn finish(
        &self,
        indexer: &Indexer,
        criteria: &SearchCriteria,
        releases: Vec<ReleaseInfo>,
        limit: Option<usize>,
    ) -> Vec<ReleaseInfo> {
        let mut seen = HashSet::new();
        let mut releases: Vec<ReleaseInfo> = releases
            .into_iter()
            .filter(|r| seen.insert(r.guid.clone()))
            .map(|mut r| {
                r.indexer_id = indexer.id().to_string();
                r.indexer_name = indexer.name().to_string();
                r.protocol = indexer.protocol;
                r
            })
            .collect();

        let requested = &criteria.common().categories;
        if !requested.is_empty() {
            let wanted = expand_categories(requested);
            let before = releases.len();
            releases.retain(|r| r.categories.is_empty() || r.categories.iter().any(|c| wanted.contains(c)));
            if releases.len() != before {
                trace!(
                    indexer_id = %indexer.id(),
                    filtered = before - releases.len(),
                    "Dropped releases outside the searched categories"
                );
            }
        }

        retain_freeleech(&mut releases, indexer.settings.freeleech_only);

        if let Some(limit) = limit {
            releases.truncate(limit);
        }
        releases
    }
}

/// Errors that mean the credentials were not accepted
fn is_login_trigger(err: &IndexerError, auth: &dyn AuthStrategy) -> bool {
    match err {
        IndexerError::Auth(_) => true,
        IndexerError::Http { status: 401, .. } => true,
        IndexerError::UnexpectedHtml { response } => auth.needs_login(response),
        _ => false,
    }
}

fn escalate(err: IndexerError, auth: &dyn AuthStrategy) -> IndexerError {
    match err {
        IndexerError::Http { status: 401, url, .. } => {
            IndexerError::Auth(format!("{} rejected the credentials", url))
        }
        IndexerError::UnexpectedHtml { response } if auth.needs_login(&response) => {
            IndexerError::Auth(format!("{} redirected to its login page", response.url))
        }
        other => other,
    }
}

fn search_event_type(criteria: &SearchCriteria) -> EventType {
    if criteria.is_rss() {
        EventType::Rss
    } else {
        EventType::Query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::categories::cats;
    use crate::indexer::session::NoAuth;
    use crate::indexer::types::DownloadProtocol;
    use crate::indexer::definitions::{IndexerDefinition, IndexerSettings};

    fn indexer(freeleech_only: bool) -> Indexer {
        crate::indexer::definitions::torznab::build(
            IndexerDefinition {
                id: "tz".to_string(),
                name: "Torznab".to_string(),
                implementation: "torznab".to_string(),
                protocol: None,
                enabled: true,
                tags: vec![],
                settings: serde_json::Value::Null,
            },
            IndexerSettings {
                base_url: "https://tracker.example".to_string(),
                freeleech_only,
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn pipeline() -> IndexerPipeline {
        IndexerPipeline::new(
            Arc::new(HttpDispatcher::new(&Default::default()).unwrap()),
            Arc::new(crate::indexer::session::MemorySettingsStore::new()),
            Arc::new(crate::indexer::events::NullEventSink),
            PipelineConfig::default(),
        )
    }

    fn release(guid: &str, cat: i32, download_factor: f64) -> ReleaseInfo {
        let mut r = ReleaseInfo::default();
        r.guid = guid.to_string();
        r.categories = vec![cat];
        r.download_volume_factor = download_factor;
        r
    }

    #[test]
    fn test_finish_stamps_dedupes_and_filters() {
        let criteria = SearchCriteria::search("x").with_categories(vec![cats::TV]);
        let releases = vec![
            release("a", cats::TV_HD, 1.0),
            release("a", cats::TV_HD, 1.0),
            release("b", cats::MOVIES_HD, 1.0),
            release("c", cats::TV_SD, 0.0),
        ];

        let out = pipeline().finish(&indexer(false), &criteria, releases, None);
        let guids: Vec<&str> = out.iter().map(|r| r.guid.as_str()).collect();
        assert_eq!(guids, vec!["a", "c"]);
        assert!(out.iter().all(|r| r.indexer_id == "tz" && r.protocol == DownloadProtocol::Torrent));
    }

    #[test]
    fn test_finish_keeps_uncategorized_releases() {
        let criteria = SearchCriteria::search("x").with_categories(vec![cats::TV]);
        let mut bare = release("bare", cats::TV_HD, 1.0);
        bare.categories.clear();
        let releases = vec![bare, release("movie", cats::MOVIES, 1.0)];

        let out = pipeline().finish(&indexer(false), &criteria, releases, None);
        let guids: Vec<&str> = out.iter().map(|r| r.guid.as_str()).collect();
        assert_eq!(guids, vec!["bare"]);
    }

    #[test]
    fn test_finish_applies_freeleech_and_limit() {
        let criteria = SearchCriteria::search("x");
        let releases = vec![
            release("a", cats::TV_HD, 0.0),
            release("b", cats::TV_HD, 1.0),
            release("c", cats::TV_HD, 0.0),
        ];

        let out = pipeline().finish(&indexer(true), &criteria, releases, Some(1));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].guid, "a");
    }

    #[test]
    fn test_login_triggers() {
        let auth = NoAuth;
        assert!(is_login_trigger(&IndexerError::Auth("x".to_string()), &auth));
        assert!(is_login_trigger(
            &IndexerError::Http {
                status: 401,
                url: "u".to_string(),
                excerpt: String::new()
            },
            &auth
        ));
        assert!(!is_login_trigger(&IndexerError::rate_limited(Duration::from_secs(1), "x"), &auth));

        let escalated = escalate(
            IndexerError::Http {
                status: 401,
                url: "https://tracker.example/api".to_string(),
                excerpt: String::new(),
            },
            &auth,
        );
        assert_eq!(escalated.kind(), "auth");
    }
}
