//! Session and authentication management
//!
//! Each indexer has one [`SessionManager`] owning its cookies and tokens.
//! Auth strategies decide how credentials are attached and how a login is
//! performed; the manager makes sure only one login runs at a time and
//! writes the result back through the [`SettingsStore`].

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use super::definitions::IndexerSettings;
use crate::error::{IndexerError, Result};
use crate::http::cookies::parse_cookie_header;
use crate::http::{
    CaptchaChallenge, CaptchaSolution, ContentExpectation, HttpDispatcher, HttpRequest, HttpResponse,
};

/// Lifetime of cookies obtained through a form login
pub const COOKIE_SESSION_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Credentials obtained for one indexer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
    pub auth_token: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty() && self.auth_token.is_none()
    }

    pub fn is_expired(&self) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= Utc::now())
    }
}

/// Persistence for session state
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load_session(&self, indexer_id: &str) -> anyhow::Result<Option<SessionState>>;
    async fn save_session(&self, indexer_id: &str, session: &SessionState) -> anyhow::Result<()>;
    async fn clear_session(&self, indexer_id: &str) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct MemorySettingsStore {
    sessions: RwLock<HashMap<String, SessionState>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn load_session(&self, indexer_id: &str) -> anyhow::Result<Option<SessionState>> {
        Ok(self.sessions.read().get(indexer_id).cloned())
    }

    async fn save_session(&self, indexer_id: &str, session: &SessionState) -> anyhow::Result<()> {
        self.sessions
            .write()
            .insert(indexer_id.to_string(), session.clone());
        Ok(())
    }

    async fn clear_session(&self, indexer_id: &str) -> anyhow::Result<()> {
        self.sessions.write().remove(indexer_id);
        Ok(())
    }
}

/// Sessions for all indexers in one JSON file
pub struct FileSettingsStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> anyhow::Result<HashMap<String, SessionState>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("Failed to parse session store {}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read session store {}", self.path.display())),
        }
    }

    async fn write_all(&self, sessions: &HashMap<String, SessionState>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let json = serde_json::to_vec_pretty(sessions)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn load_session(&self, indexer_id: &str) -> anyhow::Result<Option<SessionState>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.remove(indexer_id))
    }

    async fn save_session(&self, indexer_id: &str, session: &SessionState) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let mut sessions = self.read_all().await?;
        if sessions.get(indexer_id) == Some(session) {
            return Ok(());
        }
        sessions.insert(indexer_id.to_string(), session.clone());
        self.write_all(&sessions).await
    }

    async fn clear_session(&self, indexer_id: &str) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let mut sessions = self.read_all().await?;
        if sessions.remove(indexer_id).is_some() {
            self.write_all(&sessions).await?;
        }
        Ok(())
    }
}

/// What a login needs to talk to the indexer
pub struct LoginContext<'a> {
    pub dispatcher: &'a HttpDispatcher,
    pub settings: &'a IndexerSettings,
    pub rate_limit: Option<Duration>,
}

impl LoginContext<'_> {
    fn url(&self, path: &str) -> Result<url::Url> {
        self.settings.url_for(path)
    }
}

/// How an indexer authenticates
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Attach credentials to an outgoing request
    fn apply(&self, request: &mut HttpRequest, session: &SessionState, settings: &IndexerSettings);

    /// A login must happen before the first request
    fn requires_login(&self, _session: &SessionState, _settings: &IndexerSettings) -> bool {
        false
    }

    /// The response shows the session is no longer valid
    fn needs_login(&self, response: &HttpResponse) -> bool {
        response.status == 401
    }

    async fn login(&self, _ctx: &LoginContext<'_>) -> Result<SessionState> {
        Err(IndexerError::NotSupported(format!(
            "{} authentication has no login",
            self.name()
        )))
    }
}

/// Public indexers and indexers that carry credentials in the request body
pub struct NoAuth;

impl AuthStrategy for NoAuth {
    fn name(&self) -> &'static str {
        "none"
    }

    fn apply(&self, _request: &mut HttpRequest, _session: &SessionState, _settings: &IndexerSettings) {}

    fn needs_login(&self, _response: &HttpResponse) -> bool {
        false
    }
}

/// API key passed as a query parameter
pub struct ApiKeyQuery {
    pub param: &'static str,
}

impl AuthStrategy for ApiKeyQuery {
    fn name(&self) -> &'static str {
        "api_key"
    }

    fn apply(&self, request: &mut HttpRequest, _session: &SessionState, settings: &IndexerSettings) {
        let Some(key) = settings.api_key() else {
            return;
        };
        if request.url.query_pairs().any(|(k, _)| k == self.param) {
            return;
        }
        request.append_query(self.param, key);
    }

    fn needs_login(&self, _response: &HttpResponse) -> bool {
        false
    }
}

/// Static bearer token taken from the API key setting
pub struct BearerToken;

impl AuthStrategy for BearerToken {
    fn name(&self) -> &'static str {
        "bearer"
    }

    fn apply(&self, request: &mut HttpRequest, _session: &SessionState, settings: &IndexerSettings) {
        if let Some(key) = settings.api_key() {
            request.set_header("Authorization", format!("Bearer {}", key));
        }
    }

    fn needs_login(&self, _response: &HttpResponse) -> bool {
        false
    }
}

/// HTTP basic authentication from the username/password settings
pub struct BasicAuth;

impl AuthStrategy for BasicAuth {
    fn name(&self) -> &'static str {
        "basic"
    }

    fn apply(&self, request: &mut HttpRequest, _session: &SessionState, settings: &IndexerSettings) {
        let (Some(user), Some(pass)) = (&settings.username, &settings.password) else {
            return;
        };
        let encoded = BASE64.encode(format!("{}:{}", user, pass));
        request.set_header("Authorization", format!("Basic {}", encoded));
    }

    fn needs_login(&self, _response: &HttpResponse) -> bool {
        false
    }
}

/// Form fields sent to a login endpoint
pub type LoginFields = fn(&IndexerSettings) -> Vec<(String, String)>;

/// Username and password as `username`/`password` form fields
pub fn username_password_fields(settings: &IndexerSettings) -> Vec<(String, String)> {
    vec![
        ("username".to_string(), settings.username.clone().unwrap_or_default()),
        ("password".to_string(), settings.password.clone().unwrap_or_default()),
    ]
}

#[derive(Debug, Deserialize)]
struct LoginErrorResponse {
    message: Option<String>,
}

/// POST credentials, receive a JSON token, send it as a bearer header
pub struct TokenLogin {
    pub login_path: String,
    pub fields: LoginFields,
    pub token_field: &'static str,
}

#[async_trait]
impl AuthStrategy for TokenLogin {
    fn name(&self) -> &'static str {
        "token_login"
    }

    fn apply(&self, request: &mut HttpRequest, session: &SessionState, _settings: &IndexerSettings) {
        if let Some(token) = &session.auth_token {
            request.set_header("Authorization", format!("Bearer {}", token));
        }
    }

    fn requires_login(&self, session: &SessionState, _settings: &IndexerSettings) -> bool {
        session.auth_token.is_none() || session.is_expired()
    }

    fn needs_login(&self, response: &HttpResponse) -> bool {
        matches!(response.status, 401 | 412)
    }

    async fn login(&self, ctx: &LoginContext<'_>) -> Result<SessionState> {
        let request = HttpRequest::post(ctx.url(&self.login_path)?)
            .with_form((self.fields)(ctx.settings))
            .with_rate_limit(ctx.rate_limit)
            .suppress_status(401);

        let response = ctx.dispatcher.execute(&request).await?;
        let content = response.content();

        if response.status == 401 {
            let message = serde_json::from_str::<LoginErrorResponse>(&content)
                .ok()
                .and_then(|e| e.message)
                .unwrap_or_else(|| "Unauthorized request to indexer".to_string());
            return Err(IndexerError::Auth(message));
        }

        let json: serde_json::Value = serde_json::from_str(&content).map_err(|_| {
            IndexerError::protocol("login response is not valid JSON", &content)
        })?;
        let token = json
            .get(self.token_field)
            .and_then(|t| t.as_str())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| IndexerError::Auth("login response did not contain a token".to_string()))?;

        Ok(SessionState {
            cookies: BTreeMap::new(),
            auth_token: Some(token.to_string()),
            expiry: None,
        })
    }
}

/// Form login that yields session cookies
pub struct CookieLogin {
    pub login_path: String,
    pub fields: LoginFields,
    /// Text that identifies the login page
    pub login_marker: String,
    /// Text present only once logged in
    pub success_marker: Option<String>,
}

impl CookieLogin {
    fn manual_cookies(settings: &IndexerSettings) -> BTreeMap<String, String> {
        settings
            .cookie
            .as_deref()
            .map(parse_cookie_header)
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuthStrategy for CookieLogin {
    fn name(&self) -> &'static str {
        "cookie_login"
    }

    fn apply(&self, request: &mut HttpRequest, session: &SessionState, settings: &IndexerSettings) {
        request.cookies.extend(Self::manual_cookies(settings));
        request
            .cookies
            .extend(session.cookies.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    fn requires_login(&self, session: &SessionState, settings: &IndexerSettings) -> bool {
        if session.cookies.is_empty() {
            return Self::manual_cookies(settings).is_empty();
        }
        session.is_expired()
    }

    fn needs_login(&self, response: &HttpResponse) -> bool {
        if response.status == 401 {
            return true;
        }
        if response.url.as_str().contains(&self.login_marker)
            || response.redirects.iter().any(|r| r.contains(&self.login_marker))
        {
            return true;
        }
        response
            .redirect_location()
            .is_some_and(|location| location.as_str().contains(&self.login_marker))
            || response.content().contains(&self.login_marker)
    }

    async fn login(&self, ctx: &LoginContext<'_>) -> Result<SessionState> {
        let mut request = HttpRequest::post(ctx.url(&self.login_path)?)
            .with_form((self.fields)(ctx.settings))
            .with_rate_limit(ctx.rate_limit)
            .expecting(ContentExpectation::Any);
        request.store_response_cookie = true;

        let response = ctx.dispatcher.execute(&request).await?;

        if let Some(marker) = &self.success_marker {
            if !response.content().contains(marker.as_str()) {
                return Err(IndexerError::Auth(
                    "login failed, check the username and password".to_string(),
                ));
            }
        }

        if response.cookies.is_empty() {
            return Err(IndexerError::Auth("login did not return a session cookie".to_string()));
        }

        let ttl = chrono::Duration::from_std(COOKIE_SESSION_TTL).unwrap_or_else(|_| chrono::Duration::days(30));
        Ok(SessionState {
            cookies: response.cookies.clone(),
            auth_token: None,
            expiry: Some(Utc::now() + ttl),
        })
    }
}

/// Owner of one indexer's session
pub struct SessionManager {
    indexer_id: String,
    store: Arc<dyn SettingsStore>,
    state: RwLock<SessionState>,
    loaded: OnceCell<()>,
    generation: AtomicU64,
    login_lock: Mutex<()>,
}

impl SessionManager {
    pub fn new(indexer_id: impl Into<String>, store: Arc<dyn SettingsStore>) -> Self {
        Self {
            indexer_id: indexer_id.into(),
            store,
            state: RwLock::new(SessionState::default()),
            loaded: OnceCell::new(),
            generation: AtomicU64::new(0),
            login_lock: Mutex::new(()),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Current session and its generation, loading it from the store on first use
    pub async fn session(&self) -> (SessionState, u64) {
        self.loaded
            .get_or_init(|| async {
                match self.store.load_session(&self.indexer_id).await {
                    Ok(Some(session)) => {
                        debug!(indexer_id = %self.indexer_id, "Loaded stored session");
                        *self.state.write() = session;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(indexer_id = %self.indexer_id, error = %e, "Failed to load stored session");
                    }
                }
            })
            .await;

        (self.state.read().clone(), self.generation())
    }

    /// Session ready for use, logging in first if the strategy demands it
    pub async fn ensure(&self, auth: &dyn AuthStrategy, ctx: &LoginContext<'_>) -> Result<(SessionState, u64)> {
        let (session, generation) = self.session().await;
        if !auth.requires_login(&session, ctx.settings) {
            return Ok((session, generation));
        }

        debug!(indexer_id = %self.indexer_id, strategy = auth.name(), "No usable session, logging in");
        self.refresh(generation, auth, ctx).await
    }

    /// Log in again unless someone already did since `seen_generation`.
    /// Concurrent callers converge on a single login.
    pub async fn refresh(
        &self,
        seen_generation: u64,
        auth: &dyn AuthStrategy,
        ctx: &LoginContext<'_>,
    ) -> Result<(SessionState, u64)> {
        let _guard = self.login_lock.lock().await;

        let current = self.generation();
        if current != seen_generation {
            debug!(indexer_id = %self.indexer_id, "Session already refreshed");
            return Ok((self.state.read().clone(), current));
        }

        let session = auth.login(ctx).await?;
        info!(indexer_id = %self.indexer_id, strategy = auth.name(), "Logged in");

        Ok(self.replace(session).await)
    }

    /// Probe the site for a Cloudflare captcha
    pub async fn captcha_challenge(
        &self,
        dispatcher: &HttpDispatcher,
        settings: &IndexerSettings,
    ) -> Result<Option<CaptchaChallenge>> {
        let request = HttpRequest::get(settings.url_for("")?);
        match dispatcher.execute_once(&request).await {
            Err(IndexerError::CaptchaRequired(challenge)) => Ok(Some(*challenge)),
            Err(e) => Err(e),
            Ok(_) => Ok(None),
        }
    }

    /// Exchange a solved captcha for a clearance cookie
    pub async fn submit_captcha(
        &self,
        dispatcher: &HttpDispatcher,
        solution: &CaptchaSolution,
    ) -> Result<SessionState> {
        let mut url = url::Url::parse(&solution.response_url)
            .map_err(|e| IndexerError::Config(format!("invalid captcha response url: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("id", &solution.ray)
            .append_pair("g-recaptcha-response", &solution.captcha_response);

        let mut request = HttpRequest::get(url).without_redirects();
        request.store_response_cookie = true;

        let response = dispatcher.execute_once(&request).await?;
        if response.cookies.is_empty() {
            return Err(IndexerError::Auth("captcha was not accepted".to_string()));
        }

        let _guard = self.login_lock.lock().await;
        let (mut session, _) = self.session().await;
        session.cookies.extend(response.cookies.clone());
        let (session, _) = self.replace(session).await;
        info!(indexer_id = %self.indexer_id, "Captcha accepted");
        Ok(session)
    }

    /// Forget the session here and in the store
    pub async fn clear(&self) {
        let _guard = self.login_lock.lock().await;
        *self.state.write() = SessionState::default();
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.store.clear_session(&self.indexer_id).await {
            warn!(indexer_id = %self.indexer_id, error = %e, "Failed to clear stored session");
        }
    }

    async fn replace(&self, session: SessionState) -> (SessionState, u64) {
        *self.state.write() = session.clone();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if let Err(e) = self.store.save_session(&self.indexer_id, &session).await {
            warn!(indexer_id = %self.indexer_id, error = %e, "Failed to persist session");
        }

        (session, generation)
    }
}

/// Session managers for all indexers
pub struct SessionRegistry {
    store: Arc<dyn SettingsStore>,
    sessions: RwLock<HashMap<String, Arc<SessionManager>>>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self {
            store,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, indexer_id: &str) -> Arc<SessionManager> {
        if let Some(session) = self.sessions.read().get(indexer_id) {
            return session.clone();
        }

        self.sessions
            .write()
            .entry(indexer_id.to_string())
            .or_insert_with(|| Arc::new(SessionManager::new(indexer_id, self.store.clone())))
            .clone()
    }

    pub fn remove(&self, indexer_id: &str) {
        self.sessions.write().remove(indexer_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use url::Url;

    fn settings() -> IndexerSettings {
        IndexerSettings {
            base_url: "https://tracker.example/".to_string(),
            api_key: Some("secret".to_string()),
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
            ..Default::default()
        }
    }

    fn request() -> HttpRequest {
        HttpRequest::get(Url::parse("https://tracker.example/api?t=search").unwrap())
    }

    struct CountingLogin {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AuthStrategy for CountingLogin {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn apply(&self, _request: &mut HttpRequest, _session: &SessionState, _settings: &IndexerSettings) {}

        fn requires_login(&self, session: &SessionState, _settings: &IndexerSettings) -> bool {
            session.auth_token.is_none()
        }

        async fn login(&self, _ctx: &LoginContext<'_>) -> Result<SessionState> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(SessionState {
                auth_token: Some(format!("token-{}", n)),
                ..Default::default()
            })
        }
    }

    #[test]
    fn test_api_key_is_added_once() {
        let mut req = request();
        let auth = ApiKeyQuery { param: "apikey" };
        auth.apply(&mut req, &SessionState::default(), &settings());
        auth.apply(&mut req, &SessionState::default(), &settings());
        assert_eq!(req.url.as_str(), "https://tracker.example/api?t=search&apikey=secret");
    }

    #[test]
    fn test_basic_auth_header() {
        let mut req = request();
        BasicAuth.apply(&mut req, &SessionState::default(), &settings());
        assert_eq!(req.header("authorization"), Some("Basic dXNlcjpwYXNz"));
    }

    #[test]
    fn test_token_strategy_uses_session_token() {
        let mut req = request();
        let auth = TokenLogin {
            login_path: "api/v1/jackett/auth".to_string(),
            fields: username_password_fields,
            token_field: "token",
        };
        let session = SessionState {
            auth_token: Some("abc".to_string()),
            ..Default::default()
        };
        assert!(auth.requires_login(&SessionState::default(), &settings()));
        assert!(!auth.requires_login(&session, &settings()));
        auth.apply(&mut req, &session, &settings());
        assert_eq!(req.header("Authorization"), Some("Bearer abc"));
    }

    #[test]
    fn test_manual_cookie_skips_login() {
        let auth = CookieLogin {
            login_path: "login".to_string(),
            fields: username_password_fields,
            login_marker: "/login".to_string(),
            success_marker: None,
        };
        let mut with_cookie = settings();
        with_cookie.cookie = Some("uid=1; pass=2".to_string());
        assert!(auth.requires_login(&SessionState::default(), &settings()));
        assert!(!auth.requires_login(&SessionState::default(), &with_cookie));

        let mut req = request();
        auth.apply(&mut req, &SessionState::default(), &with_cookie);
        assert_eq!(req.cookies.get("uid").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn test_concurrent_refresh_logs_in_once() {
        let store: Arc<dyn SettingsStore> = Arc::new(MemorySettingsStore::new());
        let manager = Arc::new(SessionManager::new("idx", store.clone()));
        let auth = Arc::new(CountingLogin {
            calls: AtomicUsize::new(0),
        });
        let dispatcher = Arc::new(HttpDispatcher::new(&Default::default()).unwrap());
        let settings = Arc::new(settings());

        let (_, seen) = manager.session().await;
        let mut handles = vec![];
        for _ in 0..5 {
            let manager = manager.clone();
            let auth = auth.clone();
            let dispatcher = dispatcher.clone();
            let settings = settings.clone();
            handles.push(tokio::spawn(async move {
                let ctx = LoginContext {
                    dispatcher: &dispatcher,
                    settings: &settings,
                    rate_limit: None,
                };
                manager.refresh(seen, auth.as_ref(), &ctx).await.unwrap()
            }));
        }

        for handle in handles {
            let (session, generation) = handle.await.unwrap();
            assert_eq!(session.auth_token.as_deref(), Some("token-0"));
            assert_eq!(generation, seen + 1);
        }
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);

        let stored = store.load_session("idx").await.unwrap().unwrap();
        assert_eq!(stored.auth_token.as_deref(), Some("token-0"));
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSettingsStore::new(dir.path().join("sessions.json"));
        assert!(store.load_session("a").await.unwrap().is_none());

        let session = SessionState {
            cookies: BTreeMap::from([("uid".to_string(), "1".to_string())]),
            auth_token: None,
            expiry: None,
        };
        store.save_session("a", &session).await.unwrap();
        assert_eq!(store.load_session("a").await.unwrap(), Some(session));

        store.clear_session("a").await.unwrap();
        assert!(store.load_session("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stored_session_is_loaded_lazily() {
        let store = Arc::new(MemorySettingsStore::new());
        let session = SessionState {
            auth_token: Some("persisted".to_string()),
            ..Default::default()
        };
        store.save_session("idx", &session).await.unwrap();

        let registry = SessionRegistry::new(store);
        let manager = registry.get("idx");
        assert!(Arc::ptr_eq(&manager, &registry.get("idx")));
        let (loaded, generation) = manager.session().await;
        assert_eq!(loaded, session);
        assert_eq!(generation, 0);
    }
}
