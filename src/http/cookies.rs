//! Persistent cookie store keyed by host

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCookie {
    pub value: String,
    pub expires: Option<DateTime<Utc>>,
}

impl StoredCookie {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }
}

/// Cookies that outlive a single request
#[derive(Debug, Default)]
pub struct CookieStore {
    hosts: RwLock<HashMap<String, BTreeMap<String, StoredCookie>>>,
}

impl CookieStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live cookies for a host; expired ones are skipped
    pub fn cookies_for(&self, host: &str) -> BTreeMap<String, String> {
        let now = Utc::now();
        self.hosts
            .read()
            .get(host)
            .map(|jar| {
                jar.iter()
                    .filter(|(_, c)| !c.is_expired(now))
                    .map(|(name, c)| (name.clone(), c.value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Merge cookies into a host's jar. An empty value deletes the cookie.
    pub fn merge<I>(&self, host: &str, cookies: I)
    where
        I: IntoIterator<Item = (String, String, Option<DateTime<Utc>>)>,
    {
        let mut hosts = self.hosts.write();
        let jar = hosts.entry(host.to_string()).or_default();
        for (name, value, expires) in cookies {
            if value.is_empty() {
                jar.remove(&name);
            } else {
                jar.insert(name, StoredCookie { value, expires });
            }
        }
    }

    pub fn remove_host(&self, host: &str) {
        self.hosts.write().remove(host);
    }

    pub fn clear(&self) {
        self.hosts.write().clear();
    }
}

/// Render cookies as a `Cookie` header value
pub fn cookie_header(cookies: &BTreeMap<String, String>) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }

    Some(
        cookies
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

/// Parse a `name=value; name2=value2` string as stored in indexer settings
pub fn parse_cookie_header(header: &str) -> BTreeMap<String, String> {
    header
        .split(';')
        .filter_map(|part| {
            let (name, value) = part.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}
