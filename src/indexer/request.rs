//! Request tiers and paging
//!
//! A search turns into a [`RequestChain`]: alternative tiers tried in order,
//! each a lazy sequence of page requests. Only one tier's results are used.

use std::fmt;

use super::capabilities::IndexerCapabilities;
use super::definitions::IndexerSettings;
use super::types::{SearchCommon, SearchCriteria};
use crate::error::Result;
use crate::http::HttpRequest;

/// Safety bound on pages generated for one tier
pub const MAX_PAGES: u32 = 400;

/// One page request
#[derive(Debug, Clone)]
pub struct IndexerRequest {
    pub http: HttpRequest,
    pub offset: u32,
    pub page_size: u32,
}

impl IndexerRequest {
    pub fn new(http: HttpRequest, offset: u32, page_size: u32) -> Self {
        Self {
            http,
            offset,
            page_size,
        }
    }

    pub fn url(&self) -> &str {
        self.http.url.as_str()
    }
}

/// One alternative search strategy
pub struct RequestTier {
    pub label: String,
    pub pages: Box<dyn Iterator<Item = IndexerRequest> + Send>,
}

impl RequestTier {
    pub fn new(label: impl Into<String>, pages: impl Iterator<Item = IndexerRequest> + Send + 'static) -> Self {
        Self {
            label: label.into(),
            pages: Box::new(pages),
        }
    }

    /// A tier with exactly one request
    pub fn single(label: impl Into<String>, request: IndexerRequest) -> Self {
        Self::new(label, std::iter::once(request))
    }
}

impl fmt::Debug for RequestTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestTier").field("label", &self.label).finish()
    }
}

/// Tiers in preference order
#[derive(Debug, Default)]
pub struct RequestChain {
    tiers: Vec<RequestTier>,
}

impl RequestChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tier(&mut self, tier: RequestTier) {
        self.tiers.push(tier);
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.tiers.iter().map(|t| t.label.as_str()).collect()
    }

    pub fn into_tiers(self) -> Vec<RequestTier> {
        self.tiers
    }
}

/// Offsets and sizes of the pages to request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub start_offset: u32,
    pub page_size: u32,
    /// At most this many pages
    pub max_pages: u32,
}

impl PageWindow {
    pub fn for_criteria(common: &SearchCommon, capabilities: &IndexerCapabilities, max_pages: u32) -> Self {
        let limit = common.limit.unwrap_or(0);
        let offset = common.offset.unwrap_or(0);
        let page_size = capabilities.page_size();

        let max_pages = if (limit == 0 && offset == 0) || common.is_rss_search {
            1
        } else {
            max_pages.clamp(1, MAX_PAGES)
        };

        Self {
            start_offset: offset,
            page_size,
            max_pages,
        }
    }

    /// Lazily yields `(offset, page_size)` pairs in increasing offset order
    pub fn pages(self) -> impl Iterator<Item = (u32, u32)> + Send + 'static {
        let page_size = self.page_size;
        std::iter::successors(Some(self.start_offset), move |offset| offset.checked_add(page_size))
            .take(self.max_pages as usize)
            .map(move |offset| (offset, page_size))
    }

    /// Page requests produced by `build` for every window position
    pub fn requests<F>(self, build: F) -> impl Iterator<Item = IndexerRequest> + Send + 'static
    where
        F: Fn(u32, u32) -> Option<HttpRequest> + Send + 'static,
    {
        self.pages().filter_map(move |(offset, size)| {
            build(offset, size).map(|http| IndexerRequest::new(http, offset, size))
        })
    }
}

/// Inputs a generator reads besides the criteria
pub struct RequestContext<'a> {
    pub settings: &'a IndexerSettings,
    pub capabilities: &'a IndexerCapabilities,
    pub max_pages: u32,
}

/// Turns search criteria into a chain of request tiers
pub trait RequestGenerator: Send + Sync {
    fn search_requests(&self, criteria: &SearchCriteria, ctx: &RequestContext<'_>) -> Result<RequestChain>;
}
