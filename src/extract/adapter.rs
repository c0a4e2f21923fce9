//! Scraper adapter registry.
//!
//! Each adapter declares the hosts it understands and turns one page URL into
//! line items. The pipeline never looks inside an adapter.

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::error::Result;
use crate::model::{LineItem, is_placeholder};

#[async_trait]
pub trait ScraperAdapter: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Whether this adapter can scrape `url`.
    fn handles(&self, url: &Url) -> bool;

    /// Fetch and parse the page. An empty list means nothing was found.
    async fn scrape(&self, url: &Url) -> Result<Vec<LineItem>>;
}

/// True when `url`'s host is `domain` or one of its subdomains.
pub fn host_matches(url: &Url, domain: &str) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    let domain = domain.trim_start_matches('.').to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{domain}"))
}

/// Parse a board link into an http(s) URL, ignoring placeholders.
pub fn parse_link(raw: &str) -> Option<Url> {
    if is_placeholder(raw) {
        return None;
    }
    Url::parse(raw.trim())
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https"))
}

/// Adapters in registration order. The first one that handles a URL wins.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn ScraperAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ScraperAdapter>) {
        tracing::debug!(adapter = adapter.name(), "registered scraper adapter");
        self.adapters.push(adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn ScraperAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn find(&self, url: &Url) -> Option<Arc<dyn ScraperAdapter>> {
        self.adapters.iter().find(|a| a.handles(url)).cloned()
    }

    /// First link, in the given order, that some adapter handles.
    pub fn select(&self, links: &[String]) -> Option<(Url, Arc<dyn ScraperAdapter>)> {
        links
            .iter()
            .filter_map(|raw| parse_link(raw))
            .find_map(|url| self.find(&url).map(|adapter| (url, adapter)))
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.adapters.iter().map(|a| a.name()))
            .finish()
    }
}
