//! Generic adapter for menu pages that publish schema.org JSON-LD.
//!
//! Walks every `application/ld+json` block for `MenuItem` nodes, following
//! `hasMenu`, `hasMenuSection`, `hasMenuItem` and `@graph`. The nearest
//! enclosing `MenuSection` name becomes the item's section.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use serde_json::{Map, Value};
use url::Url;

use super::adapter::{ScraperAdapter, host_matches};
use crate::error::{Error, Result};
use crate::model::LineItem;

pub const DEFAULT_DOMAINS: [&str; 4] = ["glovoapp.com", "ubereats.com", "wolt.com", "foodora.cz"];

const BROWSER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/110.0.0.0 Safari/537.36";

static LD_JSON_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<script[^>]*type\s*=\s*["']application/ld\+json["'][^>]*>(.*?)</script>"#)
        .expect("valid JSON-LD block pattern")
});

const CHILD_KEYS: [&str; 5] = ["@graph", "hasMenu", "hasMenuSection", "hasMenuItem", "mainEntity"];

pub struct JsonLdMenuAdapter {
    client: reqwest::Client,
    domains: Vec<String>,
}

impl JsonLdMenuAdapter {
    pub fn new(domains: Vec<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client, domains })
    }

    pub fn with_default_domains() -> Result<Self> {
        Self::new(DEFAULT_DOMAINS.iter().map(|d| d.to_string()).collect())
    }
}

#[async_trait]
impl ScraperAdapter for JsonLdMenuAdapter {
    fn name(&self) -> &str {
        "json-ld"
    }

    fn handles(&self, url: &Url) -> bool {
        self.domains.iter().any(|d| host_matches(url, d))
    }

    async fn scrape(&self, url: &Url) -> Result<Vec<LineItem>> {
        let response = self
            .client
            .get(url.clone())
            .header(USER_AGENT, BROWSER_AGENT)
            .header(ACCEPT, "text/html,application/xhtml+xml")
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9,pt-PT;q=0.8,pt;q=0.7")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::ExtractionPipeline(format!("{url} returned {status}")));
        }
        let html = response.text().await?;
        let items = parse_menu(&html, url);
        tracing::info!(url = %url, items = items.len(), "json-ld menu parsed");
        Ok(items)
    }
}

/// Every menu item found in the page's JSON-LD blocks, in document order.
pub fn parse_menu(html: &str, page: &Url) -> Vec<LineItem> {
    let mut items = Vec::new();
    for block in LD_JSON_BLOCK.captures_iter(html) {
        let Some(raw) = block.get(1) else { continue };
        match serde_json::from_str::<Value>(raw.as_str().trim()) {
            Ok(value) => collect(&value, None, page, &mut items),
            Err(e) => tracing::debug!(error = %e, "skipping unparsable JSON-LD block"),
        }
    }
    items
}

fn has_type(node: &Map<String, Value>, wanted: &str) -> bool {
    match node.get("@type") {
        Some(Value::String(t)) => t == wanted,
        Some(Value::Array(ts)) => ts.iter().any(|t| t.as_str() == Some(wanted)),
        _ => false,
    }
}

fn text(node: &Map<String, Value>, key: &str) -> Option<String> {
    node.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn collect(value: &Value, section: Option<&str>, page: &Url, out: &mut Vec<LineItem>) {
    match value {
        Value::Array(nodes) => {
            for node in nodes {
                collect(node, section, page, out);
            }
        }
        Value::Object(node) => {
            if has_type(node, "MenuItem") {
                let item = menu_item(node, section, page, out.len() + 1);
                out.push(item);
                return;
            }
            let own_name = if has_type(node, "MenuSection") {
                node.get("name").and_then(Value::as_str)
            } else {
                None
            };
            let section = own_name.or(section);
            for key in CHILD_KEYS {
                if let Some(child) = node.get(key) {
                    collect(child, section, page, out);
                }
            }
        }
        _ => {}
    }
}

fn menu_item(node: &Map<String, Value>, section: Option<&str>, page: &Url, n: usize) -> LineItem {
    let name = text(node, "name");
    LineItem {
        id: name.clone().unwrap_or_else(|| format!("Item_{n}")),
        section: section.map(str::to_string),
        price: price(node),
        name,
        description: text(node, "description"),
        image_url: image(node.get("image"), page),
    }
}

fn price(node: &Map<String, Value>) -> Option<String> {
    let offer = match node.get("offers")? {
        Value::Array(offers) => offers.first()?.as_object()?,
        Value::Object(offer) => offer,
        _ => return None,
    };
    let amount = match offer.get("price")? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    match text(offer, "priceCurrency") {
        Some(currency) => Some(format!("{amount} {currency}")),
        None => Some(amount),
    }
}

fn image(value: Option<&Value>, page: &Url) -> Option<String> {
    let raw = match value? {
        Value::String(s) => s.as_str(),
        Value::Array(list) => return list.iter().find_map(|v| image(Some(v), page)),
        Value::Object(obj) => obj.get("url").or_else(|| obj.get("contentUrl"))?.as_str()?,
        _ => return None,
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    page.join(raw).ok().map(String::from)
}
