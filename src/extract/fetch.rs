//! Asset download.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, REFERER, USER_AGENT};
use url::Url;

const BROWSER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/110.0.0.0 Safari/537.36";

/// A downloaded asset.
#[derive(Debug, Clone)]
pub struct Download {
    pub bytes: Vec<u8>,
    /// Lowercased `Content-Type` header, empty when absent.
    pub content_type: String,
}

/// Why a download produced nothing. `Display` is the per-item status text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    Timeout,
    Status(u16),
    Connection,
}

impl std::fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchFailure::Timeout => write!(f, "DL Timeout"),
            FetchFailure::Status(code) => write!(f, "DL HTTP Err {code}"),
            FetchFailure::Connection => write!(f, "DL Conn Err"),
        }
    }
}

#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Download `url`. `referer` is the page the asset was found on.
    async fn fetch(&self, url: &Url, referer: Option<&Url>) -> Result<Download, FetchFailure>;
}

/// Fetches over HTTP with a browser user agent.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> crate::error::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

fn classify(e: &reqwest::Error) -> FetchFailure {
    if e.is_timeout() {
        FetchFailure::Timeout
    } else if let Some(status) = e.status() {
        FetchFailure::Status(status.as_u16())
    } else {
        FetchFailure::Connection
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, referer: Option<&Url>) -> Result<Download, FetchFailure> {
        let mut request = self
            .client
            .get(url.clone())
            .header(USER_AGENT, BROWSER_AGENT);
        if let Some(referer) = referer {
            request = request.header(REFERER, referer.as_str());
        }
        let response = request.send().await.map_err(|e| classify(&e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::Status(status.as_u16()));
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let bytes = response.bytes().await.map_err(|e| classify(&e))?;
        Ok(Download {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}
