//! Extraction pipeline: claimed item link in, export files out.
//!
//! Orchestration only. Scraping, downloading and image work sit behind the
//! [`ScraperAdapter`], [`AssetFetcher`] and [`AssetNormalizer`] traits.
//! Per-asset problems become status strings in the export table; only a
//! scrape that finds nothing fails the run.

pub mod adapter;
pub mod fetch;
pub mod jsonld;
pub mod normalize;
pub mod package;

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::model::{Artifact, Category, LineItem, WorkItem};

pub use adapter::{AdapterRegistry, ScraperAdapter, host_matches, parse_link};
pub use fetch::{AssetFetcher, Download, FetchFailure, HttpFetcher};
pub use jsonld::JsonLdMenuAdapter;
pub use normalize::{AssetNormalizer, ImageNormalizer, Normalized};
pub use package::OutputPackager;

const IMAGE_EXTENSIONS: [&str; 8] = [
    ".jpg", ".jpeg", ".png", ".gif", ".webp", ".avif", ".tiff", ".bmp",
];

/// A scraped line item plus what became of its image.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedItem {
    pub item: LineItem,
    /// Image filename inside the bundle, or why there is none.
    pub image_status: String,
}

/// Files produced for one extraction run. Either may be absent.
#[derive(Debug, Clone, Default)]
pub struct ExtractionOutput {
    pub table: Option<Artifact>,
    pub bundle: Option<Artifact>,
    pub items: Vec<ProcessedItem>,
}

impl ExtractionOutput {
    pub fn artifacts(&self) -> Vec<Artifact> {
        self.table.iter().chain(self.bundle.iter()).cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_none() && self.bundle.is_none()
    }
}

pub struct ExtractionPipeline {
    registry: AdapterRegistry,
    fetcher: Arc<dyn AssetFetcher>,
    normalizer: Arc<dyn AssetNormalizer>,
    packager: OutputPackager,
}

impl ExtractionPipeline {
    pub fn new(
        registry: AdapterRegistry,
        fetcher: Arc<dyn AssetFetcher>,
        normalizer: Arc<dyn AssetNormalizer>,
    ) -> Self {
        Self {
            registry,
            fetcher,
            normalizer,
            packager: OutputPackager,
        }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Run on a claimed item.
    ///
    /// Returns `Ok(None)` when none of its links is handled by an adapter.
    pub async fn run(&self, item: &WorkItem) -> Result<Option<ExtractionOutput>> {
        let Some((url, adapter)) = self.registry.select(&item.links) else {
            info!(case_id = %item.display_id, "no supported link on claimed case");
            return Ok(None);
        };
        info!(
            case_id = %item.display_id,
            adapter = adapter.name(),
            url = %url,
            "extracting claimed case"
        );
        self.extract(adapter.as_ref(), &url, item.category)
            .await
            .map(Some)
    }

    /// Run on a URL supplied by an operator.
    pub async fn run_url(&self, raw: &str, category: Category) -> Result<ExtractionOutput> {
        let url = parse_link(raw)
            .ok_or_else(|| Error::ExtractionPipeline(format!("not an http(s) url: {raw}")))?;
        let adapter = self
            .registry
            .find(&url)
            .ok_or_else(|| Error::ExtractionPipeline(format!("no adapter handles {url}")))?;
        self.extract(adapter.as_ref(), &url, category).await
    }

    /// Normalize loose images and bundle them under `bundle_name`.
    ///
    /// Images that fail are skipped and reported in the returned statuses.
    pub async fn bundle_images(
        &self,
        inputs: Vec<(String, Vec<u8>)>,
        bundle_name: String,
    ) -> Result<(Option<Artifact>, Vec<(String, String)>)> {
        let mut images = Vec::new();
        let mut statuses = Vec::new();
        for (name, bytes) in inputs {
            let base = sanitize_filename(strip_extension(&name));
            let status = match self.normalizer.normalize(&bytes).await {
                Normalized::Image(jpeg) => {
                    let filename = format!("{base}.jpg");
                    images.push(Artifact {
                        filename: filename.clone(),
                        bytes: jpeg,
                    });
                    filename
                }
                other => other.status().unwrap_or_default().to_string(),
            };
            statuses.push((name, status));
        }
        let bundle = self.packager.bundle(bundle_name, &images)?;
        Ok((bundle, statuses))
    }

    async fn extract(
        &self,
        adapter: &dyn ScraperAdapter,
        url: &Url,
        category: Category,
    ) -> Result<ExtractionOutput> {
        let started = Instant::now();
        let items = adapter
            .scrape(url)
            .await
            .map_err(|e| Error::ExtractionPipeline(format!("{} scrape failed: {e}", adapter.name())))?;
        if items.is_empty() {
            return Err(Error::ExtractionPipeline(format!(
                "{} found no items at {url}",
                adapter.name()
            )));
        }

        let mut processed = Vec::with_capacity(items.len());
        let mut images = Vec::new();
        for (index, item) in items.into_iter().enumerate() {
            let (image_status, image) = self.process_asset(index, &item, url).await;
            if let Some(image) = image {
                images.push(image);
            }
            processed.push(ProcessedItem { item, image_status });
        }

        let table = self.packager.table(category, &processed)?;
        let bundle = self
            .packager
            .bundle(OutputPackager::bundle_name(category), &images)?;
        info!(
            items = processed.len(),
            images = images.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "extraction finished"
        );
        Ok(ExtractionOutput {
            table,
            bundle,
            items: processed,
        })
    }

    async fn process_asset(
        &self,
        index: usize,
        item: &LineItem,
        page: &Url,
    ) -> (String, Option<Artifact>) {
        let Some(url) = item.image_url.as_deref().and_then(parse_link) else {
            return ("No valid URL".to_string(), None);
        };
        let base = sanitize_filename(&format!("{index}_{}", item.id));
        if base.is_empty() {
            return ("Invalid name for file".to_string(), None);
        }

        let download = match self.fetcher.fetch(&url, Some(page)).await {
            Ok(d) => d,
            Err(failure) => {
                debug!(url = %url, %failure, "asset download failed");
                return (failure.to_string(), None);
            }
        };
        if !looks_like_image(&download.content_type, &url) {
            let shown: String = download.content_type.chars().take(20).collect();
            return (format!("Non-image ({shown})"), None);
        }
        if download.bytes.is_empty() {
            return ("DL empty file".to_string(), None);
        }

        match self.normalizer.normalize(&download.bytes).await {
            Normalized::Image(jpeg) => {
                let filename = format!("{base}.jpg");
                (
                    filename.clone(),
                    Some(Artifact {
                        filename,
                        bytes: jpeg,
                    }),
                )
            }
            other => {
                if let Normalized::Failed(reason) = &other {
                    warn!(url = %url, %reason, "image normalization failed");
                }
                (other.status().unwrap_or_default().to_string(), None)
            }
        }
    }
}

fn looks_like_image(content_type: &str, url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    content_type.starts_with("image/") || IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

fn strip_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

/// File-system safe name: spaces to underscores, anything outside
/// `[A-Za-z0-9_.-]` collapsed to `_`, at most 100 characters. A trailing
/// extension is kept and lowercased.
pub fn sanitize_filename(name: &str) -> String {
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty() && !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            (stem, Some(ext.to_ascii_lowercase()))
        }
        _ => (name, None),
    };

    let mut out = String::with_capacity(stem.len());
    for c in stem.chars() {
        if matches!(c, '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|') {
            continue;
        }
        let c = if c.is_ascii_alphanumeric() || matches!(c, '.' | '-') {
            c
        } else {
            '_'
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    let trimmed: String = out.chars().take(100).collect();
    let trimmed = trimmed.trim_matches(|c| c == '_' || c == ' ');

    match ext {
        Some(ext) if !trimmed.is_empty() => format!("{trimmed}.{ext}"),
        _ => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_collapses_and_strips() {
        assert_eq!(sanitize_filename("0_Bacalhau à Brás"), "0_Bacalhau_Br_s");
        assert_eq!(sanitize_filename("a/b:c  d"), "abc_d");
        assert_eq!(sanitize_filename("Photo.JPG"), "Photo.jpg");
        assert_eq!(sanitize_filename("___"), "");
    }

    #[test]
    fn image_detection_uses_header_or_extension() {
        let url = Url::parse("https://cdn.example.com/x/dish.webp?w=200").unwrap();
        assert!(looks_like_image("application/octet-stream", &url));
        let url = Url::parse("https://cdn.example.com/x/dish").unwrap();
        assert!(looks_like_image("image/png", &url));
        assert!(!looks_like_image("text/html", &url));
    }
}
