//! Image normalization: any decodable image in, a 1200x1200 JPEG out.
//!
//! Formats the `image` crate cannot read are transcoded to PNG by an external
//! ffmpeg first. Without ffmpeg those assets come back as
//! [`Normalized::Unavailable`], which an operator can fix by installing it.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, Rgb, RgbImage};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Outcome of normalizing one asset.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// Final JPEG bytes.
    Image(Vec<u8>),
    /// A converter is needed and none is installed.
    Unavailable,
    Failed(String),
}

impl Normalized {
    /// Status text for assets that produced no image.
    pub fn status(&self) -> Option<&'static str> {
        match self {
            Normalized::Image(_) => None,
            Normalized::Unavailable => Some("FFmpeg required"),
            Normalized::Failed(_) => Some("Image processing failed"),
        }
    }
}

#[async_trait]
pub trait AssetNormalizer: Send + Sync {
    async fn normalize(&self, bytes: &[u8]) -> Normalized;
}

pub struct ImageNormalizer {
    ffmpeg: Option<PathBuf>,
    width: u32,
    height: u32,
    quality: u8,
    ffmpeg_timeout: Duration,
}

impl ImageNormalizer {
    pub fn new(ffmpeg: Option<PathBuf>) -> Self {
        Self {
            ffmpeg,
            width: 1200,
            height: 1200,
            quality: 90,
            ffmpeg_timeout: Duration::from_secs(15),
        }
    }

    /// Use `configured` if given, otherwise look for `ffmpeg` on `PATH`.
    pub fn discover(configured: Option<PathBuf>) -> Self {
        let ffmpeg = configured.or_else(find_ffmpeg);
        match &ffmpeg {
            Some(path) => debug!(path = %path.display(), "ffmpeg available"),
            None => debug!("ffmpeg not found, exotic image formats will be skipped"),
        }
        Self::new(ffmpeg)
    }

    pub fn ffmpeg(&self) -> Option<&Path> {
        self.ffmpeg.as_deref()
    }

    async fn transcode(&self, ffmpeg: &Path, input: &[u8]) -> Result<Vec<u8>, String> {
        let mut child = Command::new(ffmpeg)
            .args(["-y", "-loglevel", "error", "-i", "pipe:0"])
            .args(["-f", "image2pipe", "-vcodec", "png", "pipe:1"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("spawn {}: {e}", ffmpeg.display()))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| "ffmpeg stdin unavailable".to_string())?;
        let input = input.to_vec();
        let writer = tokio::spawn(async move {
            let _ = stdin.write_all(&input).await;
        });

        let output = tokio::time::timeout(self.ffmpeg_timeout, child.wait_with_output())
            .await
            .map_err(|_| "ffmpeg timed out".to_string())?
            .map_err(|e| format!("ffmpeg: {e}"))?;
        let _ = writer.await;

        if !output.status.success() {
            return Err(format!(
                "ffmpeg exited with {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        if output.stdout.is_empty() {
            return Err("ffmpeg produced no output".to_string());
        }
        Ok(output.stdout)
    }

    fn encode(&self, decoded: &DynamicImage) -> Result<Vec<u8>, String> {
        let flat = flatten_onto_white(&decoded.to_rgba8());
        let resized = image::imageops::resize(&flat, self.width, self.height, FilterType::Lanczos3);

        let mut out = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, self.quality)
            .encode(
                resized.as_raw(),
                resized.width(),
                resized.height(),
                ExtendedColorType::Rgb8,
            )
            .map_err(|e| e.to_string())?;
        Ok(out)
    }
}

#[async_trait]
impl AssetNormalizer for ImageNormalizer {
    async fn normalize(&self, bytes: &[u8]) -> Normalized {
        let decoded = match image::load_from_memory(bytes) {
            Ok(img) => img,
            Err(e) => {
                debug!(error = %e, "decoder rejected asset, trying ffmpeg");
                let Some(ffmpeg) = self.ffmpeg.as_deref() else {
                    return Normalized::Unavailable;
                };
                let png = match self.transcode(ffmpeg, bytes).await {
                    Ok(png) => png,
                    Err(e) => {
                        debug!(error = %e, "ffmpeg fallback failed");
                        return Normalized::Failed(e);
                    }
                };
                match image::load_from_memory(&png) {
                    Ok(img) => img,
                    Err(e) => return Normalized::Failed(format!("ffmpeg output unreadable: {e}")),
                }
            }
        };

        match self.encode(&decoded) {
            Ok(jpeg) => Normalized::Image(jpeg),
            Err(e) => {
                debug!(error = %e, "image encode failed");
                Normalized::Failed(e)
            }
        }
    }
}

/// Composite over a white background, dropping alpha.
fn flatten_onto_white(rgba: &image::RgbaImage) -> RgbImage {
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let p = rgba.get_pixel(x, y);
        let alpha = u32::from(p[3]);
        let blend = |c: u8| ((u32::from(c) * alpha + 255 * (255 - alpha)) / 255) as u8;
        Rgb([blend(p[0]), blend(p[1]), blend(p[2])])
    })
}

fn find_ffmpeg() -> Option<PathBuf> {
    let name = if cfg!(windows) { "ffmpeg.exe" } else { "ffmpeg" };
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
