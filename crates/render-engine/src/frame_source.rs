//! Frame source resolution: slide image locators to drawable rasters.
//!
//! Each slide image is first copied into a short-lived local file so the
//! render loop never re-fetches mid-export. When that copy cannot be made
//! the original locator is handed straight to the decoder instead.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::RgbaImage;
use slidereel_common::error::{SlidereelError, SlidereelResult};
use tempfile::TempPath;

use crate::cancel::CancelFlag;

/// Where the decoder should read a slide from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameLocator {
    /// Local cached copy.
    Local(PathBuf),
    /// The original remote reference (fallback path).
    Remote(String),
}

impl FrameLocator {
    pub fn is_local(&self) -> bool {
        matches!(self, FrameLocator::Local(_))
    }
}

/// Loads the raw bytes behind a locator.
#[async_trait::async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, locator: &str) -> anyhow::Result<Vec<u8>>;
}

/// Turns a locator into a decoded RGBA raster.
#[async_trait::async_trait]
pub trait RasterDecoder: Send + Sync {
    async fn decode(&self, locator: &FrameLocator) -> anyhow::Result<RgbaImage>;
}

/// Fetches `http(s)://` locators over the network and everything else
/// (plain paths, `file://` URLs) from the filesystem.
#[derive(Debug, Clone, Default)]
pub struct DefaultFetcher {
    client: reqwest::Client,
}

impl DefaultFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ResourceFetcher for DefaultFetcher {
    async fn fetch(&self, locator: &str) -> anyhow::Result<Vec<u8>> {
        if is_network_locator(locator) {
            let response = self.client.get(locator).send().await?;
            let status = response.status();
            if !status.is_success() {
                anyhow::bail!("download failed with status {status}");
            }
            Ok(response.bytes().await?.to_vec())
        } else {
            let path = local_path(locator);
            match tokio::fs::read(path).await {
                Ok(bytes) => Ok(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    let path = path.to_path_buf();
                    Err(SlidereelError::FileNotFound { path }.into())
                }
                Err(e) => Err(e.into()),
            }
        }
    }
}

/// Decodes PNG/JPEG/WebP through the `image` crate.
///
/// Remote locators are loaded directly through `loader`, bypassing the
/// local cache.
pub struct ImageDecoder {
    loader: Arc<dyn ResourceFetcher>,
}

impl ImageDecoder {
    pub fn new() -> Self {
        Self::with_loader(Arc::new(DefaultFetcher::new()))
    }

    pub fn with_loader(loader: Arc<dyn ResourceFetcher>) -> Self {
        Self { loader }
    }
}

impl Default for ImageDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RasterDecoder for ImageDecoder {
    async fn decode(&self, locator: &FrameLocator) -> anyhow::Result<RgbaImage> {
        let bytes = match locator {
            FrameLocator::Local(path) => tokio::fs::read(path).await?,
            FrameLocator::Remote(url) => self.loader.fetch(url).await?,
        };
        let decoded = image::load_from_memory(&bytes)?;
        Ok(decoded.to_rgba8())
    }
}

/// Revokes the local copy backing a frame source. Idempotent.
#[derive(Debug)]
pub struct ReleaseHandle {
    path: Option<TempPath>,
}

impl ReleaseHandle {
    fn new(path: TempPath) -> Self {
        Self { path: Some(path) }
    }

    /// Delete the local copy. Returns `true` only on the first call.
    pub fn release(&mut self) -> bool {
        let Some(path) = self.path.take() else {
            return false;
        };
        let shown = path.to_path_buf();
        if let Err(e) = path.close() {
            tracing::warn!(path = %shown.display(), error = %e, "Failed to remove cached slide");
        }
        true
    }

    pub fn is_released(&self) -> bool {
        self.path.is_none()
    }
}

impl Drop for ReleaseHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// A decoded slide ready to be drawn, plus the handle that revokes its
/// local copy.
#[derive(Debug)]
pub struct FrameSource {
    index: u32,
    locator: FrameLocator,
    raster: RgbaImage,
    release: Option<ReleaseHandle>,
}

impl FrameSource {
    pub fn new(index: u32, locator: FrameLocator, raster: RgbaImage) -> Self {
        Self {
            index,
            locator,
            raster,
            release: None,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn locator(&self) -> &FrameLocator {
        &self.locator
    }

    pub fn raster(&self) -> &RgbaImage {
        &self.raster
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.raster.dimensions()
    }

    /// Whether a local copy is still held.
    pub fn holds_local_copy(&self) -> bool {
        self.release.as_ref().is_some_and(|r| !r.is_released())
    }

    /// Revoke the local copy, if any.
    pub fn release(&mut self) {
        if let Some(handle) = self.release.as_mut() {
            handle.release();
        }
    }
}

/// Resolves slide locators into [`FrameSource`]s.
pub struct FrameSourceResolver {
    fetcher: Arc<dyn ResourceFetcher>,
    decoder: Arc<dyn RasterDecoder>,
    cache_dir: Option<PathBuf>,
}

impl FrameSourceResolver {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>, decoder: Arc<dyn RasterDecoder>) -> Self {
        Self {
            fetcher,
            decoder,
            cache_dir: None,
        }
    }

    /// Network fetcher plus `image` decoder.
    pub fn with_defaults() -> Self {
        Self::new(
            Arc::new(DefaultFetcher::new()),
            Arc::new(ImageDecoder::new()),
        )
    }

    /// Keep local copies in `dir` instead of the system temp directory.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn fetcher(&self) -> Arc<dyn ResourceFetcher> {
        self.fetcher.clone()
    }

    /// Resolve one slide. Decoding failure is fatal; fetch failure only
    /// downgrades to the direct path.
    pub async fn resolve(&self, index: u32, locator: &str) -> SlidereelResult<FrameSource> {
        let cached = match self.fetcher.fetch(locator).await {
            Ok(bytes) => match self.cache_locally(&bytes) {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::warn!(index, error = %e, "Failed to cache slide locally");
                    None
                }
            },
            Err(e) => {
                // The direct path loses the isolation the local copy gives.
                tracing::warn!(
                    index,
                    locator,
                    error = %e,
                    "Slide prefetch failed; decoding from the original reference"
                );
                None
            }
        };

        let (frame_locator, release) = match cached {
            Some(path) => (
                FrameLocator::Local(path.to_path_buf()),
                Some(ReleaseHandle::new(path)),
            ),
            None => (FrameLocator::Remote(locator.to_string()), None),
        };

        let raster = match self.decoder.decode(&frame_locator).await {
            Ok(raster) => raster,
            Err(e) => {
                // `release` drops here and removes the local copy.
                return Err(SlidereelError::frame_source(
                    index,
                    format!("could not load image {locator}: {e}"),
                ));
            }
        };

        if raster.width() == 0 || raster.height() == 0 {
            return Err(SlidereelError::frame_source(
                index,
                format!("image {locator} has no pixels"),
            ));
        }

        tracing::debug!(
            index,
            width = raster.width(),
            height = raster.height(),
            local = frame_locator.is_local(),
            "Slide resolved"
        );

        Ok(FrameSource {
            index,
            locator: frame_locator,
            raster,
            release,
        })
    }

    /// Resolve every slide in order. On the first failure all sources
    /// resolved so far are released before the error is returned.
    pub async fn resolve_all(
        &self,
        slides: &[(u32, &str)],
        cancel: &CancelFlag,
    ) -> SlidereelResult<Vec<FrameSource>> {
        let mut sources = Vec::with_capacity(slides.len());
        for (index, locator) in slides {
            let resolved = match cancel.check() {
                Ok(()) => self.resolve(*index, locator).await,
                Err(e) => Err(e),
            };
            match resolved {
                Ok(source) => sources.push(source),
                Err(e) => {
                    release_all(&mut sources);
                    return Err(e);
                }
            }
        }
        Ok(sources)
    }

    fn cache_locally(&self, bytes: &[u8]) -> std::io::Result<TempPath> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("slidereel-slide-");
        let mut file = match &self.cache_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempfile_in(dir)?
            }
            None => builder.tempfile()?,
        };
        file.write_all(bytes)?;
        file.flush()?;
        Ok(file.into_temp_path())
    }
}

/// Release every source's local copy.
pub fn release_all(sources: &mut [FrameSource]) {
    let held = sources.iter().filter(|s| s.holds_local_copy()).count();
    for source in sources.iter_mut() {
        source.release();
    }
    if held > 0 {
        tracing::debug!(released = held, "Released cached slides");
    }
}

fn is_network_locator(locator: &str) -> bool {
    let lower = locator.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn local_path(locator: &str) -> &Path {
    Path::new(locator.strip_prefix("file://").unwrap_or(locator))
}
