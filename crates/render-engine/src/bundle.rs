//! ZIP bundle of a carousel: every slide image plus the post caption.

use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use slidereel_carousel_model::{BrandContext, Slide};
use slidereel_common::error::{SlidereelError, SlidereelResult};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::delivery::ArtifactSink;
use crate::frame_source::ResourceFetcher;
use crate::naming::{output_file_name, today, DEFAULT_BUNDLE_HOOK};

/// What goes into one bundle.
#[derive(Debug, Clone, Default)]
pub struct BundleRequest {
    pub slides: Vec<Slide>,
    pub caption: Option<String>,
    pub brand: BrandContext,
}

#[derive(Debug, Clone)]
pub struct BundleArtifact {
    pub path: PathBuf,
    pub file_name: String,
    /// Slide entries written.
    pub slides: usize,
    /// Slides that could not be fetched and were left out.
    pub skipped: Vec<u32>,
    pub has_caption: bool,
}

/// Builds and delivers slide bundles.
pub struct BundleExporter {
    fetcher: Arc<dyn ResourceFetcher>,
    sink: Arc<dyn ArtifactSink>,
    date: Option<NaiveDate>,
}

impl BundleExporter {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>, sink: Arc<dyn ArtifactSink>) -> Self {
        Self {
            fetcher,
            sink,
            date: None,
        }
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub async fn export(&self, request: &BundleRequest) -> SlidereelResult<BundleArtifact> {
        let mut entries = Vec::new();
        let mut skipped = Vec::new();

        let mut slides: Vec<&Slide> = request.slides.iter().collect();
        slides.sort_by_key(|slide| slide.index);

        for (position, slide) in slides.iter().enumerate() {
            let Some(image) = slide.image.as_deref().filter(|s| !s.trim().is_empty()) else {
                continue;
            };
            match self.fetcher.fetch(image).await {
                Ok(bytes) => entries.push((format!("slide-{}.png", position + 1), bytes)),
                Err(e) => {
                    tracing::warn!(slide = slide.index, error = %e, "Failed to fetch slide for bundle");
                    skipped.push(slide.index);
                }
            }
        }

        let caption = request
            .caption
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .map(caption_text);
        if let Some(text) = caption.as_ref() {
            let timestamp = chrono::Utc::now().timestamp_millis();
            entries.push((format!("caption-{timestamp}.txt"), text.clone().into_bytes()));
        }

        let archive = build_archive(&entries)?;
        let file_name = output_file_name(
            &request.brand,
            DEFAULT_BUNDLE_HOOK,
            self.date.unwrap_or_else(today),
            "zip",
        );
        let path = self.sink.deliver(&file_name, &archive).await?;

        let slide_count = entries.len() - usize::from(caption.is_some());
        tracing::info!(
            path = %path.display(),
            slides = slide_count,
            skipped = skipped.len(),
            "Bundle exported"
        );
        Ok(BundleArtifact {
            path,
            file_name,
            slides: slide_count,
            skipped,
            has_caption: caption.is_some(),
        })
    }
}

fn caption_text(caption: &str) -> String {
    format!("CAPTION:\n{caption}").trim_end().to_string()
}

fn build_archive(entries: &[(String, Vec<u8>)]) -> SlidereelResult<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, bytes) in entries {
        writer
            .start_file(name.as_str(), options)
            .map_err(|e| SlidereelError::delivery(format!("failed to add {name}: {e}")))?;
        writer.write_all(bytes)?;
    }
    let cursor = writer
        .finish()
        .map_err(|e| SlidereelError::delivery(format!("failed to finish archive: {e}")))?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Read;
    use std::sync::Mutex;

    struct MapFetcher(HashMap<String, Vec<u8>>);

    #[async_trait::async_trait]
    impl ResourceFetcher for MapFetcher {
        async fn fetch(&self, locator: &str) -> anyhow::Result<Vec<u8>> {
            self.0
                .get(locator)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("404"))
        }
    }

    #[derive(Default)]
    struct MemorySink(Mutex<Vec<(String, Vec<u8>)>>);

    #[async_trait::async_trait]
    impl ArtifactSink for MemorySink {
        async fn deliver(&self, file_name: &str, bytes: &[u8]) -> SlidereelResult<PathBuf> {
            self.0
                .lock()
                .unwrap()
                .push((file_name.to_string(), bytes.to_vec()));
            Ok(PathBuf::from("/out").join(file_name))
        }
    }

    #[test]
    fn test_caption_text_trims_trailing_whitespace() {
        assert_eq!(caption_text("Hello\n\n"), "CAPTION:\nHello");
    }

    #[tokio::test]
    async fn test_bundle_contains_slides_and_caption() {
        let fetcher = MapFetcher(HashMap::from([
            ("a".to_string(), b"AAA".to_vec()),
            ("c".to_string(), b"CCC".to_vec()),
        ]));
        let sink = Arc::new(MemorySink::default());
        let exporter = BundleExporter::new(Arc::new(fetcher), sink.clone())
            .with_date(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());

        let request = BundleRequest {
            slides: vec![Slide::done(2, "c"), Slide::done(0, "a"), Slide::done(1, "missing")],
            caption: Some("Three tips  \n".into()),
            brand: BrandContext::new(Some("Acme".into()), None),
        };
        let artifact = exporter.export(&request).await.unwrap();

        assert_eq!(artifact.file_name, "acme-slides-2024-05-01.zip");
        assert_eq!(artifact.slides, 2);
        assert_eq!(artifact.skipped, vec![1]);
        assert!(artifact.has_caption);

        let delivered = sink.0.lock().unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(delivered[0].1.clone())).unwrap();
        let (mut captions, mut slides): (Vec<String>, Vec<String>) = archive
            .file_names()
            .map(str::to_string)
            .partition(|name| name.starts_with("caption-"));
        slides.sort();
        assert_eq!(slides, ["slide-1.png", "slide-3.png"]);
        assert_eq!(captions.len(), 1);
        let caption_name = captions.remove(0);
        assert!(caption_name.ends_with(".txt"));

        let mut caption = String::new();
        archive
            .by_name(&caption_name)
            .unwrap()
            .read_to_string(&mut caption)
            .unwrap();
        assert_eq!(caption, "CAPTION:\nThree tips");

        let mut first = Vec::new();
        archive.by_name("slide-1.png").unwrap().read_to_end(&mut first).unwrap();
        assert_eq!(first, b"AAA");
    }

    #[tokio::test]
    async fn test_bundle_without_caption() {
        let fetcher = MapFetcher(HashMap::from([("a".to_string(), b"A".to_vec())]));
        let sink = Arc::new(MemorySink::default());
        let exporter = BundleExporter::new(Arc::new(fetcher), sink.clone());

        let artifact = exporter
            .export(&BundleRequest {
                slides: vec![Slide::done(0, "a"), Slide::pending(1)],
                caption: Some("   ".into()),
                brand: BrandContext::default(),
            })
            .await
            .unwrap();
        assert_eq!(artifact.slides, 1);
        assert!(!artifact.has_caption);
        assert!(artifact.file_name.starts_with("carousel-slides-"));
    }
}
