//! Export orchestration and job management.
//!
//! An [`Exporter`] runs one job at a time through
//! `Idle → PreparingResources → RenderingFrames → Finalizing → Complete`
//! (or `Failed` from any step), reports progress as plain events and
//! releases everything it acquired exactly once on every exit path.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;
use slidereel_carousel_model::ExportRequest;
use slidereel_common::config::ExportDefaults;
use slidereel_common::error::{SlidereelError, SlidereelResult};

use crate::audio::{AudioGraphFactory, AudioSession, AudioTrackBuilder, FfmpegAudioGraphFactory};
use crate::cancel::CancelFlag;
use crate::compositor::{DurationPolicy, HoldFinalSlide, RenderLoop, RenderTick, Surface};
use crate::delivery::ArtifactSink;
use crate::encoder::{
    negotiate_format, CodecCapabilities, EncoderConfig, EncoderFactory, EncoderSession,
    FfmpegCapabilities, FfmpegEncoderFactory, OutputFormat,
};
use crate::frame_source::{release_all, FrameSource, FrameSourceResolver};
use crate::naming::{output_file_name, today, DEFAULT_VIDEO_HOOK};

const PERCENT_PREPARING: u8 = 5;
const PERCENT_LOADING: u8 = 15;
const PERCENT_RENDER_START: u8 = 22;
const PERCENT_RENDER_END: u8 = 90;
const PERCENT_FINALIZING: u8 = 94;

/// Lifecycle of an export job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportPhase {
    #[default]
    Idle,
    PreparingResources,
    RenderingFrames,
    Finalizing,
    Complete,
    Failed,
}

impl ExportPhase {
    fn ordinal(self) -> u8 {
        match self {
            ExportPhase::Idle => 0,
            ExportPhase::PreparingResources => 1,
            ExportPhase::RenderingFrames => 2,
            ExportPhase::Finalizing => 3,
            ExportPhase::Complete | ExportPhase::Failed => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ExportPhase::Complete | ExportPhase::Failed)
    }
}

/// Progress report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportProgress {
    pub phase: ExportPhase,
    /// Overall progress, 0..=100. Reaches 100 only on completion.
    pub percent: u8,
    /// Human-readable step.
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// User-facing notice on start, success or failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportNotice {
    pub level: NoticeLevel,
    pub title: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExportEvent {
    Progress(ExportProgress),
    Notice(ExportNotice),
}

/// Observer for job events.
pub type EventCallback = Box<dyn Fn(&ExportEvent) + Send + Sync>;

/// Snapshot of the current (or last) job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportJob {
    pub phase: ExportPhase,
    pub percent: u8,
    pub label: String,
    /// Failure message, set only in `Failed`.
    pub error: Option<String>,
    /// Saved artifact, set only in `Complete`.
    pub artifact: Option<PathBuf>,
}

/// Keeps the job snapshot consistent: phases only move forward and progress
/// never decreases.
#[derive(Debug, Default)]
struct JobTracker {
    job: ExportJob,
}

impl JobTracker {
    fn reset(&mut self) {
        self.job = ExportJob::default();
    }

    fn advance(&mut self, phase: ExportPhase, percent: u8, label: &str) -> Option<ExportProgress> {
        if self.job.phase.is_terminal() || phase.ordinal() < self.job.phase.ordinal() {
            return None;
        }

        let percent = match phase {
            ExportPhase::Complete => 100,
            _ => percent.min(99).max(self.job.percent),
        };
        if phase == self.job.phase && percent == self.job.percent && label == self.job.label {
            return None;
        }

        self.job.phase = phase;
        self.job.percent = percent;
        self.job.label = label.to_string();
        Some(self.progress())
    }

    fn complete(&mut self, artifact: PathBuf) -> Option<ExportProgress> {
        let progress = self.advance(ExportPhase::Complete, 100, "Complete");
        self.job.artifact = Some(artifact);
        progress
    }

    fn fail(&mut self, message: String) -> Option<ExportProgress> {
        if self.job.phase.is_terminal() {
            return None;
        }
        self.job.phase = ExportPhase::Failed;
        self.job.label = "Export failed".to_string();
        self.job.error = Some(message);
        Some(self.progress())
    }

    fn progress(&self) -> ExportProgress {
        ExportProgress {
            phase: self.job.phase,
            percent: self.job.percent,
            label: self.job.label.clone(),
        }
    }
}

/// Result of a successful export.
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub path: PathBuf,
    pub file_name: String,
    pub format: OutputFormat,
    pub bytes: usize,
    pub frames: u64,
    /// Content duration of the video.
    pub rendered: Duration,
}

/// Everything a job has acquired. Released once, whatever the outcome.
#[derive(Default)]
struct JobResources {
    frames: Vec<FrameSource>,
    audio: Option<AudioSession>,
    encoder: Option<Box<dyn EncoderSession>>,
    released: bool,
}

impl JobResources {
    async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Some(mut encoder) = self.encoder.take() {
            encoder.abort().await;
        }
        if let Some(mut audio) = self.audio.take() {
            audio.cleanup();
        }
        release_all(&mut self.frames);
        self.frames.clear();
    }
}

/// Clears the busy flag even when the job future is dropped.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs carousel exports.
pub struct Exporter {
    settings: ExportDefaults,
    render: RenderLoop,
    resolver: FrameSourceResolver,
    audio: AudioTrackBuilder,
    capabilities: Option<Arc<dyn CodecCapabilities>>,
    encoders: Arc<dyn EncoderFactory>,
    sink: Arc<dyn ArtifactSink>,
    events: Option<EventCallback>,
    date: Option<NaiveDate>,
    busy: AtomicBool,
    tracker: Mutex<JobTracker>,
}

impl Exporter {
    /// Exporter backed by the network fetcher, the `image` decoder and the
    /// local ffmpeg. Capabilities are probed on first use.
    pub fn new(settings: ExportDefaults, sink: Arc<dyn ArtifactSink>) -> Self {
        let resolver = FrameSourceResolver::with_defaults();
        let audio_factory = FfmpegAudioGraphFactory::new(resolver.fetcher(), settings.audio_volume);
        let render = RenderLoop::new(
            settings.fps,
            Box::new(HoldFinalSlide {
                standard: settings.standard_dwell(),
                final_slide: settings.final_dwell(),
            }),
        )
        .with_progress_interval(settings.progress_interval());

        Self {
            settings,
            render,
            resolver,
            audio: AudioTrackBuilder::new(Arc::new(audio_factory)),
            capabilities: None,
            encoders: Arc::new(FfmpegEncoderFactory),
            sink,
            events: None,
            date: None,
            busy: AtomicBool::new(false),
            tracker: Mutex::new(JobTracker::default()),
        }
    }

    pub fn with_resolver(mut self, resolver: FrameSourceResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_audio_factory(mut self, factory: Arc<dyn AudioGraphFactory>) -> Self {
        self.audio = AudioTrackBuilder::new(factory);
        self
    }

    pub fn with_capabilities(mut self, capabilities: Arc<dyn CodecCapabilities>) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn with_encoder_factory(mut self, factory: Arc<dyn EncoderFactory>) -> Self {
        self.encoders = factory;
        self
    }

    pub fn with_duration_policy(mut self, policy: Box<dyn DurationPolicy>) -> Self {
        self.render = RenderLoop::new(self.settings.fps, policy)
            .with_progress_interval(self.settings.progress_interval());
        self
    }

    pub fn with_events(mut self, callback: EventCallback) -> Self {
        self.events = Some(callback);
        self
    }

    /// Pin the date used in file names.
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn render_loop(&self) -> &RenderLoop {
        &self.render
    }

    /// Snapshot of the current or most recent job.
    pub fn job(&self) -> ExportJob {
        self.tracker().job.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Return a finished job to `Idle`. No effect while a job runs.
    pub fn dismiss(&self) -> bool {
        if self.is_busy() {
            return false;
        }
        let mut tracker = self.tracker();
        if !tracker.job.phase.is_terminal() {
            return false;
        }
        tracker.reset();
        true
    }

    /// Run one export to completion.
    ///
    /// Returns [`SlidereelError::Busy`] without touching the current job
    /// when another export is still running on this exporter.
    pub async fn run(
        &self,
        request: &ExportRequest,
        cancel: &CancelFlag,
    ) -> SlidereelResult<ExportArtifact> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("Export requested while another export is running");
            return Err(SlidereelError::Busy);
        }
        let _busy = BusyGuard(&self.busy);

        self.tracker().reset();
        self.notify(
            NoticeLevel::Info,
            "Exporting video",
            format!("Rendering {} slides", request.slides.len()),
        );

        let mut resources = JobResources::default();
        let outcome = self.drive(request, cancel, &mut resources).await;
        resources.release().await;

        match outcome {
            Ok(artifact) => {
                let progress = self.tracker().complete(artifact.path.clone());
                self.emit_progress(progress);
                let (title, detail) = if artifact.format.is_mp4() {
                    ("MP4 exported", format!("Saved {}", artifact.file_name))
                } else {
                    (
                        "Video exported",
                        format!(
                            "Saved {} as WebM because MP4 recording is not available here",
                            artifact.file_name
                        ),
                    )
                };
                self.notify(NoticeLevel::Success, title, detail);
                tracing::info!(
                    path = %artifact.path.display(),
                    mime = artifact.format.mime,
                    frames = artifact.frames,
                    bytes = artifact.bytes,
                    "Export complete"
                );
                Ok(artifact)
            }
            Err(e) => {
                let progress = self.tracker().fail(e.to_string());
                self.emit_progress(progress);
                self.notify(NoticeLevel::Error, e.category().title(), e.to_string());
                match &e {
                    SlidereelError::Cancelled => tracing::info!("Export cancelled"),
                    other => tracing::error!(error = %other, "Export failed"),
                }
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        request: &ExportRequest,
        cancel: &CancelFlag,
        resources: &mut JobResources,
    ) -> SlidereelResult<ExportArtifact> {
        self.advance(ExportPhase::PreparingResources, PERCENT_PREPARING, "Preparing export");

        let readiness = request.readiness();
        if readiness.total == 0 {
            return Err(SlidereelError::NoSlides);
        }
        if !readiness.is_complete() {
            return Err(SlidereelError::IncompletePipeline {
                pending: readiness.pending(),
                total: readiness.total,
            });
        }

        let format = self.negotiate().await?;
        cancel.check()?;

        self.advance(ExportPhase::PreparingResources, PERCENT_LOADING, "Loading slides");
        let slides: Vec<(u32, &str)> = request
            .ordered_slides()
            .into_iter()
            .filter_map(|slide| slide.ready_image().map(|image| (slide.index, image)))
            .collect();
        resources.frames = self.resolver.resolve_all(&slides, cancel).await?;

        if let Some(url) = request.audio() {
            cancel.check()?;
            resources.audio = Some(self.audio.build(url).await?);
        }
        cancel.check()?;

        let (width, height) = request.aspect.dimensions();
        let config = EncoderConfig {
            format,
            width,
            height,
            fps: self.settings.fps,
            video_bitrate_kbps: self.settings.video_bitrate_kbps,
            audio_bitrate_kbps: self.settings.audio_bitrate_kbps,
            flush_interval: self.settings.flush_interval(),
            audio: resources.audio.as_ref().map(|audio| audio.output().clone()),
        };

        self.advance(ExportPhase::RenderingFrames, PERCENT_RENDER_START, "Rendering video");
        let encoder = resources.encoder.insert(self.encoders.create());
        encoder.start(&config).await?;
        if let Some(audio) = resources.audio.as_mut() {
            audio.start().await?;
        }

        let mut surface = Surface::new(width, height);
        let mut on_tick = |tick: RenderTick| {
            self.advance(
                ExportPhase::RenderingFrames,
                render_percent(tick.fraction()),
                "Rendering video",
            );
        };
        let stats = self
            .render
            .run(
                &resources.frames,
                &mut surface,
                encoder.as_mut(),
                cancel,
                &mut on_tick,
            )
            .await?;

        cancel.check()?;
        self.advance(ExportPhase::Finalizing, PERCENT_FINALIZING, "Finalizing file");
        let output = match resources.encoder.as_mut() {
            Some(encoder) => encoder.stop().await?,
            None => return Err(SlidereelError::encoder("encoder was never started")),
        };
        resources.encoder = None;
        if output.is_empty() {
            return Err(SlidereelError::encoder("recording produced no data"));
        }

        let file_name = output_file_name(
            &request.brand,
            DEFAULT_VIDEO_HOOK,
            self.date.unwrap_or_else(today),
            format.extension(),
        );
        let bytes = output.into_bytes();
        let path = self.sink.deliver(&file_name, &bytes).await?;

        Ok(ExportArtifact {
            path,
            file_name,
            format,
            bytes: bytes.len(),
            frames: stats.frames,
            rendered: self.render.total_duration(stats.slides),
        })
    }

    async fn negotiate(&self) -> SlidereelResult<OutputFormat> {
        match &self.capabilities {
            Some(capabilities) => negotiate_format(capabilities.as_ref()),
            None => {
                let probed = tokio::task::spawn_blocking(FfmpegCapabilities::probe)
                    .await
                    .map_err(|e| SlidereelError::encoder(format!("capability probe failed: {e}")))?;
                negotiate_format(&probed)
            }
        }
    }

    fn tracker(&self) -> std::sync::MutexGuard<'_, JobTracker> {
        self.tracker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn advance(&self, phase: ExportPhase, percent: u8, label: &str) {
        let progress = self.tracker().advance(phase, percent, label);
        self.emit_progress(progress);
    }

    fn emit_progress(&self, progress: Option<ExportProgress>) {
        if let Some(progress) = progress {
            tracing::debug!(phase = ?progress.phase, percent = progress.percent, label = %progress.label, "Export progress");
            self.emit(&ExportEvent::Progress(progress));
        }
    }

    fn notify(&self, level: NoticeLevel, title: &str, detail: String) {
        self.emit(&ExportEvent::Notice(ExportNotice {
            level,
            title: title.to_string(),
            detail,
        }));
    }

    fn emit(&self, event: &ExportEvent) {
        if let Some(callback) = &self.events {
            callback(event);
        }
    }
}

/// Map render completion onto the 22..=90 band.
fn render_percent(fraction: f64) -> u8 {
    let span = f64::from(PERCENT_RENDER_END - PERCENT_RENDER_START);
    let percent = f64::from(PERCENT_RENDER_START) + (fraction.clamp(0.0, 1.0) * span).round();
    (percent as u8).min(PERCENT_RENDER_END)
}
