//! Background music for an export.
//!
//! An [`AudioGraph`] binds a looping track to an output the encoder can
//! capture. [`AudioSession`] owns the graph for the lifetime of one job and
//! guarantees it is torn down exactly once.

use std::path::PathBuf;
use std::sync::Arc;

use slidereel_common::error::{SlidereelError, SlidereelResult};

use crate::ffmpeg;
use crate::frame_source::{DefaultFetcher, ResourceFetcher};

/// Gain applied to the music track unless configured otherwise.
pub const DEFAULT_VOLUME: f64 = 0.9;

/// Capturable audio endpoint handed to the encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioOutput {
    /// Local media file holding the track.
    pub path: PathBuf,
    /// Linear gain in [0.0, 1.0].
    pub volume: f64,
    /// Whether the track repeats until capture stops.
    pub looped: bool,
}

/// A playback graph for one track.
#[async_trait::async_trait]
pub trait AudioGraph: Send {
    /// Bind `url` to a looping playable element and route it to an output.
    async fn connect(&mut self, url: &str) -> anyhow::Result<AudioOutput>;

    /// Whether the graph must be resumed before it can play.
    fn is_suspended(&self) -> bool;

    async fn resume(&mut self) -> anyhow::Result<()>;

    async fn play(&mut self) -> anyhow::Result<()>;

    /// Stop playback, drop the source and close the graph.
    fn teardown(&mut self);
}

/// Creates a fresh graph per job.
pub trait AudioGraphFactory: Send + Sync {
    fn create(&self) -> SlidereelResult<Box<dyn AudioGraph>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Ready,
    Playing,
    Closed,
}

/// A connected audio graph plus its output.
pub struct AudioSession {
    graph: Box<dyn AudioGraph>,
    output: AudioOutput,
    state: SessionState,
}

impl std::fmt::Debug for AudioSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSession")
            .field("output", &self.output)
            .field("state", &self.state)
            .finish()
    }
}

impl AudioSession {
    pub fn output(&self) -> &AudioOutput {
        &self.output
    }

    pub fn is_playing(&self) -> bool {
        self.state == SessionState::Playing
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Resume the graph if needed and begin looping playback.
    ///
    /// Audio is never restarted within a job, so a second call fails.
    pub async fn start(&mut self) -> SlidereelResult<()> {
        match self.state {
            SessionState::Ready => {}
            SessionState::Playing => {
                return Err(SlidereelError::audio("audio playback already started"))
            }
            SessionState::Closed => {
                return Err(SlidereelError::audio("audio session already closed"))
            }
        }

        if self.graph.is_suspended() {
            self.graph
                .resume()
                .await
                .map_err(|e| SlidereelError::audio(format!("could not resume audio: {e}")))?;
        }
        self.graph
            .play()
            .await
            .map_err(|e| SlidereelError::audio(format!("could not start playback: {e}")))?;
        self.state = SessionState::Playing;
        tracing::info!(path = %self.output.path.display(), "Audio playback started");
        Ok(())
    }

    /// Tear the graph down. Returns `true` only on the call that acted.
    pub fn cleanup(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        self.graph.teardown();
        self.state = SessionState::Closed;
        tracing::debug!("Audio session closed");
        true
    }
}

impl Drop for AudioSession {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Builds an [`AudioSession`] for a track URL.
pub struct AudioTrackBuilder {
    factory: Arc<dyn AudioGraphFactory>,
}

impl AudioTrackBuilder {
    pub fn new(factory: Arc<dyn AudioGraphFactory>) -> Self {
        Self { factory }
    }

    pub async fn build(&self, url: &str) -> SlidereelResult<AudioSession> {
        let mut graph = self.factory.create()?;
        match graph.connect(url).await {
            Ok(output) => {
                tracing::info!(
                    url,
                    volume = output.volume,
                    looped = output.looped,
                    "Audio track connected"
                );
                Ok(AudioSession {
                    graph,
                    output,
                    state: SessionState::Ready,
                })
            }
            Err(e) => {
                graph.teardown();
                tracing::warn!(url, error = %e, "Audio track setup failed");
                Err(SlidereelError::audio(format!("could not load {url}: {e}")))
            }
        }
    }
}

/// Downloads the track into a private temp directory and exposes it as a
/// looped ffmpeg input.
pub struct FfmpegAudioGraph {
    fetcher: Arc<dyn ResourceFetcher>,
    volume: f64,
    workdir: Option<tempfile::TempDir>,
    suspended: bool,
    playing: bool,
}

impl FfmpegAudioGraph {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>, volume: f64) -> Self {
        Self {
            fetcher,
            volume: volume.clamp(0.0, 1.0),
            workdir: None,
            suspended: true,
            playing: false,
        }
    }

    fn track_name(url: &str) -> String {
        let tail = url
            .split(['?', '#'])
            .next()
            .unwrap_or(url)
            .rsplit('/')
            .next()
            .unwrap_or_default();
        match tail.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
                format!("track.{}", ext.to_ascii_lowercase())
            }
            _ => "track".to_string(),
        }
    }
}

#[async_trait::async_trait]
impl AudioGraph for FfmpegAudioGraph {
    async fn connect(&mut self, url: &str) -> anyhow::Result<AudioOutput> {
        let bytes = self.fetcher.fetch(url).await?;
        if bytes.is_empty() {
            anyhow::bail!("audio track is empty");
        }

        let workdir = tempfile::Builder::new()
            .prefix("slidereel-audio-")
            .tempdir()?;
        let path = workdir.path().join(Self::track_name(url));
        tokio::fs::write(&path, &bytes).await?;
        self.workdir = Some(workdir);

        if ffmpeg::probe_has_audio_stream(&path).await == Some(false) {
            anyhow::bail!("no audio stream found");
        }

        Ok(AudioOutput {
            path,
            volume: self.volume,
            looped: true,
        })
    }

    fn is_suspended(&self) -> bool {
        self.suspended
    }

    async fn resume(&mut self) -> anyhow::Result<()> {
        self.suspended = false;
        Ok(())
    }

    async fn play(&mut self) -> anyhow::Result<()> {
        if self.workdir.is_none() {
            anyhow::bail!("no track connected");
        }
        if self.suspended {
            anyhow::bail!("audio graph is suspended");
        }
        if self.playing {
            anyhow::bail!("audio track is already playing");
        }
        self.playing = true;
        Ok(())
    }

    fn teardown(&mut self) {
        self.playing = false;
        self.suspended = true;
        if let Some(dir) = self.workdir.take() {
            let shown = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                tracing::warn!(path = %shown.display(), error = %e, "Failed to remove audio workdir");
            }
        }
    }
}

/// Factory for [`FfmpegAudioGraph`].
pub struct FfmpegAudioGraphFactory {
    fetcher: Arc<dyn ResourceFetcher>,
    volume: f64,
}

impl FfmpegAudioGraphFactory {
    pub fn new(fetcher: Arc<dyn ResourceFetcher>, volume: f64) -> Self {
        Self { fetcher, volume }
    }
}

impl Default for FfmpegAudioGraphFactory {
    fn default() -> Self {
        Self::new(Arc::new(DefaultFetcher::new()), DEFAULT_VOLUME)
    }
}

impl AudioGraphFactory for FfmpegAudioGraphFactory {
    fn create(&self) -> SlidereelResult<Box<dyn AudioGraph>> {
        Ok(Box::new(FfmpegAudioGraph::new(
            self.fetcher.clone(),
            self.volume,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        teardowns: AtomicUsize,
        resumes: AtomicUsize,
        plays: AtomicUsize,
    }

    struct FakeGraph {
        counters: Arc<Counters>,
        fail_connect: bool,
        suspended: bool,
    }

    #[async_trait::async_trait]
    impl AudioGraph for FakeGraph {
        async fn connect(&mut self, _url: &str) -> anyhow::Result<AudioOutput> {
            if self.fail_connect {
                anyhow::bail!("decode error");
            }
            Ok(AudioOutput {
                path: PathBuf::from("/tmp/track.mp3"),
                volume: DEFAULT_VOLUME,
                looped: true,
            })
        }

        fn is_suspended(&self) -> bool {
            self.suspended
        }

        async fn resume(&mut self) -> anyhow::Result<()> {
            self.counters.resumes.fetch_add(1, Ordering::SeqCst);
            self.suspended = false;
            Ok(())
        }

        async fn play(&mut self) -> anyhow::Result<()> {
            self.counters.plays.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn teardown(&mut self) {
            self.counters.teardowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeFactory {
        counters: Arc<Counters>,
        fail_connect: bool,
    }

    impl AudioGraphFactory for FakeFactory {
        fn create(&self) -> SlidereelResult<Box<dyn AudioGraph>> {
            Ok(Box::new(FakeGraph {
                counters: self.counters.clone(),
                fail_connect: self.fail_connect,
                suspended: true,
            }))
        }
    }

    fn builder(fail_connect: bool) -> (AudioTrackBuilder, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let factory = FakeFactory {
            counters: counters.clone(),
            fail_connect,
        };
        (AudioTrackBuilder::new(Arc::new(factory)), counters)
    }

    #[tokio::test]
    async fn test_failed_connect_tears_down_once() {
        let (builder, counters) = builder(true);
        let err = builder.build("https://cdn/song.mp3").await.unwrap_err();
        assert!(matches!(err, SlidereelError::Audio { .. }));
        assert_eq!(counters.teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_resumes_then_plays_once() {
        let (builder, counters) = builder(false);
        let mut session = builder.build("https://cdn/song.mp3").await.unwrap();
        assert!(session.output().looped);

        session.start().await.unwrap();
        assert!(session.is_playing());
        assert_eq!(counters.resumes.load(Ordering::SeqCst), 1);
        assert_eq!(counters.plays.load(Ordering::SeqCst), 1);

        assert!(session.start().await.is_err());
        assert_eq!(counters.plays.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent_and_runs_on_drop() {
        let (builder, counters) = builder(false);
        let mut session = builder.build("https://cdn/song.mp3").await.unwrap();
        assert!(session.cleanup());
        assert!(!session.cleanup());
        drop(session);
        assert_eq!(counters.teardowns.load(Ordering::SeqCst), 1);

        let session = builder.build("https://cdn/song.mp3").await.unwrap();
        drop(session);
        assert_eq!(counters.teardowns.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_track_name_keeps_extension() {
        assert_eq!(
            FfmpegAudioGraph::track_name("https://cdn.example.com/a/song.MP3?sig=1"),
            "track.mp3"
        );
        assert_eq!(FfmpegAudioGraph::track_name("https://cdn/stream"), "track");
    }

    #[tokio::test]
    async fn test_ffmpeg_graph_teardown_removes_workdir() {
        struct Bytes;
        #[async_trait::async_trait]
        impl ResourceFetcher for Bytes {
            async fn fetch(&self, _locator: &str) -> anyhow::Result<Vec<u8>> {
                Ok(vec![0u8; 16])
            }
        }

        let mut graph = FfmpegAudioGraph::new(Arc::new(Bytes), 0.9);
        // Without ffprobe the stream check is skipped; with it, noise bytes
        // are rejected. Either way teardown must leave nothing behind.
        let outcome = graph.connect("https://cdn/song.mp3").await;
        let dir = graph.workdir.as_ref().map(|d| d.path().to_path_buf());
        graph.teardown();
        graph.teardown();
        if let Ok(output) = outcome {
            assert!(!output.path.exists());
        }
        if let Some(dir) = dir {
            assert!(!dir.exists());
        }
    }

    #[tokio::test]
    async fn test_ffmpeg_graph_plays_only_after_resume() {
        let mut graph = FfmpegAudioGraph::new(Arc::new(DefaultFetcher::new()), 0.9);
        assert!(graph.play().await.is_err());

        graph.workdir = Some(tempfile::tempdir().unwrap());
        assert!(graph.is_suspended());
        assert!(graph.play().await.is_err());

        graph.resume().await.unwrap();
        graph.play().await.unwrap();
        assert!(graph.play().await.is_err());

        graph.teardown();
        assert!(graph.is_suspended());
    }
}
