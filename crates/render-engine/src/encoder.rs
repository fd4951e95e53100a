//! Output format negotiation and the encoder session that turns rendered
//! frames into a fragmented media stream.

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use slidereel_common::error::{SlidereelError, SlidereelResult};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin};
use tokio::task::JoinHandle;

use crate::audio::AudioOutput;
use crate::compositor::Surface;
use crate::ffmpeg;

/// Output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Container {
    Mp4,
    Webm,
}

impl Container {
    pub fn extension(self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Webm => "webm",
        }
    }

    fn muxer(self) -> &'static str {
        self.extension()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    H264Baseline,
    Mpeg4Part2,
    Vp9,
    Vp8,
}

impl VideoCodec {
    /// ffmpeg encoder name.
    pub fn encoder(self) -> &'static str {
        match self {
            VideoCodec::H264Baseline => "libx264",
            VideoCodec::Mpeg4Part2 => "mpeg4",
            VideoCodec::Vp9 => "libvpx-vp9",
            VideoCodec::Vp8 => "libvpx",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioCodec {
    Aac,
    Opus,
    Vorbis,
}

impl AudioCodec {
    /// ffmpeg encoder name.
    pub fn encoder(self) -> &'static str {
        match self {
            AudioCodec::Aac => "aac",
            AudioCodec::Opus => "libopus",
            AudioCodec::Vorbis => "libvorbis",
        }
    }
}

/// A container/codec combination identified by its MIME type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputFormat {
    pub mime: &'static str,
    pub container: Container,
    pub video: VideoCodec,
    pub audio: AudioCodec,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        self.container.extension()
    }

    pub fn is_mp4(&self) -> bool {
        self.container == Container::Mp4
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime)
    }
}

/// Candidate formats, most compatible first.
pub const FORMAT_PREFERENCES: [OutputFormat; 5] = [
    OutputFormat {
        mime: "video/mp4;codecs=avc1.42E01E,mp4a.40.2",
        container: Container::Mp4,
        video: VideoCodec::H264Baseline,
        audio: AudioCodec::Aac,
    },
    OutputFormat {
        mime: "video/mp4",
        container: Container::Mp4,
        video: VideoCodec::Mpeg4Part2,
        audio: AudioCodec::Aac,
    },
    OutputFormat {
        mime: "video/webm;codecs=vp9,opus",
        container: Container::Webm,
        video: VideoCodec::Vp9,
        audio: AudioCodec::Opus,
    },
    OutputFormat {
        mime: "video/webm;codecs=vp8,opus",
        container: Container::Webm,
        video: VideoCodec::Vp8,
        audio: AudioCodec::Opus,
    },
    OutputFormat {
        mime: "video/webm",
        container: Container::Webm,
        video: VideoCodec::Vp8,
        audio: AudioCodec::Vorbis,
    },
];

/// Answers whether the environment can record a format.
pub trait CodecCapabilities: Send + Sync {
    fn is_supported(&self, format: &OutputFormat) -> bool;
}

/// First supported entry of [`FORMAT_PREFERENCES`].
pub fn negotiate_format(capabilities: &dyn CodecCapabilities) -> SlidereelResult<OutputFormat> {
    match FORMAT_PREFERENCES
        .iter()
        .find(|format| capabilities.is_supported(format))
    {
        Some(format) => {
            tracing::info!(mime = format.mime, "Negotiated export format");
            Ok(*format)
        }
        None => Err(SlidereelError::unsupported_format(
            "none of the MP4 or WebM encoders are available",
        )),
    }
}

/// Capabilities of the local ffmpeg build, read once from `ffmpeg -encoders`.
#[derive(Debug, Clone, Default)]
pub struct FfmpegCapabilities {
    encoders: std::collections::HashSet<String>,
}

impl FfmpegCapabilities {
    /// Probe the installed ffmpeg. An unusable ffmpeg supports nothing.
    pub fn probe() -> Self {
        match ffmpeg::list_encoders() {
            Some(encoders) => {
                tracing::debug!(count = encoders.len(), "Probed ffmpeg encoders");
                Self { encoders }
            }
            None => {
                tracing::warn!("ffmpeg not available; no export format is supported");
                Self::default()
            }
        }
    }

    pub fn from_encoders<I, S>(encoders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            encoders: encoders.into_iter().map(Into::into).collect(),
        }
    }
}

impl CodecCapabilities for FfmpegCapabilities {
    fn is_supported(&self, format: &OutputFormat) -> bool {
        self.encoders.contains(format.video.encoder())
            && self.encoders.contains(format.audio.encoder())
    }
}

/// Everything an encoder session needs to start.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
    /// Fragment flush cadence.
    pub flush_interval: Duration,
    /// Music track to mux in, if any.
    pub audio: Option<AudioOutput>,
}

impl EncoderConfig {
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// Encoded media, in the order the encoder flushed it.
#[derive(Debug, Clone)]
pub struct EncodedOutput {
    pub format: OutputFormat,
    pub chunks: Vec<Vec<u8>>,
    pub frames: u64,
}

impl EncodedOutput {
    pub fn len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.chunks.concat()
    }
}

/// A live recording of rendered frames.
#[async_trait::async_trait]
pub trait EncoderSession: Send {
    async fn start(&mut self, config: &EncoderConfig) -> SlidereelResult<()>;

    async fn push_frame(&mut self, surface: &Surface) -> SlidereelResult<()>;

    /// End the stream and wait until every chunk has been flushed.
    async fn stop(&mut self) -> SlidereelResult<EncodedOutput>;

    /// Discard the recording. Safe to call at any point, repeatedly.
    async fn abort(&mut self);
}

pub trait EncoderFactory: Send + Sync {
    fn create(&self) -> Box<dyn EncoderSession>;
}

/// Spawns one [`FfmpegEncoder`] per job.
#[derive(Debug, Clone, Default)]
pub struct FfmpegEncoderFactory;

impl EncoderFactory for FfmpegEncoderFactory {
    fn create(&self) -> Box<dyn EncoderSession> {
        Box::new(FfmpegEncoder::new())
    }
}

struct RunningEncoder {
    child: Child,
    stdin: Option<ChildStdin>,
    reader: JoinHandle<std::io::Result<Vec<Vec<u8>>>>,
    stderr: JoinHandle<String>,
    config: EncoderConfig,
}

/// ffmpeg subprocess fed raw RGBA frames on stdin, emitting a fragmented
/// stream on stdout.
#[derive(Default)]
pub struct FfmpegEncoder {
    running: Option<RunningEncoder>,
    frames: u64,
}

impl FfmpegEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

#[async_trait::async_trait]
impl EncoderSession for FfmpegEncoder {
    async fn start(&mut self, config: &EncoderConfig) -> SlidereelResult<()> {
        if self.running.is_some() {
            return Err(SlidereelError::encoder("encoder already started"));
        }

        let args = build_args(config);
        tracing::info!(mime = config.format.mime, ?args, "Starting ffmpeg encoder");

        let mut child = tokio::process::Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SlidereelError::encoder(format!("failed to start ffmpeg: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SlidereelError::encoder("failed to capture ffmpeg stdin"))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| SlidereelError::encoder("failed to capture ffmpeg stdout"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| SlidereelError::encoder("failed to capture ffmpeg stderr"))?;

        let reader = tokio::spawn(async move {
            let mut chunks = Vec::new();
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let n = stdout.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                chunks.push(buf[..n].to_vec());
            }
            Ok(chunks)
        });

        let stderr = tokio::spawn(async move {
            let mut raw = Vec::new();
            let _ = stderr.read_to_end(&mut raw).await;
            String::from_utf8_lossy(&raw).into_owned()
        });

        self.frames = 0;
        self.running = Some(RunningEncoder {
            child,
            stdin: Some(stdin),
            reader,
            stderr,
            config: config.clone(),
        });
        Ok(())
    }

    async fn push_frame(&mut self, surface: &Surface) -> SlidereelResult<()> {
        let running = self
            .running
            .as_mut()
            .ok_or_else(|| SlidereelError::encoder("encoder not started"))?;

        if surface.width() != running.config.width || surface.height() != running.config.height {
            return Err(SlidereelError::encoder(format!(
                "frame is {}x{}, encoder expects {}x{}",
                surface.width(),
                surface.height(),
                running.config.width,
                running.config.height
            )));
        }

        let stdin = running
            .stdin
            .as_mut()
            .ok_or_else(|| SlidereelError::encoder("frame stream already closed"))?;
        stdin
            .write_all(surface.as_bytes())
            .await
            .map_err(|e| SlidereelError::encoder(format!("failed to write frame: {e}")))?;
        self.frames += 1;
        Ok(())
    }

    async fn stop(&mut self) -> SlidereelResult<EncodedOutput> {
        let mut running = self
            .running
            .take()
            .ok_or_else(|| SlidereelError::encoder("encoder not started"))?;

        // EOF on stdin tells ffmpeg to flush its last fragment.
        if let Some(mut stdin) = running.stdin.take() {
            if let Err(e) = stdin.shutdown().await {
                tracing::debug!(error = %e, "ffmpeg stdin already closed");
            }
        }

        let chunks = match running.reader.await {
            Ok(Ok(chunks)) => chunks,
            Ok(Err(e)) => {
                return Err(SlidereelError::encoder(format!(
                    "failed to read encoded output: {e}"
                )))
            }
            Err(e) => {
                return Err(SlidereelError::encoder(format!(
                    "output reader panicked: {e}"
                )))
            }
        };

        let status = running
            .child
            .wait()
            .await
            .map_err(|e| SlidereelError::encoder(format!("failed to wait for ffmpeg: {e}")))?;
        let stderr = running.stderr.await.unwrap_or_default();

        if !status.success() {
            return Err(SlidereelError::encoder(format!(
                "ffmpeg exited with {status}: {}",
                stderr_tail(&stderr)
            )));
        }

        let output = EncodedOutput {
            format: running.config.format,
            chunks,
            frames: self.frames,
        };
        tracing::info!(
            frames = output.frames,
            chunks = output.chunks.len(),
            bytes = output.len(),
            "ffmpeg encoder finished"
        );
        Ok(output)
    }

    async fn abort(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        running.stdin.take();
        if let Err(e) = running.child.kill().await {
            tracing::debug!(error = %e, "ffmpeg already exited");
        }
        running.reader.abort();
        running.stderr.abort();
        tracing::debug!(frames = self.frames, "ffmpeg encoder aborted");
    }
}

/// Command line for one encoder run.
pub fn build_args(config: &EncoderConfig) -> Vec<String> {
    let fps = config.fps.max(1).to_string();
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgba".into(),
        "-s".into(),
        format!("{}x{}", config.width, config.height),
        "-framerate".into(),
        fps.clone(),
        "-i".into(),
        "pipe:0".into(),
    ];

    if let Some(audio) = &config.audio {
        if audio.looped {
            args.extend(["-stream_loop".into(), "-1".into()]);
        }
        args.extend(["-i".into(), audio.path.to_string_lossy().into_owned()]);
        args.extend([
            "-map".into(),
            "0:v:0".into(),
            "-map".into(),
            "1:a:0".into(),
        ]);
    }

    args.extend(["-c:v".into(), config.format.video.encoder().into()]);
    match config.format.video {
        VideoCodec::H264Baseline => args.extend([
            "-profile:v".into(),
            "baseline".into(),
            "-preset".into(),
            "veryfast".into(),
        ]),
        VideoCodec::Vp9 | VideoCodec::Vp8 => {
            args.extend(["-deadline".into(), "realtime".into()])
        }
        VideoCodec::Mpeg4Part2 => {}
    }
    args.extend([
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-b:v".into(),
        format!("{}k", config.video_bitrate_kbps),
        "-r".into(),
        fps.clone(),
        "-g".into(),
        fps,
    ]);

    if let Some(audio) = &config.audio {
        args.extend([
            "-c:a".into(),
            config.format.audio.encoder().into(),
            "-b:a".into(),
            format!("{}k", config.audio_bitrate_kbps),
            "-af".into(),
            format!("volume={}", audio.volume),
            "-shortest".into(),
        ]);
    } else {
        args.push("-an".into());
    }

    let flush = config.flush_interval;
    match config.format.container {
        Container::Mp4 => args.extend([
            "-movflags".into(),
            "frag_keyframe+empty_moov+default_base_moof".into(),
            "-frag_duration".into(),
            flush.as_micros().to_string(),
        ]),
        Container::Webm => args.extend([
            "-cluster_time_limit".into(),
            flush.as_millis().to_string(),
        ]),
    }

    args.extend([
        "-flush_packets".into(),
        "1".into(),
        "-f".into(),
        config.format.container.muxer().into(),
        "pipe:1".into(),
    ]);
    args
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(5);
    let tail = lines[start..].join(" | ");
    if tail.is_empty() {
        "no diagnostics".to_string()
    } else {
        tail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct OnlyMimes(Vec<&'static str>);

    impl CodecCapabilities for OnlyMimes {
        fn is_supported(&self, format: &OutputFormat) -> bool {
            self.0.contains(&format.mime)
        }
    }

    fn config(format: OutputFormat, audio: Option<AudioOutput>) -> EncoderConfig {
        EncoderConfig {
            format,
            width: 1080,
            height: 1350,
            fps: 30,
            video_bitrate_kbps: 8000,
            audio_bitrate_kbps: 192,
            flush_interval: Duration::from_millis(250),
            audio,
        }
    }

    #[test]
    fn test_negotiation_prefers_mp4() {
        let all = OnlyMimes(FORMAT_PREFERENCES.iter().map(|f| f.mime).collect());
        let format = negotiate_format(&all).unwrap();
        assert_eq!(format.mime, "video/mp4;codecs=avc1.42E01E,mp4a.40.2");
        assert!(format.is_mp4());
    }

    #[test]
    fn test_negotiation_falls_back_in_order() {
        let webm = OnlyMimes(vec!["video/webm", "video/webm;codecs=vp8,opus"]);
        assert_eq!(
            negotiate_format(&webm).unwrap().mime,
            "video/webm;codecs=vp8,opus"
        );

        let none = OnlyMimes(vec![]);
        assert!(matches!(
            negotiate_format(&none),
            Err(SlidereelError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_ffmpeg_capabilities_need_both_encoders() {
        let caps = FfmpegCapabilities::from_encoders(["libvpx-vp9", "libopus", "aac"]);
        assert_eq!(negotiate_format(&caps).unwrap().mime, "video/webm;codecs=vp9,opus");

        let video_only = FfmpegCapabilities::from_encoders(["libx264"]);
        assert!(negotiate_format(&video_only).is_err());
    }

    #[test]
    fn test_mp4_args_are_fragmented_and_silent() {
        let args = build_args(&config(FORMAT_PREFERENCES[0], None));
        let joined = args.join(" ");
        assert!(joined.contains("-s 1080x1350"));
        assert!(joined.contains("-c:v libx264 -profile:v baseline"));
        assert!(joined.contains("frag_keyframe+empty_moov+default_base_moof"));
        assert!(joined.contains("-frag_duration 250000"));
        assert!(joined.contains("-b:v 8000k"));
        assert!(args.contains(&"-an".to_string()));
        assert!(!joined.contains("-level"));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn test_webm_args_loop_audio_until_video_ends() {
        let audio = AudioOutput {
            path: PathBuf::from("/tmp/a/track.mp3"),
            volume: 0.9,
            looped: true,
        };
        let args = build_args(&config(FORMAT_PREFERENCES[2], Some(audio)));
        let joined = args.join(" ");
        assert!(joined.contains("-stream_loop -1 -i /tmp/a/track.mp3"));
        assert!(joined.contains("-c:a libopus -b:a 192k -af volume=0.9 -shortest"));
        assert!(joined.contains("-cluster_time_limit 250"));
        assert!(joined.contains("-f webm pipe:1"));
    }

    #[test]
    fn test_encoded_output_keeps_chunk_order() {
        let output = EncodedOutput {
            format: FORMAT_PREFERENCES[0],
            chunks: vec![vec![1, 2], vec![], vec![3]],
            frames: 2,
        };
        assert_eq!(output.len(), 3);
        assert_eq!(output.into_bytes(), vec![1, 2, 3]);
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let raw = "a\nb\n\nc\nd\ne\nf\ng\n";
        assert_eq!(stderr_tail(raw), "c | d | e | f | g");
        assert_eq!(stderr_tail(""), "no diagnostics");
    }
}
