//! Frame compositor: paints slides onto the output surface and paces them
//! into the encoder in real time.

use std::time::Duration;

use image::imageops::{self, FilterType};
use image::RgbaImage;
use slidereel_common::clock::{DriftMeasurement, FrameSchedule, RateController};
use slidereel_common::error::{SlidereelError, SlidereelResult};
use tokio::time::Instant;

use crate::cancel::CancelFlag;
use crate::encoder::EncoderSession;
use crate::frame_source::FrameSource;

/// Schedule slip beyond which a slide boundary is logged.
const DRIFT_WARN_MS: f64 = 50.0;

/// Fixed-size RGBA drawing target.
#[derive(Debug, Clone)]
pub struct Surface {
    canvas: RgbaImage,
    /// Last slide resized to the canvas, keyed by slide index.
    stretched: Option<(u32, RgbaImage)>,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            canvas: RgbaImage::new(width.max(1), height.max(1)),
            stretched: None,
        }
    }

    pub fn width(&self) -> u32 {
        self.canvas.width()
    }

    pub fn height(&self) -> u32 {
        self.canvas.height()
    }

    pub fn clear(&mut self) {
        self.canvas.fill(0);
    }

    /// Clear the canvas and drop the resized slide.
    pub fn reset(&mut self) {
        self.clear();
        self.stretched = None;
    }

    /// Stretch the slide across the whole surface. No letterboxing.
    ///
    /// The resize runs once per slide; repeated draws of the same slide
    /// copy the cached result.
    pub fn draw_stretched(&mut self, source: &FrameSource) -> SlidereelResult<()> {
        let raster = source.raster();
        if raster.width() == 0 || raster.height() == 0 {
            return Err(SlidereelError::render(format!(
                "slide {} has no pixels to draw",
                source.index()
            )));
        }
        if raster.dimensions() == self.canvas.dimensions() {
            self.canvas.copy_from_slice(raster.as_raw());
            return Ok(());
        }

        let cached = matches!(&self.stretched, Some((index, _)) if *index == source.index());
        if !cached {
            let fitted = imageops::resize(
                raster,
                self.canvas.width(),
                self.canvas.height(),
                FilterType::Triangle,
            );
            self.stretched = Some((source.index(), fitted));
        }
        if let Some((_, fitted)) = &self.stretched {
            self.canvas.copy_from_slice(fitted.as_raw());
        }
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.canvas.as_raw()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.canvas
    }
}

/// How long each slide stays on screen.
pub trait DurationPolicy: Send + Sync {
    fn dwell(&self, position: usize, total: usize) -> Duration;

    /// Total render time for `total` slides.
    fn total(&self, total: usize) -> Duration {
        (0..total).map(|position| self.dwell(position, total)).sum()
    }
}

/// Every slide holds for `standard`; the last one holds for `final_slide`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldFinalSlide {
    pub standard: Duration,
    pub final_slide: Duration,
}

impl Default for HoldFinalSlide {
    fn default() -> Self {
        Self {
            standard: Duration::from_millis(4000),
            final_slide: Duration::from_millis(6000),
        }
    }
}

impl DurationPolicy for HoldFinalSlide {
    fn dwell(&self, position: usize, total: usize) -> Duration {
        if position + 1 >= total {
            self.final_slide
        } else {
            self.standard
        }
    }
}

/// Same dwell for every slide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformDwell(pub Duration);

impl DurationPolicy for UniformDwell {
    fn dwell(&self, _position: usize, _total: usize) -> Duration {
        self.0
    }
}

/// Progress sample from the render loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTick {
    /// Rendered content time so far.
    pub elapsed: Duration,
    /// Total content time of the export.
    pub total: Duration,
    /// Position of the slide on screen.
    pub slide: usize,
}

impl RenderTick {
    /// Fraction of the render completed, in [0, 1].
    pub fn fraction(&self) -> f64 {
        if self.total.is_zero() {
            return 1.0;
        }
        (self.elapsed.as_secs_f64() / self.total.as_secs_f64()).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderStats {
    pub frames: u64,
    pub slides: usize,
    /// Wall-clock time spent rendering.
    pub elapsed: Duration,
}

/// Paints each slide for its dwell time at a fixed frame rate.
pub struct RenderLoop {
    schedule: FrameSchedule,
    policy: Box<dyn DurationPolicy>,
    progress_interval: Duration,
}

impl RenderLoop {
    pub fn new(fps: u32, policy: Box<dyn DurationPolicy>) -> Self {
        Self {
            schedule: FrameSchedule::new(fps),
            policy,
            progress_interval: Duration::from_millis(120),
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn schedule(&self) -> FrameSchedule {
        self.schedule
    }

    pub fn policy(&self) -> &dyn DurationPolicy {
        self.policy.as_ref()
    }

    /// Per-slide dwell times for `count` slides.
    pub fn plan(&self, count: usize) -> Vec<Duration> {
        (0..count)
            .map(|position| self.policy.dwell(position, count))
            .collect()
    }

    pub fn total_duration(&self, count: usize) -> Duration {
        self.policy.total(count)
    }

    pub fn total_frames(&self, count: usize) -> u64 {
        self.plan(count)
            .into_iter()
            .map(|dwell| self.schedule.frames_for(dwell))
            .sum()
    }

    /// Render every source in order into `encoder`.
    ///
    /// Frame deadlines are anchored to each slide's scheduled start so a
    /// late frame does not push back the rest of the export.
    pub async fn run(
        &self,
        sources: &[FrameSource],
        surface: &mut Surface,
        encoder: &mut dyn EncoderSession,
        cancel: &CancelFlag,
        on_tick: &mut (dyn FnMut(RenderTick) + Send),
    ) -> SlidereelResult<RenderStats> {
        if sources.is_empty() {
            return Err(SlidereelError::NoSlides);
        }

        let count = sources.len();
        let total = self.policy.total(count);
        let started = Instant::now();
        let mut throttle = RateController::with_interval(self.progress_interval);
        surface.reset();
        let mut frames = 0u64;
        let mut offset = Duration::ZERO;

        tracing::info!(
            slides = count,
            fps = self.schedule.fps(),
            total_ms = total.as_millis() as u64,
            "Render loop started"
        );

        for (position, source) in sources.iter().enumerate() {
            let dwell = self.policy.dwell(position, count);
            let slide_frames = self.schedule.frames_for(dwell);
            let slide_start = started + offset;

            for frame in 0..slide_frames {
                cancel.check()?;

                let elapsed = (offset + self.schedule.deadline_of(frame)).min(total);
                if throttle.should_tick(elapsed.as_nanos() as u64) {
                    on_tick(RenderTick {
                        elapsed,
                        total,
                        slide: position,
                    });
                }

                surface.clear();
                surface.draw_stretched(source)?;
                encoder.push_frame(surface).await?;
                frames += 1;

                tokio::time::sleep_until(slide_start + self.schedule.deadline_of(frame + 1)).await;
            }

            offset += dwell;
            let drift = DriftMeasurement {
                reference_ns: offset.as_nanos() as u64,
                measured_ns: started.elapsed().as_nanos() as u64,
            };
            if drift.exceeds_threshold_ms(DRIFT_WARN_MS) {
                tracing::warn!(
                    slide = source.index(),
                    drift_ms = drift.drift_ms(),
                    "Render loop fell behind schedule"
                );
            }
            tracing::debug!(slide = source.index(), frames = slide_frames, "Slide rendered");
        }

        cancel.check()?;
        on_tick(RenderTick {
            elapsed: total,
            total,
            slide: count - 1,
        });

        let stats = RenderStats {
            frames,
            slides: count,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            frames = stats.frames,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "Render loop finished"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{EncodedOutput, EncoderConfig, FORMAT_PREFERENCES};
    use crate::frame_source::FrameLocator;
    use proptest::prelude::*;

    #[derive(Default)]
    struct CountingEncoder {
        frames: u64,
        fail_at: Option<u64>,
        first_pixel: Vec<[u8; 4]>,
    }

    #[async_trait::async_trait]
    impl EncoderSession for CountingEncoder {
        async fn start(&mut self, _config: &EncoderConfig) -> SlidereelResult<()> {
            Ok(())
        }

        async fn push_frame(&mut self, surface: &Surface) -> SlidereelResult<()> {
            if self.fail_at == Some(self.frames) {
                return Err(SlidereelError::encoder("sink closed"));
            }
            self.frames += 1;
            self.first_pixel.push(surface.image().get_pixel(0, 0).0);
            Ok(())
        }

        async fn stop(&mut self) -> SlidereelResult<EncodedOutput> {
            Ok(EncodedOutput {
                format: FORMAT_PREFERENCES[0],
                chunks: vec![],
                frames: self.frames,
            })
        }

        async fn abort(&mut self) {}
    }

    fn solid(index: u32, width: u32, height: u32, shade: u8) -> FrameSource {
        FrameSource::new(
            index,
            FrameLocator::Remote(format!("slide-{index}")),
            RgbaImage::from_pixel(width, height, image::Rgba([shade, shade, shade, 255])),
        )
    }

    #[test]
    fn test_hold_final_slide_totals() {
        let policy = HoldFinalSlide::default();
        assert_eq!(policy.total(3), Duration::from_secs(14));
        assert_eq!(policy.total(1), Duration::from_secs(6));
        assert_eq!(policy.total(0), Duration::ZERO);
    }

    #[test]
    fn test_total_frames_at_30fps() {
        let render = RenderLoop::new(30, Box::new(HoldFinalSlide::default()));
        assert_eq!(render.total_frames(3), 420);
        assert_eq!(
            render.plan(2),
            vec![Duration::from_secs(4), Duration::from_secs(6)]
        );
    }

    #[test]
    fn test_surface_stretches_without_letterbox() {
        let mut surface = Surface::new(8, 10);
        surface.draw_stretched(&solid(0, 3, 2, 90)).unwrap();
        assert!(surface.image().pixels().all(|p| p.0 == [90, 90, 90, 255]));

        surface.clear();
        assert!(surface.as_bytes().iter().all(|b| *b == 0));
        assert_eq!(surface.as_bytes().len(), 8 * 10 * 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_loop_paces_in_real_time() {
        let render = RenderLoop::new(30, Box::new(HoldFinalSlide::default()));
        let sources = vec![solid(0, 4, 4, 10), solid(1, 4, 4, 20), solid(2, 4, 4, 30)];
        let mut surface = Surface::new(4, 4);
        let mut encoder = CountingEncoder::default();
        let mut ticks = Vec::new();

        let stats = render
            .run(
                &sources,
                &mut surface,
                &mut encoder,
                &CancelFlag::new(),
                &mut |tick| ticks.push(tick),
            )
            .await
            .unwrap();

        assert_eq!(stats.frames, 420);
        assert_eq!(stats.slides, 3);
        assert_eq!(stats.elapsed, Duration::from_secs(14));
        assert_eq!(encoder.first_pixel[0][0], 10);
        assert_eq!(encoder.first_pixel[120][0], 20);
        assert_eq!(encoder.first_pixel[419][0], 30);

        assert!(ticks.windows(2).all(|w| w[0].elapsed <= w[1].elapsed));
        assert!(ticks
            .windows(2)
            .all(|w| w[1].elapsed == w[1].total || w[1].elapsed - w[0].elapsed >= Duration::from_millis(120)));
        let last = ticks.last().unwrap();
        assert_eq!(last.elapsed, Duration::from_secs(14));
        assert_eq!(last.fraction(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_loop_stops_on_cancel() {
        let render = RenderLoop::new(30, Box::new(UniformDwell(Duration::from_secs(1))));
        let sources = vec![solid(0, 2, 2, 1), solid(1, 2, 2, 2)];
        let mut surface = Surface::new(2, 2);
        let mut encoder = CountingEncoder::default();
        let cancel = CancelFlag::new();
        let trigger = cancel.clone();

        let result = render
            .run(&sources, &mut surface, &mut encoder, &cancel, &mut |tick| {
                if tick.slide == 1 {
                    trigger.cancel();
                }
            })
            .await;

        assert!(matches!(result, Err(SlidereelError::Cancelled)));
        assert!(encoder.frames > 30 && encoder.frames < 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_loop_propagates_encoder_failure() {
        let render = RenderLoop::new(30, Box::new(HoldFinalSlide::default()));
        let sources = vec![solid(0, 2, 2, 1)];
        let mut surface = Surface::new(2, 2);
        let mut encoder = CountingEncoder {
            fail_at: Some(5),
            ..Default::default()
        };

        let result = render
            .run(
                &sources,
                &mut surface,
                &mut encoder,
                &CancelFlag::new(),
                &mut |_| {},
            )
            .await;
        assert!(matches!(result, Err(SlidereelError::Encoder { .. })));
        assert_eq!(encoder.frames, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_loop_stretches_each_slide_to_the_surface() {
        let render = RenderLoop::new(30, Box::new(UniformDwell(Duration::from_millis(100))));
        let sources = vec![solid(0, 2, 3, 40), solid(1, 9, 5, 80)];
        let mut surface = Surface::new(6, 6);
        let mut encoder = CountingEncoder::default();

        let stats = render
            .run(
                &sources,
                &mut surface,
                &mut encoder,
                &CancelFlag::new(),
                &mut |_| {},
            )
            .await
            .unwrap();

        assert_eq!(stats.frames, 6);
        assert_eq!(&encoder.first_pixel[..3], &[[40, 40, 40, 255]; 3]);
        assert_eq!(&encoder.first_pixel[3..], &[[80, 80, 80, 255]; 3]);
        assert!(surface.image().pixels().all(|p| p.0 == [80, 80, 80, 255]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_render_loop_rejects_empty_raster() {
        let render = RenderLoop::new(30, Box::new(HoldFinalSlide::default()));
        let sources = vec![FrameSource::new(
            4,
            FrameLocator::Remote("blank".into()),
            RgbaImage::new(0, 0),
        )];
        let mut surface = Surface::new(2, 2);
        let mut encoder = CountingEncoder::default();

        let result = render
            .run(
                &sources,
                &mut surface,
                &mut encoder,
                &CancelFlag::new(),
                &mut |_| {},
            )
            .await;
        assert!(matches!(result, Err(SlidereelError::Render { .. })));
        assert_eq!(encoder.frames, 0);
    }

    proptest! {
        #[test]
        fn prop_hold_final_total_matches_formula(n in 1usize..40, standard in 1u64..10_000, last in 1u64..10_000) {
            let policy = HoldFinalSlide {
                standard: Duration::from_millis(standard),
                final_slide: Duration::from_millis(last),
            };
            let expected = Duration::from_millis(standard * (n as u64 - 1) + last);
            prop_assert_eq!(policy.total(n), expected);
        }
    }
}
