//! Clock and timing utilities for real-time frame pacing.
//!
//! The render loop paints frames against wall-clock deadlines so that a
//! live encoder receives them at real-time speed. This module provides:
//! - Frame schedules (frame counts and per-frame deadlines)
//! - Drift measurement between the schedule and the actual clock
//! - A rate controller that throttles progress reports

use std::time::Duration;

/// Fixed-rate frame schedule for one output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSchedule {
    fps: u32,
}

impl FrameSchedule {
    /// Create a schedule for the given frame rate (clamped to at least 1).
    pub fn new(fps: u32) -> Self {
        Self { fps: fps.max(1) }
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Number of frames needed to hold an image for `duration`.
    /// Always at least one frame so every slide is painted.
    pub fn frames_for(&self, duration: Duration) -> u64 {
        let frames = (duration.as_secs_f64() * self.fps as f64).round() as u64;
        frames.max(1)
    }

    /// Offset of frame `index` from the start of its segment.
    pub fn deadline_of(&self, index: u64) -> Duration {
        Duration::from_nanos(index * 1_000_000_000 / self.fps as u64)
    }
}

/// Drift between the frame schedule and the wall clock.
#[derive(Debug, Clone, Copy)]
pub struct DriftMeasurement {
    /// Scheduled timestamp (ns).
    pub reference_ns: u64,
    /// Observed timestamp (ns).
    pub measured_ns: u64,
}

impl DriftMeasurement {
    /// Drift in nanoseconds (positive = observed is late).
    pub fn drift_ns(&self) -> i64 {
        self.measured_ns as i64 - self.reference_ns as i64
    }

    /// Drift in milliseconds.
    pub fn drift_ms(&self) -> f64 {
        self.drift_ns() as f64 / 1_000_000.0
    }

    /// Whether drift exceeds an acceptable threshold.
    pub fn exceeds_threshold_ms(&self, threshold_ms: f64) -> bool {
        self.drift_ms().abs() > threshold_ms
    }
}

/// Rate limiter for periodic reports.
#[derive(Debug)]
pub struct RateController {
    target_interval_ns: u64,
    last_tick_ns: Option<u64>,
}

impl RateController {
    /// Create a controller that fires at most once per `interval`.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            target_interval_ns: interval.as_nanos() as u64,
            last_tick_ns: None,
        }
    }

    /// Check if enough time has passed for the next tick.
    /// Returns true and updates internal state if ready.
    /// The first call always returns true.
    pub fn should_tick(&mut self, current_ns: u64) -> bool {
        match self.last_tick_ns {
            None => {
                self.last_tick_ns = Some(current_ns);
                true
            }
            Some(last) if current_ns >= last + self.target_interval_ns => {
                self.last_tick_ns = Some(current_ns);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_for_whole_seconds() {
        let schedule = FrameSchedule::new(30);
        assert_eq!(schedule.frames_for(Duration::from_secs(4)), 120);
        assert_eq!(schedule.frames_for(Duration::from_secs(6)), 180);
    }

    #[test]
    fn test_frames_for_never_zero() {
        let schedule = FrameSchedule::new(30);
        assert_eq!(schedule.frames_for(Duration::from_millis(1)), 1);
    }

    #[test]
    fn test_deadline_of_is_exact_at_segment_end() {
        let schedule = FrameSchedule::new(30);
        assert_eq!(schedule.deadline_of(120), Duration::from_secs(4));
        assert_eq!(schedule.deadline_of(0), Duration::ZERO);
    }

    #[test]
    fn test_zero_fps_is_clamped() {
        let schedule = FrameSchedule::new(0);
        assert_eq!(schedule.fps(), 1);
        assert_eq!(schedule.deadline_of(1), Duration::from_secs(1));
    }

    #[test]
    fn test_drift_measurement() {
        let drift = DriftMeasurement {
            reference_ns: 1_000_000_000,
            measured_ns: 1_050_000_000,
        };
        assert_eq!(drift.drift_ns(), 50_000_000);
        assert!((drift.drift_ms() - 50.0).abs() < 1e-9);
        assert!(drift.exceeds_threshold_ms(10.0));
        assert!(!drift.exceeds_threshold_ms(100.0));
    }

    #[test]
    fn test_rate_controller() {
        let mut ctrl = RateController::with_interval(Duration::from_millis(120));
        assert!(ctrl.should_tick(0)); // first tick always fires
        assert!(!ctrl.should_tick(100_000_000));
        assert!(ctrl.should_tick(120_000_000));
        assert!(!ctrl.should_tick(200_000_000));
    }
}
