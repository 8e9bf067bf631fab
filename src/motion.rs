//! Motion scoring and the save/no-save decision.
//!
//! Each normalized frame is reduced to a small, smoothed grayscale image:
//! downscale to `motion_image_percent` of the original width, convert to
//! luma, then a 21x21 box blur to wash out sensor noise. The motion signal
//! is the sum of absolute pixel differences between consecutive smoothed
//! frames.
//!
//! The decision layer adds hysteresis (N consecutive above-threshold frames
//! before a save commits) and the time-lapse fallback (a save triggered by
//! elapsed time alone when motion is absent).

use std::time::{Duration, Instant};

use image::{imageops, GrayImage, RgbImage};
use imageproc::filter::box_filter;

use crate::config::CamwatchConfig;

/// Box-blur radius; a radius of 10 gives the 21x21 smoothing kernel.
pub const BLUR_RADIUS: u32 = 10;

/// What to do with the frame that produced a score.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionDecision {
    /// No prior smoothed frame exists; save unconditionally.
    FirstFrame,
    /// Sustained motion crossed the consecutive-frame threshold.
    MotionDetected(u64),
    /// No motion, but the time-lapse interval expired.
    TimeLapseDue,
    /// Nothing to persist.
    NoChange,
}

/// Mutable per-iteration state threaded through the capture loop.
///
/// `motion_frame_count` resets to zero whenever a frame is persisted or a
/// frame scores at or below the threshold.
#[derive(Default)]
pub struct FrameState {
    pub previous: Option<GrayImage>,
    pub motion_frame_count: u32,
    pub last_image_time: Option<Instant>,
    pub error_count: u32,
}

impl FrameState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that an image write was scheduled (not completed) now.
    pub fn mark_saved(&mut self, now: Instant) {
        self.last_image_time = Some(now);
    }
}

/// Sum of absolute per-pixel differences between two smoothed frames.
pub fn diff_score(a: &GrayImage, b: &GrayImage) -> u64 {
    debug_assert_eq!(a.dimensions(), b.dimensions());
    a.as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(&x, &y)| u64::from(x.abs_diff(y)))
        .sum()
}

/// Stateless scoring parameters plus the hysteresis/time-lapse policy.
pub struct MotionDetector {
    diff_threshold: u64,
    motion_frames_threshold: u32,
    motion_image_percent: u32,
    time_lapse: Option<Duration>,
}

impl MotionDetector {
    pub fn new(
        diff_threshold: u64,
        motion_frames_threshold: u32,
        motion_image_percent: u32,
        time_lapse: Option<Duration>,
    ) -> Self {
        Self {
            diff_threshold,
            motion_frames_threshold,
            motion_image_percent,
            time_lapse,
        }
    }

    pub fn from_config(config: &CamwatchConfig) -> Self {
        Self::new(
            config.diff_threshold,
            config.motion_frames_threshold,
            config.motion_image_percent,
            config.time_lapse,
        )
    }

    /// Reduce a normalized frame to its smoothed grayscale representation.
    pub fn process(&self, frame: &RgbImage) -> GrayImage {
        let (width, height) = frame.dimensions();
        let target_width = (width * self.motion_image_percent / 100).max(1);
        let gray = if target_width == width {
            imageops::grayscale(frame)
        } else {
            let target_height = ((u64::from(height) * u64::from(target_width)
                + u64::from(width) / 2)
                / u64::from(width))
            .max(1) as u32;
            let resized =
                imageops::resize(frame, target_width, target_height, imageops::FilterType::Triangle);
            imageops::grayscale(&resized)
        };
        box_filter(&gray, BLUR_RADIUS, BLUR_RADIUS)
    }

    /// Score `processed` against the previous smoothed frame and decide.
    ///
    /// Always replaces `state.previous` with `processed`; never touches
    /// `last_image_time` (the controller records saves once the write has
    /// actually been scheduled).
    pub fn evaluate(
        &self,
        state: &mut FrameState,
        processed: GrayImage,
        now: Instant,
    ) -> MotionDecision {
        let Some(previous) = state.previous.take() else {
            state.previous = Some(processed);
            return MotionDecision::FirstFrame;
        };

        let score = diff_score(&previous, &processed);
        let decision = if score > self.diff_threshold {
            state.motion_frame_count += 1;
            if state.motion_frame_count >= self.motion_frames_threshold {
                state.motion_frame_count = 0;
                MotionDecision::MotionDetected(score)
            } else {
                MotionDecision::NoChange
            }
        } else if self.time_lapse_due(state, now) {
            state.motion_frame_count = 0;
            MotionDecision::TimeLapseDue
        } else {
            state.motion_frame_count = 0;
            MotionDecision::NoChange
        };

        state.previous = Some(processed);
        decision
    }

    fn time_lapse_due(&self, state: &FrameState, now: Instant) -> bool {
        let Some(interval) = self.time_lapse else {
            return false;
        };
        let Some(last) = state.last_image_time else {
            return false;
        };
        now.duration_since(last) > interval
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_gray(value: u8) -> GrayImage {
        GrayImage::from_pixel(100, 100, image::Luma([value]))
    }

    fn solid_rgb(value: u8) -> RgbImage {
        RgbImage::from_pixel(64, 48, image::Rgb([value, value, value]))
    }

    fn detector(frames_threshold: u32, time_lapse: Option<Duration>) -> MotionDetector {
        // 100x100 solid frames: score = |a - b| * 10_000
        MotionDetector::new(1_000_000, frames_threshold, 100, time_lapse)
    }

    #[test]
    fn identical_frames_score_zero_and_do_not_save() {
        let det = detector(2, None);
        let mut state = FrameState::new();
        let now = Instant::now();

        assert_eq!(
            det.evaluate(&mut state, solid_gray(50), now),
            MotionDecision::FirstFrame
        );
        assert_eq!(diff_score(&solid_gray(50), &solid_gray(50)), 0);
        assert_eq!(
            det.evaluate(&mut state, solid_gray(50), now),
            MotionDecision::NoChange
        );
        assert_eq!(state.motion_frame_count, 0);
    }

    #[test]
    fn first_frame_saves_regardless_of_thresholds() {
        let det = MotionDetector::new(0, 1, 100, None);
        let mut state = FrameState::new();
        assert_eq!(
            det.evaluate(&mut state, solid_gray(0), Instant::now()),
            MotionDecision::FirstFrame
        );
        assert!(state.previous.is_some());
        assert_eq!(state.motion_frame_count, 0);
    }

    #[test]
    fn motion_needs_n_consecutive_frames() {
        let det = detector(3, None);
        let mut state = FrameState::new();
        let now = Instant::now();

        det.evaluate(&mut state, solid_gray(0), now);
        // Two above-threshold frames, then one below: never saves, counter resets.
        assert_eq!(
            det.evaluate(&mut state, solid_gray(200), now),
            MotionDecision::NoChange
        );
        assert_eq!(state.motion_frame_count, 1);
        assert_eq!(
            det.evaluate(&mut state, solid_gray(0), now),
            MotionDecision::NoChange
        );
        assert_eq!(state.motion_frame_count, 2);
        assert_eq!(
            det.evaluate(&mut state, solid_gray(10), now),
            MotionDecision::NoChange
        );
        assert_eq!(state.motion_frame_count, 0);

        // Exactly three above-threshold frames: one save on the third.
        assert_eq!(
            det.evaluate(&mut state, solid_gray(210), now),
            MotionDecision::NoChange
        );
        assert_eq!(
            det.evaluate(&mut state, solid_gray(10), now),
            MotionDecision::NoChange
        );
        match det.evaluate(&mut state, solid_gray(210), now) {
            MotionDecision::MotionDetected(score) => assert_eq!(score, 2_000_000),
            other => panic!("expected motion, got {:?}", other),
        }
        assert_eq!(state.motion_frame_count, 0);
    }

    #[test]
    fn hysteresis_scenario_saves_on_first_and_third_frames() {
        // Scores: first frame, 2_000_000, 2_000_000, 500_000.
        let det = detector(2, None);
        let mut state = FrameState::new();
        let now = Instant::now();

        assert_eq!(
            det.evaluate(&mut state, solid_gray(0), now),
            MotionDecision::FirstFrame
        );
        assert_eq!(
            det.evaluate(&mut state, solid_gray(200), now),
            MotionDecision::NoChange
        );
        assert_eq!(
            det.evaluate(&mut state, solid_gray(0), now),
            MotionDecision::MotionDetected(2_000_000)
        );
        assert_eq!(
            det.evaluate(&mut state, solid_gray(50), now),
            MotionDecision::NoChange
        );
        assert_eq!(state.motion_frame_count, 0);
    }

    #[test]
    fn time_lapse_is_monotonic_in_elapsed_time() {
        let det = detector(2, Some(Duration::from_secs(60)));
        let mut state = FrameState::new();
        let start = Instant::now();

        det.evaluate(&mut state, solid_gray(50), start);
        state.mark_saved(start);

        // Not yet due.
        assert_eq!(
            det.evaluate(&mut state, solid_gray(50), start + Duration::from_secs(60)),
            MotionDecision::NoChange
        );
        // First frame past the interval fires.
        assert_eq!(
            det.evaluate(&mut state, solid_gray(50), start + Duration::from_secs(61)),
            MotionDecision::TimeLapseDue
        );
        state.mark_saved(start + Duration::from_secs(61));
        // And only once: the next frame is inside the new interval.
        assert_eq!(
            det.evaluate(&mut state, solid_gray(50), start + Duration::from_secs(62)),
            MotionDecision::NoChange
        );
    }

    #[test]
    fn time_lapse_overrides_accumulated_motion_count() {
        let det = detector(3, Some(Duration::from_secs(10)));
        let mut state = FrameState::new();
        let start = Instant::now();

        det.evaluate(&mut state, solid_gray(0), start);
        state.mark_saved(start);
        det.evaluate(&mut state, solid_gray(200), start);
        assert_eq!(state.motion_frame_count, 1);

        // Motion absent and the interval expired: fires despite the counter.
        assert_eq!(
            det.evaluate(&mut state, solid_gray(200), start + Duration::from_secs(11)),
            MotionDecision::TimeLapseDue
        );
        assert_eq!(state.motion_frame_count, 0);
    }

    #[test]
    fn disabled_time_lapse_never_fires() {
        let det = detector(2, None);
        let mut state = FrameState::new();
        let start = Instant::now();
        det.evaluate(&mut state, solid_gray(50), start);
        state.mark_saved(start);
        assert_eq!(
            det.evaluate(&mut state, solid_gray(50), start + Duration::from_secs(3600)),
            MotionDecision::NoChange
        );
    }

    #[test]
    fn process_downscales_proportionally() {
        let det = MotionDetector::new(0, 1, 50, None);
        let processed = det.process(&solid_rgb(80));
        assert_eq!(processed.dimensions(), (32, 24));
    }

    #[test]
    fn process_keeps_solid_frames_solid() {
        // A constant image is unchanged by grayscale conversion and blur,
        // so scripted solid frames produce exact scores.
        let det = MotionDetector::new(0, 1, 100, None);
        let processed = det.process(&solid_rgb(80));
        assert_eq!(processed.dimensions(), (64, 48));
        assert!(processed.pixels().all(|p| p.0[0] == 80));
    }

    #[test]
    fn previous_frame_is_replaced_after_every_decision() {
        let det = detector(2, None);
        let mut state = FrameState::new();
        let now = Instant::now();

        det.evaluate(&mut state, solid_gray(10), now);
        det.evaluate(&mut state, solid_gray(20), now);
        let prev = state.previous.as_ref().unwrap();
        assert_eq!(prev.get_pixel(0, 0).0, [20]);
    }
}
