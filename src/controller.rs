//! The capture controller.
//!
//! One iteration is: configure (cached) -> capture -> normalize -> score ->
//! decide -> conditionally schedule a write, then sleep. Stage failures are
//! tagged, logged, and converted into a consecutive-error count; nothing
//! propagates out of an iteration. Five consecutive failures terminate the
//! loop, logged distinctly from a normal single-pass exit. The camera is
//! released exactly once on every exit path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Local;
use thiserror::Error;

use crate::archive::{group_thousands, ImageArchive};
use crate::camera::CameraDevice;
use crate::config::CamwatchConfig;
use crate::frame::{normalize, CapturedFrame};
use crate::motion::{FrameState, MotionDecision, MotionDetector};
use crate::session::CameraSession;

/// Consecutive failed iterations that terminate the loop.
pub const REPEAT_ERROR_LIMIT: u32 = 5;

/// Granularity at which the inter-iteration sleep rechecks the shutdown
/// flag.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// An iteration failure, tagged by the pipeline stage that produced it.
#[derive(Debug, Error)]
pub enum IterationError {
    #[error("camera setup failed: {0:#}")]
    Setup(anyhow::Error),
    #[error("frame capture failed: {0:#}")]
    Capture(anyhow::Error),
    #[error("motion detection failed: {0:#}")]
    Detect(anyhow::Error),
}

/// Why the capture loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopExit {
    /// `do_loop` was false; one pass was requested and completed.
    SinglePass,
    /// `REPEAT_ERROR_LIMIT` consecutive iterations failed.
    ErrorLimit,
    /// The shutdown flag was raised (user interrupt).
    Interrupted,
}

pub struct CaptureController {
    config: CamwatchConfig,
    session: CameraSession,
    detector: MotionDetector,
    archive: ImageArchive,
    state: FrameState,
    shutdown: Arc<AtomicBool>,
}

impl CaptureController {
    pub fn new(
        config: CamwatchConfig,
        device: Box<dyn CameraDevice>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let detector = MotionDetector::from_config(&config);
        let archive = ImageArchive::new(
            config.output_directory.clone(),
            config.image_file_prefix.clone(),
            config.diff_score_in_filename,
        );
        Self {
            config,
            session: CameraSession::new(device),
            detector,
            archive,
            state: FrameState::new(),
            shutdown,
        }
    }

    /// Run until an exit condition, then release the camera.
    pub fn run(&mut self) -> LoopExit {
        let exit = self.run_loop();
        self.session.release();
        match exit {
            LoopExit::SinglePass => log::info!("single capture pass complete"),
            LoopExit::ErrorLimit => log::error!(
                "exiting capture loop after {} consecutive errors",
                REPEAT_ERROR_LIMIT
            ),
            LoopExit::Interrupted => log::info!("capture loop interrupted; shutting down"),
        }
        exit
    }

    fn run_loop(&mut self) -> LoopExit {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return LoopExit::Interrupted;
            }

            match self.run_once() {
                Ok(()) => self.state.error_count = 0,
                Err(err) => {
                    log::error!("{}", err);
                    self.state.error_count += 1;
                }
            }

            log::debug!("sleeping for {:.1}s", self.config.wait.as_secs_f64());
            if !self.sleep_observing_shutdown(self.config.wait) {
                return LoopExit::Interrupted;
            }

            if !self.config.do_loop {
                return LoopExit::SinglePass;
            }
            if self.state.error_count >= REPEAT_ERROR_LIMIT {
                return LoopExit::ErrorLimit;
            }
        }
    }

    /// One configure/capture/detect pass.
    fn run_once(&mut self) -> Result<(), IterationError> {
        self.session
            .configure(&self.config)
            .map_err(|e| IterationError::Setup(e.into()))?;
        let frame = self.capture_frame().map_err(IterationError::Capture)?;
        self.detect(frame).map_err(IterationError::Detect)?;
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<CapturedFrame> {
        let now = Local::now();
        // Captured up front: the filename should carry the acquisition
        // time, not the time the write was scheduled.
        let stem = now.format(&self.config.filename_timestamp_format).to_string();

        if self.config.annotate_timestamp {
            let text = now.format(&self.config.timestamp_format).to_string();
            self.session.annotate(Some(&text))?;
        }

        let started = Instant::now();
        let raw = self.session.capture(&self.config)?;
        let image = normalize(
            raw,
            self.config.resolution_width,
            self.config.resolution_height,
            self.config.crop.as_ref(),
        )?;
        log::debug!(
            "capture complete in {:.4}s",
            started.elapsed().as_secs_f64()
        );
        Ok(CapturedFrame { image, stem })
    }

    fn detect(&mut self, frame: CapturedFrame) -> Result<()> {
        let processed = self.detector.process(&frame.image);
        let debug_pair = if self.config.debug_images {
            self.state
                .previous
                .as_ref()
                .map(|previous| (previous.clone(), processed.clone()))
        } else {
            None
        };

        let decision = self.detector.evaluate(&mut self.state, processed, Instant::now());
        match decision {
            MotionDecision::FirstFrame => {
                log::info!("saving first image");
                self.archive.store(&frame, None)?;
                self.state.mark_saved(Instant::now());
            }
            MotionDecision::MotionDetected(score) => {
                log::info!("motion detected; diff score {}", group_thousands(score));
                let saved = self.archive.store(&frame, Some(score))?;
                self.state.mark_saved(Instant::now());
                if let Some((previous, current)) = debug_pair {
                    self.archive.store_debug(&saved, &previous, &current)?;
                }
            }
            MotionDecision::TimeLapseDue => {
                log::info!("time lapse interval elapsed; saving image");
                self.archive.store(&frame, None)?;
                self.state.mark_saved(Instant::now());
            }
            MotionDecision::NoChange => {
                log::debug!("no motion");
            }
        }
        Ok(())
    }

    /// Sleep for `duration` in slices, returning false if the shutdown
    /// flag was raised meanwhile.
    fn sleep_observing_shutdown(&self, duration: Duration) -> bool {
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.shutdown.load(Ordering::SeqCst) {
                return false;
            }
            let slice = remaining.min(SLEEP_SLICE);
            thread::sleep(slice);
            remaining -= slice;
        }
        !self.shutdown.load(Ordering::SeqCst)
    }
}
