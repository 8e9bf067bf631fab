//! Camera device contract and backends.
//!
//! The controller talks to the camera through `CameraDevice`:
//! - `apply` pushes a full `CameraSettings` block (rotation, resolution,
//!   zoom, LED, optional manual exposure)
//! - `annotate` sets the per-frame overlay text, if the device supports it
//! - `capture_into` synchronously fills a caller-allocated buffer at the
//!   alignment-padded dimensions the hardware requires
//! - `close` releases the device handle
//!
//! `SyntheticCamera` is the `synthetic://` backend: a deterministic pattern
//! generator with occasional scene changes, usable both in tests and on
//! hosts with no camera attached.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use thiserror::Error;

/// Device-level failures, split by the operation that produced them.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera rejected settings: {0}")]
    Setup(String),
    #[error("frame capture failed: {0}")]
    Capture(String),
    #[error("capture buffer holds {actual} bytes, device needs {expected}")]
    BufferSize { expected: usize, actual: usize },
    #[error("camera is closed")]
    Closed,
}

/// Pixel layout of a capture buffer. Three bytes per pixel either way; some
/// devices only emit BGR, which the normalizer swaps back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        3
    }
}

/// A rational frame rate, e.g. `1/6` for one frame every six seconds.
///
/// Ranges with a slow lower bound permit long shutter times in low light.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Framerate {
    pub num: u32,
    pub den: u32,
}

impl Framerate {
    pub fn new(num: u32, den: u32) -> Result<Self> {
        if num == 0 || den == 0 {
            return Err(anyhow!("framerate {}/{} must be non-zero", num, den));
        }
        Ok(Self { num, den })
    }

    /// Frames per second as a float, for range comparisons.
    pub fn per_second(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }
}

impl FromStr for Framerate {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (num, den) = match s.split_once('/') {
            Some((num, den)) => (num.trim(), den.trim()),
            None => (s.trim(), "1"),
        };
        let num: u32 = num
            .parse()
            .map_err(|_| anyhow!("invalid framerate '{}': bad numerator", s))?;
        let den: u32 = den
            .parse()
            .map_err(|_| anyhow!("invalid framerate '{}': bad denominator", s))?;
        Framerate::new(num, den)
    }
}

impl fmt::Display for Framerate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Fixed-exposure parameters for consistent frames in low light.
///
/// Holding the shutter, sensitivity, and white-balance gains steady keeps
/// the frame-difference score from picking up auto-exposure drift.
#[derive(Clone, Debug, PartialEq)]
pub struct ManualExposure {
    /// Shutter duration in microseconds.
    pub shutter_micros: u32,
    /// ISO-equivalent sensitivity.
    pub iso: u32,
    /// Permitted framerate range (lower bound first).
    pub framerate_range: (Framerate, Framerate),
    /// Fixed white-balance gains (red, blue). Implies AWB is off.
    pub awb_gains: (f64, f64),
}

/// Full settings block applied on (re)configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraSettings {
    /// Rotation in degrees; one of 0, 90, 180, 270.
    pub rotation: u16,
    pub width: u32,
    pub height: u32,
    /// Normalized region of interest (x, y, w, h), each in 0.0..=1.0.
    pub zoom: [f64; 4],
    /// Illumination indicator LED.
    pub led: bool,
    pub manual: Option<ManualExposure>,
}

/// The capabilities the capture engine needs from a camera.
pub trait CameraDevice {
    /// Apply a settings block. The device may take a while to converge
    /// afterwards; the session layer owns the settle delay.
    fn apply(&mut self, settings: &CameraSettings) -> Result<(), CameraError>;

    /// Set or clear the text overlaid on subsequent frames.
    fn annotate(&mut self, text: Option<&str>) -> Result<(), CameraError>;

    /// Synchronously fill `buf` with one frame at `width` x `height`.
    ///
    /// The dimensions are the alignment-padded ones; `buf` must hold
    /// exactly `width * height * format.bytes_per_pixel()` bytes.
    /// `fast_path` selects the lower-latency streaming capture port.
    fn capture_into(
        &mut self,
        buf: &mut [u8],
        width: u32,
        height: u32,
        format: PixelFormat,
        fast_path: bool,
    ) -> Result<(), CameraError>;

    /// Release the device handle. Further captures fail with `Closed`.
    fn close(&mut self);
}

/// One raw capture: the filled aligned buffer plus its geometry.
pub struct RawCapture {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Build a device from its URI. Only `synthetic://` is wired in here;
/// hardware backends plug in behind the same trait.
pub fn open_device(uri: &str) -> Result<Box<dyn CameraDevice>> {
    let scheme = uri.split_once("://").map(|(scheme, _)| scheme);
    match scheme {
        Some("synthetic") => Ok(Box::new(SyntheticCamera::new())),
        Some(other) => Err(anyhow!(
            "unsupported camera device scheme '{}'; expected synthetic://",
            other
        )),
        None => Err(anyhow!("camera device '{}' is not a URI", uri)),
    }
}

// ----------------------------------------------------------------------------
// Synthetic backend
// ----------------------------------------------------------------------------

/// Deterministic software camera.
///
/// Generates a position-dependent pattern that shifts with a scene state
/// counter, so downstream motion detection sees mostly-static frames with
/// occasional changes. Frames can also be scripted as solid luma values.
pub struct SyntheticCamera {
    frame_count: u64,
    scene_state: u8,
    scripted: VecDeque<u8>,
    annotation: Option<String>,
    settings: Option<CameraSettings>,
    closed: bool,
}

/// Frames between synthetic scene changes.
const SCENE_CHANGE_PERIOD: u64 = 50;

impl SyntheticCamera {
    pub fn new() -> Self {
        Self {
            frame_count: 0,
            scene_state: 0,
            scripted: VecDeque::new(),
            annotation: None,
            settings: None,
            closed: false,
        }
    }

    /// Queue solid-luma frames to be produced before the generated pattern
    /// resumes. Each queued value fills an entire frame.
    pub fn with_script(mut self, frames: impl IntoIterator<Item = u8>) -> Self {
        self.scripted.extend(frames);
        self
    }

    /// Settings from the last `apply`, if any.
    pub fn applied_settings(&self) -> Option<&CameraSettings> {
        self.settings.as_ref()
    }

    /// Current overlay text.
    pub fn annotation(&self) -> Option<&str> {
        self.annotation.as_deref()
    }

    fn fill_pattern(&mut self, buf: &mut [u8]) {
        if self.frame_count % SCENE_CHANGE_PERIOD == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        if let Some(luma) = self.scripted.pop_front() {
            buf.fill(luma);
            return;
        }
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = ((i as u64 + self.frame_count + u64::from(self.scene_state)) % 256) as u8;
        }
    }
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraDevice for SyntheticCamera {
    fn apply(&mut self, settings: &CameraSettings) -> Result<(), CameraError> {
        if self.closed {
            return Err(CameraError::Closed);
        }
        self.settings = Some(settings.clone());
        Ok(())
    }

    fn annotate(&mut self, text: Option<&str>) -> Result<(), CameraError> {
        if self.closed {
            return Err(CameraError::Closed);
        }
        self.annotation = text.map(str::to_owned);
        Ok(())
    }

    fn capture_into(
        &mut self,
        buf: &mut [u8],
        width: u32,
        height: u32,
        format: PixelFormat,
        _fast_path: bool,
    ) -> Result<(), CameraError> {
        if self.closed {
            return Err(CameraError::Closed);
        }
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if buf.len() != expected {
            return Err(CameraError::BufferSize {
                expected,
                actual: buf.len(),
            });
        }
        self.frame_count += 1;
        self.fill_pattern(buf);
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
