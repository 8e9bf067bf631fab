//! Daemon configuration.
//!
//! Loaded once at startup from a JSON file named by `CAMWATCH_CONFIG`,
//! with a couple of environment-variable overrides on top, then validated
//! so that bad values fail before the capture loop starts rather than at
//! first use. The loaded struct is immutable for the controller's
//! lifetime.

use anyhow::{anyhow, Context, Result};
use chrono::format::{Item, StrftimeItems};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::camera::{CameraSettings, Framerate, ManualExposure};
use crate::frame::CropRect;

const DEFAULT_DEVICE: &str = "synthetic://camera";
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
const DEFAULT_DIFF_THRESHOLD: u64 = 1_500_000;
const DEFAULT_MOTION_FRAMES: u32 = 2;
const DEFAULT_IMAGE_PERCENT: u32 = 100;
const DEFAULT_SETUP_TIMEOUT_SECS: u64 = 300;
const DEFAULT_SETTLE_SECS: f64 = 2.0;
const DEFAULT_WAIT_SECS: f64 = 2.0;
const DEFAULT_OUTPUT_DIR: &str = "images";
const DEFAULT_PREFIX: &str = "camwatch";
const DEFAULT_FILENAME_TIMESTAMP: &str = "%Y%m%d-%H%M%S";
const DEFAULT_ANNOTATION_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    device: Option<String>,
    resolution: Option<ResolutionFile>,
    crop: Option<[u32; 4]>,
    motion: Option<MotionFile>,
    time_lapse_seconds: Option<u64>,
    do_loop: Option<bool>,
    wait_seconds: Option<f64>,
    setup: Option<SetupFile>,
    capture: Option<CaptureFile>,
    output: Option<OutputFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ResolutionFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct MotionFile {
    diff_threshold: Option<u64>,
    frames_threshold: Option<u32>,
    image_percent: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct SetupFile {
    timeout_seconds: Option<u64>,
    settle_seconds: Option<f64>,
    rotation: Option<u16>,
    zoom: Option<[f64; 4]>,
    enable_led: Option<bool>,
    log_settings: Option<bool>,
    manual: Option<ManualFile>,
}

#[derive(Debug, Deserialize)]
struct ManualFile {
    shutter_micros: u32,
    iso: u32,
    framerate_range: [String; 2],
    awb_gains: [f64; 2],
}

#[derive(Debug, Deserialize, Default)]
struct CaptureFile {
    fast_path: Option<bool>,
    annotate_timestamp: Option<bool>,
    timestamp_format: Option<String>,
    filename_timestamp_format: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputFile {
    directory: Option<PathBuf>,
    prefix: Option<String>,
    diff_score_in_filename: Option<bool>,
    debug_images: Option<bool>,
}

#[derive(Clone, Debug)]
pub struct CamwatchConfig {
    /// Camera device URI, e.g. `synthetic://camera`.
    pub device: String,
    pub resolution_width: u32,
    pub resolution_height: u32,
    /// Validated secondary crop; `None` when disabled.
    pub crop: Option<CropRect>,
    pub diff_threshold: u64,
    pub motion_frames_threshold: u32,
    /// Downscale percentage applied before scoring, 1..=100.
    pub motion_image_percent: u32,
    /// Time-lapse fallback interval; `None` disables it.
    pub time_lapse: Option<Duration>,
    /// Setup-cache window; `None` reconfigures on every iteration.
    pub setup_timeout: Option<Duration>,
    /// Post-setup delay for white-balance convergence.
    pub settle: Duration,
    pub rotation: u16,
    pub zoom: [f64; 4],
    pub enable_led: bool,
    pub log_camera_settings: bool,
    pub manual_exposure: Option<ManualExposure>,
    pub do_loop: bool,
    /// Sleep between iterations.
    pub wait: Duration,
    pub fast_capture: bool,
    pub annotate_timestamp: bool,
    /// Format of the overlay timestamp text.
    pub timestamp_format: String,
    /// Format of the timestamp embedded in filenames.
    pub filename_timestamp_format: String,
    pub output_directory: PathBuf,
    pub image_file_prefix: String,
    pub diff_score_in_filename: bool,
    pub debug_images: bool,
}

impl Default for CamwatchConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            resolution_width: DEFAULT_WIDTH,
            resolution_height: DEFAULT_HEIGHT,
            crop: None,
            diff_threshold: DEFAULT_DIFF_THRESHOLD,
            motion_frames_threshold: DEFAULT_MOTION_FRAMES,
            motion_image_percent: DEFAULT_IMAGE_PERCENT,
            time_lapse: None,
            setup_timeout: Some(Duration::from_secs(DEFAULT_SETUP_TIMEOUT_SECS)),
            settle: Duration::from_secs_f64(DEFAULT_SETTLE_SECS),
            rotation: 0,
            zoom: [0.0, 0.0, 1.0, 1.0],
            enable_led: false,
            log_camera_settings: false,
            manual_exposure: None,
            do_loop: true,
            wait: Duration::from_secs_f64(DEFAULT_WAIT_SECS),
            fast_capture: false,
            annotate_timestamp: false,
            timestamp_format: DEFAULT_ANNOTATION_TIMESTAMP.to_string(),
            filename_timestamp_format: DEFAULT_FILENAME_TIMESTAMP.to_string(),
            output_directory: PathBuf::from(DEFAULT_OUTPUT_DIR),
            image_file_prefix: DEFAULT_PREFIX.to_string(),
            diff_score_in_filename: false,
            debug_images: false,
        }
    }
}

impl CamwatchConfig {
    /// Load from `CAMWATCH_CONFIG` (defaults apply when unset), overlay
    /// environment overrides, and validate.
    pub fn load() -> Result<Self> {
        let file_cfg = match std::env::var("CAMWATCH_CONFIG").ok().as_deref() {
            Some(path) => read_config_file(Path::new(path))?,
            None => ConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ConfigFile) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(device) = file.device {
            cfg.device = device;
        }
        if let Some(resolution) = file.resolution {
            if let Some(width) = resolution.width {
                cfg.resolution_width = width;
            }
            if let Some(height) = resolution.height {
                cfg.resolution_height = height;
            }
        }
        if let Some(bounds) = file.crop {
            cfg.crop = CropRect::from_bounds(bounds)?;
        }
        if let Some(motion) = file.motion {
            if let Some(threshold) = motion.diff_threshold {
                cfg.diff_threshold = threshold;
            }
            if let Some(frames) = motion.frames_threshold {
                cfg.motion_frames_threshold = frames;
            }
            if let Some(percent) = motion.image_percent {
                cfg.motion_image_percent = percent;
            }
        }
        if let Some(seconds) = file.time_lapse_seconds {
            cfg.time_lapse = (seconds != 0).then(|| Duration::from_secs(seconds));
        }
        if let Some(do_loop) = file.do_loop {
            cfg.do_loop = do_loop;
        }
        if let Some(seconds) = file.wait_seconds {
            cfg.wait = non_negative_secs(seconds, "wait_seconds")?;
        }
        if let Some(setup) = file.setup {
            if let Some(seconds) = setup.timeout_seconds {
                cfg.setup_timeout = (seconds != 0).then(|| Duration::from_secs(seconds));
            }
            if let Some(seconds) = setup.settle_seconds {
                cfg.settle = non_negative_secs(seconds, "setup.settle_seconds")?;
            }
            if let Some(rotation) = setup.rotation {
                cfg.rotation = rotation;
            }
            if let Some(zoom) = setup.zoom {
                cfg.zoom = zoom;
            }
            if let Some(led) = setup.enable_led {
                cfg.enable_led = led;
            }
            if let Some(log_settings) = setup.log_settings {
                cfg.log_camera_settings = log_settings;
            }
            if let Some(manual) = setup.manual {
                cfg.manual_exposure = Some(parse_manual(manual)?);
            }
        }
        if let Some(capture) = file.capture {
            if let Some(fast) = capture.fast_path {
                cfg.fast_capture = fast;
            }
            if let Some(annotate) = capture.annotate_timestamp {
                cfg.annotate_timestamp = annotate;
            }
            if let Some(format) = capture.timestamp_format {
                cfg.timestamp_format = format;
            }
            if let Some(format) = capture.filename_timestamp_format {
                cfg.filename_timestamp_format = format;
            }
        }
        if let Some(output) = file.output {
            if let Some(directory) = output.directory {
                cfg.output_directory = directory;
            }
            if let Some(prefix) = output.prefix {
                cfg.image_file_prefix = prefix;
            }
            if let Some(scored) = output.diff_score_in_filename {
                cfg.diff_score_in_filename = scored;
            }
            if let Some(debug) = output.debug_images {
                cfg.debug_images = debug;
            }
        }
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Ok(device) = std::env::var("CAMWATCH_DEVICE") {
            if !device.trim().is_empty() {
                self.device = device;
            }
        }
        if let Ok(dir) = std::env::var("CAMWATCH_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.output_directory = PathBuf::from(dir);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.resolution_width == 0 || self.resolution_height == 0 {
            return Err(anyhow!(
                "resolution {}x{} must be non-zero",
                self.resolution_width,
                self.resolution_height
            ));
        }
        if let Some(crop) = &self.crop {
            crop.validate_within(self.resolution_width, self.resolution_height)?;
        }
        if self.motion_image_percent == 0 || self.motion_image_percent > 100 {
            return Err(anyhow!(
                "motion.image_percent must be in 1..=100, got {}",
                self.motion_image_percent
            ));
        }
        if self.motion_frames_threshold == 0 {
            return Err(anyhow!("motion.frames_threshold must be at least 1"));
        }
        if !matches!(self.rotation, 0 | 90 | 180 | 270) {
            return Err(anyhow!(
                "rotation must be one of 0, 90, 180, 270; got {}",
                self.rotation
            ));
        }
        if self.zoom.iter().any(|v| !(0.0..=1.0).contains(v)) {
            return Err(anyhow!("zoom components must be within 0.0..=1.0"));
        }
        if self.zoom[2] <= 0.0 || self.zoom[3] <= 0.0 {
            return Err(anyhow!("zoom width and height must be positive"));
        }
        if let Some(manual) = &self.manual_exposure {
            let (from, to) = manual.framerate_range;
            if from.per_second() > to.per_second() {
                return Err(anyhow!(
                    "manual framerate range {}..{} is inverted",
                    from,
                    to
                ));
            }
            if manual.awb_gains.0 <= 0.0 || manual.awb_gains.1 <= 0.0 {
                return Err(anyhow!("manual awb gains must be positive"));
            }
        }
        if self.image_file_prefix.is_empty() {
            return Err(anyhow!("output.prefix must not be empty"));
        }
        validate_strftime(&self.timestamp_format, "capture.timestamp_format")?;
        validate_strftime(
            &self.filename_timestamp_format,
            "capture.filename_timestamp_format",
        )?;
        Ok(())
    }

    /// The settings block handed to the camera on (re)configuration.
    pub fn camera_settings(&self) -> CameraSettings {
        CameraSettings {
            rotation: self.rotation,
            width: self.resolution_width,
            height: self.resolution_height,
            zoom: self.zoom,
            led: self.enable_led,
            manual: self.manual_exposure.clone(),
        }
    }
}

fn parse_manual(manual: ManualFile) -> Result<ManualExposure> {
    let from: Framerate = manual.framerate_range[0]
        .parse()
        .context("setup.manual.framerate_range lower bound")?;
    let to: Framerate = manual.framerate_range[1]
        .parse()
        .context("setup.manual.framerate_range upper bound")?;
    Ok(ManualExposure {
        shutter_micros: manual.shutter_micros,
        iso: manual.iso,
        framerate_range: (from, to),
        awb_gains: (manual.awb_gains[0], manual.awb_gains[1]),
    })
}

fn validate_strftime(format: &str, field: &str) -> Result<()> {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(anyhow!("{} '{}' is not a valid strftime format", field, format));
    }
    Ok(())
}

fn non_negative_secs(value: f64, field: &str) -> Result<Duration> {
    if !value.is_finite() || value < 0.0 {
        return Err(anyhow!("{} must be a non-negative number, got {}", field, value));
    }
    Ok(Duration::from_secs_f64(value))
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
