//! camwatch - motion-triggered still capture for a single camera.
//!
//! A continuously-running controller for small embedded rigs: configure the
//! camera (cached behind a setup timeout), capture a frame, decide via
//! frame differencing whether it shows motion or a time-lapse boundary, and
//! if so persist it to a date-partitioned archive - all while tolerating
//! transient capture failures without crashing the process.
//!
//! # Module Structure
//!
//! - `camera`: the device contract and the `synthetic://` backend
//! - `session`: device ownership, setup caching, guaranteed release
//! - `frame`: alignment-padding removal and crop normalization
//! - `motion`: smoothed-frame scoring, hysteresis, time-lapse policy
//! - `archive`: date-partitioned fire-and-forget JPEG persistence
//! - `controller`: the capture loop and its error/termination policy
//! - `config`: the typed, validated daemon configuration

pub mod archive;
pub mod camera;
pub mod config;
pub mod controller;
pub mod frame;
pub mod motion;
pub mod session;

pub use archive::{group_thousands, ImageArchive};
pub use camera::{
    open_device, CameraDevice, CameraError, CameraSettings, Framerate, ManualExposure,
    PixelFormat, RawCapture, SyntheticCamera,
};
pub use config::CamwatchConfig;
pub use controller::{CaptureController, IterationError, LoopExit, REPEAT_ERROR_LIMIT};
pub use frame::{aligned_dimensions, normalize, CapturedFrame, CropRect};
pub use motion::{diff_score, FrameState, MotionDecision, MotionDetector};
pub use session::CameraSession;
