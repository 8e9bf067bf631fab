//! Camera session management.
//!
//! A `CameraSession` owns the device handle for the controller's entire
//! run. Reconfiguration is cached: while a non-zero setup timeout has not
//! elapsed since the last successful setup, `configure` is a no-op, which
//! avoids re-locking white balance on tight capture intervals. Release is
//! idempotent and guaranteed by a `Drop` backstop.

use std::thread;
use std::time::Instant;

use crate::camera::{CameraDevice, CameraError, CameraSettings, PixelFormat, RawCapture};
use crate::config::CamwatchConfig;
use crate::frame::aligned_dimensions;

pub struct CameraSession {
    device: Box<dyn CameraDevice>,
    last_setup: Option<Instant>,
    released: bool,
}

impl CameraSession {
    pub fn new(device: Box<dyn CameraDevice>) -> Self {
        Self {
            device,
            last_setup: None,
            released: false,
        }
    }

    /// Apply camera settings unless a prior setup is still fresh.
    ///
    /// After applying, sleeps for the configured settle delay so automatic
    /// white balance converges before the next capture, then stamps the
    /// setup time.
    pub fn configure(&mut self, config: &CamwatchConfig) -> Result<(), CameraError> {
        if let (Some(last), Some(timeout)) = (self.last_setup, config.setup_timeout) {
            if last.elapsed() <= timeout {
                return Ok(());
            }
        }

        log::info!("configuring camera");
        let settings = config.camera_settings();
        self.device.apply(&settings)?;
        if config.log_camera_settings {
            log_settings(&settings);
        }

        if !config.settle.is_zero() {
            log::info!(
                "waiting {:.1}s for white balance to settle",
                config.settle.as_secs_f64()
            );
            thread::sleep(config.settle);
        }
        self.last_setup = Some(Instant::now());
        Ok(())
    }

    /// Update the per-frame overlay text.
    pub fn annotate(&mut self, text: Option<&str>) -> Result<(), CameraError> {
        self.device.annotate(text)
    }

    /// Capture one frame at the alignment-padded dimensions.
    pub fn capture(&mut self, config: &CamwatchConfig) -> Result<RawCapture, CameraError> {
        let (width, height) = aligned_dimensions(
            config.resolution_width,
            config.resolution_height,
            config.fast_capture,
        );
        let format = PixelFormat::Rgb24;
        let mut data = vec![0u8; width as usize * height as usize * format.bytes_per_pixel()];
        self.device
            .capture_into(&mut data, width, height, format, config.fast_capture)?;
        Ok(RawCapture {
            data,
            width,
            height,
            format,
        })
    }

    /// Close the device. Safe to call more than once; only the first call
    /// reaches the device.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.device.close();
        self.released = true;
        log::info!("camera released");
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.release();
    }
}

fn log_settings(settings: &CameraSettings) {
    log::info!("camera settings:");
    log::info!("  rotation         {}", settings.rotation);
    log::info!("  resolution       {}x{}", settings.width, settings.height);
    log::info!("  zoom             {:?}", settings.zoom);
    log::info!("  led              {}", settings.led);
    if let Some(manual) = &settings.manual {
        log::info!("  shutter          {}us", manual.shutter_micros);
        log::info!("  iso              {}", manual.iso);
        log::info!(
            "  framerate range  {}..{}",
            manual.framerate_range.0,
            manual.framerate_range.1
        );
        log::info!(
            "  awb gains        red {:.2} blue {:.2}",
            manual.awb_gains.0,
            manual.awb_gains.1
        );
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
