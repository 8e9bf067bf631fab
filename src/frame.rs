//! Frame normalization.
//!
//! The capture hardware refuses arbitrary resolutions: the still port wants
//! widths in multiples of 32, the streaming (fast) port multiples of 16,
//! and both want heights in multiples of 16. Captures therefore come back
//! alignment-padded, and this module crops them back down to exactly the
//! configured geometry, then applies the optional secondary crop rectangle.
//!
//! Output dimensions are a function of configuration only, never of the
//! padding a particular capture path introduced.

use anyhow::{anyhow, Result};
use image::{imageops, RgbImage};

use crate::camera::{PixelFormat, RawCapture};

/// Width alignment for the still-capture path.
pub const STILL_WIDTH_ALIGN: u32 = 32;
/// Width alignment for the fast (streaming) capture path.
pub const FAST_WIDTH_ALIGN: u32 = 16;
/// Height alignment for both paths.
pub const HEIGHT_ALIGN: u32 = 16;

fn align_up(value: u32, multiple: u32) -> u32 {
    value.div_ceil(multiple) * multiple
}

/// The padded buffer dimensions a capture at `width` x `height` requires.
pub fn aligned_dimensions(width: u32, height: u32, fast_path: bool) -> (u32, u32) {
    let width_align = if fast_path {
        FAST_WIDTH_ALIGN
    } else {
        STILL_WIDTH_ALIGN
    };
    (align_up(width, width_align), align_up(height, HEIGHT_ALIGN))
}

/// A validated secondary crop rectangle, 1-based bounds as configured.
///
/// The applied region has origin `(x1-1, y1-1)` and size
/// `(x2-x1) x (y2-y1)`. An all-zero rectangle means "disabled" and parses
/// to `None`; a rectangle with only some bounds zero is rejected outright
/// rather than left to behave unpredictably at capture time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropRect {
    x1: u32,
    x2: u32,
    y1: u32,
    y2: u32,
}

impl CropRect {
    /// Parse configured bounds `[x1, x2, y1, y2]`.
    pub fn from_bounds(bounds: [u32; 4]) -> Result<Option<Self>> {
        if bounds == [0, 0, 0, 0] {
            return Ok(None);
        }
        let [x1, x2, y1, y2] = bounds;
        if x1 == 0 || x2 == 0 || y1 == 0 || y2 == 0 {
            return Err(anyhow!(
                "crop bounds must be all zero (disabled) or all non-zero, got {:?}",
                bounds
            ));
        }
        if x2 <= x1 || y2 <= y1 {
            return Err(anyhow!(
                "crop bounds need x2 > x1 and y2 > y1, got {:?}",
                bounds
            ));
        }
        Ok(Some(Self { x1, x2, y1, y2 }))
    }

    /// Check that the rectangle fits a `width` x `height` frame.
    pub fn validate_within(&self, width: u32, height: u32) -> Result<()> {
        if self.x2 > width || self.y2 > height {
            return Err(anyhow!(
                "crop bounds x2={} y2={} exceed the {}x{} frame",
                self.x2,
                self.y2,
                width,
                height
            ));
        }
        Ok(())
    }

    pub fn x0(&self) -> u32 {
        self.x1 - 1
    }

    pub fn y0(&self) -> u32 {
        self.y1 - 1
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }
}

/// A normalized frame plus the timestamp-derived filename stem captured
/// alongside it.
pub struct CapturedFrame {
    pub image: RgbImage,
    pub stem: String,
}

/// Crop an aligned capture down to the configured geometry.
pub fn normalize(
    raw: RawCapture,
    width: u32,
    height: u32,
    crop: Option<&CropRect>,
) -> Result<RgbImage> {
    let expected = raw.width as usize * raw.height as usize * raw.format.bytes_per_pixel();
    if raw.data.len() != expected {
        return Err(anyhow!(
            "capture buffer holds {} bytes, {}x{} {:?} needs {}",
            raw.data.len(),
            raw.width,
            raw.height,
            raw.format,
            expected
        ));
    }
    if width > raw.width || height > raw.height {
        return Err(anyhow!(
            "aligned capture {}x{} is smaller than the configured {}x{}",
            raw.width,
            raw.height,
            width,
            height
        ));
    }

    let mut data = raw.data;
    if raw.format == PixelFormat::Bgr24 {
        for pixel in data.chunks_exact_mut(3) {
            pixel.swap(0, 2);
        }
    }
    let aligned = RgbImage::from_raw(raw.width, raw.height, data).ok_or_else(|| {
        anyhow!(
            "capture buffer does not form a {}x{} image",
            raw.width,
            raw.height
        )
    })?;

    // Discard the alignment padding rows/columns.
    let mut image = imageops::crop_imm(&aligned, 0, 0, width, height).to_image();

    if let Some(rect) = crop {
        rect.validate_within(width, height)?;
        image = imageops::crop_imm(&image, rect.x0(), rect.y0(), rect.width(), rect.height())
            .to_image();
    }
    Ok(image)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
