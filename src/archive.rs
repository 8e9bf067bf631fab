//! Date-partitioned image archive.
//!
//! Images land under `{root}/{YYYY}/{MM}/{DD}/` as
//! `{prefix}-{timestamp}-{suffix}.jpg`, where the suffix is either eight
//! random hex characters or, when configured and a score exists, the diff
//! score grouped in thousands with periods (`1.234.567`) so the value stays
//! readable and filename-safe.
//!
//! Directory creation is synchronous; the JPEG encode and write run on a
//! spawned thread so disk latency never stalls the capture cadence. Writes
//! are fire-and-forget: failures are logged inside the writer thread and
//! nothing is reported back to the loop.

use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{anyhow, Context, Result};
use chrono::{Datelike, Local, NaiveDate};
use image::{DynamicImage, GrayImage};
use rand::RngCore;

use crate::frame::CapturedFrame;

/// Subdirectory for smoothed comparison frames in debug mode.
const PROCESSED_SUBDIR: &str = "processed";

pub struct ImageArchive {
    root: PathBuf,
    prefix: String,
    diff_score_in_filename: bool,
}

impl ImageArchive {
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>, diff_score_in_filename: bool) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
            diff_score_in_filename,
        }
    }

    /// Schedule a write of `frame` and return the destination path.
    ///
    /// The day directory is created here, synchronously, so a dead output
    /// disk surfaces as an iteration error; the write itself is detached.
    pub fn store(&self, frame: &CapturedFrame, score: Option<u64>) -> Result<PathBuf> {
        let dir = self.day_directory(Local::now().date_naive())?;
        let filename = self.filename(&frame.stem, score);
        let path = dir.join(&filename);
        log::info!("writing {}", filename);
        spawn_write(path.clone(), DynamicImage::ImageRgb8(frame.image.clone()));
        Ok(path)
    }

    /// Schedule writes of the previous/current smoothed frames next to a
    /// saved image, under `processed/`.
    pub fn store_debug(
        &self,
        saved: &Path,
        previous: &GrayImage,
        current: &GrayImage,
    ) -> Result<()> {
        let dir = saved
            .parent()
            .ok_or_else(|| anyhow!("saved image path {} has no parent", saved.display()))?
            .join(PROCESSED_SUBDIR);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create debug directory {}", dir.display()))?;
        let stem = saved
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| anyhow!("saved image path {} has no stem", saved.display()))?;

        spawn_write(
            dir.join(format!("{stem}_p0.jpg")),
            DynamicImage::ImageLuma8(previous.clone()),
        );
        spawn_write(
            dir.join(format!("{stem}_p1.jpg")),
            DynamicImage::ImageLuma8(current.clone()),
        );
        Ok(())
    }

    fn day_directory(&self, date: NaiveDate) -> Result<PathBuf> {
        let dir = self
            .root
            .join(format!("{:04}", date.year()))
            .join(format!("{:02}", date.month()))
            .join(format!("{:02}", date.day()));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create archive directory {}", dir.display()))?;
        Ok(dir)
    }

    fn filename(&self, stem: &str, score: Option<u64>) -> String {
        let suffix = match score {
            Some(score) if self.diff_score_in_filename => group_thousands(score),
            _ => random_suffix(),
        };
        format!("{}-{}-{}.jpg", self.prefix, stem, suffix)
    }
}

fn spawn_write(path: PathBuf, image: DynamicImage) {
    thread::spawn(move || {
        if let Err(err) = image.save(&path) {
            log::error!("image write failed for {}: {}", path.display(), err);
        }
    });
}

/// Format a score with period-separated thousands groups: `1.234.567`.
pub fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    let offset = digits.len() % 3;
    for (i, ch) in digits.chars().enumerate() {
        if i != 0 && (i + 3 - offset) % 3 == 0 {
            out.push('.');
        }
        out.push(ch);
    }
    out
}

fn random_suffix() -> String {
    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{:08x}", u32::from_le_bytes(bytes))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
