//! camwatchd - the capture daemon.
//!
//! Loads the configuration, opens the configured camera device, wires the
//! interrupt handler to a shutdown flag, and hands control to the capture
//! loop. An interrupt is a normal, logged shutdown path: the loop notices
//! the flag and releases the camera before the process exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use camwatch::{open_device, CamwatchConfig, CaptureController, LoopExit};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = CamwatchConfig::load()?;
    let device = open_device(&config.device)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })?;

    log::info!(
        "camwatchd {} starting; device={} archive={}",
        env!("CARGO_PKG_VERSION"),
        config.device,
        config.output_directory.display()
    );
    log::info!(
        "resolution {}x{}, diff threshold {}, motion frames {}, time lapse {}",
        config.resolution_width,
        config.resolution_height,
        config.diff_threshold,
        config.motion_frames_threshold,
        config
            .time_lapse
            .map(|interval| format!("{}s", interval.as_secs()))
            .unwrap_or_else(|| "off".to_string())
    );

    let mut controller = CaptureController::new(config, device, shutdown);
    let exit = controller.run();
    if exit == LoopExit::ErrorLimit {
        std::process::exit(1);
    }
    Ok(())
}
