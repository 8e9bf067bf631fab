use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use camwatch::{CamwatchConfig, Framerate};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in ["CAMWATCH_CONFIG", "CAMWATCH_DEVICE", "CAMWATCH_OUTPUT_DIR"] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "device": "synthetic://bench",
            "resolution": { "width": 1920, "height": 1080 },
            "crop": [1, 1800, 1, 900],
            "motion": {
                "diff_threshold": 1000000,
                "frames_threshold": 3,
                "image_percent": 50
            },
            "time_lapse_seconds": 600,
            "do_loop": true,
            "wait_seconds": 1.5,
            "setup": {
                "timeout_seconds": 300,
                "settle_seconds": 3.0,
                "rotation": 180,
                "zoom": [0.1, 0.1, 0.8, 0.8],
                "enable_led": false,
                "log_settings": true,
                "manual": {
                    "shutter_micros": 100000,
                    "iso": 800,
                    "framerate_range": ["1/6", "30/1"],
                    "awb_gains": [1.5, 1.2]
                }
            },
            "capture": {
                "fast_path": true,
                "annotate_timestamp": true,
                "timestamp_format": "%Y-%m-%d %H:%M",
                "filename_timestamp_format": "%Y%m%d-%H%M%S"
            },
            "output": {
                "directory": "archive",
                "prefix": "porch",
                "diff_score_in_filename": true,
                "debug_images": true
            }
        }"#,
    );

    std::env::set_var("CAMWATCH_CONFIG", file.path());
    std::env::set_var("CAMWATCH_OUTPUT_DIR", "/var/lib/camwatch");

    let cfg = CamwatchConfig::load().expect("load config");

    assert_eq!(cfg.device, "synthetic://bench");
    assert_eq!(cfg.resolution_width, 1920);
    assert_eq!(cfg.resolution_height, 1080);
    let crop = cfg.crop.expect("crop enabled");
    assert_eq!((crop.width(), crop.height()), (1799, 899));
    assert_eq!(cfg.diff_threshold, 1_000_000);
    assert_eq!(cfg.motion_frames_threshold, 3);
    assert_eq!(cfg.motion_image_percent, 50);
    assert_eq!(cfg.time_lapse, Some(Duration::from_secs(600)));
    assert!(cfg.do_loop);
    assert_eq!(cfg.wait, Duration::from_secs_f64(1.5));
    assert_eq!(cfg.setup_timeout, Some(Duration::from_secs(300)));
    assert_eq!(cfg.settle, Duration::from_secs_f64(3.0));
    assert_eq!(cfg.rotation, 180);
    assert!(cfg.log_camera_settings);
    let manual = cfg.manual_exposure.expect("manual exposure");
    assert_eq!(manual.shutter_micros, 100_000);
    assert_eq!(manual.iso, 800);
    assert_eq!(manual.framerate_range.0, Framerate { num: 1, den: 6 });
    assert_eq!(manual.framerate_range.1, Framerate { num: 30, den: 1 });
    assert_eq!(manual.awb_gains, (1.5, 1.2));
    assert!(cfg.fast_capture);
    assert!(cfg.annotate_timestamp);
    assert_eq!(cfg.timestamp_format, "%Y-%m-%d %H:%M");
    // Env override wins over the file value.
    assert_eq!(cfg.output_directory.to_str().unwrap(), "/var/lib/camwatch");
    assert_eq!(cfg.image_file_prefix, "porch");
    assert!(cfg.diff_score_in_filename);
    assert!(cfg.debug_images);

    clear_env();
}

#[test]
fn missing_config_env_yields_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = CamwatchConfig::load().expect("defaults");
    assert_eq!(cfg.device, "synthetic://camera");
    assert_eq!(cfg.crop, None);
    assert_eq!(cfg.time_lapse, None);
    assert!(cfg.do_loop);

    clear_env();
}

#[test]
fn partially_zero_crop_fails_fast() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(r#"{ "crop": [0, 100, 1, 50] }"#);
    std::env::set_var("CAMWATCH_CONFIG", file.path());

    let err = CamwatchConfig::load().unwrap_err();
    assert!(err.to_string().contains("crop"), "{}", err);

    clear_env();
}

#[test]
fn crop_outside_resolution_fails_fast() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "resolution": { "width": 640, "height": 480 },
            "crop": [1, 700, 1, 400]
        }"#,
    );
    std::env::set_var("CAMWATCH_CONFIG", file.path());

    assert!(CamwatchConfig::load().is_err());

    clear_env();
}

#[test]
fn malformed_framerate_fails_fast() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "setup": {
                "manual": {
                    "shutter_micros": 100000,
                    "iso": 800,
                    "framerate_range": ["fast", "30/1"],
                    "awb_gains": [1.5, 1.2]
                }
            }
        }"#,
    );
    std::env::set_var("CAMWATCH_CONFIG", file.path());

    assert!(CamwatchConfig::load().is_err());

    clear_env();
}

#[test]
fn zero_image_percent_fails_fast() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(r#"{ "motion": { "image_percent": 0 } }"#);
    std::env::set_var("CAMWATCH_CONFIG", file.path());

    assert!(CamwatchConfig::load().is_err());

    clear_env();
}
