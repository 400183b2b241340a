use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use frame_capture::config::CaptureConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "CAPTURE_CONFIG",
        "CAPTURE_RTSP_URL",
        "CAPTURE_INTERVAL_SECS",
        "CAPTURE_UPLOAD_ROOT",
        "CAPTURE_API_ADDR",
        "CAPTURE_JPEG_QUALITY",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = CaptureConfig::load().expect("load defaults");

    assert_eq!(cfg.upload_root, std::path::PathBuf::from("data/uploads"));
    assert_eq!(cfg.api_addr, "127.0.0.1:8000");
    assert_eq!(cfg.rtsp.url, "stub://camera");
    assert_eq!(cfg.interval, Duration::from_secs(2));
    assert_eq!(cfg.connect_attempts, 3);
    assert_eq!(cfg.connect_backoff, Duration::from_secs(2));
    assert_eq!(cfg.jpeg_quality, 95);

    let settings = cfg.capture_settings();
    assert_eq!(settings.default_source_uri, "stub://camera");
    assert_eq!(settings.retry.attempts, 3);
    assert_eq!(settings.retry.backoff, Duration::from_secs(2));
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "upload_root": "/srv/reef/uploads",
        "api": { "addr": "0.0.0.0:9000" },
        "rtsp": {
            "url": "rtsp://rov-camera:554/main",
            "width": 1280,
            "height": 720
        },
        "capture": {
            "interval_secs": 1.5,
            "connect_attempts": 5,
            "connect_backoff_ms": 500,
            "read_timeout_ms": 4000,
            "jpeg_quality": 90
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("CAPTURE_CONFIG", file.path());
    std::env::set_var("CAPTURE_RTSP_URL", "rtsp://backup-camera/stream");
    std::env::set_var("CAPTURE_INTERVAL_SECS", "0.5");

    let cfg = CaptureConfig::load().expect("load config");

    assert_eq!(cfg.upload_root, std::path::PathBuf::from("/srv/reef/uploads"));
    assert_eq!(cfg.api_addr, "0.0.0.0:9000");
    assert_eq!(cfg.rtsp.url, "rtsp://backup-camera/stream");
    assert_eq!(cfg.rtsp.width, 1280);
    assert_eq!(cfg.rtsp.height, 720);
    assert_eq!(cfg.interval, Duration::from_millis(500));
    assert_eq!(cfg.connect_attempts, 5);
    assert_eq!(cfg.connect_backoff, Duration::from_millis(500));
    assert_eq!(cfg.read_timeout, Duration::from_secs(4));
    assert_eq!(cfg.jpeg_quality, 90);

    let template = cfg.rtsp_template();
    assert_eq!(template.width, 1280);
    assert_eq!(template.frame_timeout, Duration::from_secs(4));

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CAPTURE_INTERVAL_SECS", "soon");
    assert!(CaptureConfig::load().is_err());
    clear_env();

    std::env::set_var("CAPTURE_INTERVAL_SECS", "-1");
    assert!(CaptureConfig::load().is_err());
    clear_env();

    std::env::set_var("CAPTURE_JPEG_QUALITY", "0");
    assert!(CaptureConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{"capture": {"connect_attempts": 0}}"#)
        .expect("write config");
    std::env::set_var("CAPTURE_CONFIG", file.path());
    assert!(CaptureConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"{ not json").expect("write config");
    std::env::set_var("CAPTURE_CONFIG", file.path());
    let err = CaptureConfig::load().expect_err("invalid json");
    assert!(err.to_string().contains("invalid config file"));
    clear_env();
}

#[test]
fn rejects_zero_or_oversized_frame_geometry() {
    let _guard = ENV_LOCK.lock().unwrap();

    for rtsp in [
        r#"{"width": 0, "height": 480}"#,
        r#"{"width": 640, "height": 0}"#,
        r#"{"width": 70000, "height": 70000}"#,
    ] {
        clear_env();
        let mut file = NamedTempFile::new().expect("temp config");
        let json = format!(r#"{{"rtsp": {}}}"#, rtsp);
        std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
        std::env::set_var("CAPTURE_CONFIG", file.path());

        let err = CaptureConfig::load().expect_err("geometry should be rejected");
        assert!(err.to_string().contains("frame"), "unexpected error: {}", err);
    }
    clear_env();
}
