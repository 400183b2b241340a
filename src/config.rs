use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::{CaptureSettings, RetryPolicy, DEFAULT_FINISHED_JOB_LIMIT};
use crate::ingest::RtspConfig;

const DEFAULT_UPLOAD_ROOT: &str = "data/uploads";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_RTSP_URL: &str = "stub://camera";
const DEFAULT_RTSP_WIDTH: u32 = 640;
const DEFAULT_RTSP_HEIGHT: u32 = 480;
const DEFAULT_INTERVAL_SECS: f64 = 2.0;
const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;
const DEFAULT_CONNECT_BACKOFF_MS: u64 = 2_000;
const DEFAULT_READ_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_JPEG_QUALITY: u8 = crate::sink::PHOTOGRAMMETRY_JPEG_QUALITY;

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    upload_root: Option<PathBuf>,
    api: Option<ApiConfigFile>,
    rtsp: Option<RtspConfigFile>,
    capture: Option<CaptureTuningFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RtspConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureTuningFile {
    interval_secs: Option<f64>,
    connect_attempts: Option<u32>,
    connect_backoff_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
    jpeg_quality: Option<u8>,
    finished_job_limit: Option<usize>,
}

/// Service configuration: JSON file named by `CAPTURE_CONFIG`, then env overrides.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub upload_root: PathBuf,
    pub api_addr: String,
    pub rtsp: RtspSettings,
    pub interval: Duration,
    pub connect_attempts: u32,
    pub connect_backoff: Duration,
    pub read_timeout: Duration,
    pub jpeg_quality: u8,
    /// Finished jobs whose final status stays queryable.
    pub finished_job_limit: usize,
}

#[derive(Debug, Clone)]
pub struct RtspSettings {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

impl CaptureConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CAPTURE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CaptureConfigFile) -> Result<Self> {
        let upload_root = file
            .upload_root
            .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_ROOT));
        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
        let rtsp_file = file.rtsp.unwrap_or_default();
        let rtsp = RtspSettings {
            url: rtsp_file.url.unwrap_or_else(|| DEFAULT_RTSP_URL.to_string()),
            width: rtsp_file.width.unwrap_or(DEFAULT_RTSP_WIDTH),
            height: rtsp_file.height.unwrap_or(DEFAULT_RTSP_HEIGHT),
        };
        let tuning = file.capture.unwrap_or_default();
        let interval_secs = tuning.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS);
        Ok(Self {
            upload_root,
            api_addr,
            rtsp,
            interval: interval_from_secs(interval_secs)?,
            connect_attempts: tuning
                .connect_attempts
                .unwrap_or(DEFAULT_CONNECT_ATTEMPTS),
            connect_backoff: Duration::from_millis(
                tuning
                    .connect_backoff_ms
                    .unwrap_or(DEFAULT_CONNECT_BACKOFF_MS),
            ),
            read_timeout: Duration::from_millis(
                tuning.read_timeout_ms.unwrap_or(DEFAULT_READ_TIMEOUT_MS),
            ),
            jpeg_quality: tuning.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            finished_job_limit: tuning
                .finished_job_limit
                .unwrap_or(DEFAULT_FINISHED_JOB_LIMIT),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("CAPTURE_RTSP_URL") {
            if !url.trim().is_empty() {
                self.rtsp.url = url.trim().to_string();
            }
        }
        if let Ok(root) = std::env::var("CAPTURE_UPLOAD_ROOT") {
            if !root.trim().is_empty() {
                self.upload_root = PathBuf::from(root);
            }
        }
        if let Ok(addr) = std::env::var("CAPTURE_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(interval) = std::env::var("CAPTURE_INTERVAL_SECS") {
            if !interval.trim().is_empty() {
                let secs: f64 = interval.trim().parse().map_err(|_| {
                    anyhow!("CAPTURE_INTERVAL_SECS must be a number of seconds")
                })?;
                self.interval = interval_from_secs(secs)?;
            }
        }
        if let Ok(quality) = std::env::var("CAPTURE_JPEG_QUALITY") {
            if !quality.trim().is_empty() {
                self.jpeg_quality = quality
                    .trim()
                    .parse()
                    .map_err(|_| anyhow!("CAPTURE_JPEG_QUALITY must be an integer 1-100"))?;
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!("jpeg quality must be between 1 and 100"));
        }
        if self.connect_attempts == 0 {
            return Err(anyhow!("connect attempts must be at least 1"));
        }
        if self.read_timeout.is_zero() {
            return Err(anyhow!("read timeout must be greater than zero"));
        }
        url::Url::parse(&self.rtsp.url)
            .map_err(|e| anyhow!("invalid default RTSP url '{}': {}", self.rtsp.url, e))?;
        self.rtsp_template().frame_len()?;
        Ok(())
    }

    /// Resolved per-job defaults handed to the capture manager.
    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            default_source_uri: self.rtsp.url.clone(),
            default_interval: self.interval,
            retry: RetryPolicy {
                attempts: self.connect_attempts,
                backoff: self.connect_backoff,
            },
            read_timeout: self.read_timeout,
            jpeg_quality: self.jpeg_quality,
            finished_job_limit: self.finished_job_limit,
        }
    }

    /// Template for RTSP sources; the URL is filled in per job.
    pub fn rtsp_template(&self) -> RtspConfig {
        RtspConfig {
            url: self.rtsp.url.clone(),
            width: self.rtsp.width,
            height: self.rtsp.height,
            frame_timeout: self.read_timeout,
        }
    }
}

/// Sampling intervals must be finite and positive.
pub fn interval_from_secs(secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(anyhow!(
            "capture interval must be a positive number of seconds (got {})",
            secs
        ));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| anyhow!("invalid capture interval: {}", e))
}

fn read_config_file(path: &Path) -> Result<CaptureConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
