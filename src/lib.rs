//! Frame capture service
//!
//! Samples still frames from live video sources (RTSP cameras) at a fixed
//! interval and stores them per job as raw material for photogrammetry
//! reconstruction.
//!
//! # Module Structure
//!
//! - `capture`: job registry and capture loops (`CaptureManager`)
//! - `ingest`: video sources (RTSP, synthetic `stub://` streams)
//! - `sink`: on-disk frame layout (`<upload_root>/<job_id>/frame_0001.jpg`)
//! - `frame`: decoded RGB frames
//! - `config`: file + environment configuration
//! - `api`: thin HTTP/JSON surface over the manager

pub mod api;
pub mod capture;
pub mod config;
pub mod frame;
pub mod ingest;
pub mod sink;

pub use capture::{CaptureManager, CaptureSettings, CaptureStatus, JobState, RetryPolicy};
pub use config::CaptureConfig;
pub use frame::Frame;
pub use ingest::{RtspConfig, RtspSource, RtspSourceFactory, SourceFactory, VideoSource};
pub use sink::{frame_filename, DirectorySink, FrameSink, PHOTOGRAMMETRY_JPEG_QUALITY};

use std::sync::Arc;

/// Build a manager wired to RTSP sources and the on-disk sink from `cfg`.
pub fn manager_from_config(cfg: &CaptureConfig) -> anyhow::Result<CaptureManager> {
    let sink = DirectorySink::new(cfg.upload_root.clone());
    sink.ensure_root()?;
    Ok(CaptureManager::new(
        cfg.capture_settings(),
        Arc::new(RtspSourceFactory::new(cfg.rtsp_template())),
        Arc::new(sink),
    ))
}
