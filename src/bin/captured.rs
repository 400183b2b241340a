//! captured - frame capture daemon
//!
//! This daemon:
//! 1. Loads configuration (CAPTURE_CONFIG file + CAPTURE_* env overrides)
//! 2. Creates the upload root
//! 3. Serves the capture API (start / stop / status)
//! 4. Stops every capture job on Ctrl-C

use anyhow::{anyhow, Result};
use std::sync::mpsc;
use std::sync::Arc;

use frame_capture::{
    api::{ApiConfig, ApiServer},
    manager_from_config, CaptureConfig,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = CaptureConfig::load()?;
    let manager = Arc::new(manager_from_config(&cfg)?);
    log::info!(
        "captured {} writing frames under {}",
        env!("CARGO_PKG_VERSION"),
        cfg.upload_root.display()
    );
    log::info!(
        "default source {} every {:?}, jpeg quality {}",
        cfg.rtsp.url,
        cfg.interval,
        cfg.jpeg_quality
    );

    let api_config = ApiConfig {
        addr: cfg.api_addr.clone(),
    };
    let api_handle = ApiServer::new(api_config, manager.clone()).spawn()?;
    log::info!("capture api listening on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("captured waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server and capture jobs...");
    api_handle.stop()?;
    manager.shutdown();

    Ok(())
}
