//! capture_job - run a single capture job from the command line

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use frame_capture::{manager_from_config, CaptureConfig};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Job identifier; frames land in <upload-root>/<job-id>/.
    #[arg(long)]
    job_id: String,
    /// Source URL (defaults to the configured RTSP URL).
    #[arg(long, env = "CAPTURE_RTSP_URL")]
    url: Option<String>,
    /// Seconds between frames (defaults to the configured interval).
    #[arg(long)]
    interval: Option<f64>,
    /// Stop after this many seconds; runs until Ctrl-C if omitted.
    #[arg(long)]
    duration: Option<f64>,
    /// Override the configured upload root.
    #[arg(long)]
    upload_root: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = CaptureConfig::load()?;
    if let Some(root) = args.upload_root {
        cfg.upload_root = root;
    }
    let run_for = match args.duration {
        Some(secs) => Some(frame_capture::config::interval_from_secs(secs)?),
        None => None,
    };

    let manager = manager_from_config(&cfg)?;
    manager.start(&args.job_id, args.url.as_deref(), args.interval)?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let poll = Duration::from_millis(250);
    let mut waited = Duration::ZERO;
    loop {
        match rx.recv_timeout(poll) {
            Ok(()) => {
                log::info!("interrupted");
                break;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
        waited += poll;
        let status = manager.status(&args.job_id);
        if !status.active {
            log::warn!("capture ended on its own (state {:?})", status.state);
            break;
        }
        if run_for.is_some_and(|limit| waited >= limit) {
            break;
        }
    }

    let frames = manager.stop(&args.job_id);
    let status = manager.status(&args.job_id);
    manager.shutdown();
    println!(
        "{} frames captured for {} into {}",
        frames,
        args.job_id,
        cfg.upload_root.join(&args.job_id).display()
    );
    if status.write_failures > 0 {
        println!("{} frames could not be written", status.write_failures);
    }
    Ok(())
}
