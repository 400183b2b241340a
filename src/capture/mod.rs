//! Capture job lifecycle.
//!
//! `CaptureManager` is the single entry point for starting, stopping and
//! querying capture jobs. Each job runs its own loop on a dedicated thread:
//!
//! ```text
//! Starting -> Connecting -> Capturing -> Stopped
//!                  \
//!                   -> Failed   (connection attempts exhausted)
//! Capturing -> Failed          (video source crashed mid-stream)
//! ```
//!
//! Capture-time failures are never returned to the caller. They show up in
//! `status` as `active: false` with state `failed`, or as `write_failures`.
//!
//! The registry lock only guards map access. Loops never take it, so `status`
//! never waits behind a capture iteration. Loop threads that have exited are
//! joined on the next `start` or `stop`. At most
//! `CaptureSettings::finished_job_limit` finished jobs keep their final
//! status; older ones are forgotten and read as unknown.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

mod job;
mod reader;
mod worker;

pub use job::{CaptureStatus, JobState};

use job::JobShared;
use worker::{run_capture_loop, JobSpec};

use crate::ingest::SourceFactory;
use crate::sink::{validate_job_id, FrameSink};

/// How a loop retries its initial connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total open attempts before the job fails.
    pub attempts: u32,
    /// Delay between consecutive attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

pub const DEFAULT_FINISHED_JOB_LIMIT: usize = 256;

/// Resolved defaults applied to every job.
#[derive(Clone, Debug)]
pub struct CaptureSettings {
    /// Used when a job does not name a source.
    pub default_source_uri: String,
    /// Used when a job gives no interval, or a non-positive one.
    pub default_interval: Duration,
    pub retry: RetryPolicy,
    /// Longest a single frame read may take before it counts as dropped.
    pub read_timeout: Duration,
    pub jpeg_quality: u8,
    /// Finished jobs whose final status is kept for `status`/`stop`.
    pub finished_job_limit: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            default_source_uri: "stub://camera".to_string(),
            default_interval: Duration::from_secs(2),
            retry: RetryPolicy::default(),
            read_timeout: Duration::from_secs(10),
            jpeg_quality: crate::sink::PHOTOGRAMMETRY_JPEG_QUALITY,
            finished_job_limit: DEFAULT_FINISHED_JOB_LIMIT,
        }
    }
}

struct JobEntry {
    shared: Arc<JobShared>,
    join: Option<JoinHandle<()>>,
    /// Count returned by the first `stop`; later stops return it again.
    stopped_with: Option<u64>,
    /// Set once the loop thread has exited and been joined.
    finished_at: Option<Instant>,
}

impl JobEntry {
    /// Join the loop thread if it has already exited.
    fn reap(&mut self, job_id: &str) {
        if !self.join.as_ref().is_some_and(JoinHandle::is_finished) {
            return;
        }
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("capture {}: loop thread panicked", job_id);
            }
        }
        self.finished_at = Some(Instant::now());
    }

    /// Cancel the loop and wait for it to exit.
    fn shutdown(mut self, job_id: &str) {
        self.shared.cancel();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("capture {}: loop thread panicked", job_id);
            }
        }
    }
}

/// Registry of capture jobs. Cheap to share behind an `Arc`.
pub struct CaptureManager {
    settings: CaptureSettings,
    sources: Arc<dyn SourceFactory>,
    sink: Arc<dyn FrameSink>,
    jobs: Mutex<HashMap<String, JobEntry>>,
    /// Serialises `start`/`shutdown` so a restart cannot race another restart.
    lifecycle: Mutex<()>,
}

impl CaptureManager {
    pub fn new(
        settings: CaptureSettings,
        sources: Arc<dyn SourceFactory>,
        sink: Arc<dyn FrameSink>,
    ) -> Self {
        Self {
            settings,
            sources,
            sink,
            jobs: Mutex::new(HashMap::new()),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Start capturing for `job_id`. Returns once the loop is launched.
    ///
    /// `source_uri` and `interval` fall back to the configured defaults when
    /// absent (or, for the interval, zero/negative). An already registered
    /// `job_id` is stopped and its loop joined before the new loop starts.
    /// Frames left in the job directory by an earlier run are removed, so the
    /// new job counts from zero and its files number `1..=frame_count`.
    pub fn start(
        &self,
        job_id: &str,
        source_uri: Option<&str>,
        interval_secs: Option<f64>,
    ) -> Result<()> {
        validate_job_id(job_id)?;
        let source_uri = match source_uri.map(str::trim) {
            Some(uri) if !uri.is_empty() => uri.to_string(),
            _ => self.settings.default_source_uri.clone(),
        };
        url::Url::parse(&source_uri)
            .map_err(|e| anyhow!("invalid source uri '{}': {}", source_uri, e))?;
        let interval = self.resolve_interval(interval_secs)?;

        let _lifecycle = lock(&self.lifecycle);

        let previous = self.registry().remove(job_id);
        if let Some(previous) = previous {
            if previous.stopped_with.is_none() && !previous.shared.state().is_terminal() {
                log::warn!("capture {}: restarting active job", job_id);
            }
            previous.shutdown(job_id);
        }

        let output_dir = self.sink.ensure_job_dir(job_id)?;
        let cleared = self.sink.clear_frames(&output_dir)?;
        if cleared > 0 {
            log::info!(
                "capture {}: removed {} frames from an earlier run",
                job_id,
                cleared
            );
        }
        let spec = JobSpec {
            job_id: job_id.to_string(),
            source_uri,
            interval,
            output_dir,
            retry: self.settings.retry,
            read_timeout: self.settings.read_timeout,
            jpeg_quality: self.settings.jpeg_quality,
        };
        log::info!(
            "capture {}: starting (source={}, interval={:?})",
            job_id,
            spec.source_uri,
            spec.interval
        );

        let shared = Arc::new(JobShared::new());
        let join = {
            let shared = shared.clone();
            let sources = self.sources.clone();
            let sink = self.sink.clone();
            std::thread::Builder::new()
                .name(format!("capture-{}", job_id))
                .spawn(move || run_capture_loop(spec, shared, sources, sink))
                .map_err(|e| anyhow!("failed to spawn capture thread for {}: {}", job_id, e))?
        };

        let mut jobs = self.registry();
        jobs.insert(
            job_id.to_string(),
            JobEntry {
                shared,
                join: Some(join),
                stopped_with: None,
                finished_at: None,
            },
        );
        reap_finished(&mut jobs, self.settings.finished_job_limit);
        Ok(())
    }

    /// Signal the job to stop and return its frame count at that moment.
    ///
    /// Unknown jobs return 0. Repeated calls return the count from the first call.
    /// Does not wait for the loop to exit.
    pub fn stop(&self, job_id: &str) -> u64 {
        let mut jobs = self.registry();
        reap_finished(&mut jobs, self.settings.finished_job_limit);
        let Some(entry) = jobs.get_mut(job_id) else {
            return 0;
        };
        if let Some(count) = entry.stopped_with {
            return count;
        }
        entry.shared.cancel();
        let count = entry.shared.frame_count();
        entry.stopped_with = Some(count);
        log::info!("capture {}: stop requested at {} frames", job_id, count);
        count
    }

    /// Current status of `job_id`. Never blocks on a running capture.
    pub fn status(&self, job_id: &str) -> CaptureStatus {
        self.registry()
            .get(job_id)
            .map(|entry| entry.shared.status())
            .unwrap_or_else(CaptureStatus::unknown)
    }

    /// Ids of jobs whose loops are still active.
    pub fn active_jobs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .registry()
            .iter()
            .filter(|(_, entry)| entry.shared.status().active)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of jobs the registry still holds, running or finished.
    pub fn tracked_jobs(&self) -> usize {
        self.registry().len()
    }

    /// Stop every job and wait for all loops to exit.
    pub fn shutdown(&self) {
        let _lifecycle = lock(&self.lifecycle);
        let drained: Vec<(String, JobEntry)> = self.registry().drain().collect();
        for (_, entry) in &drained {
            entry.shared.cancel();
        }
        let count = drained.len();
        for (job_id, entry) in drained {
            entry.shutdown(&job_id);
        }
        if count > 0 {
            log::info!("capture manager: stopped {} jobs", count);
        }
    }

    fn resolve_interval(&self, interval_secs: Option<f64>) -> Result<Duration> {
        match interval_secs {
            Some(secs) if secs.is_nan() || secs.is_infinite() => {
                Err(anyhow!("capture interval must be finite (got {})", secs))
            }
            Some(secs) if secs > 0.0 => crate::config::interval_from_secs(secs),
            _ => Ok(self.settings.default_interval),
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, JobEntry>> {
        lock(&self.jobs)
    }
}

impl Drop for CaptureManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Join exited loops, then forget the oldest finished jobs beyond `limit`.
fn reap_finished(jobs: &mut HashMap<String, JobEntry>, limit: usize) {
    for (job_id, entry) in jobs.iter_mut() {
        entry.reap(job_id);
    }
    let mut finished: Vec<(Instant, String)> = jobs
        .iter()
        .filter_map(|(id, entry)| entry.finished_at.map(|at| (at, id.clone())))
        .collect();
    if finished.len() <= limit {
        return;
    }
    finished.sort();
    let excess = finished.len() - limit;
    for (_, job_id) in finished.into_iter().take(excess) {
        jobs.remove(&job_id);
        log::debug!("capture {}: dropped finished job record", job_id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
