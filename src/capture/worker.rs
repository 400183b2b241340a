//! The capture loop: connect with retries, then read/write/sleep until cancelled.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::job::{JobShared, JobState};
use super::reader::{FrameReader, ReadOutcome};
use super::RetryPolicy;
use crate::ingest::{SourceFactory, VideoSource};
use crate::sink::FrameSink;

/// Everything one loop needs, resolved before the loop starts.
#[derive(Clone, Debug)]
pub(crate) struct JobSpec {
    pub job_id: String,
    pub source_uri: String,
    pub interval: Duration,
    pub output_dir: PathBuf,
    pub retry: RetryPolicy,
    pub read_timeout: Duration,
    pub jpeg_quality: u8,
}

pub(crate) fn run_capture_loop(
    spec: JobSpec,
    job: Arc<JobShared>,
    sources: Arc<dyn SourceFactory>,
    sink: Arc<dyn FrameSink>,
) {
    let Some(source) = connect(&spec, &job, sources.as_ref()) else {
        return;
    };

    let mut reader = match FrameReader::spawn(&spec.job_id, source) {
        Ok(reader) => reader,
        Err(err) => {
            log::error!("capture {}: {:#}", spec.job_id, err);
            job.transition(JobState::Failed);
            return;
        }
    };

    job.transition(JobState::Capturing);
    log::info!(
        "capture {}: capturing from {} every {:?} into {}",
        spec.job_id,
        spec.source_uri,
        spec.interval,
        spec.output_dir.display()
    );

    let mut outcome = JobState::Stopped;
    loop {
        if job.is_cancelled() {
            break;
        }
        match reader.read(spec.read_timeout, &job) {
            ReadOutcome::Frame(frame) => {
                if job.is_cancelled() {
                    break;
                }
                // Only this loop advances the count, so the next sequence is stable.
                let sequence = job.frame_count() + 1;
                match sink.write_frame(&spec.output_dir, sequence, &frame, spec.jpeg_quality) {
                    Ok(path) => {
                        job.record_frame();
                        log::debug!("capture {}: wrote {}", spec.job_id, path.display());
                    }
                    Err(err) => {
                        job.record_write_failure();
                        log::warn!(
                            "capture {}: failed to write frame {}: {:#}",
                            spec.job_id,
                            sequence,
                            err
                        );
                    }
                }
            }
            ReadOutcome::Dropped => {}
            ReadOutcome::Cancelled => break,
            ReadOutcome::SourceLost => {
                log::error!(
                    "capture {}: lost video source {} after {} frames",
                    spec.job_id,
                    spec.source_uri,
                    job.frame_count()
                );
                outcome = JobState::Failed;
                break;
            }
        }
        if !job.sleep_unless_cancelled(spec.interval) {
            break;
        }
    }

    reader.finish();
    job.transition(outcome);
    log::info!(
        "capture {}: {:?} after {} frames ({} write failures)",
        spec.job_id,
        job.state(),
        job.frame_count(),
        job.write_failures()
    );
}

/// Open the source, retrying with a fixed backoff. `None` means the loop is over.
fn connect(
    spec: &JobSpec,
    job: &JobShared,
    sources: &dyn SourceFactory,
) -> Option<Box<dyn VideoSource + Send>> {
    job.transition(JobState::Connecting);
    let attempts = spec.retry.attempts.max(1);
    for attempt in 1..=attempts {
        if job.is_cancelled() {
            job.transition(JobState::Stopped);
            return None;
        }
        match sources.open(&spec.source_uri) {
            Ok(source) => return Some(source),
            Err(err) => log::warn!(
                "capture {}: connection attempt {}/{} to {} failed: {:#}",
                spec.job_id,
                attempt,
                attempts,
                spec.source_uri,
                err
            ),
        }
        if attempt < attempts && !job.sleep_unless_cancelled(spec.retry.backoff) {
            job.transition(JobState::Stopped);
            return None;
        }
    }
    log::error!(
        "capture {}: connection failed after {} attempts",
        spec.job_id,
        attempts
    );
    job.transition(JobState::Failed);
    None
}
