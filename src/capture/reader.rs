//! Deadline-bounded frame reads.
//!
//! The opened source moves onto its own reader thread. The capture loop asks
//! for one frame at a time and waits with a deadline, polling the job's cancel
//! flag, so a source that never returns from a read cannot pin the loop. The
//! reader thread closes the source exactly once, after its last read returns.

use anyhow::{anyhow, Result};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::job::{JobShared, CANCEL_POLL};
use crate::frame::Frame;
use crate::ingest::VideoSource;

/// Result of one bounded read.
#[derive(Debug)]
pub(crate) enum ReadOutcome {
    Frame(Frame),
    /// Source returned nothing, failed the read, or missed the deadline.
    Dropped,
    /// Cancel flag observed while waiting.
    Cancelled,
    /// The reader thread is gone (the source panicked); no more frames will come.
    SourceLost,
}

pub(crate) struct FrameReader {
    job_id: String,
    requests: Option<Sender<()>>,
    frames: Receiver<Result<Option<Frame>>>,
    join: Option<JoinHandle<()>>,
    /// A request was sent and its answer has not been received yet.
    pending: bool,
}

impl FrameReader {
    pub(crate) fn spawn(job_id: &str, mut source: Box<dyn VideoSource + Send>) -> Result<Self> {
        let (request_tx, request_rx) = mpsc::channel::<()>();
        let (frame_tx, frame_rx) = mpsc::channel();
        let join = std::thread::Builder::new()
            .name(format!("capture-reader-{}", job_id))
            .spawn(move || {
                while request_rx.recv().is_ok() {
                    let result = source.read_frame();
                    if frame_tx.send(result).is_err() {
                        break;
                    }
                }
                source.close();
            })
            .map_err(|e| anyhow!("failed to spawn reader thread for {}: {}", job_id, e))?;
        Ok(Self {
            job_id: job_id.to_string(),
            requests: Some(request_tx),
            frames: frame_rx,
            join: Some(join),
            pending: false,
        })
    }

    /// Wait up to `timeout` for the next frame.
    ///
    /// A read that misses the deadline stays in flight; the next call waits on
    /// it instead of queueing another request.
    pub(crate) fn read(&mut self, timeout: Duration, job: &JobShared) -> ReadOutcome {
        if !self.pending {
            if job.is_cancelled() {
                return ReadOutcome::Cancelled;
            }
            let Some(requests) = &self.requests else {
                return ReadOutcome::Cancelled;
            };
            if requests.send(()).is_err() {
                log::error!("capture {}: reader thread exited", self.job_id);
                return ReadOutcome::SourceLost;
            }
            self.pending = true;
        }

        let deadline = Instant::now() + timeout;
        loop {
            let wait = deadline
                .saturating_duration_since(Instant::now())
                .min(CANCEL_POLL);
            match self.frames.recv_timeout(wait) {
                Ok(result) => {
                    self.pending = false;
                    return match result {
                        Ok(Some(frame)) => ReadOutcome::Frame(frame),
                        Ok(None) => ReadOutcome::Dropped,
                        Err(err) => {
                            log::warn!("capture {}: frame read failed: {:#}", self.job_id, err);
                            ReadOutcome::Dropped
                        }
                    };
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.pending = false;
                    log::error!("capture {}: reader thread exited mid-read", self.job_id);
                    return ReadOutcome::SourceLost;
                }
            }
            if job.is_cancelled() {
                return ReadOutcome::Cancelled;
            }
            if Instant::now() >= deadline {
                log::warn!(
                    "capture {}: frame read exceeded {:?}, treating as dropped",
                    self.job_id,
                    timeout
                );
                return ReadOutcome::Dropped;
            }
        }
    }

    /// Stop issuing reads and release the source.
    ///
    /// Joins the reader thread unless a read is still in flight; a stalled
    /// reader is detached and closes the source whenever its read returns.
    /// A reader that died from a panic is joined and the panic logged.
    pub(crate) fn finish(mut self) {
        self.requests = None;
        let Some(join) = self.join.take() else {
            return;
        };
        if self.pending && self.frames.recv_timeout(CANCEL_POLL).is_ok() {
            self.pending = false;
        }
        if self.pending {
            log::warn!(
                "capture {}: detaching reader with a read still in flight",
                self.job_id
            );
            return;
        }
        if let Err(panic) = join.join() {
            log::error!(
                "capture {}: video source panicked: {}",
                self.job_id,
                panic_message(panic.as_ref())
            );
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
