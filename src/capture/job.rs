//! Per-job state shared between the manager and a capture loop.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

/// Longest single sleep while waiting on a delay, so cancellation is seen promptly.
pub(crate) const CANCEL_POLL: Duration = Duration::from_millis(20);

/// Lifecycle of one capture loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum JobState {
    Starting = 0,
    Connecting = 1,
    Capturing = 2,
    Stopped = 3,
    Failed = 4,
}

impl JobState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => JobState::Starting,
            1 => JobState::Connecting,
            2 => JobState::Capturing,
            3 => JobState::Stopped,
            _ => JobState::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Stopped | JobState::Failed)
    }
}

/// Point-in-time view of a job, as returned by `CaptureManager::status`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CaptureStatus {
    pub active: bool,
    pub frame_count: u64,
    pub state: Option<JobState>,
    pub write_failures: u64,
}

impl CaptureStatus {
    /// Status reported for a job id that was never started.
    pub fn unknown() -> Self {
        Self {
            active: false,
            frame_count: 0,
            state: None,
            write_failures: 0,
        }
    }
}

/// Counters and flags for one job. The loop writes, everyone else reads.
#[derive(Debug)]
pub(crate) struct JobShared {
    frame_count: AtomicU64,
    write_failures: AtomicU64,
    state: AtomicU8,
    cancelled: AtomicBool,
}

impl JobShared {
    pub(crate) fn new() -> Self {
        Self {
            frame_count: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            state: AtomicU8::new(JobState::Starting as u8),
            cancelled: AtomicBool::new(false),
        }
    }

    pub(crate) fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::SeqCst)
    }

    /// Record a successful write. Returns the new count.
    pub(crate) fn record_frame(&self) -> u64 {
        self.frame_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::SeqCst)
    }

    pub(crate) fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn state(&self) -> JobState {
        JobState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Move to `next` unless already terminal. Terminal states never change.
    pub(crate) fn transition(&self, next: JobState) -> bool {
        self.state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                if JobState::from_u8(current).is_terminal() {
                    None
                } else {
                    Some(next as u8)
                }
            })
            .is_ok()
    }

    /// Set the cancel flag. Returns true only for the call that set it.
    pub(crate) fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` in short slices. Returns false if cancelled meanwhile.
    pub(crate) fn sleep_unless_cancelled(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(CANCEL_POLL));
        }
    }

    pub(crate) fn status(&self) -> CaptureStatus {
        let state = self.state();
        CaptureStatus {
            active: !self.is_cancelled() && !state.is_terminal(),
            frame_count: self.frame_count(),
            state: Some(state),
            write_failures: self.write_failures(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_sticky() {
        let shared = JobShared::new();
        assert!(shared.transition(JobState::Connecting));
        assert!(shared.transition(JobState::Failed));
        assert!(!shared.transition(JobState::Capturing));
        assert_eq!(shared.state(), JobState::Failed);
    }

    #[test]
    fn cancel_reports_first_caller_only() {
        let shared = JobShared::new();
        assert!(shared.cancel());
        assert!(!shared.cancel());
        assert!(shared.is_cancelled());
        assert!(!shared.status().active);
    }

    #[test]
    fn cancelled_sleep_returns_early() {
        let shared = JobShared::new();
        shared.cancel();
        let started = Instant::now();
        assert!(!shared.sleep_unless_cancelled(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn uncancelled_sleep_runs_to_completion() {
        let shared = JobShared::new();
        let started = Instant::now();
        assert!(shared.sleep_unless_cancelled(Duration::from_millis(60)));
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn status_reflects_counters() {
        let shared = JobShared::new();
        shared.transition(JobState::Capturing);
        assert_eq!(shared.record_frame(), 1);
        assert_eq!(shared.record_frame(), 2);
        shared.record_write_failure();
        let status = shared.status();
        assert!(status.active);
        assert_eq!(status.frame_count, 2);
        assert_eq!(status.write_failures, 1);
        assert_eq!(status.state, Some(JobState::Capturing));
    }
}
