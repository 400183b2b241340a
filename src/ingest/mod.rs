//! Video sources.
//!
//! This module provides the source side of a capture job:
//! - `VideoSource`: an opened stream that yields decoded frames
//! - `SourceFactory`: opens a `VideoSource` from a URI
//! - `RtspSource`: IP cameras via RTSP (GStreamer), or synthetic `stub://` streams
//!
//! A read that produces no frame (`Ok(None)`) is a dropped read: the capture loop
//! skips it without consuming a sequence number.

use anyhow::Result;

use crate::frame::Frame;

pub mod rtsp;

pub use rtsp::{RtspConfig, RtspSource, RtspSourceFactory};

/// An opened video stream.
///
/// `close` is called exactly once by the capture loop, after the last read.
pub trait VideoSource {
    /// Read the next frame. `Ok(None)` means the source had nothing to give this time.
    fn read_frame(&mut self) -> Result<Option<Frame>>;

    /// Release the underlying stream handle.
    fn close(&mut self);
}

/// Opens video sources by URI.
pub trait SourceFactory: Send + Sync {
    fn open(&self, uri: &str) -> Result<Box<dyn VideoSource + Send>>;
}
