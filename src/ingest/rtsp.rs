//! RTSP frame source.
//!
//! This module provides `RtspSource` for pulling stills from IP cameras via RTSP.
//!
//! The RTSP source is responsible for:
//! - Connecting to camera streams
//! - Decoding video frames to RGB
//! - Bounding each read so a stalled stream yields a dropped read instead of hanging
//!
//! `stub://` URLs select a synthetic stream that always connects; any other URL
//! needs the `rtsp-gstreamer` feature.

#[cfg(feature = "rtsp-gstreamer")]
use anyhow::Context;
use anyhow::{anyhow, Result};
#[cfg(feature = "rtsp-gstreamer")]
use gstreamer::prelude::*;
use std::time::Duration;

use super::{SourceFactory, VideoSource};
use crate::frame::{Frame, RGB_CHANNELS};

/// Largest synthetic frame edge, in pixels.
pub const MAX_FRAME_DIMENSION: u32 = 8192;

/// Configuration for an RTSP source.
#[derive(Clone, Debug)]
pub struct RtspConfig {
    /// RTSP URL (e.g., "rtsp://192.168.1.100:554/stream")
    pub url: String,
    /// Frame width (synthetic streams only).
    pub width: u32,
    /// Frame height (synthetic streams only).
    pub height: u32,
    /// Longest a single read may wait for a decoded sample.
    pub frame_timeout: Duration,
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            url: "rtsp://localhost:554/stream".to_string(),
            width: 640,
            height: 480,
            frame_timeout: Duration::from_secs(10),
        }
    }
}

impl RtspConfig {
    /// Byte length of one RGB frame at the configured size.
    ///
    /// Fails for a zero edge or one above `MAX_FRAME_DIMENSION`.
    pub fn frame_len(&self) -> Result<usize> {
        for (name, value) in [("width", self.width), ("height", self.height)] {
            if value == 0 || value > MAX_FRAME_DIMENSION {
                return Err(anyhow!(
                    "frame {} must be between 1 and {} (got {})",
                    name,
                    MAX_FRAME_DIMENSION,
                    value
                ));
            }
        }
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|px| px.checked_mul(RGB_CHANNELS))
            .ok_or_else(|| anyhow!("frame size {}x{} overflows", self.width, self.height))
    }
}

/// RTSP frame source.
///
/// Uses GStreamer for real RTSP decode, with a synthetic fallback for `stub://` URLs.
pub struct RtspSource {
    backend: RtspBackend,
}

enum RtspBackend {
    Synthetic(SyntheticRtspSource),
    #[cfg(feature = "rtsp-gstreamer")]
    Gstreamer(GstreamerRtspSource),
}

impl RtspSource {
    pub fn new(config: RtspConfig) -> Result<Self> {
        if config.url.starts_with("stub://") {
            Ok(Self {
                backend: RtspBackend::Synthetic(SyntheticRtspSource::new(config)?),
            })
        } else {
            #[cfg(feature = "rtsp-gstreamer")]
            {
                Ok(Self {
                    backend: RtspBackend::Gstreamer(GstreamerRtspSource::new(config)?),
                })
            }
            #[cfg(not(feature = "rtsp-gstreamer"))]
            {
                anyhow::bail!("RTSP requires the rtsp-gstreamer feature ({})", config.url)
            }
        }
    }

    /// Connect to the RTSP stream.
    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.connect(),
        }
    }

    /// Get frame statistics.
    pub fn stats(&self) -> RtspStats {
        match &self.backend {
            RtspBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.stats(),
        }
    }
}

impl VideoSource for RtspSource {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.next_frame().map(Some),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.next_frame(),
        }
    }

    fn close(&mut self) {
        let stats = self.stats();
        match &mut self.backend {
            RtspBackend::Synthetic(_) => {}
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.close(),
        }
        log::info!(
            "RtspSource: closed {} after {} frames",
            stats.url,
            stats.frames_captured
        );
    }
}

/// Statistics for an RTSP source.
#[derive(Clone, Debug)]
pub struct RtspStats {
    pub frames_captured: u64,
    pub url: String,
}

/// Opens `RtspSource`s for capture jobs.
#[derive(Clone, Debug)]
pub struct RtspSourceFactory {
    template: RtspConfig,
}

impl RtspSourceFactory {
    /// `template` supplies everything but the URL.
    pub fn new(template: RtspConfig) -> Self {
        Self { template }
    }
}

impl SourceFactory for RtspSourceFactory {
    fn open(&self, uri: &str) -> Result<Box<dyn VideoSource + Send>> {
        let config = RtspConfig {
            url: uri.to_string(),
            ..self.template.clone()
        };
        let mut source = RtspSource::new(config)?;
        source.connect()?;
        Ok(Box::new(source))
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticRtspSource {
    config: RtspConfig,
    /// Bytes per frame, checked against the geometry at construction.
    frame_len: usize,
    frame_count: u64,
    /// Shifts the pattern every 50 frames so consecutive stills differ.
    scene_state: u8,
}

impl SyntheticRtspSource {
    fn new(config: RtspConfig) -> Result<Self> {
        let frame_len = config.frame_len()?;
        Ok(Self {
            config,
            frame_len,
            frame_count: 0,
            scene_state: 0,
        })
    }

    /// Synthetic sources are always "connected".
    fn connect(&mut self) -> Result<()> {
        log::info!("RtspSource: connected to {} (synthetic)", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.frame_count += 1;
        let pixels = self.generate_synthetic_pixels();
        Frame::from_rgb(pixels, self.config.width, self.config.height)
    }

    fn generate_synthetic_pixels(&mut self) -> Vec<u8> {
        if self.frame_count.is_multiple_of(50) {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let mut pixels = vec![0u8; self.frame_len];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }

        pixels
    }

    fn stats(&self) -> RtspStats {
        RtspStats {
            frames_captured: self.frame_count,
            url: self.config.url.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Production RTSP source using GStreamer
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerRtspSource {
    config: RtspConfig,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    frame_count: u64,
    closed: bool,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerRtspSource {
    /// Build the pipeline: rtspsrc ! decodebin ! videoconvert ! appsink (RGB).
    fn new(config: RtspConfig) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let pipeline_description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            config.url
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        Ok(Self {
            config,
            pipeline,
            appsink,
            frame_count: 0,
            closed: false,
        })
    }

    /// Start playback and wait (bounded) for the stream to come up.
    fn connect(&mut self) -> Result<()> {
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;
        let timeout = gstreamer::ClockTime::from_mseconds(self.config.frame_timeout.as_millis() as u64);
        let (result, current, _pending) = self.pipeline.state(timeout);
        if let Err(err) = result {
            self.close();
            return Err(anyhow!(
                "RTSP stream {} did not start: {:?}",
                self.config.url,
                err
            ));
        }
        if current != gstreamer::State::Playing {
            self.close();
            return Err(anyhow!(
                "RTSP stream {} stuck in {:?}",
                self.config.url,
                current
            ));
        }
        log::info!("RtspSource: connected to {}", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.poll_bus()?;

        let timeout = gstreamer::ClockTime::from_mseconds(self.config.frame_timeout.as_millis() as u64);
        let Some(sample) = self.appsink.try_pull_sample(timeout) else {
            log::debug!("RtspSource: no sample from {} within timeout", self.config.url);
            return Ok(None);
        };

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        self.frame_count += 1;
        Frame::from_rgb(pixels, width, height).map(Some)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("RtspSource: failed to stop pipeline for {}: {}", self.config.url, err);
        }
    }

    fn stats(&self) -> RtspStats {
        RtspStats {
            frames_captured: self.frame_count,
            url: self.config.url.clone(),
        }
    }

    fn poll_bus(&mut self) -> Result<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Err(anyhow!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    return Err(anyhow!("gstreamer reached EOS"));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl Drop for GstreamerRtspSource {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * height as usize)
            .context("RTSP buffer shorter than frame")?;
        return Ok((packed.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> RtspConfig {
        RtspConfig {
            url: "stub://test".to_string(),
            width: 32,
            height: 24,
            frame_timeout: Duration::from_millis(100),
        }
    }

    #[test]
    fn rtsp_source_produces_frames() -> Result<()> {
        let mut source = RtspSource::new(stub_config())?;
        source.connect()?;

        let frame = source.read_frame()?.expect("synthetic frame");
        assert_eq!(frame.width, 32);
        assert_eq!(frame.height, 24);
        assert_eq!(source.stats().frames_captured, 1);

        Ok(())
    }

    #[test]
    fn synthetic_frames_differ_between_reads() -> Result<()> {
        let mut source = RtspSource::new(stub_config())?;
        source.connect()?;

        let first = source.read_frame()?.expect("first frame");
        let second = source.read_frame()?.expect("second frame");
        assert_ne!(first.pixels(), second.pixels());

        Ok(())
    }

    #[test]
    fn factory_opens_connected_stub_source() -> Result<()> {
        let factory = RtspSourceFactory::new(stub_config());
        let mut source = factory.open("stub://camera-2")?;
        assert!(source.read_frame()?.is_some());
        source.close();
        Ok(())
    }

    #[cfg(not(feature = "rtsp-gstreamer"))]
    #[test]
    fn real_rtsp_urls_need_gstreamer() {
        let factory = RtspSourceFactory::new(stub_config());
        let err = factory
            .open("rtsp://192.168.1.50:554/stream")
            .err()
            .expect("open should fail without gstreamer");
        assert!(err.to_string().contains("rtsp-gstreamer"));
    }

    #[test]
    fn zero_or_oversized_stub_geometry_fails_to_open() {
        for (width, height) in [(0, 480), (640, 0), (70_000, 70_000), (u32::MAX, u32::MAX)] {
            let factory = RtspSourceFactory::new(RtspConfig {
                width,
                height,
                ..stub_config()
            });
            assert!(
                factory.open("stub://huge").is_err(),
                "{}x{} should be rejected",
                width,
                height
            );
        }
    }

    #[test]
    fn frame_len_covers_rgb_bytes() -> Result<()> {
        assert_eq!(stub_config().frame_len()?, 32 * 24 * 3);
        let widest = RtspConfig {
            width: MAX_FRAME_DIMENSION,
            height: 1,
            ..stub_config()
        };
        assert_eq!(widest.frame_len()?, MAX_FRAME_DIMENSION as usize * 3);
        Ok(())
    }
}
