//! Decoded frame container.
//!
//! Sources hand a `Frame` to the capture loop, which passes it straight to the
//! frame sink. Pixels are tightly packed RGB8 rows.

use anyhow::{anyhow, Result};

/// Bytes per pixel for RGB8.
pub const RGB_CHANNELS: usize = 3;

/// One decoded still from a video source.
pub struct Frame {
    /// Packed RGB8 pixel data, `width * height * 3` bytes.
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap packed RGB8 pixels. Fails if the buffer length does not match the dimensions.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|px| px.checked_mul(RGB_CHANNELS))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "frame buffer is {} bytes, expected {} for {}x{} RGB",
                data.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Packed RGB8 pixel rows.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Pixel payloads are large; never dump them.
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_rgb_buffer() -> Result<()> {
        let frame = Frame::from_rgb(vec![0u8; 4 * 2 * 3], 4, 2)?;
        assert_eq!(frame.width, 4);
        assert_eq!(frame.height, 2);
        assert_eq!(frame.byte_len(), 24);
        Ok(())
    }

    #[test]
    fn rejects_short_buffer() {
        assert!(Frame::from_rgb(vec![0u8; 10], 4, 2).is_err());
    }

    #[test]
    fn rejects_zero_dimensions() {
        assert!(Frame::from_rgb(Vec::new(), 0, 0).is_err());
    }

    #[test]
    fn debug_output_omits_pixels() -> Result<()> {
        let frame = Frame::from_rgb(vec![7u8; 3], 1, 1)?;
        let rendered = format!("{:?}", frame);
        assert!(rendered.contains("bytes: 3"));
        assert!(!rendered.contains("data"));
        Ok(())
    }
}
