//! Sampled camera frames.
//!
//! A `Frame` lives for exactly one detection cycle: the camera produces it,
//! the detector reads it, and dropping it wipes the pixel buffer.
//!
//! Frames are deliberately not `Clone` and not serializable.

use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use zeroize::Zeroize;

/// One RGB frame sampled from a camera stream.
pub struct Frame {
    /// Packed RGB, row-major, `width * height * 3` bytes.
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Per-stream sequence number, starting at 1.
    pub sequence: u64,
    captured_at: Instant,
}

impl Frame {
    /// Wrap packed RGB pixels. Fails when the buffer does not match the dimensions.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        })
    }

    /// Read-only pixel access for detectors.
    ///
    /// Detectors must not retain the slice beyond their `detect` call.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.pixels.zeroize();
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_buffer() {
        assert!(Frame::from_rgb(vec![0u8; 10], 2, 2, 1).is_err());
        let frame = Frame::from_rgb(vec![0u8; 12], 2, 2, 1).unwrap();
        assert_eq!(frame.byte_len(), 12);
        assert_eq!(frame.sequence, 1);
    }

    #[test]
    fn debug_does_not_print_pixels() {
        let frame = Frame::from_rgb(vec![42u8; 3], 1, 1, 7).unwrap();
        let rendered = format!("{:?}", frame);
        assert!(rendered.contains("sequence: 7"));
        assert!(!rendered.contains("42"));
    }
}
