//! Frame types flowing from the video handle to the prediction client.
//!
//! - `Frame`: RGB24 pixels grabbed from a live video handle.
//! - `StillImage`: fixed-size JPEG produced from one frame, tagged with the
//!   sequence number assigned at capture time.

use anyhow::{anyhow, Result};
use std::time::Instant;

/// One RGB24 frame as delivered by a video handle.
#[derive(Clone, Debug)]
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap RGB24 pixels. The buffer must hold exactly `width * height * 3` bytes.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = width
            .checked_mul(height)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))? as usize;
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }
}

/// Encoded still sent to the prediction endpoint.
#[derive(Clone, Debug)]
pub struct StillImage {
    /// Monotonic per-session capture sequence.
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// JPEG bytes.
    pub jpeg: Vec<u8>,
    pub captured_at: Instant,
}

impl StillImage {
    pub fn byte_len(&self) -> usize {
        self.jpeg.len()
    }
}
