//! Still extraction from the current video handle.
//!
//! `FrameSampler` grabs the frame currently on the handle, stretches it to the
//! configured still size (no aspect preservation) and encodes it as JPEG. The
//! sequence counter is shared by every clone so numbering stays monotonic for
//! the whole session, across camera switches.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::CaptureSettings;
use crate::device::VideoHandle;
use crate::frame::{Frame, StillImage};

#[derive(Clone, Debug)]
pub struct FrameSampler {
    width: u32,
    height: u32,
    jpeg_quality: u8,
    next_sequence: Arc<AtomicU64>,
}

impl FrameSampler {
    pub fn new(settings: &CaptureSettings) -> Self {
        Self {
            width: settings.width,
            height: settings.height,
            jpeg_quality: settings.jpeg_quality.clamp(1, 100),
            next_sequence: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Grab the current frame from `handle` and encode it.
    ///
    /// The sequence number is taken at grab time, before encoding, so a frame
    /// that fails to encode still consumes its number.
    pub fn sample(&self, handle: &mut dyn VideoHandle) -> Result<StillImage> {
        let frame = handle
            .current_frame()
            .with_context(|| format!("grab frame from {}", handle.describe()))?;
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        self.encode(sequence, frame)
    }

    /// Stretch and encode an already grabbed frame.
    pub fn encode(&self, sequence: u64, frame: Frame) -> Result<StillImage> {
        let captured_at = Instant::now();
        let (src_width, src_height) = (frame.width, frame.height);
        let source = RgbImage::from_raw(src_width, src_height, frame.into_pixels())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", src_width, src_height))?;

        let still = if (src_width, src_height) == (self.width, self.height) {
            source
        } else {
            imageops::resize(&source, self.width, self.height, FilterType::Triangle)
        };

        let mut jpeg = Vec::with_capacity(16 * 1024);
        JpegEncoder::new_with_quality(&mut jpeg, self.jpeg_quality)
            .encode_image(&still)
            .context("encode still as jpeg")?;
        if jpeg.is_empty() {
            return Err(anyhow!("jpeg encoder produced no data"));
        }

        Ok(StillImage {
            sequence,
            width: self.width,
            height: self.height,
            jpeg,
            captured_at,
        })
    }

    /// Sequence number the next sample will receive.
    pub fn peek_sequence(&self) -> u64 {
        self.next_sequence.load(Ordering::SeqCst)
    }
}
