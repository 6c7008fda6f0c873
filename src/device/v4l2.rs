//! V4L2 video devices.
//!
//! Linux exposes no facing direction for USB/CSI cameras, so the mapping
//! comes from configuration: `device.environment` and `device.user` name the
//! device node for each direction. An unconstrained request tries the
//! `device.fallback` nodes in order and opens the first that works.
//!
//! Frames are requested as RGB3; devices that insist on YUYV or NV12 are
//! converted to RGB24 in-memory.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{DeviceConstraint, DeviceProvider, FacingMode, VideoHandle};
use crate::config::DeviceSettings;
use crate::frame::Frame;

/// Provider for local V4L2 device nodes.
pub struct V4l2Provider {
    settings: DeviceSettings,
}

impl V4l2Provider {
    pub fn new(settings: DeviceSettings) -> Self {
        Self { settings }
    }

    fn path_for(&self, facing: FacingMode) -> Option<&str> {
        match facing {
            FacingMode::Environment => self.settings.environment.as_deref(),
            FacingMode::User => self.settings.user.as_deref(),
        }
    }
}

impl DeviceProvider for V4l2Provider {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn open(&mut self, constraint: DeviceConstraint) -> Result<Box<dyn VideoHandle>> {
        match constraint {
            DeviceConstraint::Exact(facing) => {
                let path = self
                    .path_for(facing)
                    .ok_or_else(|| anyhow!("no v4l2 device configured for {} facing", facing))?;
                let handle = V4l2Handle::open(path, Some(facing), &self.settings)?;
                Ok(Box::new(handle))
            }
            DeviceConstraint::Any => {
                let mut failures = Vec::new();
                for path in &self.settings.fallback {
                    match V4l2Handle::open(path, None, &self.settings) {
                        Ok(handle) => return Ok(Box::new(handle)),
                        Err(err) => {
                            log::debug!("v4l2: fallback {} unavailable: {:#}", path, err);
                            failures.push(format!("{}: {:#}", path, err));
                        }
                    }
                }
                if failures.is_empty() {
                    Err(anyhow!("no v4l2 fallback devices configured"))
                } else {
                    Err(anyhow!("no v4l2 device could be opened ({})", failures.join("; ")))
                }
            }
        }
    }
}

#[self_referencing]
struct V4l2Stream {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

struct V4l2Handle {
    path: String,
    facing: Option<FacingMode>,
    state: Option<V4l2Stream>,
    format: PixelFormat,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl V4l2Handle {
    fn open(path: &str, facing: Option<FacingMode>, settings: &DeviceSettings) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device =
            v4l::Device::with_path(path).with_context(|| format!("open v4l2 device {}", path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = settings.width;
        format.height = settings.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("v4l2: failed to set format on {}: {}", path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "v4l2 device {} delivers unsupported pixel format {}",
                path,
                format.fourcc
            )
        })?;

        if settings.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(settings.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("v4l2: failed to set fps on {}: {}", path, err);
            }
        }

        let state = V4l2StreamTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "v4l2: streaming {} ({}x{}, {:?})",
            path,
            format.width,
            format.height,
            pixel_format
        );
        Ok(Self {
            path: path.to_string(),
            facing,
            state: Some(state),
            format: pixel_format,
            width: format.width,
            height: format.height,
            frame_count: 0,
        })
    }
}

impl VideoHandle for V4l2Handle {
    fn describe(&self) -> String {
        format!("v4l2 {} ({}x{})", self.path, self.width, self.height)
    }

    fn facing(&self) -> Option<FacingMode> {
        self.facing
    }

    fn current_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let expected = self
            .format
            .frame_len(self.width, self.height)
            .ok_or_else(|| anyhow!("v4l2 frame dimensions overflow"))?;
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| anyhow!("v4l2 device {} is stopped", self.path))?;
        let raw = state
            .with_stream_mut(|stream| {
                stream
                    .next()
                    .map(|(buf, _meta)| buf[..expected.min(buf.len())].to_vec())
            })
            .with_context(|| format!("capture v4l2 frame from {}", self.path))?;

        let rgb = normalize_to_rgb(&raw, self.width, self.height, self.format)?;
        self.frame_count += 1;
        Frame::from_rgb(rgb, self.width, self.height)
    }

    fn stop(&mut self) {
        if self.state.take().is_some() {
            log::debug!(
                "v4l2: stopped {} after {} frames",
                self.path,
                self.frame_count
            );
        }
    }
}

impl Drop for V4l2Handle {
    fn drop(&mut self) {
        self.stop();
    }
}
