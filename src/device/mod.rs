//! Video device acquisition.
//!
//! This module provides the providers that open live video handles:
//! - Synthetic devices (`stub://` sources, testing and demos)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! `DeviceAcquirer` applies the selection policy on top of a provider:
//! release the previous handle, try the requested facing direction with an
//! exact constraint, and on any failure fall back to whatever video device
//! exists. Only a failure of the fallback is reported to the caller.

#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};
use std::fmt;

use crate::config::DeviceSettings;
use crate::frame::Frame;

pub use synthetic::{SyntheticConfig, SyntheticProvider, TrackLog, TrackRecord};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Provider;

/// Direction a camera faces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FacingMode {
    /// Front camera, facing the operator.
    User,
    /// Back camera, facing the scene.
    Environment,
}

impl FacingMode {
    pub fn for_preference(prefer_back: bool) -> Self {
        if prefer_back {
            FacingMode::Environment
        } else {
            FacingMode::User
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FacingMode::User => "user",
            FacingMode::Environment => "environment",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "user" | "front" => Ok(FacingMode::User),
            "environment" | "back" => Ok(FacingMode::Environment),
            other => Err(anyhow!(
                "unknown facing mode '{}'; expected user or environment",
                other
            )),
        }
    }
}

impl fmt::Display for FacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Constraint passed to a provider when opening a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceConstraint {
    /// Only a device facing exactly this way satisfies the request.
    Exact(FacingMode),
    /// Any video device.
    Any,
}

impl fmt::Display for DeviceConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceConstraint::Exact(facing) => write!(f, "exact:{}", facing),
            DeviceConstraint::Any => f.write_str("any"),
        }
    }
}

/// A live video stream.
///
/// Handles are owned by the capture session. `stop` releases every
/// underlying track; a stopped handle must not produce frames.
pub trait VideoHandle: Send {
    /// Human-readable description for logs.
    fn describe(&self) -> String;

    /// Facing direction of the opened device, when known.
    fn facing(&self) -> Option<FacingMode>;

    /// Grab the frame currently visible on the stream.
    fn current_frame(&mut self) -> Result<Frame>;

    /// Release the device. Idempotent.
    fn stop(&mut self);
}

/// Opens video handles.
pub trait DeviceProvider: Send {
    /// Provider identifier.
    fn name(&self) -> &'static str;

    /// Open a device satisfying `constraint`.
    fn open(&mut self, constraint: DeviceConstraint) -> Result<Box<dyn VideoHandle>>;
}

/// Outcome of a successful acquisition.
#[derive(Clone, Debug)]
pub struct Acquisition {
    pub requested: DeviceConstraint,
    pub opened: DeviceConstraint,
    pub description: String,
    /// Why the requested device could not be opened, when the fallback was used.
    pub fallback_reason: Option<String>,
}

impl Acquisition {
    pub fn fell_back(&self) -> bool {
        self.fallback_reason.is_some()
    }
}

/// Preferred-then-fallback device selection.
pub struct DeviceAcquirer {
    provider: Box<dyn DeviceProvider>,
}

impl DeviceAcquirer {
    pub fn new(provider: Box<dyn DeviceProvider>) -> Self {
        Self { provider }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Replace `current` with a freshly opened handle.
    ///
    /// The previous handle is stopped before any device is requested. When
    /// the fallback fails too, `current` is left empty and the error is returned.
    pub fn acquire(
        &mut self,
        current: &mut Option<Box<dyn VideoHandle>>,
        prefer_back: bool,
    ) -> Result<Acquisition> {
        release(current);

        let provider_name = self.provider.name();
        let requested = DeviceConstraint::Exact(FacingMode::for_preference(prefer_back));
        let (handle, opened, fallback_reason) = match self.provider.open(requested) {
            Ok(handle) => (handle, requested, None),
            Err(err) => {
                let reason = format!("{:#}", err);
                log::warn!(
                    "requested camera ({}) not available, using default camera: {}",
                    requested,
                    reason
                );
                let handle = self
                    .provider
                    .open(DeviceConstraint::Any)
                    .map_err(|fallback_err| {
                        anyhow!(
                            "no capture device available via {}: {} failed ({}), fallback failed ({:#})",
                            provider_name,
                            requested,
                            reason,
                            fallback_err
                        )
                    })?;
                (handle, DeviceConstraint::Any, Some(reason))
            }
        };

        let description = handle.describe();
        log::info!("camera opened: {} ({})", description, opened);
        *current = Some(handle);

        Ok(Acquisition {
            requested,
            opened,
            description,
            fallback_reason,
        })
    }
}

/// Stop and drop the handle in `current`. Returns true when one was active.
pub fn release(current: &mut Option<Box<dyn VideoHandle>>) -> bool {
    match current.take() {
        Some(mut handle) => {
            let description = handle.describe();
            handle.stop();
            log::info!("camera released: {}", description);
            true
        }
        None => false,
    }
}

/// Build the provider named by `settings.source`.
///
/// `stub://...` selects the synthetic provider; `v4l2` (or `v4l2://`) selects
/// local V4L2 devices and requires the ingest-v4l2 feature.
pub fn open_provider(settings: &DeviceSettings) -> Result<Box<dyn DeviceProvider>> {
    let source = settings.source.trim();
    if source.starts_with("stub://") {
        let config = SyntheticConfig::from_url(source, settings.width, settings.height)?;
        return Ok(Box::new(SyntheticProvider::new(config)));
    }
    if source == "v4l2" || source.starts_with("v4l2://") {
        #[cfg(feature = "ingest-v4l2")]
        {
            return Ok(Box::new(V4l2Provider::new(settings.clone())));
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            anyhow::bail!("v4l2 devices require the ingest-v4l2 feature")
        }
    }
    Err(anyhow!(
        "unsupported device source '{}'; expected stub://<name> or v4l2",
        source
    ))
}
