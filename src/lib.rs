//! Frame Ranker
//!
//! Samples stills from a live video source on a fixed cadence, sends each
//! still to a remote classifier and keeps a temporally smoothed top-3 ranking
//! of the predicted labels.
//!
//! # Pipeline
//!
//! Device acquisition → frame sampling → prediction client → smoothing →
//! presenter. A `CaptureSession` owns every stage; there is no process-wide
//! state.
//!
//! # Module Structure
//!
//! - `device`: video providers and the preferred-then-fallback acquirer
//! - `frame`: raw RGB frames and encoded stills
//! - `sampler`: still extraction and JPEG encoding
//! - `client`: prediction clients (HTTP multipart, in-process stub)
//! - `prediction`: prediction and ranking types
//! - `smoothing`: sliding-window aggregation
//! - `presenter`: console, JSON and HTML render sinks
//! - `session`: the capture session and its sampling worker
//! - `config`: `rankerd` configuration loading

pub mod client;
pub mod config;
pub mod device;
pub mod frame;
pub mod prediction;
pub mod presenter;
pub mod sampler;
pub mod session;
pub mod smoothing;

pub use client::{FetchOutcome, PredictionClient};
pub use config::RankerdConfig;
pub use device::{
    Acquisition, DeviceAcquirer, DeviceConstraint, DeviceProvider, FacingMode, VideoHandle,
};
pub use frame::{Frame, StillImage};
pub use prediction::{Prediction, PredictionSet, RankedEntry, RankedResult, RenderedPrediction};
pub use presenter::{Presenter, PresenterKind};
pub use session::{CaptureSession, CycleOutcome, SessionStats};
pub use smoothing::{Ingested, SmoothingEngine};
