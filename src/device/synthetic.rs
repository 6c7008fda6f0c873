//! Synthetic video devices for `stub://` sources.
//!
//! `stub://<name>` exposes one user-facing and one environment-facing camera.
//! The `facing` query parameter narrows what exists:
//!
//! - `stub://desk?facing=user` has no back camera, so a back-camera request
//!   falls back to the user camera.
//! - `stub://none?facing=` has no camera at all.
//!
//! Every opened track is recorded in a shared [`TrackLog`] together with
//! whether it was stopped, so callers can check that handles are released.

use anyhow::{anyhow, Context, Result};
use std::sync::{Arc, Mutex};
use url::Url;

use super::{DeviceConstraint, DeviceProvider, FacingMode, VideoHandle};
use crate::frame::Frame;

/// Frames between synthetic scene changes.
const SCENE_PERIOD_FRAMES: u64 = 25;

/// Track records kept per provider.
const MAX_TRACK_RECORDS: usize = 64;

/// Configuration for a synthetic provider.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub name: String,
    /// Cameras present on the simulated host, in fallback order.
    pub facings: Vec<FacingMode>,
    pub width: u32,
    pub height: u32,
}

impl SyntheticConfig {
    /// Parse a `stub://<name>[?facing=a,b]` source.
    pub fn from_url(source: &str, width: u32, height: u32) -> Result<Self> {
        let url = Url::parse(source).with_context(|| format!("parse device source {}", source))?;
        if url.scheme() != "stub" {
            return Err(anyhow!(
                "synthetic source must use the stub:// scheme, got '{}'",
                url.scheme()
            ));
        }
        let name = url
            .host_str()
            .filter(|host| !host.is_empty())
            .unwrap_or("camera")
            .to_string();

        let mut facings = vec![FacingMode::Environment, FacingMode::User];
        if let Some((_, value)) = url.query_pairs().find(|(key, _)| key == "facing") {
            facings = value
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(FacingMode::parse)
                .collect::<Result<Vec<_>>>()?;
        }

        Ok(Self {
            name,
            facings,
            width,
            height,
        })
    }
}

/// One track opened by a synthetic provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackRecord {
    pub id: u64,
    pub facing: FacingMode,
    pub opened_with: DeviceConstraint,
    pub stopped: bool,
}

/// Shared record of every track a provider opened.
#[derive(Clone, Debug, Default)]
pub struct TrackLog {
    records: Arc<Mutex<Vec<TrackRecord>>>,
}

impl TrackLog {
    pub fn records(&self) -> Vec<TrackRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Tracks opened and not yet stopped.
    pub fn live(&self) -> usize {
        self.records().iter().filter(|r| !r.stopped).count()
    }

    fn push(&self, record: TrackRecord) {
        if let Ok(mut records) = self.records.lock() {
            if records.len() >= MAX_TRACK_RECORDS {
                // Oldest stopped track goes first; live tracks are only evicted
                // when nothing else is left.
                let victim = records.iter().position(|r| r.stopped).unwrap_or(0);
                records.remove(victim);
            }
            records.push(record);
        }
    }

    fn mark_stopped(&self, id: u64) {
        if let Ok(mut records) = self.records.lock() {
            if let Some(record) = records.iter_mut().find(|r| r.id == id) {
                record.stopped = true;
            }
        }
    }
}

/// Provider of synthetic cameras.
pub struct SyntheticProvider {
    config: SyntheticConfig,
    tracks: TrackLog,
    next_id: u64,
}

impl SyntheticProvider {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            tracks: TrackLog::default(),
            next_id: 1,
        }
    }

    /// Handle to the shared track record.
    pub fn track_log(&self) -> TrackLog {
        self.tracks.clone()
    }

    fn select(&self, constraint: DeviceConstraint) -> Result<FacingMode> {
        match constraint {
            DeviceConstraint::Exact(facing) => {
                if self.config.facings.contains(&facing) {
                    Ok(facing)
                } else {
                    Err(anyhow!(
                        "no {}-facing camera on stub://{}",
                        facing,
                        self.config.name
                    ))
                }
            }
            DeviceConstraint::Any => self
                .config
                .facings
                .first()
                .copied()
                .ok_or_else(|| anyhow!("no video devices on stub://{}", self.config.name)),
        }
    }
}

impl DeviceProvider for SyntheticProvider {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open(&mut self, constraint: DeviceConstraint) -> Result<Box<dyn VideoHandle>> {
        let facing = self.select(constraint)?;
        let id = self.next_id;
        self.next_id += 1;
        self.tracks.push(TrackRecord {
            id,
            facing,
            opened_with: constraint,
            stopped: false,
        });
        log::debug!(
            "synthetic: opened track {} ({}) on stub://{}",
            id,
            facing,
            self.config.name
        );
        Ok(Box::new(SyntheticHandle {
            id,
            facing,
            name: self.config.name.clone(),
            width: self.config.width,
            height: self.config.height,
            frame_count: 0,
            scene_state: 0,
            stopped: false,
            tracks: self.tracks.clone(),
        }))
    }
}

struct SyntheticHandle {
    id: u64,
    facing: FacingMode,
    name: String,
    width: u32,
    height: u32,
    frame_count: u64,
    scene_state: u8,
    stopped: bool,
    tracks: TrackLog,
}

impl SyntheticHandle {
    /// Horizontal gradient whose brightness shifts every scene change.
    fn generate_pixels(&mut self) -> Vec<u8> {
        if self.frame_count.is_multiple_of(SCENE_PERIOD_FRAMES) {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let base: u8 = match self.facing {
            FacingMode::Environment => 40,
            FacingMode::User => 150,
        };
        let level = base.wrapping_add(self.scene_state.wrapping_mul(23));
        let width = self.width.max(1) as usize;

        let mut pixels = vec![0u8; self.width as usize * self.height as usize * 3];
        for (i, pixel) in pixels.chunks_exact_mut(3).enumerate() {
            let x = (i % width) as u64;
            let shade = level.wrapping_add(((x * 32) / width as u64) as u8);
            pixel[0] = shade;
            pixel[1] = shade.wrapping_add((self.frame_count % 4) as u8);
            pixel[2] = shade / 2;
        }
        pixels
    }
}

impl VideoHandle for SyntheticHandle {
    fn describe(&self) -> String {
        format!(
            "stub://{} track {} ({}, {}x{})",
            self.name, self.id, self.facing, self.width, self.height
        )
    }

    fn facing(&self) -> Option<FacingMode> {
        Some(self.facing)
    }

    fn current_frame(&mut self) -> Result<Frame> {
        if self.stopped {
            return Err(anyhow!("track {} on stub://{} is stopped", self.id, self.name));
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::from_rgb(pixels, self.width, self.height)
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.tracks.mark_stopped(self.id);
        }
    }
}

impl Drop for SyntheticHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
