//! In-process classifier for `stub://` endpoints.
//!
//! Mirrors the shape of a real model server: three labels per frame with
//! percentage confidences rounded to two decimals. The leading label follows
//! the still's mean brightness, so a steady scene keeps a steady leader while
//! per-frame jitter (derived from the JPEG digest) moves the runners-up.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use super::{FetchOutcome, PredictionClient};
use crate::frame::StillImage;
use crate::prediction::{round2, Prediction, PredictionSet};

const VOCABULARY: &[&str] = &[
    "brown_bear",
    "timber_wolf",
    "red_fox",
    "tabby",
    "tiger_cat",
    "golden_retriever",
    "lion",
    "tiger",
    "zebra",
    "african_elephant",
    "ostrich",
    "bald_eagle",
];

pub struct StubPredictionClient {
    name: String,
}

impl StubPredictionClient {
    pub fn new(url: &str) -> Self {
        Self {
            name: url.trim_start_matches("stub://").to_string(),
        }
    }

    pub fn endpoint_name(&self) -> &str {
        &self.name
    }

    fn classify(&self, jpeg: &[u8]) -> Result<PredictionSet> {
        let image = image::load_from_memory(jpeg).context("decode still for stub classifier")?;
        let luma = image.to_luma8();
        let count = luma.as_raw().len().max(1) as u64;
        let mean = luma.as_raw().iter().map(|&p| p as u64).sum::<u64>() / count;

        let digest: [u8; 32] = Sha256::digest(jpeg).into();
        let len = VOCABULARY.len();
        let leader = (mean as usize * len / 256).min(len - 1);
        let runner_up = (leader + 1 + digest[1] as usize % 2) % len;
        let third = (leader + len - 1) % len;

        let top = 55.0 + (digest[0] % 30) as f64;
        let second = (100.0 - top) * (0.5 + (digest[2] % 30) as f64 / 100.0);
        let rest = (100.0 - top - second) * 0.6;

        Ok(vec![
            Prediction::new(VOCABULARY[leader], round2(top)),
            Prediction::new(VOCABULARY[runner_up], round2(second)),
            Prediction::new(VOCABULARY[third], round2(rest)),
        ])
    }
}

impl PredictionClient for StubPredictionClient {
    fn name(&self) -> &str {
        "stub"
    }

    fn predict(&self, still: &StillImage) -> Result<FetchOutcome> {
        let predictions = self.classify(&still.jpeg)?;
        log::debug!(
            "stub classifier {}: frame {} -> {}",
            self.name,
            still.sequence,
            predictions[0].label
        );
        Ok(FetchOutcome::Predictions(predictions))
    }
}
