//! Sliding-window smoothing of per-frame predictions.
//!
//! `SmoothingEngine` keeps the last `window` prediction sets (oldest first) and,
//! on every arrival, recomputes a ranking from scratch:
//!
//! 1. Evict the oldest set when the window is full, then append the new one.
//! 2. Sum each label's confidence across every set in the window.
//! 3. Divide by the number of sets currently held (not by the window size).
//! 4. Sort descending by the unrounded score, ties by label ascending.
//! 5. Keep the top [`MAX_RANKED`](crate::prediction::MAX_RANKED).
//!
//! Empty sets occupy a slot like any other, so a frame with no detections
//! dilutes every label in the window.

use std::collections::{HashMap, VecDeque};

use crate::prediction::{PredictionSet, RankedEntry, RankedResult};

/// Default number of prediction sets kept in the window.
pub const DEFAULT_WINDOW: usize = 5;

/// Result of a sequenced ingest.
#[derive(Clone, Debug, PartialEq)]
pub enum Ingested {
    /// The set was appended and the window re-ranked.
    Ranked(RankedResult),
    /// The set was older than (or a replay of) the last ingested frame and was dropped.
    Stale { sequence: u64, last: u64 },
}

/// Bounded rolling history of prediction sets.
pub struct SmoothingEngine {
    history: VecDeque<PredictionSet>,
    window: usize,
    last_sequence: Option<u64>,
}

impl SmoothingEngine {
    /// Create an engine holding at most `window` sets. A window of 0 is treated as 1.
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            history: VecDeque::with_capacity(window),
            window,
            last_sequence: None,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Number of sets currently held.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Held sets, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &PredictionSet> + '_ {
        self.history.iter()
    }

    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    /// Append a set and return the re-ranked window.
    pub fn ingest(&mut self, preds: PredictionSet) -> RankedResult {
        while self.history.len() >= self.window {
            self.history.pop_front();
        }
        self.history.push_back(preds);
        self.ranked()
    }

    /// Append a set captured as frame `sequence`.
    ///
    /// Sets whose sequence is not newer than the last ingested one are dropped
    /// so that late responses can never reorder the window.
    pub fn ingest_sequenced(&mut self, sequence: u64, preds: PredictionSet) -> Ingested {
        if let Some(last) = self.last_sequence {
            if sequence <= last {
                log::debug!(
                    "dropping stale prediction set for frame {} (last ingested {})",
                    sequence,
                    last
                );
                return Ingested::Stale { sequence, last };
            }
        }
        self.last_sequence = Some(sequence);
        Ingested::Ranked(self.ingest(preds))
    }

    /// Ranking of the current window without ingesting anything.
    pub fn ranked(&self) -> RankedResult {
        rank(&self.history)
    }

    /// Forget all held sets. The sequence watermark survives so a late
    /// response from before the reset is still rejected.
    pub fn clear(&mut self) {
        self.history.clear();
    }
}

impl Default for SmoothingEngine {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

/// Per-label sums over every set in `history`.
pub fn aggregate<'a, I>(history: I) -> HashMap<&'a str, f64>
where
    I: IntoIterator<Item = &'a PredictionSet>,
{
    let mut scores: HashMap<&str, f64> = HashMap::new();
    for prediction in history.into_iter().flatten() {
        *scores.entry(prediction.label.as_str()).or_insert(0.0) += prediction.confidence;
    }
    scores
}

fn rank(history: &VecDeque<PredictionSet>) -> RankedResult {
    if history.is_empty() {
        return RankedResult::default();
    }
    let fill = history.len() as f64;
    let mut entries: Vec<RankedEntry> = aggregate(history)
        .into_iter()
        .map(|(label, sum)| RankedEntry {
            label: label.to_string(),
            score: sum / fill,
        })
        .collect();
    entries.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.label.cmp(&b.label)));
    RankedResult::from_sorted(entries)
}
