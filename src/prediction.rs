//! Prediction data model shared by the client, the smoothing engine and presenters.

use serde::{Deserialize, Serialize};

/// Maximum number of entries in a ranked result.
pub const MAX_RANKED: usize = 3;

/// One classifier output for a single frame.
///
/// `confidence` is an opaque non-negative score. It is not required to lie in
/// `0..=1` or to sum to anything across labels of the same frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f64,
}

impl Prediction {
    pub fn new(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// All predictions produced by one sampling cycle. May be empty.
pub type PredictionSet = Vec<Prediction>;

/// Success body of the prediction endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub predictions: PredictionSet,
}

/// A label with its window-normalized score.
///
/// `score` is kept unrounded; rounding happens only in [`RankedEntry::confidence_text`].
#[derive(Clone, Debug, PartialEq)]
pub struct RankedEntry {
    pub label: String,
    pub score: f64,
}

impl RankedEntry {
    /// Score formatted with two decimals, e.g. `"23.33"`. Halves round up.
    pub fn confidence_text(&self) -> String {
        format!("{:.2}", round2(self.score))
    }
}

/// Round to two decimals, halves away from zero.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Entry of the render sink: `{label, confidence: "NN.NN"}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedPrediction {
    pub label: String,
    pub confidence: String,
}

/// Top labels of the current window, best first, at most [`MAX_RANKED`] long.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RankedResult {
    entries: Vec<RankedEntry>,
}

impl RankedResult {
    pub(crate) fn from_sorted(mut entries: Vec<RankedEntry>) -> Self {
        entries.truncate(MAX_RANKED);
        Self { entries }
    }

    pub fn entries(&self) -> &[RankedEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.label.as_str()).collect()
    }

    /// Render-sink form with scores rounded to two decimals.
    pub fn to_rendered(&self) -> Vec<RenderedPrediction> {
        self.entries
            .iter()
            .map(|e| RenderedPrediction {
                label: e.label.clone(),
                confidence: e.confidence_text(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranked_result_is_capped() {
        let entries = (0..5)
            .map(|i| RankedEntry {
                label: format!("l{}", i),
                score: 10.0 - i as f64,
            })
            .collect();
        let ranked = RankedResult::from_sorted(entries);
        assert_eq!(ranked.len(), MAX_RANKED);
        assert_eq!(ranked.labels(), vec!["l0", "l1", "l2"]);
    }

    #[test]
    fn confidence_text_has_two_decimals() {
        let entry = RankedEntry {
            label: "dog".to_string(),
            score: 70.0 / 3.0,
        };
        assert_eq!(entry.confidence_text(), "23.33");
        let entry = RankedEntry {
            label: "cat".to_string(),
            score: 80.0,
        };
        assert_eq!(entry.confidence_text(), "80.00");
        let entry = RankedEntry {
            label: "fox".to_string(),
            score: 45.625,
        };
        assert_eq!(entry.confidence_text(), "45.63");
    }

    #[test]
    fn predict_response_parses_endpoint_body() -> anyhow::Result<()> {
        let body = r#"{"predictions":[{"label":"tabby","confidence":61.5},{"label":"tiger_cat","confidence":20}]}"#;
        let parsed: PredictResponse = serde_json::from_str(body)?;
        assert_eq!(parsed.predictions.len(), 2);
        assert_eq!(parsed.predictions[1], Prediction::new("tiger_cat", 20.0));
        Ok(())
    }
}
