use std::fmt;

use serde::Serialize;

use crate::classification::domain::classifier_head::RawScores;
use crate::shared::prediction_error::PredictionError;

/// Model output class, indexed the way the classifier was trained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Real,
    Fake,
}

/// Class order of the classifier head.
pub const CLASS_ORDER: [Verdict; 2] = [Verdict::Real, Verdict::Fake];

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Real => f.write_str("real"),
            Verdict::Fake => f.write_str("fake"),
        }
    }
}

/// A verdict plus the softmax probability assigned to it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Prediction {
    pub prediction: Verdict,
    pub confidence: f32,
}

/// Numerically stable softmax.
pub fn softmax(scores: &RawScores) -> [f32; 2] {
    let [a, b] = *scores.values();
    let max = a.max(b);
    let ea = (a - max).exp();
    let eb = (b - max).exp();
    let sum = ea + eb;
    [ea / sum, eb / sum]
}

/// Turn raw scores into a verdict. Ties resolve to the first class.
pub fn format(scores: &RawScores) -> Result<Prediction, PredictionError> {
    if !scores.is_finite() {
        return Err(PredictionError::InferenceFailed(format!(
            "classifier produced non-finite scores {:?}",
            scores.values()
        )));
    }
    let probs = softmax(scores);
    let index = if probs[1] > probs[0] { 1 } else { 0 };
    Ok(Prediction {
        prediction: CLASS_ORDER[index],
        confidence: probs[index],
    })
}
