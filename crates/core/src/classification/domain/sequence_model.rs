use ndarray::ArrayD;
use thiserror::Error;

use crate::classification::domain::classifier_head::RawScores;
use crate::classification::domain::face_normalizer::NormalizedTensor;

/// Substrings that identify an allocation failure in runtime error text.
const RESOURCE_EXHAUSTION_MARKERS: &[&str] = &[
    "out of memory",
    "outofmemory",
    "failed to allocate",
    "cudaerrormemoryallocation",
    "bad_alloc",
    "e_outofmemory",
    "resource exhausted",
];

/// Failure of a single sequence inference.
///
/// Kept separate from the user-facing taxonomy so the execution controller
/// can decide whether a retry on another device makes sense.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("{0}")]
    Failed(String),
}

impl InferenceError {
    /// Classify a runtime error message.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_lowercase();
        if RESOURCE_EXHAUSTION_MARKERS.iter().any(|m| lowered.contains(m)) {
            InferenceError::ResourceExhausted(message)
        } else {
            InferenceError::Failed(message)
        }
    }

    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, InferenceError::ResourceExhausted(_))
    }
}

/// Result of one forward pass.
#[derive(Clone, Debug)]
pub struct ClassifierOutput {
    /// Spatial backbone output for every position, before pooling.
    pub feature_map: ArrayD<f32>,
    pub scores: RawScores,
}

/// A loaded classifier that maps a face sequence to two class scores.
pub trait SequenceModel: Send {
    fn infer(&mut self, input: &NormalizedTensor) -> Result<ClassifierOutput, InferenceError>;
}
