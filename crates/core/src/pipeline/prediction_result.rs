use serde::Serialize;

use crate::classification::domain::verdict::Prediction;
use crate::shared::prediction_error::PredictionError;

/// What a caller receives for one video: a verdict or a rendered error.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PredictionResult {
    Success(Prediction),
    Failure { error: String },
}

impl PredictionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, PredictionResult::Success(_))
    }
}

impl From<Result<Prediction, PredictionError>> for PredictionResult {
    fn from(outcome: Result<Prediction, PredictionError>) -> Self {
        match outcome {
            Ok(prediction) => PredictionResult::Success(prediction),
            Err(e) => PredictionResult::Failure {
                error: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classification::domain::verdict::Verdict;

    #[test]
    fn test_success_serializes_flat() {
        let result = PredictionResult::from(Ok(Prediction {
            prediction: Verdict::Real,
            confidence: 0.5,
        }));
        assert!(result.is_success());
        assert_eq!(
            serde_json::to_string(&result).unwrap(),
            r#"{"prediction":"real","confidence":0.5}"#
        );
    }

    #[test]
    fn test_failure_serializes_message() {
        let result = PredictionResult::from(Err(PredictionError::NoFaceDetected));
        assert!(!result.is_success());
        assert_eq!(
            serde_json::to_string(&result).unwrap(),
            r#"{"error":"No faces detected in the video"}"#
        );
    }
}
