use std::path::{Path, PathBuf};

use crate::classification::domain::sequence_classifier::SequenceClassifier;
use crate::classification::domain::sequence_model::SequenceModel;
use crate::classification::infrastructure::onnx_spatial_encoder::OnnxSpatialEncoder;
use crate::classification::infrastructure::temporal_head_weights::TemporalHeadWeights;
use crate::execution::domain::device::Device;
use crate::execution::domain::model_factory::ModelFactory;
use crate::shared::constants::{BACKBONE_MODEL_NAME, FACE_INPUT_SIZE, TEMPORAL_HEAD_WEIGHTS_NAME};
use crate::shared::prediction_error::PredictionError;

/// Loads the classifier from a model directory holding the backbone graph
/// and the temporal head weights.
pub struct OnnxModelFactory {
    backbone_path: PathBuf,
    head_path: PathBuf,
}

impl OnnxModelFactory {
    /// Fails with `ModelLoadFailed` unless both artifacts exist.
    pub fn new(model_dir: &Path) -> Result<Self, PredictionError> {
        let backbone_path = model_dir.join(BACKBONE_MODEL_NAME);
        let head_path = model_dir.join(TEMPORAL_HEAD_WEIGHTS_NAME);
        for path in [&backbone_path, &head_path] {
            if !path.is_file() {
                return Err(PredictionError::ModelLoadFailed(format!(
                    "model file not found: {}",
                    path.display()
                )));
            }
        }
        Ok(Self {
            backbone_path,
            head_path,
        })
    }
}

impl ModelFactory for OnnxModelFactory {
    fn load(&self, device: Device) -> Result<Box<dyn SequenceModel>, Box<dyn std::error::Error>> {
        let weights = TemporalHeadWeights::load(&self.head_path)?;
        let encoder = OnnxSpatialEncoder::new(&self.backbone_path, FACE_INPUT_SIZE, device)?;

        if let Some(channels) = encoder.output_channels() {
            if channels != weights.aggregator.input_size() {
                return Err(format!(
                    "backbone produces {channels} channels but {} expects {}",
                    TEMPORAL_HEAD_WEIGHTS_NAME,
                    weights.aggregator.input_size()
                )
                .into());
            }
        }

        let classifier =
            SequenceClassifier::new(Box::new(encoder), weights.aggregator, weights.head)?;
        Ok(Box::new(classifier))
    }
}
