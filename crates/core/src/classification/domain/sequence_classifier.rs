use ndarray::Array2;

use crate::classification::domain::classifier_head::LinearHead;
use crate::classification::domain::face_normalizer::NormalizedTensor;
use crate::classification::domain::sequence_model::{
    ClassifierOutput, InferenceError, SequenceModel,
};
use crate::classification::domain::spatial_encoder::{global_average_pool, SpatialEncoder};
use crate::classification::domain::temporal_aggregator::LstmAggregator;
use crate::shared::constants::EMBEDDING_MAGNITUDE_LIMIT;

/// Backbone → average pool → LSTM → linear head.
pub struct SequenceClassifier {
    encoder: Box<dyn SpatialEncoder>,
    aggregator: LstmAggregator,
    head: LinearHead,
}

impl SequenceClassifier {
    pub fn new(
        encoder: Box<dyn SpatialEncoder>,
        aggregator: LstmAggregator,
        head: LinearHead,
    ) -> Result<Self, String> {
        if head.input_size() != aggregator.hidden_size() {
            return Err(format!(
                "linear head expects {} inputs but the LSTM hidden size is {}",
                head.input_size(),
                aggregator.hidden_size()
            ));
        }
        Ok(Self {
            encoder,
            aggregator,
            head,
        })
    }
}

impl SequenceModel for SequenceClassifier {
    fn infer(&mut self, input: &NormalizedTensor) -> Result<ClassifierOutput, InferenceError> {
        if input.is_empty() {
            return Err(InferenceError::Failed("empty face sequence".into()));
        }

        let feature_map = self
            .encoder
            .encode(input.view())
            .map_err(|e| InferenceError::from_message(e.to_string()))?;
        let embeddings = global_average_pool(&feature_map).map_err(InferenceError::Failed)?;

        if embeddings.nrows() != input.len() {
            return Err(InferenceError::Failed(format!(
                "backbone returned {} embeddings for {} faces",
                embeddings.nrows(),
                input.len()
            )));
        }
        if embeddings.ncols() != self.aggregator.input_size() {
            return Err(InferenceError::Failed(format!(
                "backbone produces {} channels but the LSTM expects {}",
                embeddings.ncols(),
                self.aggregator.input_size()
            )));
        }

        report_unstable_embeddings(&embeddings);

        let hidden = self.aggregator.final_hidden(embeddings.view());
        let scores = self.head.project(hidden.view());

        Ok(ClassifierOutput {
            feature_map,
            scores,
        })
    }
}

/// Log (never fail on) non-finite or oversized embedding values.
fn report_unstable_embeddings(embeddings: &Array2<f32>) {
    let non_finite = embeddings.iter().filter(|v| !v.is_finite()).count();
    if non_finite > 0 {
        log::warn!("Embedding sequence contains {non_finite} non-finite values");
    }
    let oversized = embeddings
        .iter()
        .filter(|v| v.is_finite() && v.abs() > EMBEDDING_MAGNITUDE_LIMIT)
        .count();
    if oversized > 0 {
        log::warn!(
            "Embedding sequence contains {oversized} values above {EMBEDDING_MAGNITUDE_LIMIT:e}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array4, ArrayD, ArrayView4, Axis, IxDyn};

    /// Emits `[N, C, 2, 2]` where every cell of channel `c` holds the mean of
    /// the input position times `c + 1`.
    struct StubEncoder {
        channels: usize,
        fail_with: Option<String>,
    }

    impl SpatialEncoder for StubEncoder {
        fn encode(
            &mut self,
            batch: ArrayView4<'_, f32>,
        ) -> Result<ArrayD<f32>, Box<dyn std::error::Error>> {
            if let Some(ref msg) = self.fail_with {
                return Err(msg.clone().into());
            }
            let n = batch.len_of(Axis(0));
            let mut out = Array4::<f32>::zeros((n, self.channels, 2, 2));
            for i in 0..n {
                let mean = batch.index_axis(Axis(0), i).mean().unwrap_or(0.0);
                for c in 0..self.channels {
                    out.slice_mut(ndarray::s![i, c, .., ..]).fill(mean * (c + 1) as f32);
                }
            }
            Ok(out.into_dyn())
        }
    }

    fn classifier(channels: usize, hidden: usize, fail_with: Option<&str>) -> SequenceClassifier {
        let weight_ih = Array2::from_shape_fn((4 * hidden, channels), |(r, c)| {
            ((r * 7 + c * 3) % 11) as f32 / 11.0 - 0.5
        });
        let weight_hh = Array2::from_shape_fn((4 * hidden, hidden), |(r, c)| {
            ((r + c * 5) % 7) as f32 / 7.0 - 0.5
        });
        let lstm = LstmAggregator::new(weight_ih, weight_hh, None, None).unwrap();
        let head = LinearHead::new(
            Array2::from_shape_fn((2, hidden), |(r, c)| {
                if r == 0 {
                    c as f32
                } else {
                    -(c as f32)
                }
            }),
            Array1::from(vec![0.1, -0.1]),
        )
        .unwrap();
        SequenceClassifier::new(
            Box::new(StubEncoder {
                channels,
                fail_with: fail_with.map(String::from),
            }),
            lstm,
            head,
        )
        .unwrap()
    }

    fn input(len: usize) -> NormalizedTensor {
        let array = Array4::from_shape_fn((len, 3, 4, 4), |(i, c, y, x)| {
            (i as f32 * 0.3) - (c as f32 * 0.1) + (y * x) as f32 * 0.01
        });
        NormalizedTensor::from_array(array).unwrap()
    }

    #[test]
    fn test_infer_is_idempotent() {
        let mut model = classifier(6, 3, None);
        let tensor = input(5);
        let first = model.infer(&tensor).unwrap();
        let second = model.infer(&tensor).unwrap();
        assert_eq!(first.scores, second.scores);
        assert_eq!(first.feature_map.shape(), &[5, 6, 2, 2]);
    }

    #[test]
    fn test_sequence_order_affects_scores() {
        let mut model = classifier(6, 3, None);
        let forward = input(4);
        let mut reversed_array = forward.view().to_owned();
        reversed_array.invert_axis(Axis(0));
        let reversed = NormalizedTensor::from_array(reversed_array).unwrap();
        let a = model.infer(&forward).unwrap().scores;
        let b = model.infer(&reversed).unwrap().scores;
        assert_ne!(a, b);
    }

    #[test]
    fn test_channel_mismatch_is_inference_failure() {
        let mut model = classifier(6, 3, None);
        model.encoder = Box::new(StubEncoder {
            channels: 5,
            fail_with: None,
        });
        let err = model.infer(&input(2)).unwrap_err();
        assert!(matches!(err, InferenceError::Failed(ref m) if m.contains("channels")));
    }

    #[test]
    fn test_encoder_oom_is_resource_exhausted() {
        let mut model = classifier(6, 3, Some("CUDA error: out of memory"));
        let err = model.infer(&input(2)).unwrap_err();
        assert!(err.is_resource_exhausted());
    }

    #[test]
    fn test_head_size_must_match_hidden() {
        let lstm =
            LstmAggregator::new(Array2::zeros((8, 4)), Array2::zeros((8, 2)), None, None).unwrap();
        let head = LinearHead::new(Array2::zeros((2, 3)), Array1::zeros(2)).unwrap();
        let encoder = Box::new(StubEncoder {
            channels: 4,
            fail_with: None,
        });
        assert!(SequenceClassifier::new(encoder, lstm, head).is_err());
    }

    #[test]
    fn test_non_finite_embeddings_do_not_abort() {
        let mut model = classifier(2, 2, None);
        let mut array = input(2).view().to_owned();
        array[[0, 0, 0, 0]] = f32::NAN;
        let tensor = NormalizedTensor::from_array(array).unwrap();
        assert!(model.infer(&tensor).is_ok());
    }

    #[test]
    fn test_pooled_backbone_output_is_accepted() {
        struct PooledEncoder;
        impl SpatialEncoder for PooledEncoder {
            fn encode(
                &mut self,
                batch: ArrayView4<'_, f32>,
            ) -> Result<ArrayD<f32>, Box<dyn std::error::Error>> {
                Ok(ArrayD::from_elem(IxDyn(&[batch.len_of(Axis(0)), 4]), 0.5))
            }
        }
        let lstm =
            LstmAggregator::new(Array2::zeros((8, 4)), Array2::zeros((8, 2)), None, None).unwrap();
        let head = LinearHead::new(Array2::zeros((2, 2)), Array1::from(vec![1.0, 0.0])).unwrap();
        let mut model = SequenceClassifier::new(Box::new(PooledEncoder), lstm, head).unwrap();
        let out = model.infer(&input(3)).unwrap();
        assert_eq!(out.scores.values(), &[1.0, 0.0]);
    }
}
