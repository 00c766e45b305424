use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2};
use safetensors::{Dtype, SafeTensorError, SafeTensors};
use thiserror::Error;

use crate::classification::domain::classifier_head::LinearHead;
use crate::classification::domain::temporal_aggregator::LstmAggregator;

const LSTM_WEIGHT_IH: &str = "lstm.weight_ih_l0";
const LSTM_WEIGHT_HH: &str = "lstm.weight_hh_l0";
const LSTM_BIAS_IH: &str = "lstm.bias_ih_l0";
const LSTM_BIAS_HH: &str = "lstm.bias_hh_l0";
const LINEAR_WEIGHT: &str = "linear1.weight";
const LINEAR_BIAS: &str = "linear1.bias";

#[derive(Error, Debug)]
pub enum WeightsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid safetensors data: {0}")]
    Format(#[from] SafeTensorError),
    #[error("missing tensor {0}")]
    Missing(&'static str),
    #[error("tensor {name} has dtype {dtype}, expected F32")]
    Dtype { name: &'static str, dtype: String },
    #[error("{0}")]
    Shape(String),
}

/// LSTM and linear head parameters from a PyTorch state dict export.
pub struct TemporalHeadWeights {
    pub aggregator: LstmAggregator,
    pub head: LinearHead,
}

impl TemporalHeadWeights {
    pub fn load(path: &Path) -> Result<Self, WeightsError> {
        let bytes = std::fs::read(path).map_err(|source| WeightsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&bytes)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, WeightsError> {
        let tensors = SafeTensors::deserialize(bytes)?;

        let weight_ih = matrix(&tensors, LSTM_WEIGHT_IH)?;
        let weight_hh = matrix(&tensors, LSTM_WEIGHT_HH)?;
        let bias_ih = optional_vector(&tensors, LSTM_BIAS_IH)?;
        let bias_hh = optional_vector(&tensors, LSTM_BIAS_HH)?;
        if bias_ih.is_none() && bias_hh.is_none() {
            log::debug!("Temporal head has no LSTM biases; using zeros");
        }
        let aggregator = LstmAggregator::new(weight_ih, weight_hh, bias_ih, bias_hh)
            .map_err(WeightsError::Shape)?;

        let linear_weight = matrix(&tensors, LINEAR_WEIGHT)?;
        let linear_bias = optional_vector(&tensors, LINEAR_BIAS)?
            .ok_or(WeightsError::Missing(LINEAR_BIAS))?;
        let head = LinearHead::new(linear_weight, linear_bias).map_err(WeightsError::Shape)?;

        if head.input_size() != aggregator.hidden_size() {
            return Err(WeightsError::Shape(format!(
                "{LINEAR_WEIGHT} expects {} inputs but the LSTM hidden size is {}",
                head.input_size(),
                aggregator.hidden_size()
            )));
        }

        Ok(Self { aggregator, head })
    }
}

fn f32_values(
    tensors: &SafeTensors<'_>,
    name: &'static str,
) -> Result<Option<(Vec<usize>, Vec<f32>)>, WeightsError> {
    let view = match tensors.tensor(name) {
        Ok(view) => view,
        Err(SafeTensorError::TensorNotFound(_)) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if view.dtype() != Dtype::F32 {
        return Err(WeightsError::Dtype {
            name,
            dtype: format!("{:?}", view.dtype()),
        });
    }
    let values = view
        .data()
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok(Some((view.shape().to_vec(), values)))
}

fn matrix(tensors: &SafeTensors<'_>, name: &'static str) -> Result<Array2<f32>, WeightsError> {
    let (shape, values) = f32_values(tensors, name)?.ok_or(WeightsError::Missing(name))?;
    let [rows, cols] = shape[..] else {
        return Err(WeightsError::Shape(format!("{name} must be 2-D, got {shape:?}")));
    };
    Array2::from_shape_vec((rows, cols), values)
        .map_err(|e| WeightsError::Shape(format!("{name}: {e}")))
}

fn optional_vector(
    tensors: &SafeTensors<'_>,
    name: &'static str,
) -> Result<Option<Array1<f32>>, WeightsError> {
    let Some((shape, values)) = f32_values(tensors, name)? else {
        return Ok(None);
    };
    if shape.len() != 1 {
        return Err(WeightsError::Shape(format!("{name} must be 1-D, got {shape:?}")));
    }
    Ok(Some(Array1::from(values)))
}

/// Serialize named `f32` tensors to safetensors bytes.
#[cfg(test)]
pub(crate) fn encode_tensors(tensors: &[(&str, Vec<usize>, Vec<f32>)]) -> Vec<u8> {
    use safetensors::tensor::TensorView;

    let buffers: Vec<Vec<u8>> = tensors
        .iter()
        .map(|(_, _, values)| values.iter().flat_map(|v| v.to_le_bytes()).collect())
        .collect();
    let views: Vec<(String, TensorView<'_>)> = tensors
        .iter()
        .zip(&buffers)
        .map(|((name, shape, _), data)| {
            (
                name.to_string(),
                TensorView::new(Dtype::F32, shape.clone(), data).unwrap(),
            )
        })
        .collect();
    safetensors::serialize(views, &None).unwrap()
}

/// A bias-free temporal head with input width `input` and hidden size `hidden`.
#[cfg(test)]
pub(crate) fn encode_head(input: usize, hidden: usize) -> Vec<u8> {
    let fill = |n: usize, scale: f32| -> Vec<f32> {
        (0..n).map(|i| ((i % 13) as f32 - 6.0) * scale).collect()
    };
    encode_tensors(&[
        (LSTM_WEIGHT_IH, vec![4 * hidden, input], fill(4 * hidden * input, 0.01)),
        (LSTM_WEIGHT_HH, vec![4 * hidden, hidden], fill(4 * hidden * hidden, 0.02)),
        (LINEAR_WEIGHT, vec![2, hidden], fill(2 * hidden, 0.1)),
        (LINEAR_BIAS, vec![2], vec![0.05, -0.05]),
    ])
}
