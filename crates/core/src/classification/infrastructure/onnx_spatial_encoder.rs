use std::path::Path;

use ndarray::{ArrayD, ArrayView4};

use crate::classification::domain::spatial_encoder::SpatialEncoder;
use crate::execution::domain::device::Device;
use crate::execution::infrastructure::execution_provider::providers_for;

/// Convolutional backbone exported to ONNX, input `[N, 3, S, S]`.
pub struct OnnxSpatialEncoder {
    session: ort::session::Session,
    output_channels: Option<usize>,
}

impl OnnxSpatialEncoder {
    /// Load the backbone on `device`.
    ///
    /// When the model declares a static spatial input size it must equal
    /// `input_size`.
    pub fn new(
        model_path: &Path,
        input_size: u32,
        device: Device,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let session = ort::session::Session::builder()?
            .with_execution_providers(providers_for(device))?
            .commit_from_file(model_path)?;

        let input_shape = session.inputs().first().and_then(|input| {
            if let ort::value::ValueType::Tensor { ref shape, .. } = input.dtype() {
                Some(shape.iter().copied().collect::<Vec<i64>>())
            } else {
                None
            }
        });
        let Some(input_shape) = input_shape else {
            return Err(format!("{} has no tensor input", model_path.display()).into());
        };
        validate_input_shape(&input_shape, input_size)?;

        // [N, C, ...]; dynamic channel counts are checked at first inference.
        let output_channels = session.outputs().first().and_then(|output| {
            if let ort::value::ValueType::Tensor { ref shape, .. } = output.dtype() {
                shape.get(1).filter(|&&c| c > 0).map(|&c| c as usize)
            } else {
                None
            }
        });

        log::info!(
            "Backbone loaded: {} (input {input_size}px, {} channels, {device})",
            model_path.display(),
            output_channels.map_or_else(|| "dynamic".to_string(), |c| c.to_string())
        );

        Ok(Self {
            session,
            output_channels,
        })
    }

    /// Channel count declared by the model output, if static.
    pub fn output_channels(&self) -> Option<usize> {
        self.output_channels
    }
}

/// `[N, 3, H, W]` where static `H` and `W` must equal `input_size`.
fn validate_input_shape(shape: &[i64], input_size: u32) -> Result<(), String> {
    if shape.len() != 4 {
        return Err(format!("backbone input must be 4-D NCHW, got {shape:?}"));
    }
    if shape[1] > 0 && shape[1] != 3 {
        return Err(format!("backbone input must have 3 channels, got {}", shape[1]));
    }
    for &dim in &shape[2..] {
        if dim > 0 && dim != input_size as i64 {
            return Err(format!(
                "backbone expects {dim}px faces but faces are resized to {input_size}px"
            ));
        }
    }
    Ok(())
}

impl SpatialEncoder for OnnxSpatialEncoder {
    fn encode(
        &mut self,
        batch: ArrayView4<'_, f32>,
    ) -> Result<ArrayD<f32>, Box<dyn std::error::Error>> {
        let input = ort::value::Tensor::from_array(batch.to_owned())?;
        let outputs = self.session.run(ort::inputs![input])?;
        if outputs.len() == 0 {
            return Err("backbone produced no outputs".into());
        }
        let features = outputs[0].try_extract_array::<f32>()?;
        Ok(features.to_owned())
    }
}
