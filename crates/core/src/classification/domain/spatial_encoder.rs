use ndarray::{Array2, ArrayD, ArrayView4, Axis, Ix2, Ix4};

/// Convolutional backbone applied to each sequence position independently.
pub trait SpatialEncoder: Send {
    /// Encode a `[N, 3, S, S]` batch into `[N, C, h, w]` (or `[N, C]` for
    /// backbones exported with pooling).
    fn encode(
        &mut self,
        batch: ArrayView4<'_, f32>,
    ) -> Result<ArrayD<f32>, Box<dyn std::error::Error>>;
}

/// Global average pool over the spatial axes, one `C`-length embedding per position.
pub fn global_average_pool(feature_map: &ArrayD<f32>) -> Result<Array2<f32>, String> {
    match feature_map.ndim() {
        2 => feature_map
            .view()
            .into_dimensionality::<Ix2>()
            .map(|v| v.to_owned())
            .map_err(|e| e.to_string()),
        4 => {
            let map = feature_map
                .view()
                .into_dimensionality::<Ix4>()
                .map_err(|e| e.to_string())?;
            let (_, _, h, w) = map.dim();
            if h == 0 || w == 0 {
                return Err(format!("empty spatial feature map {:?}", map.shape()));
            }
            map.sum_axis(Axis(3))
                .sum_axis(Axis(2))
                .mapv(|v| v / (h * w) as f32)
                .into_dimensionality::<Ix2>()
                .map_err(|e| e.to_string())
        }
        _ => Err(format!(
            "unsupported feature map shape {:?}",
            feature_map.shape()
        )),
    }
}
