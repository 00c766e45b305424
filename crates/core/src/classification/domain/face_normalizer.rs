use image::imageops::{self, FilterType};
use ndarray::{s, Array4, ArrayView4};

use crate::shared::constants::FACE_INPUT_SIZE;
use crate::shared::face_image::{FaceImage, FaceSequence};
use crate::shared::prediction_error::PredictionError;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Face sequence as the backbone consumes it: `[L, 3, S, S]`, `L >= 1`.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedTensor(Array4<f32>);

impl NormalizedTensor {
    /// Wrap an existing `[L, 3, S, S]` array. Returns `None` when `L` is zero
    /// or the layout isn't three square channels.
    pub fn from_array(array: Array4<f32>) -> Option<Self> {
        let (len, channels, h, w) = array.dim();
        if len == 0 || channels != 3 || h != w || h == 0 {
            return None;
        }
        Some(Self(array))
    }

    /// Sequence length.
    pub fn len(&self) -> usize {
        self.0.dim().0
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spatial side length.
    pub fn size(&self) -> usize {
        self.0.dim().2
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.0.view()
    }
}

/// Resizes faces to a fixed square and applies ImageNet normalization.
pub struct FaceNormalizer {
    size: u32,
}

impl Default for FaceNormalizer {
    fn default() -> Self {
        Self::new(FACE_INPUT_SIZE)
    }
}

impl FaceNormalizer {
    pub fn new(size: u32) -> Self {
        Self { size }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Normalize every face independently into one batch tensor.
    ///
    /// Any bad face fails the whole sequence.
    pub fn normalize(&self, faces: &FaceSequence) -> Result<NormalizedTensor, PredictionError> {
        if faces.is_empty() {
            return Err(PredictionError::PreprocessFailed(
                "cannot normalize an empty face sequence".into(),
            ));
        }
        if self.size == 0 {
            return Err(PredictionError::PreprocessFailed(
                "target size must be positive".into(),
            ));
        }

        let side = self.size as usize;
        let mut tensor = Array4::<f32>::zeros((faces.len(), 3, side, side));
        for (i, face) in faces.iter().enumerate() {
            self.write_face(face, tensor.slice_mut(s![i, .., .., ..]))
                .map_err(|reason| {
                    PredictionError::PreprocessFailed(format!(
                        "face from frame {}: {reason}",
                        face.frame_index()
                    ))
                })?;
        }

        Ok(NormalizedTensor(tensor))
    }

    fn write_face(
        &self,
        face: &FaceImage,
        mut out: ndarray::ArrayViewMut3<'_, f32>,
    ) -> Result<(), String> {
        let image = face.image();
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Err(format!("zero-sized crop {w}x{h}"));
        }
        if image.as_raw().len() != (w as usize) * (h as usize) * 3 {
            return Err(format!(
                "buffer holds {} bytes, expected {}",
                image.as_raw().len(),
                w as usize * h as usize * 3
            ));
        }

        // Plain resize without aspect preservation.
        let resized = if (w, h) == (self.size, self.size) {
            image.clone()
        } else {
            imageops::resize(image, self.size, self.size, FilterType::Triangle)
        };

        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                out[[c, y as usize, x as usize]] = (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::{Rgb, RgbImage};
    use rstest::rstest;

    fn sequence_of(sizes: &[(u32, u32)]) -> FaceSequence {
        let mut seq = FaceSequence::with_capacity(sizes.len());
        for (i, &(w, h)) in sizes.iter().enumerate() {
            let img = RgbImage::from_pixel(w, h, Rgb([128, 64, 200]));
            assert!(seq.push(FaceImage::new(img, i)));
        }
        seq
    }

    #[rstest]
    #[case(1)]
    #[case(7)]
    #[case(32)]
    fn test_output_shape_for_any_length(#[case] len: usize) {
        let sizes: Vec<(u32, u32)> = (0..len)
            .map(|i| (20 + i as u32 * 13, 300 - i as u32 * 5))
            .collect();
        let tensor = FaceNormalizer::default()
            .normalize(&sequence_of(&sizes))
            .unwrap();
        assert_eq!(tensor.view().shape(), &[len, 3, 112, 112]);
        assert_eq!(tensor.len(), len);
    }

    #[test]
    fn test_imagenet_normalization_of_solid_color() {
        let tensor = FaceNormalizer::new(4)
            .normalize(&sequence_of(&[(10, 6)]))
            .unwrap();
        let v = tensor.view();
        assert_relative_eq!(v[[0, 0, 2, 2]], (128.0 / 255.0 - 0.485) / 0.229, epsilon = 1e-4);
        assert_relative_eq!(v[[0, 1, 0, 3]], (64.0 / 255.0 - 0.456) / 0.224, epsilon = 1e-4);
        assert_relative_eq!(v[[0, 2, 3, 0]], (200.0 / 255.0 - 0.406) / 0.225, epsilon = 1e-4);
    }

    #[test]
    fn test_faces_are_normalized_independently() {
        let mut seq = FaceSequence::with_capacity(2);
        seq.push(FaceImage::new(RgbImage::from_pixel(5, 5, Rgb([0, 0, 0])), 0));
        seq.push(FaceImage::new(RgbImage::from_pixel(9, 3, Rgb([255, 255, 255])), 1));
        let tensor = FaceNormalizer::new(2).normalize(&seq).unwrap();
        let v = tensor.view();
        assert_relative_eq!(v[[0, 0, 0, 0]], -0.485 / 0.229, epsilon = 1e-4);
        assert_relative_eq!(v[[1, 0, 1, 1]], (1.0 - 0.485) / 0.229, epsilon = 1e-4);
    }

    #[test]
    fn test_empty_sequence_fails() {
        let result = FaceNormalizer::default().normalize(&FaceSequence::with_capacity(4));
        assert!(matches!(result, Err(PredictionError::PreprocessFailed(_))));
    }

    #[test]
    fn test_zero_sized_crop_fails_whole_batch() {
        let result = FaceNormalizer::default().normalize(&sequence_of(&[(8, 8), (0, 8)]));
        match result {
            Err(PredictionError::PreprocessFailed(msg)) => assert!(msg.contains("frame 1")),
            other => panic!("expected PreprocessFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_from_array_rejects_bad_layouts() {
        assert!(NormalizedTensor::from_array(Array4::zeros((0, 3, 4, 4))).is_none());
        assert!(NormalizedTensor::from_array(Array4::zeros((1, 1, 4, 4))).is_none());
        assert!(NormalizedTensor::from_array(Array4::zeros((1, 3, 4, 5))).is_none());
        assert!(NormalizedTensor::from_array(Array4::zeros((2, 3, 4, 4))).is_some());
    }
}
