use ndarray::{Array1, Array2, ArrayView1};

/// Number of output classes (real, fake).
pub const NUM_CLASSES: usize = 2;

/// Unnormalized class scores, index 0 = real, 1 = fake.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawScores(pub [f32; NUM_CLASSES]);

impl RawScores {
    pub fn values(&self) -> &[f32; NUM_CLASSES] {
        &self.0
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

/// Dropout + linear projection from the final hidden state to class scores.
///
/// Dropout is the identity at inference time, so only the projection runs.
#[derive(Clone, Debug)]
pub struct LinearHead {
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl LinearHead {
    /// `weight` is `[2, H]`, `bias` is `[2]`.
    pub fn new(weight: Array2<f32>, bias: Array1<f32>) -> Result<Self, String> {
        if weight.dim().0 != NUM_CLASSES || weight.dim().1 == 0 {
            return Err(format!(
                "linear weight must be [{NUM_CLASSES}, H], got {:?}",
                weight.shape()
            ));
        }
        if bias.len() != NUM_CLASSES {
            return Err(format!("linear bias must have {NUM_CLASSES} entries, got {}", bias.len()));
        }
        Ok(Self { weight, bias })
    }

    pub fn input_size(&self) -> usize {
        self.weight.dim().1
    }

    pub fn project(&self, hidden: ArrayView1<'_, f32>) -> RawScores {
        let out = self.weight.dot(&hidden) + &self.bias;
        RawScores([out[0], out[1]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_project_is_affine() {
        let head = LinearHead::new(array![[1.0, 2.0], [-1.0, 0.5]], array![0.1, -0.2]).unwrap();
        let scores = head.project(array![3.0f32, 4.0].view());
        assert_relative_eq!(scores.values()[0], 11.1, epsilon = 1e-5);
        assert_relative_eq!(scores.values()[1], -1.2, epsilon = 1e-5);
    }

    #[test]
    fn test_rejects_wrong_class_count() {
        assert!(LinearHead::new(Array2::zeros((3, 4)), Array1::zeros(3)).is_err());
        assert!(LinearHead::new(Array2::zeros((2, 4)), Array1::zeros(3)).is_err());
        let head = LinearHead::new(Array2::zeros((2, 4)), Array1::zeros(2)).unwrap();
        assert_eq!(head.input_size(), 4);
    }

    #[test]
    fn test_finite_check() {
        assert!(RawScores([0.0, 1.0]).is_finite());
        assert!(!RawScores([f32::NAN, 1.0]).is_finite());
        assert!(!RawScores([0.0, f32::INFINITY]).is_finite());
    }
}
