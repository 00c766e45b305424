use ndarray::{s, Array1, Array2, ArrayView2};

/// Single-layer unidirectional LSTM over a sequence of embeddings.
///
/// Gate rows follow the PyTorch layout: input, forget, cell, output.
/// State starts at zero on every call, so the aggregator holds no state
/// between sequences.
#[derive(Clone, Debug)]
pub struct LstmAggregator {
    weight_ih: Array2<f32>,
    weight_hh: Array2<f32>,
    bias: Array1<f32>,
    hidden_size: usize,
}

impl LstmAggregator {
    /// `weight_ih` is `[4H, D]`, `weight_hh` is `[4H, H]`, biases are `[4H]`.
    /// Missing biases are zero.
    pub fn new(
        weight_ih: Array2<f32>,
        weight_hh: Array2<f32>,
        bias_ih: Option<Array1<f32>>,
        bias_hh: Option<Array1<f32>>,
    ) -> Result<Self, String> {
        let (gates, _) = weight_hh.dim();
        if gates == 0 || gates % 4 != 0 {
            return Err(format!("weight_hh rows must be a positive multiple of 4, got {gates}"));
        }
        let hidden_size = gates / 4;
        if weight_hh.dim().1 != hidden_size {
            return Err(format!(
                "weight_hh must be [{gates}, {hidden_size}], got {:?}",
                weight_hh.shape()
            ));
        }
        if weight_ih.dim().0 != gates || weight_ih.dim().1 == 0 {
            return Err(format!(
                "weight_ih must be [{gates}, D], got {:?}",
                weight_ih.shape()
            ));
        }

        let mut bias = Array1::<f32>::zeros(gates);
        for (name, b) in [("bias_ih", bias_ih), ("bias_hh", bias_hh)] {
            if let Some(b) = b {
                if b.len() != gates {
                    return Err(format!("{name} must have {gates} entries, got {}", b.len()));
                }
                bias += &b;
            }
        }

        Ok(Self {
            weight_ih,
            weight_hh,
            bias,
            hidden_size,
        })
    }

    /// Embedding width `D` the aggregator expects.
    pub fn input_size(&self) -> usize {
        self.weight_ih.dim().1
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Run the sequence `[L, D]` and return the last hidden state `[H]`.
    ///
    /// An empty sequence returns the zero initial state.
    pub fn final_hidden(&self, sequence: ArrayView2<'_, f32>) -> Array1<f32> {
        let h_size = self.hidden_size;
        let mut h = Array1::<f32>::zeros(h_size);
        let mut c = Array1::<f32>::zeros(h_size);

        for x in sequence.rows() {
            let z = self.weight_ih.dot(&x) + self.weight_hh.dot(&h) + &self.bias;
            let i = z.slice(s![0..h_size]).mapv(sigmoid);
            let f = z.slice(s![h_size..2 * h_size]).mapv(sigmoid);
            let g = z.slice(s![2 * h_size..3 * h_size]).mapv(f32::tanh);
            let o = z.slice(s![3 * h_size..4 * h_size]).mapv(sigmoid);
            c = &f * &c + &i * &g;
            h = &o * &c.mapv(f32::tanh);
        }
        h
    }
}

fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}
