//! Parameter initialization and the dense layer building block.

use crate::autograd::ops::linear;
use crate::autograd::Tensor;
use ndarray::Array1;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

/// Glorot-style Gaussian init for a `[fan_in, fan_out]` weight matrix.
pub fn glorot(rng: &mut StdRng, fan_in: usize, fan_out: usize) -> Tensor {
    let std = (2.0 / (fan_in + fan_out) as f32).sqrt();
    let dist = Normal::new(0.0, std).expect("finite std");
    let data: Vec<f32> = (0..fan_in * fan_out).map(|_| dist.sample(rng)).collect();
    Tensor::new(Array1::from(data), true)
}

/// A fully-connected layer (no activation).
pub struct Dense {
    pub w: Tensor,
    pub b: Tensor,
    pub in_dim: usize,
    pub out_dim: usize,
}

impl Dense {
    pub fn new(rng: &mut StdRng, in_dim: usize, out_dim: usize) -> Self {
        Self {
            w: glorot(rng, in_dim, out_dim),
            b: Tensor::zeros(out_dim, true),
            in_dim,
            out_dim,
        }
    }

    pub fn forward(&self, x: &Tensor, batch: usize) -> Tensor {
        linear(x, &self.w, &self.b, batch, self.in_dim, self.out_dim)
    }

    pub fn parameters(&self) -> Vec<Tensor> {
        vec![self.w.clone(), self.b.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_glorot_is_seeded() {
        let mut r1 = StdRng::seed_from_u64(1);
        let mut r2 = StdRng::seed_from_u64(1);
        let w1 = glorot(&mut r1, 4, 3);
        let w2 = glorot(&mut r2, 4, 3);
        assert_eq!(w1.data().to_vec(), w2.data().to_vec());
        assert_eq!(w1.len(), 12);
    }

    #[test]
    fn test_dense_shapes() {
        let mut rng = StdRng::seed_from_u64(0);
        let layer = Dense::new(&mut rng, 3, 2);
        let x = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], false);
        let y = layer.forward(&x, 2);
        assert_eq!(y.len(), 4);
        assert_eq!(layer.parameters().len(), 2);
    }
}
