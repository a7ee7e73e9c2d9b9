//! Image-style convolutional encoder.
//!
//! Three 4x4 'same' convolutions of 64 channels (strides 2, 2, 1) with
//! leaky-ReLU and dropout, flattened to one feature vector per example. The
//! `[batch, time, features]` input is treated as a single-channel image.

use super::init::glorot;
use crate::autograd::ops::{conv2d_same, dropout, leaky_relu, same_out_len};
use crate::autograd::Tensor;
use rand::rngs::StdRng;

const CHANNELS: usize = 64;
const KERNEL: usize = 4;
const STRIDES: [usize; 3] = [2, 2, 1];
const LEAKY_ALPHA: f32 = 0.3;

pub struct ConvNet {
    weights: Vec<(Tensor, Tensor)>,
    height: usize,
    width: usize,
    out_len: usize,
}

impl ConvNet {
    /// Build for `[batch, height, width, 1]` inputs.
    pub fn new(rng: &mut StdRng, height: usize, width: usize) -> Self {
        let mut weights = Vec::with_capacity(STRIDES.len());
        let mut in_ch = 1;
        let (mut h, mut w) = (height, width);
        for &stride in &STRIDES {
            weights.push((
                glorot(rng, KERNEL * KERNEL * in_ch, CHANNELS),
                Tensor::zeros(CHANNELS, true),
            ));
            h = same_out_len(h, stride);
            w = same_out_len(w, stride);
            in_ch = CHANNELS;
        }
        Self { weights, height, width, out_len: h * w * CHANNELS }
    }

    /// Flattened feature width per example.
    pub fn out_dim(&self) -> usize {
        self.out_len
    }

    pub fn forward(
        &self,
        x: &Tensor,
        batch: usize,
        keep_prob: f32,
        training: bool,
        rng: &mut StdRng,
    ) -> Tensor {
        let mut out = x.clone();
        let (mut h, mut w) = (self.height, self.width);
        let mut in_ch = 1;
        for ((weight, bias), &stride) in self.weights.iter().zip(STRIDES.iter()) {
            out = conv2d_same(&out, weight, bias, batch, h, w, in_ch, CHANNELS, KERNEL, stride);
            out = leaky_relu(&out, LEAKY_ALPHA);
            out = dropout(&out, keep_prob, training, rng);
            h = same_out_len(h, stride);
            w = same_out_len(w, stride);
            in_ch = CHANNELS;
        }
        // Channels-last storage is already flat per example.
        out
    }

    pub fn parameters(&self) -> Vec<Tensor> {
        self.weights
            .iter()
            .flat_map(|(w, b)| [w.clone(), b.clone()])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::backward;
    use crate::autograd::ops::sum;
    use ndarray::Array1;
    use rand::SeedableRng;

    #[test]
    fn test_out_dim_follows_strides() {
        let mut rng = StdRng::seed_from_u64(0);
        let net = ConvNet::new(&mut rng, 8, 6);
        // 8x6 -> 4x3 -> 2x2 -> 2x2, 64 channels.
        assert_eq!(net.out_dim(), 2 * 2 * 64);
    }

    #[test]
    fn test_forward_shape() {
        let mut rng = StdRng::seed_from_u64(0);
        let net = ConvNet::new(&mut rng, 4, 4);
        let x = Tensor::new(Array1::from_elem(2 * 4 * 4, 0.1), false);
        let out = net.forward(&x, 2, 1.0, false, &mut rng);
        assert_eq!(out.len(), 2 * net.out_dim());
    }

    #[test]
    fn test_gradient_reaches_first_layer() {
        let mut rng = StdRng::seed_from_u64(1);
        let net = ConvNet::new(&mut rng, 4, 4);
        let x = Tensor::new(Array1::from_elem(1 * 4 * 4, 0.2), true);
        let out = net.forward(&x, 1, 1.0, false, &mut rng);
        let loss = sum(&out);
        backward(&loss, None);
        assert!(x.grad().unwrap().iter().any(|&g| g != 0.0));
        assert!(net.weights[0].0.grad().unwrap().iter().any(|&g| g != 0.0));
    }
}
