//! Temporal convolutional network encoder.
//!
//! A stack of residual blocks, each two causal dilated convolutions with
//! ReLU and dropout. Dilation doubles per level, so the receptive field
//! grows exponentially with depth while every output stays causal.

use super::init::glorot;
use crate::autograd::ops::{add, conv1d_causal, dropout, relu};
use crate::autograd::Tensor;
use rand::rngs::StdRng;

struct TemporalBlock {
    conv1_w: Tensor,
    conv1_b: Tensor,
    conv2_w: Tensor,
    conv2_b: Tensor,
    /// 1x1 convolution matching channel counts on the residual path.
    downsample: Option<(Tensor, Tensor)>,
    in_ch: usize,
    out_ch: usize,
    kernel: usize,
    dilation: usize,
}

impl TemporalBlock {
    fn new(rng: &mut StdRng, in_ch: usize, out_ch: usize, kernel: usize, dilation: usize) -> Self {
        let downsample = (in_ch != out_ch)
            .then(|| (glorot(rng, in_ch, out_ch), Tensor::zeros(out_ch, true)));
        Self {
            conv1_w: glorot(rng, kernel * in_ch, out_ch),
            conv1_b: Tensor::zeros(out_ch, true),
            conv2_w: glorot(rng, kernel * out_ch, out_ch),
            conv2_b: Tensor::zeros(out_ch, true),
            downsample,
            in_ch,
            out_ch,
            kernel,
            dilation,
        }
    }

    fn forward(
        &self,
        x: &Tensor,
        batch: usize,
        time: usize,
        keep_prob: f32,
        training: bool,
        rng: &mut StdRng,
    ) -> Tensor {
        let out = conv1d_causal(
            x,
            &self.conv1_w,
            &self.conv1_b,
            batch,
            time,
            self.in_ch,
            self.out_ch,
            self.kernel,
            self.dilation,
        );
        let out = dropout(&relu(&out), keep_prob, training, rng);
        let out = conv1d_causal(
            &out,
            &self.conv2_w,
            &self.conv2_b,
            batch,
            time,
            self.out_ch,
            self.out_ch,
            self.kernel,
            self.dilation,
        );
        let out = dropout(&relu(&out), keep_prob, training, rng);

        let residual = match &self.downsample {
            Some((w, b)) => {
                conv1d_causal(x, w, b, batch, time, self.in_ch, self.out_ch, 1, 1)
            }
            None => x.clone(),
        };
        relu(&add(&out, &residual))
    }

    fn parameters(&self) -> Vec<Tensor> {
        let mut params = vec![
            self.conv1_w.clone(),
            self.conv1_b.clone(),
            self.conv2_w.clone(),
            self.conv2_b.clone(),
        ];
        if let Some((w, b)) = &self.downsample {
            params.push(w.clone());
            params.push(b.clone());
        }
        params
    }
}

/// Four residual levels of `units` channels, kernel size 2, dilation `2^i`.
pub struct TemporalConvNet {
    blocks: Vec<TemporalBlock>,
    out_ch: usize,
}

const NUM_LEVELS: usize = 4;
const KERNEL_SIZE: usize = 2;

impl TemporalConvNet {
    pub fn new(rng: &mut StdRng, num_features: usize, units: usize) -> Self {
        let mut blocks = Vec::with_capacity(NUM_LEVELS);
        let mut in_ch = num_features;
        for level in 0..NUM_LEVELS {
            blocks.push(TemporalBlock::new(rng, in_ch, units, KERNEL_SIZE, 1 << level));
            in_ch = units;
        }
        Self { blocks, out_ch: units }
    }

    pub fn out_dim(&self) -> usize {
        self.out_ch
    }

    /// Full sequence of block outputs, `[batch, time, units]` flat.
    pub fn forward(
        &self,
        x: &Tensor,
        batch: usize,
        time: usize,
        keep_prob: f32,
        training: bool,
        rng: &mut StdRng,
    ) -> Tensor {
        let mut out = x.clone();
        for block in &self.blocks {
            out = block.forward(&out, batch, time, keep_prob, training, rng);
        }
        out
    }

    pub fn parameters(&self) -> Vec<Tensor> {
        self.blocks.iter().flat_map(TemporalBlock::parameters).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::backward;
    use crate::autograd::ops::{select_time_step, sum};
    use ndarray::Array1;
    use rand::SeedableRng;

    fn net(features: usize, units: usize) -> (TemporalConvNet, StdRng) {
        let mut rng = StdRng::seed_from_u64(0);
        let tcn = TemporalConvNet::new(&mut rng, features, units);
        (tcn, rng)
    }

    #[test]
    fn test_output_shape() {
        let (tcn, mut rng) = net(3, 6);
        let x = Tensor::new(Array1::from_elem(2 * 8 * 3, 0.5), false);
        let out = tcn.forward(&x, 2, 8, 1.0, false, &mut rng);
        assert_eq!(out.len(), 2 * 8 * 6);
        assert_eq!(tcn.out_dim(), 6);
    }

    #[test]
    fn test_causality() {
        // Changing the final input step must leave earlier outputs intact.
        let (tcn, mut rng) = net(1, 4);
        let base: Vec<f32> = (0..10).map(|v| v as f32 * 0.1).collect();
        let mut bumped = base.clone();
        bumped[9] += 5.0;

        let out1 = tcn.forward(&Tensor::from_vec(base, false), 1, 10, 1.0, false, &mut rng);
        let out2 = tcn.forward(&Tensor::from_vec(bumped, false), 1, 10, 1.0, false, &mut rng);
        let d1 = out1.data();
        let d2 = out2.data();
        // Steps 0..9 occupy the first 9*4 values.
        assert_eq!(&d1.as_slice().unwrap()[..36], &d2.as_slice().unwrap()[..36]);
        assert_ne!(&d1.as_slice().unwrap()[36..], &d2.as_slice().unwrap()[36..]);
    }

    #[test]
    fn test_gradient_reaches_input_and_weights() {
        let (tcn, mut rng) = net(2, 3);
        let x = Tensor::new(Array1::from_elem(1 * 6 * 2, 0.3), true);
        let out = tcn.forward(&x, 1, 6, 1.0, false, &mut rng);
        let last = select_time_step(&out, 1, 6, 3, 5);
        let loss = sum(&last);
        backward(&loss, None);
        assert!(x.grad().unwrap().iter().any(|&g| g != 0.0));
        assert!(tcn.blocks[0].conv1_w.grad().is_some());
    }

    #[test]
    fn test_parameter_count() {
        // Level 0 has a channel-matching downsample (features != units);
        // deeper levels do not.
        let (tcn, _) = net(2, 3);
        // (4 conv params + 2 downsample) + 3 * 4 conv params.
        assert_eq!(tcn.parameters().len(), 6 + 12);
    }
}
