//! Optional fully-connected feature extractor between the encoder and the
//! classifier heads.

use super::init::Dense;
use crate::autograd::ops::{dropout, relu, BatchNorm};
use crate::autograd::Tensor;
use rand::rngs::StdRng;

const NUM_LAYERS: usize = 3;
const WIDTH: usize = 100;

pub struct FeatureExtractor {
    layers: Vec<Dense>,
    batch_norms: Option<Vec<BatchNorm>>,
}

impl FeatureExtractor {
    pub fn new(rng: &mut StdRng, in_dim: usize, batch_norm: bool) -> Self {
        let mut layers = Vec::with_capacity(NUM_LAYERS);
        let mut batch_norms = batch_norm.then(|| Vec::with_capacity(NUM_LAYERS));
        let mut width_in = in_dim;
        for _ in 0..NUM_LAYERS {
            layers.push(Dense::new(rng, width_in, WIDTH));
            if let Some(norms) = batch_norms.as_mut() {
                norms.push(BatchNorm::new(WIDTH));
            }
            width_in = WIDTH;
        }
        Self { layers, batch_norms }
    }

    /// Output width of the extractor.
    pub fn out_dim(&self) -> usize {
        WIDTH
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
        for (i, layer) in self.layers.iter().enumerate() {
            out = layer.forward(&out, batch);
            out = dropout(&out, keep_prob, training, rng);
            if let Some(norms) = &self.batch_norms {
                out = norms[i].forward(&out, batch, training);
            }
            out = relu(&out);
        }
        out
    }

    pub fn parameters(&self) -> Vec<Tensor> {
        let mut params: Vec<Tensor> =
            self.layers.iter().flat_map(Dense::parameters).collect();
        if let Some(norms) = &self.batch_norms {
            params.extend(norms.iter().flat_map(BatchNorm::parameters));
        }
        params
    }
}
