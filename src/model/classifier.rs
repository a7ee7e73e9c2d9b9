//! The shared classifier head.
//!
//! The same 4-layer fully-connected stack serves both task and domain
//! classification. It returns the raw pre-activation output for the loss
//! functions (which expect unscaled logits) alongside softmax and sigmoid
//! transforms for prediction.

use super::init::Dense;
use crate::autograd::ops::{dropout, relu, sigmoid, softmax_rows, BatchNorm};
use crate::autograd::Tensor;
use rand::rngs::StdRng;

const NUM_LAYERS: usize = 4;
const HIDDEN_WIDTH: usize = 50;

/// Raw, softmax, and sigmoid views of the head's output.
pub struct ClassifierOutput {
    pub logits: Tensor,
    pub softmax: Tensor,
    pub sigmoid: Tensor,
}

/// 4-layer classifier head: hidden width 50, dropout after every layer,
/// optional batch norm, ReLU everywhere but the last layer.
pub struct Classifier {
    layers: Vec<Dense>,
    batch_norms: Option<Vec<BatchNorm>>,
    num_classes: usize,
}

impl Classifier {
    pub fn new(rng: &mut StdRng, in_dim: usize, num_classes: usize, batch_norm: bool) -> Self {
        let mut layers = Vec::with_capacity(NUM_LAYERS);
        let mut batch_norms = batch_norm.then(|| Vec::with_capacity(NUM_LAYERS));
        let mut width_in = in_dim;
        for i in 0..NUM_LAYERS {
            let width_out = if i == NUM_LAYERS - 1 { num_classes } else { HIDDEN_WIDTH };
            layers.push(Dense::new(rng, width_in, width_out));
            if let Some(norms) = batch_norms.as_mut() {
                norms.push(BatchNorm::new(width_out));
            }
            width_in = width_out;
        }
        Self { layers, batch_norms, num_classes }
    }

    pub fn forward(
        &self,
        x: &Tensor,
        batch: usize,
        keep_prob: f32,
        training: bool,
        rng: &mut StdRng,
    ) -> ClassifierOutput {
        let mut out = x.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            out = layer.forward(&out, batch);
            out = dropout(&out, keep_prob, training, rng);
            if let Some(norms) = &self.batch_norms {
                out = norms[i].forward(&out, batch, training);
            }
            if i != NUM_LAYERS - 1 {
                out = relu(&out);
            }
        }

        let softmax = softmax_rows(&out, batch, self.num_classes);
        let sig = sigmoid(&out);
        ClassifierOutput { logits: out, softmax, sigmoid: sig }
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
