//! Batch cross-entropy losses for the classifier heads.
//!
//! Both losses expect unscaled logits, compute their gradients at forward
//! time, and reduce by the sum of weighted terms over the count of terms
//! with a nonzero weight (so zero-weighted entries neither contribute loss
//! nor dilute the mean).

use crate::autograd::ops::softmax_row;
use crate::autograd::{BackwardOp, Tensor};
use ndarray::Array1;
use std::cell::RefCell;
use std::rc::Rc;

type GradCell = Rc<RefCell<Option<Array1<f32>>>>;

struct StoredGradBackward {
    predictions: Tensor,
    grad: Array1<f32>,
    result_grad: GradCell,
}

impl BackwardOp for StoredGradBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.predictions.requires_grad() {
                self.predictions.accumulate_grad(&self.grad * grad[0]);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.predictions.clone()]
    }
}

fn loss_tensor(value: f32, logits: &Tensor, grad: Array1<f32>) -> Tensor {
    let mut loss = Tensor::from_vec(vec![value], logits.requires_grad());
    if logits.requires_grad() {
        loss.set_backward_op(Rc::new(StoredGradBackward {
            predictions: logits.clone(),
            grad,
            result_grad: loss.grad_cell(),
        }));
    }
    loss
}

/// Softmax cross-entropy between one-hot `targets` and raw `logits`
/// (`[rows, cols]` each), with one weight per example.
pub fn softmax_cross_entropy(
    logits: &Tensor,
    targets: &Tensor,
    rows: usize,
    cols: usize,
    weights: &[f32],
) -> Tensor {
    assert_eq!(logits.len(), rows * cols, "softmax_cross_entropy: wrong logits length");
    assert_eq!(targets.len(), rows * cols, "softmax_cross_entropy: wrong targets length");
    assert_eq!(weights.len(), rows, "softmax_cross_entropy: one weight per example");

    let logits_data = logits.data();
    let targets_data = targets.data();
    let x = logits_data.as_slice().unwrap();
    let t = targets_data.as_slice().unwrap();

    let nonzero = weights.iter().filter(|&&w| w != 0.0).count();
    let norm = if nonzero > 0 { 1.0 / nonzero as f32 } else { 0.0 };

    let mut total = 0.0f32;
    let mut grad = vec![0.0f32; rows * cols];
    let mut probs = vec![0.0f32; cols];
    for r in 0..rows {
        let base = r * cols;
        probs.copy_from_slice(&x[base..base + cols]);
        softmax_row(&mut probs);

        let ce: f32 = (0..cols)
            .map(|j| -t[base + j] * probs[j].max(f32::MIN_POSITIVE).ln())
            .sum();
        total += weights[r] * ce;
        for j in 0..cols {
            grad[base + j] = weights[r] * (probs[j] - t[base + j]) * norm;
        }
    }
    drop(logits_data);
    drop(targets_data);

    loss_tensor(total * norm, logits, Array1::from(grad))
}

/// Independent sigmoid cross-entropy per output, with one weight per
/// element (`rows * cols`, typically a tiled per-class vector).
pub fn sigmoid_cross_entropy(
    logits: &Tensor,
    targets: &Tensor,
    rows: usize,
    cols: usize,
    weights: &[f32],
) -> Tensor {
    assert_eq!(logits.len(), rows * cols, "sigmoid_cross_entropy: wrong logits length");
    assert_eq!(targets.len(), rows * cols, "sigmoid_cross_entropy: wrong targets length");
    assert_eq!(weights.len(), rows * cols, "sigmoid_cross_entropy: one weight per element");

    let logits_data = logits.data();
    let targets_data = targets.data();
    let x = logits_data.as_slice().unwrap();
    let z = targets_data.as_slice().unwrap();

    let nonzero = weights.iter().filter(|&&w| w != 0.0).count();
    let norm = if nonzero > 0 { 1.0 / nonzero as f32 } else { 0.0 };

    let mut total = 0.0f32;
    let mut grad = vec![0.0f32; rows * cols];
    for i in 0..rows * cols {
        // Stable form of z * -ln(sigmoid(x)) + (1 - z) * -ln(1 - sigmoid(x)).
        let ce = x[i].max(0.0) - x[i] * z[i] + (1.0 + (-x[i].abs()).exp()).ln();
        total += weights[i] * ce;
        let sig = 1.0 / (1.0 + (-x[i]).exp());
        grad[i] = weights[i] * (sig - z[i]) * norm;
    }
    drop(logits_data);
    drop(targets_data);

    loss_tensor(total * norm, logits, Array1::from(grad))
}

/// Per-example weights chosen by each example's *predicted* class, the
/// argmax of its raw logits.
pub fn gather_by_prediction(
    logits: &Tensor,
    rows: usize,
    cols: usize,
    class_weights: &[f32],
) -> Vec<f32> {
    assert_eq!(class_weights.len(), cols, "one weight per class");
    let data = logits.data();
    let x = data.as_slice().unwrap();
    (0..rows)
        .map(|r| {
            let row = &x[r * cols..(r + 1) * cols];
            let predicted = row
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(j, _)| j)
                .unwrap_or(0);
            class_weights[predicted]
        })
        .collect()
}

/// Tile a per-class weight vector across a batch.
pub fn tile_class_weights(class_weights: &[f32], rows: usize) -> Vec<f32> {
    let mut tiled = Vec::with_capacity(rows * class_weights.len());
    for _ in 0..rows {
        tiled.extend_from_slice(class_weights);
    }
    tiled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::backward;
    use approx::assert_relative_eq;

    #[test]
    fn test_softmax_ce_uniform_logits() {
        // Uniform logits over C classes give loss ln(C).
        let logits = Tensor::from_vec(vec![1.0; 3], true);
        let targets = Tensor::from_vec(vec![1.0, 0.0, 0.0], false);
        let loss = softmax_cross_entropy(&logits, &targets, 1, 3, &[1.0]);
        assert_relative_eq!(loss.data()[0], (3.0f32).ln(), epsilon = 1e-5);
    }

    #[test]
    fn test_softmax_ce_gradient_direction() {
        let logits = Tensor::from_vec(vec![2.0, 1.0, 0.5], true);
        let targets = Tensor::from_vec(vec![1.0, 0.0, 0.0], false);
        let loss = softmax_cross_entropy(&logits, &targets, 1, 3, &[1.0]);
        backward(&loss, None);
        let grad = logits.grad().unwrap();
        assert!(grad[0] < 0.0); // pull the true class up
        assert!(grad[1] > 0.0 && grad[2] > 0.0);
        let total: f32 = grad.iter().sum();
        assert_relative_eq!(total, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_softmax_ce_weighted_mean_over_nonzero() {
        let logits = Tensor::from_vec(vec![1.0, 0.0, 0.0, 1.0], false);
        let targets = Tensor::from_vec(vec![1.0, 0.0, 0.0, 1.0], false);
        // Second example weighted out entirely: divide by one, not two.
        let weighted = softmax_cross_entropy(&logits, &targets, 2, 2, &[2.0, 0.0]);
        let single = softmax_cross_entropy(
            &Tensor::from_vec(vec![1.0, 0.0], false),
            &Tensor::from_vec(vec![1.0, 0.0], false),
            1,
            2,
            &[1.0],
        );
        assert_relative_eq!(weighted.data()[0], 2.0 * single.data()[0], epsilon = 1e-5);
    }

    #[test]
    fn test_sigmoid_ce_matches_manual() {
        let logits = Tensor::from_vec(vec![0.0, 0.0], false);
        let targets = Tensor::from_vec(vec![1.0, 0.0], false);
        let loss = sigmoid_cross_entropy(&logits, &targets, 1, 2, &[1.0, 1.0]);
        // At logit 0 both terms are ln(2).
        assert_relative_eq!(loss.data()[0], (2.0f32).ln(), epsilon = 1e-5);
    }

    #[test]
    fn test_sigmoid_ce_gradient() {
        let logits = Tensor::from_vec(vec![0.0], true);
        let targets = Tensor::from_vec(vec![1.0], false);
        let loss = sigmoid_cross_entropy(&logits, &targets, 1, 1, &[1.0]);
        backward(&loss, None);
        assert_relative_eq!(logits.grad().unwrap()[0], -0.5);
    }

    #[test]
    fn test_sigmoid_ce_stable_for_extreme_logits() {
        let logits = Tensor::from_vec(vec![500.0, -500.0], false);
        let targets = Tensor::from_vec(vec![0.0, 1.0], false);
        let loss = sigmoid_cross_entropy(&logits, &targets, 1, 2, &[1.0, 1.0]);
        assert!(loss.data()[0].is_finite());
    }

    #[test]
    fn test_gather_by_prediction_uses_argmax() {
        // Predictions: class 1, class 0, class 0.
        let logits =
            Tensor::from_vec(vec![0.1, 0.9, 0.8, 0.2, 0.7, 0.3], false);
        let weights = gather_by_prediction(&logits, 3, 2, &[2.0, 3.0]);
        assert_eq!(weights, vec![3.0, 2.0, 2.0]);
    }

    #[test]
    fn test_tile_class_weights() {
        assert_eq!(tile_class_weights(&[1.0, 2.0], 3), vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
    }

    #[test]
    fn test_scaled_loss_scales_gradient() {
        use crate::autograd::ops::scale;
        let logits = Tensor::from_vec(vec![1.0, -1.0], true);
        let targets = Tensor::from_vec(vec![1.0, 0.0], false);
        let loss = softmax_cross_entropy(&logits, &targets, 1, 2, &[1.0]);
        let doubled = scale(&loss, 2.0);
        backward(&doubled, None);

        let logits2 = Tensor::from_vec(vec![1.0, -1.0], true);
        let loss2 = softmax_cross_entropy(&logits2, &targets, 1, 2, &[1.0]);
        backward(&loss2, None);

        let g1 = logits.grad().unwrap();
        let g2 = logits2.grad().unwrap();
        assert_relative_eq!(g1[0], 2.0 * g2[0], epsilon = 1e-6);
    }
}
