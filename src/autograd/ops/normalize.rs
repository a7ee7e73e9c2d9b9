//! Batch normalization over the batch axis of a `[rows, cols]` tensor.

use crate::autograd::{BackwardOp, Tensor};
use ndarray::Array1;
use std::cell::RefCell;
use std::rc::Rc;

type GradCell = Rc<RefCell<Option<Array1<f32>>>>;

const BN_EPSILON: f32 = 1e-3;

/// Batch normalization layer state: learned scale/shift plus running
/// statistics for inference.
pub struct BatchNorm {
    pub gamma: Tensor,
    pub beta: Tensor,
    running_mean: RefCell<Array1<f32>>,
    running_var: RefCell<Array1<f32>>,
    momentum: f32,
    cols: usize,
}

impl BatchNorm {
    /// Create a layer normalizing `cols` features.
    pub fn new(cols: usize) -> Self {
        Self {
            gamma: Tensor::new(Array1::ones(cols), true),
            beta: Tensor::zeros(cols, true),
            running_mean: RefCell::new(Array1::zeros(cols)),
            running_var: RefCell::new(Array1::ones(cols)),
            momentum: 0.99,
            cols,
        }
    }

    /// Learned parameters, for an external optimizer.
    pub fn parameters(&self) -> Vec<Tensor> {
        vec![self.gamma.clone(), self.beta.clone()]
    }

    /// Normalize `x` (`[rows, cols]` row-major). In training mode batch
    /// statistics are used and the running statistics updated; in inference
    /// mode the running statistics are used.
    pub fn forward(&self, x: &Tensor, rows: usize, training: bool) -> Tensor {
        assert_eq!(x.len(), rows * self.cols, "batch_norm: wrong input length");
        if training {
            let (out, mean, var) = batch_norm_train(x, &self.gamma, &self.beta, rows, self.cols);
            let m = self.momentum;
            {
                let mut rm = self.running_mean.borrow_mut();
                *rm = &*rm * m + &(&mean * (1.0 - m));
            }
            {
                let mut rv = self.running_var.borrow_mut();
                *rv = &*rv * m + &(&var * (1.0 - m));
            }
            out
        } else {
            batch_norm_infer(
                x,
                &self.gamma,
                &self.beta,
                &self.running_mean.borrow(),
                &self.running_var.borrow(),
                rows,
                self.cols,
            )
        }
    }
}

/// Training-mode batch norm: normalize each column by its batch mean and
/// variance, then scale and shift. Returns the output plus the batch
/// statistics for the running-average update.
fn batch_norm_train(
    x: &Tensor,
    gamma: &Tensor,
    beta: &Tensor,
    rows: usize,
    cols: usize,
) -> (Tensor, Array1<f32>, Array1<f32>) {
    let x_data = x.data();
    let src = x_data.as_slice().unwrap();
    let n = rows as f32;

    let mut mean = vec![0.0f32; cols];
    for r in 0..rows {
        for c in 0..cols {
            mean[c] += src[r * cols + c];
        }
    }
    for m in mean.iter_mut() {
        *m /= n;
    }

    let mut var = vec![0.0f32; cols];
    for r in 0..rows {
        for c in 0..cols {
            let d = src[r * cols + c] - mean[c];
            var[c] += d * d;
        }
    }
    for v in var.iter_mut() {
        *v /= n;
    }

    let inv_std: Vec<f32> = var.iter().map(|&v| 1.0 / (v + BN_EPSILON).sqrt()).collect();
    let g = gamma.data();
    let b = beta.data();
    let mut normalized = vec![0.0f32; rows * cols];
    let mut out = vec![0.0f32; rows * cols];
    for r in 0..rows {
        for c in 0..cols {
            let xn = (src[r * cols + c] - mean[c]) * inv_std[c];
            normalized[r * cols + c] = xn;
            out[r * cols + c] = g[c] * xn + b[c];
        }
    }
    drop(x_data);
    drop(g);
    drop(b);

    let requires_grad = x.requires_grad() || gamma.requires_grad() || beta.requires_grad();
    let mut result = Tensor::new(Array1::from(out), requires_grad);
    if requires_grad {
        result.set_backward_op(Rc::new(BatchNormTrainBackward {
            x: x.clone(),
            gamma: gamma.clone(),
            beta: beta.clone(),
            normalized: normalized.clone(),
            inv_std: inv_std.clone(),
            rows,
            cols,
            result_grad: result.grad_cell(),
        }));
    }

    (result, Array1::from(mean), Array1::from(var))
}

struct BatchNormTrainBackward {
    x: Tensor,
    gamma: Tensor,
    beta: Tensor,
    normalized: Vec<f32>,
    inv_std: Vec<f32>,
    rows: usize,
    cols: usize,
    result_grad: GradCell,
}

impl BackwardOp for BatchNormTrainBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            let g = grad.as_slice().unwrap();
            let (rows, cols) = (self.rows, self.cols);
            let n = rows as f32;

            if self.beta.requires_grad() {
                let mut grad_beta = vec![0.0f32; cols];
                for r in 0..rows {
                    for c in 0..cols {
                        grad_beta[c] += g[r * cols + c];
                    }
                }
                self.beta.accumulate_grad(Array1::from(grad_beta));
            }
            if self.gamma.requires_grad() {
                let mut grad_gamma = vec![0.0f32; cols];
                for r in 0..rows {
                    for c in 0..cols {
                        grad_gamma[c] += g[r * cols + c] * self.normalized[r * cols + c];
                    }
                }
                self.gamma.accumulate_grad(Array1::from(grad_gamma));
            }
            if self.x.requires_grad() {
                // dx = inv_std/n * (n*dxhat - sum(dxhat) - xhat * sum(dxhat*xhat))
                let gamma = self.gamma.data();
                let mut sum_dxhat = vec![0.0f32; cols];
                let mut sum_dxhat_xhat = vec![0.0f32; cols];
                for r in 0..rows {
                    for c in 0..cols {
                        let dxhat = g[r * cols + c] * gamma[c];
                        sum_dxhat[c] += dxhat;
                        sum_dxhat_xhat[c] += dxhat * self.normalized[r * cols + c];
                    }
                }
                let mut grad_x = vec![0.0f32; rows * cols];
                for r in 0..rows {
                    for c in 0..cols {
                        let dxhat = g[r * cols + c] * gamma[c];
                        grad_x[r * cols + c] = self.inv_std[c] / n
                            * (n * dxhat
                                - sum_dxhat[c]
                                - self.normalized[r * cols + c] * sum_dxhat_xhat[c]);
                    }
                }
                drop(gamma);
                self.x.accumulate_grad(Array1::from(grad_x));
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.x.clone(), self.gamma.clone(), self.beta.clone()]
    }
}

/// Inference-mode batch norm using fixed statistics.
fn batch_norm_infer(
    x: &Tensor,
    gamma: &Tensor,
    beta: &Tensor,
    mean: &Array1<f32>,
    var: &Array1<f32>,
    rows: usize,
    cols: usize,
) -> Tensor {
    let inv_std: Vec<f32> = var.iter().map(|&v| 1.0 / (v + BN_EPSILON).sqrt()).collect();
    let out = {
        let x_data = x.data();
        let src = x_data.as_slice().unwrap();
        let g = gamma.data();
        let b = beta.data();
        let mut out = vec![0.0f32; rows * cols];
        for r in 0..rows {
            for c in 0..cols {
                out[r * cols + c] = g[c] * (src[r * cols + c] - mean[c]) * inv_std[c] + b[c];
            }
        }
        out
    };

    let requires_grad = x.requires_grad() || gamma.requires_grad() || beta.requires_grad();
    let mut result = Tensor::new(Array1::from(out), requires_grad);
    if requires_grad {
        result.set_backward_op(Rc::new(BatchNormInferBackward {
            x: x.clone(),
            gamma: gamma.clone(),
            beta: beta.clone(),
            mean: mean.clone(),
            inv_std,
            rows,
            cols,
            result_grad: result.grad_cell(),
        }));
    }
    result
}

struct BatchNormInferBackward {
    x: Tensor,
    gamma: Tensor,
    beta: Tensor,
    mean: Array1<f32>,
    inv_std: Vec<f32>,
    rows: usize,
    cols: usize,
    result_grad: GradCell,
}

impl BackwardOp for BatchNormInferBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            let g = grad.as_slice().unwrap();
            let (rows, cols) = (self.rows, self.cols);

            if self.beta.requires_grad() {
                let mut grad_beta = vec![0.0f32; cols];
                for r in 0..rows {
                    for c in 0..cols {
                        grad_beta[c] += g[r * cols + c];
                    }
                }
                self.beta.accumulate_grad(Array1::from(grad_beta));
            }
            if self.gamma.requires_grad() {
                let x_data = self.x.data();
                let src = x_data.as_slice().unwrap();
                let mut grad_gamma = vec![0.0f32; cols];
                for r in 0..rows {
                    for c in 0..cols {
                        grad_gamma[c] +=
                            g[r * cols + c] * (src[r * cols + c] - self.mean[c]) * self.inv_std[c];
                    }
                }
                drop(x_data);
                self.gamma.accumulate_grad(Array1::from(grad_gamma));
            }
            if self.x.requires_grad() {
                let gamma = self.gamma.data();
                let mut grad_x = vec![0.0f32; rows * cols];
                for r in 0..rows {
                    for c in 0..cols {
                        grad_x[r * cols + c] = g[r * cols + c] * gamma[c] * self.inv_std[c];
                    }
                }
                drop(gamma);
                self.x.accumulate_grad(Array1::from(grad_x));
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.x.clone(), self.gamma.clone(), self.beta.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::backward;
    use crate::autograd::ops::sum;
    use approx::assert_relative_eq;

    #[test]
    fn test_training_normalizes_columns() {
        let bn = BatchNorm::new(2);
        // Column 0: [0, 2], column 1: [10, 30]
        let x = Tensor::from_vec(vec![0.0, 10.0, 2.0, 30.0], false);
        let y = bn.forward(&x, 2, true);
        let d = y.data();
        // Normalized columns have mean 0 and symmetric values.
        assert_relative_eq!(d[0] + d[2], 0.0, epsilon = 1e-5);
        assert_relative_eq!(d[1] + d[3], 0.0, epsilon = 1e-5);
        assert!(d[2] > 0.0 && d[3] > 0.0);
    }

    #[test]
    fn test_inference_uses_running_stats() {
        let bn = BatchNorm::new(1);
        let x = Tensor::from_vec(vec![5.0, 7.0], false);
        // Before any training pass the running stats are (0, 1).
        let y = bn.forward(&x, 2, false);
        assert_relative_eq!(y.data()[0], 5.0 / (1.0f32 + BN_EPSILON).sqrt(), epsilon = 1e-5);
    }

    #[test]
    fn test_beta_gradient_is_column_sum() {
        let bn = BatchNorm::new(2);
        let x = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], true);
        let y = bn.forward(&x, 2, true);
        let s = sum(&y);
        backward(&s, None);
        assert_eq!(bn.beta.grad().unwrap().to_vec(), vec![2.0, 2.0]);
        // Gradient through the batch statistics of a full-column sum is ~0.
        let gx = x.grad().unwrap();
        for &g in gx.iter() {
            assert_relative_eq!(g, 0.0, epsilon = 1e-4);
        }
    }
}
