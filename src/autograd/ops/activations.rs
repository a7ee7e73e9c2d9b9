//! Activation autograd operations: relu, leaky_relu, sigmoid, tanh,
//! softplus, row-wise softmax.

use crate::autograd::{BackwardOp, Tensor};
use ndarray::Array1;
use std::cell::RefCell;
use std::rc::Rc;

type GradCell = Rc<RefCell<Option<Array1<f32>>>>;

/// ReLU activation.
pub fn relu(a: &Tensor) -> Tensor {
    let data = a.data().mapv(|x| x.max(0.0));
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);
    if requires_grad {
        result.set_backward_op(Rc::new(ReluBackward {
            a: a.clone(),
            result_grad: result.grad_cell(),
        }));
    }
    result
}

struct ReluBackward {
    a: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for ReluBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                let mask = self.a.data().mapv(|x| if x > 0.0 { 1.0 } else { 0.0 });
                self.a.accumulate_grad(grad * &mask);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Leaky ReLU with negative slope `alpha`.
pub fn leaky_relu(a: &Tensor, alpha: f32) -> Tensor {
    let data = a.data().mapv(|x| if x > 0.0 { x } else { alpha * x });
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);
    if requires_grad {
        result.set_backward_op(Rc::new(LeakyReluBackward {
            a: a.clone(),
            alpha,
            result_grad: result.grad_cell(),
        }));
    }
    result
}

struct LeakyReluBackward {
    a: Tensor,
    alpha: f32,
    result_grad: GradCell,
}

impl BackwardOp for LeakyReluBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                let alpha = self.alpha;
                let mask = self.a.data().mapv(|x| if x > 0.0 { 1.0 } else { alpha });
                self.a.accumulate_grad(grad * &mask);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

#[inline]
fn sigmoid_scalar(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Logistic sigmoid.
pub fn sigmoid(a: &Tensor) -> Tensor {
    let data = a.data().mapv(sigmoid_scalar);
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data.clone(), requires_grad);
    if requires_grad {
        result.set_backward_op(Rc::new(SigmoidBackward {
            a: a.clone(),
            output: data,
            result_grad: result.grad_cell(),
        }));
    }
    result
}

struct SigmoidBackward {
    a: Tensor,
    output: Array1<f32>,
    result_grad: GradCell,
}

impl BackwardOp for SigmoidBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // dσ/dx = σ(x)(1 - σ(x))
                let deriv = self.output.mapv(|y| y * (1.0 - y));
                self.a.accumulate_grad(grad * &deriv);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Hyperbolic tangent.
pub fn tanh(a: &Tensor) -> Tensor {
    let data = a.data().mapv(f32::tanh);
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data.clone(), requires_grad);
    if requires_grad {
        result.set_backward_op(Rc::new(TanhBackward {
            a: a.clone(),
            output: data,
            result_grad: result.grad_cell(),
        }));
    }
    result
}

struct TanhBackward {
    a: Tensor,
    output: Array1<f32>,
    result_grad: GradCell,
}

impl BackwardOp for TanhBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                let deriv = self.output.mapv(|y| 1.0 - y * y);
                self.a.accumulate_grad(grad * &deriv);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Softplus, `ln(1 + e^x)`. Used for standard-deviation outputs, which must
/// stay positive.
pub fn softplus(a: &Tensor) -> Tensor {
    // ln(1+e^x) = max(x,0) + ln(1+e^{-|x|}) avoids overflow for large x.
    let data = a.data().mapv(|x| x.max(0.0) + (1.0 + (-x.abs()).exp()).ln());
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);
    if requires_grad {
        result.set_backward_op(Rc::new(SoftplusBackward {
            a: a.clone(),
            result_grad: result.grad_cell(),
        }));
    }
    result
}

struct SoftplusBackward {
    a: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for SoftplusBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                let deriv = self.a.data().mapv(sigmoid_scalar);
                self.a.accumulate_grad(grad * &deriv);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Numerically stable softmax over one logit row.
pub(crate) fn softmax_row(row: &mut [f32]) {
    let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let mut sum = 0.0;
    for v in row.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    for v in row.iter_mut() {
        *v /= sum;
    }
}

/// Softmax applied independently to each row of a `[rows, cols]` tensor.
pub fn softmax_rows(a: &Tensor, rows: usize, cols: usize) -> Tensor {
    assert_eq!(a.len(), rows * cols, "softmax_rows: wrong input length");

    let mut data = a.data().to_vec();
    for r in 0..rows {
        softmax_row(&mut data[r * cols..(r + 1) * cols]);
    }
    let data = Array1::from(data);

    let requires_grad = a.requires_grad();
    let mut result = Tensor::new(data.clone(), requires_grad);
    if requires_grad {
        result.set_backward_op(Rc::new(SoftmaxRowsBackward {
            a: a.clone(),
            output: data,
            rows,
            cols,
            result_grad: result.grad_cell(),
        }));
    }
    result
}

struct SoftmaxRowsBackward {
    a: Tensor,
    output: Array1<f32>,
    rows: usize,
    cols: usize,
    result_grad: GradCell,
}

impl BackwardOp for SoftmaxRowsBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // Per row: dx = y ⊙ (g - (g·y))
                let g = grad.as_slice().unwrap();
                let y = self.output.as_slice().unwrap();
                let mut grad_a = vec![0.0f32; self.rows * self.cols];
                for r in 0..self.rows {
                    let base = r * self.cols;
                    let dot: f32 =
                        (0..self.cols).map(|j| g[base + j] * y[base + j]).sum();
                    for j in 0..self.cols {
                        grad_a[base + j] = y[base + j] * (g[base + j] - dot);
                    }
                }
                self.a.accumulate_grad(Array1::from(grad_a));
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::backward;
    use crate::autograd::ops::sum;
    use approx::assert_relative_eq;

    #[test]
    fn test_relu_gradient_mask() {
        let a = Tensor::from_vec(vec![-1.0, 2.0], true);
        let y = relu(&a);
        assert_eq!(y.data().to_vec(), vec![0.0, 2.0]);
        let s = sum(&y);
        backward(&s, None);
        assert_eq!(a.grad().unwrap().to_vec(), vec![0.0, 1.0]);
    }

    #[test]
    fn test_leaky_relu_slope() {
        let a = Tensor::from_vec(vec![-2.0, 2.0], true);
        let y = leaky_relu(&a, 0.3);
        assert_relative_eq!(y.data()[0], -0.6);
        assert_relative_eq!(y.data()[1], 2.0);
        let s = sum(&y);
        backward(&s, None);
        let g = a.grad().unwrap();
        assert_relative_eq!(g[0], 0.3);
        assert_relative_eq!(g[1], 1.0);
    }

    #[test]
    fn test_sigmoid_range_and_gradient() {
        let a = Tensor::from_vec(vec![0.0], true);
        let y = sigmoid(&a);
        assert_relative_eq!(y.data()[0], 0.5);
        backward(&y, None);
        assert_relative_eq!(a.grad().unwrap()[0], 0.25);
    }

    #[test]
    fn test_tanh_gradient() {
        let a = Tensor::from_vec(vec![0.0], true);
        let y = tanh(&a);
        assert_relative_eq!(y.data()[0], 0.0);
        backward(&y, None);
        assert_relative_eq!(a.grad().unwrap()[0], 1.0);
    }

    #[test]
    fn test_softplus_positive_and_stable() {
        let a = Tensor::from_vec(vec![-100.0, 0.0, 100.0], false);
        let y = softplus(&a);
        assert!(y.data().iter().all(|&v| v >= 0.0 && v.is_finite()));
        assert_relative_eq!(y.data()[1], (2.0f32).ln());
        assert_relative_eq!(y.data()[2], 100.0, epsilon = 1e-4);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let a = Tensor::from_vec(vec![1.0, 2.0, 3.0, -1.0, 0.0, 1.0], false);
        let y = softmax_rows(&a, 2, 3);
        let d = y.data();
        let row0: f32 = d.as_slice().unwrap()[0..3].iter().sum();
        let row1: f32 = d.as_slice().unwrap()[3..6].iter().sum();
        assert_relative_eq!(row0, 1.0, epsilon = 1e-5);
        assert_relative_eq!(row1, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_softmax_gradient_sums_to_zero() {
        // Softmax is shift-invariant, so row gradients must sum to ~0.
        let a = Tensor::from_vec(vec![0.5, -0.5, 1.5], true);
        let y = softmax_rows(&a, 1, 3);
        let first = crate::autograd::ops::slice_cols(&y, 1, 3, 0, 1);
        backward(&first, None);
        let g = a.grad().unwrap();
        let total: f32 = g.iter().sum();
        assert_relative_eq!(total, 0.0, epsilon = 1e-5);
    }
}
