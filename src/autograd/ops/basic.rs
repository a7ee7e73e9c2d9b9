//! Basic autograd operations: arithmetic, reductions, slicing, concatenation.

use crate::autograd::{BackwardOp, Tensor};
use ndarray::Array1;
use std::cell::RefCell;
use std::rc::Rc;

type GradCell = Rc<RefCell<Option<Array1<f32>>>>;

/// Add two tensors element-wise.
pub fn add(a: &Tensor, b: &Tensor) -> Tensor {
    assert_eq!(a.len(), b.len(), "add: tensors must have same length");
    let data = &*a.data() + &*b.data();
    let requires_grad = a.requires_grad() || b.requires_grad();

    let mut result = Tensor::new(data, requires_grad);
    if requires_grad {
        result.set_backward_op(Rc::new(AddBackward {
            a: a.clone(),
            b: b.clone(),
            result_grad: result.grad_cell(),
        }));
    }
    result
}

struct AddBackward {
    a: Tensor,
    b: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for AddBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                self.a.accumulate_grad(grad.clone());
            }
            if self.b.requires_grad() {
                self.b.accumulate_grad(grad.clone());
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone(), self.b.clone()]
    }
}

/// Subtract `b` from `a` element-wise.
pub fn sub(a: &Tensor, b: &Tensor) -> Tensor {
    assert_eq!(a.len(), b.len(), "sub: tensors must have same length");
    let data = &*a.data() - &*b.data();
    let requires_grad = a.requires_grad() || b.requires_grad();

    let mut result = Tensor::new(data, requires_grad);
    if requires_grad {
        result.set_backward_op(Rc::new(SubBackward {
            a: a.clone(),
            b: b.clone(),
            result_grad: result.grad_cell(),
        }));
    }
    result
}

struct SubBackward {
    a: Tensor,
    b: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for SubBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                self.a.accumulate_grad(grad.clone());
            }
            if self.b.requires_grad() {
                self.b.accumulate_grad(grad.mapv(|g| -g));
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone(), self.b.clone()]
    }
}

/// Multiply two tensors element-wise.
pub fn mul(a: &Tensor, b: &Tensor) -> Tensor {
    assert_eq!(a.len(), b.len(), "mul: tensors must have same length");
    let data = &*a.data() * &*b.data();
    let requires_grad = a.requires_grad() || b.requires_grad();

    let mut result = Tensor::new(data, requires_grad);
    if requires_grad {
        result.set_backward_op(Rc::new(MulBackward {
            a: a.clone(),
            b: b.clone(),
            result_grad: result.grad_cell(),
        }));
    }
    result
}

struct MulBackward {
    a: Tensor,
    b: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for MulBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                self.a.accumulate_grad(grad * &*self.b.data());
            }
            if self.b.requires_grad() {
                self.b.accumulate_grad(grad * &*self.a.data());
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone(), self.b.clone()]
    }
}

/// Scale a tensor by a scalar.
pub fn scale(a: &Tensor, factor: f32) -> Tensor {
    let data = &*a.data() * factor;
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);
    if requires_grad {
        result.set_backward_op(Rc::new(ScaleBackward {
            a: a.clone(),
            factor,
            result_grad: result.grad_cell(),
        }));
    }
    result
}

struct ScaleBackward {
    a: Tensor,
    factor: f32,
    result_grad: GradCell,
}

impl BackwardOp for ScaleBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                self.a.accumulate_grad(grad * self.factor);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Add a scalar to every element.
pub fn add_scalar(a: &Tensor, value: f32) -> Tensor {
    let data = a.data().mapv(|x| x + value);
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);
    if requires_grad {
        result.set_backward_op(Rc::new(PassthroughBackward {
            a: a.clone(),
            result_grad: result.grad_cell(),
        }));
    }
    result
}

/// Gradient flows through unchanged (shift by constant).
struct PassthroughBackward {
    a: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for PassthroughBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                self.a.accumulate_grad(grad.clone());
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Sum all elements to a length-1 tensor.
pub fn sum(a: &Tensor) -> Tensor {
    let data = Array1::from(vec![a.data().sum()]);
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);
    if requires_grad {
        result.set_backward_op(Rc::new(SumBackward {
            a: a.clone(),
            scale: 1.0,
            result_grad: result.grad_cell(),
        }));
    }
    result
}

/// Mean of all elements, as a length-1 tensor.
pub fn mean_all(a: &Tensor) -> Tensor {
    let n = a.len() as f32;
    let data = Array1::from(vec![a.data().sum() / n]);
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);
    if requires_grad {
        result.set_backward_op(Rc::new(SumBackward {
            a: a.clone(),
            scale: 1.0 / n,
            result_grad: result.grad_cell(),
        }));
    }
    result
}

struct SumBackward {
    a: Tensor,
    scale: f32,
    result_grad: GradCell,
}

impl BackwardOp for SumBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                let g = grad[0] * self.scale;
                self.a.accumulate_grad(Array1::from(vec![g; self.a.len()]));
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Concatenate two row-major `[rows, cols]` tensors along the column axis.
pub fn concat_cols(a: &Tensor, b: &Tensor, rows: usize, cols_a: usize, cols_b: usize) -> Tensor {
    assert_eq!(a.len(), rows * cols_a, "concat_cols: a has wrong length");
    assert_eq!(b.len(), rows * cols_b, "concat_cols: b has wrong length");

    let a_data = a.data();
    let b_data = b.data();
    let mut data = Vec::with_capacity(rows * (cols_a + cols_b));
    for r in 0..rows {
        data.extend_from_slice(&a_data.as_slice().unwrap()[r * cols_a..(r + 1) * cols_a]);
        data.extend_from_slice(&b_data.as_slice().unwrap()[r * cols_b..(r + 1) * cols_b]);
    }
    drop(a_data);
    drop(b_data);

    let requires_grad = a.requires_grad() || b.requires_grad();
    let mut result = Tensor::new(Array1::from(data), requires_grad);
    if requires_grad {
        result.set_backward_op(Rc::new(ConcatColsBackward {
            a: a.clone(),
            b: b.clone(),
            rows,
            cols_a,
            cols_b,
            result_grad: result.grad_cell(),
        }));
    }
    result
}

struct ConcatColsBackward {
    a: Tensor,
    b: Tensor,
    rows: usize,
    cols_a: usize,
    cols_b: usize,
    result_grad: GradCell,
}

impl BackwardOp for ConcatColsBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            let cols = self.cols_a + self.cols_b;
            let g = grad.as_slice().unwrap();
            if self.a.requires_grad() {
                let mut grad_a = Vec::with_capacity(self.rows * self.cols_a);
                for r in 0..self.rows {
                    grad_a.extend_from_slice(&g[r * cols..r * cols + self.cols_a]);
                }
                self.a.accumulate_grad(Array1::from(grad_a));
            }
            if self.b.requires_grad() {
                let mut grad_b = Vec::with_capacity(self.rows * self.cols_b);
                for r in 0..self.rows {
                    grad_b.extend_from_slice(&g[r * cols + self.cols_a..(r + 1) * cols]);
                }
                self.b.accumulate_grad(Array1::from(grad_b));
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone(), self.b.clone()]
    }
}

/// Take columns `[start, start+len)` of a row-major `[rows, cols]` tensor.
pub fn slice_cols(a: &Tensor, rows: usize, cols: usize, start: usize, len: usize) -> Tensor {
    assert_eq!(a.len(), rows * cols, "slice_cols: wrong input length");
    assert!(start + len <= cols, "slice_cols: out of bounds");

    let a_data = a.data();
    let src = a_data.as_slice().unwrap();
    let mut data = Vec::with_capacity(rows * len);
    for r in 0..rows {
        data.extend_from_slice(&src[r * cols + start..r * cols + start + len]);
    }
    drop(a_data);

    let requires_grad = a.requires_grad();
    let mut result = Tensor::new(Array1::from(data), requires_grad);
    if requires_grad {
        result.set_backward_op(Rc::new(SliceColsBackward {
            a: a.clone(),
            rows,
            cols,
            start,
            len,
            result_grad: result.grad_cell(),
        }));
    }
    result
}

struct SliceColsBackward {
    a: Tensor,
    rows: usize,
    cols: usize,
    start: usize,
    len: usize,
    result_grad: GradCell,
}

impl BackwardOp for SliceColsBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                let g = grad.as_slice().unwrap();
                let mut grad_a = vec![0.0; self.rows * self.cols];
                for r in 0..self.rows {
                    grad_a[r * self.cols + self.start..r * self.cols + self.start + self.len]
                        .copy_from_slice(&g[r * self.len..(r + 1) * self.len]);
                }
                self.a.accumulate_grad(Array1::from(grad_a));
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Take rows `[start, start+len)` of a row-major `[rows, cols]` tensor.
pub fn slice_rows(a: &Tensor, rows: usize, cols: usize, start: usize, len: usize) -> Tensor {
    assert_eq!(a.len(), rows * cols, "slice_rows: wrong input length");
    assert!(start + len <= rows, "slice_rows: out of bounds");

    let data = {
        let a_data = a.data();
        let src = a_data.as_slice().unwrap();
        Array1::from(src[start * cols..(start + len) * cols].to_vec())
    };

    let requires_grad = a.requires_grad();
    let mut result = Tensor::new(data, requires_grad);
    if requires_grad {
        result.set_backward_op(Rc::new(SliceRowsBackward {
            a: a.clone(),
            rows,
            cols,
            start,
            len,
            result_grad: result.grad_cell(),
        }));
    }
    result
}

struct SliceRowsBackward {
    a: Tensor,
    rows: usize,
    cols: usize,
    start: usize,
    len: usize,
    result_grad: GradCell,
}

impl BackwardOp for SliceRowsBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                let g = grad.as_slice().unwrap();
                let mut grad_a = vec![0.0; self.rows * self.cols];
                grad_a[self.start * self.cols..(self.start + self.len) * self.cols]
                    .copy_from_slice(g);
                self.a.accumulate_grad(Array1::from(grad_a));
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Extract time step `t` from a `[batch, time_steps, features]` tensor,
/// producing `[batch, features]`.
pub fn select_time_step(
    x: &Tensor,
    batch: usize,
    time_steps: usize,
    features: usize,
    t: usize,
) -> Tensor {
    assert_eq!(x.len(), batch * time_steps * features, "select_time_step: wrong input length");
    assert!(t < time_steps, "select_time_step: step out of range");

    let x_data = x.data();
    let src = x_data.as_slice().unwrap();
    let mut data = Vec::with_capacity(batch * features);
    for n in 0..batch {
        let base = n * time_steps * features + t * features;
        data.extend_from_slice(&src[base..base + features]);
    }
    drop(x_data);

    let requires_grad = x.requires_grad();
    let mut result = Tensor::new(Array1::from(data), requires_grad);
    if requires_grad {
        result.set_backward_op(Rc::new(SelectTimeStepBackward {
            x: x.clone(),
            batch,
            time_steps,
            features,
            t,
            result_grad: result.grad_cell(),
        }));
    }
    result
}

struct SelectTimeStepBackward {
    x: Tensor,
    batch: usize,
    time_steps: usize,
    features: usize,
    t: usize,
    result_grad: GradCell,
}

impl BackwardOp for SelectTimeStepBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.x.requires_grad() {
                let g = grad.as_slice().unwrap();
                let mut grad_x = vec![0.0; self.batch * self.time_steps * self.features];
                for n in 0..self.batch {
                    let base = n * self.time_steps * self.features + self.t * self.features;
                    grad_x[base..base + self.features]
                        .copy_from_slice(&g[n * self.features..(n + 1) * self.features]);
                }
                self.x.accumulate_grad(Array1::from(grad_x));
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.x.clone()]
    }
}

/// Natural log of `max(eps, x)` element-wise. The floor keeps variational
/// loss terms finite when a standard deviation collapses toward zero; inside
/// the floored region the gradient is zero.
pub fn ln_clamped(a: &Tensor, eps: f32) -> Tensor {
    let data = a.data().mapv(|x| x.max(eps).ln());
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);
    if requires_grad {
        result.set_backward_op(Rc::new(LnClampedBackward {
            a: a.clone(),
            eps,
            result_grad: result.grad_cell(),
        }));
    }
    result
}

struct LnClampedBackward {
    a: Tensor,
    eps: f32,
    result_grad: GradCell,
}

impl BackwardOp for LnClampedBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                let deriv = self.a.data().mapv(|x| if x > self.eps { 1.0 / x } else { 0.0 });
                self.a.accumulate_grad(grad * &deriv);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Reciprocal of `max(eps, x)` element-wise, same floor rule as `ln_clamped`.
pub fn recip_clamped(a: &Tensor, eps: f32) -> Tensor {
    let data = a.data().mapv(|x| 1.0 / x.max(eps));
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);
    if requires_grad {
        result.set_backward_op(Rc::new(RecipClampedBackward {
            a: a.clone(),
            eps,
            result_grad: result.grad_cell(),
        }));
    }
    result
}

struct RecipClampedBackward {
    a: Tensor,
    eps: f32,
    result_grad: GradCell,
}

impl BackwardOp for RecipClampedBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                let deriv =
                    self.a.data().mapv(|x| if x > self.eps { -1.0 / (x * x) } else { 0.0 });
                self.a.accumulate_grad(grad * &deriv);
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
    use approx::assert_relative_eq;

    #[test]
    fn test_add_sub_mul_forward() {
        let a = Tensor::from_vec(vec![1.0, 2.0], false);
        let b = Tensor::from_vec(vec![3.0, 4.0], false);
        assert_eq!(add(&a, &b).data().to_vec(), vec![4.0, 6.0]);
        assert_eq!(sub(&a, &b).data().to_vec(), vec![-2.0, -2.0]);
        assert_eq!(mul(&a, &b).data().to_vec(), vec![3.0, 8.0]);
    }

    #[test]
    fn test_mean_all_gradient() {
        let a = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], true);
        let m = mean_all(&a);
        assert_relative_eq!(m.data()[0], 2.5);
        backward(&m, None);
        for &g in a.grad().unwrap().iter() {
            assert_relative_eq!(g, 0.25);
        }
    }

    #[test]
    fn test_concat_cols_roundtrip() {
        // rows=2: a = [[1,2],[3,4]], b = [[5],[6]]
        let a = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], true);
        let b = Tensor::from_vec(vec![5.0, 6.0], true);
        let c = concat_cols(&a, &b, 2, 2, 1);
        assert_eq!(c.data().to_vec(), vec![1.0, 2.0, 5.0, 3.0, 4.0, 6.0]);

        let back_a = slice_cols(&c, 2, 3, 0, 2);
        let back_b = slice_cols(&c, 2, 3, 2, 1);
        assert_eq!(back_a.data().to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(back_b.data().to_vec(), vec![5.0, 6.0]);

        let s = sum(&back_b);
        backward(&s, None);
        assert_eq!(b.grad().unwrap().to_vec(), vec![1.0, 1.0]);
        assert!(a.grad().unwrap().iter().all(|&g| g == 0.0));
    }

    #[test]
    fn test_slice_rows_gradient_scatters() {
        let a = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], true);
        let top = slice_rows(&a, 3, 2, 0, 2);
        assert_eq!(top.data().to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
        let s = sum(&top);
        backward(&s, None);
        assert_eq!(a.grad().unwrap().to_vec(), vec![1.0, 1.0, 1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_select_time_step() {
        // batch=2, T=3, F=2
        let x = Tensor::from_vec((0..12).map(|v| v as f32).collect(), true);
        let step1 = select_time_step(&x, 2, 3, 2, 1);
        assert_eq!(step1.data().to_vec(), vec![2.0, 3.0, 8.0, 9.0]);
        let s = sum(&step1);
        backward(&s, None);
        let g = a_grad(&x);
        assert_eq!(g, vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0]);
    }

    fn a_grad(t: &Tensor) -> Vec<f32> {
        t.grad().unwrap().to_vec()
    }

    #[test]
    fn test_ln_clamped_floors() {
        let a = Tensor::from_vec(vec![0.0, 1.0], true);
        let y = ln_clamped(&a, 1e-9);
        assert_relative_eq!(y.data()[0], (1e-9f32).ln());
        assert_relative_eq!(y.data()[1], 0.0);
        let s = sum(&y);
        backward(&s, None);
        let g = a.grad().unwrap();
        assert_eq!(g[0], 0.0); // floored region
        assert_relative_eq!(g[1], 1.0);
    }

    #[test]
    fn test_recip_clamped() {
        let a = Tensor::from_vec(vec![2.0], true);
        let y = recip_clamped(&a, 1e-9);
        assert_relative_eq!(y.data()[0], 0.5);
        backward(&y, None);
        assert_relative_eq!(a.grad().unwrap()[0], -0.25);
    }
}
