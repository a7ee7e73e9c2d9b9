//! Matrix multiplication and dense-layer autograd operations.
//!
//! Tensors are flat; callers pass explicit `(m, k, n)` dimensions for
//! row-major matrices.

use crate::autograd::{BackwardOp, Tensor};
use ndarray::Array1;
use std::cell::RefCell;
use std::rc::Rc;

type GradCell = Rc<RefCell<Option<Array1<f32>>>>;

/// Transpose a row-major matrix (rows x cols) to (cols x rows).
#[inline]
pub fn transpose(data: &[f32], rows: usize, cols: usize) -> Vec<f32> {
    let mut transposed = vec![0.0f32; rows * cols];
    for r in 0..rows {
        for c in 0..cols {
            transposed[c * rows + r] = data[r * cols + c];
        }
    }
    transposed
}

/// Row-major GEMM: C[m,n] = A[m,k] · B[k,n].
pub fn matmul_compute(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
    let mut c = vec![0.0f32; m * n];
    for i in 0..m {
        for p in 0..k {
            let a_ip = a[i * k + p];
            if a_ip == 0.0 {
                continue;
            }
            let b_row = &b[p * n..(p + 1) * n];
            let c_row = &mut c[i * n..(i + 1) * n];
            for j in 0..n {
                c_row[j] += a_ip * b_row[j];
            }
        }
    }
    c
}

/// Matrix multiply two flat tensors: `a` is `[m, k]`, `b` is `[k, n]`.
pub fn matmul(a: &Tensor, b: &Tensor, m: usize, k: usize, n: usize) -> Tensor {
    assert_eq!(a.len(), m * k, "matmul: a has wrong length");
    assert_eq!(b.len(), k * n, "matmul: b has wrong length");

    let data = {
        let a_data = a.data();
        let b_data = b.data();
        matmul_compute(a_data.as_slice().unwrap(), b_data.as_slice().unwrap(), m, k, n)
    };

    let requires_grad = a.requires_grad() || b.requires_grad();
    let mut result = Tensor::new(Array1::from(data), requires_grad);
    if requires_grad {
        result.set_backward_op(Rc::new(MatmulBackward {
            a: a.clone(),
            b: b.clone(),
            m,
            k,
            n,
            result_grad: result.grad_cell(),
        }));
    }
    result
}

struct MatmulBackward {
    a: Tensor,
    b: Tensor,
    m: usize,
    k: usize,
    n: usize,
    result_grad: GradCell,
}

impl BackwardOp for MatmulBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            let g = grad.as_slice().unwrap();
            // dA = dC · Bᵀ
            if self.a.requires_grad() {
                let b_data = self.b.data();
                let b_t = transpose(b_data.as_slice().unwrap(), self.k, self.n);
                let grad_a = matmul_compute(g, &b_t, self.m, self.n, self.k);
                drop(b_data);
                self.a.accumulate_grad(Array1::from(grad_a));
            }
            // dB = Aᵀ · dC
            if self.b.requires_grad() {
                let a_data = self.a.data();
                let a_t = transpose(a_data.as_slice().unwrap(), self.m, self.k);
                let grad_b = matmul_compute(&a_t, g, self.k, self.m, self.n);
                drop(a_data);
                self.b.accumulate_grad(Array1::from(grad_b));
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone(), self.b.clone()]
    }
}

/// Dense layer: `x[batch, in] · w[in, out] + b[out]` broadcast over rows.
pub fn linear(
    x: &Tensor,
    w: &Tensor,
    b: &Tensor,
    batch: usize,
    in_dim: usize,
    out_dim: usize,
) -> Tensor {
    assert_eq!(x.len(), batch * in_dim, "linear: x has wrong length");
    assert_eq!(w.len(), in_dim * out_dim, "linear: w has wrong length");
    assert_eq!(b.len(), out_dim, "linear: b has wrong length");

    let mut data = {
        let x_data = x.data();
        let w_data = w.data();
        matmul_compute(
            x_data.as_slice().unwrap(),
            w_data.as_slice().unwrap(),
            batch,
            in_dim,
            out_dim,
        )
    };
    {
        let b_data = b.data();
        let bias = b_data.as_slice().unwrap();
        for r in 0..batch {
            for j in 0..out_dim {
                data[r * out_dim + j] += bias[j];
            }
        }
    }

    let requires_grad = x.requires_grad() || w.requires_grad() || b.requires_grad();
    let mut result = Tensor::new(Array1::from(data), requires_grad);
    if requires_grad {
        result.set_backward_op(Rc::new(LinearBackward {
            x: x.clone(),
            w: w.clone(),
            b: b.clone(),
            batch,
            in_dim,
            out_dim,
            result_grad: result.grad_cell(),
        }));
    }
    result
}

struct LinearBackward {
    x: Tensor,
    w: Tensor,
    b: Tensor,
    batch: usize,
    in_dim: usize,
    out_dim: usize,
    result_grad: GradCell,
}

impl BackwardOp for LinearBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            let g = grad.as_slice().unwrap();
            if self.x.requires_grad() {
                let w_data = self.w.data();
                let w_t = transpose(w_data.as_slice().unwrap(), self.in_dim, self.out_dim);
                let grad_x = matmul_compute(g, &w_t, self.batch, self.out_dim, self.in_dim);
                drop(w_data);
                self.x.accumulate_grad(Array1::from(grad_x));
            }
            if self.w.requires_grad() {
                let x_data = self.x.data();
                let x_t = transpose(x_data.as_slice().unwrap(), self.batch, self.in_dim);
                let grad_w = matmul_compute(&x_t, g, self.in_dim, self.batch, self.out_dim);
                drop(x_data);
                self.w.accumulate_grad(Array1::from(grad_w));
            }
            if self.b.requires_grad() {
                // db[j] = sum over rows of dC[r, j]
                let mut grad_b = vec![0.0f32; self.out_dim];
                for r in 0..self.batch {
                    for j in 0..self.out_dim {
                        grad_b[j] += g[r * self.out_dim + j];
                    }
                }
                self.b.accumulate_grad(Array1::from(grad_b));
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.x.clone(), self.w.clone(), self.b.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::backward;
    use crate::autograd::ops::sum;
    use approx::assert_relative_eq;

    #[test]
    fn test_transpose_roundtrip() {
        let m = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]; // 2x3
        let t = transpose(&m, 2, 3);
        assert_eq!(t, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        assert_eq!(transpose(&t, 3, 2), m);
    }

    #[test]
    fn test_matmul_forward() {
        // [[1,2],[3,4]] · [[5,6],[7,8]] = [[19,22],[43,50]]
        let a = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], false);
        let b = Tensor::from_vec(vec![5.0, 6.0, 7.0, 8.0], false);
        let c = matmul(&a, &b, 2, 2, 2);
        assert_eq!(c.data().to_vec(), vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_matmul_gradients() {
        let a = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], true);
        let b = Tensor::from_vec(vec![5.0, 6.0, 7.0, 8.0], true);
        let c = matmul(&a, &b, 2, 2, 2);
        let loss = sum(&c);
        backward(&loss, None);

        // dA = 1 · Bᵀ row sums: each dA[i,p] = sum_j B[p,j]
        let ga = a.grad().unwrap();
        assert_eq!(ga.to_vec(), vec![11.0, 15.0, 11.0, 15.0]);
        // dB[p,j] = sum_i A[i,p]
        let gb = b.grad().unwrap();
        assert_eq!(gb.to_vec(), vec![4.0, 4.0, 6.0, 6.0]);
    }

    #[test]
    fn test_linear_bias_gradient() {
        let x = Tensor::from_vec(vec![1.0, 0.0, 0.0, 1.0], false);
        let w = Tensor::from_vec(vec![2.0, 0.0, 0.0, 2.0], true);
        let b = Tensor::from_vec(vec![0.5, -0.5], true);
        let y = linear(&x, &w, &b, 2, 2, 2);
        assert_relative_eq!(y.data()[0], 2.5);
        assert_relative_eq!(y.data()[3], 1.5);

        let loss = sum(&y);
        backward(&loss, None);
        assert_eq!(b.grad().unwrap().to_vec(), vec![2.0, 2.0]);
        // x is identity, so dW = sum over the batch of outer products = ones
        assert_eq!(w.grad().unwrap().to_vec(), vec![1.0, 1.0, 1.0, 1.0]);
    }
}
