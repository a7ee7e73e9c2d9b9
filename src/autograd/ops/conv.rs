//! Convolution autograd operations: causal dilated 1-D and strided 'same'
//! 2-D convolution. Layouts are channels-last (`[batch, time, channels]`
//! and `[batch, height, width, channels]`).

use crate::autograd::{BackwardOp, Tensor};
use ndarray::Array1;
use std::cell::RefCell;
use std::rc::Rc;

type GradCell = Rc<RefCell<Option<Array1<f32>>>>;

/// Causal dilated 1-D convolution.
///
/// `x` is `[batch, time, in_ch]`, `w` is `[kernel, in_ch, out_ch]`, `b` is
/// `[out_ch]`. Tap `k` reads `x[t - k*dilation]`; positions before the start
/// of the sequence contribute zero (implicit left padding), so output `t`
/// never sees the future.
pub fn conv1d_causal(
    x: &Tensor,
    w: &Tensor,
    b: &Tensor,
    batch: usize,
    time: usize,
    in_ch: usize,
    out_ch: usize,
    kernel: usize,
    dilation: usize,
) -> Tensor {
    assert_eq!(x.len(), batch * time * in_ch, "conv1d: x has wrong length");
    assert_eq!(w.len(), kernel * in_ch * out_ch, "conv1d: w has wrong length");
    assert_eq!(b.len(), out_ch, "conv1d: b has wrong length");

    let out = {
        let x_data = x.data();
        let w_data = w.data();
        let b_data = b.data();
        let xs = x_data.as_slice().unwrap();
        let ws = w_data.as_slice().unwrap();
        let bs = b_data.as_slice().unwrap();

        let mut out = vec![0.0f32; batch * time * out_ch];
        for n in 0..batch {
            for t in 0..time {
                let o_base = (n * time + t) * out_ch;
                out[o_base..o_base + out_ch].copy_from_slice(bs);
                for k in 0..kernel {
                    let offset = k * dilation;
                    if offset > t {
                        continue;
                    }
                    let x_base = (n * time + (t - offset)) * in_ch;
                    for ic in 0..in_ch {
                        let xv = xs[x_base + ic];
                        if xv == 0.0 {
                            continue;
                        }
                        let w_base = (k * in_ch + ic) * out_ch;
                        for oc in 0..out_ch {
                            out[o_base + oc] += xv * ws[w_base + oc];
                        }
                    }
                }
            }
        }
        out
    };

    let requires_grad = x.requires_grad() || w.requires_grad() || b.requires_grad();
    let mut result = Tensor::new(Array1::from(out), requires_grad);
    if requires_grad {
        result.set_backward_op(Rc::new(Conv1dBackward {
            x: x.clone(),
            w: w.clone(),
            b: b.clone(),
            batch,
            time,
            in_ch,
            out_ch,
            kernel,
            dilation,
            result_grad: result.grad_cell(),
        }));
    }
    result
}

struct Conv1dBackward {
    x: Tensor,
    w: Tensor,
    b: Tensor,
    batch: usize,
    time: usize,
    in_ch: usize,
    out_ch: usize,
    kernel: usize,
    dilation: usize,
    result_grad: GradCell,
}

impl BackwardOp for Conv1dBackward {
    fn backward(&self) {
        let Some(grad) = self.result_grad.borrow().as_ref().cloned() else {
            return;
        };
        let g = grad.as_slice().unwrap();
        let (batch, time, in_ch, out_ch) = (self.batch, self.time, self.in_ch, self.out_ch);

        if self.b.requires_grad() {
            let mut grad_b = vec![0.0f32; out_ch];
            for n in 0..batch {
                for t in 0..time {
                    let base = (n * time + t) * out_ch;
                    for oc in 0..out_ch {
                        grad_b[oc] += g[base + oc];
                    }
                }
            }
            self.b.accumulate_grad(Array1::from(grad_b));
        }
        if self.w.requires_grad() {
            let x_data = self.x.data();
            let xs = x_data.as_slice().unwrap();
            let mut grad_w = vec![0.0f32; self.kernel * in_ch * out_ch];
            for n in 0..batch {
                for t in 0..time {
                    let o_base = (n * time + t) * out_ch;
                    for k in 0..self.kernel {
                        let offset = k * self.dilation;
                        if offset > t {
                            continue;
                        }
                        let x_base = (n * time + (t - offset)) * in_ch;
                        for ic in 0..in_ch {
                            let xv = xs[x_base + ic];
                            let w_base = (k * in_ch + ic) * out_ch;
                            for oc in 0..out_ch {
                                grad_w[w_base + oc] += xv * g[o_base + oc];
                            }
                        }
                    }
                }
            }
            drop(x_data);
            self.w.accumulate_grad(Array1::from(grad_w));
        }
        if self.x.requires_grad() {
            let w_data = self.w.data();
            let ws = w_data.as_slice().unwrap();
            let mut grad_x = vec![0.0f32; batch * time * in_ch];
            for n in 0..batch {
                for t in 0..time {
                    let o_base = (n * time + t) * out_ch;
                    for k in 0..self.kernel {
                        let offset = k * self.dilation;
                        if offset > t {
                            continue;
                        }
                        let x_base = (n * time + (t - offset)) * in_ch;
                        for ic in 0..in_ch {
                            let w_base = (k * in_ch + ic) * out_ch;
                            let mut acc = 0.0;
                            for oc in 0..out_ch {
                                acc += ws[w_base + oc] * g[o_base + oc];
                            }
                            grad_x[x_base + ic] += acc;
                        }
                    }
                }
            }
            drop(w_data);
            self.x.accumulate_grad(Array1::from(grad_x));
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.x.clone(), self.w.clone(), self.b.clone()]
    }
}

/// Output length of a 'same'-padded strided dimension.
pub fn same_out_len(len: usize, stride: usize) -> usize {
    len.div_ceil(stride)
}

fn same_pad_before(len: usize, stride: usize, kernel: usize) -> usize {
    let out = same_out_len(len, stride);
    let total = ((out - 1) * stride + kernel).saturating_sub(len);
    total / 2
}

/// Strided 2-D convolution with 'same' padding.
///
/// `x` is `[batch, h, w, in_ch]`, `weight` is `[kernel, kernel, in_ch,
/// out_ch]`, `bias` is `[out_ch]`. Output is `[batch, ceil(h/stride),
/// ceil(w/stride), out_ch]`.
#[allow(clippy::too_many_arguments)]
pub fn conv2d_same(
    x: &Tensor,
    weight: &Tensor,
    bias: &Tensor,
    batch: usize,
    h: usize,
    w: usize,
    in_ch: usize,
    out_ch: usize,
    kernel: usize,
    stride: usize,
) -> Tensor {
    assert_eq!(x.len(), batch * h * w * in_ch, "conv2d: x has wrong length");
    assert_eq!(weight.len(), kernel * kernel * in_ch * out_ch, "conv2d: weight has wrong length");
    assert_eq!(bias.len(), out_ch, "conv2d: bias has wrong length");

    let out_h = same_out_len(h, stride);
    let out_w = same_out_len(w, stride);
    let pad_h = same_pad_before(h, stride, kernel);
    let pad_w = same_pad_before(w, stride, kernel);

    let out = {
        let x_data = x.data();
        let w_data = weight.data();
        let b_data = bias.data();
        let xs = x_data.as_slice().unwrap();
        let ws = w_data.as_slice().unwrap();
        let bs = b_data.as_slice().unwrap();

        let mut out = vec![0.0f32; batch * out_h * out_w * out_ch];
        for n in 0..batch {
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let o_base = ((n * out_h + oh) * out_w + ow) * out_ch;
                    out[o_base..o_base + out_ch].copy_from_slice(bs);
                    for kh in 0..kernel {
                        let ih = (oh * stride + kh) as isize - pad_h as isize;
                        if ih < 0 || ih >= h as isize {
                            continue;
                        }
                        for kw in 0..kernel {
                            let iw = (ow * stride + kw) as isize - pad_w as isize;
                            if iw < 0 || iw >= w as isize {
                                continue;
                            }
                            let x_base = ((n * h + ih as usize) * w + iw as usize) * in_ch;
                            for ic in 0..in_ch {
                                let xv = xs[x_base + ic];
                                if xv == 0.0 {
                                    continue;
                                }
                                let w_base = ((kh * kernel + kw) * in_ch + ic) * out_ch;
                                for oc in 0..out_ch {
                                    out[o_base + oc] += xv * ws[w_base + oc];
                                }
                            }
                        }
                    }
                }
            }
        }
        out
    };

    let requires_grad = x.requires_grad() || weight.requires_grad() || bias.requires_grad();
    let mut result = Tensor::new(Array1::from(out), requires_grad);
    if requires_grad {
        result.set_backward_op(Rc::new(Conv2dBackward {
            x: x.clone(),
            weight: weight.clone(),
            bias: bias.clone(),
            batch,
            h,
            w,
            in_ch,
            out_ch,
            kernel,
            stride,
            result_grad: result.grad_cell(),
        }));
    }
    result
}

struct Conv2dBackward {
    x: Tensor,
    weight: Tensor,
    bias: Tensor,
    batch: usize,
    h: usize,
    w: usize,
    in_ch: usize,
    out_ch: usize,
    kernel: usize,
    stride: usize,
    result_grad: GradCell,
}

impl BackwardOp for Conv2dBackward {
    fn backward(&self) {
        let Some(grad) = self.result_grad.borrow().as_ref().cloned() else {
            return;
        };
        let g = grad.as_slice().unwrap();
        let (batch, h, w, in_ch, out_ch) = (self.batch, self.h, self.w, self.in_ch, self.out_ch);
        let out_h = same_out_len(h, self.stride);
        let out_w = same_out_len(w, self.stride);
        let pad_h = same_pad_before(h, self.stride, self.kernel);
        let pad_w = same_pad_before(w, self.stride, self.kernel);

        if self.bias.requires_grad() {
            let mut grad_b = vec![0.0f32; out_ch];
            for i in 0..batch * out_h * out_w {
                for oc in 0..out_ch {
                    grad_b[oc] += g[i * out_ch + oc];
                }
            }
            self.bias.accumulate_grad(Array1::from(grad_b));
        }

        let need_w = self.weight.requires_grad();
        let need_x = self.x.requires_grad();
        if !need_w && !need_x {
            return;
        }

        let x_data = self.x.data();
        let w_data = self.weight.data();
        let xs = x_data.as_slice().unwrap();
        let ws = w_data.as_slice().unwrap();
        let mut grad_w = vec![0.0f32; self.kernel * self.kernel * in_ch * out_ch];
        let mut grad_x = vec![0.0f32; batch * h * w * in_ch];

        for n in 0..batch {
            for oh in 0..out_h {
                for ow in 0..out_w {
                    let o_base = ((n * out_h + oh) * out_w + ow) * out_ch;
                    for kh in 0..self.kernel {
                        let ih = (oh * self.stride + kh) as isize - pad_h as isize;
                        if ih < 0 || ih >= h as isize {
                            continue;
                        }
                        for kw in 0..self.kernel {
                            let iw = (ow * self.stride + kw) as isize - pad_w as isize;
                            if iw < 0 || iw >= w as isize {
                                continue;
                            }
                            let x_base = ((n * h + ih as usize) * w + iw as usize) * in_ch;
                            for ic in 0..in_ch {
                                let w_base =
                                    ((kh * self.kernel + kw) * in_ch + ic) * out_ch;
                                if need_w {
                                    let xv = xs[x_base + ic];
                                    for oc in 0..out_ch {
                                        grad_w[w_base + oc] += xv * g[o_base + oc];
                                    }
                                }
                                if need_x {
                                    let mut acc = 0.0;
                                    for oc in 0..out_ch {
                                        acc += ws[w_base + oc] * g[o_base + oc];
                                    }
                                    grad_x[x_base + ic] += acc;
                                }
                            }
                        }
                    }
                }
            }
        }
        drop(x_data);
        drop(w_data);

        if need_w {
            self.weight.accumulate_grad(Array1::from(grad_w));
        }
        if need_x {
            self.x.accumulate_grad(Array1::from(grad_x));
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.x.clone(), self.weight.clone(), self.bias.clone()]
    }
}
