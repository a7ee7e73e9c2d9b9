//! Autograd operations.

mod activations;
mod basic;
mod conv;
mod dropout;
mod grl;
mod linear;
mod normalize;

pub use activations::{leaky_relu, relu, sigmoid, softmax_rows, softplus, tanh};
pub(crate) use activations::softmax_row;
pub use basic::{
    add, add_scalar, concat_cols, ln_clamped, mean_all, mul, recip_clamped, scale,
    select_time_step, slice_cols, slice_rows, sub, sum,
};
pub use conv::{conv1d_causal, conv2d_same, same_out_len};
pub use dropout::dropout;
pub use grl::flip_gradient;
pub use linear::{linear, matmul, matmul_compute, transpose};
pub use normalize::BatchNorm;
