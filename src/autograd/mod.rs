//! Tape-based autograd engine.
//!
//! A minimal define-by-run numerical backend for the model assembler: flat
//! `f32` tensors, a gradient tape, and the primitive operations the
//! assembler composes (dense layers, activations, dropout, convolutions,
//! batch norm, gradient reversal, slicing).
//!
//! The backward pass walks the recorded graph once in reverse topological
//! order, so gradients through shared subgraphs (recurrent state chains,
//! residual connections) accumulate exactly once per use.

mod backward;
pub mod ops;
mod tensor;

pub use backward::{backward, BackwardOp};
pub use tensor::Tensor;
