//! Domain-adaptive time-series classification.
//!
//! Two loosely coupled subsystems:
//!
//! - [`data`] loads labeled sequential datasets from multiple domains
//!   (CSV tables, NumPy archives, JSON fold/measurement sidecars),
//!   partitions them into two disjoint domains, and splits each into
//!   train/test with fully seeded shuffles.
//! - [`model`] assembles the computation graph: a sequence encoder (flat,
//!   LSTM, variational RNN, temporal convolutional, or image-style CNN),
//!   a shared two-head classifier, a gradient-reversal adversarial domain
//!   branch, and a composite loss.
//!
//! The [`autograd`] module is the minimal tape-based numerical backend the
//! assembler composes its graphs from. Training loops, optimizers, and
//! checkpointing are deliberately out of scope.
//!
//! # Example
//!
//! ```
//! use adaptar::model::{DomainAdaptModel, ModelConfig, SequenceModel};
//! use adaptar::Tensor;
//!
//! let config = ModelConfig::new(SequenceModel::Lstm, 2, 3, 4);
//! let model = DomainAdaptModel::new(config).expect("valid config");
//!
//! // One batch of two examples, 4 time steps x 3 features each.
//! let x = Tensor::from_vec(vec![0.1; 2 * 4 * 3], false);
//! let y = Tensor::from_vec(vec![1.0, 0.0, 0.0, 1.0], false);
//! let domain = Tensor::from_vec(vec![1.0, 0.0, 0.0, 1.0], false);
//!
//! let outputs = model.build(&x, &y, &domain, 1.0, 1.0, false).unwrap();
//! assert!(outputs.total_loss.data()[0].is_finite());
//! ```

pub mod autograd;
pub mod cli;
pub mod data;
mod error;
pub mod model;

pub use autograd::{backward, Tensor};
pub use error::{AdaptarError, Result};
