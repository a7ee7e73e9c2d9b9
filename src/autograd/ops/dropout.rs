//! Inverted dropout.

use crate::autograd::{BackwardOp, Tensor};
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::Rng;
use std::cell::RefCell;
use std::rc::Rc;

type GradCell = Rc<RefCell<Option<Array1<f32>>>>;

/// Dropout with keep probability `keep_prob`.
///
/// Kept units are scaled by `1 / keep_prob` so the expected activation is
/// unchanged. Outside training (or with `keep_prob >= 1`) this is the
/// identity and the input tensor is returned as-is.
pub fn dropout(a: &Tensor, keep_prob: f32, training: bool, rng: &mut StdRng) -> Tensor {
    if !training || keep_prob >= 1.0 {
        return a.clone();
    }
    assert!(keep_prob > 0.0, "dropout: keep_prob must be in (0, 1]");

    let mask: Array1<f32> = Array1::from(
        (0..a.len())
            .map(|_| if rng.random::<f32>() < keep_prob { 1.0 / keep_prob } else { 0.0 })
            .collect::<Vec<f32>>(),
    );
    let data = &*a.data() * &mask;
    let requires_grad = a.requires_grad();

    let mut result = Tensor::new(data, requires_grad);
    if requires_grad {
        result.set_backward_op(Rc::new(DropoutBackward {
            a: a.clone(),
            mask,
            result_grad: result.grad_cell(),
        }));
    }
    result
}

struct DropoutBackward {
    a: Tensor,
    mask: Array1<f32>,
    result_grad: GradCell,
}

impl BackwardOp for DropoutBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                self.a.accumulate_grad(grad * &self.mask);
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
    use rand::SeedableRng;

    #[test]
    fn test_identity_when_not_training() {
        let mut rng = StdRng::seed_from_u64(0);
        let a = Tensor::from_vec(vec![1.0, 2.0, 3.0], true);
        let y = dropout(&a, 0.5, false, &mut rng);
        assert_eq!(y.data().to_vec(), vec![1.0, 2.0, 3.0]);
        assert_eq!(y.node_id(), a.node_id());
    }

    #[test]
    fn test_mask_is_zero_or_scaled() {
        let mut rng = StdRng::seed_from_u64(7);
        let a = Tensor::from_vec(vec![1.0; 1000], false);
        let y = dropout(&a, 0.8, true, &mut rng);
        let kept = y.data().iter().filter(|&&v| v != 0.0).count();
        for &v in y.data().iter() {
            assert!(v == 0.0 || (v - 1.25).abs() < 1e-6);
        }
        // Roughly keep_prob of the units survive.
        assert!(kept > 700 && kept < 900, "kept {kept}");
    }

    #[test]
    fn test_deterministic_for_seed() {
        let a = Tensor::from_vec(vec![1.0; 64], false);
        let mut r1 = StdRng::seed_from_u64(42);
        let mut r2 = StdRng::seed_from_u64(42);
        let y1 = dropout(&a, 0.5, true, &mut r1);
        let y2 = dropout(&a, 0.5, true, &mut r2);
        assert_eq!(y1.data().to_vec(), y2.data().to_vec());
    }
}
