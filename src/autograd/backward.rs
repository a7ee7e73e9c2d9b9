//! Backward pass: reverse-topological walk over the gradient tape.

use super::tensor::Tensor;
use ndarray::Array1;
use std::collections::HashSet;

/// A recorded operation that can propagate gradients to its inputs.
///
/// `backward` reads the op's result gradient cell and accumulates into the
/// input gradient cells it captured at construction. It must not recurse:
/// traversal order is the tape's job. Sequence models share state tensors
/// across many downstream ops, and recursing from each op revisits those
/// shared nodes once per path through the graph.
pub trait BackwardOp {
    /// Propagate the result gradient one step to the op's inputs.
    fn backward(&self);

    /// The input tensors this op was applied to.
    fn inputs(&self) -> Vec<Tensor>;
}

/// Run the backward pass from `tensor`.
///
/// With `grad_output = None` the gradient is initialized to ones, the usual
/// case for a scalar loss. Each op in the graph is invoked exactly once, in
/// reverse topological order, so gradients through shared subgraphs (RNN
/// state chains, residual connections) accumulate correctly.
pub fn backward(tensor: &Tensor, grad_output: Option<Array1<f32>>) {
    match grad_output {
        Some(grad) => tensor.set_grad(grad),
        None => tensor.set_grad(Array1::ones(tensor.len())),
    }

    for node in topological_order(tensor) {
        if let Some(op) = node.backward_op() {
            op.backward();
        }
    }
}

/// Nodes reachable from `root`, ordered so every node precedes its inputs.
fn topological_order(root: &Tensor) -> Vec<Tensor> {
    let mut order = Vec::new();
    let mut visited = HashSet::new();
    // Iterative DFS; (node, expanded) pairs give postorder without recursion,
    // which matters for long unrolled sequences.
    let mut stack = vec![(root.clone(), false)];

    while let Some((node, expanded)) = stack.pop() {
        if expanded {
            order.push(node);
            continue;
        }
        if !visited.insert(node.node_id()) {
            continue;
        }
        stack.push((node.clone(), true));
        if let Some(op) = node.backward_op() {
            for input in op.inputs() {
                if !visited.contains(&input.node_id()) {
                    stack.push((input, false));
                }
            }
        }
    }

    order.reverse();
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::ops::{add, mul, scale, sum};

    #[test]
    fn test_backward_initializes_ones() {
        let a = Tensor::from_vec(vec![1.0, 2.0, 3.0], true);
        let s = sum(&a);
        backward(&s, None);
        let grad = a.grad().unwrap();
        assert_eq!(grad.to_vec(), vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_diamond_graph_accumulates_once_per_path() {
        // y = a * a: both paths contribute, grad = 2a.
        let a = Tensor::from_vec(vec![3.0], true);
        let y = mul(&a, &a);
        backward(&y, None);
        assert_eq!(a.grad().unwrap()[0], 6.0);
    }

    #[test]
    fn test_shared_node_visited_once() {
        // b = 2a; y = b + b. Naive recursion would run b's op twice and
        // double-count; the tape must give dy/da = 4.
        let a = Tensor::from_vec(vec![1.0], true);
        let b = scale(&a, 2.0);
        let y = add(&b, &b);
        backward(&y, None);
        assert_eq!(a.grad().unwrap()[0], 4.0);
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let mut t = Tensor::from_vec(vec![1.0], true);
        for _ in 0..5000 {
            t = scale(&t, 1.0);
        }
        backward(&t, None);
    }
}
