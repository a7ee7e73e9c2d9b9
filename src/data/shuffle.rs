//! Seeded paired shuffles.
//!
//! Every shuffle in the loaders goes through one permutation helper, so a
//! given `(len, seed)` pair always yields the same ordering and both halves
//! of a paired dataset move together.

use crate::error::{AdaptarError, Result};
use ndarray::{Array, Axis, RemoveAxis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// The seeded permutation of `0..n` used by every paired shuffle.
pub fn permutation(n: usize, seed: u64) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    indices
}

/// Shuffle two lists in unison.
pub fn shuffle_together<T, U>(a: Vec<T>, b: Vec<U>, seed: u64) -> Result<(Vec<T>, Vec<U>)> {
    if a.len() != b.len() {
        return Err(AdaptarError::Shape(format!(
            "paired shuffle requires equal lengths, got {} and {}",
            a.len(),
            b.len()
        )));
    }
    let perm = permutation(a.len(), seed);

    let mut a_slots: Vec<Option<T>> = a.into_iter().map(Some).collect();
    let mut b_slots: Vec<Option<U>> = b.into_iter().map(Some).collect();
    let a_out = perm.iter().map(|&i| a_slots[i].take().unwrap()).collect();
    let b_out = perm.iter().map(|&i| b_slots[i].take().unwrap()).collect();
    Ok((a_out, b_out))
}

/// Shuffle two arrays together along axis 0.
pub fn shuffle_together_np<A, B, D, E>(
    a: &Array<A, D>,
    b: &Array<B, E>,
    seed: u64,
) -> Result<(Array<A, D>, Array<B, E>)>
where
    A: Clone,
    B: Clone,
    D: RemoveAxis,
    E: RemoveAxis,
{
    let n = a.len_of(Axis(0));
    if n != b.len_of(Axis(0)) {
        return Err(AdaptarError::Shape(format!(
            "paired shuffle requires equal lengths, got {} and {}",
            n,
            b.len_of(Axis(0))
        )));
    }
    let perm = permutation(n, seed);
    Ok((a.select(Axis(0), &perm), b.select(Axis(0), &perm)))
}
