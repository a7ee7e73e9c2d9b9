//! Train/test splitting with the ceil boundary rule.

use crate::error::{AdaptarError, Result};
use ndarray::{Array, Axis, RemoveAxis};

/// Index of the train/test boundary: `ceil(train_percent * n)`, so the train
/// set is never smaller than `train_percent * n`.
pub fn split_index(n: usize, train_percent: f64) -> usize {
    ((train_percent * n as f64).ceil() as usize).min(n)
}

/// Split paired arrays along axis 0 at the ceil boundary.
#[allow(clippy::type_complexity)]
pub fn train_test_split<A, B, D, E>(
    x: &Array<A, D>,
    y: &Array<B, E>,
    train_percent: f64,
) -> Result<(Array<A, D>, Array<B, E>, Array<A, D>, Array<B, E>)>
where
    A: Clone,
    B: Clone,
    D: RemoveAxis,
    E: RemoveAxis,
{
    let n = x.len_of(Axis(0));
    if n != y.len_of(Axis(0)) {
        return Err(AdaptarError::Shape(format!(
            "train/test split requires equal lengths, got {} and {}",
            n,
            y.len_of(Axis(0))
        )));
    }
    let end = split_index(n, train_percent);
    let (train_x, test_x) = x.view().split_at(Axis(0), end);
    let (train_y, test_y) = y.view().split_at(Axis(0), end);
    Ok((train_x.to_owned(), train_y.to_owned(), test_x.to_owned(), test_y.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};
    use proptest::prelude::*;

    #[test]
    fn test_split_index_rounds_up() {
        assert_eq!(split_index(10, 0.7), 7);
        assert_eq!(split_index(3, 0.5), 2);
        assert_eq!(split_index(7, 0.7), 5); // 4.9 -> 5
        assert_eq!(split_index(5, 1.0), 5);
    }

    #[test]
    fn test_split_keeps_order() {
        let x: Array2<f32> = Array2::from_shape_fn((4, 2), |(i, j)| (i * 2 + j) as f32);
        let y: Array1<i64> = Array1::from(vec![0, 1, 2, 3]);
        let (tx, ty, ex, ey) = train_test_split(&x, &y, 0.5).unwrap();
        assert_eq!(tx.nrows(), 2);
        assert_eq!(ty.to_vec(), vec![0, 1]);
        assert_eq!(ex.nrows(), 2);
        assert_eq!(ey.to_vec(), vec![2, 3]);
        assert_eq!(tx[[1, 1]], 3.0);
    }

    proptest! {
        #[test]
        fn prop_train_len_is_ceil(n in 1usize..200, pct in 1u32..=100) {
            let train_percent = f64::from(pct) / 100.0;
            let x: Array1<f32> = Array1::zeros(n);
            let y: Array1<i64> = Array1::zeros(n);
            let (tx, _, ex, _) = train_test_split(&x, &y, train_percent).unwrap();
            let expected = (train_percent * n as f64).ceil() as usize;
            prop_assert_eq!(tx.len(), expected.min(n));
            prop_assert_eq!(tx.len() + ex.len(), n);
        }
    }
}
