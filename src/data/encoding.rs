//! Label encoding helpers.

use crate::error::{AdaptarError, Result};
use ndarray::{Array2, Array3, ArrayD, Axis};

/// Drop every length-1 axis (keeping at least one dimension).
fn squeeze(mut y: ArrayD<f32>) -> ArrayD<f32> {
    while y.ndim() > 1 {
        match y.shape().iter().position(|&s| s == 1) {
            Some(ax) => y = y.remove_axis(Axis(ax)),
            None => break,
        }
    }
    y
}

/// Prepare a (features, labels) pair for the model assembler.
///
/// `x` becomes `f32` of shape `[n, time_steps, features]`; a 2-D input gains
/// a singleton feature axis. If the squeezed `y` is already 2-D its width
/// must be `num_classes` and it passes through unchanged (cast only), with
/// no re-encoding. Otherwise `y` is squeezed to indices, shifted down by one
/// when `index_one` (datasets labeled from 1), and one-hot encoded.
///
/// Out-of-range indices are a caller error and panic; pre-validate labels.
pub fn one_hot(
    x: ArrayD<f32>,
    y: ArrayD<f32>,
    num_classes: usize,
    index_one: bool,
) -> Result<(Array3<f32>, Array2<f32>)> {
    let x = match x.ndim() {
        2 => x.insert_axis(Axis(2)),
        3 => x,
        d => {
            return Err(AdaptarError::Shape(format!(
                "expected 2-D or 3-D features, got {d}-D"
            )))
        }
    };
    let x = x.into_dimensionality::<ndarray::Ix3>().expect("checked ndim above");

    let squeezed = squeeze(y);
    let y = if squeezed.ndim() < 2 {
        let indices = squeezed.into_dimensionality::<ndarray::Ix1>().expect("squeezed to 1-D");
        let mut encoded = Array2::<f32>::zeros((indices.len(), num_classes));
        for (i, &raw) in indices.iter().enumerate() {
            let mut idx = raw as i64;
            if index_one {
                idx -= 1;
            }
            encoded[[i, idx as usize]] = 1.0;
        }
        encoded
    } else {
        if squeezed.shape()[1] != num_classes {
            return Err(AdaptarError::Shape(format!(
                "one-hot labels have width {} but num_classes is {num_classes}",
                squeezed.shape()[1]
            )));
        }
        squeezed.into_dimensionality::<ndarray::Ix2>().map_err(|_| {
            AdaptarError::Shape("one-hot labels must squeeze to 2-D".to_string())
        })?
    };

    Ok((x, y))
}

/// One-hot domain labels for a whole batch: `[[1,0], ...]` for domain 0,
/// `[[0,1], ...]` for domain 1.
pub fn domain_labels(domain: usize, batch_size: usize) -> Array2<f32> {
    assert!(domain < 2, "there are exactly two domains");
    let mut labels = Array2::<f32>::zeros((batch_size, 2));
    for mut row in labels.outer_iter_mut() {
        row[domain] = 1.0;
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1};

    #[test]
    fn test_one_hot_encodes_indices() {
        let x = Array2::<f32>::zeros((3, 4)).into_dyn();
        let y = Array1::from(vec![0.0_f32, 2.0, 1.0]).into_dyn();
        let (x, y) = one_hot(x, y, 3, false).unwrap();
        assert_eq!(x.dim(), (3, 4, 1));
        assert_eq!(y, array![[1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]]);
    }

    #[test]
    fn test_index_one_shifts_down() {
        let x = Array2::<f32>::zeros((2, 2)).into_dyn();
        let y = Array1::from(vec![1.0_f32, 3.0]).into_dyn();
        let (_, y) = one_hot(x, y, 3, true).unwrap();
        // argmax(one_hot(label)) == label - 1
        assert_eq!(y, array![[1.0, 0.0, 0.0], [0.0, 0.0, 1.0]]);
    }

    #[test]
    fn test_already_one_hot_passes_through() {
        let x = Array3::<f32>::zeros((2, 5, 1)).into_dyn();
        let y = array![[0.0_f32, 1.0], [1.0, 0.0]].into_dyn();
        let (_, out) = one_hot(x, y.clone(), 2, false).unwrap();
        assert_eq!(out.into_dyn(), y);
    }

    #[test]
    fn test_singleton_label_axis_is_squeezed() {
        let x = Array2::<f32>::zeros((2, 3)).into_dyn();
        // Shape [n, 1], the UCR loader's label shape.
        let y = array![[1.0_f32], [0.0]].into_dyn();
        let (_, out) = one_hot(x, y, 2, false).unwrap();
        assert_eq!(out, array![[0.0, 1.0], [1.0, 0.0]]);
    }

    #[test]
    fn test_wrong_width_is_shape_error() {
        let x = Array2::<f32>::zeros((2, 3)).into_dyn();
        let y = array![[0.0_f32, 1.0, 0.0], [1.0, 0.0, 0.0]].into_dyn();
        let err = one_hot(x, y, 2, false).unwrap_err();
        assert!(matches!(err, AdaptarError::Shape(_)));
    }

    #[test]
    fn test_domain_labels_tile() {
        let d0 = domain_labels(0, 3);
        assert_eq!(d0, array![[1.0, 0.0], [1.0, 0.0], [1.0, 0.0]]);
        let d1 = domain_labels(1, 2);
        assert_eq!(d1, array![[0.0, 1.0], [0.0, 1.0]]);
    }
}
