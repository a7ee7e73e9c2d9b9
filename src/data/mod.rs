//! Dataset loading.
//!
//! Each loader produces eight arrays (train/test x domain A/B x
//! data/labels) from domain-specific raw files. All entities are read-only
//! after loading, randomness is fully seeded, and any malformed input is a
//! fatal error for that load call.

mod clinical;
mod encoding;
mod feed;
mod npz;
mod shuffle;
mod sleep;
mod split;
mod ucr;
mod windows;

pub use clinical::{load_data_icu_ahrf, load_data_icu_icd9, ClinicalOptions};
pub use encoding::{domain_labels, one_hot};
pub use feed::{input_fn, InitHook, InputPipeline};
pub use npz::load_features_labels;
pub use shuffle::{permutation, shuffle_together, shuffle_together_np};
pub use sleep::{load_data_sleep, SleepOptions};
pub use split::{split_index, train_test_split};
pub use ucr::load_csv;
pub use windows::{create_windows, load_data_home, HomeOptions};

use crate::error::{AdaptarError, Result};
use ndarray::{Array, Array1, Array3, RemoveAxis};
use std::path::Path;

/// The eight arrays a dataset load call produces.
#[derive(Debug, Clone)]
pub struct DatasetSplits<X, Y> {
    pub train_x_a: X,
    pub train_y_a: Y,
    pub test_x_a: X,
    pub test_y_a: Y,
    pub train_x_b: X,
    pub train_y_b: Y,
    pub test_x_b: X,
    pub test_y_b: Y,
}

/// Shuffle each domain with its own seed, then split both at the ceil
/// boundary. The shared tail of every subject-partitioned or windowed
/// loader.
pub(crate) fn shuffle_split_domains<A, B, D, E>(
    a_x: &Array<A, D>,
    a_y: &Array<B, E>,
    b_x: &Array<A, D>,
    b_y: &Array<B, E>,
    train_percent: f64,
    seed_a: u64,
    seed_b: u64,
) -> Result<DatasetSplits<Array<A, D>, Array<B, E>>>
where
    A: Clone,
    B: Clone,
    D: RemoveAxis,
    E: RemoveAxis,
{
    let (a_x, a_y) = shuffle_together_np(a_x, a_y, seed_a)?;
    let (b_x, b_y) = shuffle_together_np(b_x, b_y, seed_b)?;

    let (train_x_a, train_y_a, test_x_a, test_y_a) =
        train_test_split(&a_x, &a_y, train_percent)?;
    let (train_x_b, train_y_b, test_x_b, test_y_b) =
        train_test_split(&b_x, &b_y, train_percent)?;

    Ok(DatasetSplits {
        train_x_a,
        train_y_a,
        test_x_a,
        test_y_a,
        train_x_b,
        train_y_b,
        test_x_b,
        test_y_b,
    })
}

/// Wrist-worn activity prediction dataset. Not collected yet.
pub fn load_data_watch(
    _dir_name: impl AsRef<Path>,
) -> Result<DatasetSplits<Array3<f32>, Array1<i64>>> {
    Err(AdaptarError::Unsupported("watch activity dataset".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_is_unsupported() {
        assert!(matches!(
            load_data_watch("datasets/watch"),
            Err(AdaptarError::Unsupported(_))
        ));
    }
}
