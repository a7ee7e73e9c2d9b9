//! NumPy archive access.
//!
//! Thin wrappers over `ndarray-npy` that attach the file path and array name
//! to every failure, so a malformed dataset surfaces as one `Format` error
//! naming what was wrong.

use crate::error::{AdaptarError, Result};
use ndarray::{Array, Array1, Array2, Dimension, OwnedRepr};
use ndarray_npy::{NpzReader, ReadableElement};
use std::fs::File;
use std::path::Path;

/// Open an `.npz` archive for reading.
pub fn open_npz(path: impl AsRef<Path>) -> Result<NpzReader<File>> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| AdaptarError::io(format!("opening {}", path.display()), e))?;
    NpzReader::new(file).map_err(|e| AdaptarError::format(path, e.to_string()))
}

/// Read a named array, tolerating the `.npy` suffix NumPy's `savez` adds to
/// member names.
pub fn read_named<A, D>(npz: &mut NpzReader<File>, path: &Path, name: &str) -> Result<Array<A, D>>
where
    A: ReadableElement,
    D: Dimension,
{
    match npz.by_name::<OwnedRepr<A>, D>(name) {
        Ok(array) => Ok(array),
        Err(_) => npz
            .by_name::<OwnedRepr<A>, D>(&format!("{name}.npy"))
            .map_err(|e| AdaptarError::format(path, format!("array '{name}': {e}"))),
    }
}

/// Read the `features`/`labels` pair used by the windowing loader.
pub fn load_features_labels(path: impl AsRef<Path>) -> Result<(Array2<f32>, Array1<i64>)> {
    let path = path.as_ref();
    let mut npz = open_npz(path)?;
    let features: Array2<f32> = read_named(&mut npz, path, "features")?;
    let labels: Array1<i64> = read_named(&mut npz, path, "labels")?;
    if features.nrows() != labels.len() {
        return Err(AdaptarError::Shape(format!(
            "{}: {} feature rows but {} labels",
            path.display(),
            features.nrows(),
            labels.len()
        )));
    }
    Ok((features, labels))
}
