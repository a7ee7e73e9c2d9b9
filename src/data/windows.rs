//! Sliding-window dataset construction and the two-named-domain loader.

use super::npz::load_features_labels;
use super::{shuffle_split_domains, DatasetSplits};
use crate::error::{AdaptarError, Result};
use ndarray::{s, Array1, Array3, Axis};
use std::path::Path;

/// Options for [`load_data_home`].
#[derive(Debug, Clone)]
pub struct HomeOptions {
    pub train_percent: f64,
    pub seed: u64,
    pub window_size: usize,
}

impl Default for HomeOptions {
    fn default() -> Self {
        Self { train_percent: 0.7, seed: 0, window_size: 5 }
    }
}

/// Concatenate consecutive raw examples along the time axis into windows.
///
/// Window `i` covers raw examples `i .. i + window_size` and takes the label
/// of the last one, `y[i + window_size - 1]`. Windows that would reach past
/// the end are skipped, so an input of length `n` yields exactly
/// `n - window_size` windows and the final `window_size - 1` raw examples
/// never start a window.
pub fn create_windows(
    x: &Array3<f32>,
    y: &Array1<i64>,
    window_size: usize,
) -> Result<(Array3<f32>, Array1<i64>)> {
    let (n, steps, features) = x.dim();
    if n != y.len() {
        return Err(AdaptarError::Shape(format!(
            "create_windows: {} examples but {} labels",
            n,
            y.len()
        )));
    }
    if window_size == 0 || n <= window_size {
        return Err(AdaptarError::Shape(format!(
            "create_windows: window of {window_size} over {n} examples leaves no windows"
        )));
    }

    let num_windows = n - window_size;
    let mut windows_x = Array3::<f32>::zeros((num_windows, window_size * steps, features));
    let mut windows_y = Array1::<i64>::zeros(num_windows);

    for i in 0..num_windows {
        for j in 0..window_size {
            windows_x
                .slice_mut(s![i, j * steps..(j + 1) * steps, ..])
                .assign(&x.index_axis(Axis(0), i + j));
        }
        windows_y[i] = y[i + window_size - 1];
    }

    Ok((windows_x, windows_y))
}

/// Load the smart-home activity dataset: two named domain archives found
/// among the `*.npz` files in `dir`, windowed, shuffled and split.
pub fn load_data_home(
    dir: impl AsRef<Path>,
    domain_a: &str,
    domain_b: &str,
    options: &HomeOptions,
) -> Result<DatasetSplits<Array3<f32>, Array1<i64>>> {
    let dir = dir.as_ref();
    let mut a = None;
    let mut b = None;

    let mut entries: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| AdaptarError::io(format!("scanning {}", dir.display()), e))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "npz"))
        .collect();
    entries.sort();

    for path in &entries {
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        if stem == domain_a {
            a = Some(load_features_labels(path)?);
        } else if stem == domain_b {
            b = Some(load_features_labels(path)?);
        }
    }

    let (a_x, a_y) = a.ok_or_else(|| AdaptarError::MissingDomain {
        name: domain_a.to_string(),
        dir: dir.to_path_buf(),
    })?;
    let (b_x, b_y) = b.ok_or_else(|| AdaptarError::MissingDomain {
        name: domain_b.to_string(),
        dir: dir.to_path_buf(),
    })?;
    log::info!(
        "home domains: {} with {} examples, {} with {} examples",
        domain_a,
        a_y.len(),
        domain_b,
        b_y.len()
    );

    // Each raw example becomes a singleton time step; windowing concatenates
    // them along that axis. window_size == 1 is already the final shape.
    let a_x = a_x.insert_axis(Axis(1));
    let b_x = b_x.insert_axis(Axis(1));

    let (a_x, a_y, b_x, b_y) = if options.window_size != 1 {
        let (a_x, a_y) = create_windows(&a_x, &a_y, options.window_size)?;
        let (b_x, b_y) = create_windows(&b_x, &b_y, options.window_size)?;
        (a_x, a_y, b_x, b_y)
    } else {
        (a_x, a_y, b_x, b_y)
    };

    shuffle_split_domains(
        &a_x,
        &a_y,
        &b_x,
        &b_y,
        options.train_percent,
        options.seed,
        options.seed + 1,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};
    use ndarray_npy::NpzWriter;
    use std::fs::File;

    fn ramp(n: usize, features: usize) -> (Array3<f32>, Array1<i64>) {
        let x = Array3::from_shape_fn((n, 1, features), |(i, _, f)| (i * features + f) as f32);
        let y = Array1::from_iter(0..n as i64);
        (x, y)
    }

    #[test]
    fn test_window_count_and_labels() {
        let (x, y) = ramp(10, 1);
        let (wx, wy) = create_windows(&x, &y, 5).unwrap();
        assert_eq!(wx.dim(), (5, 5, 1));
        assert_eq!(wy.len(), 5);
        for i in 0..5 {
            assert_eq!(wy[i], y[i + 4]);
        }
        // Window 0 covers raw samples 0..=4.
        let first: Vec<f32> = wx.index_axis(Axis(0), 0).iter().copied().collect();
        assert_eq!(first, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_window_concatenates_time_axis() {
        // Two raw time steps per example stay adjacent within the window.
        let x = Array3::from_shape_fn((4, 2, 1), |(i, t, _)| (i * 10 + t) as f32);
        let y = Array1::from_iter(0..4);
        let (wx, _) = create_windows(&x, &y, 2).unwrap();
        assert_eq!(wx.dim(), (2, 4, 1));
        let w0: Vec<f32> = wx.index_axis(Axis(0), 0).iter().copied().collect();
        assert_eq!(w0, vec![0.0, 1.0, 10.0, 11.0]);
    }

    #[test]
    fn test_window_too_large_is_shape_error() {
        let (x, y) = ramp(5, 1);
        assert!(create_windows(&x, &y, 5).is_err());
        assert!(create_windows(&x, &y, 6).is_err());
    }

    fn write_domain(dir: &Path, name: &str, n: usize) {
        let mut npz = NpzWriter::new(File::create(dir.join(format!("{name}.npz"))).unwrap());
        let features = Array2::<f32>::from_shape_fn((n, 3), |(i, j)| (i * 3 + j) as f32);
        let labels = Array1::<i64>::from_iter((0..n as i64).map(|v| v % 4));
        npz.add_array("features", &features).unwrap();
        npz.add_array("labels", &labels).unwrap();
        npz.finish().unwrap();
    }

    #[test]
    fn test_load_data_home_windows_and_splits() {
        let dir = tempfile::tempdir().unwrap();
        write_domain(dir.path(), "ihs95", 20);
        write_domain(dir.path(), "ihs117", 15);

        let options = HomeOptions { train_percent: 0.7, seed: 0, window_size: 5 };
        let splits = load_data_home(dir.path(), "ihs95", "ihs117", &options).unwrap();

        // 20 raw -> 15 windows -> ceil(0.7 * 15) = 11 train.
        assert_eq!(splits.train_x_a.dim(), (11, 5, 3));
        assert_eq!(splits.test_x_a.dim(), (4, 5, 3));
        // 15 raw -> 10 windows -> 7 train.
        assert_eq!(splits.train_x_b.dim(), (7, 5, 3));
        assert_eq!(splits.test_y_b.len(), 3);
    }

    #[test]
    fn test_load_data_home_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        write_domain(dir.path(), "a", 12);
        write_domain(dir.path(), "b", 12);
        let options = HomeOptions { train_percent: 0.5, seed: 9, window_size: 2 };
        let s1 = load_data_home(dir.path(), "a", "b", &options).unwrap();
        let s2 = load_data_home(dir.path(), "a", "b", &options).unwrap();
        assert_eq!(s1.train_x_a, s2.train_x_a);
        assert_eq!(s1.test_y_b, s2.test_y_b);
    }

    #[test]
    fn test_missing_domain_error() {
        let dir = tempfile::tempdir().unwrap();
        write_domain(dir.path(), "only", 10);
        let err =
            load_data_home(dir.path(), "only", "absent", &HomeOptions::default()).unwrap_err();
        assert!(matches!(err, AdaptarError::MissingDomain { .. }));
    }

    #[test]
    fn test_window_size_one_skips_windowing() {
        let dir = tempfile::tempdir().unwrap();
        write_domain(dir.path(), "a", 10);
        write_domain(dir.path(), "b", 10);
        let options = HomeOptions { train_percent: 0.5, seed: 0, window_size: 1 };
        let splits = load_data_home(dir.path(), "a", "b", &options).unwrap();
        assert_eq!(splits.train_x_a.dim(), (5, 1, 3));
    }
}
