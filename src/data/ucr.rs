//! UCR-format CSV loader.
//!
//! Tables in the UCR time-series archive layout: no header, column 0 is an
//! integer class label, the remaining columns are the sequence values.

use crate::error::{AdaptarError, Result};
use ndarray::{Array1, Array2};
use std::path::Path;

/// Load a CSV file in UCR time-series format.
///
/// Returns features `[num_examples, num_features]` as `f32` and labels
/// `[num_examples]` as `u8`. Anything that does not parse as a numeric CSV
/// table is a `Format` error.
pub fn load_csv(path: impl AsRef<Path>) -> Result<(Array2<f32>, Array1<u8>)> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(false)
        .from_path(path)
        .map_err(|e| AdaptarError::format(path, e.to_string()))?;

    let mut features: Vec<f32> = Vec::new();
    let mut labels: Vec<u8> = Vec::new();
    let mut num_features = None;

    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| AdaptarError::format(path, e.to_string()))?;
        if record.len() < 2 {
            return Err(AdaptarError::format(
                path,
                format!("row {row}: expected a label column plus features, got {} columns", record.len()),
            ));
        }
        match num_features {
            None => num_features = Some(record.len() - 1),
            Some(n) if n != record.len() - 1 => {
                return Err(AdaptarError::format(
                    path,
                    format!("row {row}: expected {} feature columns, got {}", n, record.len() - 1),
                ));
            }
            Some(_) => {}
        }

        for (col, field) in record.iter().enumerate() {
            let value: f64 = field.trim().parse().map_err(|_| {
                AdaptarError::format(path, format!("row {row}, column {col}: '{field}' is not numeric"))
            })?;
            if col == 0 {
                labels.push(value as u8);
            } else {
                features.push(value as f32);
            }
        }
    }

    let num_features = num_features.unwrap_or(0);
    let n = labels.len();
    let features = Array2::from_shape_vec((n, num_features), features)
        .map_err(|e| AdaptarError::Shape(e.to_string()))?;
    log::debug!("loaded {} examples x {} features from {}", n, num_features, path.display());
    Ok((features, Array1::from(labels)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_load_csv_splits_label_column() {
        let f = write_csv("1,0.5,0.25\n2,1.5,1.25\n");
        let (x, y) = load_csv(f.path()).unwrap();
        assert_eq!(x.dim(), (2, 2));
        assert_eq!(y.to_vec(), vec![1, 2]);
        assert_eq!(x[[1, 0]], 1.5);
    }

    #[test]
    fn test_float_formatted_labels_truncate() {
        let f = write_csv("1.0,0.5\n3.0,0.1\n");
        let (_, y) = load_csv(f.path()).unwrap();
        assert_eq!(y.to_vec(), vec![1, 3]);
    }

    #[test]
    fn test_non_numeric_is_format_error() {
        let f = write_csv("1,abc\n");
        let err = load_csv(f.path()).unwrap_err();
        assert!(matches!(err, AdaptarError::Format { .. }));
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_ragged_rows_are_format_error() {
        let f = write_csv("1,2,3\n1,2\n");
        let err = load_csv(f.path()).unwrap_err();
        assert!(matches!(err, AdaptarError::Format { .. }));
    }

    #[test]
    fn test_missing_file_is_format_error() {
        let err = load_csv("/nonexistent/trace.csv").unwrap_err();
        assert!(matches!(err, AdaptarError::Format { .. }));
    }

    #[test]
    fn test_feeds_one_hot_with_one_indexed_labels() {
        // UCR archives label classes from 1.
        let f = write_csv("1,0.5,0.1\n2,0.2,0.9\n");
        let (x, y) = load_csv(f.path()).unwrap();
        let y = y.mapv(f32::from).into_dyn();
        let (x, y) = crate::data::one_hot(x.into_dyn(), y, 2, true).unwrap();
        assert_eq!(x.dim(), (2, 2, 1));
        assert_eq!(y[[0, 0]], 1.0);
        assert_eq!(y[[1, 1]], 1.0);
    }
}
