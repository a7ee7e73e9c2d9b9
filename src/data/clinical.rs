//! Clinical ICU time-series loaders.
//!
//! Both variants read a precomputed, imputed time-series archive plus an
//! admission feature matrix, derive two age-bracket domains, and intersect
//! domain membership with externally supplied per-fold train/test index
//! sets. The AHRF variant additionally screens for respiratory failure via
//! the minimum PaO2/FiO2 ratio over each patient's raw measurements.

use super::npz::{open_npz, read_named};
use super::DatasetSplits;
use crate::error::{AdaptarError, Result};
use ndarray::{s, Array1, Array2, Array3, Axis};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Days per year, for converting the age column.
const DAYS_PER_YEAR: f64 = 365.25;

/// Columns of the raw measurement rows holding PaO2 and FiO2.
const PAO2_COLUMN: usize = 4;
const FIO2_COLUMN: usize = 5;

/// Minimum PaO2/FiO2 ratio below which a patient counts as respiratory
/// failure.
const PF_RATIO_THRESHOLD: f64 = 300.0;

/// Options shared by the clinical loaders.
#[derive(Debug, Clone)]
pub struct ClinicalOptions {
    /// Observation window in hours (24 or 48 in the source data).
    pub hrs: usize,
    /// Which mortality label column to use (AHRF variant).
    pub label_type: usize,
    /// Which cross-validation fold supplies the train/test index sets.
    pub fold: usize,
}

impl Default for ClinicalOptions {
    fn default() -> Self {
        Self { hrs: 24, label_type: 0, fold: 0 }
    }
}

/// Per-fold index sets, externally supplied.
#[derive(Debug, Deserialize)]
struct FoldIndices {
    training: Vec<usize>,
    #[serde(default)]
    #[allow(dead_code)]
    validation: Vec<usize>,
    testing: Vec<usize>,
}

/// Fold file layout: `folds_ep_mor[label_type][fold]`.
#[derive(Debug, Deserialize)]
struct FoldsFile {
    folds_ep_mor: Vec<Vec<FoldIndices>>,
}

/// One admission's raw, irregularly sampled measurements. `values[i][c]` is
/// measurement column `c` at `times[i]` (seconds); missing entries are null.
#[derive(Debug, Deserialize)]
struct AdmissionRecord {
    times: Vec<f64>,
    values: Vec<Vec<Option<f64>>>,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let file = std::fs::File::open(path)
        .map_err(|e| AdaptarError::io(format!("opening {}", path.display()), e))?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .map_err(|e| AdaptarError::format(path, e.to_string()))
}

fn load_fold(path: &Path, label_type: usize, fold: usize) -> Result<(Vec<usize>, Vec<usize>)> {
    let folds: FoldsFile = read_json(path)?;
    let per_label = folds.folds_ep_mor.get(label_type).ok_or_else(|| {
        AdaptarError::Shape(format!(
            "folds file has {} label slots, wanted {label_type}",
            folds.folds_ep_mor.len()
        ))
    })?;
    let indices = per_label.get(fold).ok_or_else(|| {
        AdaptarError::Shape(format!("folds file has {} folds, wanted {fold}", per_label.len()))
    })?;
    Ok((indices.training.clone(), indices.testing.clone()))
}

/// Ascending intersection of a sorted membership list with a fold index set.
fn intersect(members: &[usize], fold_indices: &[usize]) -> Vec<usize> {
    let set: HashSet<usize> = fold_indices.iter().copied().collect();
    members.iter().copied().filter(|i| set.contains(i)).collect()
}

/// Replace NaN/Inf with zero, cast to `f32`.
fn clean(x: Array3<f64>) -> Array3<f32> {
    x.mapv(|v| if v.is_finite() { v as f32 } else { 0.0 })
}

/// Age in years per admission. Computed before any cleaning so a missing
/// age stays NaN and falls outside every bracket.
fn ages(adm_features: &Array2<f64>) -> Result<Array1<f64>> {
    if adm_features.ncols() == 0 {
        return Err(AdaptarError::Shape("admission features are empty".to_string()));
    }
    Ok(adm_features.column(0).mapv(|days| days / DAYS_PER_YEAR))
}

fn bracket_indices(age: &Array1<f64>, lo: f64, hi: f64, extra: Option<&[bool]>) -> Vec<usize> {
    age.iter()
        .enumerate()
        .filter(|(i, &a)| {
            a >= lo && a < hi && extra.map_or(true, |flags| flags[*i])
        })
        .map(|(i, _)| i)
        .collect()
}

/// Respiratory-failure screen: stay longer than `hrs`, then minimum
/// PaO2/FiO2 over positions where both were measured below the threshold.
///
/// This reproduces the source pipeline's best-effort selection; it is a
/// heuristic, not a validated clinical filter.
fn respiratory_flags(records: &[AdmissionRecord], hrs: usize) -> Vec<bool> {
    let min_stay = 3600.0 * hrs as f64;
    records
        .iter()
        .filter(|r| match (r.times.first(), r.times.last()) {
            (Some(first), Some(last)) => last - first > min_stay,
            _ => false,
        })
        .map(|r| {
            let mut min_ratio = f64::INFINITY;
            for row in &r.values {
                if let (Some(Some(pao2)), Some(Some(fio2))) =
                    (row.get(PAO2_COLUMN), row.get(FIO2_COLUMN))
                {
                    min_ratio = min_ratio.min(pao2 / fio2);
                }
            }
            min_ratio < PF_RATIO_THRESHOLD
        })
        .collect()
}

#[allow(clippy::type_complexity)]
fn split_by_fold<Y: Clone, E: ndarray::RemoveAxis>(
    x: &Array3<f32>,
    y: &ndarray::Array<Y, E>,
    domain_a: &[usize],
    domain_b: &[usize],
    training: &[usize],
    testing: &[usize],
) -> DatasetSplits<Array3<f32>, ndarray::Array<Y, E>> {
    let take = |idx: &[usize]| (x.select(Axis(0), idx), y.select(Axis(0), idx));
    let (train_x_a, train_y_a) = take(&intersect(domain_a, training));
    let (test_x_a, test_y_a) = take(&intersect(domain_a, testing));
    let (train_x_b, train_y_b) = take(&intersect(domain_b, training));
    let (test_x_b, test_y_b) = take(&intersect(domain_b, testing));
    DatasetSplits {
        train_x_a,
        train_y_a,
        test_x_a,
        test_y_a,
        train_x_b,
        train_y_b,
        test_x_b,
        test_y_b,
    }
}

/// Load the ICU mortality dataset for adult respiratory-failure patients,
/// domains split on age (65-85 vs 45-65 years).
///
/// Expects under `data_path`:
/// - `{hrs}hrs/series/imputed_{hrs}.npz` with `ep_tdata` `[n, t, f]`,
///   `adm_labels` `[n, label_types]`, `adm_features` `[n, 5]`
/// - `{hrs}hrs/series/folds.json`
/// - `{hrs}hrs/merged.json` with the raw per-admission measurements
pub fn load_data_icu_ahrf(
    data_path: impl AsRef<Path>,
    options: &ClinicalOptions,
) -> Result<DatasetSplits<Array3<f32>, Array1<i64>>> {
    let base: PathBuf = data_path.as_ref().join(format!("{}hrs", options.hrs));
    let series_path = base.join("series").join(format!("imputed_{}.npz", options.hrs));
    let folds_path = base.join("series").join("folds.json");
    let merged_path = base.join("merged.json");

    let mut npz = open_npz(&series_path)?;
    let x: Array3<f64> = read_named(&mut npz, &series_path, "ep_tdata")?;
    let adm_labels: Array2<i64> = read_named(&mut npz, &series_path, "adm_labels")?;
    let adm_features: Array2<f64> = read_named(&mut npz, &series_path, "adm_features")?;

    if options.label_type >= adm_labels.ncols() {
        return Err(AdaptarError::Shape(format!(
            "label_type {} but admission labels have {} columns",
            options.label_type,
            adm_labels.ncols()
        )));
    }
    let y: Array1<i64> = adm_labels.column(options.label_type).to_owned();
    let age = ages(&adm_features)?;
    let x = clean(x);

    let records: Vec<AdmissionRecord> = read_json(&merged_path)?;
    let flags = respiratory_flags(&records, options.hrs);
    if flags.len() != x.len_of(Axis(0)) {
        return Err(AdaptarError::Shape(format!(
            "{} admissions kept from {} but series has {}",
            flags.len(),
            merged_path.display(),
            x.len_of(Axis(0))
        )));
    }

    let domain_a = bracket_indices(&age, 65.0, 85.0, Some(&flags));
    let domain_b = bracket_indices(&age, 45.0, 65.0, Some(&flags));
    log::info!(
        "ahrf domains: {} elderly, {} working-age (of {} admissions)",
        domain_a.len(),
        domain_b.len(),
        age.len()
    );

    let (training, testing) = load_fold(&folds_path, options.label_type, options.fold)?;
    Ok(split_by_fold(&x, &y, &domain_a, &domain_b, &training, &testing))
}

/// Load the ICU diagnosis-code dataset, domains split on age, with the
/// series truncated to 24 steps and averaged down to 12.
///
/// Expects under `data_path`:
/// - `{hrs}hrs_raw/series/imputed_{hrs}.npz` with `ep_tdata`, `y_icd9`
///   `[n, code_categories]`, `adm_features`
/// - `{hrs}hrs_raw/series/folds.json`
pub fn load_data_icu_icd9(
    data_path: impl AsRef<Path>,
    options: &ClinicalOptions,
) -> Result<DatasetSplits<Array3<f32>, Array2<f32>>> {
    let base: PathBuf = data_path.as_ref().join(format!("{}hrs_raw", options.hrs));
    let series_path = base.join("series").join(format!("imputed_{}.npz", options.hrs));
    let folds_path = base.join("series").join("folds.json");

    let mut npz = open_npz(&series_path)?;
    let x: Array3<f64> = read_named(&mut npz, &series_path, "ep_tdata")?;
    let y: Array2<f64> = read_named(&mut npz, &series_path, "y_icd9")?;
    let adm_features: Array2<f64> = read_named(&mut npz, &series_path, "adm_features")?;

    let age = ages(&adm_features)?;
    let x = clean(x);
    let y = y.mapv(|v| v as f32);

    // One point per two hours over the first day: truncate to 24 steps and
    // average consecutive pairs.
    if x.len_of(Axis(1)) < 24 {
        return Err(AdaptarError::Shape(format!(
            "series has {} time steps, need at least 24",
            x.len_of(Axis(1))
        )));
    }
    let x = downsample_pairs(&x.slice(s![.., ..24, ..]).to_owned());

    let domain_a = bracket_indices(&age, 65.0, 85.0, None);
    let domain_b = bracket_indices(&age, 45.0, 65.0, None);
    log::info!(
        "icd9 domains: {} elderly, {} working-age (of {} admissions)",
        domain_a.len(),
        domain_b.len(),
        age.len()
    );

    let (training, testing) = load_fold(&folds_path, 0, options.fold)?;
    Ok(split_by_fold(&x, &y, &domain_a, &domain_b, &training, &testing))
}

/// Average consecutive time-step pairs: `[n, 2t, f]` -> `[n, t, f]`.
fn downsample_pairs(x: &Array3<f32>) -> Array3<f32> {
    let (n, t, f) = x.dim();
    let half = t / 2;
    Array3::from_shape_fn((n, half, f), |(i, s, c)| {
        0.5 * (x[[i, 2 * s, c]] + x[[i, 2 * s + 1, c]])
    })
}
