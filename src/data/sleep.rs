//! Grouped/subject RF sleep-staging loader.
//!
//! Each `*.npz` archive holds one recording session: a subject id, a stage
//! label per epoch, and a complex RF feature tensor. Subjects are the unit
//! of domain assignment: all of a subject's examples land in domain A or
//! domain B, never both.

use super::npz::{open_npz, read_named};
use super::{shuffle_split_domains, shuffle_together, DatasetSplits};
use crate::error::{AdaptarError, Result};
use ndarray::{concatenate, Array1, Array2, Array3, Axis};
use num_complex::Complex32;
use std::path::Path;

/// Stage labels at or above this value mean "no signal" or "error" and are
/// dropped.
const NUM_STAGES: i64 = 6;

/// Options for [`load_data_sleep`].
#[derive(Debug, Clone)]
pub struct SleepOptions {
    pub domain_a_percent: f64,
    pub train_percent: f64,
    pub seed: u64,
    /// RF samples per labeled epoch (30 s at 25 Hz in the source data).
    pub samples_per_epoch: usize,
}

impl Default for SleepOptions {
    fn default() -> Self {
        Self { domain_a_percent: 0.7, train_percent: 0.7, seed: 0, samples_per_epoch: 750 }
    }
}

/// One parsed session archive.
struct Session {
    subject: i64,
    x: Array3<f32>,
    y: Array1<i64>,
}

fn load_session(path: &Path, samples_per_epoch: usize) -> Result<Session> {
    let mut npz = open_npz(path)?;
    let subject: Array1<i64> = read_named(&mut npz, path, "subject")?;
    let stage: Array1<i64> = read_named(&mut npz, path, "stage")?;
    let rf: Array2<Complex32> = read_named(&mut npz, path, "rf")?;

    let subject = *subject.first().ok_or_else(|| {
        AdaptarError::format(path, "empty 'subject' array")
    })?;

    // Split complex features into real and imaginary halves, doubling the
    // feature count.
    let real = rf.mapv(|v| v.re);
    let imag = rf.mapv(|v| v.im);
    let stacked = concatenate(Axis(0), &[real.view(), imag.view()])
        .map_err(|e| AdaptarError::Shape(e.to_string()))?;

    let num_epochs = stage.len();
    let num_features = stacked.nrows();
    if num_epochs * samples_per_epoch != stacked.ncols() {
        return Err(AdaptarError::Shape(format!(
            "{}: {} stage labels x {} samples != {} rf samples",
            path.display(),
            num_epochs,
            samples_per_epoch,
            stacked.ncols()
        )));
    }

    // Reshape [features, samples_per_epoch * epochs] into
    // [epochs, samples_per_epoch, features]; sample t of epoch j sits at
    // column t * epochs + j, the source tensor's interleaved layout.
    let mut x = Array3::<f32>::zeros((num_epochs, samples_per_epoch, num_features));
    for j in 0..num_epochs {
        for t in 0..samples_per_epoch {
            for c in 0..num_features {
                x[[j, t, c]] = stacked[[c, t * num_epochs + j]];
            }
        }
    }

    // Drop epochs labeled outside the valid stage range.
    let keep: Vec<usize> =
        (0..num_epochs).filter(|&j| stage[j] >= 0 && stage[j] < NUM_STAGES).collect();
    let x = x.select(Axis(0), &keep);
    let y = stage.select(Axis(0), &keep);

    Ok(Session { subject, x, y })
}

/// Load the sleep RF dataset from `dir_name/*.npz`.
///
/// Subjects are shuffled with the configured seed and the first
/// `ceil(domain_a_percent * count)` become domain A. Each domain's
/// concatenated examples are reshuffled (seeds offset by +1 and +2) and
/// split into train/test at the ceil boundary.
pub fn load_data_sleep(
    dir_name: impl AsRef<Path>,
    options: &SleepOptions,
) -> Result<DatasetSplits<Array3<f32>, Array1<i64>>> {
    let dir = dir_name.as_ref();
    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| AdaptarError::io(format!("scanning {}", dir.display()), e))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "npz"))
        .collect();
    paths.sort();

    // Group sessions by subject, appending repeated observations of the
    // same subject below the earlier ones.
    let mut subjects: Vec<(i64, Array3<f32>, Array1<i64>)> = Vec::new();
    for path in &paths {
        let session = load_session(path, options.samples_per_epoch)?;
        match subjects.iter_mut().find(|(id, _, _)| *id == session.subject) {
            Some((_, x, y)) => {
                *x = concatenate(Axis(0), &[x.view(), session.x.view()])
                    .map_err(|e| AdaptarError::Shape(e.to_string()))?;
                *y = concatenate(Axis(0), &[y.view(), session.y.view()])
                    .map_err(|e| AdaptarError::Shape(e.to_string()))?;
            }
            None => subjects.push((session.subject, session.x, session.y)),
        }
    }
    if subjects.is_empty() {
        return Err(AdaptarError::Shape(format!(
            "no subject archives found in {}",
            dir.display()
        )));
    }
    log::info!("loaded {} subjects from {} archives", subjects.len(), paths.len());

    let mut xs = Vec::with_capacity(subjects.len());
    let mut ys = Vec::with_capacity(subjects.len());
    for (_, x, y) in subjects {
        xs.push(x);
        ys.push(y);
    }

    // Subject-level shuffle, then the subject-disjoint domain cut.
    let (xs, ys) = shuffle_together(xs, ys, options.seed)?;
    let domain_end = ((options.domain_a_percent * xs.len() as f64).ceil() as usize).min(xs.len());

    let concat_x = |list: &[Array3<f32>]| {
        concatenate(Axis(0), &list.iter().map(|a| a.view()).collect::<Vec<_>>())
            .map_err(|e| AdaptarError::Shape(e.to_string()))
    };
    let concat_y = |list: &[Array1<i64>]| {
        concatenate(Axis(0), &list.iter().map(|a| a.view()).collect::<Vec<_>>())
            .map_err(|e| AdaptarError::Shape(e.to_string()))
    };

    if domain_end == xs.len() {
        return Err(AdaptarError::Shape(format!(
            "domain_a_percent {} leaves domain B empty with {} subjects",
            options.domain_a_percent,
            xs.len()
        )));
    }

    let a_x = concat_x(&xs[..domain_end])?;
    let a_y = concat_y(&ys[..domain_end])?;
    let b_x = concat_x(&xs[domain_end..])?;
    let b_y = concat_y(&ys[domain_end..])?;
    log::debug!("domain A: {} examples, domain B: {} examples", a_y.len(), b_y.len());

    shuffle_split_domains(
        &a_x,
        &a_y,
        &b_x,
        &b_y,
        options.train_percent,
        options.seed + 1,
        options.seed + 2,
    )
}
